use std::ptr::NonNull;

/// Size in bytes of a header or footer word.
pub const WSIZE: usize = 4;

/// Smallest legal block: a free block needs room for its header and footer.
pub const MIN_BLOCK_SIZE: usize = 2 * WSIZE;

/// Largest size a [`Tag`] can encode.
pub const MAX_BLOCK_SIZE: usize = (u32::MAX & !FLAG_MASK) as usize;

const ALLOCATED: u32 = 0b001;
const PREV_ALLOCATED: u32 = 0b010;
const FLAG_MASK: u32 = 0b111;

/// A packed header/footer word: block size in the high bits, the
/// `allocated` flag in bit 0 and the `prev_allocated` flag in bit 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Tag(u32);

impl Tag {
  /// `size` must be a multiple of 8 no larger than [`MAX_BLOCK_SIZE`].
  pub const fn new(
    size: usize,
    allocated: bool,
    prev_allocated: bool,
  ) -> Self {
    debug_assert!(size & FLAG_MASK as usize == 0);
    debug_assert!(size <= MAX_BLOCK_SIZE);

    let mut bits = size as u32;
    if allocated {
      bits |= ALLOCATED;
    }
    if prev_allocated {
      bits |= PREV_ALLOCATED;
    }
    Self(bits)
  }

  pub const fn bits(self) -> u32 {
    self.0
  }

  pub const fn size(self) -> usize {
    (self.0 & !FLAG_MASK) as usize
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }

  pub const fn prev_allocated(self) -> bool {
    self.0 & PREV_ALLOCATED != 0
  }

  pub const fn with_prev_allocated(
    self,
    prev_allocated: bool,
  ) -> Self {
    Self::new(self.size(), self.is_allocated(), prev_allocated)
  }
}

/// Handle to a block, addressed by its header word.
///
/// A `Block` is only a position in the arena: every accessor reads or writes
/// the words in place. All methods are unsafe to the extent that the handle
/// must sit on a real block boundary of a live arena; stepping with [`next`]
/// stops being meaningful once [`is_epilogue`] reports the end sentinel.
///
/// ```text
///   allocated:  ┌────────┬──────────────────────────┐
///               │ header │ payload                  │
///               └────────┴──────────────────────────┘
///   free:       ┌────────┬─────────────────┬────────┐
///               │ header │ (unused)        │ footer │
///               └────────┴─────────────────┴────────┘
///               ▲        ▲
///            Block    payload() = header + WSIZE
/// ```
///
/// [`next`]: Block::next
/// [`is_epilogue`]: Block::is_epilogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Block(NonNull<u8>);

impl Block {
  pub const fn dangling() -> Self {
    Self(NonNull::dangling())
  }

  pub const fn from_header(header: NonNull<u8>) -> Self {
    Self(header)
  }

  /// # Safety
  ///
  /// `payload` must have been produced by [`Block::payload`].
  pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
    Self(unsafe { payload.sub(WSIZE) })
  }

  pub fn addr(self) -> usize {
    self.0.as_ptr() as usize
  }

  pub unsafe fn payload(self) -> NonNull<u8> {
    unsafe { self.0.add(WSIZE) }
  }

  pub unsafe fn tag(self) -> Tag {
    unsafe { read_tag(self.0) }
  }

  pub unsafe fn set_tag(
    self,
    tag: Tag,
  ) {
    unsafe { write_tag(self.0, tag) }
  }

  pub unsafe fn size(self) -> usize {
    unsafe { self.tag().size() }
  }

  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.tag().is_allocated() }
  }

  pub unsafe fn prev_allocated(self) -> bool {
    unsafe { self.tag().prev_allocated() }
  }

  pub unsafe fn is_epilogue(self) -> bool {
    unsafe { self.size() == 0 }
  }

  /// Address of the footer word. Only free blocks actually carry one.
  pub unsafe fn footer(self) -> NonNull<u8> {
    unsafe { self.0.add(self.size() - WSIZE) }
  }

  pub unsafe fn footer_tag(self) -> Tag {
    unsafe { read_tag(self.footer()) }
  }

  /// Copies the header word into the footer word.
  pub unsafe fn mirror_footer(self) {
    unsafe { write_tag(self.footer(), self.tag()) }
  }

  pub unsafe fn next(self) -> Block {
    unsafe { Block(self.0.add(self.size())) }
  }

  /// Steps back through the predecessor's footer, so it is valid only when
  /// `prev_allocated()` is false.
  pub unsafe fn prev(self) -> Block {
    unsafe {
      debug_assert!(!self.prev_allocated());
      let prev_size = read_tag(self.0.sub(WSIZE)).size();
      Block(self.0.sub(prev_size))
    }
  }

  pub unsafe fn write_free(
    self,
    size: usize,
    prev_allocated: bool,
  ) {
    unsafe {
      write_tag(self.0, Tag::new(size, false, prev_allocated));
      self.mirror_footer();
    }
  }

  pub unsafe fn write_allocated(
    self,
    size: usize,
    prev_allocated: bool,
  ) {
    unsafe { write_tag(self.0, Tag::new(size, true, prev_allocated)) }
  }

  /// Updates the cached state of the physical predecessor, mirroring the
  /// change into the footer when this block is free.
  pub unsafe fn set_prev_allocated(
    self,
    prev_allocated: bool,
  ) {
    unsafe {
      let tag = self.tag().with_prev_allocated(prev_allocated);
      self.set_tag(tag);
      if !tag.is_allocated() && tag.size() != 0 {
        self.mirror_footer();
      }
    }
  }
}

unsafe fn read_tag(at: NonNull<u8>) -> Tag {
  Tag(unsafe { at.cast::<u32>().read() })
}

unsafe fn write_tag(
  at: NonNull<u8>,
  tag: Tag,
) {
  unsafe { at.cast::<u32>().write(tag.bits()) }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// First header position of a zeroed, 8-aligned buffer.
  fn arena(words: &mut [u64; 16]) -> Block {
    let base = NonNull::new(words.as_mut_ptr().cast::<u8>()).unwrap();
    Block::from_header(unsafe { base.add(WSIZE) })
  }

  #[test]
  fn test_tag_packing() {
    let tag = Tag::new(48, true, false);
    assert_eq!(tag.bits(), 48 | 1);
    assert_eq!(tag.size(), 48);
    assert!(tag.is_allocated());
    assert!(!tag.prev_allocated());

    let tag = tag.with_prev_allocated(true);
    assert_eq!(tag.bits(), 48 | 0b11);

    let epilogue = Tag::new(0, true, false);
    assert_eq!(epilogue.size(), 0);
    assert!(epilogue.is_allocated());
  }

  #[test]
  fn test_max_block_size_fits() {
    let tag = Tag::new(MAX_BLOCK_SIZE, false, true);
    assert_eq!(tag.size(), MAX_BLOCK_SIZE);
    assert!(tag.prev_allocated());
    assert!(!tag.is_allocated());
  }

  #[test]
  fn test_navigation() {
    let mut words = [0u64; 16];
    let first = arena(&mut words);

    unsafe {
      first.write_allocated(16, true);
      let second = first.next();
      second.write_free(24, true);
      let third = second.next();
      third.write_allocated(8, false);
      third.next().set_tag(Tag::new(0, true, true));

      assert_eq!(second.addr() - first.addr(), 16);
      assert_eq!(third.addr() - second.addr(), 24);
      assert_eq!(second.footer().as_ptr() as usize, third.addr() - WSIZE);
      assert_eq!(first.payload().as_ptr() as usize % 8, 0);
      assert_eq!(Block::from_payload(second.payload()), second);

      assert_eq!(third.prev(), second);
      assert!(third.next().is_epilogue());
      assert!(!second.is_allocated());
      assert!(second.prev_allocated());
    }
  }

  #[test]
  fn test_free_footer_tracks_header() {
    let mut words = [0u64; 16];
    let block = arena(&mut words);

    unsafe {
      block.write_free(32, true);
      assert_eq!(block.footer_tag(), block.tag());

      block.set_prev_allocated(false);
      assert!(!block.prev_allocated());
      assert_eq!(block.footer_tag(), block.tag());

      // allocated blocks have no footer to maintain
      block.write_allocated(32, false);
      let stale = block.footer_tag();
      block.set_prev_allocated(true);
      assert_eq!(block.footer_tag(), stale);
      assert!(block.prev_allocated());
    }
  }
}
