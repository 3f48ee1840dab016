use std::{
  cmp, fmt,
  marker::PhantomData,
  ptr::{self, NonNull},
};

use log::{debug, trace, warn};

use crate::{
  align,
  align::ALIGNMENT,
  block::{Block, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, Tag, WSIZE},
  config::HeapConfig,
  error::{HeapError, Result},
  grower::HeapGrower,
};

/// The prologue is a header and a footer with nothing in between.
const PROLOGUE_SIZE: usize = 2 * WSIZE;

/// Padding word, prologue and epilogue.
const INITIAL_SIZE: usize = 2 * WSIZE + PROLOGUE_SIZE;

/// A boundary-tag heap over one contiguous, growable arena.
///
/// Blocks are found with a circular next-fit scan, split on allocation and
/// merged with their free neighbours as soon as they are released. The free
/// list is implicit: it is the block sequence itself, walked through the
/// size stored in every header.
pub struct Heap<G: HeapGrower> {
  grower: G,
  config: HeapConfig,
  initialized: bool,
  base: usize,
  prologue: Block,
  epilogue: Block,
  cursor: Block,
}

/// Summary produced by [`Heap::check`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub arena_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

/// A decoded block, as yielded by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address.
  pub addr: usize,
  /// Total size, header included.
  pub size: usize,
  pub allocated: bool,
  pub prev_allocated: bool,
}

// SAFETY: the heap is the only owner of its arena; the block handles it
// keeps never point anywhere else.
unsafe impl<G: HeapGrower + Send> Send for Heap<G> {}

impl<G: HeapGrower> Heap<G> {
  /// Creates a heap that has not touched its grower yet.
  pub const fn new(
    grower: G,
    config: HeapConfig,
  ) -> Self {
    Self {
      grower,
      config,
      initialized: false,
      base: 0,
      prologue: Block::dangling(),
      epilogue: Block::dangling(),
      cursor: Block::dangling(),
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  pub fn is_initialized(&self) -> bool {
    self.initialized
  }

  /// Bytes obtained from the grower so far (alignment padding excluded).
  pub fn arena_len(&self) -> usize {
    if self.initialized { self.arena_end() - self.base } else { 0 }
  }

  fn arena_end(&self) -> usize {
    self.epilogue.addr() + WSIZE
  }

  /// Lays down the sentinels and grows the arena by one chunk.
  ///
  /// ```text
  ///   base                                                      end
  ///   ┌─────┬────────┬────────┬─────────────────────────┬────────┐
  ///   │ pad │ 8 | a  │ 8 | a  │  chunk | free           │ 0 | a  │
  ///   └─────┴────────┴────────┴─────────────────────────┴────────┘
  ///          prologue            first block              epilogue
  /// ```
  pub fn init(&mut self) -> Result<()> {
    if self.initialized {
      return Err(HeapError::AlreadyInitialized);
    }

    let region = unsafe { self.grower.grow(INITIAL_SIZE) }.ok_or(HeapError::Exhausted {
      requested: INITIAL_SIZE,
    })?;
    let base = self.align_base(region)?;

    unsafe {
      base.cast::<u32>().write(0);

      let prologue = Block::from_header(base.add(WSIZE));
      prologue.write_allocated(PROLOGUE_SIZE, true);
      prologue.mirror_footer();

      let epilogue = prologue.next();
      epilogue.set_tag(Tag::new(0, true, true));

      self.base = base.as_ptr() as usize;
      self.prologue = prologue;
      self.epilogue = epilogue;
      self.cursor = epilogue;

      let first = self.extend(self.config.chunk_size)?;
      self.cursor = first;
    }

    self.initialized = true;
    debug!(
      "heap initialized at {:#x} with a {} byte arena",
      self.base,
      self.arena_len()
    );
    Ok(())
  }

  /// Requests the padding needed to start the layout on an aligned address.
  fn align_base(
    &mut self,
    region: NonNull<u8>,
  ) -> Result<NonNull<u8>> {
    let misalignment = region.as_ptr() as usize % ALIGNMENT;
    if misalignment == 0 {
      return Ok(region);
    }

    let padding = ALIGNMENT - misalignment;
    let tail = unsafe { self.grower.grow(padding) }.ok_or(HeapError::Exhausted { requested: padding })?;

    let expected = region.as_ptr() as usize + INITIAL_SIZE;
    let actual = tail.as_ptr() as usize;
    if actual != expected {
      return Err(HeapError::NonContiguous { expected, actual });
    }

    Ok(unsafe { region.add(padding) })
  }

  fn ensure_initialized(&mut self) -> Result<()> {
    if !self.initialized {
      self.init()?;
    }
    Ok(())
  }

  /// Block size needed to serve a request of `size` bytes.
  fn block_size(size: usize) -> Result<usize> {
    let padded = size
      .checked_add(WSIZE + ALIGNMENT - 1)
      .ok_or(HeapError::TooLarge { size })?
      & !(ALIGNMENT - 1);

    if padded > MAX_BLOCK_SIZE {
      return Err(HeapError::TooLarge { size });
    }

    Ok(cmp::max(padded, MIN_BLOCK_SIZE))
  }

  /// Appends at least `bytes` to the arena as one free block and merges it
  /// with a free block left at the old end.
  unsafe fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<Block> {
    let len = self.arena_end() - self.base;
    if bytes > MAX_BLOCK_SIZE - len {
      warn!("arena of {len} bytes cannot grow by {bytes} more");
      return Err(HeapError::Exhausted { requested: bytes });
    }
    let bytes = cmp::max(align!(bytes), MIN_BLOCK_SIZE);

    let expected = self.arena_end();
    let region = match unsafe { self.grower.grow(bytes) } {
      Some(region) => region,
      None => {
        warn!("backing store refused {bytes} bytes");
        return Err(HeapError::Exhausted { requested: bytes });
      }
    };

    let actual = region.as_ptr() as usize;
    if actual != expected {
      warn!("grower returned {actual:#x}, arena ends at {expected:#x}");
      return Err(HeapError::NonContiguous { expected, actual });
    }

    unsafe {
      // the old epilogue becomes the header of the new block
      let block = self.epilogue;
      block.write_free(bytes, block.prev_allocated());

      let epilogue = block.next();
      epilogue.set_tag(Tag::new(0, true, false));
      self.epilogue = epilogue;

      debug!("arena grew by {bytes} bytes to {}", self.arena_end() - self.base);
      Ok(self.coalesce(block))
    }
  }

  /// Merges the free `block` with its free physical neighbours.
  unsafe fn coalesce(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      let next = block.next();
      let mut size = block.size();

      let merged = match (block.prev_allocated(), next.is_allocated()) {
        (true, true) => block,
        (true, false) => {
          size += next.size();
          block.write_free(size, true);
          block
        }
        (false, true) => {
          let prev = block.prev();
          size += prev.size();
          prev.write_free(size, prev.prev_allocated());
          prev
        }
        (false, false) => {
          let prev = block.prev();
          size += prev.size() + next.size();
          prev.write_free(size, prev.prev_allocated());
          prev
        }
      };

      let following = merged.next();
      following.set_prev_allocated(false);

      if self.cursor > merged && self.cursor < following {
        self.cursor = merged;
      }

      trace!("coalesced {:#x} into {:#x} ({size} bytes)", block.addr(), merged.addr());
      merged
    }
  }

  unsafe fn first_block(&self) -> Block {
    unsafe { self.prologue.next() }
  }

  /// Maps the epilogue onto the first real block.
  unsafe fn wrap(
    &self,
    block: Block,
  ) -> Block {
    unsafe { if block.is_epilogue() { self.first_block() } else { block } }
  }

  /// Next-fit: resumes at the cursor and walks the whole arena at most once.
  unsafe fn find_fit(
    &mut self,
    size: usize,
  ) -> Option<Block> {
    unsafe {
      let start = self.cursor;
      let mut block = start;

      loop {
        if !block.is_allocated() && block.size() >= size {
          self.cursor = self.wrap(block.next());
          return Some(block);
        }

        block = self.wrap(block.next());
        if block == start {
          return None;
        }
      }
    }
  }

  /// Marks the free `block` allocated, splitting off the tail when it can
  /// stand as a block of its own.
  unsafe fn place(
    &mut self,
    block: Block,
    size: usize,
  ) {
    unsafe {
      let total = block.size();
      let prev_allocated = block.prev_allocated();

      if total - size < MIN_BLOCK_SIZE {
        block.write_allocated(total, prev_allocated);
        block.next().set_prev_allocated(true);
      } else {
        block.write_allocated(size, prev_allocated);
        block.next().write_free(total - size, true);
      }
    }
  }

  unsafe fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<Block> {
    unsafe {
      let block = match self.find_fit(size) {
        Some(block) => block,
        None => self.extend(cmp::max(size, self.config.chunk_size))?,
      };

      self.place(block, size);
      Ok(block)
    }
  }

  /// Allocates at least `size` bytes aligned to [`ALIGNMENT`].
  ///
  /// A zero-size request yields `Ok(None)`. The heap is initialized on first
  /// use if [`init`](Self::init) was not called.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    if size == 0 {
      return Ok(None);
    }

    self.ensure_initialized()?;
    let block_size = Self::block_size(size)?;

    unsafe {
      let block = self.allocate_block(block_size)?;
      trace!("allocate({size}) -> {:#x}", block.addr() + WSIZE);
      Ok(Some(block.payload()))
    }
  }

  /// Returns the block owning `ptr` to the heap.
  ///
  /// # Safety
  ///
  /// `ptr` must be an outstanding allocation of this heap. With
  /// [`HeapConfig::validate`] set, other pointers are rejected with
  /// [`HeapError::InvalidPointer`] instead.
  pub unsafe fn release(
    &mut self,
    ptr: NonNull<u8>,
  ) -> Result<()> {
    let block = self.outstanding(ptr)?;
    trace!("release({:#x})", ptr.as_ptr() as usize);
    unsafe { self.free_block(block) };
    Ok(())
  }

  unsafe fn free_block(
    &mut self,
    block: Block,
  ) -> Block {
    unsafe {
      block.write_free(block.size(), block.prev_allocated());
      self.coalesce(block)
    }
  }

  /// Resizes the allocation at `ptr`, in place when its neighbourhood
  /// allows, otherwise by moving it.
  ///
  /// `None` behaves as [`allocate`](Self::allocate); a zero `size` releases
  /// `ptr` and yields `Ok(None)`. On failure the original allocation is
  /// left untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`release`](Self::release).
  pub unsafe fn reallocate(
    &mut self,
    ptr: Option<NonNull<u8>>,
    size: usize,
  ) -> Result<Option<NonNull<u8>>> {
    let Some(ptr) = ptr else {
      return self.allocate(size);
    };

    let block = self.outstanding(ptr)?;

    unsafe {
      if size == 0 {
        trace!("reallocate({:#x}, 0) releases", ptr.as_ptr() as usize);
        self.free_block(block);
        return Ok(None);
      }

      let block_size = Self::block_size(size)?;
      let current = block.size();

      if block_size == current {
        return Ok(Some(ptr));
      }

      if block_size < current {
        self.shrink_in_place(block, block_size);
        trace!("reallocate({:#x}, {size}) shrank in place", ptr.as_ptr() as usize);
        return Ok(Some(ptr));
      }

      if self.grow_in_place(block, block_size) {
        trace!("reallocate({:#x}, {size}) grew in place", ptr.as_ptr() as usize);
        return Ok(Some(ptr));
      }

      let moved = self.allocate_block(block_size)?;
      let count = cmp::min(current, moved.size()) - WSIZE;
      ptr::copy_nonoverlapping(ptr.as_ptr(), moved.payload().as_ptr(), count);
      self.free_block(block);

      trace!(
        "reallocate({:#x}, {size}) moved to {:#x}",
        ptr.as_ptr() as usize,
        moved.addr() + WSIZE
      );
      Ok(Some(moved.payload()))
    }
  }

  /// Gives the tail of `block` back when it is large enough to be a block.
  unsafe fn shrink_in_place(
    &mut self,
    block: Block,
    size: usize,
  ) {
    unsafe {
      let remainder = block.size() - size;
      if remainder < MIN_BLOCK_SIZE {
        return;
      }

      block.write_allocated(size, block.prev_allocated());
      let rest = block.next();
      rest.write_free(remainder, true);
      self.coalesce(rest);
    }
  }

  /// Extends `block` into a free successor if the two together are big
  /// enough.
  unsafe fn grow_in_place(
    &mut self,
    block: Block,
    size: usize,
  ) -> bool {
    unsafe {
      let next = block.next();
      if next.is_allocated() {
        return false;
      }

      let total = block.size() + next.size();
      if total < size {
        return false;
      }

      let prev_allocated = block.prev_allocated();
      if total - size < MIN_BLOCK_SIZE {
        block.write_allocated(total, prev_allocated);
        let following = block.next();
        following.set_prev_allocated(true);
        if self.cursor == next {
          self.cursor = self.wrap(following);
        }
      } else {
        block.write_allocated(size, prev_allocated);
        let rest = block.next();
        rest.write_free(total - size, true);
        if self.cursor == next {
          self.cursor = rest;
        }
        self.coalesce(rest);
      }

      true
    }
  }

  /// Bytes the client may use at `ptr`.
  ///
  /// # Safety
  ///
  /// `ptr` must be an outstanding allocation of this heap.
  pub unsafe fn usable_size(
    &self,
    ptr: NonNull<u8>,
  ) -> usize {
    unsafe { Block::from_payload(ptr).size() - WSIZE }
  }

  /// Resolves `ptr` to its block, walking the block list first when
  /// validation is enabled.
  fn outstanding(
    &self,
    ptr: NonNull<u8>,
  ) -> Result<Block> {
    let addr = ptr.as_ptr() as usize;

    if !self.config.validate {
      return Ok(unsafe { Block::from_payload(ptr) });
    }

    let invalid = HeapError::InvalidPointer { addr };
    if !self.initialized || addr % ALIGNMENT != 0 {
      warn!("rejected {addr:#x}: not a payload address");
      return Err(invalid);
    }

    let header = addr.wrapping_sub(WSIZE);
    unsafe {
      let mut block = self.first_block();
      if header < block.addr() || header >= self.epilogue.addr() {
        warn!("rejected {addr:#x}: outside the arena");
        return Err(invalid);
      }

      while block.addr() < header {
        block = block.next();
      }

      if block.addr() != header || !block.is_allocated() {
        warn!("rejected {addr:#x}: not an allocated block");
        return Err(invalid);
      }

      Ok(block)
    }
  }

  /// Every real block in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    let (current, end) = if self.initialized {
      (unsafe { self.first_block() }, self.epilogue)
    } else {
      (self.epilogue, self.epilogue)
    };

    Blocks {
      current,
      end,
      _heap: PhantomData,
    }
  }

  /// Walks the whole arena and verifies every structural invariant.
  pub fn check(&self) -> Result<HeapStats> {
    let mut stats = HeapStats::default();
    if !self.initialized {
      return Ok(stats);
    }

    let corrupted = |block: Block, reason| HeapError::Corrupted {
      addr: block.addr(),
      reason,
    };

    unsafe {
      if self.prologue.tag() != Tag::new(PROLOGUE_SIZE, true, true) {
        return Err(corrupted(self.prologue, "bad prologue"));
      }

      let end = self.epilogue;
      let mut block = self.first_block();
      let mut prev_allocated = true;
      let mut cursor_seen = false;

      while block < end {
        let tag = block.tag();
        let size = tag.size();

        if size < MIN_BLOCK_SIZE {
          return Err(corrupted(block, "block smaller than the minimum"));
        }
        if (block.addr() + WSIZE) % ALIGNMENT != 0 {
          return Err(corrupted(block, "misaligned payload"));
        }
        if block.addr() + size > end.addr() {
          return Err(corrupted(block, "block overruns the epilogue"));
        }
        if tag.prev_allocated() != prev_allocated {
          return Err(corrupted(block, "stale prev_allocated bit"));
        }

        if tag.is_allocated() {
          stats.allocated_blocks += 1;
          stats.allocated_bytes += size;
        } else {
          if !prev_allocated {
            return Err(corrupted(block, "adjacent free blocks"));
          }
          if block.footer_tag() != tag {
            return Err(corrupted(block, "footer does not match header"));
          }
          stats.free_blocks += 1;
          stats.free_bytes += size;
          stats.largest_free = cmp::max(stats.largest_free, size);
        }

        cursor_seen |= block == self.cursor;
        prev_allocated = tag.is_allocated();
        block = block.next();
      }

      if block != end {
        return Err(corrupted(block, "block list does not end at the epilogue"));
      }
      if end.tag() != Tag::new(0, true, prev_allocated) {
        return Err(corrupted(end, "bad epilogue"));
      }
      if !cursor_seen {
        return Err(corrupted(self.cursor, "search cursor is not a block boundary"));
      }
    }

    stats.arena_bytes = self.arena_len();
    Ok(stats)
  }
}

impl<G: HeapGrower> fmt::Debug for Heap<G> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("Heap")
      .field("config", &self.config)
      .field("initialized", &self.initialized)
      .field("base", &format_args!("{:#x}", self.base))
      .field("arena_len", &self.arena_len())
      .field("cursor", &format_args!("{:#x}", self.cursor.addr()))
      .finish()
  }
}

/// Iterator returned by [`Heap::blocks`].
pub struct Blocks<'a> {
  current: Block,
  end: Block,
  _heap: PhantomData<&'a ()>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.current >= self.end {
      return None;
    }

    unsafe {
      let block = self.current;
      let tag = block.tag();

      // a zero size before the epilogue means the list is broken
      self.current = if tag.size() == 0 { self.end } else { block.next() };

      Some(BlockInfo {
        addr: block.addr() + WSIZE,
        size: tag.size(),
        allocated: tag.is_allocated(),
        prev_allocated: tag.prev_allocated(),
      })
    }
  }
}
