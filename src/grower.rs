use std::{alloc, ptr::NonNull};

use crate::{align, align::ALIGNMENT};

/// Source of fresh arena memory.
///
/// Every successful call must return a region that starts exactly where the
/// previous one ended; the heap rejects anything else.
pub trait HeapGrower {
  /// Appends `bytes` (a multiple of [`ALIGNMENT`]) to the arena and returns
  /// the start of the new region, or `None` when the backing store is
  /// exhausted.
  ///
  /// # Safety
  ///
  /// The returned memory must stay valid and untouched by anyone else for
  /// the lifetime of the grower.
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>>;
}

/// Grows the arena by moving the program break with `sbrk(2)`.
///
/// Contiguity only holds while nothing else in the process moves the break;
/// if something does, the heap reports [`HeapError::NonContiguous`].
///
/// [`HeapError::NonContiguous`]: crate::HeapError::NonContiguous
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SbrkGrower;

#[cfg(unix)]
impl HeapGrower for SbrkGrower {
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    let increment = libc::intptr_t::try_from(bytes).ok()?;
    let address = unsafe { libc::sbrk(increment) };

    if address == usize::MAX as *mut libc::c_void {
      return None;
    }

    NonNull::new(address.cast::<u8>())
  }
}

/// A fixed-capacity arena carved out of one up-front allocation.
///
/// Regions are handed out front to back until the capacity is used up, which
/// makes exhaustion reproducible in tests.
#[derive(Debug)]
pub struct FixedArena {
  start: NonNull<u8>,
  capacity: usize,
  used: usize,
}

impl FixedArena {
  /// Reserves `capacity` zeroed bytes (rounded up to the alignment).
  ///
  /// # Panics
  ///
  /// If the reservation itself cannot be satisfied.
  pub fn new(capacity: usize) -> Self {
    let capacity = align!(capacity.max(ALIGNMENT));
    let layout = Self::layout(capacity);
    let start = match NonNull::new(unsafe { alloc::alloc_zeroed(layout) }) {
      Some(start) => start,
      None => alloc::handle_alloc_error(layout),
    };

    Self {
      start,
      capacity,
      used: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn used(&self) -> usize {
    self.used
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.used
  }

  fn layout(capacity: usize) -> alloc::Layout {
    match alloc::Layout::from_size_align(capacity, ALIGNMENT) {
      Ok(layout) => layout,
      Err(_) => panic!("arena capacity {capacity} overflows a layout"),
    }
  }
}

impl HeapGrower for FixedArena {
  unsafe fn grow(
    &mut self,
    bytes: usize,
  ) -> Option<NonNull<u8>> {
    if bytes > self.remaining() {
      return None;
    }

    let region = unsafe { self.start.add(self.used) };
    self.used += bytes;
    Some(region)
  }
}

impl Drop for FixedArena {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.start.as_ptr(), Self::layout(self.capacity)) }
  }
}

// SAFETY: the arena exclusively owns its buffer.
unsafe impl Send for FixedArena {}
