use std::{
  alloc::{GlobalAlloc, Layout},
  ptr::{self, NonNull},
};

use spin::{Mutex, MutexGuard};

use crate::{align::ALIGNMENT, config::HeapConfig, grower::HeapGrower, heap::Heap};

/// A [`Heap`] behind a spin lock, usable as a `#[global_allocator]`.
///
/// ```rust,ignore
/// use tagheap::{HeapConfig, LockedHeap, SbrkGrower};
///
/// #[global_allocator]
/// static HEAP: LockedHeap<SbrkGrower> = LockedHeap::new(SbrkGrower, HeapConfig::DEFAULT);
/// ```
///
/// Layouts aligned above [`ALIGNMENT`] are refused with a null pointer. When
/// installed globally, pair it only with a logger that does not allocate.
pub struct LockedHeap<G: HeapGrower>(Mutex<Heap<G>>);

impl<G: HeapGrower> LockedHeap<G> {
  pub const fn new(
    grower: G,
    config: HeapConfig,
  ) -> Self {
    Self(Mutex::new(Heap::new(grower, config)))
  }

  pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
    self.0.lock()
  }
}

unsafe impl<G: HeapGrower + Send> GlobalAlloc for LockedHeap<G> {
  unsafe fn alloc(
    &self,
    layout: Layout,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    match self.lock().allocate(layout.size()) {
      Ok(Some(ptr)) => ptr.as_ptr(),
      _ => ptr::null_mut(),
    }
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    if let Some(ptr) = NonNull::new(ptr) {
      // only fails for rejected pointers, which GlobalAlloc cannot report
      let _ = unsafe { self.lock().release(ptr) };
    }
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }

    match unsafe { self.lock().reallocate(NonNull::new(ptr), new_size) } {
      Ok(Some(ptr)) => ptr.as_ptr(),
      _ => ptr::null_mut(),
    }
  }
}
