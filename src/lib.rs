//! # tagheap - A Boundary-Tag Heap Allocator
//!
//! This crate provides a general-purpose **implicit free list** allocator
//! in Rust. It manages one contiguous arena that only ever grows at its high
//! end, and keeps all of its bookkeeping inside the arena itself.
//!
//! ## Overview
//!
//! Every block starts with a one-word header holding its size and two flags.
//! Free blocks repeat the header in a footer so that a released block can
//! find a free predecessor in constant time:
//!
//! ```text
//!   Arena:
//!
//!   ┌─────┬──────────┬─────────┬───────────────┬───────┬──────────┬──────────┐
//!   │ pad │ prologue │ A1      │ F1            │ A2    │ F2       │ epilogue │
//!   │     │  8 | a   │ hdr ... │ hdr ..... ftr │ hdr . │ hdr  ftr │  0 | a   │
//!   └─────┴──────────┴─────────┴───────────────┴───────┴──────────┴──────────┘
//!                    ▲                                            ▲
//!                    └── first block                    arena end ┘
//!
//!   Header / footer word (32 bits):
//!   ┌──────────────────────────────────────────┬───┬───┬───┐
//!   │ size (multiple of 8)                     │ 0 │ p │ a │
//!   └──────────────────────────────────────────┴───┴───┴───┘
//!                                      prev_allocated ┘   └ allocated
//! ```
//!
//! Allocated blocks carry no footer. The `prev_allocated` bit in the next
//! header records what that footer would have said, which shrinks the
//! overhead of an allocation to a single word.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagheap
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Header/footer codec and block arithmetic (internal)
//!   ├── config     - HeapConfig
//!   ├── error      - HeapError
//!   ├── grower     - HeapGrower trait, SbrkGrower, FixedArena
//!   ├── heap       - Heap: next-fit search, splitting, coalescing, realloc
//!   └── locked     - LockedHeap: spin-locked GlobalAlloc adapter
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagheap::{FixedArena, Heap, HeapConfig};
//!
//! let mut heap = Heap::new(FixedArena::new(1 << 16), HeapConfig::default());
//! heap.init()?;
//!
//! let ptr = heap.allocate(100)?.expect("non-zero request");
//! assert_eq!(ptr.as_ptr() as usize % 8, 0);
//!
//! unsafe {
//!   ptr.as_ptr().write_bytes(0xAB, 100);
//!   let ptr = heap.reallocate(Some(ptr), 400)?.expect("non-zero request");
//!   assert_eq!(ptr.as_ptr().add(99).read(), 0xAB);
//!   heap.release(ptr)?;
//! }
//!
//! heap.check()?;
//! # Ok::<(), tagheap::HeapError>(())
//! ```
//!
//! ## How It Works
//!
//! - **allocate**: the request is rounded up to a block size, then a
//!   next-fit scan resumes where the previous one stopped and wraps around
//!   the arena once. On a miss the arena grows by at least one chunk.
//!   Oversized fits are split when the tail can stand as a block.
//! - **release**: the block is marked free and immediately merged with any
//!   free neighbour, so no two free blocks are ever adjacent.
//! - **reallocate**: shrinks in place, grows in place into a free
//!   successor, and only moves the data when neither is possible.
//!
//! ## Limitations
//!
//! - **Single owner**: a `Heap` is not synchronized; wrap it in
//!   [`LockedHeap`] to share it
//! - **No trimming**: memory is never handed back to the backing store
//! - **8-byte alignment**: larger alignments are not supported
//! - **Unix-only sbrk**: [`SbrkGrower`] requires `libc` on POSIX systems
//!
//! ## Safety
//!
//! Releasing or reallocating a pointer that is not an outstanding allocation
//! corrupts the heap. Enable [`HeapConfig::validate`] to reject such
//! pointers at the cost of a scan per call.

pub mod align;
mod block;
mod config;
mod error;
mod grower;
mod heap;
mod locked;

pub use block::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};
pub use config::{CHUNK_SIZE, HeapConfig};
pub use error::{HeapError, Result};
#[cfg(unix)]
pub use grower::SbrkGrower;
pub use grower::{FixedArena, HeapGrower};
pub use heap::{BlockInfo, Blocks, Heap, HeapStats};
pub use locked::LockedHeap;
