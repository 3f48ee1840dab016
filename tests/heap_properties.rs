use std::ptr::NonNull;

use proptest::prelude::*;
use tagheap::{FixedArena, Heap, HeapConfig};

#[derive(Debug, Clone)]
enum Op {
  Allocate(usize),
  Release(usize),
  Reallocate(usize, usize),
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    3 => (1usize..600).prop_map(Op::Allocate),
    2 => any::<usize>().prop_map(Op::Release),
    2 => (any::<usize>(), 0usize..900).prop_map(|(slot, size)| Op::Reallocate(slot, size)),
  ]
}

struct Live {
  ptr: NonNull<u8>,
  len: usize,
  fill: u8,
}

unsafe fn fill(live: &Live) {
  unsafe { live.ptr.as_ptr().write_bytes(live.fill, live.len) }
}

unsafe fn intact(
  live: &Live,
  len: usize,
) -> bool {
  (0..len).all(|i| unsafe { live.ptr.as_ptr().add(i).read() } == live.fill)
}

fn run(
  ops: Vec<Op>,
  config: HeapConfig,
) -> Result<(), TestCaseError> {
  let _ = env_logger::builder().is_test(true).try_init();

  let mut heap = Heap::new(FixedArena::new(1 << 20), config);
  heap.init().unwrap();

  let mut live: Vec<Live> = Vec::new();
  let mut next_fill = 1u8;

  for op in ops {
    match op {
      Op::Allocate(size) => {
        let ptr = heap.allocate(size).unwrap().unwrap();
        prop_assert_eq!(ptr.as_ptr() as usize % 8, 0);
        prop_assert!(unsafe { heap.usable_size(ptr) } >= size, "usable_size(ptr) >= size");

        let entry = Live {
          ptr,
          len: size,
          fill: next_fill,
        };
        unsafe { fill(&entry) };
        live.push(entry);
      }
      Op::Release(slot) if !live.is_empty() => {
        let entry = live.swap_remove(slot % live.len());
        unsafe { heap.release(entry.ptr).unwrap() };
      }
      Op::Reallocate(slot, size) if !live.is_empty() => {
        let index = slot % live.len();
        let old_len = live[index].len;
        let moved = unsafe { heap.reallocate(Some(live[index].ptr), size) }.unwrap();

        match moved {
          None => {
            prop_assert_eq!(size, 0);
            live.swap_remove(index);
          }
          Some(ptr) => {
            prop_assert_eq!(ptr.as_ptr() as usize % 8, 0);
            live[index].ptr = ptr;
            prop_assert!(unsafe { intact(&live[index], old_len.min(size)) }, "intact(live[index], old_len.min(size))");

            live[index].len = size;
            live[index].fill = next_fill;
            unsafe { fill(&live[index]) };
          }
        }
      }
      _ => {}
    }
    next_fill = next_fill.wrapping_add(1).max(1);

    let stats = heap.check().map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert_eq!(stats.allocated_blocks, live.len());
    for entry in &live {
      prop_assert!(unsafe { intact(entry, entry.len) }, "intact(entry, entry.len)");
    }
  }

  for entry in live.drain(..) {
    unsafe { heap.release(entry.ptr).unwrap() };
  }
  let stats = heap.check().unwrap();
  prop_assert_eq!(stats.allocated_blocks, 0);
  prop_assert_eq!(stats.free_blocks, 1);
  Ok(())
}

proptest! {
  #[test]
  fn invariants_hold_across_operations(ops in prop::collection::vec(op(), 1..120)) {
    run(ops, HeapConfig::DEFAULT)?;
  }

  #[test]
  fn invariants_hold_with_small_chunks(ops in prop::collection::vec(op(), 1..120)) {
    run(ops, HeapConfig::DEFAULT.with_chunk_size(64).with_validation(true))?;
  }

  #[test]
  fn coalescing_restores_a_single_block(sizes in prop::collection::vec(1usize..300, 1..40)) {
    let mut heap = Heap::new(FixedArena::new(1 << 18), HeapConfig::DEFAULT);
    heap.init().unwrap();

    let ptrs: Vec<_> = sizes
      .iter()
      .map(|&size| heap.allocate(size).unwrap().unwrap())
      .collect();

    // release every other block first, then the rest
    for ptr in ptrs.iter().step_by(2) {
      unsafe { heap.release(*ptr).unwrap() };
    }
    heap.check().unwrap();
    for ptr in ptrs.iter().skip(1).step_by(2) {
      unsafe { heap.release(*ptr).unwrap() };
    }

    let stats = heap.check().unwrap();
    prop_assert_eq!(stats.free_blocks, 1);
    prop_assert_eq!(stats.free_bytes, heap.arena_len() - 16);
  }
}
