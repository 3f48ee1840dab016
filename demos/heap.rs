use std::{io::Read, ptr::NonNull};

use libc::sbrk;
use tagheap::{Heap, HeapConfig, SbrkGrower};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

/// Prints every block of the arena, lowest address first.
fn print_blocks(heap: &Heap<SbrkGrower>) {
  for block in heap.blocks() {
    println!(
      "    {:#x}  {:>6} bytes  {}",
      block.addr,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn allocate(
  heap: &mut Heap<SbrkGrower>,
  size: usize,
) -> Option<NonNull<u8>> {
  match heap.allocate(size) {
    Ok(ptr) => ptr,
    Err(err) => {
      eprintln!("allocate({size}) failed: {err}");
      None
    }
  }
}

fn main() {
  env_logger::init();

  // A heap grown with sbrk(2). Anything else in the process that moves the
  // program break in between makes further growth fail as non-contiguous.
  let mut heap = Heap::new(SbrkGrower, HeapConfig::default());

  unsafe {
    print_program_break("start");
    if let Err(err) = heap.init() {
      eprintln!("init failed: {err}");
      return;
    }
    print_program_break("after init");
    print_blocks(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 100 bytes: one header word plus the payload, rounded to 8.
    // --------------------------------------------------------------------
    let Some(first) = allocate(&mut heap, 100) else { return };
    first.cast::<u32>().write(0xDEADBEEF);
    println!("\n[1] allocate(100) = {:?}, usable = {}", first, heap.usable_size(first));
    print_blocks(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Two neighbours, then release both: they merge back into the tail.
    // --------------------------------------------------------------------
    let Some(second) = allocate(&mut heap, 32) else { return };
    let Some(third) = allocate(&mut heap, 32) else { return };
    println!("\n[2] allocate(32) = {second:?}, allocate(32) = {third:?}");
    print_blocks(&heap);

    let _ = heap.release(second);
    let _ = heap.release(third);
    println!("[2] released both, free space coalesced:");
    print_blocks(&heap);
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Grow the first block in place into the free space behind it.
    // --------------------------------------------------------------------
    match heap.reallocate(Some(first), 500) {
      Ok(Some(grown)) => {
        println!(
          "\n[3] reallocate(first, 500) = {grown:?} (in place: {}), value = 0x{:X}",
          grown == first,
          grown.cast::<u32>().read()
        );
        print_blocks(&heap);
      }
      Ok(None) => {}
      Err(err) => eprintln!("reallocate failed: {err}"),
    }
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) A request larger than the free tail extends the arena.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = allocate(&mut heap, 64 * 1024);
    println!("\n[4] allocate(64 KiB) = {big:?}");
    print_program_break("after large alloc");
    block_until_enter_pressed();

    match heap.check() {
      Ok(stats) => println!("\n[5] heap consistent: {stats:?}"),
      Err(err) => println!("\n[5] heap check failed: {err}"),
    }
    println!("End of example. Process will exit and the OS will reclaim all memory.");
  }
}
