use std::io::Read;

use libc::sbrk;
use segalloc::{SegAllocator, print_alloc};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the
/// program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // A segregated-fit allocator over the program break. It keeps free
  // blocks indexed by size class and merges adjacent free blocks on
  // release, so freed memory is actually reused.
  let mut allocator = SegAllocator::system();

  unsafe {
    // Initial heap state
    print_program_break("start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 24 bytes. The first allocation installs the heap
    //    sentinels and seeds the region with one free chunk.
    // --------------------------------------------------------------------
    let first_block = allocator.allocate(24);
    println!("\n[1] Allocate 24 bytes");
    print_alloc(24, first_block);

    // Write something into the allocated memory to show it's usable.
    (first_block as *mut u32).write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", (first_block as *mut u32).read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 100 bytes. This still fits the seeded chunk, so the
    //    program break does not move again.
    // --------------------------------------------------------------------
    let second_block = allocator.allocate(100);
    println!("\n[2] Allocate 100 bytes (carved from the same chunk)");
    print_alloc(100, second_block);
    println!("[2] {:?}", allocator);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Release the first block and allocate 24 bytes again. The freed
    //    block is recycled, so the same address comes back.
    // --------------------------------------------------------------------
    allocator.release(first_block);
    println!("\n[3] Released first_block at {:?}", first_block);

    let third_block = allocator.allocate(24);
    print_alloc(24, third_block);
    println!(
      "[3] third_block == first_block? {}",
      if third_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Shrink the 100-byte block in place. The trailing bytes become a
    //    free block of their own.
    // --------------------------------------------------------------------
    let shrunk = allocator.reallocate(second_block, 40);
    println!("\n[4] Shrink second_block from 100 to 40 bytes");
    println!(
      "[4] shrunk == second_block? {} (a shrink stays in place)",
      shrunk == second_block
    );
    println!("[4] {:?}", allocator);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Allocate a large block to observe heap growth.
    //    This changes the result of `sbrk(0)`.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    // Example: 64 KiB
    let big_block = allocator.allocate(64 * 1024);
    println!("\n[5] Allocate large 64 KiB block");
    print_alloc(64 * 1024, big_block);

    print_program_break("after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Release everything and verify the heap invariants.
    // --------------------------------------------------------------------
    allocator.release(third_block);
    allocator.release(shrunk);
    allocator.release(big_block);

    match allocator.check_heap() {
      Ok(()) => println!("\n[6] Heap check passed: all blocks merged and indexed"),
      Err(violations) => {
        println!("\n[6] Heap check FAILED:");
        for v in violations {
          println!("    {}", v);
        }
      }
    }
    println!("[6] {:?}", allocator);

    // --------------------------------------------------------------------
    // 7) End of demo.
    //
    //    The region is never returned to the OS; the process exit
    //    reclaims everything.
    // --------------------------------------------------------------------
    println!("\n[7] End of example. Process will exit and the OS will reclaim all memory.");
  }
}
