use libc::sbrk;
use segalloc::{Heap, SbrkRegion, SmallMode};

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
  // A slab-variant heap over the program break: requests of at most 15
  // bytes come from slab slots, everything else from the segregated lists.
  let mut heap = match Heap::new(SbrkRegion::new(), SmallMode::Slab) {
    Some(heap) => heap,
    None => {
      eprintln!("could not obtain the initial heap chunk");
      return;
    }
  };

  unsafe {
    print_program_break("start");

    // --------------------------------------------------------------------
    // 1) A few ordinary allocations. Watch the initial 4096-byte chunk get
    //    split: each allocation carves its block off the front of the
    //    remaining free space.
    // --------------------------------------------------------------------
    let a = heap.allocate(100);
    let b = heap.allocate(250);
    let c = heap.allocate(24);
    println!("\n[1] allocate(100) = {a:?}, allocate(250) = {b:?}, allocate(24) = {c:?}");
    heap.dump();

    // --------------------------------------------------------------------
    // 2) Tiny allocations divert to a slab block: one 800-byte block hands
    //    out 16-byte slots, so three 12-byte requests cost one block, not
    //    three.
    // --------------------------------------------------------------------
    let s1 = heap.allocate(12);
    let s2 = heap.allocate(12);
    let s3 = heap.allocate(12);
    println!("\n[2] three allocate(12): {s1:?} {s2:?} {s3:?}");
    heap.dump();

    // --------------------------------------------------------------------
    // 3) Free the middle allocation and then its neighbor. The second free
    //    coalesces with the first: the heap never keeps two adjacent free
    //    blocks.
    // --------------------------------------------------------------------
    heap.deallocate(b);
    println!("\n[3] after deallocate(b):");
    heap.dump();

    heap.deallocate(a);
    println!("[3] after deallocate(a) (merged with b's block):");
    heap.dump();

    // --------------------------------------------------------------------
    // 4) Resize keeps contents. Grow c from 24 to 300 bytes; the payload
    //    moves but its bytes travel along.
    // --------------------------------------------------------------------
    c.write_bytes(0x7E, 24);
    let c = heap.reallocate(c, 300);
    println!("\n[4] reallocate(c, 300) = {c:?}, first byte = {:#x}", c.read());

    // --------------------------------------------------------------------
    // 5) Drain the slab block. Freeing the last slot demotes the whole
    //    800-byte block back to ordinary free space.
    // --------------------------------------------------------------------
    heap.deallocate(s1);
    heap.deallocate(s2);
    heap.deallocate(s3);
    println!("\n[5] after draining the slab block:");
    heap.dump();
    heap.dump_lists();

    // --------------------------------------------------------------------
    // 6) A large request outgrows the chunk and extends the region; the
    //    program break moves.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");
    let big = heap.allocate(64 * 1024);
    println!("\n[6] allocate(64 KiB) = {big:?}");
    print_program_break("after large alloc");

    heap.deallocate(big);
    heap.deallocate(c);
    println!("\n[7] everything freed; invariants hold: {}", heap.check());
    heap.dump();
  }
}
