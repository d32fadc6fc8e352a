//! Heap diagnostics: the invariant checker and the heap/list printers.
//!
//! [`Heap::check`] walks the whole heap and all ten segregated lists and
//! verifies the structural invariants the engine maintains between public
//! calls. It returns `false` and reports the first violation on stderr, so
//! it can sit inside `assert!` in tests and inside debug builds of a host.

use crate::block::{Block, Shape};
use crate::heap::Heap;
use crate::region::Region;
use crate::seglist::{CLASS_FLOORS, LIST_COUNT, SMALL_CLASS};
use crate::slab::{OCCUPANCY_MASK, SLOT0_MARKER};
use crate::word::{ALIGNMENT, FLAG_MASK, WSIZE};

/// Free-list nodes visited before the walk is declared cyclic.
const CYCLE_LIMIT: usize = 1_000_000;

impl<R: Region> Heap<R> {
  /// Verifies every structural invariant of the heap.
  ///
  /// Checked per block, in heap order:
  /// - the address keeps payloads on the 16-byte unit and the size is a
  ///   multiple of 16, no smaller than the variant's minimum;
  /// - no two free blocks are adjacent;
  /// - a free block's footer mirrors its header (flag bits only for the
  ///   minimal shape, whose remaining bits are links);
  /// - every block's allocation state matches the successor's `prev_alloc`.
  ///
  /// Checked per list: nodes are free (slab blocks excepted), doubly
  /// linked, sized within their class bounds, and finite. Finally the
  /// number of free blocks found by traversal must equal the number found
  /// through the lists, and every slab block must sit in the small class.
  pub fn check(&self) -> bool {
    let mut heap_frees = 0usize;
    let mut heap_slabs = 0usize;

    unsafe {
      let mut block = Block::from_raw(self.heap_start, self.mode);
      while block.size() != 0 {
        let size = block.size();
        let next = block.next();

        if block.addr() % ALIGNMENT != WSIZE {
          eprintln!("heap check: block {:#x} off the payload alignment", block.addr());
          return false;
        }
        if size % ALIGNMENT != 0 || size < self.mode.min_block_size() {
          eprintln!("heap check: block {:#x} has bad size {}", block.addr(), size);
          return false;
        }

        if block.shape() == Shape::Slab {
          heap_slabs += 1;
        }

        if !block.alloc() {
          heap_frees += 1;

          if !block.prev_alloc() || !next.alloc() {
            eprintln!("heap check: free block {:#x} has a free neighbor", block.addr());
            return false;
          }

          let mirrored = match block.shape() {
            Shape::Minimal => block.footer() & FLAG_MASK == block.header() & FLAG_MASK,
            _ => block.footer() == block.header(),
          };
          if !mirrored {
            eprintln!("heap check: free block {:#x} footer does not mirror header", block.addr());
            return false;
          }
        }

        if block.alloc() != next.prev_alloc() {
          eprintln!(
            "heap check: block {:#x} alloc state not reflected in successor's prev_alloc",
            block.addr()
          );
          return false;
        }

        block = next;
      }

      let mut list_frees = 0usize;
      let mut list_slabs = 0usize;

      for class in 0..LIST_COUNT {
        let mut visited = 0usize;
        let mut cursor = self.lists.head(class);

        while let Some(node) = cursor {
          visited += 1;
          if visited > CYCLE_LIMIT {
            eprintln!("heap check: list {} appears cyclic", class);
            return false;
          }

          match node.shape() {
            Shape::Slab => {
              list_slabs += 1;
              if class != SMALL_CLASS {
                eprintln!("heap check: slab block {:#x} outside the small class", node.addr());
                return false;
              }
              if !node.alloc() {
                eprintln!("heap check: slab block {:#x} not marked allocated", node.addr());
                return false;
              }
              if node.bit_vector() & !OCCUPANCY_MASK != SLOT0_MARKER {
                eprintln!("heap check: slab block {:#x} vector marker corrupted", node.addr());
                return false;
              }
            }
            Shape::Minimal => {
              list_frees += 1;
              if class != SMALL_CLASS {
                eprintln!("heap check: minimal block {:#x} outside the small class", node.addr());
                return false;
              }
              if node.alloc() {
                eprintln!("heap check: allocated block {:#x} in list {}", node.addr(), class);
                return false;
              }
            }
            Shape::Regular => {
              list_frees += 1;
              if node.alloc() {
                eprintln!("heap check: allocated block {:#x} in list {}", node.addr(), class);
                return false;
              }
              let size = node.size();
              let in_class = size >= CLASS_FLOORS[class]
                && (class + 1 == LIST_COUNT || size < CLASS_FLOORS[class + 1]);
              if !in_class {
                eprintln!(
                  "heap check: block {:#x} of size {} filed in class {}",
                  node.addr(),
                  size,
                  class
                );
                return false;
              }
            }
          }

          if let Some(succ) = node.succ() {
            if succ.pred() != Some(node) {
              eprintln!("heap check: list {} not doubly linked at {:#x}", class, node.addr());
              return false;
            }
          }

          cursor = node.succ();
        }
      }

      if list_frees != heap_frees {
        eprintln!(
          "heap check: {} free blocks in the heap but {} in the lists",
          heap_frees, list_frees
        );
        return false;
      }
      if list_slabs != heap_slabs {
        eprintln!(
          "heap check: {} slab blocks in the heap but {} in the small class",
          heap_slabs, list_slabs
        );
        return false;
      }
    }

    true
  }

  /// Prints every block of the heap in address order.
  pub fn dump(&self) {
    println!("HEAP ({:?} variant)", self.mode);

    unsafe {
      let mut block = Block::from_raw(self.heap_start, self.mode);
      let mut count = 1usize;
      while block.size() != 0 {
        let state = if block.alloc() { "alloc" } else { "free " };
        let prev = if block.prev_alloc() { "alloc" } else { "free " };
        print!(
          "  block {:>3} @ {:#x}  size {:>6}  {}  prev {}",
          count,
          block.addr(),
          block.size(),
          state,
          prev
        );
        match block.shape() {
          Shape::Slab => {
            println!("  slab vector {:#014x}", block.bit_vector() & OCCUPANCY_MASK);
          }
          _ if !block.alloc() => {
            println!(
              "  pred {:#x}  succ {:#x}",
              block.pred().map_or(0, Block::addr),
              block.succ().map_or(0, Block::addr)
            );
          }
          _ => println!(),
        }
        block = block.next();
        count += 1;
      }
    }
    println!("END HEAP");
  }

  /// Prints the segregated free lists, one class per line group.
  pub fn dump_lists(&self) {
    println!("SEGREGATED FREE LISTS");

    for class in 0..LIST_COUNT {
      println!("  class {} (floor {})", class, CLASS_FLOORS[class]);

      let mut cursor = self.lists.head(class);
      if cursor.is_none() {
        println!("    empty");
        continue;
      }
      unsafe {
        while let Some(node) = cursor {
          println!("    block @ {:#x}  size {:>6}", node.addr(), node.size());
          cursor = node.succ();
        }
      }
    }
  }
}
