//! Size classes and segregated free lists.
//!
//! Free blocks are kept in ten doubly linked LIFO lists keyed by size
//! class. Class 0 is reserved for the small shapes (16-byte minimal blocks,
//! or slab blocks); classes 1 through 9 cover geometric ranges, with class 9
//! unbounded above:
//!
//! ```text
//!   class  0      1     2     3      4      5      6       7       8       9
//!   floor  16     32    64    128    256    512    1024    2048    4096    8192
//! ```
//!
//! The class of a size is `floor(log2(size)) - 4`, computed from the
//! leading-zero count of the size and clamped to the table.

use crate::block::{Block, Shape};

pub(crate) const LIST_COUNT: usize = 10;

/// Index of the list that holds the small shapes.
pub(crate) const SMALL_CLASS: usize = 0;

/// Lower size bound of each class. Used by the invariant checker and the
/// list printer.
pub(crate) const CLASS_FLOORS: [usize; LIST_COUNT] =
  [16, 32, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

const LAST_CLASS: usize = LIST_COUNT - 1;
const LOG2_MIN_BLOCK: u32 = 4;

/// Maps a block size (a multiple of 16, at least 16) to its class index.
pub(crate) fn class_index(size: usize) -> usize {
  debug_assert!(size >= CLASS_FLOORS[0]);
  let log2 = u64::BITS - 1 - (size as u64).leading_zeros();
  let index = log2.saturating_sub(LOG2_MIN_BLOCK) as usize;
  index.min(LAST_CLASS)
}

/// The ten segregated free-list heads.
pub(crate) struct SegLists {
  heads: [Option<Block>; LIST_COUNT],
}

impl SegLists {
  pub(crate) fn new() -> Self {
    Self { heads: [None; LIST_COUNT] }
  }

  pub(crate) fn head(&self, class: usize) -> Option<Block> {
    self.heads[class]
  }

  /// The list a block belongs to. Slab blocks always go to the small
  /// class regardless of their 800-byte footprint.
  unsafe fn class_of(block: Block) -> usize {
    match unsafe { block.shape() } {
      Shape::Minimal | Shape::Slab => SMALL_CLASS,
      Shape::Regular => class_index(unsafe { block.size() }),
    }
  }

  /// Pushes a free block onto the head of its class list.
  ///
  /// # Safety
  /// The block's header (and, for shapes that use it, footer) must already
  /// describe its final size and shape, and the block must not currently be
  /// in any list.
  pub(crate) unsafe fn insert(&mut self, block: Block) {
    let class = unsafe { Self::class_of(block) };
    let head = self.heads[class];

    unsafe {
      block.set_pred(None);
      block.set_succ(head);
      if let Some(head) = head {
        head.set_pred(Some(block));
      }
    }
    self.heads[class] = Some(block);
  }

  /// Unlinks a block from its class list.
  ///
  /// # Safety
  /// The block must currently be in the list its header says it belongs to.
  pub(crate) unsafe fn remove(&mut self, block: Block) {
    let class = unsafe { Self::class_of(block) };
    let pred = unsafe { block.pred() };
    let succ = unsafe { block.succ() };

    match pred {
      Some(pred) => unsafe { pred.set_succ(succ) },
      None => self.heads[class] = succ,
    }
    if let Some(succ) = succ {
      unsafe { succ.set_pred(pred) };
    }
  }
}
