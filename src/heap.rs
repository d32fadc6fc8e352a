//! The heap engine: segregated-fit allocation over a growable region.
//!
//! # How a request flows
//!
//! ```text
//!   allocate(n)
//!        │
//!        ├── n == 0 ──────────────────────────────► null
//!        │
//!        ├── slab variant and n <= 15 ────────────► slab path
//!        │                                          (find slot / seed a
//!        │                                           new slab block)
//!        │
//!        └── round n + header up to 16
//!                 │
//!                 ▼
//!            fit search ── hit ──► place (split or consume) ──► payload
//!                 │
//!               miss
//!                 │
//!                 ▼
//!            extend region, coalesce backward, then place
//!
//!   deallocate(p)
//!        │
//!        ├── null ──► no-op
//!        │
//!        ├── slab slot ──► clear occupancy bit; if the slab block drained,
//!        │                 re-tag it as a free block and fall through
//!        │
//!        └── mark free, coalesce with free neighbors, reinsert
//! ```
//!
//! # Fit policy
//!
//! The search starts in the size class of the rounded request and walks the
//! class list. A block no larger than a small slack above the request is
//! taken immediately; otherwise the smallest sufficient block seen so far is
//! remembered. After 75 sufficient candidates the best one wins. Only when a
//! class yields no candidate at all does the search move up to the next
//! class.
//!
//! # Invariant discipline
//!
//! Between two public calls the heap always satisfies the structural
//! invariants checked by [`Heap::check`]: block sizes are multiples of 16,
//! no two free blocks are adjacent, every successor's `prev_alloc` bit
//! mirrors its predecessor's allocation state, free non-minimal blocks have
//! matching header and footer, and the segregated lists hold exactly the
//! free blocks of the heap.

use std::ptr;

use crate::align;
use crate::block::{Block, SmallMode};
use crate::region::Region;
use crate::seglist::{self, SegLists};
use crate::slab::{self, SLAB_BLOCK_SIZE, SLOT_COUNT, SLOT_PAYLOAD_SIZE, SLOT0_MARKER};
use crate::word::{CHUNK_SIZE, WSIZE, pack};

/// Candidates examined within a class before the best one so far is taken.
const FIT_CANDIDATE_LIMIT: usize = 75;

/// Requests at least this large accept a slightly oversized block as a
/// perfect fit.
const FIT_SLACK_THRESHOLD: usize = 256;

/// Divider for the perfect-fit slack: one twentieth of the request.
const FIT_SLACK_DIVIDER: usize = 20;

/// A dynamic memory allocator over a contiguous, growable region.
///
/// The heap hands out 16-byte aligned payloads carved from blocks it lays
/// out inside the region. Free space is tracked in ten segregated free
/// lists; released blocks coalesce with free neighbors immediately. Small
/// requests are handled by the variant chosen at construction (see
/// [`SmallMode`]).
///
/// The heap is single-threaded by design: it takes `&mut self` everywhere
/// and contains no interior synchronization. A shared global instance is
/// provided by [`crate::LockedHeap`], which serializes access with a mutex.
///
/// # Example
///
/// ```rust
/// use segalloc::{FixedRegion, Heap, SmallMode};
///
/// let mut heap = Heap::new(FixedRegion::new(64 * 1024), SmallMode::Slab)
///   .expect("arena large enough for the initial chunk");
///
/// unsafe {
///   let p = heap.allocate(100);
///   assert!(!p.is_null());
///   assert_eq!(p as usize % 16, 0);
///   heap.deallocate(p);
/// }
/// ```
pub struct Heap<R: Region> {
  pub(crate) region: R,
  pub(crate) mode: SmallMode,
  pub(crate) lists: SegLists,
  /// Address of the first real block, one word past the region base. The
  /// prologue footer sits immediately below it.
  pub(crate) heap_start: *mut u8,
}

impl<R: Region> Heap<R> {
  /// Creates a heap inside `region` and seeds it with one free chunk.
  ///
  /// Writes the prologue footer and epilogue header sentinels at the region
  /// base, then extends the heap by the initial chunk of 4096 bytes.
  /// Returns `None` if the region cannot supply the initial memory.
  pub fn new(
    region: R,
    mode: SmallMode,
  ) -> Option<Self> {
    let mut region = region;
    let base = region.grow(2 * WSIZE)?.as_ptr();
    debug_assert_eq!(base as usize % crate::word::ALIGNMENT, 0);

    unsafe {
      // Prologue footer and epilogue header: zero-size allocated sentinels
      // that terminate backward and forward traversal.
      base.cast::<u64>().write(pack(0, true, true, false));
      base.add(WSIZE).cast::<u64>().write(pack(0, true, true, false));
    }

    let mut heap = Self {
      region,
      mode,
      lists: SegLists::new(),
      heap_start: unsafe { base.add(WSIZE) },
    };
    unsafe { heap.extend(CHUNK_SIZE)? };
    Some(heap)
  }

  /// The small-request variant this heap runs under.
  pub fn mode(&self) -> SmallMode {
    self.mode
  }

  /// Allocates at least `size` writable bytes, 16-byte aligned.
  ///
  /// Returns null if `size` is zero or the region provider is exhausted; in
  /// either case the heap is left untouched.
  ///
  /// # Safety
  /// The caller must treat the returned pointer as owning exactly this
  /// allocation: no use after [`deallocate`](Heap::deallocate), no
  /// double free.
  pub unsafe fn allocate(&mut self, size: usize) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    if self.mode == SmallMode::Slab && size <= SLOT_PAYLOAD_SIZE {
      return unsafe { self.place_in_slab() };
    }

    let asize = align!(size + WSIZE);

    let block = match unsafe { self.find_fit(asize) } {
      Some(block) => block,
      None => match unsafe { self.extend(asize.max(CHUNK_SIZE)) } {
        Some(block) => block,
        None => return ptr::null_mut(),
      },
    };

    unsafe {
      self.place(block, asize);
      block.payload()
    }
  }

  /// Releases an allocation. No-op on null. Never fails.
  ///
  /// The freed block coalesces with free heap neighbors immediately. A slab
  /// slot only clears its occupancy bit; draining the last slot of a slab
  /// block releases the whole 800-byte block back to the heap.
  ///
  /// # Safety
  /// `ptr` must be null or a live pointer previously returned by this
  /// heap's allocating methods.
  pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
    if ptr.is_null() {
      return;
    }

    let block;
    if self.mode == SmallMode::Slab && unsafe { slab::is_slot(ptr) } {
      let slab_block = unsafe { slab::slot_block(ptr, self.mode) };
      unsafe {
        slab_block.set_slot_used(slab::slot_index(ptr), false);
        if !slab_block.slab_empty() {
          return;
        }
        // Drained: demote the slab block to an ordinary free block and let
        // it coalesce like any other release.
        self.lists.remove(slab_block);
        let prev_alloc = slab_block.prev_alloc();
        slab_block.set_special(false);
        slab_block.write_header(SLAB_BLOCK_SIZE, false, prev_alloc);
        slab_block.write_footer(SLAB_BLOCK_SIZE, false, prev_alloc);
        slab_block.set_pred(None);
        slab_block.set_succ(None);
      }
      block = slab_block;
    } else {
      block = unsafe { Block::from_payload(ptr, self.mode) };
    }

    unsafe {
      let merged = self.coalesce(block);
      update_next_prev_alloc(merged, false);
    }
  }

  /// Resizes an allocation, moving it if needed.
  ///
  /// Equivalent to [`deallocate`](Heap::deallocate) when `size` is zero and
  /// to [`allocate`](Heap::allocate) when `ptr` is null. Otherwise the
  /// contents are copied up to the smaller of `size` and the old payload
  /// size. On allocation failure the original block is left untouched and
  /// null is returned.
  ///
  /// # Safety
  /// Same contract as [`deallocate`](Heap::deallocate) for `ptr`.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      unsafe { self.deallocate(ptr) };
      return ptr::null_mut();
    }
    if ptr.is_null() {
      return unsafe { self.allocate(size) };
    }

    let old_payload = if self.mode == SmallMode::Slab && unsafe { slab::is_slot(ptr) } {
      SLOT_PAYLOAD_SIZE
    } else {
      unsafe { Block::from_payload(ptr, self.mode).payload_size() }
    };

    let new = unsafe { self.allocate(size) };
    if new.is_null() {
      return ptr::null_mut();
    }

    unsafe {
      ptr::copy_nonoverlapping(ptr, new, size.min(old_payload));
      self.deallocate(ptr);
    }
    new
  }

  /// Allocates `count * size` zeroed bytes.
  ///
  /// Returns null on multiplicative overflow without touching the region
  /// provider, and null for a zero-sized product.
  ///
  /// # Safety
  /// Same contract as [`allocate`](Heap::allocate).
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let total = match count.checked_mul(size) {
      Some(total) => total,
      None => return ptr::null_mut(),
    };

    let ptr = unsafe { self.allocate(total) };
    if !ptr.is_null() {
      unsafe { ptr.write_bytes(0, total) };
    }
    ptr
  }

  /// Grows the region and turns the new span into a free block.
  ///
  /// The new block starts where the old epilogue header stood and inherits
  /// the `prev_alloc` bit recorded there; a fresh epilogue is written just
  /// past it. The block then coalesces with a free old tail, so the
  /// returned block is at least `size` bytes.
  unsafe fn extend(&mut self, size: usize) -> Option<Block> {
    let size = align!(size);
    let span = self.region.grow(size)?;

    unsafe {
      let block = Block::from_payload(span.as_ptr(), self.mode);
      let prev_alloc = block.prev_alloc();
      block.set_special(false);
      block.write_header(size, false, prev_alloc);
      block.write_footer(size, false, prev_alloc);

      // The bytes past the new block are fresh; clear the special bit
      // before the header write so no stale bit can stick.
      let epilogue = block.next();
      epilogue.set_special(false);
      epilogue.write_header(0, true, false);

      Some(self.coalesce(block))
    }
  }

  /// N-bounded best-fit search through the segregated lists.
  unsafe fn find_fit(&mut self, asize: usize) -> Option<Block> {
    let slab_request = self.mode == SmallMode::Slab && asize == SLAB_BLOCK_SIZE;
    let min_block = self.mode.min_block_size();

    // Accepting a block slightly above the request ends the scan early; in
    // exchange a few bytes per placement go unused.
    let perfect = if asize >= FIT_SLACK_THRESHOLD && !slab_request {
      asize + align!(asize / FIT_SLACK_DIVIDER)
    } else {
      asize
    };

    let mut found = 0usize;
    let mut best: Option<Block> = None;
    let mut best_size = usize::MAX;

    for class in seglist::class_index(asize)..seglist::LIST_COUNT {
      let mut cursor = self.lists.head(class);
      while let Some(block) = cursor {
        cursor = unsafe { block.succ() };
        let block_size = unsafe { block.size() };

        if asize <= block_size {
          found += 1;
          if block_size <= perfect {
            return Some(block);
          }
          // A slab block seed must not strand a sliver too small to be a
          // block of its own.
          let remainder = block_size - asize;
          let strands_sliver = slab_request && remainder != 0 && remainder < min_block;
          if !strands_sliver && block_size < best_size {
            best = Some(block);
            best_size = block_size;
          }
        }

        if found >= FIT_CANDIDATE_LIMIT {
          return best;
        }
      }

      // A class that produced any candidate is good enough; higher classes
      // would only add external fragmentation.
      if found > 0 {
        break;
      }
    }

    best
  }

  /// Carves `asize` bytes out of a free block.
  ///
  /// Splits when the remainder can stand as a block of its own, otherwise
  /// consumes the block whole. Keeps the successor's `prev_alloc` in step.
  unsafe fn place(
    &mut self,
    block: Block,
    asize: usize,
  ) {
    let csize = unsafe { block.size() };
    let prev_alloc = unsafe { block.prev_alloc() };

    if csize - asize >= self.mode.min_block_size() {
      unsafe {
        self.lists.remove(block);
        block.write_header(asize, true, prev_alloc);

        let tail = block.next();
        tail.set_special(false);
        tail.write_header(csize - asize, false, true);
        tail.write_footer(csize - asize, false, true);
        update_next_prev_alloc(tail, false);
        self.lists.insert(tail);
      }
    } else {
      unsafe {
        self.lists.remove(block);
        block.write_header(csize, true, prev_alloc);
        update_next_prev_alloc(block, true);
      }
    }
  }

  /// Merges a block being freed with its free heap neighbors and inserts
  /// the result into its list. Returns the merged block.
  ///
  /// The caller is responsible for clearing the new successor's
  /// `prev_alloc` bit afterwards.
  unsafe fn coalesce(&mut self, block: Block) -> Block {
    let next = unsafe { block.next() };
    let mut size = unsafe { block.size() };

    let prev_alloc = unsafe { block.prev_alloc() };
    let next_alloc = unsafe { next.alloc() };

    if prev_alloc && next_alloc {
      unsafe {
        block.write_header(size, false, prev_alloc);
        block.write_footer(size, false, prev_alloc);
        self.lists.insert(block);
      }
      return block;
    }

    if prev_alloc && !next_alloc {
      unsafe {
        size += next.size();
        self.lists.remove(next);
        block.write_header(size, false, prev_alloc);
        block.write_footer(size, false, prev_alloc);
        self.lists.insert(block);
      }
      return block;
    }

    let prev = unsafe { block.prev() };
    // The block before a free block is always allocated, so the merged
    // block's own prev_alloc bit is set.
    let prev_prev_alloc = true;
    size += unsafe { prev.size() };

    if !next_alloc {
      unsafe {
        size += next.size();
        self.lists.remove(next);
      }
    }

    unsafe {
      self.lists.remove(prev);
      prev.write_header(size, false, prev_prev_alloc);
      prev.write_footer(size, false, prev_prev_alloc);
      self.lists.insert(prev);
    }
    prev
  }

  /// Hands out one slot from a slab block, seeding a fresh slab block if
  /// none has room.
  unsafe fn place_in_slab(&mut self) -> *mut u8 {
    let slab_block = match unsafe { self.find_fit_slab() } {
      Some(block) => block,
      None => match unsafe { self.init_slab_block() } {
        Some(block) => block,
        None => return ptr::null_mut(),
      },
    };

    unsafe {
      let index = slab_block.first_free_slot();
      slab_block.set_slot_used(index, true);
      slab_block.slot_at(index)
    }
  }

  /// First slab block with a free slot, if any.
  unsafe fn find_fit_slab(&mut self) -> Option<Block> {
    let mut cursor = self.lists.head(seglist::SMALL_CLASS);
    while let Some(block) = cursor {
      if !unsafe { block.slab_full() } {
        return Some(block);
      }
      cursor = unsafe { block.succ() };
    }
    None
  }

  /// Converts one 800-byte block into a slab block: tags it, seeds the
  /// occupancy vector, writes every slot's mini-header, and files it in the
  /// small class.
  unsafe fn init_slab_block(&mut self) -> Option<Block> {
    let block = match unsafe { self.find_fit(SLAB_BLOCK_SIZE) } {
      Some(block) => block,
      None => unsafe { self.extend(SLAB_BLOCK_SIZE)? },
    };

    unsafe {
      let block_size = block.size();
      self.lists.remove(block);
      // A block straight off a free list always has an allocated
      // predecessor, so prev_alloc is set unconditionally.
      block.write_header(0, true, true);
      block.set_special(true);

      if block_size != SLAB_BLOCK_SIZE {
        // The fit search rejects blocks whose remainder could not stand
        // alone, so this split is always valid.
        let tail = block.next();
        tail.set_special(false);
        tail.write_header(block_size - SLAB_BLOCK_SIZE, false, true);
        tail.write_footer(block_size - SLAB_BLOCK_SIZE, false, true);
        update_next_prev_alloc(tail, false);
        self.lists.insert(tail);
      } else {
        update_next_prev_alloc(block, true);
      }

      block.set_bit_vector(SLOT0_MARKER);
      for index in 1..SLOT_COUNT {
        block.write_slot_marker(index);
      }

      self.lists.insert(block);
      Some(block)
    }
  }
}

/// Rewrites the header of the block after `block` with a new `prev_alloc`
/// bit, leaving its other fields alone.
unsafe fn update_next_prev_alloc(
  block: Block,
  prev_alloc: bool,
) {
  unsafe {
    let next = block.next();
    next.write_header(next.size(), next.alloc(), prev_alloc);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::region::FixedRegion;
  use std::ptr::NonNull;

  fn heap(mode: SmallMode) -> Heap<FixedRegion> {
    Heap::new(FixedRegion::new(1 << 20), mode).expect("heap init")
  }

  /// All free blocks found by plain heap traversal, as (address, size).
  fn free_blocks<R: Region>(heap: &Heap<R>) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    unsafe {
      let mut block = Block::from_raw(heap.heap_start, heap.mode);
      while block.size() != 0 {
        if !block.alloc() {
          out.push((block.addr(), block.size()));
        }
        block = block.next();
      }
    }
    out
  }

  #[test]
  fn zero_sized_request_returns_null() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      assert!(heap.allocate(0).is_null());
      assert!(heap.check());
    }
  }

  #[test]
  fn deallocate_null_is_a_noop() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      heap.deallocate(ptr::null_mut());
      assert!(heap.check());
    }
  }

  #[test]
  fn split_places_blocks_back_to_back() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p1 = heap.allocate(24);
      let p2 = heap.allocate(24);
      assert!(!p1.is_null() && !p2.is_null());
      // 24 bytes plus the header word round up to one 32-byte block.
      assert_eq!(p2 as usize - p1 as usize, 32);
      assert!(heap.check());
    }
  }

  #[test]
  fn returned_payloads_are_aligned() {
    for mode in [SmallMode::Slab, SmallMode::Minimal] {
      let mut heap = heap(mode);
      unsafe {
        for size in [1usize, 2, 8, 13, 15, 16, 24, 100, 255, 1000, 5000] {
          let p = heap.allocate(size);
          assert!(!p.is_null());
          assert_eq!(p as usize % 16, 0, "size {size} misaligned");
        }
        assert!(heap.check());
      }
    }
  }

  #[test]
  fn freeing_in_any_order_collapses_the_heap() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p1 = heap.allocate(24);
      let p2 = heap.allocate(24);
      let p3 = heap.allocate(24);

      heap.deallocate(p1);
      heap.deallocate(p3);
      heap.deallocate(p2);

      // Outer frees first, middle last: all four cases of the coalescer
      // fire and the heap ends as one free block of the initial chunk.
      let frees = free_blocks(&heap);
      assert_eq!(frees.len(), 1);
      assert_eq!(frees[0].1, CHUNK_SIZE);

      let block = Block::from_raw(frees[0].0 as *mut u8, heap.mode);
      assert_eq!(heap.lists.head(seglist::class_index(CHUNK_SIZE)), Some(block));
      assert!(heap.check());
    }
  }

  #[test]
  fn minimal_blocks_use_the_special_shape() {
    let mut heap = heap(SmallMode::Minimal);
    unsafe {
      let p1 = heap.allocate(8);
      let guard = heap.allocate(8);

      let block = Block::from_payload(p1, SmallMode::Minimal);
      assert!(block.is_special());
      assert!(block.alloc());
      assert_eq!(block.size(), 16);

      heap.deallocate(p1);
      // The freed 16-byte block keeps its neighbors allocated, so it stays
      // minimal and heads the small class with links packed in its own
      // two words.
      assert_eq!(heap.lists.head(seglist::SMALL_CLASS), Some(block));
      assert_eq!(block.pred(), None);
      assert_eq!(block.succ(), None);
      assert!(heap.check());

      heap.deallocate(guard);
      assert!(heap.check());
    }
  }

  #[test]
  fn minimal_free_list_chains_through_packed_links() {
    let mut heap = heap(SmallMode::Minimal);
    unsafe {
      let a = heap.allocate(8);
      let _guard1 = heap.allocate(8);
      let b = heap.allocate(8);
      let _guard2 = heap.allocate(8);

      heap.deallocate(a);
      heap.deallocate(b);

      let block_a = Block::from_payload(a, SmallMode::Minimal);
      let block_b = Block::from_payload(b, SmallMode::Minimal);
      assert_eq!(heap.lists.head(seglist::SMALL_CLASS), Some(block_b));
      assert_eq!(block_b.succ(), Some(block_a));
      assert_eq!(block_a.pred(), Some(block_b));
      assert!(heap.check());

      // Reuse comes off the head of the list.
      let c = heap.allocate(8);
      assert_eq!(c, b);
      assert!(heap.check());
    }
  }

  #[test]
  fn slab_block_serves_48_slots_before_a_second_one() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let mut slots = Vec::new();
      for _ in 0..SLOT_COUNT {
        let p = heap.allocate(12);
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        slots.push(p);
      }

      let owner = slab::slot_block(slots[0], SmallMode::Slab);
      for &p in &slots {
        assert_eq!(slab::slot_block(p, SmallMode::Slab), owner);
      }
      assert!(owner.slab_full());

      // The 49th tiny request must come from a different slab block.
      let extra = heap.allocate(12);
      assert!(!extra.is_null());
      assert_ne!(slab::slot_block(extra, SmallMode::Slab), owner);
      assert!(heap.check());
    }
  }

  #[test]
  fn freed_slot_is_reused_before_new_ones() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let a = heap.allocate(10);
      let _b = heap.allocate(10);
      heap.deallocate(a);

      // The lowest clear occupancy bit is slot 0 again.
      let c = heap.allocate(10);
      assert_eq!(c, a);
      assert!(heap.check());
    }
  }

  #[test]
  fn draining_a_slab_block_returns_it_to_the_heap() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.allocate(12);
      heap.deallocate(p);

      // The slab block drained, degraded to a free block and coalesced
      // back into the single initial chunk.
      let frees = free_blocks(&heap);
      assert_eq!(frees.len(), 1);
      assert_eq!(frees[0].1, CHUNK_SIZE);
      assert!(heap.check());

      // Its bytes are available again for one large allocation.
      let big = heap.allocate(4000);
      assert!(!big.is_null());
      assert!(heap.check());
    }
  }

  #[test]
  fn slab_payloads_do_not_overlap() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let mut slots = Vec::new();
      for i in 0..SLOT_COUNT {
        let p = heap.allocate(15);
        p.write_bytes(i as u8, 15);
        slots.push(p);
      }
      for (i, &p) in slots.iter().enumerate() {
        for off in 0..15 {
          assert_eq!(p.add(off).read(), i as u8);
        }
      }
      assert!(heap.check());
    }
  }

  #[test]
  fn reallocate_grows_and_preserves_contents() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.allocate(32);
      for i in 0..32u8 {
        p.add(i as usize).write(i);
      }

      let q = heap.reallocate(p, 128);
      assert!(!q.is_null());
      for i in 0..32u8 {
        assert_eq!(q.add(i as usize).read(), i);
      }
      assert!(heap.check());
    }
  }

  #[test]
  fn reallocate_shrinks_and_preserves_prefix() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.allocate(64);
      for i in 0..64u8 {
        p.add(i as usize).write(i);
      }

      let q = heap.reallocate(p, 16);
      assert!(!q.is_null());
      for i in 0..16u8 {
        assert_eq!(q.add(i as usize).read(), i);
      }
      assert!(heap.check());
    }
  }

  #[test]
  fn reallocate_handles_null_and_zero() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.reallocate(ptr::null_mut(), 40);
      assert!(!p.is_null());

      assert!(heap.reallocate(p, 0).is_null());
      // The block was freed: the heap is a single free chunk again.
      assert_eq!(free_blocks(&heap).len(), 1);
      assert!(heap.check());
    }
  }

  #[test]
  fn reallocate_moves_slab_slots_to_regular_blocks() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.allocate(10);
      for i in 0..10u8 {
        p.add(i as usize).write(0xC0 | i);
      }

      let q = heap.reallocate(p, 200);
      assert!(!q.is_null());
      assert!(!slab::is_slot(q));
      for i in 0..10u8 {
        assert_eq!(q.add(i as usize).read(), 0xC0 | i);
      }
      assert!(heap.check());
    }
  }

  #[test]
  fn zeroed_allocation_is_all_zero_even_on_reuse() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let p = heap.allocate(64);
      p.write_bytes(0xAA, 64);
      heap.deallocate(p);

      let q = heap.allocate_zeroed(4, 16);
      assert!(!q.is_null());
      for off in 0..64 {
        assert_eq!(q.add(off).read(), 0, "byte {off} not zeroed");
      }
      assert!(heap.check());
    }
  }

  /// Region wrapper that counts grow calls, for asserting a path never
  /// reaches the provider.
  struct CountingRegion {
    inner: FixedRegion,
    grows: usize,
  }

  impl Region for CountingRegion {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
      self.grows += 1;
      self.inner.grow(len)
    }
  }

  #[test]
  fn overflowing_zeroed_allocation_never_grows_the_region() {
    let region = CountingRegion { inner: FixedRegion::new(1 << 16), grows: 0 };
    let mut heap = Heap::new(region, SmallMode::Slab).expect("heap init");
    let grows_before = heap.region.grows;

    unsafe {
      let p = heap.allocate_zeroed(1 << 40, 1 << 40);
      assert!(p.is_null());
    }
    assert_eq!(heap.region.grows, grows_before);
    assert!(heap.check());
  }

  #[test]
  fn exhaustion_fails_cleanly_and_leaves_the_heap_usable() {
    // Exactly the sentinels plus the initial chunk fit; nothing more.
    let mut heap =
      Heap::new(FixedRegion::new(2 * WSIZE + CHUNK_SIZE), SmallMode::Slab).expect("heap init");

    unsafe {
      let too_big = heap.allocate(8192);
      assert!(too_big.is_null());
      assert!(heap.check());

      let fits = heap.allocate(1000);
      assert!(!fits.is_null());
      assert!(heap.check());
    }
  }

  #[test]
  fn freed_blocks_are_reused_lifo_within_a_class() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      let _x = heap.allocate(24);
      let y = heap.allocate(24);
      let _z = heap.allocate(24);
      let w = heap.allocate(24);
      let _guard = heap.allocate(24);

      // y and w are non-adjacent 32-byte blocks; both stay unmerged.
      heap.deallocate(y);
      heap.deallocate(w);

      // w went in last, so it comes out first.
      assert_eq!(heap.allocate(24), w);
      assert_eq!(heap.allocate(24), y);
      assert!(heap.check());
    }
  }

  #[test]
  fn extension_coalesces_with_a_free_tail() {
    let mut heap = heap(SmallMode::Slab);
    unsafe {
      // One block pins the front; the rest of the chunk stays free.
      let _pin = heap.allocate(24);

      // Larger than the free tail: the heap extends, and the new span must
      // merge with the old free tail instead of leaving two free blocks.
      let big = heap.allocate(6000);
      assert!(!big.is_null());
      assert!(heap.check());

      let frees = free_blocks(&heap);
      assert!(frees.len() <= 1);
    }
  }

  struct Lcg(u64);

  impl Lcg {
    fn next(&mut self) -> u64 {
      self.0 = self
        .0
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
      self.0 >> 33
    }
  }

  #[test]
  fn mixed_workload_preserves_invariants_and_contents() {
    for mode in [SmallMode::Slab, SmallMode::Minimal] {
      let mut heap = Heap::new(FixedRegion::new(1 << 24), mode).expect("heap init");
      let mut rng = Lcg(0x9E37_79B9_7F4A_7C15);
      let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();

      for step in 0..4000usize {
        let grow = live.len() < 8 || rng.next() % 100 < 55;
        if grow {
          let size = 1 + (rng.next() as usize) % 600;
          let fill = (step as u8).wrapping_mul(31).wrapping_add(7);
          let p = unsafe { heap.allocate(size) };
          assert!(!p.is_null(), "mode {mode:?} step {step} size {size}");
          unsafe { p.write_bytes(fill, size) };
          live.push((p, size, fill));
        } else {
          let index = (rng.next() as usize) % live.len();
          let (p, size, fill) = live.swap_remove(index);
          unsafe {
            for off in 0..size {
              assert_eq!(p.add(off).read(), fill, "mode {mode:?} corrupted at {off}");
            }
            heap.deallocate(p);
          }
        }

        if step % 256 == 0 {
          assert!(heap.check(), "mode {mode:?} invariants broken at step {step}");
        }
      }

      for (p, size, fill) in live.drain(..) {
        unsafe {
          for off in 0..size {
            assert_eq!(p.add(off).read(), fill);
          }
          heap.deallocate(p);
        }
      }

      assert!(heap.check());
      assert_eq!(free_blocks(&heap).len(), 1, "mode {mode:?} did not fully coalesce");
    }
  }
}
