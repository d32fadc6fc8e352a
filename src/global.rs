//! A global, lock-protected heap for hosts that want the classic
//! four-function allocation surface or a Rust [`GlobalAlloc`].
//!
//! The heap engine itself is single-threaded; this wrapper is the one
//! mutual-exclusion region around it. The inner heap is created lazily on
//! the first allocation, so a `LockedHeap` can be a `static` initialized in
//! a `const` context:
//!
//! ```rust,ignore
//! #[global_allocator]
//! static ALLOCATOR: segalloc::LockedHeap = segalloc::LockedHeap::new(segalloc::SmallMode::Slab);
//! ```
//!
//! Payloads are 16-byte aligned and never more: layouts requesting a larger
//! alignment fail the allocation, because a payload pointer shifted for
//! extra alignment could not be mapped back to its block on deallocation.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use crate::block::SmallMode;
use crate::heap::Heap;
use crate::region::SbrkRegion;
use crate::word::ALIGNMENT;

/// A lazily initialized [`Heap`] over the program break, behind a spin
/// mutex.
pub struct LockedHeap {
  inner: spin::Mutex<Option<Heap<SbrkRegion>>>,
  mode: SmallMode,
}

// SAFETY: all heap state sits behind the mutex, so `Heap<SbrkRegion>`'s raw
// pointers are never accessed without exclusion even though they are not
// themselves `Send`.
unsafe impl Sync for LockedHeap {}

impl LockedHeap {
  /// Creates the wrapper without touching the program break; the heap is
  /// built on first use.
  pub const fn new(mode: SmallMode) -> Self {
    Self {
      inner: spin::Mutex::new(None),
      mode,
    }
  }

  /// Runs `f` with the locked heap, initializing it first if needed.
  /// Returns `None` if the heap cannot obtain its initial memory.
  fn with_heap<T>(
    &self,
    f: impl FnOnce(&mut Heap<SbrkRegion>) -> T,
  ) -> Option<T> {
    let mut guard = self.inner.lock();
    if guard.is_none() {
      *guard = Some(Heap::new(SbrkRegion::new(), self.mode)?);
    }
    let heap = guard.as_mut()?;
    Some(f(heap))
  }
}

// SAFETY: all heap state sits behind the mutex; the engine runs one call at
// a time exactly as its single-threaded model requires. The returned
// pointers satisfy any layout alignment up to 16; larger requests are
// refused with null rather than served misaligned.
unsafe impl GlobalAlloc for LockedHeap {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    self
      .with_heap(|heap| unsafe { heap.allocate(layout.size()) })
      .unwrap_or(ptr::null_mut())
  }

  unsafe fn dealloc(
    &self,
    ptr: *mut u8,
    _layout: Layout,
  ) {
    // A pointer can only exist once the heap does; if it does not, there
    // is nothing to free.
    let mut guard = self.inner.lock();
    if let Some(heap) = guard.as_mut() {
      unsafe { heap.deallocate(ptr) };
    }
  }

  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    if layout.align() > ALIGNMENT {
      return ptr::null_mut();
    }
    self
      .with_heap(|heap| unsafe { heap.allocate_zeroed(layout.size(), 1) })
      .unwrap_or(ptr::null_mut())
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
    self
      .with_heap(|heap| unsafe { heap.reallocate(ptr, new_size) })
      .unwrap_or(ptr::null_mut())
  }
}
