//! Region providers: the growable byte span a heap lives in.
//!
//! The heap engine never talks to the operating system directly. It asks a
//! [`Region`] for more bytes and lays blocks out inside whatever span comes
//! back. Two providers are included:
//!
//! - [`SbrkRegion`] extends the program's data segment with `sbrk(2)`, the
//!   classic way a malloc obtains memory.
//! - [`FixedRegion`] simulates the same interface on top of one
//!   heap-allocated arena, which keeps tests hermetic and repeatable.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use libc::{c_void, intptr_t, sbrk};

use crate::align;
use crate::word::ALIGNMENT;

/// A monotonically growing, contiguous byte span.
///
/// Successive calls to [`grow`](Region::grow) return spans that concatenate:
/// the span returned by one call ends exactly where the span returned by the
/// next call begins.
pub trait Region {
  /// Grows the region by `len` bytes and returns the start of the new span,
  /// or `None` when no more memory can be obtained.
  ///
  /// `len` is always a positive multiple of 16. The very first span handed
  /// out must be 16-byte aligned; the heap's block layout depends on it.
  fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// Region provider backed by the program break.
///
/// Construction rounds the current break up to the 16-byte alignment unit
/// once, so that every span handed to the heap starts aligned.
pub struct SbrkRegion(());

impl SbrkRegion {
  pub fn new() -> Self {
    unsafe {
      let brk = sbrk(0) as usize;
      let pad = brk.next_multiple_of(ALIGNMENT) - brk;
      if pad != 0 {
        sbrk(pad as intptr_t);
      }
    }
    Self(())
  }
}

impl Region for SbrkRegion {
  fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
    // sbrk returns the old program break, i.e. the start of the new span,
    // or (void*)-1 on failure.
    let raw = unsafe { sbrk(len as intptr_t) };
    if raw == usize::MAX as *mut c_void {
      return None;
    }
    NonNull::new(raw.cast::<u8>())
  }
}

/// Region provider backed by a single pre-allocated arena.
///
/// `grow` hands out consecutive slices of the arena until the capacity is
/// exhausted, after which it fails like a region provider that ran out of
/// memory. Dropping the region releases the arena.
pub struct FixedRegion {
  base: NonNull<u8>,
  layout: Layout,
  brk: usize,
}

impl FixedRegion {
  /// Creates an arena of (at least) `capacity` bytes.
  ///
  /// # Panics
  /// Panics if `capacity` rounded up to 16 overflows `isize`.
  pub fn new(capacity: usize) -> Self {
    let capacity = align!(capacity.max(ALIGNMENT));
    let layout = Layout::from_size_align(capacity, ALIGNMENT).expect("arena capacity overflows");
    let raw = unsafe { alloc::alloc(layout) };
    let base = match NonNull::new(raw) {
      Some(base) => base,
      None => alloc::handle_alloc_error(layout),
    };
    Self { base, layout, brk: 0 }
  }

  /// Total bytes the arena can hand out.
  pub fn capacity(&self) -> usize {
    self.layout.size()
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }
}

impl Region for FixedRegion {
  fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
    if len > self.layout.size() - self.brk {
      return None;
    }
    let span = unsafe { self.base.add(self.brk) };
    self.brk += len;
    Some(span)
  }
}

impl Drop for FixedRegion {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn fixed_region_spans_concatenate() {
    let mut region = FixedRegion::new(256);

    let a = region.grow(64).unwrap();
    let b = region.grow(32).unwrap();
    let c = region.grow(160).unwrap();

    assert_eq!(a.as_ptr() as usize % ALIGNMENT, 0);
    assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 64);
    assert_eq!(c.as_ptr() as usize, b.as_ptr() as usize + 32);
    assert_eq!(region.used(), 256);
  }

  #[test]
  fn fixed_region_fails_past_capacity() {
    let mut region = FixedRegion::new(64);

    assert!(region.grow(64).is_some());
    assert!(region.grow(16).is_none());
    // A failed grow must not consume capacity bookkeeping.
    assert_eq!(region.used(), 64);
  }

  #[test]
  fn fixed_region_rounds_capacity_up() {
    let region = FixedRegion::new(1);
    assert_eq!(region.capacity(), ALIGNMENT);
  }

  // SbrkRegion moves the process-wide program break, which other test
  // threads must not race; it is exercised through the locked global
  // allocator tests and the demo binary instead.
}
