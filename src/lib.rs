//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate implements a general-purpose dynamic memory allocator that
//! serves allocate / free / resize / zero-allocate requests out of one
//! contiguous, growable byte region, the way a classic `malloc` sits on top
//! of `sbrk`.
//!
//! ## Overview
//!
//! ```text
//!   Heap region (grows upward →)
//!
//!   ┌────┬────┬──────────────┬─────────┬──────────────┬───────────────┬────┐
//!   │PF  │EH→ │ alloc        │ free    │ alloc        │ free          │ EH │
//!   └────┴────┴──────────────┴─────────┴──────────────┴───────────────┴────┘
//!    ▲          ▲              ▲                         ▲               ▲
//!    │          │              │                         │               │
//!    │      first block     payloads are             free blocks     epilogue
//!    │                      16-byte aligned          live in ten     header
//!    prologue footer                                 segregated      (moves as
//!                                                    free lists      the region
//!                                                                    grows)
//! ```
//!
//! Every block carries a one-word header packing its size and three flag
//! bits; free blocks additionally carry a mirrored footer and intrusive
//! free-list links. Released blocks coalesce with free neighbors
//! immediately, so no two free blocks are ever adjacent. Allocation runs an
//! N-bounded best-fit search over the segregated lists and splits the
//! chosen block when the remainder can stand on its own.
//!
//! Two alternative strategies squeeze the smallest requests, selected per
//! heap with [`SmallMode`]:
//!
//! - **Slab** ([`SmallMode::Slab`]): requests of at most 15 bytes are
//!   served from 800-byte slab blocks subdivided into 48 slots of 16 bytes,
//!   tracked by a 48-bit occupancy vector. A drained slab block returns to
//!   the heap as ordinary free space.
//! - **Minimal** ([`SmallMode::Minimal`]): blocks can shrink to 16 bytes;
//!   such a block packs its free-list links into the unused bits of its own
//!   header and footer words.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── word       - Bit-packed metadata word codec
//!   ├── block      - Block layout, traversal, and shapes (internal)
//!   ├── seglist    - Size classes and segregated free lists (internal)
//!   ├── slab       - Slab blocks for tiny requests (internal)
//!   ├── region     - Region providers (sbrk, fixed arena)
//!   ├── heap       - The Heap engine
//!   ├── check      - Invariant checker and heap printers
//!   └── global     - Locked global heap with a GlobalAlloc impl
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{FixedRegion, Heap, SmallMode};
//!
//! let mut heap = Heap::new(FixedRegion::new(64 * 1024), SmallMode::Slab)
//!   .expect("arena large enough for the initial chunk");
//!
//! unsafe {
//!   let p = heap.allocate(100);
//!   assert!(!p.is_null());
//!   assert_eq!(p as usize % 16, 0);
//!
//!   let p = heap.reallocate(p, 400);
//!   heap.deallocate(p);
//! }
//! ```
//!
//! To back a heap with the program break instead, construct it over
//! [`SbrkRegion`], or use [`LockedHeap`] as a `#[global_allocator]`.
//!
//! ## How It Works
//!
//! Memory is obtained from a [`Region`]: a monotonically growing span with
//! a single "grow by N bytes" primitive. The heap brackets its blocks with
//! two zero-size allocated sentinels so that traversal and coalescing never
//! fall off either end, and extends the region in 4096-byte chunks (or the
//! rounded request, if larger) only when the fit search comes up empty.
//!
//! Release is O(1): the freed block merges with whichever of its two heap
//! neighbors are free (their headers and footers tell), and the merged
//! block is pushed onto the head of its size class's list.
//!
//! ## Limitations
//!
//! - **Single-threaded core**: the [`Heap`] takes `&mut self`; wrap it in
//!   [`LockedHeap`] (or your own lock) for multi-threaded hosts.
//! - **16-byte alignment only**: layouts needing more are refused by the
//!   [`LockedHeap`] front end.
//! - **No shrinking**: the region only grows; freed memory is recycled but
//!   never returned to the operating system.
//!
//! ## Safety
//!
//! The allocator reinterprets raw heap bytes as metadata words. All of that
//! pointer arithmetic is confined to the `block` and `slab` modules, which
//! expose typed block handles to the rest of the crate; the public surface
//! is unsafe only where the host hands pointers back in.

pub mod align;
mod block;
mod check;
mod global;
mod heap;
mod region;
mod seglist;
mod slab;
pub mod word;

pub use block::SmallMode;
pub use global::LockedHeap;
pub use heap::Heap;
pub use region::{FixedRegion, Region, SbrkRegion};
