//! Block layout and traversal.
//!
//! A heap is a run of contiguous blocks between a prologue footer and an
//! epilogue header (both zero-size allocated sentinels):
//!
//! ```text
//!            ┌─────────┬────────────────┬────────┬──────────────┬─────────┐
//!            │prologue │ block          │ block  │ block        │epilogue │
//!            │footer   │                │        │              │header   │
//!            └─────────┴────────────────┴────────┴──────────────┴─────────┘
//!                      ▲                                         ▲
//!                      │                                         │
//!                  heap start                      advanced by each extension
//! ```
//!
//! Three block shapes share the one-word header:
//!
//! ```text
//!   allocated             free (regular)          free (minimal, 16 bytes)
//!   ┌────────┐            ┌────────┐              ┌──────────────┐
//!   │ header │            │ header │              │ pred ptr|flag│
//!   ├────────┤            ├────────┤              ├──────────────┤
//!   │payload │            │ pred   │              │ succ ptr|flag│
//!   │        │            ├────────┤              └──────────────┘
//!   │        │            │ succ   │
//!   └────────┘            ├────────┤              slab block
//!   (no footer)           │  ...   │              ┌──────────────┐
//!                         ├────────┤              │ pred ptr|flag│
//!                         │ footer │              ├──────────────┤
//!                         └────────┘              │ slab succ    │
//!                                                 ├──────────────┤
//!                                                 │ bit vector   │
//!                                                 ├──────────────┤
//!                                                 │ 48 slots     │
//!                                                 └──────────────┘
//! ```
//!
//! [`Block`] is a thin typed handle over a raw block address. All reads and
//! writes of heap metadata funnel through this module (plus the slot math in
//! [`crate::slab`]), so the rest of the crate never touches raw words.

use std::ptr;

use crate::slab::SLAB_BLOCK_SIZE;
use crate::word::{self, DSIZE, SIZE_MASK, SPECIAL_MASK, WSIZE};

/// Which space-squeezing variant a heap runs under.
///
/// The two variants give the header's special bit different meanings, so a
/// heap picks one at construction and keeps it for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SmallMode {
  /// Requests of at most 15 bytes are served from slab blocks: 800-byte
  /// blocks subdivided into 48 slots of 16 bytes.
  Slab,
  /// Blocks can shrink to 16 bytes; such a block packs its free-list links
  /// into its own header and footer words.
  Minimal,
}

impl SmallMode {
  /// Smallest total size a regular block can have under this variant.
  pub fn min_block_size(self) -> usize {
    match self {
      SmallMode::Slab => 2 * DSIZE,
      SmallMode::Minimal => DSIZE,
    }
  }

  /// The size implied by a set special bit.
  pub(crate) fn special_size(self) -> usize {
    match self {
      SmallMode::Slab => SLAB_BLOCK_SIZE,
      SmallMode::Minimal => DSIZE,
    }
  }
}

/// The three storage layouts a block can have, derived from the header's
/// special bit and the heap's variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Shape {
  Regular,
  Minimal,
  Slab,
}

/// Handle to one block in a heap region.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Block {
  ptr: *mut u8,
  mode: SmallMode,
}

impl PartialEq for Block {
  fn eq(&self, other: &Self) -> bool {
    self.ptr == other.ptr
  }
}

impl Eq for Block {}

impl Block {
  pub(crate) fn from_raw(
    ptr: *mut u8,
    mode: SmallMode,
  ) -> Self {
    Self { ptr, mode }
  }

  /// Recovers the block handle from a payload pointer handed to the host.
  ///
  /// Slab slot pointers are not payloads in this sense; the heap resolves
  /// them through [`crate::slab::slot_block`] instead.
  ///
  /// # Safety
  /// `payload` must be a payload pointer previously produced by
  /// [`Block::payload`].
  pub(crate) unsafe fn from_payload(
    payload: *mut u8,
    mode: SmallMode,
  ) -> Self {
    Self::from_raw(unsafe { payload.sub(WSIZE) }, mode)
  }

  pub(crate) fn addr(self) -> usize {
    self.ptr as usize
  }

  pub(crate) fn as_ptr(self) -> *mut u8 {
    self.ptr
  }

  pub(crate) unsafe fn word_at(self, offset: usize) -> u64 {
    unsafe { self.ptr.add(offset).cast::<u64>().read() }
  }

  pub(crate) unsafe fn set_word_at(
    self,
    offset: usize,
    value: u64,
  ) {
    unsafe { self.ptr.add(offset).cast::<u64>().write(value) }
  }

  pub(crate) unsafe fn header(self) -> u64 {
    unsafe { self.word_at(0) }
  }

  pub(crate) unsafe fn set_header(self, value: u64) {
    unsafe { self.set_word_at(0, value) }
  }

  /// Total block size in bytes. For special-shape blocks the size is not
  /// stored; it is implied by the variant.
  pub(crate) unsafe fn size(self) -> usize {
    let header = unsafe { self.header() };
    if word::extract_special(header) {
      self.mode.special_size()
    } else {
      word::extract_size(header)
    }
  }

  pub(crate) unsafe fn alloc(self) -> bool {
    word::extract_alloc(unsafe { self.header() })
  }

  pub(crate) unsafe fn prev_alloc(self) -> bool {
    word::extract_prev_alloc(unsafe { self.header() })
  }

  pub(crate) unsafe fn is_special(self) -> bool {
    word::extract_special(unsafe { self.header() })
  }

  pub(crate) unsafe fn shape(self) -> Shape {
    if !unsafe { self.is_special() } {
      Shape::Regular
    } else {
      match self.mode {
        SmallMode::Slab => Shape::Slab,
        SmallMode::Minimal => Shape::Minimal,
      }
    }
  }

  pub(crate) unsafe fn payload(self) -> *mut u8 {
    unsafe { self.ptr.add(WSIZE) }
  }

  /// Bytes of the block usable by the host once allocated.
  pub(crate) unsafe fn payload_size(self) -> usize {
    (unsafe { self.size() }) - WSIZE
  }

  /// Sets or clears the special bit without touching the rest of the word.
  pub(crate) unsafe fn set_special(self, special: bool) {
    let header = unsafe { self.header() };
    let header = if special {
      header | SPECIAL_MASK
    } else {
      header & !SPECIAL_MASK
    };
    unsafe { self.set_header(header) }
  }

  /// Writes the block header.
  ///
  /// In the minimal variant a 16-byte size turns into the special shape; in
  /// the slab variant an existing slab tag sticks until cleared with
  /// [`Block::set_special`]. Either way, a special block that stays special
  /// keeps its packed predecessor link across the rewrite.
  pub(crate) unsafe fn write_header(
    self,
    size: usize,
    alloc: bool,
    prev_alloc: bool,
  ) {
    let special = match self.mode {
      SmallMode::Minimal => size == DSIZE,
      SmallMode::Slab => unsafe { self.is_special() },
    };
    let mut header = word::pack(size, alloc, prev_alloc, special);
    if special && unsafe { self.is_special() } {
      header = word::splice_link(header, word::extract_link(unsafe { self.header() }));
    }
    unsafe { self.set_header(header) }
  }

  unsafe fn footer_ptr(self) -> *mut u64 {
    unsafe { self.ptr.add(self.size() - WSIZE).cast::<u64>() }
  }

  pub(crate) unsafe fn footer(self) -> u64 {
    unsafe { self.footer_ptr().read() }
  }

  /// Writes the block footer. The footer position derives from the current
  /// header size, so the header must be written first.
  ///
  /// A minimal block that stays minimal keeps the successor link packed in
  /// its footer across the rewrite.
  pub(crate) unsafe fn write_footer(
    self,
    size: usize,
    alloc: bool,
    prev_alloc: bool,
  ) {
    let special = match self.mode {
      SmallMode::Minimal => size == DSIZE,
      SmallMode::Slab => unsafe { self.is_special() },
    };
    let mut footer = word::pack(size, alloc, prev_alloc, special);
    if self.mode == SmallMode::Minimal && special && unsafe { self.is_special() } {
      footer = word::splice_link(footer, word::extract_link(unsafe { self.footer() }));
    }
    unsafe { self.footer_ptr().write(footer) }
  }

  /// The next block in heap order.
  pub(crate) unsafe fn next(self) -> Block {
    Block::from_raw(unsafe { self.ptr.add(self.size()) }, self.mode)
  }

  /// The previous block in heap order, located through its footer.
  ///
  /// Only valid when `prev_alloc` is clear: allocated predecessors carry no
  /// footer, so there is nothing to read.
  pub(crate) unsafe fn prev(self) -> Block {
    let footer = unsafe { self.ptr.sub(WSIZE).cast::<u64>().read() };
    let size = if word::extract_special(footer) {
      self.mode.special_size()
    } else {
      (footer & SIZE_MASK) as usize
    };
    Block::from_raw(unsafe { self.ptr.sub(size) }, self.mode)
  }

  /// Free-list predecessor. Regular blocks store it in the word after the
  /// header; special blocks pack it into the header itself.
  pub(crate) unsafe fn pred(self) -> Option<Block> {
    let raw = match unsafe { self.shape() } {
      Shape::Regular => (unsafe { self.word_at(WSIZE) }) as usize,
      Shape::Minimal | Shape::Slab => word::extract_link(unsafe { self.header() }),
    };
    if raw == 0 {
      None
    } else {
      Some(Block::from_raw(raw as *mut u8, self.mode))
    }
  }

  /// Free-list successor. Regular blocks store it two words in; minimal
  /// blocks pack it into the footer; slab blocks keep a plain successor
  /// word after the header.
  pub(crate) unsafe fn succ(self) -> Option<Block> {
    let raw = match unsafe { self.shape() } {
      Shape::Regular => (unsafe { self.word_at(DSIZE) }) as usize,
      Shape::Minimal => word::extract_link(unsafe { self.footer() }),
      Shape::Slab => (unsafe { self.word_at(WSIZE) }) as usize,
    };
    if raw == 0 {
      None
    } else {
      Some(Block::from_raw(raw as *mut u8, self.mode))
    }
  }

  pub(crate) unsafe fn set_pred(self, pred: Option<Block>) {
    let raw = pred.map_or(ptr::null_mut(), Block::as_ptr) as usize;
    match unsafe { self.shape() } {
      Shape::Regular => unsafe { self.set_word_at(WSIZE, raw as u64) },
      Shape::Minimal | Shape::Slab => {
        let header = word::splice_link(unsafe { self.header() }, raw);
        unsafe { self.set_header(header) }
      }
    }
  }

  pub(crate) unsafe fn set_succ(self, succ: Option<Block>) {
    let raw = succ.map_or(ptr::null_mut(), Block::as_ptr) as usize;
    match unsafe { self.shape() } {
      Shape::Regular => unsafe { self.set_word_at(DSIZE, raw as u64) },
      Shape::Minimal => {
        let footer = word::splice_link(unsafe { self.footer() }, raw);
        unsafe { self.footer_ptr().write(footer) }
      }
      Shape::Slab => unsafe { self.set_word_at(WSIZE, raw as u64) },
    }
  }
}
