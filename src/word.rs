//! Bit-packed metadata word codec.
//!
//! Every block starts with one 64-bit word that carries the block's total
//! size together with three flag bits:
//!
//! ```text
//!   63                                  4  3   2    1    0
//!   ┌──────────────────────────────────────┬────┬────┬────┐
//!   │            size (multiple of 16)     │prev│allo│spec│
//!   │                                      │allo│c   │ial │
//!   └──────────────────────────────────────┴────┴────┴────┘
//! ```
//!
//! When the `special` bit is set the word does not hold a size at all: the
//! bits above the low three hold a packed pointer instead (a 16-byte block's
//! free-list link, or a slab block's predecessor link). Packed pointers have
//! their low three bits clear by alignment, so the flag bits and the pointer
//! never collide. The implied size of a special block is supplied by the
//! block layer, which knows which variant the heap runs under.
//!
//! The exact bit positions are a wire-level contract: external tools that
//! walk the heap rely on them.

/// Size of one metadata word in bytes.
pub const WSIZE: usize = 8;

/// Two words. Also the minimum block size in the minimal-block variant.
pub const DSIZE: usize = 16;

/// Payload alignment unit. Every block size is a multiple of this.
pub const ALIGNMENT: usize = 16;

/// Bytes requested from the region provider per ordinary extension.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Marks a special-shape block: a 16-byte block in the minimal variant, a
/// slab block in the slab variant.
pub const SPECIAL_MASK: u64 = 0x1;

/// Set when the block is handed out to the host.
pub const ALLOC_MASK: u64 = 0x2;

/// Set when the immediately preceding heap block is allocated.
pub const PREV_ALLOC_MASK: u64 = 0x4;

/// Extracts the size field.
pub const SIZE_MASK: u64 = !0xF;

/// Extracts a packed pointer.
pub const PTR_MASK: u64 = !0x7;

/// The flag bits preserved when a pointer is spliced into a word.
pub const FLAG_MASK: u64 = 0x7;

/// Packs a block's metadata into one word.
///
/// For a special-shape block the size is dropped entirely; the caller
/// splices the packed pointer in afterwards with [`splice_link`].
pub fn pack(
  size: usize,
  alloc: bool,
  prev_alloc: bool,
  special: bool,
) -> u64 {
  let mut word = if special { SPECIAL_MASK } else { size as u64 };
  if alloc {
    word |= ALLOC_MASK;
  }
  if prev_alloc {
    word |= PREV_ALLOC_MASK;
  }
  word
}

/// Returns the size stored in a word, or zero for a special-shape word
/// (whose size is implied, not stored).
pub fn extract_size(word: u64) -> usize {
  if extract_special(word) {
    0
  } else {
    (word & SIZE_MASK) as usize
  }
}

pub fn extract_alloc(word: u64) -> bool {
  word & ALLOC_MASK != 0
}

pub fn extract_prev_alloc(word: u64) -> bool {
  word & PREV_ALLOC_MASK != 0
}

pub fn extract_special(word: u64) -> bool {
  word & SPECIAL_MASK != 0
}

/// Returns the pointer packed into a special-shape word.
pub fn extract_link(word: u64) -> usize {
  (word & PTR_MASK) as usize
}

/// Replaces the pointer bits of `word` with `link`, keeping the low flag
/// bits. `link` must be at least 8-byte aligned.
pub fn splice_link(
  word: u64,
  link: usize,
) -> u64 {
  debug_assert_eq!(link as u64 & FLAG_MASK, 0);
  (word & FLAG_MASK) | link as u64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pack_and_extract_roundtrip() {
    for size in [16usize, 32, 48, 800, 4096, 1 << 20] {
      for alloc in [false, true] {
        for prev_alloc in [false, true] {
          let word = pack(size, alloc, prev_alloc, false);
          assert_eq!(extract_size(word), size);
          assert_eq!(extract_alloc(word), alloc);
          assert_eq!(extract_prev_alloc(word), prev_alloc);
          assert!(!extract_special(word));
        }
      }
    }
  }

  #[test]
  fn special_words_store_no_size() {
    let word = pack(4096, true, true, true);
    assert_eq!(extract_size(word), 0);
    assert!(extract_special(word));
    assert!(extract_alloc(word));
    assert!(extract_prev_alloc(word));
  }

  #[test]
  fn splice_preserves_flags() {
    let word = pack(0, true, true, true);
    let spliced = splice_link(word, 0xdead_bee8);
    assert!(extract_special(spliced));
    assert!(extract_alloc(spliced));
    assert!(extract_prev_alloc(spliced));
    assert_eq!(extract_link(spliced), 0xdead_bee8);

    let relinked = splice_link(spliced, 0);
    assert_eq!(extract_link(relinked), 0);
    assert!(extract_special(relinked));
  }
}
