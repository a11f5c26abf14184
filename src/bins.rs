//! Segregated free-list index.
//!
//! Free blocks are threaded into doubly-linked lists by size class; the
//! lists' link words live inside the free blocks themselves, so the only
//! storage the index owns is a flat array of head pointers:
//!
//! ```text
//!   heads[0]  ──► [32] ──► [32] ──► null        exact classes: one size
//!   heads[1]  ──► [40] ──► null                 per class, widths 32, 40,
//!   ...                                         48, ... up to 256
//!   heads[28] ──► [256] ──► null
//!   heads[29] ──► [280] ──► [384] ──► null      power-of-two classes:
//!   heads[30] ──► [520] ──► null                (256,512], (512,1024], ...
//!   ...                                         kept sorted by size
//!   heads[39] ──► ...                           last class is unbounded
//! ```
//!
//! Exact classes give O(1) allocation for the small sizes that dominate
//! real traces; the handful of sorted power-of-two classes keeps the table
//! small while bounding the search for large requests. The first entry
//! with a sufficient size is a best fit, because exact classes hold one
//! size and power-of-two classes are non-decreasing.

use core::ptr;

use crate::tag::{BlockPtr, MIN_BLOCK, WORD};

/// Largest size served by an exact-fit class.
pub const EXACT_LIMIT: usize = 256;

/// Number of exact-fit classes: widths 32, 40, ..., 256.
pub const EXACT_CLASSES: usize = (EXACT_LIMIT - MIN_BLOCK) / WORD + 1;

/// Total class count; classes `EXACT_CLASSES..` are power-of-two ranges,
/// the last one unbounded.
pub const BIN_COUNT: usize = EXACT_CLASSES + 11;

pub struct Bins {
  heads: [*mut u8; BIN_COUNT],
}

impl Bins {
  pub fn new() -> Self {
    Self {
      heads: [ptr::null_mut(); BIN_COUNT],
    }
  }

  pub fn clear(&mut self) {
    self.heads = [ptr::null_mut(); BIN_COUNT];
  }

  /// Head payload pointer of a class list; null when the class is empty.
  pub fn head(
    &self,
    class: usize,
  ) -> *mut u8 {
    self.heads[class]
  }

  /// Maps a block size to its class index.
  ///
  /// Sizes up to [`EXACT_LIMIT`] land in the exact-fit class of their own
  /// width; larger sizes land in the power-of-two class whose range
  /// `(EXACT_LIMIT * 2^i, EXACT_LIMIT * 2^(i+1)]` contains them, capped at
  /// the last class.
  pub fn class_of(size: usize) -> usize {
    debug_assert!(size >= MIN_BLOCK && size % WORD == 0);

    if size <= EXACT_LIMIT {
      return (size - MIN_BLOCK) / WORD;
    }

    let mut class = EXACT_CLASSES;
    let mut bound = EXACT_LIMIT * 2;
    while class < BIN_COUNT - 1 && size > bound {
      class += 1;
      bound *= 2;
    }
    class
  }

  /// Links a free block into its class.
  ///
  /// Exact classes push at the head. Power-of-two classes splice the block
  /// in front of the first entry at least as large, which keeps the list
  /// non-decreasing and puts the newest block first among equal sizes.
  ///
  /// # Safety
  /// `b` must head a free block whose header holds its final size, and must
  /// not already be linked.
  pub unsafe fn insert(
    &mut self,
    b: BlockPtr,
  ) {
    unsafe {
      let size = b.size();
      let class = Self::class_of(size);

      let mut at = self.heads[class];
      let mut after: *mut u8 = ptr::null_mut();
      if class >= EXACT_CLASSES {
        while !at.is_null() && BlockPtr::new(at).size() < size {
          after = at;
          at = BlockPtr::new(at).link_next();
        }
      }

      b.set_link_prev(after);
      b.set_link_next(at);
      if after.is_null() {
        self.heads[class] = b.payload();
      } else {
        BlockPtr::new(after).set_link_next(b.payload());
      }
      if !at.is_null() {
        BlockPtr::new(at).set_link_prev(b.payload());
      }
    }
  }

  /// Unlinks a free block from its class.
  ///
  /// # Safety
  /// `b` must be linked into the class matching its current header size.
  pub unsafe fn unlink(
    &mut self,
    b: BlockPtr,
  ) {
    unsafe {
      let next = b.link_next();
      let prev = b.link_prev();

      if prev.is_null() {
        self.heads[Self::class_of(b.size())] = next;
      } else {
        BlockPtr::new(prev).set_link_next(next);
      }
      if !next.is_null() {
        BlockPtr::new(next).set_link_prev(prev);
      }
    }
  }

  /// Finds the smallest-class free block able to hold `size` bytes.
  ///
  /// Walks the starting class skipping entries that are too small, then
  /// falls through to the higher classes. Within a class ties go to the
  /// most recently inserted block.
  ///
  /// # Safety
  /// The lists must be consistent (every entry a free block with valid
  /// header and links).
  pub unsafe fn find_fit(
    &self,
    size: usize,
  ) -> Option<BlockPtr> {
    unsafe {
      for class in Self::class_of(size)..BIN_COUNT {
        let mut at = self.heads[class];
        while !at.is_null() {
          let b = BlockPtr::new(at);
          if b.size() >= size {
            return Some(b);
          }
          at = b.link_next();
        }
      }
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exact_classes_step_by_word() {
    assert_eq!(Bins::class_of(MIN_BLOCK), 0);
    assert_eq!(Bins::class_of(MIN_BLOCK + WORD), 1);
    assert_eq!(Bins::class_of(EXACT_LIMIT), EXACT_CLASSES - 1);
  }

  #[test]
  fn power_classes_cover_doubling_ranges() {
    assert_eq!(Bins::class_of(EXACT_LIMIT + WORD), EXACT_CLASSES);
    assert_eq!(Bins::class_of(EXACT_LIMIT * 2), EXACT_CLASSES);
    assert_eq!(Bins::class_of(EXACT_LIMIT * 2 + WORD), EXACT_CLASSES + 1);
    assert_eq!(Bins::class_of(EXACT_LIMIT * 4), EXACT_CLASSES + 1);

    // far past the last bound everything lands in the final class
    assert_eq!(Bins::class_of(1 << 40), BIN_COUNT - 1);
  }

  #[test]
  fn class_mapping_is_monotone() {
    let mut last = 0;
    let mut size = MIN_BLOCK;
    while size < (1 << 24) {
      let class = Bins::class_of(size);
      assert!(class >= last, "class regressed at size {}", size);
      assert!(class < BIN_COUNT);
      last = class;
      size += WORD;
      // sparse-sample the large sizes
      if size > 4096 {
        size += size / 3 / WORD * WORD;
      }
    }
  }

  /// Fabricates a free block of `size` bytes inside `buf` at word offset
  /// `word`, returning its payload pointer.
  unsafe fn fake_block(
    buf: &mut [u64],
    word: usize,
    size: usize,
  ) -> BlockPtr {
    unsafe {
      let payload = (buf.as_mut_ptr() as *mut u8).add((word + 1) * WORD);
      let b = BlockPtr::new(payload);
      b.write_header(size, true, false);
      b.write_footer();
      b
    }
  }

  #[test]
  fn exact_class_insert_is_lifo() {
    let mut buf = [0u64; 64];
    let mut bins = Bins::new();

    unsafe {
      let a = fake_block(&mut buf, 0, MIN_BLOCK);
      let b = fake_block(&mut buf, 8, MIN_BLOCK);
      bins.insert(a);
      bins.insert(b);

      // the newest block heads the list
      assert_eq!(bins.head(0), b.payload());
      assert_eq!(b.link_next(), a.payload());
      assert_eq!(a.link_prev(), b.payload());
      assert!(a.link_next().is_null());
      assert!(b.link_prev().is_null());
    }
  }

  #[test]
  fn power_class_insert_keeps_sizes_sorted() {
    let mut buf = [0u64; 512];
    let mut bins = Bins::new();

    unsafe {
      let big = fake_block(&mut buf, 0, 512);
      let small = fake_block(&mut buf, 80, 264);
      let mid = fake_block(&mut buf, 160, 384);
      bins.insert(big);
      bins.insert(small);
      bins.insert(mid);

      let class = Bins::class_of(264);
      assert_eq!(class, Bins::class_of(512));

      let first = BlockPtr::new(bins.head(class));
      assert_eq!(first, small);
      let second = BlockPtr::new(first.link_next());
      assert_eq!(second, mid);
      let third = BlockPtr::new(second.link_next());
      assert_eq!(third, big);
      assert!(third.link_next().is_null());
    }
  }

  #[test]
  fn unlink_relinks_neighbors_and_head() {
    let mut buf = [0u64; 64];
    let mut bins = Bins::new();

    unsafe {
      let a = fake_block(&mut buf, 0, MIN_BLOCK);
      let b = fake_block(&mut buf, 8, MIN_BLOCK);
      let c = fake_block(&mut buf, 16, MIN_BLOCK);
      bins.insert(a);
      bins.insert(b);
      bins.insert(c); // list: c, b, a

      bins.unlink(b);
      assert_eq!(bins.head(0), c.payload());
      assert_eq!(c.link_next(), a.payload());
      assert_eq!(a.link_prev(), c.payload());

      bins.unlink(c);
      assert_eq!(bins.head(0), a.payload());
      assert!(a.link_prev().is_null());

      bins.unlink(a);
      assert!(bins.head(0).is_null());
    }
  }

  #[test]
  fn find_fit_returns_first_viable_entry() {
    let mut buf = [0u64; 512];
    let mut bins = Bins::new();

    unsafe {
      let small = fake_block(&mut buf, 0, 264);
      let mid = fake_block(&mut buf, 80, 384);
      let big = fake_block(&mut buf, 160, 512);
      bins.insert(small);
      bins.insert(mid);
      bins.insert(big);

      // skips the 264 entry, takes the 384 one (best fit in a sorted list)
      assert_eq!(bins.find_fit(300), Some(mid));
      // exact hit
      assert_eq!(bins.find_fit(264), Some(small));
      // larger than everything in the class, falls through to nothing
      assert_eq!(bins.find_fit(1024), None);
    }
  }

  #[test]
  fn find_fit_falls_through_to_higher_classes() {
    let mut buf = [0u64; 128];
    let mut bins = Bins::new();

    unsafe {
      let big = fake_block(&mut buf, 0, 512);
      bins.insert(big);

      // a small request is served from a higher class when its own is empty
      assert_eq!(bins.find_fit(MIN_BLOCK), Some(big));
    }
  }

  #[test]
  fn find_fit_on_empty_bins() {
    let bins = Bins::new();
    unsafe {
      assert_eq!(bins.find_fit(MIN_BLOCK), None);
    }
  }
}
