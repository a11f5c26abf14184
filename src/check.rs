//! Heap consistency checking.
//!
//! [`SegAllocator::check_heap`] walks the physical block sequence from the
//! prologue to the epilogue and every class list, and reports each broken
//! invariant as a [`Violation`]. It never panics and never mutates the
//! heap, so tests can call it after every step of a scenario. The walks
//! are step-capped so a corrupted size or link cycle ends in a violation
//! instead of an endless loop.

use core::fmt;

use crate::bins::{BIN_COUNT, Bins, EXACT_CLASSES};
use crate::region::RegionProvider;
use crate::seg::SegAllocator;
use crate::tag::{BlockPtr, MIN_BLOCK, WORD};

/// One broken heap invariant, with the payload address (or class) where it
/// was observed.
#[derive(Debug, PartialEq, Eq)]
pub enum Violation {
  /// A block payload is not 8-aligned.
  Misaligned { at: usize },
  /// A block lies outside the region.
  OutOfRegion { at: usize },
  /// A header size is not a whole block size.
  BadSize { at: usize, size: usize },
  /// A free block's footer does not mirror its header.
  FooterMismatch { at: usize, header: usize, footer: usize },
  /// A `P` bit disagrees with the preceding block's `A` bit.
  PrevBitMismatch { at: usize },
  /// Two physically adjacent blocks are both free.
  AdjacentFree { at: usize },
  /// A free block is missing from its class list.
  NotInBin { at: usize, size: usize },
  /// A class list entry is marked allocated.
  AllocatedInBin { at: usize, class: usize },
  /// A class list entry's size maps to a different class.
  WrongClass { at: usize, size: usize, class: usize },
  /// A power-of-two class list is not sorted by non-decreasing size.
  UnsortedClass { at: usize, class: usize },
  /// A list entry's back link does not point at its predecessor.
  BrokenLinks { at: usize, class: usize },
  /// The epilogue header is not the region's last word.
  EpilogueAdrift { at: usize },
  /// The tracked tail block is not the last physical block.
  TailAdrift { expected: usize, found: usize },
  /// The class lists and the physical walk disagree on the free count.
  FreeCountMismatch { walked: usize, binned: usize },
  /// The physical walk did not terminate within the region's capacity.
  RunawayWalk { at: usize },
  /// A class list did not terminate within the region's capacity.
  RunawayList { class: usize },
}

impl fmt::Display for Violation {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    match self {
      Violation::Misaligned { at } => write!(f, "block {at:#x}: payload not 8-aligned"),
      Violation::OutOfRegion { at } => write!(f, "block {at:#x}: outside the region"),
      Violation::BadSize { at, size } => {
        write!(f, "block {at:#x}: size {size} is not a whole block size")
      }
      Violation::FooterMismatch { at, header, footer } => {
        write!(f, "block {at:#x}: footer {footer:#x} does not mirror header {header:#x}")
      }
      Violation::PrevBitMismatch { at } => {
        write!(f, "block {at:#x}: P bit disagrees with the previous block")
      }
      Violation::AdjacentFree { at } => {
        write!(f, "block {at:#x}: free with a free predecessor")
      }
      Violation::NotInBin { at, size } => {
        write!(f, "block {at:#x}: free block of size {size} not in its class list")
      }
      Violation::AllocatedInBin { at, class } => {
        write!(f, "class {class}: entry {at:#x} is marked allocated")
      }
      Violation::WrongClass { at, size, class } => {
        write!(f, "class {class}: entry {at:#x} of size {size} belongs elsewhere")
      }
      Violation::UnsortedClass { at, class } => {
        write!(f, "class {class}: entry {at:#x} breaks the size ordering")
      }
      Violation::BrokenLinks { at, class } => {
        write!(f, "class {class}: entry {at:#x} has a broken back link")
      }
      Violation::EpilogueAdrift { at } => {
        write!(f, "epilogue {at:#x}: header is not the region's last word")
      }
      Violation::TailAdrift { expected, found } => {
        write!(f, "tail is {found:#x}, last physical block is {expected:#x}")
      }
      Violation::FreeCountMismatch { walked, binned } => {
        write!(f, "{walked} free blocks in the heap, {binned} across the class lists")
      }
      Violation::RunawayWalk { at } => {
        write!(f, "physical walk ran away at {at:#x}")
      }
      Violation::RunawayList { class } => write!(f, "class {class}: list runs away"),
    }
  }
}

impl<P: RegionProvider> SegAllocator<P> {
  /// Verifies every heap invariant and returns all violations found.
  ///
  /// An uninitialized heap is trivially consistent. Violations that make
  /// further traversal meaningless (a bad size, a runaway walk) abort the
  /// check early with what was gathered so far.
  pub fn check_heap(&self) -> Result<(), Vec<Violation>> {
    if !self.ready {
      return Ok(());
    }

    let mut found = Vec::new();
    let lo = self.region.lo() as usize;
    let hi = self.region.hi() as usize;
    let max_steps = (hi - lo) / MIN_BLOCK + 2;

    unsafe {
      // physical walk, prologue to epilogue
      let mut free_walked = 0usize;
      let mut prev_alloc = true; // the prologue
      let mut last_payload: *mut u8 = core::ptr::null_mut();
      let mut steps = 0usize;
      let mut b = BlockPtr::new(self.first);

      while b.size() != 0 {
        steps += 1;
        if steps > max_steps {
          found.push(Violation::RunawayWalk { at: b.addr() });
          return Err(found);
        }
        if b.addr() % WORD != 0 {
          found.push(Violation::Misaligned { at: b.addr() });
          return Err(found);
        }
        if !self.region.contains(b.payload()) {
          found.push(Violation::OutOfRegion { at: b.addr() });
          return Err(found);
        }

        let size = b.size();
        if size % WORD != 0 || size < MIN_BLOCK {
          found.push(Violation::BadSize { at: b.addr(), size });
          return Err(found);
        }
        // the block must end on or before the epilogue header
        if b.addr() + size > hi {
          found.push(Violation::OutOfRegion { at: b.addr() });
          return Err(found);
        }
        if b.prev_allocated() != prev_alloc {
          found.push(Violation::PrevBitMismatch { at: b.addr() });
        }
        if !b.is_allocated() {
          if !prev_alloc {
            found.push(Violation::AdjacentFree { at: b.addr() });
          }
          let header = b.header().read();
          let footer = b.footer().read();
          if header != footer {
            found.push(Violation::FooterMismatch { at: b.addr(), header, footer });
          }
          if !self.bin_links_to(b, max_steps) {
            found.push(Violation::NotInBin { at: b.addr(), size });
          }
          free_walked += 1;
        }

        prev_alloc = b.is_allocated();
        last_payload = b.payload();
        b = b.next();
      }

      // the epilogue closes the region and carries the tail's A bit
      if b.header() as usize != hi - WORD {
        found.push(Violation::EpilogueAdrift { at: b.addr() });
      }
      if b.prev_allocated() != prev_alloc {
        found.push(Violation::PrevBitMismatch { at: b.addr() });
      }
      if last_payload != self.tail {
        found.push(Violation::TailAdrift {
          expected: last_payload as usize,
          found: self.tail as usize,
        });
      }

      // class list walk
      let mut free_binned = 0usize;
      for class in 0..BIN_COUNT {
        let mut at = self.bins.head(class);
        let mut prev: *mut u8 = core::ptr::null_mut();
        let mut last_size = 0usize;
        let mut steps = 0usize;

        while !at.is_null() {
          steps += 1;
          if steps > max_steps {
            found.push(Violation::RunawayList { class });
            return Err(found);
          }
          if (at as usize) % WORD != 0 || !self.region.contains(at) {
            found.push(Violation::OutOfRegion { at: at as usize });
            return Err(found);
          }

          let e = BlockPtr::new(at);
          if e.is_allocated() {
            found.push(Violation::AllocatedInBin { at: e.addr(), class });
          }
          let size = e.size();
          if size < MIN_BLOCK || size % WORD != 0 {
            found.push(Violation::BadSize { at: e.addr(), size });
            return Err(found);
          }
          if Bins::class_of(size) != class {
            found.push(Violation::WrongClass { at: e.addr(), size, class });
          }
          if class >= EXACT_CLASSES && size < last_size {
            found.push(Violation::UnsortedClass { at: e.addr(), class });
          }
          if e.link_prev() != prev {
            found.push(Violation::BrokenLinks { at: e.addr(), class });
          }

          last_size = size;
          prev = at;
          at = e.link_next();
          free_binned += 1;
        }
      }

      if free_walked != free_binned {
        found.push(Violation::FreeCountMismatch {
          walked: free_walked,
          binned: free_binned,
        });
      }
    }

    if found.is_empty() { Ok(()) } else { Err(found) }
  }

  /// Total bytes sitting in free blocks (headers included).
  pub fn free_bytes(&self) -> usize {
    self.free_block_sizes().iter().sum()
  }

  /// Number of free blocks across all class lists.
  pub fn free_block_count(&self) -> usize {
    self.free_block_sizes().len()
  }

  /// Sizes of every free block, in class order.
  pub fn free_block_sizes(&self) -> Vec<usize> {
    let mut sizes = Vec::new();
    if !self.ready {
      return sizes;
    }

    unsafe {
      for class in 0..BIN_COUNT {
        let mut at = self.bins.head(class);
        while !at.is_null() {
          let e = BlockPtr::new(at);
          sizes.push(e.size());
          at = e.link_next();
        }
      }
    }
    sizes
  }

  /// Whether `b` is reachable from its class head.
  unsafe fn bin_links_to(
    &self,
    b: BlockPtr,
    max_steps: usize,
  ) -> bool {
    unsafe {
      let mut at = self.bins.head(Bins::class_of(b.size()));
      let mut steps = 0usize;
      while !at.is_null() && steps <= max_steps {
        if at == b.payload() {
          return true;
        }
        at = BlockPtr::new(at).link_next();
        steps += 1;
      }
      false
    }
  }
}
