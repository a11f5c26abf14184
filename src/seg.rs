//! # Segregated-fit allocator
//!
//! The allocator carves variable-size blocks out of a single growing
//! region and recycles released blocks through the size-class index in
//! `bins`.
//!
//! ## Heap layout
//!
//! ```text
//!   lo                                                            hi
//!   ▼                                                             ▼
//!   ┌────┬──────────┬─────────┬─────────┬─────────┬───────┬──────┐
//!   │pad │ prologue │ block 1 │ block 2 │   ...   │ block │ epi- │
//!   │    │ (16, A=1)│         │         │         │  (tail)│logue │
//!   └────┴──────────┴─────────┴─────────┴─────────┴───────┴──────┘
//!                   ▲                                      ▲
//!                   first payload                          size-0 header,
//!                                                          always A=1
//! ```
//!
//! The prologue and epilogue sentinels are installed once and never move
//! (the epilogue header is rewritten one extension further out every time
//! the region grows). Physical traversal never has to test region bounds:
//! walking backward stops at the prologue because its `A` bit is set, and
//! walking forward stops at the epilogue for the same reason.
//!
//! ## Allocation
//!
//! ```text
//!   allocate(u)
//!      │ round u up to a whole block size a
//!      ▼
//!   find_fit(a) ──── hit ────► place(b, a) ──► payload
//!      │ miss                    │
//!      ▼                         └─ splits off the tail of b when the
//!   extend region by             ░  leftover is a whole block
//!   max(a, CHUNK), retry
//! ```
//!
//! ## Release
//!
//! A released block is merged with whichever physical neighbors are free
//! before it is re-linked, so no two adjacent free blocks ever exist. The
//! previous neighbor is found through its footer, which only free blocks
//! carry; the `P` bit in every header says whether that footer is there to
//! read.
//!
//! A block therefore moves through three states: allocated, transiently
//! unlinked (inside coalesce/place, never observable through the public
//! API), and free-and-linked.
//!
//! ## Thread Safety
//!
//! This allocator is **NOT** thread-safe. For multi-threaded usage,
//! external synchronization (e.g., a `Mutex`) is required.

use core::{cmp, fmt, ptr};

use libc::sbrk;

use crate::bins::Bins;
use crate::region::{RegionProvider, SystemBreak};
use crate::tag::{BlockPtr, DWORD, MIN_BLOCK, WORD};
use crate::{align, align_to};

/// Minimum region extension. A miss never grows the heap by less than
/// this, so bursts of small allocations share one trip to the provider.
pub const CHUNK: usize = 256;

/// Debug helper function that prints allocation information.
///
/// Outputs the allocation size, the returned address, and the current
/// program break position for debugging purposes.
///
/// # Safety
///
/// This function calls `sbrk(0)` which is always safe, but the function
/// is marked unsafe to match the allocator's API conventions.
pub unsafe fn print_alloc(
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Allocated {} bytes, address = {:?}, program break = {:?}",
    size,
    addr,
    unsafe { sbrk(0) }
  );
}

/// A segregated-fit allocator over a [`RegionProvider`].
///
/// # Fields
///
/// * `region` - The byte region all blocks live in; grows on demand.
/// * `bins` - Per-size-class free lists threaded through the free blocks.
/// * `first` - Pointer to the first usable payload (just past the prologue).
/// * `tail` - Payload of the last physical block; lets the extension path
///   know the state at the region end without walking the heap.
/// * `ready` - Set once the sentinels are installed; init is lazy and
///   idempotent.
pub struct SegAllocator<P: RegionProvider> {
  pub(crate) region: P,
  pub(crate) bins: Bins,
  pub(crate) first: *mut u8,
  pub(crate) tail: *mut u8,
  pub(crate) ready: bool,
}

impl SegAllocator<SystemBreak> {
  /// An allocator over the process data segment (the `sbrk` heap).
  pub fn system() -> Self {
    Self::new(SystemBreak::new())
  }
}

impl<P: RegionProvider> SegAllocator<P> {
  /// Creates an allocator over `region`. No memory is touched until the
  /// first allocation.
  pub fn new(region: P) -> Self {
    Self {
      region,
      bins: Bins::new(),
      first: ptr::null_mut(),
      tail: ptr::null_mut(),
      ready: false,
    }
  }

  /// The underlying region, for bounds inspection.
  pub fn region(&self) -> &P {
    &self.region
  }

  /// Rounds a user request up to a block size: one word of header
  /// overhead, then up to a whole word, never below the minimum block.
  /// `None` when the padded size overflows.
  fn round_request(size: usize) -> Option<usize> {
    if size <= MIN_BLOCK - WORD {
      return Some(MIN_BLOCK);
    }
    let padded = size.checked_add(DWORD - 1)?;
    Some(padded & !(WORD - 1))
  }

  /// Whether `p` can head a block this allocator handed out: inside the
  /// region, word-aligned, past the prologue, before the epilogue.
  fn owns_payload(
    &self,
    p: *const u8,
  ) -> bool {
    let addr = p as usize;
    self.ready
      && self.region.contains(p)
      && addr % WORD == 0
      && addr >= self.first as usize
      && addr < self.region.hi() as usize
  }

  /// Installs the prologue/epilogue sentinels on first use and seeds the
  /// heap with one [`CHUNK`] of free space. Idempotent; returns `false`
  /// only when the provider cannot supply the sentinel bytes.
  unsafe fn ensure_init(&mut self) -> bool {
    if self.ready {
      return true;
    }

    unsafe {
      // pad so the first payload (sentinels + one header further) comes
      // out word-aligned
      let start = self.region.hi() as usize;
      let pad = align_to!(start, WORD) - start;
      let base = match self.region.extend(pad + 3 * WORD) {
        Some(p) => (p as usize + pad) as *mut u8,
        None => return false,
      };

      // prologue: a double-word sentinel that always reads as allocated;
      // it keeps a footer copy so it looks the same from either side
      let prologue = BlockPtr::new(base.add(WORD));
      prologue.write_header(DWORD, true, true);
      prologue.write_footer();

      // epilogue: a zero-size allocated header closing the block sequence
      let epilogue = prologue.next();
      epilogue.write_header(0, true, true);

      self.first = epilogue.payload();
      self.tail = ptr::null_mut();
      self.bins.clear();
      self.ready = true;

      // seed the heap; failure here just means the first allocation will
      // have to extend for itself
      let _ = self.extend_heap(CHUNK);
    }
    true
  }

  /// Grows the region and turns the new bytes into a free block.
  ///
  /// The new block's header lands exactly on the old epilogue header, a
  /// fresh epilogue is written at the new end, and the block is merged
  /// with a free predecessor before being linked in.
  unsafe fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Option<BlockPtr> {
    unsafe {
      let size = cmp::max(align!(bytes), MIN_BLOCK);
      let old_hi = self.region.extend(size)?;

      let b = BlockPtr::new(old_hi);
      let prev_alloc = b.prev_allocated(); // the old epilogue's P bit
      b.write_header(size, prev_alloc, false);
      b.write_footer();
      b.next().write_header(0, false, true);

      self.tail = b.payload();
      Some(self.coalesce(b))
    }
  }

  /// Merges `b` with whichever physical neighbors are free and links the
  /// result into its class. Returns the merged block.
  ///
  /// # Safety
  /// `b` must head a free, unlinked block whose header and footer are
  /// written and whose successor's `P` bit is already clear.
  unsafe fn coalesce(
    &mut self,
    mut b: BlockPtr,
  ) -> BlockPtr {
    unsafe {
      let mut size = b.size();

      let next = b.next();
      if !next.is_allocated() {
        if self.tail == next.payload() {
          self.tail = b.payload();
        }
        self.bins.unlink(next);
        size += next.size();
      }

      if !b.prev_allocated() {
        let prev = b.prev();
        if self.tail == b.payload() {
          self.tail = prev.payload();
        }
        self.bins.unlink(prev);
        size += prev.size();
        b = prev;
      }

      b.write_header(size, b.prev_allocated(), false);
      b.write_footer();
      self.bins.insert(b);
      b
    }
  }

  /// Commits the free block `b` to an allocation of `asize` bytes,
  /// splitting off the tail when the leftover is a whole block.
  ///
  /// # Safety
  /// `b` must be linked into its class and `asize` must be a rounded
  /// block size not exceeding `b`'s size.
  unsafe fn place(
    &mut self,
    b: BlockPtr,
    asize: usize,
  ) {
    unsafe {
      self.bins.unlink(b);

      let total = b.size();
      let prev_alloc = b.prev_allocated();

      if total - asize >= MIN_BLOCK {
        b.write_header(asize, prev_alloc, true);

        let rest = b.next();
        rest.write_header(total - asize, true, false);
        rest.write_footer();
        self.bins.insert(rest);
        if self.tail == b.payload() {
          self.tail = rest.payload();
        }
      } else {
        b.write_header(total, prev_alloc, true);
        b.next().set_prev_allocated(true);
      }
    }
  }

  /// Allocates `size` bytes and returns an 8-aligned payload pointer.
  ///
  /// Returns null when `size` is zero or the region cannot grow; no
  /// partial state change happens on failure.
  ///
  /// # Safety
  ///
  /// The returned memory is uninitialized. The caller must not use the
  /// pointer after passing it to [`Self::release`], and must ensure no
  /// concurrent calls into the same allocator.
  pub unsafe fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    if size == 0 {
      return ptr::null_mut();
    }

    unsafe {
      if !self.ensure_init() {
        return ptr::null_mut();
      }
      let asize = match Self::round_request(size) {
        Some(a) => a,
        None => return ptr::null_mut(),
      };

      let b = match self.bins.find_fit(asize) {
        Some(b) => b,
        None => {
          if self.extend_heap(cmp::max(asize, CHUNK)).is_none() {
            return ptr::null_mut();
          }
          match self.bins.find_fit(asize) {
            Some(b) => b,
            None => return ptr::null_mut(),
          }
        }
      };

      self.place(b, asize);
      b.payload()
    }
  }

  /// Releases a block previously returned by this allocator.
  ///
  /// Null, misaligned, out-of-region, and already-free pointers are
  /// user errors and are absorbed silently.
  ///
  /// # Safety
  ///
  /// `p` must be null or a pointer obtained from this allocator that the
  /// caller will not touch again.
  pub unsafe fn release(
    &mut self,
    p: *mut u8,
  ) {
    if p.is_null() {
      return;
    }

    unsafe {
      if !self.owns_payload(p) {
        return;
      }
      let b = BlockPtr::new(p);
      if !b.is_allocated() {
        return;
      }

      b.write_header(b.size(), b.prev_allocated(), false);
      b.write_footer();
      b.next().set_prev_allocated(false);
      self.coalesce(b);
    }
  }

  /// Resizes the block at `p` to hold at least `size` bytes.
  ///
  /// Shrinks in place (carving the tail back off when it makes a whole
  /// block), grows in place by folding in a free successor, and falls
  /// back to allocate-copy-release otherwise. Returns null and leaves the
  /// old block untouched when the fallback cannot allocate, when `p` is
  /// invalid, or (after releasing) when `size` is zero.
  ///
  /// # Safety
  ///
  /// `p` must be null or a pointer obtained from this allocator. When the
  /// returned pointer differs from `p`, `p` is released and must not be
  /// used again.
  pub unsafe fn reallocate(
    &mut self,
    p: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if p.is_null() {
        return self.allocate(size);
      }
      if size == 0 {
        self.release(p);
        return ptr::null_mut();
      }

      if !self.owns_payload(p) {
        return ptr::null_mut();
      }
      let b = BlockPtr::new(p);
      if !b.is_allocated() {
        return ptr::null_mut();
      }

      let asize = match Self::round_request(size) {
        Some(a) => a,
        None => return ptr::null_mut(),
      };
      let old = b.size();

      if asize <= old {
        // shrink in place; the trailing remainder goes back to the pool
        // when it makes a whole block
        if old - asize >= MIN_BLOCK {
          b.write_header(asize, b.prev_allocated(), true);

          let rest = b.next();
          rest.write_header(old - asize, true, false);
          rest.write_footer();
          rest.next().set_prev_allocated(false);
          if self.tail == b.payload() {
            self.tail = rest.payload();
          }
          self.coalesce(rest);
        }
        return p;
      }

      let next = b.next();
      if !next.is_allocated() && old + next.size() >= asize {
        // grow in place by folding in the free successor
        if self.tail == next.payload() {
          self.tail = b.payload();
        }
        self.bins.unlink(next);
        let total = old + next.size();

        if total - asize >= MIN_BLOCK {
          b.write_header(asize, b.prev_allocated(), true);

          let rest = b.next();
          rest.write_header(total - asize, true, false);
          rest.write_footer();
          self.bins.insert(rest);
          if self.tail == b.payload() {
            self.tail = rest.payload();
          }
        } else {
          b.write_header(total, b.prev_allocated(), true);
          b.next().set_prev_allocated(true);
        }
        return p;
      }

      // relocate: fresh block, copy the surviving payload, drop the old
      let fresh = self.allocate(size);
      if fresh.is_null() {
        return ptr::null_mut();
      }
      ptr::copy_nonoverlapping(p, fresh, cmp::min(size, old - WORD));
      self.release(p);
      fresh
    }
  }

  /// Allocates a zero-filled array of `count` elements of `size` bytes.
  ///
  /// Returns null when the product overflows or the allocation fails.
  ///
  /// # Safety
  ///
  /// Same contract as [`Self::allocate`]; the memory is zeroed.
  pub unsafe fn allocate_zeroed(
    &mut self,
    count: usize,
    size: usize,
  ) -> *mut u8 {
    let total = match count.checked_mul(size) {
      Some(t) => t,
      None => return ptr::null_mut(),
    };

    unsafe {
      let p = self.allocate(total);
      if !p.is_null() {
        ptr::write_bytes(p, 0, total);
      }
      p
    }
  }
}

impl<P: RegionProvider> fmt::Debug for SegAllocator<P> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.debug_struct("SegAllocator")
      .field("lo", &self.region.lo())
      .field("hi", &self.region.hi())
      .field("free_blocks", &self.free_block_count())
      .field("free_bytes", &self.free_bytes())
      .finish()
  }
}
