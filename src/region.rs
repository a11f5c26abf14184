//! The region the allocator carves blocks from.
//!
//! The heap lives in a single contiguous byte range `[lo, hi)` that only
//! ever grows at `hi`. The allocator never talks to the operating system
//! directly; it goes through the [`RegionProvider`] trait, which mirrors
//! the classic `sbrk` contract:
//!
//! ```text
//!   lo                                  hi
//!   ▼                                   ▼
//!   ┌───────────────────────────────────┐ ─ ─ ─ ─ ┐
//!   │          blocks live here         │  extend
//!   └───────────────────────────────────┘ ─ ─ ─ ─ ┘
//!                                       ▲
//!                          extend(n) appends n bytes
//!                          and returns the former hi
//! ```
//!
//! Two providers ship with the crate: [`SystemBreak`] moves the real
//! program break via `sbrk(2)`, and [`ArenaRegion`] grows inside a
//! fixed-capacity buffer so tests and demos get an isolated, deterministic
//! heap.

use libc::{c_void, intptr_t, sbrk};

use crate::{align, tag::WORD};

/// A monotonically growing byte region.
pub trait RegionProvider {
  /// Lowest byte of the region. Stable for the provider's lifetime.
  fn lo(&self) -> *mut u8;

  /// One past the last valid byte.
  fn hi(&self) -> *mut u8;

  /// Appends `bytes` to the region and returns the former `hi`, or `None`
  /// when the region cannot grow.
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8>;

  /// Whether `p` lies inside the region.
  ///
  /// The upper bound is lax by one word so the epilogue header address,
  /// which sits at `hi - W` with its notional payload at `hi`, can be
  /// probed.
  fn contains(
    &self,
    p: *const u8,
  ) -> bool {
    let addr = p as usize;
    self.lo() as usize <= addr && addr < self.hi() as usize + WORD
  }
}

/// Region provider over the process data segment, extended with `sbrk(2)`.
///
/// `new` captures the current program break as `lo`; every `extend` moves
/// the break forward. Like any `sbrk`-based allocator this assumes nothing
/// else in the process moves the break, so the region stays contiguous.
pub struct SystemBreak {
  lo: *mut u8,
  hi: *mut u8,
}

impl SystemBreak {
  pub fn new() -> Self {
    let brk = unsafe { sbrk(0) } as *mut u8;
    Self { lo: brk, hi: brk }
  }
}

impl RegionProvider for SystemBreak {
  fn lo(&self) -> *mut u8 {
    self.lo
  }

  fn hi(&self) -> *mut u8 {
    self.hi
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8> {
    let old = unsafe { sbrk(bytes as intptr_t) };
    if old == usize::MAX as *mut c_void {
      // sbrk returns (void*)-1 on failure
      return None;
    }

    let old = old as *mut u8;
    self.hi = unsafe { old.add(bytes) };
    Some(old)
  }
}

/// Region provider over an owned, fixed-capacity arena.
///
/// The backing store is a boxed `u64` slice, so `lo` is always 8-aligned
/// and never moves. `extend` advances an internal break until the capacity
/// is exhausted, which makes out-of-memory behavior easy to provoke in
/// tests.
pub struct ArenaRegion {
  buf: Box<[u64]>,
  brk: usize,
}

impl ArenaRegion {
  /// Creates an arena able to hold `bytes` (rounded up to a whole word).
  pub fn with_capacity(bytes: usize) -> Self {
    let words = align!(bytes) / WORD;
    Self {
      buf: vec![0u64; words].into_boxed_slice(),
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.buf.len() * WORD
  }
}

impl RegionProvider for ArenaRegion {
  fn lo(&self) -> *mut u8 {
    self.buf.as_ptr() as *mut u8
  }

  fn hi(&self) -> *mut u8 {
    unsafe { self.lo().add(self.brk) }
  }

  fn extend(
    &mut self,
    bytes: usize,
  ) -> Option<*mut u8> {
    if self.brk + bytes > self.capacity() {
      return None;
    }

    let old = self.hi();
    self.brk += bytes;
    Some(old)
  }
}

/// Serializes tests that move the real program break; concurrent `sbrk`
/// calls from parallel test threads would interleave the regions.
#[cfg(test)]
pub(crate) static SBRK_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn arena_capacity_rounds_up_to_words() {
    let arena = ArenaRegion::with_capacity(100);
    assert_eq!(arena.capacity(), 104);
    assert_eq!(arena.lo(), arena.hi());
  }

  #[test]
  fn arena_lo_is_word_aligned() {
    let arena = ArenaRegion::with_capacity(4096);
    assert_eq!(arena.lo() as usize % WORD, 0);
  }

  #[test]
  fn arena_extend_returns_former_hi() {
    let mut arena = ArenaRegion::with_capacity(256);

    let first = arena.extend(64).expect("within capacity");
    assert_eq!(first, arena.lo());
    assert_eq!(arena.hi() as usize, arena.lo() as usize + 64);

    let second = arena.extend(32).expect("within capacity");
    assert_eq!(second as usize, arena.lo() as usize + 64);
    assert_eq!(arena.hi() as usize, arena.lo() as usize + 96);
  }

  #[test]
  fn arena_extend_fails_past_capacity() {
    let mut arena = ArenaRegion::with_capacity(64);

    assert!(arena.extend(64).is_some());
    assert!(arena.extend(1).is_none());
    // a failed extend must not move the break
    assert_eq!(arena.hi() as usize, arena.lo() as usize + 64);
  }

  #[test]
  fn contains_is_lax_by_one_word() {
    let mut arena = ArenaRegion::with_capacity(128);
    arena.extend(64).unwrap();

    let lo = arena.lo();
    unsafe {
      assert!(arena.contains(lo));
      assert!(arena.contains(lo.add(63)));
      // the epilogue payload address, one past the region, is probeable
      assert!(arena.contains(lo.add(64)));
      assert!(arena.contains(lo.add(64 + WORD - 1)));
      assert!(!arena.contains(lo.add(64 + WORD)));
    }
    assert!(!arena.contains(core::ptr::null()));
  }

  #[test]
  fn system_break_grows_monotonically() {
    let _serial = SBRK_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut region = SystemBreak::new();
    let lo = region.lo();
    assert_eq!(lo, region.hi());

    let old = region.extend(4096).expect("sbrk failed");
    assert!(old >= lo);
    assert_eq!(region.hi() as usize, old as usize + 4096);
  }
}
