//! Boundary-tag block layout.
//!
//! Every block in the heap is described by a one-word header stored
//! immediately before its payload. The size is always a multiple of 8, so
//! the three low bits of the header word are free to carry the allocation
//! bit `A` and the previous-block allocation bit `P`:
//!
//! ```text
//!   Header word:
//!   ┌───────────────────────────────────────────────┬───┬───┬───┐
//!   │                  size (8-aligned)             │ 0 │ P │ A │
//!   └───────────────────────────────────────────────┴───┴───┴───┘
//!    63                                            3   2   1   0
//!
//!   Free block:                        Allocated block:
//!   ┌────────┬──────┬──────┬───┬────┐  ┌────────┬─────────────────┐
//!   │ header │ next │ prev │...│ftr │  │ header │     payload     │
//!   └────────┴──────┴──────┴───┴────┘  └────────┴─────────────────┘
//!            ▲                                  ▲
//!            payload (returned to user          payload
//!            while allocated; link words
//!            while free)
//! ```
//!
//! Only free blocks carry the footer (a copy of the header in the block's
//! last word); while a block is allocated that word belongs to the user.
//! Backward traversal is needed only when the previous block is free, and a
//! free previous block still has its footer, so the `P` bit is enough to
//! know whether stepping back is legal.

pub const WORD: usize = 8;
pub const DWORD: usize = 16;

/// Smallest block the heap ever creates: header + two link words + footer.
pub const MIN_BLOCK: usize = 32;

const ALLOC: usize = 0b001;
const PREV_ALLOC: usize = 0b010;
const SIZE_MASK: usize = !0b111;

/// Packs a block size and its two state bits into a header word.
pub fn pack(
  size: usize,
  prev_alloc: bool,
  alloc: bool,
) -> usize {
  debug_assert_eq!(size & !SIZE_MASK, 0);
  size | ((prev_alloc as usize) << 1) | (alloc as usize)
}

/// A block, addressed by its payload pointer.
///
/// This is a plain `Copy` wrapper: it owns nothing and borrows nothing, it
/// only knows how to step around the boundary-tag layout. All accessors are
/// unsafe because nothing ties the wrapped pointer to a live heap; callers
/// guarantee the pointer heads a block inside an initialized region.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct BlockPtr(*mut u8);

impl BlockPtr {
  pub fn new(payload: *mut u8) -> Self {
    Self(payload)
  }

  /// The payload pointer, i.e. the address handed to the user.
  pub fn payload(self) -> *mut u8 {
    self.0
  }

  pub fn addr(self) -> usize {
    self.0 as usize
  }

  /// Address of the header word.
  ///
  /// # Safety
  /// The payload must sit at least one word into the region.
  pub unsafe fn header(self) -> *mut usize {
    unsafe { self.0.sub(WORD) as *mut usize }
  }

  /// # Safety
  /// The block must have a valid header.
  pub unsafe fn size(self) -> usize {
    unsafe { self.header().read() & SIZE_MASK }
  }

  /// # Safety
  /// The block must have a valid header.
  pub unsafe fn is_allocated(self) -> bool {
    unsafe { self.header().read() & ALLOC != 0 }
  }

  /// # Safety
  /// The block must have a valid header.
  pub unsafe fn prev_allocated(self) -> bool {
    unsafe { self.header().read() & PREV_ALLOC != 0 }
  }

  /// # Safety
  /// The header word must lie within the region.
  pub unsafe fn write_header(
    self,
    size: usize,
    prev_alloc: bool,
    alloc: bool,
  ) {
    unsafe { self.header().write(pack(size, prev_alloc, alloc)) }
  }

  /// Address of the footer word (the block's last word).
  ///
  /// # Safety
  /// The block must have a valid header; only free blocks have a footer.
  pub unsafe fn footer(self) -> *mut usize {
    unsafe { self.0.add(self.size() - DWORD) as *mut usize }
  }

  /// Copies the header into the footer word.
  ///
  /// # Safety
  /// The block must be free (the footer word overlaps an allocated block's
  /// payload) and its header must already hold the final size.
  pub unsafe fn write_footer(self) {
    unsafe { self.footer().write(self.header().read()) }
  }

  /// Rewrites the `P` bit in place, leaving size and `A` untouched.
  ///
  /// # Safety
  /// The header word must lie within the region.
  pub unsafe fn set_prev_allocated(
    self,
    prev_alloc: bool,
  ) {
    unsafe {
      let word = self.header().read();
      let word = if prev_alloc { word | PREV_ALLOC } else { word & !PREV_ALLOC };
      self.header().write(word);
    }
  }

  /// The next physical block (the epilogue, when `self` is the last block).
  ///
  /// # Safety
  /// The block must have a valid header and a physical successor.
  pub unsafe fn next(self) -> BlockPtr {
    unsafe { BlockPtr(self.0.add(self.size())) }
  }

  /// The previous physical block, located through its footer.
  ///
  /// # Safety
  /// The previous block must be free (`P` bit clear), otherwise the word at
  /// `payload - 2W` is user data, not a footer.
  pub unsafe fn prev(self) -> BlockPtr {
    unsafe {
      let prev_size = (self.0.sub(DWORD) as *const usize).read() & SIZE_MASK;
      BlockPtr(self.0.sub(prev_size))
    }
  }

  // Free-list link words, valid only while the block is free. The payload's
  // first word holds the successor, the second the predecessor; null marks
  // the list end.

  /// # Safety
  /// The block must be free and linked (or being linked) into a bin.
  pub unsafe fn link_next(self) -> *mut u8 {
    unsafe { (self.0 as *const *mut u8).read() }
  }

  /// # Safety
  /// The block must be free and linked (or being linked) into a bin.
  pub unsafe fn link_prev(self) -> *mut u8 {
    unsafe { (self.0.add(WORD) as *const *mut u8).read() }
  }

  /// # Safety
  /// The block must be free.
  pub unsafe fn set_link_next(
    self,
    next: *mut u8,
  ) {
    unsafe { (self.0 as *mut *mut u8).write(next) }
  }

  /// # Safety
  /// The block must be free.
  pub unsafe fn set_link_prev(
    self,
    prev: *mut u8,
  ) {
    unsafe { (self.0.add(WORD) as *mut *mut u8).write(prev) }
  }
}
