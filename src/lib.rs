//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a **segregated-fit allocator** with boundary tags:
//! a userspace `malloc`/`free`/`realloc`/`calloc` core over a single
//! growing byte region, obtained either from the program break via
//! `sbrk` or from a fixed in-memory arena.
//!
//! ## Overview
//!
//! ```text
//!   Heap structure:
//!
//!   ┌──────────────────────────────────────────────────────────────────┐
//!   │                            REGION                                │
//!   │                                                                  │
//!   │  ┌──────────┬─────────┬─────────┬─────────┬─────────┬─────────┐  │
//!   │  │ prologue │ alloc'd │  free   │ alloc'd │  free   │ epilogue│  │
//!   │  └──────────┴─────────┴────┬────┴─────────┴────┬────┴─────────┘  │
//!   │                            │                   │                 │
//!   │          size-class bins:  │                   │                 │
//!   │          ┌──────┐          │                   │                 │
//!   │          │ [32] ─┼─────────┘                   │                 │
//!   │          │ [40] │                              │                 │
//!   │          │ ...  ─┼────────────────────────────┘                  │
//!   │          └──────┘   free blocks carry the list links             │
//!   │                     inside their own payload area                │
//!   └──────────────────────────────────────────────────────────────────┘
//!
//!   Allocation rounds the request to a whole block, takes the first
//!   fitting block from the smallest viable size class, and splits off
//!   the remainder. Release merges with free physical neighbors before
//!   re-linking, so free space never stays fragmented across adjacent
//!   blocks.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── tag        - Boundary-tag block layout (internal)
//!   ├── region     - RegionProvider trait, SystemBreak, ArenaRegion
//!   ├── bins       - Segregated free-list index (internal)
//!   ├── seg        - SegAllocator implementation
//!   └── check      - Heap consistency checker
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::SegAllocator;
//!
//! fn main() {
//!     let mut allocator = SegAllocator::system();
//!
//!     unsafe {
//!         // Allocate 64 bytes
//!         let ptr = allocator.allocate(64);
//!
//!         // Use the memory
//!         *ptr = 42;
//!         println!("Value: {}", *ptr);
//!
//!         // Resize, then free it
//!         let ptr = allocator.reallocate(ptr, 128);
//!         allocator.release(ptr);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! Every block is described by a one-word header packing its size with
//! two state bits; free blocks mirror the header into their last word so
//! release can merge backward. Released blocks are indexed by size class:
//! exact classes for the small sizes that dominate real workloads, sorted
//! power-of-two classes for the rest.
//!
//! ## Features
//!
//! - **Segregated fit**: sub-linear search via per-size-class free lists
//! - **Boundary-tag coalescing**: adjacent free blocks always merge
//! - **Footer elision**: allocated blocks spend no word on a footer
//! - **Realloc fast paths**: shrink and grow in place when possible
//! - **Pluggable region**: `sbrk`-backed or arena-backed heaps
//! - **Checkable**: every invariant verifiable via `check_heap`
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Memory is never returned to the OS**: the region only grows
//! - **Unix-only with `SystemBreak`**: requires `libc` and `sbrk`
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory
//! management. All allocation and deallocation operations require
//! `unsafe` blocks.

pub mod align;
mod bins;
mod check;
mod region;
mod seg;
mod tag;

pub use check::Violation;
pub use region::{ArenaRegion, RegionProvider, SystemBreak};
pub use seg::{CHUNK, SegAllocator, print_alloc};
