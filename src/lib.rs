//! A segregated-fit memory allocator.
//!
//! This crate implements the classic boundary-tag heap design: every block
//! carries a packed header and footer, free blocks are indexed in an array
//! of size-class lists, neighbors are coalesced on release, and resize grows
//! blocks in place when it can. The heap is a single contiguous region that
//! only ever grows, reached through the
//! [`HeapRegion`](arena/trait.HeapRegion.html) trait.
//!
//! Rather than handing out raw pointers, the allocator owns its region and
//! identifies blocks by offset; payload bytes are read and written through
//! the allocator. That keeps the whole crate in safe Rust while preserving
//! the in-band layout - headers, footers, and free-list links all live
//! inside the managed bytes, exactly where a C allocator would put them.
//!
//! ```
//! use segfit::{Allocator, BoundedHeap};
//!
//! let mut allocator = Allocator::new(BoundedHeap::default()).unwrap();
//!
//! let block = allocator.allocate(100).unwrap();
//! allocator.payload_mut(block)[0] = 42;
//!
//! let block = allocator.resize(block, 200).unwrap();
//! assert_eq!(allocator.payload(block)[0], 42);
//!
//! allocator.release(block);
//! ```
//!
//! The allocator is single-threaded by design; wrap it in a lock if you need
//! to share it. It never returns memory to the platform.

pub mod allocators;
pub mod arena;
pub mod blocks;
pub mod index;

pub use crate::allocators::{Allocator, Stats, Validity};
pub use crate::arena::{BoundedHeap, HeapExhausted, HeapRegion};
pub use crate::blocks::Block;
