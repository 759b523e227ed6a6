//! The in-band block layout: boundary tags and neighbor traversal.
//!
//! Every block - free or allocated - starts with a header word and ends with
//! a footer word, both packing `(size, allocated)`; the header additionally
//! carries the resize-tag bit. Sizes are multiples of 8, so the low three
//! bits of a size are free to hold the flags:
//!
//! ```text
//!      31                     3  2  1  0
//!      -----------------------------------
//!     | s  s  s  s  ... s  s  s  0  t  a |
//!      -----------------------------------
//! ```
//!
//! The footer exists purely so the *following* block can find the start of
//! this one during coalescing; it never carries the resize-tag.
//!
//! A [`Block`](struct.Block.html) is a handle to one block, identified by the
//! offset of its payload (the byte just past the header). Offset 0 is the
//! permanent alignment-padding word at the base of the heap, so no payload
//! ever sits there; the free-list code uses 0 as its nil link.

use static_assertions::const_assert;

use crate::arena::HeapRegion;

/// Word size, in bytes. Headers, footers, and free-list links are one word.
pub const WORD: u32 = 4;

/// Double word: the alignment unit. All block sizes are multiples of this.
pub const DWORD: u32 = 8;

/// The smallest representable block: header + footer + two link words.
pub const MIN_BLOCK: u32 = 16;

/// Minimum heap-growth quantum, in bytes.
pub const CHUNK_SIZE: u32 = 1 << 12;

/// Speculative extra space folded into every resize, so that a block that
/// grew once has room to grow a little more without moving.
pub const RESIZE_SLACK: u32 = 1 << 7;

/// Largest payload request the allocator accepts. Offsets are 32-bit, so
/// anything bigger could never be satisfied anyway; capping here keeps the
/// size arithmetic overflow-free.
pub const MAX_REQUEST: u32 = 1 << 31;

const_assert!(MIN_BLOCK >= 2 * WORD + 2 * WORD);
const_assert!(MIN_BLOCK % DWORD == 0);
const_assert!(CHUNK_SIZE % DWORD == 0);
const_assert!(RESIZE_SLACK % DWORD == 0);

const ALLOCATED_BIT: u32 = 0x1;
const TAG_BIT: u32 = 0x2;
const SIZE_MASK: u32 = !0x7;

/// One packed boundary-tag word.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct BoundaryTag(u32);

impl BoundaryTag {
    /// Pack a size and allocation state, with the resize-tag clear.
    pub fn pack(size: u32, allocated: bool) -> BoundaryTag {
        debug_assert_eq!(size & !SIZE_MASK, 0, "block sizes are multiples of 8");
        BoundaryTag(size | allocated as u32)
    }

    pub fn from_raw(raw: u32) -> BoundaryTag {
        BoundaryTag(raw)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn size(self) -> u32 {
        self.0 & SIZE_MASK
    }

    pub fn is_allocated(self) -> bool {
        self.0 & ALLOCATED_BIT != 0
    }

    pub fn is_tagged(self) -> bool {
        self.0 & TAG_BIT != 0
    }

    pub fn tagged(self) -> BoundaryTag {
        BoundaryTag(self.0 | TAG_BIT)
    }

    pub fn untagged(self) -> BoundaryTag {
        BoundaryTag(self.0 & !TAG_BIT)
    }
}

impl core::fmt::Debug for BoundaryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "BoundaryTag({}, {}{})",
            self.size(),
            if self.is_allocated() { "a" } else { "f" },
            if self.is_tagged() { ", tagged" } else { "" },
        )
    }
}

/// Round a requested payload size up to a block size: payload plus a word of
/// header and a word of footer, aligned to [`DWORD`], never below
/// [`MIN_BLOCK`].
pub fn adjusted_size(request: u32) -> u32 {
    if request <= DWORD {
        2 * DWORD
    } else {
        DWORD * ((request + DWORD + (DWORD - 1)) / DWORD)
    }
}

/// A handle to a heap block: the offset of its payload within the region.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Block(pub(crate) u32);

impl Block {
    /// The payload offset this handle wraps.
    pub fn offset(self) -> u32 {
        self.0
    }

    fn header_at(self) -> u32 {
        self.0 - WORD
    }

    pub fn header<R: HeapRegion>(self, region: &R) -> BoundaryTag {
        BoundaryTag::from_raw(region.word(self.header_at()))
    }

    pub fn footer<R: HeapRegion>(self, region: &R) -> BoundaryTag {
        BoundaryTag::from_raw(region.word(self.0 + self.size(region) - DWORD))
    }

    /// Block size in bytes, header and footer included. The prologue and
    /// epilogue sentinels report 8 and 0 respectively.
    pub fn size<R: HeapRegion>(self, region: &R) -> u32 {
        self.header(region).size()
    }

    pub fn is_allocated<R: HeapRegion>(self, region: &R) -> bool {
        self.header(region).is_allocated()
    }

    pub fn is_tagged<R: HeapRegion>(self, region: &R) -> bool {
        self.header(region).is_tagged()
    }

    /// The epilogue sentinel is the only zero-sized block.
    pub fn is_epilogue<R: HeapRegion>(self, region: &R) -> bool {
        self.size(region) == 0
    }

    /// The block immediately after this one. For the last real block this
    /// lands on the epilogue, whose header is the final word of the region.
    pub fn next<R: HeapRegion>(self, region: &R) -> Block {
        Block(self.0 + self.size(region))
    }

    /// The block immediately before this one, found through its footer.
    /// Valid only while that footer is intact, which the allocator maintains
    /// for every block at every operation boundary.
    pub fn prev<R: HeapRegion>(self, region: &R) -> Block {
        let prev_footer = BoundaryTag::from_raw(region.word(self.0 - DWORD));
        Block(self.0 - prev_footer.size())
    }

    /// Write matching header and footer words for this block, preserving any
    /// resize-tag already present on the header.
    pub fn format<R: HeapRegion>(self, region: &mut R, size: u32, allocated: bool) {
        let tag = self.header(region).is_tagged();
        let mut word = BoundaryTag::pack(size, allocated);
        if tag {
            word = word.tagged();
        }
        region.set_word(self.header_at(), word.raw());
        region.set_word(self.0 + size - DWORD, BoundaryTag::pack(size, allocated).raw());
    }

    /// Write matching header and footer words, clearing the resize-tag.
    pub fn format_clear<R: HeapRegion>(self, region: &mut R, size: u32, allocated: bool) {
        let word = BoundaryTag::pack(size, allocated);
        region.set_word(self.header_at(), word.raw());
        region.set_word(self.0 + size - DWORD, word.raw());
    }

    /// Set the resize-tag on this block's header. Header-only; the footer
    /// never carries the tag.
    pub fn set_tag<R: HeapRegion>(self, region: &mut R) {
        let word = self.header(region).tagged();
        region.set_word(self.header_at(), word.raw());
    }

    /// Clear the resize-tag on this block's header.
    pub fn clear_tag<R: HeapRegion>(self, region: &mut R) {
        let word = self.header(region).untagged();
        region.set_word(self.header_at(), word.raw());
    }

    // Free-list links, stored in the first two payload words. Valid only
    // while the block is free and threaded into the index; allocation
    // overwrites them with payload bytes.

    pub(crate) fn link_next<R: HeapRegion>(self, region: &R) -> Option<Block> {
        match region.word(self.0) {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    pub(crate) fn link_prev<R: HeapRegion>(self, region: &R) -> Option<Block> {
        match region.word(self.0 + WORD) {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    pub(crate) fn set_link_next<R: HeapRegion>(self, region: &mut R, to: Option<Block>) {
        region.set_word(self.0, to.map_or(0, |b| b.0));
    }

    pub(crate) fn set_link_prev<R: HeapRegion>(self, region: &mut R, to: Option<Block>) {
        region.set_word(self.0 + WORD, to.map_or(0, |b| b.0));
    }
}
