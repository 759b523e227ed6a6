//! The segregated free-list index.
//!
//! Free blocks are threaded into one of [`BUCKETS`] doubly linked lists,
//! keyed by power-of-two size class: bucket `i` nominally covers sizes in
//! `[2^i, 2^(i+1))`, with the last bucket a catch-all for everything larger.
//! The links live inside the free blocks themselves (the first two payload
//! words), so the index owns no storage beyond its array of list heads.
//!
//! Each list is kept sorted by ascending size. That is not required for
//! correctness, but it lets an allocation scan stop at the first fitting
//! block and know nothing smaller was skipped.
//!
//! Invariant: a block is threaded into exactly one bucket while free, and
//! into none while allocated. The bucket is always re-derived from the
//! block's current header size, never cached.

use log::trace;

use crate::arena::HeapRegion;
use crate::blocks::Block;

/// Number of segregated size classes.
pub const BUCKETS: usize = 20;

/// The array of free-list heads. Heads are stored as payload offsets, with 0
/// (the heap's padding word) meaning an empty bucket.
#[derive(Debug)]
pub struct FreeIndex {
    heads: [u32; BUCKETS],
}

impl Default for FreeIndex {
    fn default() -> Self {
        FreeIndex {
            heads: [0; BUCKETS],
        }
    }
}

impl FreeIndex {
    /// Map a block size to its bucket: shift right until the size is ≤ 1 or
    /// the shift budget runs out, making the last bucket the catch-all.
    pub fn bucket_for(size: u32) -> usize {
        let mut size = size;
        let mut bucket = 0;
        while bucket < BUCKETS - 1 && size > 1 {
            size >>= 1;
            bucket += 1;
        }
        bucket
    }

    fn head(&self, bucket: usize) -> Option<Block> {
        match self.heads[bucket] {
            0 => None,
            offset => Some(Block(offset)),
        }
    }

    /// Thread `block` into the bucket for its current size, keeping the list
    /// sorted ascending. Ties go before the existing entry of equal size.
    ///
    /// The block must be free, with valid boundary tags; its link words are
    /// overwritten here.
    pub fn insert<R: HeapRegion>(&mut self, region: &mut R, block: Block) {
        let size = block.size(region);
        let bucket = FreeIndex::bucket_for(size);
        trace!("index: insert {:?} size {} into bucket {}", block, size, bucket);

        // Find the first entry at least as large as this block; we splice in
        // just before it.
        let mut before: Option<Block> = None;
        let mut after = self.head(bucket);
        while let Some(entry) = after {
            if entry.size(region) >= size {
                break;
            }
            before = Some(entry);
            after = entry.link_next(region);
        }

        block.set_link_prev(region, before);
        block.set_link_next(region, after);
        if let Some(after) = after {
            after.set_link_prev(region, Some(block));
        }
        match before {
            Some(before) => before.set_link_next(region, Some(block)),
            None => self.heads[bucket] = block.0,
        }
    }

    /// Unthread `block` from whichever bucket holds it, re-derived from its
    /// header size. The block must currently be free and threaded in.
    pub fn remove<R: HeapRegion>(&mut self, region: &mut R, block: Block) {
        let size = block.size(region);
        let bucket = FreeIndex::bucket_for(size);
        trace!("index: remove {:?} size {} from bucket {}", block, size, bucket);

        let before = block.link_prev(region);
        let after = block.link_next(region);
        match before {
            Some(before) => before.set_link_next(region, after),
            None => self.heads[bucket] = after.map_or(0, |b| b.0),
        }
        if let Some(after) = after {
            after.set_link_prev(region, before);
        }
    }

    /// First-fit search: starting at the bucket for `size`, scan buckets from
    /// smallest to largest for the first free block that is large enough and
    /// does not carry the resize-tag. Tagged blocks are provisionally
    /// reserved by a prior resize and skipped even when they would fit.
    pub fn find<R: HeapRegion>(&self, region: &R, size: u32) -> Option<Block> {
        for bucket in FreeIndex::bucket_for(size)..BUCKETS {
            let mut cursor = self.head(bucket);
            while let Some(entry) = cursor {
                if entry.size(region) >= size && !entry.is_tagged(region) {
                    return Some(entry);
                }
                cursor = entry.link_next(region);
            }
        }
        None
    }

    /// Total number of blocks threaded into the index.
    pub fn len<R: HeapRegion>(&self, region: &R) -> usize {
        let mut count = 0;
        for bucket in 0..BUCKETS {
            let mut cursor = self.head(bucket);
            while let Some(entry) = cursor {
                count += 1;
                cursor = entry.link_next(region);
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.heads.iter().all(|&head| head == 0)
    }

    /// Whether `block` is threaded into the bucket for its size.
    pub fn contains<R: HeapRegion>(&self, region: &R, block: Block) -> bool {
        let mut cursor = self.head(FreeIndex::bucket_for(block.size(region)));
        while let Some(entry) = cursor {
            if entry == block {
                return true;
            }
            cursor = entry.link_next(region);
        }
        false
    }
}
