//! The allocator core: allocate, release, and resize over a heap region.
//!
//! ## Basic Types
//!
//! ### [`Allocator`](struct.Allocator.html)
//!
//! An `Allocator` owns a [`HeapRegion`](../arena/trait.HeapRegion.html) and
//! services requests from its segregated free-list index, falling back to
//! growing the region when no free block fits. It is single-threaded and
//! synchronous: every operation runs to completion, and the only operation
//! that can fail is heap growth.
//!
//! ### [`Validity`](struct.Validity.html) and [`Stats`](struct.Stats.html)
//!
//! `Allocator::stats` walks the heap from prologue to epilogue and reports
//! every broken invariant it can detect, along with block and byte counts.
//! The tests call it after every operation.

use core::convert::TryFrom;
use core::fmt;

use log::debug;

use crate::arena::HeapRegion;
use crate::blocks::{
    adjusted_size, Block, BoundaryTag, CHUNK_SIZE, DWORD, MAX_REQUEST, MIN_BLOCK, RESIZE_SLACK,
    WORD,
};
use crate::index::FreeIndex;

/// A segregated-fit allocator over a single growable heap region.
///
/// Handles returned by [`allocate`](#method.allocate) and
/// [`resize`](#method.resize) identify the usable payload; the payload bytes
/// are reached through [`payload`](#method.payload) and
/// [`payload_mut`](#method.payload_mut).
///
/// Releasing a handle twice, or releasing or resizing a handle that was never
/// returned by this allocator, is not detected: like the manual-memory
/// contract being modeled, it corrupts the heap. Unlike that contract it
/// cannot corrupt anything *else* - all metadata lives inside the owned
/// region, and every access is bounds-checked.
#[derive(Debug)]
pub struct Allocator<R> {
    region: R,
    index: FreeIndex,
    prologue: Block,
}

impl<R: HeapRegion> Allocator<R> {
    /// Initialize an allocator over `region`: lay down the prologue and
    /// epilogue sentinels and grow the heap by one initial chunk.
    ///
    /// The region must be empty; the sentinels go at its base.
    pub fn new(mut region: R) -> Result<Self, R::Err> {
        assert!(region.is_empty(), "Allocator requires an unused region");

        let base = region.extend(4 * WORD as usize)?;
        // One word of padding, so payloads land on double-word boundaries
        // and offset 0 stays free for the nil link.
        region.set_word(base, 0);
        // The prologue: a permanently allocated block of bare header+footer,
        // so the first real block always has an allocated neighbor behind it.
        region.set_word(base + WORD, BoundaryTag::pack(DWORD, true).raw());
        region.set_word(base + 2 * WORD, BoundaryTag::pack(DWORD, true).raw());
        // The epilogue: a zero-size allocated header terminating the heap.
        // Every growth moves it to the new end.
        region.set_word(base + 3 * WORD, BoundaryTag::pack(0, true).raw());

        let mut allocator = Allocator {
            region,
            index: FreeIndex::default(),
            prologue: Block(base + DWORD),
        };
        allocator.extend_heap(CHUNK_SIZE)?;
        Ok(allocator)
    }

    /// The underlying region.
    pub fn region(&self) -> &R {
        &self.region
    }

    /// Allocate a block with room for `size` payload bytes.
    ///
    /// Returns `None` if `size` is zero (a no-op, by contract) or if the
    /// region cannot grow far enough; a failed growth leaves every existing
    /// block untouched.
    pub fn allocate(&mut self, size: usize) -> Option<Block> {
        if size == 0 {
            return None;
        }
        let request = u32::try_from(size).ok().filter(|&r| r <= MAX_REQUEST)?;
        let adjusted = adjusted_size(request);
        debug!("allocate({}) -> block size {}", size, adjusted);

        let block = match self.index.find(&self.region, adjusted) {
            Some(block) => block,
            None => self.extend_heap(adjusted.max(CHUNK_SIZE)).ok()?,
        };

        self.place(block, adjusted);
        debug!("allocate({}) = {:?}", size, block);
        Some(block)
    }

    /// Release a previously allocated block: mark it free, thread it into
    /// the index, and merge it with any mergeable neighbors.
    pub fn release(&mut self, block: Block) {
        let size = block.size(&self.region);
        debug!("release({:?}) size {}", block, size);

        // The neighbor's reservation is moot now that a free block sits
        // beside it again.
        block.next(&self.region).clear_tag(&mut self.region);

        block.format(&mut self.region, size, false);
        self.index.insert(&mut self.region, block);
        self.coalesce(block);
    }

    /// Resize `block` to hold `size` payload bytes, in place when possible.
    ///
    /// Shrinking (or resizing within the block's current capacity) never
    /// moves data. Growing first tries to absorb the following block if it
    /// is free or the heap-end sentinel - extending the heap when absorption
    /// alone is not enough - and only then falls back to
    /// allocate-copy-release, so the returned handle may differ from
    /// `block`.
    ///
    /// A `size` of zero returns `None` *without* releasing the block; it is
    /// a no-op, not a free.
    pub fn resize(&mut self, block: Block, size: usize) -> Option<Block> {
        if size == 0 {
            return None;
        }
        let request = u32::try_from(size).ok().filter(|&r| r <= MAX_REQUEST)?;
        let adjusted = adjusted_size(request);
        // Everything on the growth path aims past the adjusted size by a
        // fixed slack, betting that a block resized once will resize again.
        let target = adjusted + RESIZE_SLACK;
        debug!("resize({:?}, {}) -> block size {}", block, size, adjusted);

        let block = if block.size(&self.region) >= adjusted {
            block
        } else {
            let next = block.next(&self.region);
            if !next.is_allocated(&self.region) || next.is_epilogue(&self.region) {
                let combined = block.size(&self.region) + next.size(&self.region);
                if combined < target {
                    // Any reservation on `next` is ours, from an earlier
                    // resize of this same block; clear it so the grown span
                    // can merge into it.
                    let reserved = next.is_tagged(&self.region);
                    next.clear_tag(&mut self.region);
                    let missing = target - combined;
                    if self.extend_heap(missing.max(CHUNK_SIZE)).is_err() {
                        // Failed growth must leave nothing changed; put the
                        // reservation back.
                        if reserved {
                            next.set_tag(&mut self.region);
                        }
                        return None;
                    }
                }
                // Growth wrote a free block past `block` (merged into `next`
                // if that was already free), so re-read the neighbor.
                let next = block.next(&self.region);
                self.index.remove(&mut self.region, next);
                let combined = block.size(&self.region) + next.size(&self.region);
                // Absorb the whole neighbor; no split.
                block.format_clear(&mut self.region, combined, true);
                block
            } else {
                // The neighbor is in use: move. `target - DWORD` adjusts
                // back up to exactly `target`, slack included.
                let moved = self.allocate((target - DWORD) as usize)?;
                let old_payload = block.size(&self.region) - DWORD;
                self.region
                    .copy(block.offset(), moved.offset(), old_payload.min(request));
                self.release(block);
                moved
            }
        };

        // If little slack remains, reserve the neighbor against casual
        // reuse: allocation and coalescing both skip tagged blocks.
        let remaining = i64::from(block.size(&self.region)) - i64::from(target);
        if remaining < 2 * i64::from(RESIZE_SLACK) {
            block.next(&self.region).set_tag(&mut self.region);
        }
        debug!("resize(.., {}) = {:?}", size, block);
        Some(block)
    }

    /// The payload bytes of an allocated block.
    pub fn payload(&self, block: Block) -> &[u8] {
        let start = block.offset() as usize;
        let end = start + (block.size(&self.region) - DWORD) as usize;
        &self.region.bytes()[start..end]
    }

    /// The payload bytes of an allocated block, mutably.
    pub fn payload_mut(&mut self, block: Block) -> &mut [u8] {
        let start = block.offset() as usize;
        let end = start + (block.size(&self.region) - DWORD) as usize;
        &mut self.region.bytes_mut()[start..end]
    }

    /// Grow the heap by at least `size` bytes (rounded to an even number of
    /// words), format the new span as one free block, and coalesce it with
    /// the block that used to sit at the heap's end.
    fn extend_heap(&mut self, size: u32) -> Result<Block, R::Err> {
        let words = size / WORD;
        let size = if words % 2 == 1 {
            (words + 1) * WORD
        } else {
            words * WORD
        };

        let offset = self.region.extend(size as usize)?;
        debug!("extend_heap({}) at offset {}", size, offset);

        // The old epilogue header becomes the new block's header, and a
        // fresh epilogue goes down at the new end.
        let block = Block(offset);
        block.format_clear(&mut self.region, size, false);
        let end = block.next(&self.region);
        self.region
            .set_word(end.offset() - WORD, BoundaryTag::pack(0, true).raw());

        self.index.insert(&mut self.region, block);
        Ok(self.coalesce(block))
    }

    /// Carve `size` bytes out of free `block`: unthread it, and split off
    /// the tail as a new free block if what remains is big enough to stand
    /// alone.
    fn place(&mut self, block: Block, size: u32) {
        let total = block.size(&self.region);
        let remainder = total - size;
        self.index.remove(&mut self.region, block);

        if remainder >= MIN_BLOCK {
            block.format(&mut self.region, size, true);
            let rest = block.next(&self.region);
            rest.format_clear(&mut self.region, remainder, false);
            self.index.insert(&mut self.region, rest);
        } else {
            // Too small to split; the caller eats the difference.
            block.format(&mut self.region, total, true);
        }
    }

    /// Merge the newly freed `block` with its mergeable neighbors, keeping
    /// the no-two-adjacent-free-blocks invariant. A neighbor is mergeable
    /// only if it is free *and* untagged: a resize-tagged block is reserved,
    /// and treated as allocated here.
    ///
    /// Returns the handle of the merged span.
    fn coalesce(&mut self, block: Block) -> Block {
        let region = &self.region;
        let prev = block.prev(region);
        let next = block.next(region);
        let prev_mergeable = !prev.is_allocated(region) && !prev.is_tagged(region);
        let next_mergeable = !next.is_allocated(region) && !next.is_tagged(region);

        if !prev_mergeable && !next_mergeable {
            return block;
        }

        let mut merged = block;
        let mut size = block.size(&self.region);
        self.index.remove(&mut self.region, block);
        if next_mergeable {
            size += next.size(&self.region);
            self.index.remove(&mut self.region, next);
        }
        if prev_mergeable {
            size += prev.size(&self.region);
            self.index.remove(&mut self.region, prev);
            merged = prev;
        }

        merged.format(&mut self.region, size, false);
        self.index.insert(&mut self.region, merged);
        merged
    }

    /// Walk the heap and report validity and usage statistics.
    pub fn stats(&self) -> (Validity, Stats) {
        let region = &self.region;
        let mut validity = Validity::default();
        let mut stats = Stats::default();

        let mut block = self.prologue.next(region);
        let mut previous_free = false;
        let mut previous_tagged = false;
        while !block.is_epilogue(region) {
            let header = block.header(region);
            let footer = block.footer(region);
            if header.size() != footer.size() || header.is_allocated() != footer.is_allocated() {
                // The footer can't be trusted, but the header still moves
                // the walk forward.
                validity.mismatched_tags += 1;
            }

            let free = !header.is_allocated();
            if free {
                stats.free_blocks += 1;
                stats.free_bytes += header.size() as usize;
                // Two adjacent free blocks are a coalescing failure, unless
                // one of them carries the resize-tag: a reservation is left
                // unmerged on purpose.
                if previous_free {
                    if previous_tagged || header.is_tagged() {
                        validity.reserved_adjacents += 1;
                    } else {
                        validity.adjacent_frees += 1;
                    }
                }
                if !self.index.contains(region, block) {
                    validity.unindexed_frees += 1;
                }
            } else {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += header.size() as usize;
            }

            previous_free = free;
            previous_tagged = header.is_tagged();
            block = block.next(region);
        }

        // Conservation: the epilogue's payload offset is the heap end, so
        // every byte past the sentinels belongs to exactly one block.
        if block.offset() != region.len() {
            validity.lost_bytes =
                (i64::from(region.len()) - i64::from(block.offset())).unsigned_abs() as usize;
        }

        // Membership: with every listed free block accounted for above, a
        // count mismatch means the index holds something it shouldn't.
        let indexed = self.index.len(region);
        if indexed != stats.free_blocks {
            validity.index_skew = indexed.max(stats.free_blocks) - indexed.min(stats.free_blocks);
        }

        (validity, stats)
    }
}

impl<R: HeapRegion> fmt::Display for Allocator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocator(")?;
        let mut block = self.prologue.next(&self.region);
        let mut start = true;
        while !block.is_epilogue(&self.region) {
            if !start {
                write!(f, ", ")?;
            } else {
                start = false;
            }
            let header = block.header(&self.region);
            write!(
                f,
                "Block({}, {}, {}{})",
                block.offset(),
                header.size(),
                if header.is_allocated() { "a" } else { "f" },
                if header.is_tagged() { ", tagged" } else { "" },
            )?;
            block = block.next(&self.region);
        }
        write!(f, ")")
    }
}

/// Validity holds a representation of all invalid heap states found by
/// [`Allocator::stats`](struct.Allocator.html#method.stats).
#[derive(Default, Debug)]
pub struct Validity {
    /// Blocks whose header and footer disagree on size or allocation state.
    ///
    /// This likely indicates corruption.
    pub mismatched_tags: usize,

    /// Pairs of neighboring free blocks with neither side resize-tagged.
    /// Coalescing should make this impossible.
    pub adjacent_frees: usize,

    /// Pairs of neighboring free blocks where one side is resize-tagged.
    /// These are deliberate reservations, not corruption, and do not make
    /// the heap invalid; they are reported for visibility.
    pub reserved_adjacents: usize,

    /// Free blocks not threaded into the index.
    pub unindexed_frees: usize,

    /// Difference between the index's population and the number of free
    /// blocks in the heap.
    pub index_skew: usize,

    /// Bytes between the prologue and the region end covered by no block.
    pub lost_bytes: usize,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        self.mismatched_tags == 0
            && self.adjacent_frees == 0
            && self.unindexed_frees == 0
            && self.index_skew == 0
            && self.lost_bytes == 0
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

/// Block and byte counts from a heap walk, sentinels excluded.
#[derive(Default, Debug)]
pub struct Stats {
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::arena::{BoundedHeap, HeapExhausted};

    use test_log::test;

    fn new_allocator() -> Allocator<BoundedHeap> {
        Allocator::new(BoundedHeap::default()).unwrap()
    }

    fn assert_valid(allocator: &Allocator<BoundedHeap>) {
        let (validity, _stats) = allocator.stats();
        assert!(
            validity.is_valid(),
            "invalid heap: {:?}\n{}",
            validity,
            allocator
        );
    }

    #[test]
    fn test_initialize() {
        let allocator = new_allocator();
        assert_valid(&allocator);

        let (_validity, stats) = allocator.stats();
        // One chunk-sized free block and nothing else.
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.free_bytes, CHUNK_SIZE as usize);
        assert_eq!(stats.allocated_blocks, 0);
        // Sentinels plus one chunk.
        assert_eq!(allocator.region().len(), 4 * WORD + CHUNK_SIZE);
    }

    #[test]
    fn test_allocate_zero_is_noop() {
        let mut allocator = new_allocator();
        let before = allocator.region().growths();

        assert_eq!(allocator.allocate(0), None);
        assert_eq!(allocator.region().growths(), before);
        assert_valid(&allocator);
    }

    #[test]
    fn test_allocate_writable_payloads() {
        let mut allocator = new_allocator();

        let sizes = [100usize, 200, 24, 1000];
        let mut blocks = Vec::new();
        for (i, &size) in sizes.iter().enumerate() {
            let block = allocator.allocate(size).unwrap();
            assert!(allocator.payload(block).len() >= size);
            for b in allocator.payload_mut(block)[..size].iter_mut() {
                *b = i as u8 + 1;
            }
            blocks.push(block);
            assert_valid(&allocator);
        }

        // Unique handles, and no write bled into another block's payload.
        for (i, &block) in blocks.iter().enumerate() {
            for &other in &blocks[i + 1..] {
                assert_ne!(block, other);
            }
            assert!(allocator.payload(block)[..sizes[i]]
                .iter()
                .all(|&b| b == i as u8 + 1));
        }
    }

    #[test]
    fn test_release_reuses_block() {
        let mut allocator = new_allocator();

        let a = allocator.allocate(100).unwrap();
        let _b = allocator.allocate(200).unwrap();
        assert_valid(&allocator);

        allocator.release(a);
        assert_valid(&allocator);

        let growths = allocator.region().growths();
        // 90 rounds up to no more than a's 112-byte block, so the freed
        // block is reused rather than the heap growing.
        let c = allocator.allocate(90).unwrap();
        assert_eq!(c, a);
        assert_eq!(allocator.region().growths(), growths);
        assert_valid(&allocator);
    }

    #[test]
    fn test_release_coalesces() {
        let mut allocator = new_allocator();

        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        let c = allocator.allocate(64).unwrap();
        // Keep the tail of the chunk from merging into c.
        let _plug = allocator.allocate(64).unwrap();

        allocator.release(a);
        allocator.release(c);
        assert_valid(&allocator);
        let (_validity, stats) = allocator.stats();
        assert_eq!(stats.free_blocks, 3);

        // Freeing b bridges all three into one span.
        allocator.release(b);
        assert_valid(&allocator);
        let (_validity, stats) = allocator.stats();
        assert_eq!(stats.free_blocks, 2);

        // And the merged span starts where a did.
        let big = allocator.allocate(3 * 72 - 8).unwrap();
        assert_eq!(big, a);
        assert_valid(&allocator);
    }

    #[test]
    fn test_allocate_grows_once_for_large_request() {
        let mut allocator = new_allocator();
        let growths = allocator.region().growths();
        let len = allocator.region().len();

        let size = (CHUNK_SIZE * 2) as usize;
        let block = allocator.allocate(size).unwrap();
        assert_eq!(allocator.region().growths(), growths + 1);
        // The single growth covered at least the full adjusted block size.
        assert!(allocator.region().len() >= len + adjusted_size(size as u32));
        assert!(allocator.payload(block).len() >= size);
        assert_valid(&allocator);
    }

    #[test]
    fn test_allocate_out_of_memory() {
        let limit = 4 * WORD as usize + CHUNK_SIZE as usize;
        let mut allocator = Allocator::new(BoundedHeap::with_limit(limit)).unwrap();

        // The initial chunk is all there is; a block bigger than it fails...
        let (_validity, before) = allocator.stats();
        assert_eq!(allocator.allocate(2 * CHUNK_SIZE as usize), None);
        assert_valid(&allocator);

        // ...with no partial state change.
        let (_validity, after) = allocator.stats();
        assert_eq!(before.free_blocks, after.free_blocks);
        assert_eq!(before.free_bytes, after.free_bytes);

        // And what fits still works.
        assert!(allocator.allocate(64).is_some());
        assert_valid(&allocator);
    }

    #[test]
    fn test_initialize_out_of_memory() {
        let err = Allocator::new(BoundedHeap::with_limit(64)).unwrap_err();
        assert_eq!(
            err,
            HeapExhausted {
                requested: CHUNK_SIZE as usize
            }
        );
    }

    #[test]
    fn test_failed_resize_keeps_reservation() {
        let limit = 4 * WORD as usize + CHUNK_SIZE as usize;
        let mut allocator = Allocator::new(BoundedHeap::with_limit(limit)).unwrap();

        let a = allocator.allocate(40).unwrap();
        // An in-capacity resize reserves the free block that follows.
        assert_eq!(allocator.resize(a, 40), Some(a));
        let neighbor = a.next(allocator.region());
        assert!(neighbor.is_tagged(allocator.region()));
        assert!(!neighbor.is_allocated(allocator.region()));

        let (_validity, before) = allocator.stats();

        // Growing past what the region can hold fails...
        assert_eq!(allocator.resize(a, 2 * CHUNK_SIZE as usize), None);
        assert_valid(&allocator);

        // ...and leaves the reservation, and everything else, as it was.
        assert!(neighbor.is_tagged(allocator.region()));
        let (_validity, after) = allocator.stats();
        assert_eq!(before.free_blocks, after.free_blocks);
        assert_eq!(before.free_bytes, after.free_bytes);

        // The reserved block still can't be stolen by a fresh allocation.
        assert_eq!(allocator.allocate(16), None);
    }

    #[test]
    fn test_resize_zero_is_noop_not_release() {
        let mut allocator = new_allocator();

        let block = allocator.allocate(100).unwrap();
        for b in allocator.payload_mut(block)[..100].iter_mut() {
            *b = 7;
        }
        let (_validity, before) = allocator.stats();

        assert_eq!(allocator.resize(block, 0), None);
        assert_valid(&allocator);

        // The block was not freed and its payload is intact.
        let (_validity, after) = allocator.stats();
        assert_eq!(before.allocated_blocks, after.allocated_blocks);
        assert!(allocator.payload(block)[..100].iter().all(|&b| b == 7));
    }

    #[test]
    fn test_resize_shrink_in_place() {
        let mut allocator = new_allocator();

        let x = allocator.allocate(50).unwrap();
        for b in allocator.payload_mut(x)[..50].iter_mut() {
            *b = 3;
        }

        let shrunk = allocator.resize(x, 40).unwrap();
        assert_eq!(shrunk, x);
        assert!(allocator.payload(shrunk)[..40].iter().all(|&b| b == 3));
        assert_valid(&allocator);
    }

    #[test]
    fn test_resize_grows_in_place_into_free_neighbor() {
        let mut allocator = new_allocator();

        let x = allocator.allocate(64).unwrap();
        let y = allocator.allocate(512).unwrap();
        let _plug = allocator.allocate(64).unwrap();
        for b in allocator.payload_mut(x).iter_mut() {
            *b = 9;
        }
        allocator.release(y);
        assert_valid(&allocator);

        // y's old block sits right after x and is big enough to absorb.
        let grown = allocator.resize(x, 256).unwrap();
        assert_eq!(grown, x);
        assert!(allocator.payload(grown).len() >= 256);
        assert!(allocator.payload(grown)[..64].iter().all(|&b| b == 9));
        assert_valid(&allocator);
    }

    #[test]
    fn test_resize_grows_at_heap_end() {
        let mut allocator = new_allocator();

        // Consume the whole initial chunk, leaving x against the epilogue.
        let x = allocator.allocate(CHUNK_SIZE as usize - 8).unwrap();
        for b in allocator.payload_mut(x)[..64].iter_mut() {
            *b = 5;
        }
        let growths = allocator.region().growths();

        let grown = allocator.resize(x, 2 * CHUNK_SIZE as usize).unwrap();
        // In place: the heap was extended rather than the block moved.
        assert_eq!(grown, x);
        assert_eq!(allocator.region().growths(), growths + 1);
        assert!(allocator.payload(grown)[..64].iter().all(|&b| b == 5));
        assert_valid(&allocator);
    }

    #[test]
    fn test_resize_moves_past_allocated_neighbor() {
        let mut allocator = new_allocator();

        let x = allocator.allocate(64).unwrap();
        let _wall = allocator.allocate(CHUNK_SIZE as usize - 72 - 8).unwrap();
        for b in allocator.payload_mut(x).iter_mut() {
            *b = 11;
        }

        let moved = allocator.resize(x, 600).unwrap();
        assert_ne!(moved, x);
        assert!(allocator.payload(moved).len() >= 600);
        // Only the old payload's worth of bytes carried over.
        assert!(allocator.payload(moved)[..64].iter().all(|&b| b == 11));
        assert_valid(&allocator);
    }

    #[test]
    fn test_resize_tags_neighbor_against_reuse() {
        let mut allocator = new_allocator();

        let x = allocator.allocate(64).unwrap();
        let y = allocator.allocate(512).unwrap();
        let _plug = allocator.allocate(64).unwrap();
        allocator.release(y);

        // Growing x leaves less than twice the slack to spare, so the
        // following block gets reserved.
        let grown = allocator.resize(x, 400).unwrap();
        assert_eq!(grown, x);
        let neighbor = grown.next(allocator.region());
        assert!(neighbor.is_tagged(allocator.region()));
        assert_valid(&allocator);

        // An unrelated allocation that would fit in the tagged block must
        // not steal it.
        if !neighbor.is_allocated(allocator.region()) {
            let other = allocator.allocate(16).unwrap();
            assert_ne!(other, neighbor);
            assert_valid(&allocator);
        }

        // Releasing the resized block lifts the reservation.
        allocator.release(grown);
        assert!(!neighbor.is_tagged(allocator.region()));
        assert_valid(&allocator);
    }

    #[test]
    fn test_tagged_predecessor_not_merged() {
        let mut allocator = new_allocator();

        let x = allocator.allocate(64).unwrap();
        let _wall = allocator.allocate(64).unwrap();
        let hole = allocator.allocate(600).unwrap();
        let z = allocator.allocate(64).unwrap();
        // Pin down the rest of the chunk.
        let _plug = allocator.allocate(3100).unwrap();
        allocator.release(hole);

        // With x walled in, resizing it moves it into the freed hole,
        // splitting off a remainder that gets reserved (tagged).
        let moved = allocator.resize(x, 400).unwrap();
        assert_ne!(moved, x);
        assert_eq!(moved, hole);
        let reserved = moved.next(allocator.region());
        assert!(reserved.is_tagged(allocator.region()));
        assert!(!reserved.is_allocated(allocator.region()));
        let reserved_size = reserved.size(allocator.region());

        // Freeing z leaves the reserved block as its predecessor; the two
        // must not merge.
        allocator.release(z);
        assert_eq!(reserved.size(allocator.region()), reserved_size);

        // The heap now holds two adjacent free blocks, but on purpose: one
        // of them is reserved. stats() reports that and nothing else.
        let (validity, _stats) = allocator.stats();
        assert!(validity.is_valid(), "{:?}", validity);
        assert_eq!(validity.reserved_adjacents, 1);
        assert_eq!(validity.adjacent_frees, 0);
    }

    #[test]
    fn test_conservation_across_operations() {
        let mut allocator = new_allocator();

        let a = allocator.allocate(100).unwrap();
        let b = allocator.allocate(2000).unwrap();
        let c = allocator.allocate(30).unwrap();
        allocator.release(b);
        let c = allocator.resize(c, 5000).unwrap();
        allocator.release(a);
        allocator.release(c);

        let (validity, stats) = allocator.stats();
        assert!(validity.is_valid(), "{:?}", validity);
        // Every byte past the sentinels is in exactly one block.
        assert_eq!(
            stats.allocated_bytes + stats.free_bytes,
            allocator.region().len() as usize - 4 * WORD as usize,
        );
    }
}
