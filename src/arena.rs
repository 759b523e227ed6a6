//! The heap region: a single contiguous, append-only byte range.
//!
//! The allocator core never talks to the platform directly; it goes through
//! the [`HeapRegion`](trait.HeapRegion.html) trait, which exposes exactly one
//! growth operation plus word-granularity access to the managed bytes. This
//! keeps the core testable: a region backed by a plain `Vec<u8>` with a
//! configurable cap ([`BoundedHeap`](struct.BoundedHeap.html)) behaves the
//! same as anything fancier would.
//!
//! Blocks are identified by byte offsets into the region rather than raw
//! pointers, so growing the backing storage never invalidates a handle.

use core::fmt;

use log::debug;

/// The error returned when a region cannot be extended any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapExhausted {
    /// The number of bytes the failed extension asked for.
    pub requested: usize,
}

impl fmt::Display for HeapExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "heap exhausted growing by {} bytes", self.requested)
    }
}

impl std::error::Error for HeapExhausted {}

/// A contiguous, append-only byte range managed by the allocator.
///
/// The region only ever grows; nothing is handed back to the platform. All
/// metadata the allocator keeps - boundary tags and free-list links - lives
/// in-band, read and written through the word helpers here as little-endian
/// `u32` values at 4-byte-aligned offsets.
///
/// Offsets are 32-bit, so an implementation must never let the region exceed
/// `u32::MAX` bytes: `extend` has to fail first, the way
/// [`BoundedHeap`](struct.BoundedHeap.html) clamps its limit.
pub trait HeapRegion {
    type Err;

    /// Extend the managed range by exactly `bytes`, returning the offset of
    /// the first new byte. The new bytes are contiguous with the prior end
    /// and zeroed.
    ///
    /// Callers guarantee `bytes` is a multiple of 8 (an even number of
    /// words); implementations may rely on that for alignment.
    fn extend(&mut self, bytes: usize) -> Result<u32, Self::Err>;

    /// The managed bytes.
    fn bytes(&self) -> &[u8];

    /// The managed bytes, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];

    /// Current length of the region, in bytes.
    fn len(&self) -> u32 {
        let len = self.bytes().len();
        debug_assert!(
            len <= u32::MAX as usize,
            "regions are offset-addressed in 32 bits"
        );
        len as u32
    }

    /// True before the first extension.
    fn is_empty(&self) -> bool {
        self.bytes().is_empty()
    }

    /// Read the word at `offset`.
    fn word(&self, offset: u32) -> u32 {
        let at = offset as usize;
        let b = &self.bytes()[at..at + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    /// Write the word at `offset`.
    fn set_word(&mut self, offset: u32, value: u32) {
        let at = offset as usize;
        self.bytes_mut()[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Copy `len` bytes from `src` to `dst`, handling overlap like `memmove`.
    fn copy(&mut self, src: u32, dst: u32, len: u32) {
        let (src, dst, len) = (src as usize, dst as usize, len as usize);
        self.bytes_mut().copy_within(src..src + len, dst);
    }
}

/// The default initial cap for a [`BoundedHeap`]: 256 KiB.
pub const DEFAULT_LIMIT: usize = 256 * 1024;

/// A `Vec`-backed heap region with a hard byte limit, standing in for a
/// platform with a maximum heap size.
#[derive(Debug)]
pub struct BoundedHeap {
    bytes: Vec<u8>,
    limit: usize,
    // Just for tracking, not really needed
    growths: usize,
}

impl Default for BoundedHeap {
    fn default() -> Self {
        BoundedHeap::with_limit(DEFAULT_LIMIT)
    }
}

impl BoundedHeap {
    /// Create an empty region that will refuse to grow past `limit` bytes.
    ///
    /// Offsets into a region are 32-bit, so limits beyond `u32::MAX` are
    /// clamped.
    pub fn with_limit(limit: usize) -> Self {
        BoundedHeap {
            bytes: Vec::new(),
            limit: limit.min(u32::MAX as usize),
            growths: 0,
        }
    }

    /// The configured byte limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// How many times the region has been successfully extended.
    pub fn growths(&self) -> usize {
        self.growths
    }
}

impl HeapRegion for BoundedHeap {
    type Err = HeapExhausted;

    fn extend(&mut self, bytes: usize) -> Result<u32, HeapExhausted> {
        let old_end = self.bytes.len();
        if old_end + bytes > self.limit {
            return Err(HeapExhausted { requested: bytes });
        }

        self.bytes.resize(old_end + bytes, 0);
        self.growths += 1;
        debug!(
            "extended heap by {} bytes to {} (growth #{})",
            bytes,
            self.bytes.len(),
            self.growths
        );
        Ok(old_end as u32)
    }

    fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}
