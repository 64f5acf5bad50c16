//! # Lock-Free List Allocator
//!
//! The simplest free-list-style allocator in the family: every block sits
//! on a single atomic free list, and allocation pops blocks off that list
//! until one is large enough, pushing the rejects straight back.
//!
//! The region is partitioned at construction into caller-specified block
//! sizes - mixed sizes are fine - and blocks are never split or coalesced
//! afterwards. That makes the allocator wait-free-ish in the common case
//! and completely free of locks, at the price of internal fragmentation.
//!
//! ## Progress
//!
//! Push and pop are compare-and-swap loops with unbounded retry: no
//! blocking and no priority inversion, but live-lock is theoretically
//! possible under pathological contention and is bounded only by practical
//! CAS success probability. The head carries a generation tag against ABA.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::context::MemoryRegion;
use crate::error::{MemoryError, MemoryResult};
use crate::pool::{AtomicFreeChain, BlockIndex};
use crate::region::SharedRegion;

/// Fixed geometry of one partitioned block.
#[derive(Clone, Copy, Debug)]
struct Partition {
    /// Block start offset in the region.
    offset: usize,
    /// Block size in bytes.
    size: usize,
}

/// Point-in-time usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockFreeListStats {
    /// Total region capacity in bytes.
    pub capacity: usize,
    /// Number of partitioned blocks.
    pub block_count: usize,
    /// Blocks currently on the free list.
    pub free_count: usize,
    /// Bytes currently allocated (whole blocks).
    pub used_bytes: usize,
}

/// A variable-block allocator over one atomic free list.
///
/// # Example
///
/// ```rust,ignore
/// let list = LockFreeListAllocator::new(
///     ctx.acquire_region(64 * 1024)?,
///     &[(256, 64), (4096, 8)],
/// )?;
///
/// let block = list.allocate(1000)?; // lands in a 4096-byte partition
/// list.deallocate(block);
/// ```
pub struct LockFreeListAllocator {
    /// The backing bytes, shared between concurrently-owned blocks.
    region: SharedRegion,
    /// Immutable block geometry, indexed by block id.
    partitions: Box<[Partition]>,
    /// The single atomic free list over all partitions.
    chain: AtomicFreeChain,
    /// Bytes currently allocated.
    used_bytes: AtomicUsize,
}

impl LockFreeListAllocator {
    /// Partitions an acquired region into `(size, count)` runs, all of
    /// them pushed onto one free list.
    ///
    /// # Errors
    ///
    /// [`MemoryError::RegionTooSmall`] when the partitions do not fit the
    /// region, or no partitions were requested.
    pub fn new(region: MemoryRegion, layout: &[(usize, usize)]) -> MemoryResult<Self> {
        let capacity = region.len();
        let required: usize = layout.iter().map(|&(size, count)| size * count).sum();
        let block_total: usize = layout.iter().map(|&(_, count)| count).sum();
        if block_total == 0 || required > capacity || layout.iter().any(|&(size, _)| size == 0) {
            return Err(MemoryError::RegionTooSmall {
                required: required.max(1),
                capacity,
            });
        }

        let mut partitions = Vec::with_capacity(block_total);
        let mut offset = 0;
        for &(size, count) in layout {
            for _ in 0..count {
                partitions.push(Partition { offset, size });
                offset += size;
            }
        }

        Ok(Self {
            region: SharedRegion::new(region),
            partitions: partitions.into_boxed_slice(),
            chain: AtomicFreeChain::full(block_total as u32),
            used_bytes: AtomicUsize::new(0),
        })
    }

    /// Allocates the first popped block of at least `size` bytes.
    ///
    /// Blocks too small for the request are popped and pushed straight
    /// back, so a burst of mismatched requests degrades to a scan - the
    /// documented price of a single shared list.
    #[must_use]
    pub fn allocate(&self, size: usize) -> Option<BlockIndex> {
        if size == 0 {
            tracing::warn!("zero-size allocation refused");
            return None;
        }
        let mut rejected = Vec::new();
        let found = loop {
            match self.chain.pop() {
                Some(index) if self.partitions[index as usize].size >= size => {
                    break Some(BlockIndex(index));
                }
                Some(index) => rejected.push(index),
                None => break None,
            }
        };
        for index in rejected {
            self.chain.push(index);
        }
        if let Some(block) = found {
            self.used_bytes
                .fetch_add(self.partitions[block.0 as usize].size, Ordering::Relaxed);
        }
        found
    }

    /// Returns a block to the free list. `false` for an out-of-range index.
    pub fn deallocate(&self, block: BlockIndex) -> bool {
        if block.0 as usize >= self.partitions.len() {
            tracing::warn!(index = block.0, "block index outside allocator");
            return false;
        }
        self.used_bytes
            .fetch_sub(self.partitions[block.0 as usize].size, Ordering::Relaxed);
        self.chain.push(block.0);
        true
    }

    /// Size of one block in bytes.
    #[must_use]
    pub fn block_size(&self, block: BlockIndex) -> Option<usize> {
        self.partitions.get(block.0 as usize).map(|p| p.size)
    }

    /// Copies `bytes` into the block (prefix write).
    pub fn write_bytes(&self, block: BlockIndex, bytes: &[u8]) -> bool {
        let Some(partition) = self.partitions.get(block.0 as usize) else {
            return false;
        };
        if bytes.len() > partition.size {
            return false;
        }
        // SAFETY: range is inside the region; the caller owns this block's
        // handle, so no overlapping view exists (region module Safety Note).
        #[allow(unsafe_code)]
        let target = unsafe { self.region.slice_mut(partition.offset, bytes.len()) };
        target.copy_from_slice(bytes);
        true
    }

    /// Copies the block's bytes out (whole block).
    #[must_use]
    pub fn read_bytes(&self, block: BlockIndex) -> Option<Vec<u8>> {
        let partition = self.partitions.get(block.0 as usize)?;
        // SAFETY: as in `write_bytes`.
        #[allow(unsafe_code)]
        let source = unsafe { self.region.slice(partition.offset, partition.size) };
        Some(source.to_vec())
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> LockFreeListStats {
        LockFreeListStats {
            capacity: self.region.len(),
            block_count: self.partitions.len(),
            free_count: self.chain.free_count() as usize,
            used_bytes: self.used_bytes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;

    fn list_with(layout: &[(usize, usize)]) -> LockFreeListAllocator {
        let capacity: usize = layout.iter().map(|&(s, c)| s * c).sum();
        let ctx = MemoryContext::new();
        LockFreeListAllocator::new(ctx.acquire_region(capacity).unwrap(), layout).unwrap()
    }

    #[test]
    fn test_finds_fitting_block() {
        let list = list_with(&[(64, 4), (1024, 2)]);
        let big = list.allocate(500).unwrap();
        assert!(list.block_size(big).unwrap() >= 500);
        let small = list.allocate(10).unwrap();
        assert!(list.deallocate(big));
        assert!(list.deallocate(small));
        assert_eq!(list.stats().used_bytes, 0);
    }

    #[test]
    fn test_rejects_survive_the_scan() {
        let list = list_with(&[(64, 3), (256, 1)]);
        let a = list.allocate(200).unwrap();
        assert_eq!(list.block_size(a), Some(256));
        // The three 64-byte rejects went back on the list.
        assert_eq!(list.stats().free_count, 3);
        // And no block can serve this one now.
        assert!(list.allocate(200).is_none());
        assert!(list.deallocate(a));
    }

    #[test]
    fn test_exhaustion() {
        let list = list_with(&[(128, 2)]);
        let a = list.allocate(100).unwrap();
        let b = list.allocate(100).unwrap();
        assert!(list.allocate(1).is_none());
        assert!(list.deallocate(a));
        assert!(list.deallocate(b));
    }

    #[test]
    fn test_degenerate_layouts_refused() {
        let ctx = MemoryContext::new();
        let region = ctx.acquire_region(64).unwrap();
        assert!(LockFreeListAllocator::new(region, &[]).is_err());
        let region = ctx.acquire_region(64).unwrap();
        assert!(LockFreeListAllocator::new(region, &[(128, 1)]).is_err());
    }

    #[test]
    fn test_concurrent_churn() {
        let list = list_with(&[(64, 16), (512, 4)]);
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let list = &list;
                scope.spawn(move || {
                    for i in 0..500 {
                        let size = if (worker + i) % 3 == 0 { 300 } else { 32 };
                        if let Some(block) = list.allocate(size) {
                            list.write_bytes(block, &[worker as u8; 8]);
                            assert!(list.deallocate(block));
                        }
                    }
                });
            }
        });
        assert_eq!(list.stats().free_count, 20);
        assert_eq!(list.stats().used_bytes, 0);
    }
}
