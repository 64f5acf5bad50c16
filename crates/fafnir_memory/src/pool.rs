//! # Pool Allocator
//!
//! Fixed-size blocks drawn from one region via a lock-free free chain.
//!
//! ## Free Chain
//!
//! Free blocks form a Treiber stack: per-block `next` links live in a side
//! table of atomics (the index-addressed equivalent of writing the link
//! into the block's own storage), and the head packs a block index with a
//! generation tag in one `u64`. The tag makes head reuse visible to a
//! stalled compare-exchange, closing the ABA window. Push and pop retry on
//! contention, unbounded - no blocking, no priority inversion; live-lock
//! is bounded only by CAS success probability.
//!
//! # Thread Safety
//!
//! Fully concurrent: any number of threads may allocate and deallocate
//! simultaneously. A block's *bytes* belong to whichever thread holds its
//! handle between allocate and deallocate.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytemuck::Pod;

use crate::allocator::{Allocator, BlockRef};
use crate::context::MemoryRegion;
use crate::error::{MemoryError, MemoryResult};
use crate::region::SharedRegion;

/// Sentinel for "no block" in chain links.
const NIL: u32 = u32::MAX;

/// Index of one block inside a pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockIndex(
    /// The raw block index.
    pub u32,
);

/// Packs a head word from a block index and a generation tag.
#[inline]
const fn pack(index: u32, tag: u32) -> u64 {
    ((tag as u64) << 32) | index as u64
}

/// Splits a head word into (index, tag).
#[inline]
#[allow(clippy::cast_possible_truncation)] // both halves are deliberate u32s
const fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

/// A lock-free Treiber stack of block indices with a tagged head.
///
/// Shared by the pool and each slab; the occupancy counter rides along so
/// occupancy classes can be read without walking the chain.
pub(crate) struct AtomicFreeChain {
    /// Per-block next links; `NIL` terminates the chain.
    links: Box<[AtomicU32]>,
    /// Tagged head word: low 32 bits index, high 32 bits generation.
    head: AtomicU64,
    /// Number of blocks currently on the chain.
    free_count: AtomicU32,
}

impl AtomicFreeChain {
    /// Builds a chain holding every block `0..count`.
    pub(crate) fn full(count: u32) -> Self {
        let links: Box<[AtomicU32]> = (0..count)
            .map(|i| AtomicU32::new(if i + 1 == count { NIL } else { i + 1 }))
            .collect();
        Self {
            links,
            head: AtomicU64::new(pack(if count == 0 { NIL } else { 0 }, 0)),
            free_count: AtomicU32::new(count),
        }
    }

    /// Pops a free block. `None` when the chain is empty.
    pub(crate) fn pop(&self) -> Option<u32> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (index, tag) = unpack(head);
            if index == NIL {
                return None;
            }
            let next = self.links[index as usize].load(Ordering::Relaxed);
            let replacement = pack(next, tag.wrapping_add(1));
            match self.head.compare_exchange_weak(
                head,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.free_count.fetch_sub(1, Ordering::Relaxed);
                    return Some(index);
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Pushes a block back onto the chain.
    pub(crate) fn push(&self, index: u32) {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let (current, tag) = unpack(head);
            self.links[index as usize].store(current, Ordering::Relaxed);
            let replacement = pack(index, tag.wrapping_add(1));
            match self.head.compare_exchange_weak(
                head,
                replacement,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.free_count.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(actual) => head = actual,
            }
        }
    }

    /// Rebuilds the chain to hold every block again.
    ///
    /// Requires external quiescence - callers take `&mut` or a write lock.
    pub(crate) fn rebuild(&self) {
        let count = self.links.len() as u32;
        for (i, link) in self.links.iter().enumerate() {
            let next = if i as u32 + 1 == count { NIL } else { i as u32 + 1 };
            link.store(next, Ordering::Relaxed);
        }
        let (_, tag) = unpack(self.head.load(Ordering::Relaxed));
        self.head.store(
            pack(if count == 0 { NIL } else { 0 }, tag.wrapping_add(1)),
            Ordering::Release,
        );
        self.free_count.store(count, Ordering::Relaxed);
    }

    /// Blocks currently on the chain.
    #[inline]
    pub(crate) fn free_count(&self) -> u32 {
        self.free_count.load(Ordering::Relaxed)
    }
}

/// Point-in-time pool usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Size of each block in bytes.
    pub block_size: usize,
    /// Total number of blocks.
    pub block_count: usize,
    /// Blocks currently free.
    pub free_count: usize,
    /// Blocks currently allocated.
    pub allocated_count: usize,
}

/// A fixed-size block allocator with a lock-free free chain.
///
/// # Example
///
/// ```rust,ignore
/// let pool = PoolAllocator::new(ctx.acquire_region(64 * 1024)?, 64)?;
///
/// let block = pool.allocate_block()?;
/// pool.write_bytes(block, &payload);
/// pool.deallocate_block(block);
/// ```
pub struct PoolAllocator {
    /// The backing bytes, shared between concurrently-owned blocks.
    region: SharedRegion,
    /// The lock-free free chain.
    chain: AtomicFreeChain,
    /// Size of each block.
    block_size: usize,
    /// Total number of blocks carved from the region.
    block_count: usize,
    /// Debug-build occupancy map for double-free detection.
    #[cfg(debug_assertions)]
    occupancy: Box<[std::sync::atomic::AtomicBool]>,
}

impl PoolAllocator {
    /// Smallest permitted block size.
    pub const MIN_BLOCK_SIZE: usize = 4;

    /// Creates a pool of `block_size`-byte blocks over an acquired region.
    ///
    /// # Errors
    ///
    /// [`MemoryError::RegionTooSmall`] when the region cannot hold a single
    /// block of at least [`PoolAllocator::MIN_BLOCK_SIZE`] bytes.
    pub fn new(region: MemoryRegion, block_size: usize) -> MemoryResult<Self> {
        let capacity = region.len();
        if block_size < Self::MIN_BLOCK_SIZE || capacity < block_size {
            return Err(MemoryError::RegionTooSmall {
                required: block_size.max(Self::MIN_BLOCK_SIZE),
                capacity,
            });
        }
        let block_count = capacity / block_size;
        Ok(Self {
            region: SharedRegion::new(region),
            chain: AtomicFreeChain::full(block_count as u32),
            block_size,
            block_count,
            #[cfg(debug_assertions)]
            occupancy: (0..block_count)
                .map(|_| std::sync::atomic::AtomicBool::new(false))
                .collect(),
        })
    }

    /// Allocates one block. `None` when the pool is exhausted.
    #[must_use]
    pub fn allocate_block(&self) -> Option<BlockIndex> {
        let index = self.chain.pop()?;
        #[cfg(debug_assertions)]
        self.occupancy[index as usize].store(true, Ordering::Relaxed);
        Some(BlockIndex(index))
    }

    /// Returns a block to the pool. `false` for an out-of-range index or
    /// (debug builds) a block that is already free.
    pub fn deallocate_block(&self, block: BlockIndex) -> bool {
        if block.0 as usize >= self.block_count {
            tracing::warn!(index = block.0, "block index outside pool");
            return false;
        }
        #[cfg(debug_assertions)]
        if !self.occupancy[block.0 as usize].swap(false, Ordering::Relaxed) {
            tracing::warn!(index = block.0, "double free of pool block");
            return false;
        }
        self.chain.push(block.0);
        true
    }

    /// Derives a block index from a region-relative byte offset,
    /// validating range and block alignment.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ForeignBlock`] outside the region,
    /// [`MemoryError::Misaligned`] off the block grid.
    pub fn handle_at(&self, offset: usize) -> MemoryResult<BlockIndex> {
        if offset >= self.block_count * self.block_size {
            tracing::warn!(offset, "offset outside pool region");
            return Err(MemoryError::ForeignBlock { offset });
        }
        if offset % self.block_size != 0 {
            tracing::warn!(offset, block_size = self.block_size, "offset off block grid");
            return Err(MemoryError::Misaligned {
                offset,
                block_size: self.block_size,
            });
        }
        Ok(BlockIndex((offset / self.block_size) as u32))
    }

    /// Region-relative byte offset of a block.
    #[inline]
    #[must_use]
    pub fn offset_of(&self, block: BlockIndex) -> usize {
        block.0 as usize * self.block_size
    }

    /// Copies `bytes` into the block (prefix write).
    ///
    /// `false` when the index is out of range or `bytes` exceeds the block.
    pub fn write_bytes(&self, block: BlockIndex, bytes: &[u8]) -> bool {
        if block.0 as usize >= self.block_count || bytes.len() > self.block_size {
            return false;
        }
        // SAFETY: range is inside the region; the caller owns this block's
        // handle, so no overlapping view exists (module Safety Note).
        #[allow(unsafe_code)]
        let target = unsafe { self.region.slice_mut(self.offset_of(block), bytes.len()) };
        target.copy_from_slice(bytes);
        true
    }

    /// Copies the block's bytes out (whole block).
    #[must_use]
    pub fn read_bytes(&self, block: BlockIndex) -> Option<Vec<u8>> {
        if block.0 as usize >= self.block_count {
            return None;
        }
        // SAFETY: as in `write_bytes`.
        #[allow(unsafe_code)]
        let source = unsafe { self.region.slice(self.offset_of(block), self.block_size) };
        Some(source.to_vec())
    }

    /// Places a POD value into a freshly allocated block.
    ///
    /// `None` when the pool is exhausted or the value does not fit.
    #[must_use]
    pub fn create_value<T: Pod>(&self, value: T) -> Option<BlockIndex> {
        if std::mem::size_of::<T>() > self.block_size {
            tracing::warn!(
                size = std::mem::size_of::<T>(),
                block_size = self.block_size,
                "value larger than pool block"
            );
            return None;
        }
        let block = self.allocate_block()?;
        self.write_bytes(block, bytemuck::bytes_of(&value));
        Some(block)
    }

    /// Copies a POD value out of a block.
    #[must_use]
    pub fn read_value<T: Pod>(&self, block: BlockIndex) -> Option<T> {
        if std::mem::size_of::<T>() > self.block_size || block.0 as usize >= self.block_count {
            return None;
        }
        // SAFETY: as in `write_bytes`.
        #[allow(unsafe_code)]
        let source = unsafe {
            self.region
                .slice(self.offset_of(block), std::mem::size_of::<T>())
        };
        Some(bytemuck::pod_read_unaligned(source))
    }

    /// Rebuilds the free chain over the whole region, invalidating every
    /// outstanding handle. Exclusive access makes the rebuild race-free.
    pub fn reset(&mut self) {
        self.chain.rebuild();
        #[cfg(debug_assertions)]
        for slot in self.occupancy.iter() {
            slot.store(false, Ordering::Relaxed);
        }
    }

    /// Blocks currently free.
    #[inline]
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.chain.free_count() as usize
    }

    /// Blocks currently allocated.
    #[inline]
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.block_count - self.free_count()
    }

    /// Total number of blocks.
    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> usize {
        self.block_count
    }

    /// Size of each block in bytes.
    #[inline]
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let free_count = self.free_count();
        PoolStats {
            block_size: self.block_size,
            block_count: self.block_count,
            free_count,
            allocated_count: self.block_count - free_count,
        }
    }
}

impl Allocator for PoolAllocator {
    fn allocate(&self, size: usize, align: usize) -> Option<BlockRef> {
        if size == 0 || size > self.block_size {
            tracing::warn!(size, block_size = self.block_size, "size unsuitable for pool");
            return None;
        }
        if !crate::allocator::valid_align(align) || self.block_size % align != 0 {
            tracing::warn!(align, "alignment unsatisfiable by pool block grid");
            return None;
        }
        let block = self.allocate_block()?;
        Some(BlockRef::new(self.offset_of(block), size))
    }

    fn deallocate(&self, block: BlockRef) -> bool {
        match self.handle_at(block.offset()) {
            Ok(index) => self.deallocate_block(index),
            Err(_) => false,
        }
    }

    fn with_bytes<R>(&self, block: BlockRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.block_count * self.block_size {
            return None;
        }
        // SAFETY: as in `write_bytes`.
        #[allow(unsafe_code)]
        let bytes = unsafe { self.region.slice(block.offset(), block.size()) };
        Some(f(bytes))
    }

    fn with_bytes_mut<R>(&self, block: BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.block_count * self.block_size {
            return None;
        }
        // SAFETY: as in `write_bytes`.
        #[allow(unsafe_code)]
        let bytes = unsafe { self.region.slice_mut(block.offset(), block.size()) };
        Some(f(bytes))
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.region.len()
    }

    #[inline]
    fn used(&self) -> usize {
        self.allocated_count() * self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;

    fn pool_of(blocks: usize, block_size: usize) -> PoolAllocator {
        let ctx = MemoryContext::new();
        PoolAllocator::new(ctx.acquire_region(blocks * block_size).unwrap(), block_size).unwrap()
    }

    #[test]
    fn test_count_invariant() {
        let pool = pool_of(8, 64);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.allocate_block().unwrap());
            assert_eq!(pool.free_count() + pool.allocated_count(), 8);
        }
        for block in held {
            pool.deallocate_block(block);
            assert_eq!(pool.free_count() + pool.allocated_count(), 8);
        }
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        // Spec scenario: 10 blocks of 64 bytes.
        let pool = pool_of(10, 64);
        let blocks: Vec<_> = (0..10).map(|_| pool.allocate_block().unwrap()).collect();
        assert!(pool.allocate_block().is_none());

        let third = blocks[3];
        assert!(pool.deallocate_block(third));
        let reused = pool.allocate_block().unwrap();
        assert_eq!(reused, third);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn test_double_free_rejected() {
        let pool = pool_of(4, 64);
        let block = pool.allocate_block().unwrap();
        assert!(pool.deallocate_block(block));
        assert!(!pool.deallocate_block(block));
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let pool = pool_of(4, 64);
        assert!(!pool.deallocate_block(BlockIndex(99)));
        assert!(pool.handle_at(4 * 64).is_err());
        assert!(pool.handle_at(33).is_err());
        assert_eq!(pool.handle_at(128).unwrap(), BlockIndex(2));
    }

    #[test]
    fn test_value_round_trip() {
        let pool = pool_of(4, 64);
        let block = pool.create_value([1.0f32, 2.0, 3.0]).unwrap();
        assert_eq!(pool.read_value::<[f32; 3]>(block), Some([1.0, 2.0, 3.0]));
        assert!(pool.deallocate_block(block));
    }

    #[test]
    fn test_reset_restores_all_blocks() {
        let mut pool = pool_of(4, 64);
        for _ in 0..4 {
            let _ = pool.allocate_block().unwrap();
        }
        assert_eq!(pool.free_count(), 0);

        pool.reset();
        assert_eq!(pool.free_count(), 4);
        assert!(pool.allocate_block().is_some());
    }

    #[test]
    fn test_concurrent_churn_preserves_counts() {
        let pool = std::sync::Arc::new(pool_of(64, 32));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let pool = std::sync::Arc::clone(&pool);
                scope.spawn(move || {
                    for _ in 0..1000 {
                        if let Some(block) = pool.allocate_block() {
                            pool.write_bytes(block, &block.0.to_le_bytes());
                            assert!(pool.deallocate_block(block));
                        }
                    }
                });
            }
        });
        assert_eq!(pool.free_count(), 64);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_trait_surface() {
        let pool = pool_of(4, 64);
        let block = pool.allocate(16, 8).unwrap();
        assert_eq!(block.size(), 16);
        assert!(pool.with_bytes_mut(block, |b| b.fill(7)).is_some());
        assert_eq!(pool.with_bytes(block, |b| b[15]), Some(7));
        assert!(pool.deallocate(block));
        // Alignment the block grid cannot satisfy.
        assert!(pool.allocate(16, 128).is_none());
    }
}
