//! # Slab Allocator
//!
//! Multiple fixed-size-block slabs, classified by occupancy.
//!
//! Each slab is a pool-style region with its own lock-free free chain;
//! the slab list itself sits behind a `RwLock` that is only write-locked
//! when the allocator grows. Allocation scans `PARTIAL` slabs first (they
//! keep cache-warm neighbours together), then `EMPTY` ones, and finally
//! grows a new slab from the memory context - up to a configured cap.
//!
//! Freeing a block is lock-free within its slab and transitions the slab's
//! occupancy class implicitly through the free count.

use parking_lot::RwLock;

use bytemuck::Pod;

use crate::context::MemoryContext;
use crate::error::{MemoryError, MemoryResult};
use crate::pool::AtomicFreeChain;
use crate::region::SharedRegion;

/// Occupancy classification of one slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlabOccupancy {
    /// Every block is free.
    Empty,
    /// Some blocks are allocated, some free.
    Partial,
    /// Every block is allocated.
    Full,
}

/// Handle to a block inside a slab allocator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlabHandle {
    /// Which slab the block lives in.
    pub slab: u32,
    /// Block index inside that slab.
    pub block: u32,
}

/// One fixed-block region plus its free chain.
struct Slab {
    /// The slab's bytes.
    region: SharedRegion,
    /// Lock-free free chain over the slab's blocks.
    chain: AtomicFreeChain,
}

impl Slab {
    fn occupancy(&self, blocks_per_slab: u32) -> SlabOccupancy {
        match self.chain.free_count() {
            0 => SlabOccupancy::Full,
            n if n == blocks_per_slab => SlabOccupancy::Empty,
            _ => SlabOccupancy::Partial,
        }
    }
}

/// Point-in-time slab allocator usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlabStats {
    /// Size of each block in bytes.
    pub block_size: usize,
    /// Blocks per slab.
    pub blocks_per_slab: usize,
    /// Slabs currently backing the allocator.
    pub slab_count: usize,
    /// Blocks free across all slabs.
    pub free_blocks: usize,
    /// Blocks allocated across all slabs.
    pub allocated_blocks: usize,
}

/// A growable fixed-size block allocator over occupancy-classified slabs.
///
/// # Example
///
/// ```rust,ignore
/// let slabs = SlabAllocator::new(&ctx, 256, 1024, 8)?;
///
/// let handle = slabs.allocate()?;
/// slabs.write_value(handle, particle);
/// slabs.deallocate(handle);
/// ```
pub struct SlabAllocator {
    /// The slabs. Read-locked to allocate, write-locked only to grow.
    slabs: RwLock<Vec<Slab>>,
    /// Context to draw new slab regions from.
    ctx: MemoryContext,
    /// Size of each block.
    block_size: usize,
    /// Blocks carved from each slab.
    blocks_per_slab: usize,
    /// Ceiling on slab growth.
    max_slabs: usize,
}

impl SlabAllocator {
    /// Creates a slab allocator with one initial slab.
    ///
    /// # Errors
    ///
    /// [`MemoryError::RegionTooSmall`] for a degenerate layout, or when the
    /// context refuses the first slab's region.
    pub fn new(
        ctx: &MemoryContext,
        block_size: usize,
        blocks_per_slab: usize,
        max_slabs: usize,
    ) -> MemoryResult<Self> {
        if block_size < crate::pool::PoolAllocator::MIN_BLOCK_SIZE
            || blocks_per_slab == 0
            || max_slabs == 0
        {
            return Err(MemoryError::RegionTooSmall {
                required: block_size.max(crate::pool::PoolAllocator::MIN_BLOCK_SIZE),
                capacity: block_size * blocks_per_slab,
            });
        }
        let allocator = Self {
            slabs: RwLock::new(Vec::with_capacity(max_slabs)),
            ctx: ctx.clone(),
            block_size,
            blocks_per_slab,
            max_slabs,
        };
        let first = allocator
            .new_slab()
            .ok_or(MemoryError::RegionTooSmall {
                required: block_size * blocks_per_slab,
                capacity: 0,
            })?;
        allocator.slabs.write().push(first);
        Ok(allocator)
    }

    fn new_slab(&self) -> Option<Slab> {
        let region = self
            .ctx
            .acquire_region(self.block_size * self.blocks_per_slab)?;
        Some(Slab {
            region: SharedRegion::new(region),
            chain: AtomicFreeChain::full(self.blocks_per_slab as u32),
        })
    }

    /// Allocates one block, preferring partially-occupied slabs.
    ///
    /// Grows a new slab when every existing slab is full; returns `None`
    /// once the slab cap is reached (or the context refuses more memory).
    #[must_use]
    pub fn allocate(&self) -> Option<SlabHandle> {
        {
            let slabs = self.slabs.read();
            // Partial slabs first: they pack allocations densely.
            for wanted in [SlabOccupancy::Partial, SlabOccupancy::Empty] {
                for (slab_index, slab) in slabs.iter().enumerate() {
                    if slab.occupancy(self.blocks_per_slab as u32) != wanted {
                        continue;
                    }
                    // The pop can still lose a race; move on if it does.
                    if let Some(block) = slab.chain.pop() {
                        return Some(SlabHandle {
                            slab: slab_index as u32,
                            block,
                        });
                    }
                }
            }
        }

        let mut slabs = self.slabs.write();
        // Re-check under the write lock: another thread may have grown or
        // freed while we waited.
        for (slab_index, slab) in slabs.iter().enumerate() {
            if let Some(block) = slab.chain.pop() {
                return Some(SlabHandle {
                    slab: slab_index as u32,
                    block,
                });
            }
        }
        if slabs.len() >= self.max_slabs {
            return None;
        }
        let slab = self.new_slab()?;
        let block = slab.chain.pop()?;
        slabs.push(slab);
        Some(SlabHandle {
            slab: slabs.len() as u32 - 1,
            block,
        })
    }

    /// Returns a block. `false` for a handle outside the allocator.
    pub fn deallocate(&self, handle: SlabHandle) -> bool {
        let slabs = self.slabs.read();
        let Some(slab) = slabs.get(handle.slab as usize) else {
            tracing::warn!(slab = handle.slab, "slab index outside allocator");
            return false;
        };
        if handle.block as usize >= self.blocks_per_slab {
            tracing::warn!(block = handle.block, "block index outside slab");
            return false;
        }
        slab.chain.push(handle.block);
        true
    }

    /// Places a POD value into a freshly allocated block.
    #[must_use]
    pub fn create_value<T: Pod>(&self, value: T) -> Option<SlabHandle> {
        if std::mem::size_of::<T>() > self.block_size {
            tracing::warn!(
                size = std::mem::size_of::<T>(),
                block_size = self.block_size,
                "value larger than slab block"
            );
            return None;
        }
        let handle = self.allocate()?;
        self.write_value(handle, value);
        Some(handle)
    }

    /// Overwrites a block with a POD value. `false` when the value does
    /// not fit or the handle is out of range.
    pub fn write_value<T: Pod>(&self, handle: SlabHandle, value: T) -> bool {
        if std::mem::size_of::<T>() > self.block_size {
            return false;
        }
        let slabs = self.slabs.read();
        let Some(slab) = slabs.get(handle.slab as usize) else {
            return false;
        };
        if handle.block as usize >= self.blocks_per_slab {
            return false;
        }
        let offset = handle.block as usize * self.block_size;
        // SAFETY: range is inside the slab region; the caller owns this
        // block's handle (see region module Safety Note).
        #[allow(unsafe_code)]
        let bytes = unsafe { slab.region.slice_mut(offset, std::mem::size_of::<T>()) };
        bytes.copy_from_slice(bytemuck::bytes_of(&value));
        true
    }

    /// Copies a POD value out of a block.
    #[must_use]
    pub fn read_value<T: Pod>(&self, handle: SlabHandle) -> Option<T> {
        if std::mem::size_of::<T>() > self.block_size {
            return None;
        }
        let slabs = self.slabs.read();
        let slab = slabs.get(handle.slab as usize)?;
        if handle.block as usize >= self.blocks_per_slab {
            return None;
        }
        let offset = handle.block as usize * self.block_size;
        // SAFETY: as in `write_value`.
        #[allow(unsafe_code)]
        let bytes = unsafe { slab.region.slice(offset, std::mem::size_of::<T>()) };
        Some(bytemuck::pod_read_unaligned(bytes))
    }

    /// Occupancy class of one slab, if it exists.
    #[must_use]
    pub fn occupancy_of(&self, slab: u32) -> Option<SlabOccupancy> {
        self.slabs
            .read()
            .get(slab as usize)
            .map(|s| s.occupancy(self.blocks_per_slab as u32))
    }

    /// Rebuilds every slab's free chain, invalidating all handles.
    pub fn reset(&self) {
        let slabs = self.slabs.write();
        for slab in slabs.iter() {
            slab.chain.rebuild();
        }
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> SlabStats {
        let slabs = self.slabs.read();
        let free_blocks: usize = slabs.iter().map(|s| s.chain.free_count() as usize).sum();
        let total = slabs.len() * self.blocks_per_slab;
        SlabStats {
            block_size: self.block_size,
            blocks_per_slab: self.blocks_per_slab,
            slab_count: slabs.len(),
            free_blocks,
            allocated_blocks: total - free_blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slabs_of(block_size: usize, per_slab: usize, max: usize) -> SlabAllocator {
        let ctx = MemoryContext::new();
        SlabAllocator::new(&ctx, block_size, per_slab, max).unwrap()
    }

    #[test]
    fn test_grows_on_exhaustion() {
        let slabs = slabs_of(32, 4, 3);
        let mut held = Vec::new();
        for _ in 0..12 {
            held.push(slabs.allocate().unwrap());
        }
        // Cap reached.
        assert!(slabs.allocate().is_none());
        assert_eq!(slabs.stats().slab_count, 3);

        for handle in held {
            assert!(slabs.deallocate(handle));
        }
        assert_eq!(slabs.stats().free_blocks, 12);
    }

    #[test]
    fn test_occupancy_transitions() {
        let slabs = slabs_of(32, 2, 2);
        assert_eq!(slabs.occupancy_of(0), Some(SlabOccupancy::Empty));

        let a = slabs.allocate().unwrap();
        assert_eq!(slabs.occupancy_of(0), Some(SlabOccupancy::Partial));

        let b = slabs.allocate().unwrap();
        assert_eq!(slabs.occupancy_of(0), Some(SlabOccupancy::Full));

        slabs.deallocate(b);
        assert_eq!(slabs.occupancy_of(0), Some(SlabOccupancy::Partial));
        slabs.deallocate(a);
        assert_eq!(slabs.occupancy_of(0), Some(SlabOccupancy::Empty));
    }

    #[test]
    fn test_partial_preferred_over_empty() {
        let slabs = slabs_of(32, 2, 4);
        // Fill slab 0 halfway, force slab 1 into existence, then free the
        // slab-1 block so slab 1 is empty and slab 0 partial.
        let _keep = slabs.allocate().unwrap();
        let b = slabs.allocate().unwrap();
        let c = slabs.allocate().unwrap();
        assert_eq!(c.slab, 1);
        slabs.deallocate(b);

        // Slab 0 is partial again; it must win over empty slab 1.
        let d = slabs.allocate().unwrap();
        assert_eq!(d.slab, 0);
    }

    #[test]
    fn test_value_round_trip() {
        let slabs = slabs_of(64, 4, 2);
        let handle = slabs.create_value(42u64).unwrap();
        assert_eq!(slabs.read_value::<u64>(handle), Some(42));
        assert!(slabs.deallocate(handle));
    }

    #[test]
    fn test_foreign_handles_rejected() {
        let slabs = slabs_of(32, 2, 2);
        assert!(!slabs.deallocate(SlabHandle { slab: 9, block: 0 }));
        assert!(!slabs.deallocate(SlabHandle { slab: 0, block: 9 }));
        assert!(slabs.read_value::<u8>(SlabHandle { slab: 9, block: 0 }).is_none());
    }

    #[test]
    fn test_reset_restores_everything() {
        let slabs = slabs_of(32, 4, 2);
        for _ in 0..6 {
            let _ = slabs.allocate().unwrap();
        }
        slabs.reset();
        let stats = slabs.stats();
        assert_eq!(stats.allocated_blocks, 0);
        assert_eq!(stats.free_blocks, stats.slab_count * 4);
    }
}
