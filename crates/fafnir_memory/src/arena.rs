//! # Arena Allocator
//!
//! A bump allocator for temporary allocations that are freed all at once.
//!
//! Allocations are fast (bump an offset, no bookkeeping per block). Memory
//! is reclaimed only by [`Arena::reset`] - `deallocate` is an accepted
//! no-op, per the family contract.
//!
//! # Thread Safety
//!
//! This arena is NOT thread-safe. Use one arena per worker; the memory
//! context's `scratch()` exists precisely to hand each worker its own.
//!
//! # Example
//!
//! ```rust,ignore
//! let arena = Arena::new(ctx.acquire_region(1024 * 1024)?);
//!
//! let block = arena.allocate(4096, 16)?;
//! arena.with_bytes_mut(block, |bytes| bytes.fill(0xFF));
//!
//! arena.reset(); // all handles are now dead
//! ```

use std::cell::{Cell, RefCell};

use crate::allocator::{align_up, valid_align, Allocator, BlockRef};
use crate::context::{MemoryRegion, RegionTicket};

/// Point-in-time arena usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Bytes currently used (including alignment padding).
    pub used: usize,
    /// High-water mark since construction.
    pub peak_used: usize,
    /// Allocations served since the last reset.
    pub allocations: u64,
}

/// A bump-pointer arena allocator over one exclusively-owned region.
pub struct Arena {
    /// The backing bytes.
    storage: RefCell<Box<[u8]>>,
    /// Current allocation offset.
    offset: Cell<usize>,
    /// High-water mark.
    peak: Cell<usize>,
    /// Allocations since the last reset.
    allocations: Cell<u64>,
    /// Total capacity.
    capacity: usize,
    /// Credits the facade when the arena drops.
    _ticket: RegionTicket,
}

impl Arena {
    /// Creates an arena over an acquired region.
    #[must_use]
    pub fn new(region: MemoryRegion) -> Self {
        let (bytes, ticket) = region.into_parts();
        let capacity = bytes.len();
        Self {
            storage: RefCell::new(bytes),
            offset: Cell::new(0),
            peak: Cell::new(0),
            allocations: Cell::new(0),
            capacity,
            _ticket: ticket,
        }
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Resets the arena, invalidating all outstanding handles.
    ///
    /// This is a constant-time operation - no memory is freed or zeroed.
    #[inline]
    pub fn reset(&self) {
        self.offset.set(0);
        self.allocations.set(0);
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            capacity: self.capacity,
            used: self.offset.get(),
            peak_used: self.peak.get(),
            allocations: self.allocations.get(),
        }
    }

    /// Bump helper shared with the stack allocator: returns the data
    /// offset, or `None` when the bump would pass the region end.
    pub(crate) fn bump(
        offset: &Cell<usize>,
        capacity: usize,
        size: usize,
        align: usize,
    ) -> Option<usize> {
        if size == 0 {
            tracing::warn!("zero-size allocation refused");
            return None;
        }
        if !valid_align(align) {
            tracing::warn!(align, "invalid alignment refused");
            return None;
        }
        let aligned = align_up(offset.get(), align);
        let end = aligned.checked_add(size)?;
        if end > capacity {
            return None;
        }
        offset.set(end);
        Some(aligned)
    }
}

impl Allocator for Arena {
    fn allocate(&self, size: usize, align: usize) -> Option<BlockRef> {
        let aligned = Self::bump(&self.offset, self.capacity, size, align)?;
        self.allocations.set(self.allocations.get() + 1);
        if self.offset.get() > self.peak.get() {
            self.peak.set(self.offset.get());
        }
        Some(BlockRef::new(aligned, size))
    }

    /// Accepted no-op: arena memory is reclaimed only by [`Arena::reset`].
    fn deallocate(&self, _block: BlockRef) -> bool {
        true
    }

    fn with_bytes<R>(&self, block: BlockRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.offset.get() {
            tracing::warn!(offset = block.offset(), "stale or foreign arena handle");
            return None;
        }
        let storage = self.storage.borrow();
        Some(f(&storage[block.offset()..block.offset() + block.size()]))
    }

    fn with_bytes_mut<R>(&self, block: BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.offset.get() {
            tracing::warn!(offset = block.offset(), "stale or foreign arena handle");
            return None;
        }
        let mut storage = self.storage.borrow_mut();
        Some(f(&mut storage[block.offset()..block.offset() + block.size()]))
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    fn used(&self) -> usize {
        self.offset.get()
    }
}
