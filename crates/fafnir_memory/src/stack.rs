//! # Stack Allocator
//!
//! A bump allocator with LIFO reclamation: markers capture the current
//! position, and rollback rewinds to a marker or pops the latest
//! allocation. Rewinding to a marker *after* the current position is a
//! logic error - rejected and reported, never silently accepted.
//!
//! [`StackScope`] captures a marker on construction and restores it on
//! drop, making nested scratch use safe across early returns.
//!
//! # Thread Safety
//!
//! Like the arena, this allocator is NOT thread-safe. One per worker.

use std::cell::{Cell, RefCell};

use crate::allocator::{Allocator, BlockRef};
use crate::arena::Arena;
use crate::context::{MemoryRegion, RegionTicket};
use crate::error::{MemoryError, MemoryResult};

/// A position in the stack, captured by [`StackAllocator::marker`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Marker {
    /// The stack offset at capture time.
    position: usize,
}

impl Marker {
    /// The captured stack offset.
    #[inline]
    #[must_use]
    pub const fn position(self) -> usize {
        self.position
    }
}

/// Point-in-time stack usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackStats {
    /// Total capacity in bytes.
    pub capacity: usize,
    /// Bytes currently used (including alignment padding).
    pub used: usize,
    /// High-water mark since construction.
    pub peak_used: usize,
    /// Outstanding (un-popped) allocations.
    pub outstanding: usize,
}

/// A LIFO bump allocator over one exclusively-owned region.
pub struct StackAllocator {
    /// The backing bytes.
    storage: RefCell<Box<[u8]>>,
    /// Current allocation offset.
    offset: Cell<usize>,
    /// High-water mark.
    peak: Cell<usize>,
    /// Offset-before-allocation journal, one entry per live allocation.
    /// `free_latest` pops the back; `free_to_marker` pops every entry made
    /// past the marker.
    journal: RefCell<Vec<usize>>,
    /// Total capacity.
    capacity: usize,
    /// Credits the facade when the stack drops.
    _ticket: RegionTicket,
}

impl StackAllocator {
    /// Creates a stack allocator over an acquired region.
    #[must_use]
    pub fn new(region: MemoryRegion) -> Self {
        let (bytes, ticket) = region.into_parts();
        let capacity = bytes.len();
        Self {
            storage: RefCell::new(bytes),
            offset: Cell::new(0),
            peak: Cell::new(0),
            journal: RefCell::new(Vec::new()),
            capacity,
            _ticket: ticket,
        }
    }

    /// Captures the current position.
    #[inline]
    #[must_use]
    pub fn marker(&self) -> Marker {
        Marker {
            position: self.offset.get(),
        }
    }

    /// Rewinds to `marker`, freeing every allocation made after it.
    ///
    /// # Errors
    ///
    /// [`MemoryError::MarkerOutOfOrder`] when the marker lies past the
    /// current position; the stack is left untouched.
    pub fn free_to_marker(&self, marker: Marker) -> MemoryResult<()> {
        let position = self.offset.get();
        if marker.position > position {
            tracing::warn!(
                marker = marker.position,
                position,
                "marker past current stack position"
            );
            return Err(MemoryError::MarkerOutOfOrder {
                marker: marker.position,
                position,
            });
        }
        let mut journal = self.journal.borrow_mut();
        while journal.last().is_some_and(|&prev| prev >= marker.position) {
            journal.pop();
        }
        self.offset.set(marker.position);
        Ok(())
    }

    /// Pops only the most recent allocation.
    ///
    /// # Errors
    ///
    /// [`MemoryError::NothingToFree`] when no allocation is outstanding.
    pub fn free_latest(&self) -> MemoryResult<()> {
        let Some(prev) = self.journal.borrow_mut().pop() else {
            tracing::warn!("free_latest on an empty stack");
            return Err(MemoryError::NothingToFree);
        };
        self.offset.set(prev);
        Ok(())
    }

    /// Resets the stack, invalidating all outstanding handles.
    #[inline]
    pub fn reset(&self) {
        self.offset.set(0);
        self.journal.borrow_mut().clear();
    }

    /// Opens a scope that restores the current position on drop.
    #[must_use]
    pub fn scope(&self) -> StackScope<'_> {
        StackScope {
            stack: self,
            marker: self.marker(),
        }
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> StackStats {
        StackStats {
            capacity: self.capacity,
            used: self.offset.get(),
            peak_used: self.peak.get(),
            outstanding: self.journal.borrow().len(),
        }
    }
}

impl Allocator for StackAllocator {
    fn allocate(&self, size: usize, align: usize) -> Option<BlockRef> {
        let before = self.offset.get();
        let aligned = Arena::bump(&self.offset, self.capacity, size, align)?;
        self.journal.borrow_mut().push(before);
        if self.offset.get() > self.peak.get() {
            self.peak.set(self.offset.get());
        }
        Some(BlockRef::new(aligned, size))
    }

    /// Pops the block if - and only if - it is the most recent allocation.
    fn deallocate(&self, block: BlockRef) -> bool {
        let is_latest = self
            .journal
            .borrow()
            .last()
            .is_some_and(|&prev| block.offset() >= prev && block.offset() < self.offset.get());
        if !is_latest {
            tracing::warn!(
                offset = block.offset(),
                "deallocate out of LIFO order refused"
            );
            return false;
        }
        self.free_latest().is_ok()
    }

    fn with_bytes<R>(&self, block: BlockRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.offset.get() {
            tracing::warn!(offset = block.offset(), "stale or foreign stack handle");
            return None;
        }
        let storage = self.storage.borrow();
        Some(f(&storage[block.offset()..block.offset() + block.size()]))
    }

    fn with_bytes_mut<R>(&self, block: BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        if block.offset() + block.size() > self.offset.get() {
            tracing::warn!(offset = block.offset(), "stale or foreign stack handle");
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

/// Restores a captured stack position when dropped.
///
/// Allocations made inside the scope vanish when it closes, whether the
/// scope exits normally or through an early return.
pub struct StackScope<'a> {
    /// The owning stack.
    stack: &'a StackAllocator,
    /// Position to restore.
    marker: Marker,
}

impl StackScope<'_> {
    /// The marker this scope restores to.
    #[inline]
    #[must_use]
    pub const fn marker(&self) -> Marker {
        self.marker
    }
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        // The marker was at or below the position when captured; it can
        // only be "past" the position if the caller rewound below it by
        // hand, in which case the rewind already reclaimed our range.
        let _ = self.stack.free_to_marker(self.marker);
    }
}
