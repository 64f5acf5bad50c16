//! # Shared Byte Regions
//!
//! The one module in this crate allowed to contain unsafe code.
//!
//! ## Safety Note
//!
//! Lock-free allocators hand out disjoint block handles and let their owners
//! read and write block bytes concurrently. Rust cannot prove disjointness
//! of dynamic ranges inside one buffer, so this module wraps the buffer in
//! an `UnsafeCell` and exposes two `unsafe fn` accessors whose contract is
//! enforced by the allocators' handle discipline: a block index is held by
//! exactly one owner between `allocate` and `deallocate`, and the ranges of
//! distinct blocks never overlap. All unsafe blocks are carefully reviewed
//! and documented.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;

use crate::context::{MemoryRegion, RegionTicket};

/// A byte region shared between concurrently-owned blocks.
///
/// Constructed from a [`MemoryRegion`] acquired through the memory context;
/// the context is credited when this region drops (via the retained ticket).
pub(crate) struct SharedRegion {
    /// The backing bytes. Interior mutability so disjoint block owners can
    /// write through a shared reference.
    bytes: UnsafeCell<Box<[u8]>>,
    /// Region length, readable without touching the cell.
    len: usize,
    /// Keeps the facade's statistics honest on drop.
    _ticket: RegionTicket,
}

// The cell is only ever accessed through range-disjoint slices; the
// allocators above guarantee disjointness (see module Safety Note).
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Wraps an acquired region for shared block access.
    pub(crate) fn new(region: MemoryRegion) -> Self {
        let (bytes, ticket) = region.into_parts();
        let len = bytes.len();
        Self {
            bytes: UnsafeCell::new(bytes),
            len,
            _ticket: ticket,
        }
    }

    /// Returns the region length in bytes.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Returns a shared view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie within the region, and no mutable view of an
    /// overlapping range may exist for the lifetime of the returned slice.
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        &(&(*self.bytes.get()))[offset..offset + len]
    }

    /// Returns an exclusive view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The range must lie within the region, and no other view of an
    /// overlapping range may exist for the lifetime of the returned slice.
    #[inline]
    #[allow(clippy::mut_from_ref)] // exclusivity comes from the handle discipline
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        &mut (&mut (*self.bytes.get()))[offset..offset + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;

    #[test]
    fn test_region_round_trip() {
        let ctx = MemoryContext::new();
        let region = SharedRegion::new(ctx.acquire_region(64).unwrap());
        assert_eq!(region.len(), 64);

        // Disjoint ranges, single thread: trivially satisfies the contract.
        unsafe {
            region.slice_mut(0, 4).copy_from_slice(&[1, 2, 3, 4]);
            region.slice_mut(4, 4).copy_from_slice(&[5, 6, 7, 8]);
            assert_eq!(region.slice(0, 8), &[1, 2, 3, 4, 5, 6, 7, 8]);
        }
    }

    #[test]
    fn test_region_credits_stats_on_drop() {
        let ctx = MemoryContext::new();
        {
            let _region = SharedRegion::new(ctx.acquire_region(128).unwrap());
            assert_eq!(ctx.stats().live_bytes, 128);
        }
        assert_eq!(ctx.stats().live_bytes, 0);
    }
}
