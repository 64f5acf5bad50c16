//! # Diagnostics Layer
//!
//! An optional wrapper over any [`Allocator`] that surfaces misuse early:
//! guard patterns poison block bytes on allocate and free, the call site
//! of every live allocation is captured, and a leak report is available on
//! demand.
//!
//! The layer is a runtime flag, not a compile-time fork: disabled, every
//! call forwards untouched, so success/failure outcomes are identical with
//! and without it - only detection latency changes. It deliberately wraps
//! the allocator seam instead of being woven through each allocator.

use std::collections::HashMap;
use std::panic::Location;

use parking_lot::Mutex;

use crate::allocator::{Allocator, BlockRef};

/// Byte written over freshly allocated blocks.
pub const ALLOC_PATTERN: u8 = 0xA5;

/// Byte written over freed blocks.
pub const FREE_PATTERN: u8 = 0x5F;

/// What the layer remembers about one live allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Requested size in bytes.
    pub size: usize,
    /// Requested alignment.
    pub align: usize,
    /// Monotonic allocation id.
    pub id: u64,
    /// Source file of the allocating call.
    pub file: &'static str,
    /// Source line of the allocating call.
    pub line: u32,
}

/// Mutable tracking state behind one mutex.
struct TrackingState {
    /// Live allocations by data offset.
    live: HashMap<usize, AllocationRecord>,
    /// Next allocation id.
    next_id: u64,
    /// Double/foreign frees rejected so far.
    rejected_frees: u64,
}

/// A tracking wrapper around any allocator in the family.
///
/// # Example
///
/// ```rust,ignore
/// let list = DiagnosticAllocator::enabled(FreeListAllocator::new(region, strategy));
///
/// let block = list.allocate(128, 8)?;
/// // forgetting to free it...
/// assert_eq!(list.report_leaks().len(), 1); // caught, with file:line
/// ```
pub struct DiagnosticAllocator<A: Allocator> {
    /// The wrapped allocator.
    inner: A,
    /// Runtime switch; disabled means pure pass-through.
    enabled: bool,
    /// Tracking state.
    state: Mutex<TrackingState>,
}

impl<A: Allocator> DiagnosticAllocator<A> {
    /// Wraps `inner` with tracking active.
    pub fn enabled(inner: A) -> Self {
        Self::new(inner, true)
    }

    /// Wraps `inner` with the given runtime flag.
    pub fn new(inner: A, enabled: bool) -> Self {
        Self {
            inner,
            enabled,
            state: Mutex::new(TrackingState {
                live: HashMap::new(),
                next_id: 1,
                rejected_frees: 0,
            }),
        }
    }

    /// Whether tracking is active.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The wrapped allocator.
    #[inline]
    pub const fn inner(&self) -> &A {
        &self.inner
    }

    /// Allocates through the wrapped allocator, poisoning the block and
    /// recording the call site when tracking is active.
    #[track_caller]
    #[must_use]
    pub fn allocate(&self, size: usize, align: usize) -> Option<BlockRef> {
        let block = self.inner.allocate(size, align)?;
        if self.enabled {
            let caller = Location::caller();
            self.inner
                .with_bytes_mut(block, |bytes| bytes.fill(ALLOC_PATTERN));
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.live.insert(
                block.offset(),
                AllocationRecord {
                    size,
                    align,
                    id,
                    file: caller.file(),
                    line: caller.line(),
                },
            );
        }
        Some(block)
    }

    /// Frees through the wrapped allocator. With tracking active, a free
    /// of an untracked block is rejected *before* it reaches the inner
    /// allocator, and freed bytes are poisoned with [`FREE_PATTERN`].
    pub fn deallocate(&self, block: BlockRef) -> bool {
        if self.enabled {
            let mut state = self.state.lock();
            if state.live.remove(&block.offset()).is_none() {
                state.rejected_frees += 1;
                tracing::warn!(
                    offset = block.offset(),
                    "diagnostics: free of untracked block rejected"
                );
                return false;
            }
            drop(state);
            self.inner
                .with_bytes_mut(block, |bytes| bytes.fill(FREE_PATTERN));
        }
        self.inner.deallocate(block)
    }

    /// Runs `f` over the block's bytes.
    pub fn with_bytes<R>(&self, block: BlockRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.inner.with_bytes(block, f)
    }

    /// Runs `f` over the block's bytes, mutably.
    pub fn with_bytes_mut<R>(&self, block: BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        self.inner.with_bytes_mut(block, f)
    }

    /// Records of every allocation never freed, oldest first.
    ///
    /// Each leak is also reported through `tracing::warn!` so it lands in
    /// the engine log even when the return value is discarded.
    pub fn report_leaks(&self) -> Vec<AllocationRecord> {
        let state = self.state.lock();
        let mut leaks: Vec<AllocationRecord> = state.live.values().copied().collect();
        leaks.sort_by_key(|record| record.id);
        for leak in &leaks {
            tracing::warn!(
                size = leak.size,
                file = leak.file,
                line = leak.line,
                "diagnostics: leaked allocation"
            );
        }
        leaks
    }

    /// Number of live tracked allocations.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Number of double/foreign frees rejected so far.
    #[must_use]
    pub fn rejected_frees(&self) -> u64 {
        self.state.lock().rejected_frees
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;
    use crate::freelist::{FreeListAllocator, PlacementStrategy};

    fn tracked(capacity: usize) -> DiagnosticAllocator<FreeListAllocator> {
        let ctx = MemoryContext::new();
        DiagnosticAllocator::enabled(FreeListAllocator::new(
            ctx.acquire_region(capacity).unwrap(),
            PlacementStrategy::FirstFit,
        ))
    }

    #[test]
    fn test_alloc_pattern_poisons_block() {
        let list = tracked(4096);
        let block = list.allocate(64, 8).unwrap();
        let bytes = list.with_bytes(block, <[u8]>::to_vec).unwrap();
        assert!(bytes.iter().all(|&b| b == ALLOC_PATTERN));
        assert!(list.deallocate(block));
    }

    #[test]
    fn test_double_free_caught_by_layer() {
        let list = tracked(4096);
        let block = list.allocate(64, 8).unwrap();
        assert!(list.deallocate(block));
        assert!(!list.deallocate(block));
        assert_eq!(list.rejected_frees(), 1);
    }

    #[test]
    fn test_leak_report_names_call_site() {
        let list = tracked(4096);
        let _leaked = list.allocate(128, 8).unwrap();
        let freed = list.allocate(64, 8).unwrap();
        assert!(list.deallocate(freed));

        let leaks = list.report_leaks();
        assert_eq!(leaks.len(), 1);
        assert_eq!(leaks[0].size, 128);
        assert!(leaks[0].file.ends_with("diagnostics.rs"));
    }

    #[test]
    fn test_disabled_layer_is_transparent() {
        let ctx = MemoryContext::new();
        let list = DiagnosticAllocator::new(
            FreeListAllocator::new(
                ctx.acquire_region(4096).unwrap(),
                PlacementStrategy::FirstFit,
            ),
            false,
        );
        let block = list.allocate(64, 8).unwrap();
        // No poisoning: the region arrives zeroed and stays zeroed.
        let bytes = list.with_bytes(block, <[u8]>::to_vec).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));
        assert!(list.deallocate(block));
        assert_eq!(list.live_allocations(), 0);
    }

    #[test]
    fn test_outcomes_identical_with_and_without() {
        // Same request sequence, tracked and untracked: identical
        // success/failure pattern (the layer must not change outcomes).
        let run = |enabled: bool| -> Vec<bool> {
            let ctx = MemoryContext::new();
            let list = DiagnosticAllocator::new(
                FreeListAllocator::new(
                    ctx.acquire_region(1024).unwrap(),
                    PlacementStrategy::FirstFit,
                ),
                enabled,
            );
            (0..8).map(|_| list.allocate(200, 8).is_some()).collect()
        };
        assert_eq!(run(true), run(false));
    }
}
