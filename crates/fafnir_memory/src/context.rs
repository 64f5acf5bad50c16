//! # Memory Context
//!
//! The explicit, process-wide facade every allocator draws its backing
//! memory from. There is no global singleton and no static state toggle:
//! the application constructs one context at startup, hands clones to the
//! subsystems that need them, and drops it at shutdown.
//!
//! ## Design Philosophy
//!
//! - Regions are acquired once and owned exclusively by one allocator.
//! - Global statistics are lock-free atomics, readable from any thread.
//! - Per-worker scratch caches are explicit handles owned by the worker,
//!   torn down deterministically - never thread-local destructors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::arena::Arena;

/// Lock-free allocation statistics shared by all regions of one context.
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Total bytes handed out over the context lifetime.
    bytes_allocated: AtomicU64,
    /// Total bytes returned over the context lifetime.
    bytes_freed: AtomicU64,
    /// Number of regions acquired.
    regions_acquired: AtomicU64,
    /// Number of regions released.
    regions_released: AtomicU64,
}

impl MemoryStats {
    fn on_acquire(&self, size: usize) {
        self.bytes_allocated.fetch_add(size as u64, Ordering::Relaxed);
        self.regions_acquired.fetch_add(1, Ordering::Relaxed);
    }

    fn on_release(&self, size: usize) {
        self.bytes_freed.fetch_add(size as u64, Ordering::Relaxed);
        self.regions_released.fetch_add(1, Ordering::Relaxed);
    }

    fn live_bytes(&self) -> u64 {
        self.bytes_allocated
            .load(Ordering::Relaxed)
            .saturating_sub(self.bytes_freed.load(Ordering::Relaxed))
    }
}

/// Point-in-time copy of a context's statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Total bytes handed out over the context lifetime.
    pub bytes_allocated: u64,
    /// Total bytes returned over the context lifetime.
    pub bytes_freed: u64,
    /// Bytes currently held by live regions.
    pub live_bytes: u64,
    /// Number of regions acquired.
    pub regions_acquired: u64,
    /// Number of regions released.
    pub regions_released: u64,
}

/// Credits the context statistics exactly once, when the owning region
/// (or the allocator that absorbed it) drops.
#[derive(Debug)]
pub struct RegionTicket {
    /// Region size to credit back.
    size: usize,
    /// The statistics block to credit.
    stats: Arc<MemoryStats>,
}

impl Drop for RegionTicket {
    fn drop(&mut self) {
        self.stats.on_release(self.size);
    }
}

/// An exclusively-owned byte region acquired from a [`MemoryContext`].
///
/// Allocators consume the region at construction and keep its ticket alive
/// for as long as they hold the bytes, so release is counted exactly once.
#[derive(Debug)]
pub struct MemoryRegion {
    /// The zeroed backing bytes.
    bytes: Box<[u8]>,
    /// Release accounting.
    ticket: RegionTicket,
}

impl MemoryRegion {
    /// Returns the region size in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for a zero-length region (never produced by a context).
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Splits the region into its bytes and its release ticket.
    pub(crate) fn into_parts(self) -> (Box<[u8]>, RegionTicket) {
        (self.bytes, self.ticket)
    }
}

/// The memory facade.
///
/// Cheap to clone - clones share one statistics block and one limit, so a
/// subsystem can be handed its own copy without ceremony.
///
/// # Example
///
/// ```rust,ignore
/// let ctx = MemoryContext::with_limit(256 * 1024 * 1024);
/// let frame_arena = Arena::new(ctx.acquire_region(4 * 1024 * 1024)?);
/// ```
#[derive(Clone, Debug)]
pub struct MemoryContext {
    /// Shared statistics block.
    stats: Arc<MemoryStats>,
    /// Optional ceiling on live bytes across all regions.
    limit: Option<usize>,
}

impl MemoryContext {
    /// Creates a context with no memory ceiling.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MemoryStats::default()),
            limit: None,
        }
    }

    /// Creates a context that refuses to exceed `limit` live bytes.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            stats: Arc::new(MemoryStats::default()),
            limit: Some(limit),
        }
    }

    /// Acquires an exclusively-owned, zeroed region of `size` bytes.
    ///
    /// Returns `None` for a zero size or when the ceiling would be
    /// exceeded. Offsets inside a region are aligned relative to the
    /// region start; typed reads and writes do not assume an aligned base.
    #[must_use]
    pub fn acquire_region(&self, size: usize) -> Option<MemoryRegion> {
        if size == 0 {
            return None;
        }
        if let Some(limit) = self.limit {
            // Optimistic debit, rolled back on overshoot. Two racing
            // acquisitions may both see headroom; the rollback keeps the
            // counters exact and the ceiling approximate by at most one
            // in-flight region, which is the documented contract.
            self.stats.on_acquire(size);
            if self.stats.live_bytes() > limit as u64 {
                self.stats.on_release(size);
                tracing::warn!(size, limit, "region acquisition over memory ceiling");
                return None;
            }
        } else {
            self.stats.on_acquire(size);
        }

        Some(MemoryRegion {
            bytes: vec![0u8; size].into_boxed_slice(),
            ticket: RegionTicket {
                size,
                stats: Arc::clone(&self.stats),
            },
        })
    }

    /// Creates an explicit per-worker scratch arena of `capacity` bytes.
    ///
    /// The returned arena is the small-block bump cache for one worker
    /// thread; the worker owns it and drops it at shutdown.
    #[must_use]
    pub fn scratch(&self, capacity: usize) -> Option<Arena> {
        Some(Arena::new(self.acquire_region(capacity)?))
    }

    /// Returns a point-in-time copy of the statistics.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_allocated: self.stats.bytes_allocated.load(Ordering::Relaxed),
            bytes_freed: self.stats.bytes_freed.load(Ordering::Relaxed),
            live_bytes: self.stats.live_bytes(),
            regions_acquired: self.stats.regions_acquired.load(Ordering::Relaxed),
            regions_released: self.stats.regions_released.load(Ordering::Relaxed),
        }
    }
}

impl Default for MemoryContext {
    fn default() -> Self {
        Self::new()
    }
}
