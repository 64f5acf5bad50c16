//! # FAFNIR Memory
//!
//! The allocator family under the FAFNIR engine: every byte the engine
//! touches during play was carved out of a region this crate owns.
//!
//! ## Architecture Rules
//!
//! 1. **Explicit ownership** - every allocator owns one region, acquired
//!    from a [`MemoryContext`] and released exactly once on drop
//! 2. **Failure is a value** - exhaustion returns `None`, misuse returns
//!    an error or `false` after a report; nothing here panics on callers
//! 3. **Handles, not pointers** - public APIs name blocks by region
//!    offset; raw-pointer arithmetic does not leak out of this crate
//!
//! ## The Family
//!
//! | Allocator | Reclamation | Concurrency |
//! |-----------|-------------|-------------|
//! | [`Arena`] | reset only | one per worker |
//! | [`StackAllocator`] | LIFO markers | one per worker |
//! | [`PoolAllocator`] | per block | lock-free CAS |
//! | [`SlabAllocator`] | per block | lock-free + grow lock |
//! | [`FreeListAllocator`] | per block, coalescing | one mutex |
//! | [`LockFreeListAllocator`] | per block | lock-free CAS |
//!
//! ## Example
//!
//! ```rust,ignore
//! use fafnir_memory::{Allocator, FreeListAllocator, MemoryContext, PlacementStrategy};
//!
//! let ctx = MemoryContext::with_limit(256 * 1024 * 1024);
//! let list = FreeListAllocator::new(
//!     ctx.acquire_region(16 * 1024 * 1024).unwrap(),
//!     PlacementStrategy::BestFit,
//! );
//! let block = list.allocate(4096, 64).unwrap();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod allocator;
pub mod arena;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod freelist;
pub mod lockfree;
pub mod pool;
mod region;
pub mod slab;
pub mod stack;

pub use allocator::{Allocator, BlockRef, TypedBlock};
pub use arena::{Arena, ArenaStats};
pub use context::{MemoryContext, MemoryRegion, StatsSnapshot};
pub use diagnostics::{AllocationRecord, DiagnosticAllocator, ALLOC_PATTERN, FREE_PATTERN};
pub use error::{MemoryError, MemoryResult};
pub use freelist::{FreeListAllocator, FreeListStats, PlacementStrategy};
pub use lockfree::{LockFreeListAllocator, LockFreeListStats};
pub use pool::{BlockIndex, PoolAllocator, PoolStats};
pub use slab::{SlabAllocator, SlabHandle, SlabOccupancy, SlabStats};
pub use stack::{Marker, StackAllocator, StackScope, StackStats};
