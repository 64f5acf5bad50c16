//! # FAFNIR Streaming
//!
//! The resource-residency manager: what is in memory, what is about to
//! be, and what gets evicted when the budget says no.
//!
//! ## Design Principles
//!
//! 1. **Budgets are ceilings** - a load that would exceed its category
//!    budget fails the resource; `memory_used` never passes the ceiling
//! 2. **Protection is absolute** - `Critical` and referenced resources
//!    are never unloaded, by any path
//! 3. **The executor is a seam** - the bundled one completes work in the
//!    same tick; a background pipeline can replace it without touching
//!    the state machine
//! 4. **Backing memory is paged** - every resident byte lives in the
//!    manager's own page allocator, mapped straight from the asset file
//!
//! ## Example
//!
//! ```rust,ignore
//! use fafnir_streaming::{
//!     ResourceCategory, ResourceId, ResourcePriority, ResourceRequest,
//!     StreamingAllocator, StreamingConfig,
//! };
//!
//! let streaming = StreamingAllocator::new(StreamingConfig::default());
//! let id = streaming.request_resource(
//!     ResourceRequest::new(ResourceId(1), "assets/town.mesh", ResourceCategory::Geometry)
//!         .with_priority(ResourcePriority::High)
//!         .with_position([120.0, 0.0, -40.0]),
//! );
//!
//! // Per frame:
//! streaming.set_reference_point(player_position);
//! streaming.update(delta_time);
//! streaming.access_resource(id, |bytes| upload_to_gpu(bytes));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod budget;
pub mod config;
pub mod error;
pub mod manager;
pub mod queue;
pub mod resource;

pub use budget::{CategoryBudget, MemoryBudgets};
pub use config::{BudgetConfig, StreamingConfig};
pub use error::{StreamingError, StreamingResult};
pub use manager::{StreamingAllocator, StreamingStats};
pub use queue::{InlineExecutor, IoExecutor, IoKind, IoOperation};
pub use resource::{
    LoadCallback, ResourceCategory, ResourceId, ResourcePriority, ResourceRequest, ResourceState,
};
