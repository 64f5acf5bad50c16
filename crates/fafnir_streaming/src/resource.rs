//! # Resource Model
//!
//! Identities, categories, priorities and the residency lifecycle.
//!
//! ## Lifecycle
//!
//! ```text
//! UNLOADED ──schedule──▶ LOADING ──success──▶ RESIDENT
//!     ▲                     │                     │
//!     │                     └──over budget──▶ FAILED (until re-requested)
//!     │
//!     └────────── UNLOADING ◀──schedule unload────┘
//! ```
//!
//! `FAILED` is terminal until the resource is requested again; `RESIDENT`
//! is the usable state. A resource entry is destroyed only when the owning
//! manager is destroyed or its slot is reused after a reset.

use std::path::PathBuf;

use fafnir_paging::PageBlock;

/// Engine-wide identity of a streamed resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(
    /// The raw asset id.
    pub u64,
);

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res:{:#x}", self.0)
    }
}

/// Budget category a resource belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    /// Meshes and collision geometry.
    Geometry,
    /// Texture data.
    Texture,
    /// Audio banks.
    Audio,
    /// Animation clips.
    Animation,
    /// Scripts and data tables.
    Script,
}

impl ResourceCategory {
    /// Number of categories.
    pub const COUNT: usize = 5;

    /// Every category, in budget-table order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Geometry,
        Self::Texture,
        Self::Audio,
        Self::Animation,
        Self::Script,
    ];

    /// Budget-table index of this category.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Geometry => 0,
            Self::Texture => 1,
            Self::Audio => 2,
            Self::Animation => 3,
            Self::Script => 4,
        }
    }
}

/// Load/retention priority. Lower value means more important: `Critical`
/// loads first and is never evicted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourcePriority {
    /// Never evicted; loads before everything else.
    Critical = 0,
    /// Loads before normal traffic.
    High = 1,
    /// The default.
    #[default]
    Normal = 2,
    /// Loads last, evicted first.
    Low = 3,
}

/// Residency state of a resource.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceState {
    /// Known, but without backing memory.
    #[default]
    Unloaded,
    /// A load operation is queued or in flight.
    Loading,
    /// Backing memory is populated and accessible.
    Resident,
    /// An unload operation is queued or in flight.
    Unloading,
    /// The last load failed; stays failed until re-requested.
    Failed,
}

/// Callback invoked when a resource becomes resident.
///
/// Runs under the manager lock: it must not call back into the manager.
pub type LoadCallback = Box<dyn Fn(ResourceId, &[u8]) + Send + Sync>;

/// A request handed to `request_resource`.
///
/// Built with chained `with_` methods, the way the engine builds all of
/// its one-shot parameter bundles.
pub struct ResourceRequest {
    /// Identity of the requested resource.
    pub id: ResourceId,
    /// File the resource streams from.
    pub path: PathBuf,
    /// Budget category.
    pub category: ResourceCategory,
    /// Load/retention priority.
    pub priority: ResourcePriority,
    /// Unload automatically after the idle timeout.
    pub auto_unload: bool,
    /// World position, for distance-prioritized loading.
    pub position: Option<[f32; 3]>,
    /// Invoked once the resource is resident.
    pub on_loaded: Option<LoadCallback>,
}

impl ResourceRequest {
    /// A request with default priority, no auto-unload, no position.
    #[must_use]
    pub fn new(id: ResourceId, path: impl Into<PathBuf>, category: ResourceCategory) -> Self {
        Self {
            id,
            path: path.into(),
            category,
            priority: ResourcePriority::default(),
            auto_unload: false,
            position: None,
            on_loaded: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: ResourcePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Enables idle auto-unload.
    #[must_use]
    pub fn with_auto_unload(mut self) -> Self {
        self.auto_unload = true;
        self
    }

    /// Sets the world position used for distance prioritization.
    #[must_use]
    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = Some(position);
        self
    }

    /// Sets the load callback.
    #[must_use]
    pub fn with_callback(mut self, callback: LoadCallback) -> Self {
        self.on_loaded = Some(callback);
        self
    }
}

/// One tracked resource. Internal to the manager.
pub(crate) struct ResourceEntry {
    /// File the resource streams from.
    pub(crate) path: PathBuf,
    /// Budget category.
    pub(crate) category: ResourceCategory,
    /// Load/retention priority.
    pub(crate) priority: ResourcePriority,
    /// Residency state.
    pub(crate) state: ResourceState,
    /// Mapped size while resident, in bytes.
    pub(crate) size: usize,
    /// Manager-clock time of the last access.
    pub(crate) last_used: f64,
    /// Outstanding references; positive blocks unload unconditionally.
    pub(crate) ref_count: u32,
    /// Unload automatically after the idle timeout.
    pub(crate) auto_unload: bool,
    /// World position, for distance prioritization.
    pub(crate) position: Option<[f32; 3]>,
    /// Backing pages while resident.
    pub(crate) block: Option<PageBlock>,
    /// Invoked once the resource is resident.
    pub(crate) on_loaded: Option<LoadCallback>,
}

impl ResourceEntry {
    /// Distance from `point`, for load ordering. Resources without a
    /// position count as at the reference point itself.
    pub(crate) fn distance_from(&self, point: [f32; 3]) -> f32 {
        self.position.map_or(0.0, |position| {
            let dx = position[0] - point[0];
            let dy = position[1] - point[1];
            let dz = position[2] - point[2];
            (dx * dx + dy * dy + dz * dz).sqrt()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_orders_critical_first() {
        assert!(ResourcePriority::Critical < ResourcePriority::High);
        assert!(ResourcePriority::High < ResourcePriority::Normal);
        assert!(ResourcePriority::Normal < ResourcePriority::Low);
    }

    #[test]
    fn test_category_indices_cover_table() {
        for (expected, category) in ResourceCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), expected);
        }
    }

    #[test]
    fn test_request_builder() {
        let request = ResourceRequest::new(ResourceId(7), "/tmp/mesh.bin", ResourceCategory::Geometry)
            .with_priority(ResourcePriority::High)
            .with_auto_unload()
            .with_position([1.0, 2.0, 3.0]);
        assert_eq!(request.priority, ResourcePriority::High);
        assert!(request.auto_unload);
        assert_eq!(request.position, Some([1.0, 2.0, 3.0]));
    }
}
