//! # Streaming Allocator
//!
//! The residency manager: one table of resources, one priority queue of
//! IO operations, one page allocator it owns exclusively.
//!
//! ## Per-Tick Work
//!
//! Each `update(delta_time)`:
//!
//! 1. advances the manager clock
//! 2. recomputes distance-from-reference for every pending load
//! 3. expires idle auto-unload residents past the cache timeout
//!    (never `Critical`, never referenced)
//! 4. drains up to `max_concurrent_operations` operations through the
//!    executor and applies the completions against the page allocator
//!
//! ## Protections
//!
//! `Critical` resources and resources with a positive reference count are
//! never unloaded - not by the idle sweep, not by `clear_non_critical`,
//! not by an explicit `unload_resource`. A load that would break its
//! category budget fails the resource instead of breaking the ceiling.

use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;

use fafnir_paging::{PageAllocator, PageFlags, PageProtection};

use crate::budget::MemoryBudgets;
use crate::config::StreamingConfig;
use crate::queue::{InlineExecutor, IoExecutor, IoKind, IoOperation};
use crate::resource::{
    ResourceEntry, ResourceId, ResourcePriority, ResourceRequest, ResourceState,
};

/// Point-in-time manager numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Resources the manager knows about.
    pub resource_count: usize,
    /// Resources currently resident.
    pub resident_count: usize,
    /// Operations waiting in the priority queue.
    pub queued_operations: usize,
    /// Total bytes ever loaded.
    pub bytes_loaded: u64,
    /// Total bytes ever unloaded.
    pub bytes_unloaded: u64,
    /// Loads completed successfully.
    pub loads_completed: u64,
    /// Loads that failed (budget or OS).
    pub loads_failed: u64,
    /// Unloads completed.
    pub unloads_completed: u64,
    /// Residents expired by the idle sweep.
    pub expired: u64,
}

/// Everything the manager mutex guards.
struct StreamingCore {
    /// The exclusively-owned page allocator backing every resource.
    pages: PageAllocator,
    /// The resource table.
    entries: HashMap<ResourceId, ResourceEntry>,
    /// Pending operations, highest priority first.
    queue: BinaryHeap<IoOperation>,
    /// The injected executor.
    executor: Box<dyn IoExecutor>,
    /// Per-category ceilings and usage.
    budgets: MemoryBudgets,
    /// Manager clock in seconds, advanced by `update`.
    clock: f64,
    /// Submission sequence for FIFO tie-breaks.
    next_sequence: u64,
    /// Reference point for distance prioritization.
    reference_point: [f32; 3],
    /// Running counters for `stats`.
    bytes_loaded: u64,
    /// Running counters for `stats`.
    bytes_unloaded: u64,
    /// Running counters for `stats`.
    loads_completed: u64,
    /// Running counters for `stats`.
    loads_failed: u64,
    /// Running counters for `stats`.
    unloads_completed: u64,
    /// Running counters for `stats`.
    expired: u64,
}

/// Quantizes a distance to whole units for queue ordering.
fn quantize(distance: f32) -> u32 {
    distance.max(0.0) as u32
}

impl StreamingCore {
    fn schedule_load(&mut self, id: ResourceId) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let reference = self.reference_point;
        let op = {
            let Some(entry) = self.entries.get_mut(&id) else {
                return;
            };
            entry.state = ResourceState::Loading;
            IoOperation {
                kind: IoKind::Load,
                id,
                path: Some(entry.path.clone()),
                priority: entry.priority,
                distance: quantize(entry.distance_from(reference)),
                sequence,
            }
        };
        tracing::debug!(%id, "load scheduled");
        self.queue.push(op);
    }

    fn schedule_unload(&mut self, id: ResourceId) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let op = {
            let Some(entry) = self.entries.get_mut(&id) else {
                return;
            };
            entry.state = ResourceState::Unloading;
            IoOperation {
                kind: IoKind::Unload,
                id,
                path: None,
                priority: entry.priority,
                distance: 0,
                sequence,
            }
        };
        tracing::debug!(%id, "unload scheduled");
        self.queue.push(op);
    }

    /// Refreshes distance (and any updated priority) on pending loads so
    /// the queue tracks the reference point as it moves.
    fn reprioritize(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let reference = self.reference_point;
        let mut ops = std::mem::take(&mut self.queue).into_vec();
        for op in &mut ops {
            if op.kind == IoKind::Load {
                if let Some(entry) = self.entries.get(&op.id) {
                    op.distance = quantize(entry.distance_from(reference));
                    op.priority = entry.priority;
                }
            }
        }
        self.queue = BinaryHeap::from(ops);
    }

    /// Schedules unloads for idle auto-unload residents. Critical and
    /// referenced residents are exempt unconditionally.
    fn expire_idle(&mut self, timeout: f64) {
        let clock = self.clock;
        let expired: Vec<ResourceId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == ResourceState::Resident
                    && entry.auto_unload
                    && entry.priority != ResourcePriority::Critical
                    && entry.ref_count == 0
                    && clock - entry.last_used > timeout
            })
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            tracing::debug!(%id, "idle resource expired");
            self.expired += 1;
            self.schedule_unload(id);
        }
    }

    fn execute(&mut self, op: IoOperation) {
        match op.kind {
            IoKind::Load => self.execute_load(&op),
            IoKind::Unload => self.execute_unload(op.id),
        }
    }

    fn execute_load(&mut self, op: &IoOperation) {
        let Some(entry) = self.entries.get_mut(&op.id) else {
            return;
        };
        // A cancelled or superseded operation: the state moved on.
        if entry.state != ResourceState::Loading {
            tracing::debug!(id = %op.id, state = ?entry.state, "stale load skipped");
            return;
        }

        let path = entry.path.clone();
        let file_len = match std::fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => usize::try_from(meta.len()).unwrap_or(usize::MAX),
            Ok(_) => {
                tracing::warn!(id = %op.id, ?path, "empty resource file");
                entry.state = ResourceState::Failed;
                self.loads_failed += 1;
                return;
            }
            Err(error) => {
                tracing::warn!(id = %op.id, ?path, %error, "resource file unavailable");
                entry.state = ResourceState::Failed;
                self.loads_failed += 1;
                return;
            }
        };

        // The page allocator rounds up; the budget must see that size.
        let page_size = self.pages.page_size();
        let needed = file_len.div_ceil(page_size) * page_size;
        if !self.budgets.has_available(entry.category, needed) {
            tracing::warn!(
                id = %op.id,
                category = ?entry.category,
                needed,
                "load over category budget, failing resource"
            );
            entry.state = ResourceState::Failed;
            self.loads_failed += 1;
            return;
        }

        match self.pages.allocate_file(
            &path,
            file_len,
            0,
            PageProtection::ReadOnly,
            PageFlags::NONE,
        ) {
            Ok(block) => {
                entry.block = Some(block);
                entry.size = block.len();
                entry.state = ResourceState::Resident;
                entry.last_used = self.clock;
                self.budgets.debit(entry.category, block.len());
                self.bytes_loaded += block.len() as u64;
                self.loads_completed += 1;
                tracing::debug!(id = %op.id, bytes = block.len(), "resource resident");
                if let Some(callback) = &entry.on_loaded {
                    if self
                        .pages
                        .with_bytes(block, |bytes| callback(op.id, bytes))
                        .is_err()
                    {
                        tracing::warn!(id = %op.id, "load callback could not view bytes");
                    }
                }
            }
            Err(error) => {
                tracing::warn!(id = %op.id, %error, "page allocation failed");
                entry.state = ResourceState::Failed;
                self.loads_failed += 1;
            }
        }
    }

    fn execute_unload(&mut self, id: ResourceId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        // A cancelled unload: the resource was re-requested meanwhile.
        if entry.state != ResourceState::Unloading {
            tracing::debug!(%id, state = ?entry.state, "stale unload skipped");
            return;
        }
        let Some(block) = entry.block.take() else {
            entry.state = ResourceState::Unloaded;
            return;
        };
        let category = entry.category;
        let size = block.len();
        entry.state = ResourceState::Unloaded;
        entry.size = 0;
        if !self.pages.deallocate(block) {
            tracing::warn!(%id, "page deallocation refused during unload");
        }
        self.budgets.credit(category, size);
        self.bytes_unloaded += size as u64;
        self.unloads_completed += 1;
        tracing::debug!(%id, bytes = size, "resource unloaded");
    }

    fn reset(&mut self) {
        self.queue.clear();
        let _ = self.executor.poll_completed();
        for entry in self.entries.values_mut() {
            if let Some(block) = entry.block.take() {
                if !self.pages.deallocate(block) {
                    tracing::warn!("page deallocation refused during reset");
                }
                self.budgets.credit(entry.category, block.len());
            }
        }
        self.entries.clear();
    }
}

/// The streaming resource-residency manager.
///
/// # Example
///
/// ```rust,ignore
/// let streaming = StreamingAllocator::new(StreamingConfig::load(&config_path)?);
///
/// streaming.request_resource(
///     ResourceRequest::new(ResourceId(1), "assets/keep.mesh", ResourceCategory::Geometry)
///         .with_priority(ResourcePriority::Critical),
/// );
///
/// // Per frame:
/// streaming.set_reference_point(player_position);
/// streaming.update(delta_time);
/// ```
pub struct StreamingAllocator {
    /// Everything mutable, behind one mutex. Callbacks run under it: they
    /// must not call back into the manager.
    inner: Mutex<StreamingCore>,
    /// Immutable tuning knobs.
    config: StreamingConfig,
}

impl StreamingAllocator {
    /// Creates a manager with the bundled inline executor.
    #[must_use]
    pub fn new(config: StreamingConfig) -> Self {
        Self::with_executor(config, Box::new(InlineExecutor::new()))
    }

    /// Creates a manager with an injected executor.
    #[must_use]
    pub fn with_executor(config: StreamingConfig, executor: Box<dyn IoExecutor>) -> Self {
        let pages = if config.reserve_bytes > 0 {
            PageAllocator::with_reserve(config.reserve_bytes).unwrap_or_else(|error| {
                tracing::warn!(%error, "reserve unavailable, falling back to direct mappings");
                PageAllocator::new()
            })
        } else {
            PageAllocator::new()
        };
        Self {
            inner: Mutex::new(StreamingCore {
                pages,
                entries: HashMap::new(),
                queue: BinaryHeap::new(),
                executor,
                budgets: config.budgets.budgets(),
                clock: 0.0,
                next_sequence: 0,
                reference_point: [0.0; 3],
                bytes_loaded: 0,
                bytes_unloaded: 0,
                loads_completed: 0,
                loads_failed: 0,
                unloads_completed: 0,
                expired: 0,
            }),
            config,
        }
    }

    /// Requests a resource: creates it unloaded and schedules its load,
    /// or refreshes an existing entry (cancelling a pending unload, or
    /// rescheduling a failed load).
    pub fn request_resource(&self, request: ResourceRequest) -> ResourceId {
        let mut core = self.inner.lock();
        let clock = core.clock;
        let id = request.id;

        let needs_load = if let Some(entry) = core.entries.get_mut(&id) {
            entry.priority = request.priority;
            entry.auto_unload = request.auto_unload;
            entry.position = request.position;
            if request.on_loaded.is_some() {
                entry.on_loaded = request.on_loaded;
            }
            entry.last_used = clock;
            match entry.state {
                ResourceState::Unloading => {
                    // Cancel: the queued unload will see RESIDENT and skip.
                    tracing::debug!(%id, "pending unload cancelled by re-request");
                    entry.state = ResourceState::Resident;
                    false
                }
                ResourceState::Unloaded | ResourceState::Failed => true,
                ResourceState::Loading | ResourceState::Resident => false,
            }
        } else {
            core.entries.insert(
                id,
                ResourceEntry {
                    path: request.path,
                    category: request.category,
                    priority: request.priority,
                    state: ResourceState::Unloaded,
                    size: 0,
                    last_used: clock,
                    ref_count: 0,
                    auto_unload: request.auto_unload,
                    position: request.position,
                    block: None,
                    on_loaded: request.on_loaded,
                },
            );
            true
        };
        if needs_load {
            core.schedule_load(id);
        }
        id
    }

    /// One frame of streaming work.
    pub fn update(&self, delta_time: f64) {
        let mut core = self.inner.lock();
        core.clock += delta_time;
        core.reprioritize();
        core.expire_idle(self.config.cache_timeout_seconds);

        for _ in 0..self.config.max_concurrent_operations {
            let Some(op) = core.queue.pop() else {
                break;
            };
            core.executor.submit(op);
        }
        for op in core.executor.poll_completed() {
            core.execute(op);
        }
    }

    /// Runs `f` over a resident resource's bytes, refreshing its
    /// last-used time. `None` when the resource is not resident.
    pub fn access_resource<R>(&self, id: ResourceId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let mut core = self.inner.lock();
        let clock = core.clock;
        let block = {
            let entry = core.entries.get_mut(&id)?;
            if entry.state != ResourceState::Resident {
                return None;
            }
            entry.last_used = clock;
            entry.block?
        };
        core.pages.with_bytes(block, f).ok()
    }

    /// Takes a reference: the resource cannot be unloaded while held.
    pub fn reference_resource(&self, id: ResourceId) -> bool {
        let mut core = self.inner.lock();
        let clock = core.clock;
        let Some(entry) = core.entries.get_mut(&id) else {
            return false;
        };
        entry.ref_count += 1;
        entry.last_used = clock;
        true
    }

    /// Releases a reference taken with
    /// [`StreamingAllocator::reference_resource`].
    pub fn release_resource(&self, id: ResourceId) -> bool {
        let mut core = self.inner.lock();
        let clock = core.clock;
        let Some(entry) = core.entries.get_mut(&id) else {
            return false;
        };
        if entry.ref_count == 0 {
            tracing::warn!(%id, "release without a matching reference");
            return false;
        }
        entry.ref_count -= 1;
        entry.last_used = clock;
        true
    }

    /// Schedules an unload. Refused (with a report) for `Critical`
    /// resources, referenced resources, and resources not resident.
    pub fn unload_resource(&self, id: ResourceId) -> bool {
        let mut core = self.inner.lock();
        let refused = {
            let Some(entry) = core.entries.get(&id) else {
                return false;
            };
            if entry.priority == ResourcePriority::Critical {
                tracing::warn!(%id, "refusing to unload CRITICAL resource");
                true
            } else if entry.ref_count > 0 {
                tracing::warn!(%id, refs = entry.ref_count, "refusing to unload referenced resource");
                true
            } else {
                entry.state != ResourceState::Resident
            }
        };
        if refused {
            return false;
        }
        core.schedule_unload(id);
        true
    }

    /// Schedules unloads for every non-critical, unreferenced resident.
    /// Returns how many were scheduled.
    pub fn clear_non_critical(&self) -> usize {
        let mut core = self.inner.lock();
        let victims: Vec<ResourceId> = core
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.state == ResourceState::Resident
                    && entry.priority != ResourcePriority::Critical
                    && entry.ref_count == 0
            })
            .map(|(&id, _)| id)
            .collect();
        let count = victims.len();
        for id in victims {
            core.schedule_unload(id);
        }
        count
    }

    /// Moves the reference point used for distance-prioritized loading.
    pub fn set_reference_point(&self, point: [f32; 3]) {
        self.inner.lock().reference_point = point;
    }

    /// Residency state of a resource, if known.
    #[must_use]
    pub fn resource_state(&self, id: ResourceId) -> Option<ResourceState> {
        self.inner.lock().entries.get(&id).map(|entry| entry.state)
    }

    /// Mapped size in bytes of a known resource (0 unless resident).
    #[must_use]
    pub fn resource_size(&self, id: ResourceId) -> Option<usize> {
        self.inner.lock().entries.get(&id).map(|entry| entry.size)
    }

    /// Number of resources the manager knows about.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// A copy of the current budget table.
    #[must_use]
    pub fn budgets(&self) -> MemoryBudgets {
        self.inner.lock().budgets
    }

    /// Returns a point-in-time snapshot of manager numbers.
    #[must_use]
    pub fn stats(&self) -> StreamingStats {
        let core = self.inner.lock();
        StreamingStats {
            resource_count: core.entries.len(),
            resident_count: core
                .entries
                .values()
                .filter(|entry| entry.state == ResourceState::Resident)
                .count(),
            queued_operations: core.queue.len() + core.executor.in_flight(),
            bytes_loaded: core.bytes_loaded,
            bytes_unloaded: core.bytes_unloaded,
            loads_completed: core.loads_completed,
            loads_failed: core.loads_failed,
            unloads_completed: core.unloads_completed,
            expired: core.expired,
        }
    }

    /// Unloads everything and forgets every resource. Slots freed here
    /// are reused by later requests; the clock keeps running.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}
