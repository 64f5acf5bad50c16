//! # IO Operation Queue & Executor Seam
//!
//! Load/unload work is modelled as ephemeral [`IoOperation`]s, ordered by
//! priority (lower enum value first), then distance from the reference
//! point, then submission order. The manager keeps the priority queue;
//! the *executor* is an injected seam so a real background pipeline can
//! replace the bundled pass-through without touching the state machine.

use std::cmp::Ordering;
use std::path::PathBuf;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::resource::{ResourceId, ResourcePriority};

/// What an operation does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IoKind {
    /// Populate backing memory from the resource's file.
    Load,
    /// Release backing memory.
    Unload,
}

/// One queued load or unload. Ephemeral: created by scheduling, consumed
/// by the same or a later `update` tick.
#[derive(Clone, Debug)]
pub struct IoOperation {
    /// What to do.
    pub kind: IoKind,
    /// Which resource.
    pub id: ResourceId,
    /// Source file (loads only).
    pub path: Option<PathBuf>,
    /// Priority copied from the resource at scheduling time.
    pub priority: ResourcePriority,
    /// Distance from the reference point, quantized to whole units.
    /// Recomputed every tick for pending loads.
    pub(crate) distance: u32,
    /// Submission order; ties at equal priority and distance are FIFO.
    pub(crate) sequence: u64,
}

impl IoOperation {
    fn key(&self) -> (u8, u32, u64) {
        (self.priority as u8, self.distance, self.sequence)
    }
}

impl PartialEq for IoOperation {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for IoOperation {}

// Ordered REVERSED so std's max-heap pops the smallest key: highest
// priority, then nearest, then first submitted.
impl Ord for IoOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

impl PartialOrd for IoOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The executor seam.
///
/// `update` submits up to its per-tick cap of operations, then polls for
/// completions and applies their state transitions. The bundled
/// [`InlineExecutor`] completes everything it is handed on the same tick,
/// which makes `LOADING` instantaneous in practice; a real background
/// executor changes the timing, not the contract.
pub trait IoExecutor: Send {
    /// Accepts an operation for execution.
    fn submit(&self, op: IoOperation);

    /// Drains every operation whose IO phase has finished.
    fn poll_completed(&self) -> Vec<IoOperation>;

    /// Operations submitted but not yet polled back.
    fn in_flight(&self) -> usize;
}

/// The bundled synchronous executor: a channel pass-through.
pub struct InlineExecutor {
    /// Submission side.
    tx: Sender<IoOperation>,
    /// Completion side.
    rx: Receiver<IoOperation>,
}

impl InlineExecutor {
    /// Creates the pass-through pipe.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl IoExecutor for InlineExecutor {
    fn submit(&self, op: IoOperation) {
        // An unbounded channel cannot refuse; ignore the impossible error
        // rather than panicking in a destructor-adjacent path.
        let _ = self.tx.send(op);
    }

    fn poll_completed(&self) -> Vec<IoOperation> {
        self.rx.try_iter().collect()
    }

    fn in_flight(&self) -> usize {
        self.rx.len()
    }
}
