//! # Memory Error Types
//!
//! All misuse errors the allocator family can report.
//!
//! Capacity exhaustion is NOT an error: allocation paths return `None` and
//! the caller decides. These variants cover caller mistakes (bad alignment,
//! foreign handles, marker misordering) which are reported and then handled
//! in a safe no-op state - memory is never corrupted to "make it work".

use thiserror::Error;

/// Errors that can occur in the allocator family.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Alignment was zero or not a power of two.
    #[error("invalid alignment: {alignment} (must be a nonzero power of two)")]
    InvalidAlignment {
        /// The alignment that was requested.
        alignment: usize,
    },

    /// A stack marker pointed past the current position.
    #[error("marker {marker} is past the current stack position {position}")]
    MarkerOutOfOrder {
        /// The offset encoded in the marker.
        marker: usize,
        /// The stack's current offset.
        position: usize,
    },

    /// A rollback was requested on a stack with no outstanding allocations.
    #[error("nothing to free: the stack has no outstanding allocations")]
    NothingToFree,

    /// A handle does not belong to this allocator.
    #[error("block at offset {offset} is not owned by this allocator")]
    ForeignBlock {
        /// Offset carried by the rejected handle.
        offset: usize,
    },

    /// A block was freed twice.
    #[error("double free of block at offset {offset}")]
    DoubleFree {
        /// Offset of the block that was already free.
        offset: usize,
    },

    /// A handle offset is not aligned to the pool's block size.
    #[error("offset {offset} is not aligned to block size {block_size}")]
    Misaligned {
        /// The offending offset.
        offset: usize,
        /// The pool's block size.
        block_size: usize,
    },

    /// An allocator was constructed over a region too small for its layout.
    #[error("region of {capacity} bytes cannot hold the requested layout ({required} bytes required)")]
    RegionTooSmall {
        /// Bytes the layout needs.
        required: usize,
        /// Bytes the region provides.
        capacity: usize,
    },
}

/// Result type for allocator-family operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
