//! # Paging Error Types
//!
//! OS-call failures are never swallowed: every variant that wraps one
//! names the call that failed and carries the `errno`-derived cause.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur at the OS paging boundary.
#[derive(Error, Debug)]
pub enum PagingError {
    /// A zero-byte mapping was requested.
    #[error("zero-size page allocation refused")]
    ZeroSize,

    /// An address does not fall inside any live allocation.
    #[error("address {address:#x} is not part of any live page allocation")]
    UnknownAddress {
        /// The address that failed containment.
        address: usize,
    },

    /// An OS call failed.
    #[error("{call} failed")]
    OsFailure {
        /// The libc call that failed.
        call: &'static str,
        /// The errno-derived cause.
        #[source]
        source: io::Error,
    },

    /// A backing file could not be opened or inspected.
    #[error("backing file {path:?} unavailable")]
    FileUnavailable {
        /// The file that was requested.
        path: PathBuf,
        /// The IO cause.
        #[source]
        source: io::Error,
    },

    /// The backing file has no bytes at or past the requested offset.
    #[error("backing file {path:?} has no data at offset {offset}")]
    FileTooSmall {
        /// The file that was requested.
        path: PathBuf,
        /// The requested offset.
        offset: u64,
    },

    /// A file offset was not page-aligned.
    #[error("file offset {offset} is not aligned to the {page_size}-byte page size")]
    OffsetNotAligned {
        /// The requested offset.
        offset: u64,
        /// The system page size.
        page_size: usize,
    },

    /// The operation is meaningless for this mapping kind.
    #[error("flush requires a writable, file-backed shared mapping")]
    NotFlushable,

    /// Byte access was denied by the mapping's protection mode.
    #[error("access denied by protection mode on pages at {address:#x}")]
    ProtectionDenied {
        /// Base address of the allocation.
        address: usize,
    },
}

/// Result type for paging operations.
pub type PagingResult<T> = Result<T, PagingError>;
