//! # FAFNIR Paging
//!
//! The OS boundary of the FAFNIR memory subsystem: page-granularity
//! virtual memory with protection modes, commit/decommit, guard pages,
//! address-space pre-reservation and file-backed mappings.
//!
//! ## Architecture Rules
//!
//! 1. **One crate talks to the OS** - everything above this crate deals in
//!    regions and handles, never in mappings
//! 2. **Unsafe is quarantined** - `os.rs` holds every unsafe block, each
//!    one reviewed and documented
//! 3. **OS failures are named** - every error wraps the failing call and
//!    its errno cause; nothing is silently ignored
//!
//! ## Example
//!
//! ```rust,ignore
//! use fafnir_paging::{PageAllocator, PageFlags, PageProtection};
//!
//! let pages = PageAllocator::with_reserve(64 * 1024 * 1024)?;
//! let block = pages.allocate(
//!     128 * 1024,
//!     PageProtection::ReadWrite,
//!     PageFlags::NONE.with_zeroed().with_reserve(),
//! )?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod error;
mod os;
pub mod page;

pub use error::{PagingError, PagingResult};
pub use page::{
    PageAllocator, PageBlock, PageFlags, PageInfo, PageProtection, PagingStats,
};
