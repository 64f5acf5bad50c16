//! # OS Call Veneer
//!
//! The one module in this crate allowed to contain unsafe code.
//!
//! ## Safety Note
//!
//! Everything here is a thin, reviewed wrapper over libc virtual-memory
//! calls. The wrappers validate nothing about ownership - the page
//! allocator's registry is the authority on which ranges are live - but
//! each one upholds the narrow contract its call requires (page-aligned
//! lengths are produced by the caller, pointers come from `mmap`). All
//! unsafe blocks are carefully reviewed and documented.

#![allow(unsafe_code)]

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr::{self, NonNull};

/// One mapped range, unmapped on drop.
#[derive(Debug)]
pub(crate) struct MappedRange {
    /// Base of the mapping.
    ptr: NonNull<u8>,
    /// Length in bytes (page-rounded by the caller).
    len: usize,
}

// A mapping is plain memory; the registry serializes all access to it.
unsafe impl Send for MappedRange {}
unsafe impl Sync for MappedRange {}

impl MappedRange {
    /// Base address as an integer handle.
    #[inline]
    pub(crate) fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// Length in bytes.
    #[inline]
    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    /// Shared view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The range must be inside the mapping, readable under its current
    /// protection, and free of concurrent writers (the registry lock is
    /// held across every access).
    #[inline]
    pub(crate) unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len)
    }

    /// Exclusive view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// As [`MappedRange::slice`], and the pages must be writable.
    #[inline]
    #[allow(clippy::mut_from_ref)] // exclusivity comes from the registry lock
    pub(crate) unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for MappedRange {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and were never
        // partially unmapped. A failing munmap leaks the range; there is
        // nothing sensible to do beyond reporting it.
        let rc = unsafe { libc::munmap(self.ptr.as_ptr().cast(), self.len) };
        if rc != 0 {
            tracing::warn!(
                base = self.base(),
                len = self.len,
                "munmap failed, leaking range"
            );
        }
    }
}

/// System page size in bytes.
pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no memory preconditions.
    let value = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(value).unwrap_or(4096)
}

/// Maps `len` bytes of anonymous memory with `prot`.
pub(crate) fn map_anonymous(len: usize, prot: i32, shared: bool) -> io::Result<MappedRange> {
    let visibility = if shared {
        libc::MAP_SHARED
    } else {
        libc::MAP_PRIVATE
    };
    // SAFETY: a fresh anonymous mapping has no aliasing to violate; the
    // result is checked against MAP_FAILED before use.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            visibility | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(MappedRange {
        ptr: NonNull::new(ptr.cast()).ok_or_else(io::Error::last_os_error)?,
        len,
    })
}

/// Maps `len` bytes of `file` starting at the page-aligned `offset`.
pub(crate) fn map_file(
    file: &File,
    len: usize,
    offset: u64,
    prot: i32,
    shared: bool,
) -> io::Result<MappedRange> {
    let visibility = if shared {
        libc::MAP_SHARED
    } else {
        libc::MAP_PRIVATE
    };
    // SAFETY: the fd is live for the duration of the call (mappings
    // outlive the fd by design); the result is checked before use.
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            prot,
            visibility,
            file.as_raw_fd(),
            libc::off_t::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(MappedRange {
        ptr: NonNull::new(ptr.cast()).ok_or_else(io::Error::last_os_error)?,
        len,
    })
}

/// Changes protection on `len` bytes at `address`.
pub(crate) fn protect(address: usize, len: usize, prot: i32) -> io::Result<()> {
    // SAFETY: the caller derived address/len from a live registry entry,
    // so the range is a mapping this process owns.
    let rc = unsafe { libc::mprotect(address as *mut libc::c_void, len, prot) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Synchronously flushes `len` bytes at `address` to the backing file.
pub(crate) fn sync(address: usize, len: usize) -> io::Result<()> {
    // SAFETY: as in `protect`.
    let rc = unsafe { libc::msync(address as *mut libc::c_void, len, libc::MS_SYNC) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Tells the OS the pages at `address` hold no useful data.
pub(crate) fn discard(address: usize, len: usize) -> io::Result<()> {
    // SAFETY: as in `protect`. MADV_DONTNEED zero-fills anonymous pages on
    // next touch, which is exactly the decommit contract.
    let rc = unsafe { libc::madvise(address as *mut libc::c_void, len, libc::MADV_DONTNEED) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}
