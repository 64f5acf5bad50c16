//! # Page Allocator
//!
//! Virtual memory at page granularity: protection modes, commit/decommit,
//! guard pages, optional address-space pre-reservation and file-backed
//! mappings.
//!
//! ## Bookkeeping
//!
//! Every live allocation has a registry entry; `protect`, `commit`,
//! `decommit` and `flush` re-derive the owning entry by address-range
//! containment and fail for unknown addresses. No two live entries
//! overlap. The registry lock also serializes byte access, so no view can
//! outlive its mapping.
//!
//! ## Reservation
//!
//! `with_reserve` maps one large inaccessible range up front; allocations
//! carrying the `prefer_reserve` flag carve from it (first fit) instead of
//! paying an OS reservation per call, and fall back to a fresh mapping
//! when the reserve is exhausted. Returned carvings are discarded and
//! re-protected inaccessible, then merged back into the free list.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{PagingError, PagingResult};
use crate::os::{self, MappedRange};

/// Protection mode of a page range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageProtection {
    /// No access; touching the pages faults.
    NoAccess,
    /// Read-only.
    ReadOnly,
    /// Read and write.
    #[default]
    ReadWrite,
    /// Read and execute - for JIT-style consumers.
    ReadExecute,
}

impl PageProtection {
    /// The libc protection word.
    pub(crate) const fn as_native(self) -> i32 {
        match self {
            Self::NoAccess => libc::PROT_NONE,
            Self::ReadOnly => libc::PROT_READ,
            Self::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
            Self::ReadExecute => libc::PROT_READ | libc::PROT_EXEC,
        }
    }

    /// Whether reads are permitted.
    #[inline]
    #[must_use]
    pub const fn allows_read(self) -> bool {
        !matches!(self, Self::NoAccess)
    }

    /// Whether writes are permitted.
    #[inline]
    #[must_use]
    pub const fn allows_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Allocation flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageFlags {
    /// Guarantee all-zero bytes before the first user read.
    pub zeroed: bool,
    /// Put an inaccessible page on each side of the allocation.
    pub guard_pages: bool,
    /// Use a shared mapping (visible to children / the backing file).
    pub shared: bool,
    /// Carve from the pre-reserved range when one exists.
    pub prefer_reserve: bool,
}

impl PageFlags {
    /// No flags set.
    pub const NONE: Self = Self {
        zeroed: false,
        guard_pages: false,
        shared: false,
        prefer_reserve: false,
    };

    /// Returns the flags with zero-fill requested.
    #[must_use]
    pub const fn with_zeroed(mut self) -> Self {
        self.zeroed = true;
        self
    }

    /// Returns the flags with guard pages requested.
    #[must_use]
    pub const fn with_guard_pages(mut self) -> Self {
        self.guard_pages = true;
        self
    }

    /// Returns the flags with a shared mapping requested.
    #[must_use]
    pub const fn with_shared(mut self) -> Self {
        self.shared = true;
        self
    }

    /// Returns the flags preferring the reserve.
    #[must_use]
    pub const fn with_reserve(mut self) -> Self {
        self.prefer_reserve = true;
        self
    }
}

/// Handle to one page allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageBlock {
    /// User base address.
    base: usize,
    /// User length in bytes (page-rounded).
    len: usize,
}

impl PageBlock {
    /// User base address.
    #[inline]
    #[must_use]
    pub const fn base(self) -> usize {
        self.base
    }

    /// User length in bytes (page-rounded).
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len
    }

    /// Always false - zero-size allocations are refused.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

/// Snapshot of one live allocation's bookkeeping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageInfo {
    /// User base address.
    pub base: usize,
    /// User length in bytes (page-rounded).
    pub size: usize,
    /// Number of user pages.
    pub page_count: usize,
    /// Current protection mode.
    pub protection: PageProtection,
    /// Flags the allocation was made with.
    pub flags: PageFlags,
    /// Backing file, if file-mapped.
    pub file: Option<PathBuf>,
    /// Whether the pages are currently committed.
    pub committed: bool,
}

/// Point-in-time allocator numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagingStats {
    /// System page size in bytes.
    pub page_size: usize,
    /// Live allocations.
    pub live_allocations: usize,
    /// User bytes across live allocations.
    pub bytes_mapped: usize,
    /// Total reserve capacity (0 without a reserve).
    pub reserve_capacity: usize,
    /// Reserve bytes currently free.
    pub reserve_free: usize,
}

/// Where an allocation's pages came from.
enum Backing {
    /// A dedicated mapping, unmapped on entry removal.
    Owned(MappedRange),
    /// A carving from the pre-reserved range.
    Reserve {
        /// Offset of the carving (full range, guards included).
        offset: usize,
    },
}

/// Registry entry for one live allocation.
struct PageEntry {
    /// The pages themselves.
    backing: Backing,
    /// Full base address, guards included.
    full_base: usize,
    /// Full length, guards included.
    full_len: usize,
    /// User base address (inside the guards, if any).
    user_base: usize,
    /// User length.
    user_len: usize,
    /// Current protection mode of the user range.
    protection: PageProtection,
    /// Flags the allocation was made with.
    flags: PageFlags,
    /// Backing file, if file-mapped.
    file: Option<PathBuf>,
    /// Whether the user pages are currently committed.
    committed: bool,
}

/// The pre-reserved address range and its free list.
struct ReserveRange {
    /// The inaccessible backing range.
    range: MappedRange,
    /// Free carvings as (offset, len), ordered by offset.
    free: Vec<(usize, usize)>,
}

impl ReserveRange {
    /// First-fit carve of `len` bytes. Returns the carving offset.
    fn carve(&mut self, len: usize) -> Option<usize> {
        let position = self.free.iter().position(|&(_, run)| run >= len)?;
        let (offset, run) = self.free[position];
        if run == len {
            self.free.remove(position);
        } else {
            self.free[position] = (offset + len, run - len);
        }
        Some(offset)
    }

    /// Returns a carving and merges it with free neighbours.
    fn restore(&mut self, offset: usize, len: usize) {
        let position = self
            .free
            .iter()
            .position(|&(run_offset, _)| run_offset > offset)
            .unwrap_or(self.free.len());
        self.free.insert(position, (offset, len));

        // Merge forward, then backward.
        if position + 1 < self.free.len() {
            let (next_offset, next_len) = self.free[position + 1];
            if offset + len == next_offset {
                self.free[position].1 += next_len;
                self.free.remove(position + 1);
            }
        }
        if position > 0 {
            let (prev_offset, prev_len) = self.free[position - 1];
            if prev_offset + prev_len == offset {
                self.free[position - 1].1 += self.free[position].1;
                self.free.remove(position);
            }
        }
    }

    fn free_bytes(&self) -> usize {
        self.free.iter().map(|&(_, len)| len).sum()
    }
}

/// OS-granularity page allocator.
///
/// # Example
///
/// ```rust,ignore
/// let pages = PageAllocator::new();
/// let block = pages.allocate(
///     64 * 1024,
///     PageProtection::ReadWrite,
///     PageFlags::NONE.with_zeroed().with_guard_pages(),
/// )?;
/// pages.with_bytes_mut(block, |bytes| bytes[0] = 1)?;
/// pages.protect(block.base(), PageProtection::ReadOnly)?;
/// ```
pub struct PageAllocator {
    /// System page size.
    page_size: usize,
    /// Live allocations. The lock also serializes byte access.
    entries: Mutex<Vec<PageEntry>>,
    /// Optional pre-reserved address range.
    reserve: Option<Mutex<ReserveRange>>,
    /// Total reserve capacity for stats.
    reserve_capacity: usize,
}

impl PageAllocator {
    /// Creates an allocator with no pre-reserved range.
    #[must_use]
    pub fn new() -> Self {
        Self {
            page_size: os::page_size(),
            entries: Mutex::new(Vec::new()),
            reserve: None,
            reserve_capacity: 0,
        }
    }

    /// Creates an allocator with `reserve_bytes` of address space mapped
    /// up front (inaccessible until carved).
    ///
    /// # Errors
    ///
    /// [`PagingError::ZeroSize`] for an empty reserve,
    /// [`PagingError::OsFailure`] when the OS refuses the reservation.
    pub fn with_reserve(reserve_bytes: usize) -> PagingResult<Self> {
        if reserve_bytes == 0 {
            return Err(PagingError::ZeroSize);
        }
        let page_size = os::page_size();
        let rounded = round_up(reserve_bytes, page_size);
        let range = os::map_anonymous(rounded, libc::PROT_NONE, false).map_err(|source| {
            PagingError::OsFailure {
                call: "mmap(reserve)",
                source,
            }
        })?;
        let free = vec![(0, range.len())];
        Ok(Self {
            page_size,
            entries: Mutex::new(Vec::new()),
            reserve: Some(Mutex::new(ReserveRange { range, free })),
            reserve_capacity: rounded,
        })
    }

    /// System page size in bytes.
    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocates `size` bytes (rounded up to whole pages) of anonymous
    /// memory.
    ///
    /// # Errors
    ///
    /// [`PagingError::ZeroSize`] or [`PagingError::OsFailure`].
    pub fn allocate(
        &self,
        size: usize,
        protection: PageProtection,
        flags: PageFlags,
    ) -> PagingResult<PageBlock> {
        if size == 0 {
            return Err(PagingError::ZeroSize);
        }
        let user_len = round_up(size, self.page_size);
        let guard = if flags.guard_pages { self.page_size } else { 0 };
        let full_len = user_len + 2 * guard;

        let mut entries = self.entries.lock();

        // Reserve path first, falling back to a fresh mapping.
        if flags.prefer_reserve && !flags.shared {
            if let Some(reserve) = &self.reserve {
                let mut reserve = reserve.lock();
                if let Some(offset) = reserve.carve(full_len) {
                    let full_base = reserve.range.base() + offset;
                    drop(reserve);
                    return self.finish_reserve_allocation(
                        &mut entries,
                        offset,
                        full_base,
                        full_len,
                        user_len,
                        guard,
                        protection,
                        flags,
                    );
                }
            }
        }

        // Fresh anonymous mapping. The kernel hands these out zeroed, so
        // the ZERO flag is satisfied before any protection downgrade.
        let range = os::map_anonymous(full_len, protection.as_native(), flags.shared).map_err(
            |source| PagingError::OsFailure {
                call: "mmap",
                source,
            },
        )?;
        let full_base = range.base();
        let user_base = full_base + guard;
        if guard > 0 {
            self.protect_guards(full_base, user_len, guard)?;
        }
        entries.push(PageEntry {
            backing: Backing::Owned(range),
            full_base,
            full_len,
            user_base,
            user_len,
            protection,
            flags,
            file: None,
            committed: true,
        });
        Ok(PageBlock {
            base: user_base,
            len: user_len,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_reserve_allocation(
        &self,
        entries: &mut Vec<PageEntry>,
        offset: usize,
        full_base: usize,
        full_len: usize,
        user_len: usize,
        guard: usize,
        protection: PageProtection,
        flags: PageFlags,
    ) -> PagingResult<PageBlock> {
        let user_base = full_base + guard;

        // Reserve memory may be dirty from a previous tenant. Discarding
        // restores zero-fill-on-demand without needing write access, which
        // satisfies the zero-before-downgrade ordering for read-only and
        // inaccessible requests too.
        if flags.zeroed {
            os::discard(full_base, full_len).map_err(|source| PagingError::OsFailure {
                call: "madvise",
                source,
            })?;
        }
        os::protect(user_base, user_len, protection.as_native()).map_err(|source| {
            PagingError::OsFailure {
                call: "mprotect",
                source,
            }
        })?;

        entries.push(PageEntry {
            backing: Backing::Reserve { offset },
            full_base,
            full_len,
            user_base,
            user_len,
            protection,
            flags,
            file: None,
            committed: true,
        });
        Ok(PageBlock {
            base: user_base,
            len: user_len,
        })
    }

    fn protect_guards(&self, full_base: usize, user_len: usize, guard: usize) -> PagingResult<()> {
        for guard_base in [full_base, full_base + guard + user_len] {
            os::protect(guard_base, guard, libc::PROT_NONE).map_err(|source| {
                PagingError::OsFailure {
                    call: "mprotect(guard)",
                    source,
                }
            })?;
        }
        Ok(())
    }

    /// Maps `size` bytes of `path` starting at the page-aligned `offset`.
    ///
    /// The mapping is clamped to the smaller of the request and the bytes
    /// the file actually has past `offset`. Guard and zero flags do not
    /// apply to file mappings (zeroing would clobber the file) and are
    /// ignored with a debug note.
    ///
    /// # Errors
    ///
    /// [`PagingError::ZeroSize`], [`PagingError::OffsetNotAligned`],
    /// [`PagingError::FileUnavailable`], [`PagingError::FileTooSmall`] or
    /// [`PagingError::OsFailure`].
    pub fn allocate_file(
        &self,
        path: &Path,
        size: usize,
        offset: u64,
        protection: PageProtection,
        flags: PageFlags,
    ) -> PagingResult<PageBlock> {
        if size == 0 {
            return Err(PagingError::ZeroSize);
        }
        if offset % self.page_size as u64 != 0 {
            return Err(PagingError::OffsetNotAligned {
                offset,
                page_size: self.page_size,
            });
        }
        if flags.zeroed || flags.guard_pages {
            tracing::debug!(?path, "zero/guard flags ignored for file mapping");
        }

        let needs_write_fd = flags.shared && protection.allows_write();
        let file = OpenOptions::new()
            .read(true)
            .write(needs_write_fd)
            .open(path)
            .map_err(|source| PagingError::FileUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        let file_len = file
            .metadata()
            .map_err(|source| PagingError::FileUnavailable {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let available = file_len.saturating_sub(offset);
        if available == 0 {
            return Err(PagingError::FileTooSmall {
                path: path.to_path_buf(),
                offset,
            });
        }

        // Clamp to what the file can back, then round to whole pages.
        let mapped_bytes = usize::try_from(available)
            .unwrap_or(usize::MAX)
            .min(size);
        let user_len = round_up(mapped_bytes, self.page_size);

        let range = os::map_file(&file, user_len, offset, protection.as_native(), flags.shared)
            .map_err(|source| PagingError::OsFailure {
                call: "mmap(file)",
                source,
            })?;

        let user_base = range.base();
        let mut entries = self.entries.lock();
        entries.push(PageEntry {
            backing: Backing::Owned(range),
            full_base: user_base,
            full_len: user_len,
            user_base,
            user_len,
            protection,
            flags,
            file: Some(path.to_path_buf()),
            committed: true,
        });
        Ok(PageBlock {
            base: user_base,
            len: user_len,
        })
    }

    /// Releases an allocation: unmaps a dedicated mapping, or discards and
    /// re-protects a reserve carving and returns it to the free list.
    ///
    /// `false` (with a report) when `block` is not a live allocation.
    pub fn deallocate(&self, block: PageBlock) -> bool {
        let mut entries = self.entries.lock();
        let Some(position) = entries.iter().position(|e| e.user_base == block.base) else {
            tracing::warn!(base = block.base, "deallocate of unknown page block");
            return false;
        };
        let entry = entries.remove(position);
        match entry.backing {
            // Dropping the range unmaps it.
            Backing::Owned(_) => {}
            Backing::Reserve { offset } => {
                if let Some(reserve) = &self.reserve {
                    let mut reserve = reserve.lock();
                    // Drop the physical pages and make the carving
                    // inaccessible again before anyone can reuse it.
                    if let Err(error) = os::discard(entry.full_base, entry.full_len)
                        .and_then(|()| {
                            os::protect(entry.full_base, entry.full_len, libc::PROT_NONE)
                        })
                    {
                        tracing::warn!(%error, "reserve carving cleanup failed");
                    }
                    reserve.restore(offset, entry.full_len);
                }
            }
        }
        true
    }

    /// True when `address` falls inside a live allocation's user range.
    #[must_use]
    pub fn is_allocated(&self, address: usize) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| contains(e, address))
    }

    /// Snapshot of the allocation containing `address`.
    #[must_use]
    pub fn info(&self, address: usize) -> Option<PageInfo> {
        let entries = self.entries.lock();
        let entry = entries.iter().find(|e| contains(e, address))?;
        Some(PageInfo {
            base: entry.user_base,
            size: entry.user_len,
            page_count: entry.user_len / self.page_size,
            protection: entry.protection,
            flags: entry.flags,
            file: entry.file.clone(),
            committed: entry.committed,
        })
    }

    /// Changes the protection of the allocation containing `address`.
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`] or [`PagingError::OsFailure`].
    pub fn protect(&self, address: usize, protection: PageProtection) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        let entry = entry_containing_mut(&mut entries, address)?;
        os::protect(entry.user_base, entry.user_len, protection.as_native()).map_err(|source| {
            PagingError::OsFailure {
                call: "mprotect",
                source,
            }
        })?;
        entry.protection = protection;
        Ok(())
    }

    /// Re-commits a decommitted allocation at its recorded protection.
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`] or [`PagingError::OsFailure`].
    pub fn commit(&self, address: usize) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        let entry = entry_containing_mut(&mut entries, address)?;
        os::protect(entry.user_base, entry.user_len, entry.protection.as_native()).map_err(
            |source| PagingError::OsFailure {
                call: "mprotect",
                source,
            },
        )?;
        entry.committed = true;
        Ok(())
    }

    /// Decommits an allocation: the physical pages are released and the
    /// range becomes inaccessible until the next [`PageAllocator::commit`].
    /// Anonymous pages read back zero after recommit.
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`] or [`PagingError::OsFailure`].
    pub fn decommit(&self, address: usize) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        let entry = entry_containing_mut(&mut entries, address)?;
        os::discard(entry.user_base, entry.user_len).map_err(|source| PagingError::OsFailure {
            call: "madvise",
            source,
        })?;
        os::protect(entry.user_base, entry.user_len, libc::PROT_NONE).map_err(|source| {
            PagingError::OsFailure {
                call: "mprotect",
                source,
            }
        })?;
        entry.committed = false;
        Ok(())
    }

    /// Flushes a writable, shared, file-backed allocation to its file.
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`], [`PagingError::NotFlushable`] or
    /// [`PagingError::OsFailure`].
    pub fn flush(&self, address: usize) -> PagingResult<()> {
        let mut entries = self.entries.lock();
        let entry = entry_containing_mut(&mut entries, address)?;
        if entry.file.is_none() || !entry.flags.shared || !entry.protection.allows_write() {
            return Err(PagingError::NotFlushable);
        }
        os::sync(entry.user_base, entry.user_len).map_err(|source| PagingError::OsFailure {
            call: "msync",
            source,
        })
    }

    /// Runs `f` over the allocation's bytes. The registry lock is held
    /// for the duration, so the mapping cannot disappear underneath `f`.
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`] or [`PagingError::ProtectionDenied`].
    pub fn with_bytes<R>(&self, block: PageBlock, f: impl FnOnce(&[u8]) -> R) -> PagingResult<R> {
        let entries = self.entries.lock();
        let entry = entries
            .iter()
            .find(|e| e.user_base == block.base && e.user_len >= block.len)
            .ok_or(PagingError::UnknownAddress {
                address: block.base,
            })?;
        if !entry.protection.allows_read() || !entry.committed {
            return Err(PagingError::ProtectionDenied {
                address: block.base,
            });
        }
        let delta = entry.user_base - entry.full_base;
        match &entry.backing {
            Backing::Owned(range) => {
                // SAFETY: range checked against the entry; protection
                // checked above; the registry lock excludes writers.
                #[allow(unsafe_code)]
                let bytes = unsafe { range.slice(delta, block.len) };
                Ok(f(bytes))
            }
            Backing::Reserve { offset } => {
                // A reserve-backed entry cannot outlive the reserve.
                let reserve = self
                    .reserve
                    .as_ref()
                    .ok_or(PagingError::UnknownAddress {
                        address: block.base,
                    })?
                    .lock();
                // SAFETY: as above; the carving is live while its entry is.
                #[allow(unsafe_code)]
                let bytes = unsafe { reserve.range.slice(offset + delta, block.len) };
                Ok(f(bytes))
            }
        }
    }

    /// Runs `f` over the allocation's bytes, mutably. Same locking
    /// guarantees as [`PageAllocator::with_bytes`].
    ///
    /// # Errors
    ///
    /// [`PagingError::UnknownAddress`] or [`PagingError::ProtectionDenied`].
    pub fn with_bytes_mut<R>(
        &self,
        block: PageBlock,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> PagingResult<R> {
        let entries = self.entries.lock();
        let entry = entries
            .iter()
            .find(|e| e.user_base == block.base && e.user_len >= block.len)
            .ok_or(PagingError::UnknownAddress {
                address: block.base,
            })?;
        if !entry.protection.allows_write() || !entry.committed {
            return Err(PagingError::ProtectionDenied {
                address: block.base,
            });
        }
        let delta = entry.user_base - entry.full_base;
        match &entry.backing {
            Backing::Owned(range) => {
                // SAFETY: as in `with_bytes`, and the pages are writable.
                #[allow(unsafe_code)]
                let bytes = unsafe { range.slice_mut(delta, block.len) };
                Ok(f(bytes))
            }
            Backing::Reserve { offset } => {
                // A reserve-backed entry cannot outlive the reserve.
                let reserve = self
                    .reserve
                    .as_ref()
                    .ok_or(PagingError::UnknownAddress {
                        address: block.base,
                    })?
                    .lock();
                // SAFETY: as in `with_bytes`, and the pages are writable.
                #[allow(unsafe_code)]
                let bytes = unsafe { reserve.range.slice_mut(offset + delta, block.len) };
                Ok(f(bytes))
            }
        }
    }

    /// Returns a point-in-time snapshot of allocator numbers.
    #[must_use]
    pub fn stats(&self) -> PagingStats {
        let entries = self.entries.lock();
        let reserve_free = self
            .reserve
            .as_ref()
            .map_or(0, |reserve| reserve.lock().free_bytes());
        PagingStats {
            page_size: self.page_size,
            live_allocations: entries.len(),
            bytes_mapped: entries.iter().map(|e| e.user_len).sum(),
            reserve_capacity: self.reserve_capacity,
            reserve_free,
        }
    }
}

impl Default for PageAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn contains(entry: &PageEntry, address: usize) -> bool {
    address >= entry.user_base && address < entry.user_base + entry.user_len
}

fn entry_containing_mut<'a>(
    entries: &'a mut [PageEntry],
    address: usize,
) -> PagingResult<&'a mut PageEntry> {
    entries
        .iter_mut()
        .find(|e| contains(e, address))
        .ok_or(PagingError::UnknownAddress { address })
}

/// Rounds `value` up to the next multiple of `step` (a power of two).
const fn round_up(value: usize, step: usize) -> usize {
    (value + step - 1) & !(step - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_file(bytes: &[u8]) -> PathBuf {
        let id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("test_pages_{id}.bin"));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn test_size_is_page_rounded() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(100, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        assert_eq!(block.len(), pages.page_size());
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_is_allocated_by_containment() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(3 * 4096, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        assert!(pages.is_allocated(block.base()));
        assert!(pages.is_allocated(block.base() + block.len() - 1));
        assert!(!pages.is_allocated(block.base() + block.len()));

        assert!(pages.deallocate(block));
        assert!(!pages.is_allocated(block.base()));
    }

    #[test]
    fn test_zeroed_allocation_reads_zero() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(
                8 * 1024,
                PageProtection::ReadWrite,
                PageFlags::NONE.with_zeroed(),
            )
            .unwrap();
        let all_zero = pages
            .with_bytes(block, |bytes| bytes.iter().all(|&b| b == 0))
            .unwrap();
        assert!(all_zero);
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_write_then_read_back() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(4096, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        pages
            .with_bytes_mut(block, |bytes| bytes[..4].copy_from_slice(b"FAFN"))
            .unwrap();
        let head = pages.with_bytes(block, |bytes| bytes[..4].to_vec()).unwrap();
        assert_eq!(head, b"FAFN");
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_protection_gates_byte_access() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(4096, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        pages.protect(block.base(), PageProtection::ReadOnly).unwrap();

        assert!(pages.with_bytes(block, |_| ()).is_ok());
        assert!(matches!(
            pages.with_bytes_mut(block, |_| ()),
            Err(PagingError::ProtectionDenied { .. })
        ));

        pages.protect(block.base(), PageProtection::NoAccess).unwrap();
        assert!(matches!(
            pages.with_bytes(block, |_| ()),
            Err(PagingError::ProtectionDenied { .. })
        ));
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_unknown_address_fails() {
        let pages = PageAllocator::new();
        assert!(matches!(
            pages.protect(0xDEAD_0000, PageProtection::ReadOnly),
            Err(PagingError::UnknownAddress { .. })
        ));
        assert!(matches!(
            pages.flush(0xDEAD_0000),
            Err(PagingError::UnknownAddress { .. })
        ));
    }

    #[test]
    fn test_decommit_then_commit_zeroes() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(4096, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        pages.with_bytes_mut(block, |bytes| bytes.fill(0xEE)).unwrap();

        pages.decommit(block.base()).unwrap();
        assert!(matches!(
            pages.with_bytes(block, |_| ()),
            Err(PagingError::ProtectionDenied { .. })
        ));
        assert!(!pages.info(block.base()).unwrap().committed);

        pages.commit(block.base()).unwrap();
        let all_zero = pages
            .with_bytes(block, |bytes| bytes.iter().all(|&b| b == 0))
            .unwrap();
        assert!(all_zero);
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_guard_pages_surround_user_range() {
        let pages = PageAllocator::new();
        let block = pages
            .allocate(
                4096,
                PageProtection::ReadWrite,
                PageFlags::NONE.with_guard_pages(),
            )
            .unwrap();
        // The guards are not part of the user range.
        assert!(!pages.is_allocated(block.base() - 1));
        assert!(!pages.is_allocated(block.base() + block.len()));
        pages.with_bytes_mut(block, |bytes| bytes.fill(1)).unwrap();
        assert!(pages.deallocate(block));
    }

    #[test]
    fn test_file_mapping_clamps_to_file_size() {
        let path = temp_file(&[7u8; 100]);
        let pages = PageAllocator::new();

        let block = pages
            .allocate_file(
                &path,
                1024 * 1024,
                0,
                PageProtection::ReadOnly,
                PageFlags::NONE,
            )
            .unwrap();
        // 100 bytes of backing: one page, not a megabyte.
        assert_eq!(block.len(), pages.page_size());
        let head = pages.with_bytes(block, |bytes| bytes[..100].to_vec()).unwrap();
        assert_eq!(head, vec![7u8; 100]);

        assert!(pages.deallocate(block));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_file_mapping_rejects_bad_requests() {
        let path = temp_file(&[1u8; 10]);
        let pages = PageAllocator::new();

        assert!(matches!(
            pages.allocate_file(&path, 100, 3, PageProtection::ReadOnly, PageFlags::NONE),
            Err(PagingError::OffsetNotAligned { .. })
        ));
        assert!(matches!(
            pages.allocate_file(
                &path,
                100,
                pages.page_size() as u64,
                PageProtection::ReadOnly,
                PageFlags::NONE
            ),
            Err(PagingError::FileTooSmall { .. })
        ));
        assert!(matches!(
            pages.allocate_file(
                Path::new("/definitely/not/here.bin"),
                100,
                0,
                PageProtection::ReadOnly,
                PageFlags::NONE
            ),
            Err(PagingError::FileUnavailable { .. })
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_flush_requires_shared_writable_file() {
        let pages = PageAllocator::new();
        let anon = pages
            .allocate(4096, PageProtection::ReadWrite, PageFlags::NONE)
            .unwrap();
        assert!(matches!(
            pages.flush(anon.base()),
            Err(PagingError::NotFlushable)
        ));
        assert!(pages.deallocate(anon));

        let path = temp_file(&[0u8; 4096]);
        let shared = pages
            .allocate_file(
                &path,
                4096,
                0,
                PageProtection::ReadWrite,
                PageFlags::NONE.with_shared(),
            )
            .unwrap();
        pages
            .with_bytes_mut(shared, |bytes| bytes[..4].copy_from_slice(b"SAVE"))
            .unwrap();
        pages.flush(shared.base()).unwrap();
        assert!(pages.deallocate(shared));

        let written = std::fs::read(&path).unwrap();
        assert_eq!(&written[..4], b"SAVE");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_reserve_carve_and_restore() {
        let page = os::page_size();
        let pages = PageAllocator::with_reserve(16 * page).unwrap();
        let flags = PageFlags::NONE.with_reserve().with_zeroed();

        let a = pages.allocate(2 * page, PageProtection::ReadWrite, flags).unwrap();
        let b = pages.allocate(2 * page, PageProtection::ReadWrite, flags).unwrap();
        assert_eq!(pages.stats().reserve_free, 12 * page);

        pages.with_bytes_mut(a, |bytes| bytes.fill(9)).unwrap();
        assert!(pages.deallocate(a));
        assert!(pages.deallocate(b));
        assert_eq!(pages.stats().reserve_free, 16 * page);

        // Reused carving with the zero flag arrives clean.
        let c = pages.allocate(4 * page, PageProtection::ReadWrite, flags).unwrap();
        let all_zero = pages
            .with_bytes(c, |bytes| bytes.iter().all(|&byte| byte == 0))
            .unwrap();
        assert!(all_zero);
        assert!(pages.deallocate(c));
    }

    #[test]
    fn test_reserve_exhaustion_falls_back() {
        let page = os::page_size();
        let pages = PageAllocator::with_reserve(2 * page).unwrap();
        let flags = PageFlags::NONE.with_reserve();

        let a = pages.allocate(2 * page, PageProtection::ReadWrite, flags).unwrap();
        // Reserve is full; this one comes from a fresh mapping.
        let b = pages.allocate(2 * page, PageProtection::ReadWrite, flags).unwrap();
        assert_eq!(pages.stats().live_allocations, 2);
        assert!(pages.deallocate(a));
        assert!(pages.deallocate(b));
    }
}
