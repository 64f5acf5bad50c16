//! # Free-List Allocator
//!
//! The family's general-purpose variable-size allocator over one
//! contiguous region.
//!
//! ## Block Bookkeeping
//!
//! Headers live out-of-band in an index-addressed table; links are `u32`
//! indices, `NIL`-terminated. Two chains thread the table:
//!
//! - the **address chain** orders every block by offset and always covers
//!   the region exactly - no gaps, no overlaps;
//! - the **free chain** links only free blocks; its length always equals
//!   the maintained `free_block_count`.
//!
//! ## Placement
//!
//! Three runtime-selectable strategies: first-fit (address order),
//! best-fit (smallest fitting block, early exit on an exact match) and
//! next-fit (resume after the last placement, wrap once). All of them
//! charge the alignment padding between block start and the returned data
//! offset against the candidate when testing "large enough".
//!
//! Oversized candidates are split; frees coalesce with both address-order
//! neighbours. `defragment` runs an exhaustive merge pass for the blocks
//! regular coalescing could not see merged.
//!
//! # Thread Safety
//!
//! One mutex per instance serializes every state-mutating operation. This
//! allocator is deliberately NOT lock-free - see the pool for that trade.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::allocator::{align_up, valid_align, Allocator, BlockRef};
use crate::context::{MemoryRegion, RegionTicket};

/// Sentinel for "no block" in chain links.
const NIL: u32 = u32::MAX;

/// Free-block selection strategy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlacementStrategy {
    /// First free block large enough, scanning address order.
    #[default]
    FirstFit,
    /// Smallest free block that still fits; early exit on exact match.
    BestFit,
    /// Resume scanning after the last placement, wrapping once.
    NextFit,
}

/// One block in the header table.
#[derive(Clone, Copy, Debug)]
struct BlockHeader {
    /// Block start offset in the region.
    offset: usize,
    /// Block size in bytes, padding included.
    size: usize,
    /// Offset handed to the caller (start plus alignment padding).
    data_offset: usize,
    /// Whether the block is on the free chain.
    is_free: bool,
    /// Address-chain link to the next-higher block.
    next: u32,
    /// Address-chain link to the next-lower block.
    prev: u32,
    /// Free-chain forward link.
    next_free: u32,
    /// Free-chain backward link.
    prev_free: u32,
    /// Monotonic id of the allocation occupying this block.
    allocation_id: u32,
}

impl BlockHeader {
    fn free_at(offset: usize, size: usize) -> Self {
        Self {
            offset,
            size,
            data_offset: offset,
            is_free: true,
            next: NIL,
            prev: NIL,
            next_free: NIL,
            prev_free: NIL,
            allocation_id: 0,
        }
    }
}

/// Point-in-time free-list usage numbers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeListStats {
    /// Total region capacity in bytes.
    pub capacity: usize,
    /// Bytes in allocated blocks (padding included).
    pub used_bytes: usize,
    /// Bytes in free blocks.
    pub free_bytes: usize,
    /// Number of blocks on the free chain.
    pub free_block_count: usize,
    /// Number of live allocations.
    pub live_allocations: usize,
    /// High-water mark of `used_bytes`.
    pub peak_used: usize,
    /// The active placement strategy.
    pub strategy: PlacementStrategy,
}

/// Everything the per-instance mutex guards.
struct FreeListCore {
    /// The backing bytes.
    storage: Box<[u8]>,
    /// The header table; slots are recycled through `free_slots`.
    headers: Vec<BlockHeader>,
    /// Recycled header-table slots.
    free_slots: Vec<u32>,
    /// Address-chain entry (the block at offset zero).
    head: u32,
    /// Free-chain entry.
    free_head: u32,
    /// Next-fit resume point: the block of the last placement.
    cursor: u32,
    /// Active placement strategy.
    strategy: PlacementStrategy,
    /// Length of the free chain.
    free_block_count: usize,
    /// Bytes in allocated blocks.
    used_bytes: usize,
    /// Bytes in free blocks.
    free_bytes: usize,
    /// High-water mark of `used_bytes`.
    peak_used: usize,
    /// Live allocations by data offset - the authority on handle validity.
    live: HashMap<usize, u32>,
    /// Next allocation id.
    next_allocation_id: u32,
}

impl FreeListCore {
    fn new(storage: Box<[u8]>, strategy: PlacementStrategy) -> Self {
        let capacity = storage.len();
        let mut core = Self {
            storage,
            headers: Vec::new(),
            free_slots: Vec::new(),
            head: 0,
            free_head: 0,
            cursor: NIL,
            strategy,
            free_block_count: 1,
            used_bytes: 0,
            free_bytes: capacity,
            peak_used: 0,
            live: HashMap::new(),
            next_allocation_id: 1,
        };
        core.headers.push(BlockHeader::free_at(0, capacity));
        core
    }

    // ----- header table ------------------------------------------------

    fn store_header(&mut self, header: BlockHeader) -> u32 {
        if let Some(slot) = self.free_slots.pop() {
            self.headers[slot as usize] = header;
            slot
        } else {
            self.headers.push(header);
            self.headers.len() as u32 - 1
        }
    }

    fn release_header(&mut self, index: u32) {
        self.free_slots.push(index);
    }

    // ----- free chain ---------------------------------------------------

    fn free_chain_push(&mut self, index: u32) {
        let old_head = self.free_head;
        self.headers[index as usize].next_free = old_head;
        self.headers[index as usize].prev_free = NIL;
        if old_head != NIL {
            self.headers[old_head as usize].prev_free = index;
        }
        self.free_head = index;
        self.free_block_count += 1;
    }

    fn free_chain_remove(&mut self, index: u32) {
        let prev = self.headers[index as usize].prev_free;
        let next = self.headers[index as usize].next_free;
        if prev == NIL {
            self.free_head = next;
        } else {
            self.headers[prev as usize].next_free = next;
        }
        if next != NIL {
            self.headers[next as usize].prev_free = prev;
        }
        self.headers[index as usize].next_free = NIL;
        self.headers[index as usize].prev_free = NIL;
        self.free_block_count -= 1;
    }

    // ----- placement ----------------------------------------------------

    /// Tests whether block `index` can serve `size` bytes at `align`,
    /// charging the padding between block start and the aligned data
    /// offset. Returns (data offset, total bytes consumed).
    fn fits(&self, index: u32, size: usize, align: usize) -> Option<(usize, usize)> {
        let header = &self.headers[index as usize];
        let aligned = align_up(header.offset, align);
        let total = (aligned - header.offset).checked_add(size)?;
        (total <= header.size).then_some((aligned, total))
    }

    fn find_first_fit(&self, size: usize, align: usize) -> Option<(u32, usize, usize)> {
        let mut index = self.head;
        while index != NIL {
            if self.headers[index as usize].is_free {
                if let Some((aligned, total)) = self.fits(index, size, align) {
                    return Some((index, aligned, total));
                }
            }
            index = self.headers[index as usize].next;
        }
        None
    }

    fn find_best_fit(&self, size: usize, align: usize) -> Option<(u32, usize, usize)> {
        let mut best: Option<(u32, usize, usize)> = None;
        let mut index = self.free_head;
        while index != NIL {
            if let Some((aligned, total)) = self.fits(index, size, align) {
                let block_size = self.headers[index as usize].size;
                if block_size == total {
                    // Exact match - nothing can beat it.
                    return Some((index, aligned, total));
                }
                if best.map_or(true, |(b, _, _)| block_size < self.headers[b as usize].size) {
                    best = Some((index, aligned, total));
                }
            }
            index = self.headers[index as usize].next_free;
        }
        best
    }

    fn find_next_fit(&self, size: usize, align: usize) -> Option<(u32, usize, usize)> {
        let start = if self.cursor == NIL {
            self.head
        } else {
            let next = self.headers[self.cursor as usize].next;
            if next == NIL {
                self.head
            } else {
                next
            }
        };
        let mut index = start;
        loop {
            if self.headers[index as usize].is_free {
                if let Some((aligned, total)) = self.fits(index, size, align) {
                    return Some((index, aligned, total));
                }
            }
            index = self.headers[index as usize].next;
            if index == NIL {
                index = self.head;
            }
            if index == start {
                return None;
            }
        }
    }

    // ----- allocate / deallocate ---------------------------------------

    fn allocate(&mut self, size: usize, align: usize) -> Option<usize> {
        if size == 0 {
            tracing::warn!("zero-size allocation refused");
            return None;
        }
        if !valid_align(align) {
            tracing::warn!(align, "invalid alignment refused");
            return None;
        }

        let (index, aligned, total) = match self.strategy {
            PlacementStrategy::FirstFit => self.find_first_fit(size, align),
            PlacementStrategy::BestFit => self.find_best_fit(size, align),
            PlacementStrategy::NextFit => self.find_next_fit(size, align),
        }?;

        // Split when the tail is worth keeping as its own free block.
        let remainder = self.headers[index as usize].size - total;
        if remainder >= FreeListAllocator::MIN_BLOCK_SIZE {
            let tail_offset = self.headers[index as usize].offset + total;
            let after = self.headers[index as usize].next;
            let tail = self.store_header(BlockHeader::free_at(tail_offset, remainder));
            self.headers[tail as usize].prev = index;
            self.headers[tail as usize].next = after;
            self.headers[index as usize].next = tail;
            if after != NIL {
                self.headers[after as usize].prev = tail;
            }
            self.headers[index as usize].size = total;
            self.free_chain_push(tail);
        }

        self.free_chain_remove(index);
        let claimed = self.headers[index as usize].size;
        self.headers[index as usize].is_free = false;
        self.headers[index as usize].data_offset = aligned;
        self.headers[index as usize].allocation_id = self.next_allocation_id;
        self.next_allocation_id = self.next_allocation_id.wrapping_add(1);

        self.used_bytes += claimed;
        self.free_bytes -= claimed;
        self.peak_used = self.peak_used.max(self.used_bytes);
        self.live.insert(aligned, index);
        self.cursor = index;
        Some(aligned)
    }

    fn deallocate(&mut self, data_offset: usize) -> bool {
        let Some(index) = self.live.remove(&data_offset) else {
            tracing::warn!(offset = data_offset, "free of unknown or already-freed block");
            return false;
        };

        let size = self.headers[index as usize].size;
        self.headers[index as usize].is_free = true;
        self.headers[index as usize].data_offset = self.headers[index as usize].offset;
        self.used_bytes -= size;
        self.free_bytes += size;
        self.free_chain_push(index);

        // Coalesce with the next, then the previous, address neighbour.
        let next = self.headers[index as usize].next;
        if next != NIL && self.headers[next as usize].is_free {
            self.merge(index, next);
        }
        let prev = self.headers[index as usize].prev;
        if prev != NIL && self.headers[prev as usize].is_free {
            self.merge(prev, index);
        }
        true
    }

    /// Merges free block `b` (the address successor) into free block `a`.
    /// Only ever called for contiguous neighbours.
    fn merge(&mut self, a: u32, b: u32) {
        debug_assert!(self.headers[a as usize].is_free && self.headers[b as usize].is_free);
        debug_assert_eq!(
            self.headers[a as usize].offset + self.headers[a as usize].size,
            self.headers[b as usize].offset
        );

        self.headers[a as usize].size += self.headers[b as usize].size;
        let after = self.headers[b as usize].next;
        self.headers[a as usize].next = after;
        if after != NIL {
            self.headers[after as usize].prev = a;
        }
        self.free_chain_remove(b);
        if self.cursor == b {
            self.cursor = a;
        }
        self.release_header(b);
    }

    fn defragment(&mut self) -> usize {
        let mut merged = 0;
        let mut index = self.head;
        while index != NIL {
            let next = self.headers[index as usize].next;
            if next != NIL
                && self.headers[index as usize].is_free
                && self.headers[next as usize].is_free
            {
                self.merge(index, next);
                merged += 1;
                // Stay on `index`: its new successor may be free too.
            } else {
                index = next;
            }
        }
        merged
    }

    fn reset(&mut self) {
        let capacity = self.storage.len();
        self.headers.clear();
        self.free_slots.clear();
        self.live.clear();
        self.headers.push(BlockHeader::free_at(0, capacity));
        self.head = 0;
        self.free_head = 0;
        self.cursor = NIL;
        self.free_block_count = 1;
        self.used_bytes = 0;
        self.free_bytes = capacity;
    }

    /// Looks up a live block, validating the handle range.
    fn live_block(&self, block: BlockRef) -> Option<u32> {
        let index = *self.live.get(&block.offset())?;
        let header = &self.headers[index as usize];
        (block.offset() + block.size() <= header.offset + header.size).then_some(index)
    }

    #[cfg(test)]
    fn validate(&self) {
        // Address chain covers the region exactly.
        let mut expected_offset = 0;
        let mut index = self.head;
        while index != NIL {
            let header = &self.headers[index as usize];
            assert_eq!(header.offset, expected_offset, "gap or overlap in chain");
            expected_offset += header.size;
            index = header.next;
        }
        assert_eq!(expected_offset, self.storage.len(), "chain does not cover region");

        // Free chain agrees with the count and the flags.
        let mut free_seen = 0;
        let mut index = self.free_head;
        while index != NIL {
            assert!(self.headers[index as usize].is_free, "non-free block on free chain");
            free_seen += 1;
            index = self.headers[index as usize].next_free;
        }
        assert_eq!(free_seen, self.free_block_count, "free chain count drifted");

        assert_eq!(
            self.used_bytes + self.free_bytes,
            self.storage.len(),
            "byte accounting drifted"
        );
    }
}

/// A general-purpose variable-size allocator over one contiguous region.
///
/// # Example
///
/// ```rust,ignore
/// let list = FreeListAllocator::new(
///     ctx.acquire_region(1024 * 1024)?,
///     PlacementStrategy::BestFit,
/// );
///
/// let block = list.allocate(4096, 64)?;
/// list.with_bytes_mut(block, |bytes| bytes.fill(0));
/// assert!(list.deallocate(block));
/// ```
pub struct FreeListAllocator {
    /// All mutable state, serialized per instance.
    inner: Mutex<FreeListCore>,
    /// Total region capacity.
    capacity: usize,
    /// Credits the facade when the allocator drops.
    _ticket: RegionTicket,
}

impl FreeListAllocator {
    /// Blocks smaller than this are never split off; the remainder is
    /// absorbed into the allocation instead.
    pub const MIN_BLOCK_SIZE: usize = 16;

    /// Creates a free-list allocator over an acquired region.
    #[must_use]
    pub fn new(region: MemoryRegion, strategy: PlacementStrategy) -> Self {
        let (bytes, ticket) = region.into_parts();
        let capacity = bytes.len();
        Self {
            inner: Mutex::new(FreeListCore::new(bytes, strategy)),
            capacity,
            _ticket: ticket,
        }
    }

    /// Switches the placement strategy for subsequent allocations.
    pub fn set_strategy(&self, strategy: PlacementStrategy) {
        self.inner.lock().strategy = strategy;
    }

    /// Merges every run of adjacent free blocks; returns how many merges
    /// were performed.
    pub fn defragment(&self) -> usize {
        self.inner.lock().defragment()
    }

    /// Collapses the whole region back to one free block, invalidating
    /// every outstanding handle.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Resizes a live allocation, preserving its contents.
    ///
    /// Grows in place when the block's own slack or its free address
    /// successor can absorb the request; otherwise relocates (allocate,
    /// copy, free). Returns the possibly-moved handle, or `None` when no
    /// placement fits - the original allocation is untouched in that case.
    #[must_use]
    pub fn grow(&self, block: BlockRef, new_size: usize, align: usize) -> Option<BlockRef> {
        let mut core = self.inner.lock();
        let index = core.live_block(block)?;

        let header = core.headers[index as usize];
        let slack = header.offset + header.size - header.data_offset;
        if new_size <= slack {
            return Some(BlockRef::new(header.data_offset, new_size));
        }

        // Absorb the free successor when that covers the request.
        let next = header.next;
        if next != NIL && core.headers[next as usize].is_free {
            let next_size = core.headers[next as usize].size;
            if slack + next_size >= new_size {
                core.free_chain_remove(next);
                let after = core.headers[next as usize].next;
                core.headers[index as usize].next = after;
                if after != NIL {
                    core.headers[after as usize].prev = index;
                }
                if core.cursor == next {
                    core.cursor = index;
                }
                core.headers[index as usize].size += next_size;
                core.release_header(next);
                core.used_bytes += next_size;
                core.free_bytes -= next_size;

                // Split the surplus back off rather than hoarding it.
                let needed_total =
                    (header.data_offset - header.offset) + new_size;
                let combined = core.headers[index as usize].size;
                let excess = combined - needed_total;
                if excess >= Self::MIN_BLOCK_SIZE {
                    let tail_offset = header.offset + needed_total;
                    let after_tail = core.headers[index as usize].next;
                    let tail = core.store_header(BlockHeader::free_at(tail_offset, excess));
                    core.headers[tail as usize].prev = index;
                    core.headers[tail as usize].next = after_tail;
                    core.headers[index as usize].next = tail;
                    if after_tail != NIL {
                        core.headers[after_tail as usize].prev = tail;
                    }
                    core.headers[index as usize].size = needed_total;
                    core.free_chain_push(tail);
                    core.used_bytes -= excess;
                    core.free_bytes += excess;
                }
                core.peak_used = core.peak_used.max(core.used_bytes);
                return Some(BlockRef::new(header.data_offset, new_size));
            }
        }

        // Relocate.
        let new_offset = core.allocate(new_size, align)?;
        core.storage
            .copy_within(header.data_offset..header.data_offset + block.size(), new_offset);
        core.deallocate(block.offset());
        Some(BlockRef::new(new_offset, new_size))
    }

    /// Monotonic id of the allocation occupying `block`, for correlating
    /// with diagnostics output. `None` for stale or foreign handles.
    #[must_use]
    pub fn allocation_id(&self, block: BlockRef) -> Option<u32> {
        let core = self.inner.lock();
        let index = core.live_block(block)?;
        Some(core.headers[index as usize].allocation_id)
    }

    /// Returns a usage snapshot.
    #[must_use]
    pub fn stats(&self) -> FreeListStats {
        let core = self.inner.lock();
        FreeListStats {
            capacity: self.capacity,
            used_bytes: core.used_bytes,
            free_bytes: core.free_bytes,
            free_block_count: core.free_block_count,
            live_allocations: core.live.len(),
            peak_used: core.peak_used,
            strategy: core.strategy,
        }
    }

    #[cfg(test)]
    fn validate(&self) {
        self.inner.lock().validate();
    }
}

impl Allocator for FreeListAllocator {
    fn allocate(&self, size: usize, align: usize) -> Option<BlockRef> {
        let offset = self.inner.lock().allocate(size, align)?;
        Some(BlockRef::new(offset, size))
    }

    fn deallocate(&self, block: BlockRef) -> bool {
        self.inner.lock().deallocate(block.offset())
    }

    fn with_bytes<R>(&self, block: BlockRef, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let core = self.inner.lock();
        core.live_block(block)?;
        Some(f(&core.storage[block.offset()..block.offset() + block.size()]))
    }

    fn with_bytes_mut<R>(&self, block: BlockRef, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut core = self.inner.lock();
        core.live_block(block)?;
        let range = block.offset()..block.offset() + block.size();
        Some(f(&mut core.storage[range]))
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn used(&self) -> usize {
        self.inner.lock().used_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MemoryContext;

    const KB: usize = 1024;

    fn list_of(capacity: usize, strategy: PlacementStrategy) -> FreeListAllocator {
        let ctx = MemoryContext::new();
        FreeListAllocator::new(ctx.acquire_region(capacity).unwrap(), strategy)
    }

    #[test]
    fn test_accounting_invariant_over_interleavings() {
        let list = list_of(64 * KB, PlacementStrategy::FirstFit);
        let mut live = Vec::new();
        for round in 0..6 {
            for i in 1..=8 {
                if let Some(block) = list.allocate(i * 100 + round * 7, 8) {
                    live.push(block);
                }
            }
            // Free every other block.
            let mut index = 0;
            live.retain(|&block| {
                index += 1;
                if index % 2 == 0 {
                    assert!(list.deallocate(block));
                    false
                } else {
                    true
                }
            });
            let stats = list.stats();
            assert_eq!(stats.used_bytes + stats.free_bytes, stats.capacity);
            list.validate();
        }
    }

    #[test]
    fn test_full_coalescence() {
        let list = list_of(32 * KB, PlacementStrategy::FirstFit);
        let blocks: Vec<_> = (0..10).map(|_| list.allocate(1000, 16).unwrap()).collect();
        for block in blocks {
            assert!(list.deallocate(block));
        }
        let stats = list.stats();
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.free_bytes, stats.capacity);
        assert_eq!(stats.used_bytes, 0);
        list.validate();
    }

    #[test]
    fn test_best_fit_scenario() {
        // Spec scenario: 1MB region, A/B/C at 1KB, free A and C, best-fit D.
        let list = list_of(KB * KB, PlacementStrategy::BestFit);
        let a = list.allocate(KB, 8).unwrap();
        let _b = list.allocate(KB, 8).unwrap();
        let c = list.allocate(KB, 8).unwrap();

        assert!(list.deallocate(a));
        // C coalesces into the wilderness, so A's exact-size block is the
        // best (indeed only exact) fit.
        assert!(list.deallocate(c));

        let d = list.allocate(KB, 8).unwrap();
        assert_eq!(d.offset(), a.offset());
        list.validate();
    }

    #[test]
    fn test_first_fit_takes_lowest_address() {
        let list = list_of(KB * KB, PlacementStrategy::FirstFit);
        let a = list.allocate(KB, 8).unwrap();
        let _b = list.allocate(KB, 8).unwrap();
        let c = list.allocate(KB, 8).unwrap();
        assert!(list.deallocate(a));
        assert!(list.deallocate(c));

        let d = list.allocate(KB, 8).unwrap();
        assert_eq!(d.offset(), a.offset());
    }

    #[test]
    fn test_next_fit_resumes_then_wraps() {
        let list = list_of(4 * KB, PlacementStrategy::NextFit);
        let a = list.allocate(KB, 8).unwrap();
        let _b = list.allocate(KB, 8).unwrap();
        let c = list.allocate(KB, 8).unwrap();
        assert!(list.deallocate(a));

        // Cursor sits on C: the scan resumes after it and takes the tail,
        // not A's earlier hole.
        let d = list.allocate(KB, 8).unwrap();
        assert_eq!(d.offset(), c.offset() + KB);

        // Nothing after D: the scan wraps once and finds A's hole.
        let e = list.allocate(KB, 8).unwrap();
        assert_eq!(e.offset(), a.offset());
        list.validate();
    }

    #[test]
    fn test_alignment_padding_is_charged() {
        let list = list_of(4 * KB, PlacementStrategy::FirstFit);
        // Misalign the region head with a small allocation.
        let _a = list.allocate(24, 8).unwrap();
        let b = list.allocate(256, 256).unwrap();
        assert_eq!(b.offset() % 256, 0);
        let stats = list.stats();
        assert_eq!(stats.used_bytes + stats.free_bytes, stats.capacity);
        list.validate();
    }

    #[test]
    fn test_double_free_reported_once() {
        let list = list_of(4 * KB, PlacementStrategy::FirstFit);
        let a = list.allocate(128, 8).unwrap();
        assert!(list.deallocate(a));
        assert!(!list.deallocate(a));
        let stats = list.stats();
        assert_eq!(stats.free_bytes, stats.capacity);
    }

    #[test]
    fn test_defragment_finds_nothing_after_eager_coalescing() {
        // Frees coalesce eagerly, so a correct chain never has adjacent
        // free blocks left over; the exhaustive pass is a safety net and
        // must be an idempotent no-op here.
        let list = list_of(16 * KB, PlacementStrategy::FirstFit);
        let blocks: Vec<_> = (0..8).map(|_| list.allocate(KB, 8).unwrap()).collect();
        for &i in &[1usize, 2, 4, 5] {
            assert!(list.deallocate(blocks[i]));
        }
        let before = list.stats().free_block_count;
        assert_eq!(list.defragment(), 0);
        assert_eq!(list.stats().free_block_count, before);
        list.validate();
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let list = list_of(KB, PlacementStrategy::FirstFit);
        assert!(list.allocate(2 * KB, 8).is_none());
        let a = list.allocate(KB, 1).unwrap();
        assert!(list.allocate(1, 1).is_none());
        assert!(list.deallocate(a));
    }

    #[test]
    fn test_reset_collapses_region() {
        let list = list_of(8 * KB, PlacementStrategy::BestFit);
        for _ in 0..5 {
            let _ = list.allocate(512, 8).unwrap();
        }
        list.reset();
        let stats = list.stats();
        assert_eq!(stats.free_block_count, 1);
        assert_eq!(stats.free_bytes, stats.capacity);
        assert_eq!(stats.live_allocations, 0);
        list.validate();
    }

    #[test]
    fn test_grow_in_place_and_relocated() {
        let list = list_of(16 * KB, PlacementStrategy::FirstFit);
        let a = list.allocate(256, 8).unwrap();
        list.with_bytes_mut(a, |bytes| bytes.fill(0xAB)).unwrap();
        let fence = list.allocate(256, 8).unwrap();

        // Fenced in: growth must relocate and preserve contents.
        let grown = list.grow(a, 2 * KB, 8).unwrap();
        assert_ne!(grown.offset(), a.offset());
        let copied = list.with_bytes(grown, |bytes| bytes[..256].to_vec()).unwrap();
        assert!(copied.iter().all(|&b| b == 0xAB));

        // The tail of the region is free: this one extends in place.
        let grown_again = list.grow(grown, 3 * KB, 8).unwrap();
        assert_eq!(grown_again.offset(), grown.offset());

        assert!(list.deallocate(fence));
        list.validate();
    }

    #[test]
    fn test_data_round_trip() {
        let list = list_of(4 * KB, PlacementStrategy::FirstFit);
        let slot = list.create([7u32, 8, 9]).unwrap();
        assert_eq!(list.read_value(slot), Some([7u32, 8, 9]));
        assert!(list.destroy(slot));
    }

    #[test]
    fn test_allocation_ids_are_monotonic() {
        let list = list_of(4 * KB, PlacementStrategy::FirstFit);
        let a = list.allocate(64, 8).unwrap();
        let b = list.allocate(64, 8).unwrap();
        let id_a = list.allocation_id(a).unwrap();
        let id_b = list.allocation_id(b).unwrap();
        assert!(id_b > id_a);

        assert!(list.deallocate(a));
        assert_eq!(list.allocation_id(a), None);
    }
}
