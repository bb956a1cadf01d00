use super::region::{Region, RegionFlags};
use crate::util::heap::HeapLayout;
use crate::util::memory;
use crate::util::options::Options;
use crate::util::Address;
use std::io::Result;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// A generation-checked reference to a region slot in a [`RegionPool`].
///
/// Handles stay cheap to copy and store. Once the slot is released, the generation
/// moves on and [`RegionPool::get`] returns `None` for the old handle.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionHandle {
    index: u32,
    generation: u32,
}

impl RegionHandle {
    pub(super) fn new(index: usize, generation: u32) -> Self {
        RegionHandle {
            index: index as u32,
            generation,
        }
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl std::fmt::Debug for RegionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegionHandle({}@{})", self.index, self.generation)
    }
}

/// A slot is free.
const SLOT_FREE: u32 = u32::MAX;

/// The regions mapped at start-up. Regions in the block are found by masking an address,
/// which makes lookup O(1).
pub struct RegionBlock {
    start: Address,
    num_regions: usize,
    log_region_size: usize,
}

impl RegionBlock {
    fn new(start: Address, num_regions: usize, region_size: usize) -> Self {
        info!(
            "region block: {} regions of {} bytes at {}",
            num_regions, region_size, start
        );
        RegionBlock {
            start,
            num_regions,
            log_region_size: region_size.trailing_zeros() as usize,
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + (self.num_regions << self.log_region_size)
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }
}

impl Drop for RegionBlock {
    fn drop(&mut self) {
        if let Err(e) = memory::munmap(self.start, self.num_regions << self.log_region_size) {
            warn!("failed to unmap region block at {}: {}", self.start, e);
        }
    }
}

/// Address space reserved right after the block for regions committed on demand once
/// the block is exhausted. The range is inaccessible until a region is committed into
/// it, but it is part of the heap layout, so the card table covers it from the start.
pub struct MmapPool {
    start: Address,
    num_regions: usize,
    log_region_size: usize,
    mapped: AtomicUsize,
}

impl MmapPool {
    fn reserve(start: Address, num_regions: usize, region_size: usize) -> Result<Self> {
        let pool = MmapPool {
            start,
            num_regions,
            log_region_size: region_size.trailing_zeros() as usize,
            mapped: AtomicUsize::new(0),
        };
        if num_regions > 0 {
            if let Err(e) = memory::mprotect(start, pool.size()) {
                // Nothing owns the range yet.
                let _ = memory::munmap(start, pool.size());
                return Err(e);
            }
            debug!("mmap pool: {} regions reserved at {}", num_regions, start);
        }
        Ok(pool)
    }

    fn size(&self) -> usize {
        self.num_regions << self.log_region_size
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.start + self.size()
    }

    pub fn num_regions(&self) -> usize {
        self.num_regions
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.end()
    }

    fn map(&self, start: Address, size: usize) -> Result<()> {
        debug_assert!(self.contains(start) && start + size <= self.end());
        memory::munprotect(start, size)?;
        self.mapped.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn unmap(&self, start: Address, size: usize) -> Result<()> {
        debug_assert!(self.contains(start) && start + size <= self.end());
        self.mapped.fetch_sub(1, Ordering::Relaxed);
        memory::decommit(start, size)?;
        memory::mprotect(start, size)
    }

    /// Number of regions currently committed.
    pub fn len(&self) -> usize {
        self.mapped.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for MmapPool {
    fn drop(&mut self) {
        if self.num_regions == 0 {
            return;
        }
        if let Err(e) = memory::munmap(self.start, self.size()) {
            warn!("failed to unmap mmap pool at {}: {}", self.start, e);
        }
    }
}

/// Owner of every region slot.
///
/// Slots `0..block.num_regions()` cover the block and the remaining slots cover the
/// [`MmapPool`] reservation that directly follows it, so slot `i` always starts at
/// `block.start() + i * region_size`. For every slot, `heads[i]` is `SLOT_FREE`, `i` for
/// the first slot of a region, or the index of the first slot for the trailing slots of
/// a large region.
pub struct RegionPool {
    layout: HeapLayout,
    block: RegionBlock,
    mmap_pool: MmapPool,
    regions: Box<[Region]>,
    heads: Box<[AtomicU32]>,
    alloc_lock: spin::Mutex<()>,
    next_space: AtomicUsize,
}

impl RegionPool {
    pub fn new(options: &Options) -> Result<Self> {
        let region_size = options.region_size;
        assert!(region_size.is_power_of_two());
        let block_regions = options.max_regions();
        let extension = if options.extend_from_mmap_pool {
            options.max_extension_regions
        } else {
            0
        };
        let total = block_regions + extension;
        let start = memory::dzmmap_aligned(total * region_size, region_size)?;
        let block = RegionBlock::new(start, block_regions, region_size);
        let mmap_pool = MmapPool::reserve(block.end(), extension, region_size)?;
        let layout = HeapLayout::new(
            block.start()..mmap_pool.end(),
            region_size,
            1 << options.card_bits,
        );
        Ok(RegionPool {
            layout,
            block,
            mmap_pool,
            regions: (0..total).map(|i| Region::new(i, region_size)).collect(),
            heads: (0..total).map(|_| AtomicU32::new(SLOT_FREE)).collect(),
            alloc_lock: spin::Mutex::new(()),
            next_space: AtomicUsize::new(0),
        })
    }

    /// Covers the block and the mmap pool reservation.
    pub fn layout(&self) -> HeapLayout {
        self.layout
    }

    pub fn region_size(&self) -> usize {
        self.layout.region_size()
    }

    pub fn block(&self) -> &RegionBlock {
        &self.block
    }

    pub fn mmap_pool(&self) -> &MmapPool {
        &self.mmap_pool
    }

    /// A fresh id for a space allocating from this pool.
    pub(super) fn next_space_id(&self) -> usize {
        self.next_space.fetch_add(1, Ordering::Relaxed)
    }

    fn regions_for(&self, size: usize) -> usize {
        size.max(1).div_ceil(self.region_size())
    }

    fn slot_start(&self, index: usize) -> Address {
        self.block.start() + (index << self.layout.log_region_size)
    }

    /// Allocate a region of at least `size` bytes for `space`, with `flags`.
    ///
    /// A request larger than a region takes a contiguous run of slots. Returns `None`
    /// when neither the block nor the mmap pool can serve the request.
    pub fn new_region(&self, space: usize, flags: RegionFlags, size: usize) -> Option<RegionHandle> {
        let count = self.regions_for(size);
        let _guard = self.alloc_lock.lock();
        let handle = self
            .find_free_run(0..self.block.num_regions(), count)
            .map(|first| self.claim_run(first, count, space, flags))
            .or_else(|| self.new_extension_region(space, flags, count));
        match handle {
            Some(h) => trace!("new region {:?} for space {}: {:?}", h, space, self.regions[h.index()]),
            None => debug!("out of regions: space {} requested {} bytes", space, size),
        }
        handle
    }

    fn find_free_run(&self, slots: Range<usize>, count: usize) -> Option<usize> {
        let mut run = 0;
        for i in slots {
            if self.heads[i].load(Ordering::Relaxed) == SLOT_FREE {
                run += 1;
                if run == count {
                    return Some(i + 1 - count);
                }
            } else {
                run = 0;
            }
        }
        None
    }

    fn claim_run(&self, first: usize, count: usize, space: usize, flags: RegionFlags) -> RegionHandle {
        for j in first + 1..first + count {
            self.heads[j].store(first as u32, Ordering::Release);
        }
        let region = &self.regions[first];
        region.init(space, flags, self.slot_start(first), self.slot_start(first + count));
        self.heads[first].store(first as u32, Ordering::Release);
        region.handle()
    }

    fn new_extension_region(&self, space: usize, flags: RegionFlags, count: usize) -> Option<RegionHandle> {
        if self.mmap_pool.num_regions() == 0 {
            return None;
        }
        let first = self.find_free_run(self.block.num_regions()..self.regions.len(), count)?;
        let begin = self.slot_start(first);
        let size = count * self.region_size();
        if let Err(e) = self.mmap_pool.map(begin, size) {
            warn!("failed to commit an extension region of {} bytes at {}: {}", size, begin, e);
            return None;
        }
        Some(self.claim_run(first, count, space, flags))
    }

    /// Is `handle` a region in the mmap pool?
    pub fn is_extension(&self, handle: RegionHandle) -> bool {
        handle.index() >= self.block.num_regions()
    }

    /// Return a region's slots to the pool. Block memory is zeroed; extension memory is
    /// decommitted.
    pub fn release_region(&self, handle: RegionHandle) {
        let Some(region) = self.get(handle) else {
            panic!("releasing stale region {:?}", handle);
        };
        let _guard = self.alloc_lock.lock();
        let index = handle.index();
        let begin = region.begin();
        let slots = self.regions_for(region.size());
        let bytes = slots * self.region_size();
        trace!("release region {:?}", region);
        region.retire();
        for j in index..index + slots {
            self.heads[j].store(SLOT_FREE, Ordering::Release);
        }
        if self.is_extension(handle) {
            if let Err(e) = self.mmap_pool.unmap(begin, bytes) {
                warn!("failed to decommit extension region at {}: {}", begin, e);
            }
        } else {
            memory::zero(begin, bytes);
        }
    }

    /// The region for `handle`, or `None` if the handle is stale.
    pub fn get(&self, handle: RegionHandle) -> Option<&Region> {
        let index = handle.index();
        if self.heads.get(index)?.load(Ordering::Acquire) != index as u32 {
            return None;
        }
        let region = &self.regions[index];
        (region.generation() == handle.generation).then_some(region)
    }

    /// Resolve a heap address to the region that owns it.
    ///
    /// Without `CROSS_REGION`, only addresses in the first slot of a region are resolved.
    /// With `CROSS_REGION`, addresses inside the trailing slots of a large region resolve
    /// to it too.
    #[inline]
    pub fn get_region<const CROSS_REGION: bool>(&self, addr: Address) -> Option<&Region> {
        if !self.layout.contains(addr) {
            return None;
        }
        let index = (addr - self.block.start()) >> self.layout.log_region_size;
        let head = self.heads[index].load(Ordering::Acquire);
        if head == SLOT_FREE {
            return None;
        }
        if head as usize == index || CROSS_REGION {
            return Some(&self.regions[head as usize]);
        }
        None
    }

    /// Number of live regions, counting a large region once.
    pub fn allocated_regions(&self) -> usize {
        self.heads
            .iter()
            .enumerate()
            .filter(|(i, h)| h.load(Ordering::Relaxed) == *i as u32)
            .count()
    }

    /// Number of block slots not in use.
    pub fn free_block_regions(&self) -> usize {
        self.heads[..self.block.num_regions()]
            .iter()
            .filter(|h| h.load(Ordering::Relaxed) == SLOT_FREE)
            .count()
    }

    pub fn for_each_region<F: FnMut(&Region)>(&self, mut f: F) {
        for (i, h) in self.heads.iter().enumerate() {
            if h.load(Ordering::Acquire) == i as u32 {
                f(&self.regions[i]);
            }
        }
    }
}

impl std::fmt::Debug for RegionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RegionPool([{}, {}) {}/{} free, {} extension)",
            self.block.start(),
            self.block.end(),
            self.free_block_regions(),
            self.block.num_regions(),
            self.mmap_pool.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::small_heap_options;
    use crate::util::ObjectReference;

    #[test]
    fn block_regions_are_aligned_and_resolvable() {
        let mut options = small_heap_options(4);
        options.extend_from_mmap_pool = false;
        let pool = RegionPool::new(&options).unwrap();
        let h = pool.new_region(0, RegionFlags::EDEN, 100).unwrap();
        let region = pool.get(h).unwrap();
        assert!(region.begin().is_aligned_to(options.region_size));
        assert_eq!(region.size(), options.region_size);
        let inner = region.begin() + 1000usize;
        assert_eq!(pool.get_region::<false>(inner).unwrap().handle(), h);
        assert_eq!(pool.get_region::<true>(inner).unwrap().handle(), h);
        assert_eq!(pool.allocated_regions(), 1);
    }

    #[test]
    fn exhaustion_without_extension() {
        let mut options = small_heap_options(2);
        options.extend_from_mmap_pool = false;
        let pool = RegionPool::new(&options).unwrap();
        assert!(pool.new_region(0, RegionFlags::OLD, 0).is_some());
        assert!(pool.new_region(0, RegionFlags::OLD, 0).is_some());
        assert!(pool.new_region(0, RegionFlags::OLD, 0).is_none());
    }

    #[test]
    fn large_region_takes_contiguous_slots() {
        let mut options = small_heap_options(4);
        options.extend_from_mmap_pool = false;
        let pool = RegionPool::new(&options).unwrap();
        let size = options.region_size * 2 + 8;
        let h = pool.new_region(0, RegionFlags::LARGE_OBJECT, size).unwrap();
        let region = pool.get(h).unwrap();
        assert_eq!(region.size(), options.region_size * 3);
        let tail = region.begin() + (options.region_size * 2 + 16);
        assert!(pool.get_region::<false>(tail).is_none());
        assert_eq!(pool.get_region::<true>(tail).unwrap().handle(), h);
        assert_eq!(pool.free_block_regions(), 1);
        assert!(pool.new_region(0, RegionFlags::LARGE_OBJECT, size).is_none());
    }

    #[test]
    fn large_region_bitmaps_cover_every_slot() {
        let mut options = small_heap_options(4);
        options.extend_from_mmap_pool = false;
        let pool = RegionPool::new(&options).unwrap();
        let h = pool
            .new_region(0, RegionFlags::LARGE_OBJECT, options.region_size * 2)
            .unwrap();
        let region = pool.get(h).unwrap();
        region.alloc::<false>(options.region_size).unwrap();
        let tail = ObjectReference::from_raw_address(region.alloc::<false>(64).unwrap());
        assert_eq!(tail.to_raw_address() - region.begin(), options.region_size);
        assert!(region.mark_object(tail));
        assert!(region.is_marked(tail));
        region.swap_mark_bitmap();
        assert!(region.is_live(tail));
        let mut live = vec![];
        region.iterate_live_objects(|o| live.push(o));
        assert_eq!(live, vec![tail]);

        // the slot is usable as a regular region again
        pool.release_region(h);
        let h2 = pool.new_region(0, RegionFlags::OLD, 0).unwrap();
        assert_eq!(h2.index(), h.index());
        let region = pool.get(h2).unwrap();
        let obj = ObjectReference::from_raw_address(region.alloc::<false>(64).unwrap());
        assert!(!region.is_marked(obj));
        assert!(region.mark_object(obj));
    }

    #[test]
    fn stale_handles() {
        let mut options = small_heap_options(2);
        options.extend_from_mmap_pool = false;
        let pool = RegionPool::new(&options).unwrap();
        let h = pool.new_region(0, RegionFlags::EDEN, 0).unwrap();
        pool.release_region(h);
        assert!(pool.get(h).is_none());
        let h2 = pool.new_region(0, RegionFlags::EDEN, 0).unwrap();
        assert_eq!(h2.index(), h.index());
        assert_ne!(h2, h);
        assert!(pool.get(h).is_none());
        assert!(pool.get(h2).is_some());
    }

    #[test]
    fn extension_from_mmap_pool() {
        let mut options = small_heap_options(1);
        options.max_extension_regions = 3;
        let pool = RegionPool::new(&options).unwrap();
        let h1 = pool.new_region(0, RegionFlags::EDEN, 0).unwrap();
        assert!(!pool.is_extension(h1));
        let h2 = pool.new_region(0, RegionFlags::OLD, 0).unwrap();
        assert!(pool.is_extension(h2));
        let large = pool
            .new_region(0, RegionFlags::LARGE_OBJECT, options.region_size * 2)
            .unwrap();
        assert!(pool.new_region(0, RegionFlags::OLD, 0).is_none());
        assert_eq!(pool.mmap_pool().len(), 2);

        let region = pool.get(large).unwrap();
        assert!(region.begin().is_aligned_to(options.region_size));
        assert!(pool.mmap_pool().contains(region.begin()));
        assert!(pool.layout().contains(region.end() - 8usize));
        let interior = region.begin() + (options.region_size + 8);
        assert_eq!(pool.get_region::<true>(interior).unwrap().handle(), large);
        assert!(pool.get_region::<false>(interior).is_none());
        // extension memory is usable
        let obj = region.alloc::<true>(64).unwrap();
        unsafe {
            obj.store::<usize>(7);
            assert_eq!(obj.load::<usize>(), 7);
        }

        pool.release_region(h2);
        assert_eq!(pool.mmap_pool().len(), 1);
        assert!(pool.get(h2).is_none());
    }
}
