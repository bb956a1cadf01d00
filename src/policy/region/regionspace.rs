use super::cardtable::CardTable;
use super::region::{Region, RegionFlags, RegionKind};
use super::region_pool::{RegionHandle, RegionPool};
use super::remset::RegionRemSet;
use crate::util::options::Options;
use crate::util::Address;
use enum_map::EnumMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The regions of one logical space, allocated from a shared [`RegionPool`].
///
/// Freed regular regions are kept on per-generation empty lists and reused before new
/// slots are taken from the pool. Eden usage is tracked separately with an atomic counter
/// so promotion can update it without taking the list locks.
pub struct RegionSpace {
    name: &'static str,
    id: usize,
    pool: Arc<RegionPool>,
    card_table: Option<Arc<CardTable>>,
    allocated: spin::Mutex<Vec<RegionHandle>>,
    empty_young: spin::Mutex<Vec<RegionHandle>>,
    empty_old: spin::Mutex<Vec<RegionHandle>>,
    reserved: spin::Mutex<Option<RegionHandle>>,
    kind_counts: spin::Mutex<EnumMap<RegionKind, usize>>,
    young_regions_in_use: AtomicUsize,
    desired_eden_length: AtomicUsize,
    promotion_region_alive_rate: usize,
    garbage_rate_threshold: usize,
}

impl RegionSpace {
    pub fn new(name: &'static str, pool: Arc<RegionPool>, options: &Options) -> Self {
        let id = pool.next_space_id();
        debug!("space {} has id {}", name, id);
        RegionSpace {
            name,
            id,
            pool,
            card_table: None,
            allocated: spin::Mutex::new(Vec::new()),
            empty_young: spin::Mutex::new(Vec::new()),
            empty_old: spin::Mutex::new(Vec::new()),
            reserved: spin::Mutex::new(None),
            kind_counts: spin::Mutex::new(EnumMap::default()),
            young_regions_in_use: AtomicUsize::new(0),
            desired_eden_length: AtomicUsize::new(options.desired_eden_length),
            promotion_region_alive_rate: options.g1_promotion_region_alive_rate,
            garbage_rate_threshold: options.g1_region_garbage_rate_threshold,
        }
    }

    /// Keep the cards of eden regions marked young.
    pub fn with_card_table(mut self, card_table: Arc<CardTable>) -> Self {
        self.card_table = Some(card_table);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn pool(&self) -> &RegionPool {
        &self.pool
    }

    /// The region for a handle this space owns.
    pub fn region(&self, handle: RegionHandle) -> &Region {
        match self.pool.get(handle) {
            Some(region) => {
                debug_assert_eq!(region.space(), self.id, "{:?} is not in {}", region, self.name);
                region
            }
            None => panic!("stale region handle {:?} in {}", handle, self.name),
        }
    }

    /// Allocate a region of at least `size` bytes with `flags`.
    ///
    /// Regular-sized requests reuse a region from the matching empty list when possible.
    /// An eden request fails once the desired eden length is reached.
    pub fn new_region(&self, flags: RegionFlags, size: usize) -> Option<RegionHandle> {
        let kind = flags.kind()?;
        let is_eden = kind == RegionKind::Eden;
        if is_eden && !self.can_allocate_young() {
            trace!("{}: eden is at its desired length", self.name);
            return None;
        }
        let handle = self
            .reuse_empty(flags, size)
            .or_else(|| self.pool.new_region(self.id, flags, size))?;
        let region = self.region(handle);
        self.allocated.lock().push(handle);
        self.kind_counts.lock()[kind] += 1;
        if is_eden {
            self.young_regions_in_use.fetch_add(1, Ordering::AcqRel);
            if let Some(ct) = &self.card_table {
                ct.mark_cards_as_young(region.begin()..region.end());
            }
        }
        Some(handle)
    }

    fn reuse_empty(&self, flags: RegionFlags, size: usize) -> Option<RegionHandle> {
        if size > self.pool.region_size() {
            return None;
        }
        let list = if flags.is_young() {
            &self.empty_young
        } else {
            &self.empty_old
        };
        let handle = list.lock().pop()?;
        self.region(handle).reinit(flags);
        Some(handle)
    }

    /// Give a region back. Its remembered-set traces are removed first. Regular block
    /// regions go to the empty list of their generation, others back to the pool.
    /// Either way `handle` is stale afterwards.
    pub fn free_region(&self, handle: RegionHandle) {
        let region = self.region(handle);
        assert!(
            !region.has_pinned_objects(),
            "freeing {:?} which has pinned objects",
            region
        );
        RegionRemSet::invalidate_region(&self.pool, handle);
        self.unlink(handle, region);
        if let Some(ct) = &self.card_table {
            ct.clear_cards(region.begin()..region.end());
        }
        let young = region.is_young();
        let regular = region.size() == self.pool.region_size() && !self.pool.is_extension(handle);
        if regular {
            let handle = region.recycle();
            if young {
                self.empty_young.lock().push(handle);
            } else {
                self.empty_old.lock().push(handle);
            }
        } else {
            self.pool.release_region(handle);
        }
    }

    fn unlink(&self, handle: RegionHandle, region: &Region) {
        {
            let mut allocated = self.allocated.lock();
            let pos = allocated
                .iter()
                .position(|h| *h == handle)
                .unwrap_or_else(|| panic!("{:?} is not allocated in {}", handle, self.name));
            allocated.swap_remove(pos);
        }
        if let Some(kind) = region.kind() {
            self.kind_counts.lock()[kind] -= 1;
            if kind == RegionKind::Eden {
                self.young_regions_in_use.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    /// Give every empty region back to the pool.
    pub fn release_empty_regions(&self) {
        let handles: Vec<RegionHandle> = self
            .empty_young
            .lock()
            .drain(..)
            .chain(self.empty_old.lock().drain(..))
            .collect();
        for h in handles {
            self.pool.release_region(h);
        }
    }

    /// Turn an eden region into an old region in place. No objects move.
    pub fn promote_young_region(&self, handle: RegionHandle) {
        let region = self.region(handle);
        assert!(region.is_eden(), "promoting non-eden {:?}", region);
        let flags = region
            .flags()
            .without(RegionFlags::EDEN)
            | RegionFlags::OLD
            | RegionFlags::PROMOTED;
        region.set_flags(flags);
        {
            let mut counts = self.kind_counts.lock();
            counts[RegionKind::Eden] -= 1;
            counts[RegionKind::Old] += 1;
        }
        self.young_regions_in_use.fetch_sub(1, Ordering::AcqRel);
        if let Some(ct) = &self.card_table {
            ct.clear_cards(region.begin()..region.end());
        }
        debug!("{}: promoted {:?}", self.name, region);
    }

    /// Should an eden region be promoted in place rather than evacuated?
    ///
    /// Regions with pinned objects are always promoted. Otherwise, outside full GCs, a
    /// region is promoted when its live percentage reaches the promotion alive rate.
    pub fn need_to_promote(&self, handle: RegionHandle, full_gc: bool) -> bool {
        let region = self.region(handle);
        debug_assert!(region.is_eden());
        if region.has_pinned_objects() {
            return true;
        }
        let rate = self.promotion_region_alive_rate;
        rate < 100 && !full_gc && region.alive_percentage() >= rate as f64
    }

    /// Old regions with a garbage percentage of at least `threshold`, most garbage first.
    pub fn get_top_garbage_regions(&self, threshold: usize) -> Vec<RegionHandle> {
        let mut candidates: Vec<(usize, RegionHandle)> = self
            .allocated
            .lock()
            .iter()
            .map(|&h| (h, self.region(h)))
            .filter(|(_, r)| r.kind() == Some(RegionKind::Old))
            .filter(|(_, r)| r.garbage_percentage() >= threshold as f64)
            .map(|(h, r)| (r.get_garbage_bytes(), h))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));
        candidates.into_iter().map(|(_, h)| h).collect()
    }

    /// Old regions worth collecting under the configured garbage rate threshold, most
    /// garbage first.
    pub fn get_collection_candidates(&self) -> Vec<RegionHandle> {
        self.get_top_garbage_regions(self.garbage_rate_threshold)
    }

    /// Hold one old region back so a full GC always has somewhere to evacuate to.
    pub fn reserve_region(&self) -> Option<RegionHandle> {
        let mut reserved = self.reserved.lock();
        if reserved.is_none() {
            let handle = self.new_region(RegionFlags::OLD | RegionFlags::RESERVED, 0)?;
            self.unlink(handle, self.region(handle));
            *reserved = Some(handle);
        }
        *reserved
    }

    /// Hand the reserved region back as an ordinary old region of this space.
    pub fn release_reserved_region(&self) -> Option<RegionHandle> {
        let handle = self.reserved.lock().take()?;
        let region = self.region(handle);
        region.remove_flag(RegionFlags::RESERVED);
        self.allocated.lock().push(handle);
        self.kind_counts.lock()[RegionKind::Old] += 1;
        Some(handle)
    }

    pub fn set_desired_eden_length(&self, length: usize) {
        self.desired_eden_length.store(length, Ordering::Relaxed);
    }

    /// True unless a desired eden length is set and reached.
    pub fn can_allocate_young(&self) -> bool {
        let desired = self.desired_eden_length.load(Ordering::Relaxed);
        desired == 0 || self.young_regions_in_use.load(Ordering::Acquire) < desired
    }

    pub fn young_regions_in_use(&self) -> usize {
        self.young_regions_in_use.load(Ordering::Acquire)
    }

    pub fn count(&self, kind: RegionKind) -> usize {
        self.kind_counts.lock()[kind]
    }

    pub fn allocated_regions(&self) -> Vec<RegionHandle> {
        self.allocated.lock().clone()
    }

    pub fn empty_regions(&self) -> (usize, usize) {
        (self.empty_young.lock().len(), self.empty_old.lock().len())
    }

    /// Total live bytes over all allocated regions.
    pub fn live_bytes(&self) -> usize {
        self.allocated
            .lock()
            .iter()
            .map(|&h| self.region(h).get_live_bytes())
            .sum()
    }

    /// Try to bump-allocate `size` bytes in any allocated region of `kind`.
    pub fn alloc_in<const ATOMIC: bool>(&self, kind: RegionKind, size: usize) -> Option<Address> {
        let handles = self.allocated.lock().clone();
        handles
            .into_iter()
            .map(|h| self.region(h))
            .filter(|r| r.kind() == Some(kind) && !r.is_mixed_tlab())
            .find_map(|r| r.alloc::<ATOMIC>(size))
    }
}

impl std::fmt::Debug for RegionSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionSpace")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("kinds", &*self.kind_counts.lock())
            .field("young_regions_in_use", &self.young_regions_in_use())
            .finish()
    }
}
