//! Remembered sets.
//!
//! Every region owns a [`RemSet`] recording which parts of *other* regions hold references
//! into it. Entries are keyed by the region-aligned start address of the referencing
//! range and store a [`RangeBitmap`] with one bit per sub-range, so a scan during
//! evacuation only needs to look at the recorded sub-ranges instead of whole regions.
//! The remset also keeps the set of regions its owner points into, which lets
//! [`RemSet::invalidate_region`] remove a dying region from every remset it appears in.

use super::{RegionHandle, RegionPool};
use crate::util::bitmap::{RangeBitmap, RANGE_BITMAP_BITS};
use crate::util::{Address, ObjectReference};
use std::cell::{Cell, UnsafeCell};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::ops::Range;

/// The lock guarding a remembered set.
pub trait LockConfig: Default {
    type Guard<'a>
    where
        Self: 'a;

    fn lock(&self) -> Self::Guard<'_>;
}

/// A recursive lock, so a thread holding it may call back into the same remset.
#[derive(Default)]
pub struct ReentrantLock(parking_lot::ReentrantMutex<()>);

impl LockConfig for ReentrantLock {
    type Guard<'a> = parking_lot::ReentrantMutexGuard<'a, ()>;

    fn lock(&self) -> Self::Guard<'_> {
        self.0.lock()
    }
}

/// No locking. A remset with this lock is not `Sync`, so it can only be used from one
/// thread at a time, or under a lock the caller already holds.
#[derive(Default)]
pub struct DummyLock(PhantomData<Cell<()>>);

impl LockConfig for DummyLock {
    type Guard<'a> = ();

    fn lock(&self) -> Self::Guard<'_> {}
}

#[derive(Default)]
struct RemSetInner {
    bitmaps: HashMap<Address, RangeBitmap>,
    ref_regions: HashSet<RegionHandle>,
}

pub struct RemSet<L: LockConfig = ReentrantLock> {
    lock: L,
    inner: UnsafeCell<RemSetInner>,
    region_size: usize,
}

// All access to `inner` happens under `lock`, and no reference into `inner` outlives the
// guard or is held across a call to user code.
unsafe impl<L: LockConfig + Send> Send for RemSet<L> {}
unsafe impl<L: LockConfig + Sync> Sync for RemSet<L> {}

/// The remset type every region carries.
pub type RegionRemSet = RemSet<ReentrantLock>;

impl<L: LockConfig> RemSet<L> {
    pub fn new(region_size: usize) -> Self {
        assert!(region_size.is_power_of_two());
        assert!(region_size >= RANGE_BITMAP_BITS);
        RemSet {
            lock: L::default(),
            inner: UnsafeCell::new(RemSetInner::default()),
            region_size,
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut RemSetInner) -> R) -> R {
        let _guard = self.lock.lock();
        f(unsafe { &mut *self.inner.get() })
    }

    fn bytes_per_bit(&self) -> usize {
        self.region_size / RANGE_BITMAP_BITS
    }

    /// Remember that the object at `from_obj` holds a reference into the owner of this
    /// remset. The whole sub-range containing the object is remembered.
    pub fn add_ref(&self, from_obj: Address, offset: usize) {
        let key = from_obj.align_down(self.region_size);
        let bit = (from_obj - key) / self.bytes_per_bit();
        trace!("remset add {} (field +{}) -> key {} bit {}", from_obj, offset, key, bit);
        self.with_inner(|inner| inner.bitmaps.entry(key).or_default().set(bit));
    }

    /// Remember a store of `value` into the field at `offset` of `from_obj`, in the remset
    /// of the region containing `value`. Both ends must be in regions of `pool`.
    pub fn add_ref_with_addr(pool: &RegionPool, from_obj: ObjectReference, offset: usize, value: ObjectReference) {
        let from = from_obj.to_raw_address();
        let to = value.to_raw_address();
        let target = pool.get_region::<true>(to);
        let source = pool.get_region::<true>(from);
        let (Some(target), Some(source)) = (target, source) else {
            panic!("reference {} -> {} is not between live regions", from, to);
        };
        target.remset().add_ref(from, offset);
        source.remset().add_ref_region(target.handle());
    }

    pub(super) fn add_ref_region(&self, handle: RegionHandle) {
        self.with_inner(|inner| {
            inner.ref_regions.insert(handle);
        });
    }

    fn remove_ref_region(&self, handle: RegionHandle) {
        self.with_inner(|inner| {
            inner.ref_regions.remove(&handle);
        });
    }

    /// Regions the owner of this remset holds references into.
    pub fn ref_regions(&self) -> Vec<RegionHandle> {
        self.with_inner(|inner| inner.ref_regions.iter().copied().collect())
    }

    /// Drop every entry whose key lies in `range`.
    fn remove_entries_in(&self, range: &Range<Address>) {
        self.with_inner(|inner| inner.bitmaps.retain(|key, _| !range.contains(key)));
    }

    /// Call `visitor` once for every remembered sub-range whose region start passes `pred`.
    ///
    /// Entries are copied out before visiting, so the visitor may add to this remset.
    pub fn iterate<P, V>(&self, mut pred: P, mut visitor: V)
    where
        P: FnMut(Address) -> bool,
        V: FnMut(Range<Address>),
    {
        let entries: Vec<(Address, RangeBitmap)> = self.with_inner(|inner| {
            inner
                .bitmaps
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect()
        });
        let step = self.bytes_per_bit();
        for (start, bitmap) in entries {
            if !pred(start) {
                continue;
            }
            for bit in bitmap.iter_set() {
                let from = start + bit * step;
                visitor(from..from + step);
            }
        }
    }

    /// Call `visitor` for each live object starting inside a remembered sub-range.
    pub fn iterate_over_objects<V: FnMut(ObjectReference)>(&self, pool: &RegionPool, mut visitor: V) {
        self.iterate(
            |_| true,
            |range| {
                if let Some(region) = pool.get_region::<true>(range.start) {
                    region.iterate_live_objects_in(range, &mut visitor);
                }
            },
        );
    }

    /// OR in every entry of `other`, e.g. when two regions are coalesced.
    pub fn merge<L2: LockConfig>(&self, other: &RemSet<L2>) {
        debug_assert_eq!(self.region_size, other.region_size);
        let (bitmaps, ref_regions) = other.with_inner(|inner| {
            (inner.bitmaps.clone(), inner.ref_regions.clone())
        });
        self.with_inner(|inner| {
            for (key, bitmap) in bitmaps {
                inner.bitmaps.entry(key).or_default().or(&bitmap);
            }
            inner.ref_regions.extend(ref_regions);
        });
    }

    /// Remove all traces of the region `handle` from the remsets of `pool`: its entries in
    /// the remsets of regions it points into, its membership in the ref-region sets of
    /// regions pointing into it, and its own remset. Must run before the region is reused.
    pub fn invalidate_region(pool: &RegionPool, handle: RegionHandle) {
        let Some(region) = pool.get(handle) else {
            panic!("invalidating stale region {:?}", handle);
        };
        let range = region.begin()..region.end();
        let remset = region.remset();
        let (targets, sources) = remset.with_inner(|inner| {
            let targets: Vec<RegionHandle> = inner.ref_regions.iter().copied().collect();
            let sources: Vec<Address> = inner.bitmaps.keys().copied().collect();
            (targets, sources)
        });
        for target in targets {
            if let Some(target) = pool.get(target) {
                target.remset().remove_entries_in(&range);
            }
        }
        for source in sources {
            if let Some(source) = pool.get_region::<true>(source) {
                source.remset().remove_ref_region(handle);
            }
        }
        remset.clear();
        trace!("invalidated remsets of {:?}", region);
    }

    pub fn clear(&self) {
        self.with_inner(|inner| {
            inner.bitmaps.clear();
            inner.ref_regions.clear();
        });
    }

    /// Number of remembered sub-ranges.
    pub fn get_remset_size(&self) -> usize {
        self.with_inner(|inner| inner.bitmaps.values().map(|b| b.count()).sum())
    }

    pub fn is_empty(&self) -> bool {
        self.with_inner(|inner| inner.bitmaps.values().all(|b| b.is_empty()))
    }
}

impl<L: LockConfig> std::fmt::Debug for RemSet<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bitmaps = self.with_inner(|inner| inner.bitmaps.clone());
        let mut map = f.debug_map();
        for (k, v) in bitmaps.iter() {
            map.entry(k, v);
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::DEFAULT_REGION_SIZE;

    fn addr(a: usize) -> Address {
        unsafe { Address::from_usize(a) }
    }

    #[test]
    fn add_ref_records_covering_subrange() {
        let remset = RemSet::<DummyLock>::new(DEFAULT_REGION_SIZE);
        let from = addr(0x4000_0000 + 3 * DEFAULT_REGION_SIZE + 1000);
        remset.add_ref(from, 16);
        let mut ranges = vec![];
        remset.iterate(|_| true, |r| ranges.push(r));
        assert_eq!(ranges.len(), 1);
        assert!(ranges[0].contains(&from));
        assert_eq!(ranges[0].end - ranges[0].start, DEFAULT_REGION_SIZE / RANGE_BITMAP_BITS);
        assert_eq!(remset.get_remset_size(), 1);
    }

    #[test]
    fn iterate_filters_by_region() {
        let remset = RemSet::<ReentrantLock>::new(DEFAULT_REGION_SIZE);
        let r1 = addr(0x4000_0000);
        let r2 = r1 + DEFAULT_REGION_SIZE;
        remset.add_ref(r1 + 8usize, 0);
        remset.add_ref(r2 + 8usize, 0);
        remset.add_ref(r2 + 16usize, 0);
        let mut ranges = vec![];
        remset.iterate(|start| start == r2, |r| ranges.push(r));
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].start, r2);
    }

    #[test]
    fn reentrant_visitor() {
        let remset = RemSet::<ReentrantLock>::new(DEFAULT_REGION_SIZE);
        remset.add_ref(addr(0x4000_0000), 0);
        remset.iterate(|_| true, |r| remset.add_ref(r.start + DEFAULT_REGION_SIZE, 0));
        assert_eq!(remset.get_remset_size(), 2);
    }

    #[test]
    fn merge_and_clear() {
        let a = RemSet::<ReentrantLock>::new(DEFAULT_REGION_SIZE);
        let b = RemSet::<DummyLock>::new(DEFAULT_REGION_SIZE);
        a.add_ref(addr(0x4000_0000), 0);
        b.add_ref(addr(0x4000_0000), 0);
        b.add_ref(addr(0x4000_1000), 0);
        a.merge(&b);
        assert_eq!(a.get_remset_size(), 2);
        a.clear();
        assert!(a.is_empty());
        assert_eq!(a.get_remset_size(), 0);
    }
}
