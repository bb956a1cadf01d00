use super::remset::{ReentrantLock, RemSet};
use super::RegionHandle;
use crate::util::alloc::Tlab;
use crate::util::bitmap::ObjectBitmap;
use crate::util::conversions::align_object_size;
use crate::util::{Address, ObjectReference};
use atomic::Atomic;
use enum_map::Enum;
use std::ops::Range;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicUsize, Ordering};

/// Region state flags. A region in use carries exactly one kind flag
/// (see [`RegionKind`]) plus any number of modifiers.
#[repr(transparent)]
#[derive(PartialEq, Eq, Clone, Copy, Default)]
pub struct RegionFlags(u16);

impl RegionFlags {
    pub const EMPTY: RegionFlags = RegionFlags(0);
    pub const EDEN: RegionFlags = RegionFlags(1 << 0);
    pub const SURVIVOR: RegionFlags = RegionFlags(1 << 1);
    pub const OLD: RegionFlags = RegionFlags(1 << 2);
    pub const LARGE_OBJECT: RegionFlags = RegionFlags(1 << 3);
    pub const NONMOVABLE: RegionFlags = RegionFlags(1 << 4);
    pub const TLAB: RegionFlags = RegionFlags(1 << 5);
    pub const IN_COLLECTION_SET: RegionFlags = RegionFlags(1 << 6);
    pub const FREE: RegionFlags = RegionFlags(1 << 7);
    pub const PROMOTED: RegionFlags = RegionFlags(1 << 8);
    pub const RESERVED: RegionFlags = RegionFlags(1 << 9);
    pub const PINNED: RegionFlags = RegionFlags(1 << 10);
    pub const MIXEDTLAB: RegionFlags = RegionFlags(1 << 11);

    const KIND_MASK: u16 = Self::EDEN.0
        | Self::SURVIVOR.0
        | Self::OLD.0
        | Self::LARGE_OBJECT.0
        | Self::NONMOVABLE.0;

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn contains(self, other: RegionFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: RegionFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn without(self, other: RegionFlags) -> RegionFlags {
        RegionFlags(self.0 & !other.0)
    }

    pub fn kind(self) -> Option<RegionKind> {
        match self.0 & Self::KIND_MASK {
            x if x == Self::EDEN.0 => Some(RegionKind::Eden),
            x if x == Self::SURVIVOR.0 => Some(RegionKind::Survivor),
            x if x == Self::OLD.0 => Some(RegionKind::Old),
            x if x == Self::LARGE_OBJECT.0 => Some(RegionKind::LargeObject),
            x if x == Self::NONMOVABLE.0 => Some(RegionKind::Nonmovable),
            _ => None,
        }
    }

    pub fn is_young(self) -> bool {
        self.intersects(Self::EDEN | Self::SURVIVOR)
    }
}

impl std::ops::BitOr for RegionFlags {
    type Output = RegionFlags;
    fn bitor(self, rhs: RegionFlags) -> RegionFlags {
        RegionFlags(self.0 | rhs.0)
    }
}

impl std::fmt::Debug for RegionFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [&str; 12] = [
            "EDEN",
            "SURVIVOR",
            "OLD",
            "LARGE_OBJECT",
            "NONMOVABLE",
            "TLAB",
            "IN_COLLECTION_SET",
            "FREE",
            "PROMOTED",
            "RESERVED",
            "PINNED",
            "MIXEDTLAB",
        ];
        let mut first = true;
        for (i, name) in NAMES.iter().enumerate() {
            if self.0 & (1 << i) != 0 {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        if first {
            write!(f, "EMPTY")?;
        }
        Ok(())
    }
}

/// The mutually exclusive kinds a region can have.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum RegionKind {
    Eden,
    Survivor,
    Old,
    LargeObject,
    Nonmovable,
}

impl RegionKind {
    pub fn flag(self) -> RegionFlags {
        match self {
            RegionKind::Eden => RegionFlags::EDEN,
            RegionKind::Survivor => RegionFlags::SURVIVOR,
            RegionKind::Old => RegionFlags::OLD,
            RegionKind::LargeObject => RegionFlags::LARGE_OBJECT,
            RegionKind::Nonmovable => RegionFlags::NONMOVABLE,
        }
    }
}

/// A contiguous piece of the heap with its own bump pointer, liveness data and
/// remembered set.
///
/// Regions live in slots owned by the [`RegionPool`](super::RegionPool). A slot is reused
/// across many region lifetimes; `generation` is bumped each time the slot is released so
/// that stale [`RegionHandle`]s can be detected.
pub struct Region {
    index: u32,
    generation: AtomicU32,
    space: AtomicUsize,
    begin: Atomic<Address>,
    end: Atomic<Address>,
    top: Atomic<Address>,
    flags: AtomicU16,
    live_bytes: AtomicUsize,
    allocated_objects: AtomicUsize,
    pinned_objects: AtomicUsize,
    /// Both bitmaps cover the whole region, all slots of a large region included.
    mark_bitmap: spin::RwLock<ObjectBitmap>,
    live_bitmap: spin::RwLock<ObjectBitmap>,
    remset: RemSet<ReentrantLock>,
    tlabs: spin::Mutex<Vec<Range<Address>>>,
}

impl Region {
    pub(super) fn new(index: usize, region_size: usize) -> Self {
        Region {
            index: index as u32,
            generation: AtomicU32::new(0),
            space: AtomicUsize::new(usize::MAX),
            begin: Atomic::new(Address::ZERO),
            end: Atomic::new(Address::ZERO),
            top: Atomic::new(Address::ZERO),
            flags: AtomicU16::new(RegionFlags::FREE.bits()),
            live_bytes: AtomicUsize::new(0),
            allocated_objects: AtomicUsize::new(0),
            pinned_objects: AtomicUsize::new(0),
            mark_bitmap: spin::RwLock::new(ObjectBitmap::new(region_size)),
            live_bitmap: spin::RwLock::new(ObjectBitmap::new(region_size)),
            remset: RemSet::new(region_size),
            tlabs: spin::Mutex::new(Vec::new()),
        }
    }

    /// Prepare the slot for a new region covering `[begin, end)`.
    pub(super) fn init(&self, space: usize, flags: RegionFlags, begin: Address, end: Address) {
        debug_assert!(begin < end);
        self.space.store(space, Ordering::Relaxed);
        self.begin.store(begin, Ordering::Relaxed);
        self.end.store(end, Ordering::Relaxed);
        let size = end - begin;
        for bitmap in [&self.mark_bitmap, &self.live_bitmap] {
            if bitmap.read().covered_bytes() != size {
                *bitmap.write() = ObjectBitmap::new(size);
            }
        }
        self.reinit(flags);
    }

    /// Reset the allocation state of a region that keeps its memory, and give it new flags.
    pub(super) fn reinit(&self, flags: RegionFlags) {
        debug_assert!(
            flags.kind().is_some(),
            "{:?} must have exactly one region kind",
            flags
        );
        self.reset();
        self.flags.store(flags.bits(), Ordering::Release);
    }

    /// Drop everything allocated in the region. The region is marked free.
    pub(super) fn reset(&self) {
        debug_assert!(!self.has_pinned_objects());
        self.top.store(self.begin(), Ordering::Relaxed);
        self.flags.store(RegionFlags::FREE.bits(), Ordering::Relaxed);
        self.live_bytes.store(0, Ordering::Relaxed);
        self.allocated_objects.store(0, Ordering::Relaxed);
        self.mark_bitmap.read().clear();
        self.live_bitmap.read().clear();
        self.remset.clear();
        self.tlabs.lock().clear();
    }

    /// Reset the region and invalidate outstanding handles to it. Returns the handle of
    /// the slot's next lifetime.
    pub(super) fn recycle(&self) -> RegionHandle {
        self.reset();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.handle()
    }

    /// Recycle the slot and detach it from its space.
    pub(super) fn retire(&self) {
        self.space.store(usize::MAX, Ordering::Relaxed);
        self.recycle();
    }

    pub fn handle(&self) -> RegionHandle {
        RegionHandle::new(self.index as usize, self.generation.load(Ordering::Acquire))
    }

    pub(super) fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn space(&self) -> usize {
        self.space.load(Ordering::Relaxed)
    }

    pub fn begin(&self) -> Address {
        self.begin.load(Ordering::Relaxed)
    }

    pub fn end(&self) -> Address {
        self.end.load(Ordering::Relaxed)
    }

    pub fn top(&self) -> Address {
        self.top.load(Ordering::Acquire)
    }

    pub fn size(&self) -> usize {
        self.end() - self.begin()
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.begin() && addr < self.end()
    }

    /* Flags */

    pub fn flags(&self) -> RegionFlags {
        RegionFlags(self.flags.load(Ordering::Acquire))
    }

    pub fn has_flag(&self, flag: RegionFlags) -> bool {
        self.flags().contains(flag)
    }

    pub fn add_flag(&self, flag: RegionFlags) {
        self.flags.fetch_or(flag.bits(), Ordering::AcqRel);
    }

    pub fn remove_flag(&self, flag: RegionFlags) {
        self.flags.fetch_and(!flag.bits(), Ordering::AcqRel);
    }

    pub(super) fn set_flags(&self, flags: RegionFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    pub fn kind(&self) -> Option<RegionKind> {
        self.flags().kind()
    }

    pub fn is_eden(&self) -> bool {
        self.has_flag(RegionFlags::EDEN)
    }

    pub fn is_young(&self) -> bool {
        self.flags().is_young()
    }

    pub fn is_free(&self) -> bool {
        self.has_flag(RegionFlags::FREE)
    }

    pub fn is_mixed_tlab(&self) -> bool {
        self.has_flag(RegionFlags::MIXEDTLAB)
    }

    pub fn is_in_collection_set(&self) -> bool {
        self.has_flag(RegionFlags::IN_COLLECTION_SET)
    }

    /* Allocation */

    /// Bump-allocate `size` bytes (rounded up to the allocation granule).
    ///
    /// With `ATOMIC` the top pointer is advanced by CAS and concurrent callers are
    /// safe; otherwise the caller must own the region exclusively.
    #[inline(always)]
    pub fn alloc<const ATOMIC: bool>(&self, size: usize) -> Option<Address> {
        let size = align_object_size(size);
        let end = self.end();
        let result = if ATOMIC {
            let mut old = self.top.load(Ordering::Relaxed);
            loop {
                if size > end - old {
                    return None;
                }
                match self.top.compare_exchange_weak(
                    old,
                    old + size,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break old,
                    Err(current) => old = current,
                }
            }
        } else {
            let old = self.top.load(Ordering::Relaxed);
            if size > end - old {
                return None;
            }
            self.top.store(old + size, Ordering::Relaxed);
            old
        };
        self.allocated_objects.fetch_add(1, Ordering::Relaxed);
        Some(result)
    }

    /// Allocated bytes, including unused space in TLABs carved from this region.
    pub fn get_allocated_bytes(&self) -> usize {
        self.top() - self.begin()
    }

    pub fn get_allocated_objects(&self) -> usize {
        self.allocated_objects.load(Ordering::Relaxed)
    }

    pub fn get_free_bytes(&self) -> usize {
        self.end() - self.top()
    }

    pub fn add_live_bytes<const ATOMIC: bool>(&self, bytes: usize) {
        if ATOMIC {
            let old = self.live_bytes.load(Ordering::Relaxed);
            self.debug_check_live_bytes(old + bytes);
            self.live_bytes.fetch_add(bytes, Ordering::SeqCst);
        } else {
            let old = self.live_bytes.load(Ordering::Relaxed);
            self.debug_check_live_bytes(old + bytes);
            self.live_bytes.store(old + bytes, Ordering::Relaxed);
        }
    }

    fn debug_check_live_bytes(&self, live: usize) {
        debug_assert!(
            live <= self.get_allocated_bytes(),
            "{} live bytes exceed the {} allocated in {:?}",
            live,
            self.get_allocated_bytes(),
            self
        );
    }

    pub fn set_live_bytes(&self, bytes: usize) {
        self.live_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn get_live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub fn get_garbage_bytes(&self) -> usize {
        self.get_allocated_bytes()
            .saturating_sub(self.get_live_bytes())
    }

    /// Live bytes as a percentage of the region size.
    pub fn alive_percentage(&self) -> f64 {
        self.get_live_bytes() as f64 / self.size() as f64 * 100.0
    }

    /// Garbage bytes as a percentage of the region size.
    pub fn garbage_percentage(&self) -> f64 {
        self.get_garbage_bytes() as f64 / self.size() as f64 * 100.0
    }

    /* TLABs */

    /// Carve a TLAB of `size` bytes out of this shared region.
    pub fn create_tlab(&self, size: usize) -> Option<Tlab> {
        debug_assert!(!self.is_mixed_tlab());
        let size = align_object_size(size);
        let start = self.alloc::<true>(size)?;
        let mut tlabs = self.tlabs.lock();
        #[cfg(feature = "extreme_assertions")]
        self.check_disjoint_tlab(&tlabs, &(start..start + size));
        tlabs.push(start..start + size);
        drop(tlabs);
        self.add_flag(RegionFlags::TLAB);
        Some(Tlab::from_range(start, size))
    }

    /// Hand the whole unallocated remainder of the region to one thread as a TLAB.
    pub fn create_mixed_tlab(&self) -> Option<Tlab> {
        let end = self.end();
        let start = self.top.swap(end, Ordering::AcqRel);
        if start >= end {
            return None;
        }
        self.tlabs.lock().push(start..end);
        self.add_flag(RegionFlags::MIXEDTLAB);
        Some(Tlab::from_range(start, end - start))
    }

    /// Give back the unused tail of a mixed TLAB so the region can be allocated into again.
    pub fn retire_mixed_tlab(&self, tlab: &Tlab) {
        debug_assert!(self.is_mixed_tlab());
        debug_assert!(tlab.limit() == self.end());
        debug_assert!(tlab.start() >= self.begin() && tlab.cursor() <= self.end());
        self.top.store(tlab.cursor(), Ordering::Release);
        let mut tlabs = self.tlabs.lock();
        if let Some(range) = tlabs.iter_mut().find(|r| r.start == tlab.start()) {
            range.end = tlab.cursor();
        }
        self.remove_flag(RegionFlags::MIXEDTLAB);
    }

    /// Walks every TLAB of the region, so it is only compiled in with `extreme_assertions`.
    #[cfg(feature = "extreme_assertions")]
    fn check_disjoint_tlab(&self, tlabs: &[Range<Address>], new: &Range<Address>) {
        assert!(new.start >= self.begin() && new.end <= self.end(), "{:?} outside {:?}", new, self);
        for existing in tlabs {
            assert!(
                Address::range_intersection(existing, new).is_empty(),
                "TLAB {:?} overlaps {:?} in {:?}",
                new,
                existing,
                self
            );
        }
    }

    /// Ranges handed out as TLABs since the region was (re)initialized.
    pub fn tlab_ranges(&self) -> Vec<Range<Address>> {
        self.tlabs.lock().clone()
    }

    /// Is `addr` inside the part of the region that has been handed out for allocation?
    pub fn is_in_alloc_range(&self, addr: Address) -> bool {
        addr >= self.begin() && addr < self.top()
    }

    /* Pinning */

    pub fn pin_object(&self) {
        self.pinned_objects.fetch_add(1, Ordering::AcqRel);
        self.add_flag(RegionFlags::PINNED);
    }

    pub fn unpin_object(&self) {
        let old = self.pinned_objects.fetch_sub(1, Ordering::AcqRel);
        assert!(old > 0, "unpin in region {} without pinned objects", self.begin());
        if old == 1 {
            self.remove_flag(RegionFlags::PINNED);
        }
    }

    pub fn has_pinned_objects(&self) -> bool {
        self.pinned_objects.load(Ordering::Acquire) > 0
    }

    /* Marking */

    /// Set the mark bit of an object. Returns true if this call marked it.
    pub fn mark_object(&self, object: ObjectReference) -> bool {
        self.mark_bitmap
            .read()
            .set::<true>(self.begin(), object.to_raw_address())
    }

    pub fn is_marked(&self, object: ObjectReference) -> bool {
        self.mark_bitmap.read().test(self.begin(), object.to_raw_address())
    }

    /// Was the object marked in the last completed cycle?
    pub fn is_live(&self, object: ObjectReference) -> bool {
        self.live_bitmap.read().test(self.begin(), object.to_raw_address())
    }

    /// Publish the marks of a completed cycle as the live bitmap and clear the marks.
    pub fn swap_mark_bitmap(&self) {
        let mark = self.mark_bitmap.read();
        self.live_bitmap.read().copy_from(&mark);
        mark.clear();
    }

    pub fn iterate_live_objects<F: FnMut(ObjectReference)>(&self, mut f: F) {
        self.iterate_live_objects_in(self.begin()..self.top(), &mut f);
    }

    /// Visit live objects whose start lies in `range`.
    pub fn iterate_live_objects_in<F: FnMut(ObjectReference)>(&self, range: Range<Address>, f: &mut F) {
        let begin = self.begin();
        let range = Address::range_intersection(&range, &(begin..self.top()));
        self.live_bitmap
            .read()
            .iterate_range(begin, range, |a| f(ObjectReference::from_raw_address(a)));
    }

    pub fn remset(&self) -> &RemSet<ReentrantLock> {
        &self.remset
    }
}

impl std::fmt::Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Region#{}[{}, {}) top={} {:?} live={}",
            self.index,
            self.begin(),
            self.end(),
            self.top(),
            self.flags(),
            self.get_live_bytes()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::constants::DEFAULT_REGION_SIZE;

    fn region() -> Region {
        let region = Region::new(0, DEFAULT_REGION_SIZE);
        let begin = unsafe { Address::from_usize(0x4000_0000) };
        region.init(0, RegionFlags::EDEN, begin, begin + DEFAULT_REGION_SIZE);
        region
    }

    #[test]
    fn flags_kind() {
        assert_eq!(RegionFlags::EDEN.kind(), Some(RegionKind::Eden));
        assert_eq!((RegionFlags::OLD | RegionFlags::PROMOTED).kind(), Some(RegionKind::Old));
        assert_eq!((RegionFlags::OLD | RegionFlags::EDEN).kind(), None);
        assert_eq!(RegionFlags::FREE.kind(), None);
        assert!((RegionFlags::SURVIVOR | RegionFlags::TLAB).is_young());
        assert_eq!(format!("{:?}", RegionFlags::OLD | RegionFlags::PINNED), "OLD|PINNED");
    }

    #[test]
    fn bump_allocation() {
        let r = region();
        assert_eq!(r.alloc::<true>(12), Some(r.begin()));
        assert_eq!(r.alloc::<false>(8), Some(r.begin() + 16usize));
        assert_eq!(r.get_allocated_bytes(), 24);
        assert_eq!(r.get_allocated_objects(), 2);
        assert_eq!(r.alloc::<true>(DEFAULT_REGION_SIZE), None);
        assert_eq!(r.alloc::<false>(DEFAULT_REGION_SIZE - 24), Some(r.begin() + 24usize));
        assert_eq!(r.top(), r.end());
        assert_eq!(r.alloc::<true>(8), None);
    }

    #[test]
    fn live_and_garbage_bytes() {
        let r = region();
        r.alloc::<true>(1024).unwrap();
        r.add_live_bytes::<true>(256);
        r.add_live_bytes::<false>(256);
        assert_eq!(r.get_live_bytes(), 512);
        assert_eq!(r.get_garbage_bytes(), 512);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn live_bytes_beyond_allocated_are_rejected_before_update() {
        let r = region();
        r.alloc::<true>(64).unwrap();
        for atomic in [true, false] {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                if atomic {
                    r.add_live_bytes::<true>(128);
                } else {
                    r.add_live_bytes::<false>(128);
                }
            }));
            assert!(result.is_err());
            assert_eq!(r.get_live_bytes(), 0);
        }
        r.add_live_bytes::<false>(64);
        assert_eq!(r.get_live_bytes(), 64);
    }

    #[test]
    fn concurrent_allocation() {
        let r = std::sync::Arc::new(region());
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let r = r.clone();
                std::thread::spawn(move || {
                    let mut got = vec![];
                    while let Some(a) = r.alloc::<true>(64) {
                        got.push(a);
                    }
                    got
                })
            })
            .collect();
        let mut all: Vec<Address> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), DEFAULT_REGION_SIZE / 64);
        assert_eq!(r.get_allocated_objects(), DEFAULT_REGION_SIZE / 64);
    }

    #[test]
    fn pinning() {
        let r = region();
        assert!(!r.has_pinned_objects());
        r.pin_object();
        r.pin_object();
        assert!(r.has_flag(RegionFlags::PINNED));
        r.unpin_object();
        assert!(r.has_pinned_objects());
        r.unpin_object();
        assert!(!r.has_pinned_objects());
        assert!(!r.has_flag(RegionFlags::PINNED));
    }

    #[test]
    fn mixed_tlab() {
        let r = region();
        r.alloc::<true>(1024).unwrap();
        let mut tlab = r.create_mixed_tlab().unwrap();
        assert!(r.is_mixed_tlab());
        assert_eq!(tlab.get_capacity(), DEFAULT_REGION_SIZE - 1024);
        assert!(r.create_mixed_tlab().is_none());
        let obj = tlab.alloc(64).unwrap();
        assert!(r.is_in_alloc_range(obj));
        assert!(r.is_in_alloc_range(r.end() - 8usize));
        r.retire_mixed_tlab(&tlab);
        assert!(!r.is_mixed_tlab());
        assert_eq!(r.top(), obj + 64usize);
        assert!(!r.is_in_alloc_range(obj + 64usize));
        assert_eq!(r.tlab_ranges(), vec![obj..obj + 64usize]);
    }

    #[test]
    fn tlab_carving() {
        let r = region();
        let tlab = r.create_tlab(4000).unwrap();
        assert_eq!(tlab.get_capacity(), 4000);
        assert!(r.has_flag(RegionFlags::TLAB));
        assert_eq!(r.get_allocated_bytes(), 4000);
    }

    #[test]
    fn marking() {
        let r = region();
        let a = ObjectReference::from_raw_address(r.alloc::<true>(32).unwrap());
        let b = ObjectReference::from_raw_address(r.alloc::<true>(32).unwrap());
        assert!(r.mark_object(b));
        assert!(!r.mark_object(b));
        assert!(r.is_marked(b) && !r.is_marked(a));
        r.swap_mark_bitmap();
        assert!(!r.is_marked(b));
        assert!(r.is_live(b));
        let mut live = vec![];
        r.iterate_live_objects(|o| live.push(o));
        assert_eq!(live, vec![b]);
    }
}
