use crate::util::alloc::WeightedAdaptiveTlabAverage;
use crate::util::conversions::align_object_size;
use crate::util::options::Options;
use crate::util::Address;

/// A thread-local allocation buffer: a `[start, limit)` range owned by one mutator thread
/// and bump-allocated without synchronization.
///
/// A TLAB is either carved out of a shared region by [`Region::create_tlab`], or covers
/// the remainder of a whole region handed to one thread by [`Region::create_mixed_tlab`].
///
/// [`Region::create_tlab`]: crate::policy::region::Region::create_tlab
/// [`Region::create_mixed_tlab`]: crate::policy::region::Region::create_mixed_tlab
#[derive(Debug, PartialEq, Eq)]
pub struct Tlab {
    start: Address,
    cursor: Address,
    limit: Address,
}

impl Default for Tlab {
    fn default() -> Self {
        Tlab::new()
    }
}

impl Tlab {
    /// An empty TLAB. Every allocation fails until it is filled.
    pub const fn new() -> Self {
        Tlab {
            start: Address::ZERO,
            cursor: Address::ZERO,
            limit: Address::ZERO,
        }
    }

    pub fn from_range(start: Address, size: usize) -> Self {
        let mut tlab = Tlab::new();
        tlab.fill(start, size);
        tlab
    }

    /// Point the TLAB at a fresh `[start, start + size)` buffer.
    pub fn fill(&mut self, start: Address, size: usize) {
        self.start = start;
        self.cursor = start;
        self.limit = start + size;
    }

    pub fn reset(&mut self) {
        self.start = Address::ZERO;
        self.cursor = Address::ZERO;
        self.limit = Address::ZERO;
    }

    /// Bump-allocate `size` bytes, rounded up to the allocation granule.
    /// Returns `None` if the buffer does not have room or was never filled.
    #[inline(always)]
    pub fn alloc(&mut self, size: usize) -> Option<Address> {
        let size = align_object_size(size);
        if self.is_empty() || size > self.limit - self.cursor {
            trace!("TLAB used up: request {} with {} free", size, self.get_free_size());
            return None;
        }
        let result = self.cursor;
        self.cursor = result + size;
        Some(result)
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn cursor(&self) -> Address {
        self.cursor
    }

    pub fn limit(&self) -> Address {
        self.limit
    }

    pub fn get_occupied_size(&self) -> usize {
        self.cursor - self.start
    }

    pub fn get_free_size(&self) -> usize {
        self.limit - self.cursor
    }

    pub fn get_capacity(&self) -> usize {
        self.limit - self.start
    }

    /// Is `addr` inside the allocated part of this TLAB?
    pub fn contains_address(&self, addr: Address) -> bool {
        addr >= self.start && addr < self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.get_capacity() == 0
    }
}

/// Slow-path sizing for TLAB refills.
///
/// A thread whose TLAB is used up retires it (recording its fill as a sample for the
/// adaptive average) and asks for a new one sized by the current average.
pub struct TlabPolicy {
    average: WeightedAdaptiveTlabAverage,
    max_tlab_alloc_size: usize,
}

impl TlabPolicy {
    pub fn new(options: &Options) -> Self {
        TlabPolicy {
            average: WeightedAdaptiveTlabAverage::from_options(options),
            max_tlab_alloc_size: options.max_tlab_alloc_size,
        }
    }

    pub fn average(&self) -> &WeightedAdaptiveTlabAverage {
        &self.average
    }

    /// The size of the TLAB to create for a failed `request`, or `None` if the request
    /// is too large for a TLAB and should be allocated directly in a region.
    pub fn refill_size(&self, request: usize) -> Option<usize> {
        Self::refill_size_for(&self.average, request, self.max_tlab_alloc_size)
    }

    pub fn refill_size_for(
        average: &WeightedAdaptiveTlabAverage,
        request: usize,
        max_tlab_alloc_size: usize,
    ) -> Option<usize> {
        if request > max_tlab_alloc_size {
            return None;
        }
        let target = average.get_last_counted_sum_in_size_t();
        Some(align_object_size(target.max(request)))
    }

    /// Record the fill of a TLAB that is being replaced and clear it.
    pub fn retire(&self, tlab: &mut Tlab) {
        if !tlab.is_empty() {
            self.average
                .store_new_sample(tlab.get_occupied_size(), tlab.get_capacity());
        }
        tlab.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn base() -> Address {
        unsafe { Address::from_usize(0x20_0000) }
    }

    #[test]
    fn empty_tlab_fails() {
        let mut tlab = Tlab::new();
        assert!(tlab.alloc(8).is_none());
        assert!(tlab.alloc(0).is_none());
        let mut reset = Tlab::from_range(base(), 64);
        reset.reset();
        assert!(reset.alloc(0).is_none());
    }

    #[test]
    fn alloc_until_full() {
        let mut tlab = Tlab::from_range(base(), 64);
        assert_eq!(tlab.alloc(20), Some(base()));
        assert_eq!(tlab.alloc(8), Some(base() + 24usize));
        assert_eq!(tlab.get_occupied_size(), 32);
        assert_eq!(tlab.alloc(40), None);
        assert_eq!(tlab.get_occupied_size(), 32);
        assert_eq!(tlab.alloc(32), Some(base() + 32usize));
        assert_eq!(tlab.get_free_size(), 0);
        assert!(tlab.contains_address(base() + 63usize));
        assert!(!tlab.contains_address(base() + 64usize));
    }

    #[test]
    fn random_allocation_sequence() {
        const CAPACITY: usize = 4096;
        let mut rng = rand::rng();
        for _ in 0..50 {
            let mut tlab = Tlab::from_range(base(), CAPACITY);
            let mut running = 0;
            loop {
                let size = rng.random_range(1..256);
                let aligned = align_object_size(size);
                match tlab.alloc(size) {
                    Some(addr) => {
                        assert_eq!(addr, base() + running);
                        running += aligned;
                        assert!(running <= CAPACITY);
                    }
                    None => {
                        assert!(running + aligned > CAPACITY);
                        break;
                    }
                }
            }
            assert_eq!(tlab.get_occupied_size(), running);
            assert!(tlab.start() <= tlab.cursor() && tlab.cursor() <= tlab.limit());
        }
    }

    #[test]
    fn reset_clears() {
        let mut tlab = Tlab::from_range(base(), 64);
        tlab.alloc(8);
        tlab.reset();
        assert_eq!(tlab, Tlab::new());
    }

    #[test]
    fn refill_size() {
        let average = WeightedAdaptiveTlabAverage::new(4096, 32768, 2.0, 0.35, 0.9);
        assert_eq!(TlabPolicy::refill_size_for(&average, 100, 8192), Some(4096));
        assert_eq!(TlabPolicy::refill_size_for(&average, 6001, 8192), Some(6008));
        assert_eq!(TlabPolicy::refill_size_for(&average, 8193, 8192), None);
    }

    #[test]
    fn retire_records_sample() {
        let options = Options::builtin();
        let policy = TlabPolicy::new(&options);
        let mut tlab = Tlab::from_range(base(), 1024);
        tlab.alloc(512);
        policy.retire(&mut tlab);
        assert!(tlab.is_empty());
        assert_eq!(policy.average().sample_count(), 1);
        // an empty TLAB records nothing
        policy.retire(&mut tlab);
        assert_eq!(policy.average().sample_count(), 1);
    }
}
