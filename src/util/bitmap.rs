//! Bitmaps used by regions and remembered sets.
//!
//! [`ObjectBitmap`] has one bit per allocation granule of a region and is shared between
//! concurrent markers, so every word is atomic. [`RangeBitmap`] is a small fixed-size
//! bitmap with one bit per sub-range of a region; it is only accessed under the owning
//! remembered set's lock.

use crate::util::constants::*;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One bit per `DEFAULT_ALIGNMENT` bytes of a region.
pub struct ObjectBitmap {
    words: Box<[AtomicUsize]>,
}

impl ObjectBitmap {
    pub fn new(covered_bytes: usize) -> Self {
        let bits = covered_bytes >> LOG_DEFAULT_ALIGNMENT;
        let words = bits.div_ceil(BITS_IN_WORD);
        ObjectBitmap {
            words: (0..words).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Number of bytes this bitmap has bits for.
    pub fn covered_bytes(&self) -> usize {
        (self.words.len() * BITS_IN_WORD) << LOG_DEFAULT_ALIGNMENT
    }

    fn bit_index(base: Address, addr: Address) -> usize {
        debug_assert!(addr.is_aligned_to(DEFAULT_ALIGNMENT), "{} is not aligned", addr);
        (addr - base) >> LOG_DEFAULT_ALIGNMENT
    }

    fn word_and_mask(&self, base: Address, addr: Address) -> (&AtomicUsize, usize) {
        let index = Self::bit_index(base, addr);
        debug_assert!(
            index < self.words.len() * BITS_IN_WORD,
            "{} is out of bitmap range (base {})",
            addr,
            base
        );
        (&self.words[index >> LOG_BITS_IN_WORD], 1 << (index & (BITS_IN_WORD - 1)))
    }

    /// Set the bit for `addr`. Returns true if the bit was previously clear.
    pub fn set<const ATOMIC: bool>(&self, base: Address, addr: Address) -> bool {
        let (word, mask) = self.word_and_mask(base, addr);
        let old = if ATOMIC {
            word.fetch_or(mask, Ordering::SeqCst)
        } else {
            let old = word.load(Ordering::Relaxed);
            word.store(old | mask, Ordering::Relaxed);
            old
        };
        old & mask == 0
    }

    pub fn clear_bit(&self, base: Address, addr: Address) {
        let (word, mask) = self.word_and_mask(base, addr);
        word.fetch_and(!mask, Ordering::SeqCst);
    }

    pub fn test(&self, base: Address, addr: Address) -> bool {
        let (word, mask) = self.word_and_mask(base, addr);
        word.load(Ordering::Relaxed) & mask != 0
    }

    pub fn clear(&self) {
        for word in self.words.iter() {
            word.store(0, Ordering::Relaxed);
        }
    }

    /// Copy every bit from `other`. Both bitmaps must cover the same number of bytes.
    pub fn copy_from(&self, other: &ObjectBitmap) {
        debug_assert_eq!(self.words.len(), other.words.len());
        for (dst, src) in self.words.iter().zip(other.words.iter()) {
            dst.store(src.load(Ordering::Relaxed), Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|w| w.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Call `f` for the address of every set bit in `range`, in address order.
    pub fn iterate_range<F: FnMut(Address)>(&self, base: Address, range: Range<Address>, mut f: F) {
        if range.start >= range.end {
            return;
        }
        let first = Self::bit_index(base, range.start.align_up(DEFAULT_ALIGNMENT));
        let last = (range.end - base).div_ceil(DEFAULT_ALIGNMENT);
        let last = last.min(self.words.len() * BITS_IN_WORD);
        let mut index = first;
        while index < last {
            let word_index = index >> LOG_BITS_IN_WORD;
            let shift = index & (BITS_IN_WORD - 1);
            let mut word = self.words[word_index].load(Ordering::Relaxed) >> shift;
            if word == 0 {
                index = (word_index + 1) << LOG_BITS_IN_WORD;
                continue;
            }
            while word != 0 {
                let bit = index + word.trailing_zeros() as usize;
                if bit >= last {
                    return;
                }
                f(base + (bit << LOG_DEFAULT_ALIGNMENT));
                word &= word - 1;
            }
            index = (word_index + 1) << LOG_BITS_IN_WORD;
        }
    }
}

impl std::fmt::Debug for ObjectBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ObjectBitmap({} set)", self.count())
    }
}

/// Number of sub-ranges a remembered-set bitmap splits a region into.
pub const RANGE_BITMAP_BITS: usize = 512;
const RANGE_BITMAP_WORDS: usize = RANGE_BITMAP_BITS / BITS_IN_WORD;

static_assertions::const_assert!(RANGE_BITMAP_BITS.is_power_of_two());

/// A fixed-size bitmap with one bit per sub-range of a region.
#[derive(Clone, PartialEq, Eq)]
pub struct RangeBitmap {
    words: [usize; RANGE_BITMAP_WORDS],
}

impl Default for RangeBitmap {
    fn default() -> Self {
        RangeBitmap {
            words: [0; RANGE_BITMAP_WORDS],
        }
    }
}

impl RangeBitmap {
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < RANGE_BITMAP_BITS);
        self.words[index >> LOG_BITS_IN_WORD] |= 1 << (index & (BITS_IN_WORD - 1));
    }

    pub fn test(&self, index: usize) -> bool {
        debug_assert!(index < RANGE_BITMAP_BITS);
        self.words[index >> LOG_BITS_IN_WORD] & (1 << (index & (BITS_IN_WORD - 1))) != 0
    }

    pub fn or(&mut self, other: &RangeBitmap) {
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= *src;
        }
    }

    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Indices of all set bits, ascending.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut word = w;
            std::iter::from_fn(move || {
                if word == 0 {
                    None
                } else {
                    let bit = word.trailing_zeros() as usize;
                    word &= word - 1;
                    Some((i << LOG_BITS_IN_WORD) + bit)
                }
            })
        })
    }
}

impl std::fmt::Debug for RangeBitmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Address {
        unsafe { Address::from_usize(0x10_0000) }
    }

    #[test]
    fn object_bitmap_set_test_clear() {
        let bitmap = ObjectBitmap::new(DEFAULT_REGION_SIZE);
        let a = base() + 64usize;
        assert!(!bitmap.test(base(), a));
        assert!(bitmap.set::<true>(base(), a));
        assert!(!bitmap.set::<false>(base(), a));
        assert!(bitmap.test(base(), a));
        assert_eq!(bitmap.count(), 1);
        bitmap.clear_bit(base(), a);
        assert!(!bitmap.test(base(), a));
        bitmap.set::<true>(base(), a);
        bitmap.clear();
        assert_eq!(bitmap.count(), 0);
    }

    #[test]
    fn object_bitmap_iterate_range() {
        let bitmap = ObjectBitmap::new(DEFAULT_REGION_SIZE);
        let offsets = [0usize, 8, 512, 520, 4096, DEFAULT_REGION_SIZE - 8];
        for o in offsets {
            bitmap.set::<true>(base(), base() + o);
        }
        let mut seen = vec![];
        bitmap.iterate_range(base(), base()..base() + DEFAULT_REGION_SIZE, |a| {
            seen.push(a - base())
        });
        assert_eq!(seen, offsets);

        let mut seen = vec![];
        bitmap.iterate_range(base(), base() + 512usize..base() + 1024usize, |a| {
            seen.push(a - base())
        });
        assert_eq!(seen, vec![512, 520]);
    }

    #[test]
    fn object_bitmap_copy() {
        let a = ObjectBitmap::new(DEFAULT_REGION_SIZE);
        let b = ObjectBitmap::new(DEFAULT_REGION_SIZE);
        a.set::<true>(base(), base() + 16usize);
        b.copy_from(&a);
        assert!(b.test(base(), base() + 16usize));
    }

    #[test]
    fn range_bitmap_ops() {
        let mut a = RangeBitmap::default();
        let mut b = RangeBitmap::default();
        assert!(a.is_empty());
        a.set(0);
        a.set(63);
        b.set(64);
        b.set(RANGE_BITMAP_BITS - 1);
        a.or(&b);
        assert_eq!(a.count(), 4);
        assert!(a.test(64));
        assert_eq!(
            a.iter_set().collect::<Vec<_>>(),
            vec![0, 63, 64, RANGE_BITMAP_BITS - 1]
        );
    }
}
