use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;
use std::ops::Range;

/// The heap geometry shared by the region pool, card table and barrier sets.
///
/// This replaces process-wide statics (card table base, heap bounds): every component
/// that needs the geometry is constructed with a `HeapLayout`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapLayout {
    /// Lowest heap address covered by the card table.
    pub min_heap_addr: Address,
    /// One past the highest heap address covered by the card table.
    pub max_heap_addr: Address,
    /// log2 of the region size.
    pub log_region_size: usize,
    /// log2 of the number of bytes covered by a card.
    pub log_card_size: usize,
}

impl HeapLayout {
    pub fn new(heap: Range<Address>, region_size: usize, card_size: usize) -> Self {
        assert!(region_size.is_power_of_two(), "region size {} must be a power of two", region_size);
        assert!(card_size.is_power_of_two(), "card size {} must be a power of two", card_size);
        assert!(card_size <= region_size);
        assert!(heap.start <= heap.end);
        HeapLayout {
            min_heap_addr: heap.start,
            max_heap_addr: heap.end,
            log_region_size: conversions::log2(region_size),
            log_card_size: conversions::log2(card_size),
        }
    }

    /// A layout with the default region and card sizes.
    pub fn with_defaults(heap: Range<Address>) -> Self {
        Self::new(heap, DEFAULT_REGION_SIZE, BYTES_IN_CARD)
    }

    pub const fn region_size(&self) -> usize {
        1 << self.log_region_size
    }

    pub const fn card_size(&self) -> usize {
        1 << self.log_card_size
    }

    pub const fn cards_in_region(&self) -> usize {
        1 << (self.log_region_size - self.log_card_size)
    }

    pub fn heap_size(&self) -> usize {
        self.max_heap_addr - self.min_heap_addr
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.min_heap_addr && addr < self.max_heap_addr
    }

    /// Align an address down to its region boundary.
    pub fn region_align(&self, addr: Address) -> Address {
        addr.align_down(self.region_size())
    }

    /// Are the two addresses in the same (regular-sized) region?
    pub fn same_region(&self, a: Address, b: Address) -> bool {
        (a ^ b) >> self.log_region_size == 0
    }

    /// The card index of a heap address.
    pub fn card_index(&self, addr: Address) -> usize {
        (addr - self.min_heap_addr) >> self.log_card_size
    }

    /// The first heap address covered by a card.
    pub fn card_start(&self, index: usize) -> Address {
        self.min_heap_addr + (index << self.log_card_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> HeapLayout {
        unsafe {
            HeapLayout::new(
                Address::from_usize(0x1000)..Address::from_usize(0x10_1000),
                DEFAULT_REGION_SIZE,
                BYTES_IN_CARD,
            )
        }
    }

    #[test]
    fn card_index_subtracts_min_and_shifts() {
        let layout = layout();
        assert_eq!(layout.card_index(unsafe { Address::from_usize(0x1200) }), 1);
        assert_eq!(layout.card_index(unsafe { Address::from_usize(0x11ff) }), 0);
        assert_eq!(layout.card_start(1), unsafe { Address::from_usize(0x1200) });
    }

    #[test]
    fn geometry() {
        let layout = layout();
        assert_eq!(layout.region_size(), 256 * 1024);
        assert_eq!(layout.cards_in_region(), 512);
        assert_eq!(layout.heap_size(), 0x10_0000);
    }

    #[test]
    #[should_panic]
    fn non_power_of_two_region_size() {
        HeapLayout::new(Address::ZERO..Address::ZERO, 3 << 16, BYTES_IN_CARD);
    }
}
