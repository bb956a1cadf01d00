use crate::util::heap::HeapLayout;
use crate::util::Address;
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};

/// Card values used by the G1 post barrier.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CardState {
    Clear = 0,
    Marked = 1,
    Young = 2,
    Processed = 3,
}

impl CardState {
    fn from_u8(v: u8) -> CardState {
        match v {
            0 => CardState::Clear,
            1 => CardState::Marked,
            2 => CardState::Young,
            3 => CardState::Processed,
            _ => unreachable!("invalid card value {}", v),
        }
    }
}

/// One byte per card over `[min_heap_addr, max_heap_addr)` of a [`HeapLayout`].
///
/// Barriers read and write the bytes directly through [`CardTable::base`]; the
/// collector-side accessors below use the same relaxed atomic byte operations.
pub struct CardTable {
    layout: HeapLayout,
    cards: Box<[AtomicU8]>,
}

impl CardTable {
    pub fn new(layout: HeapLayout) -> Self {
        let num_cards = layout.heap_size().div_ceil(layout.card_size());
        debug!("card table: {} cards over {:?}", num_cards, layout);
        CardTable {
            layout,
            cards: (0..num_cards).map(|_| AtomicU8::new(CardState::Clear as u8)).collect(),
        }
    }

    pub fn layout(&self) -> &HeapLayout {
        &self.layout
    }

    /// Address of the first card byte.
    pub fn base(&self) -> Address {
        Address::from_ptr(self.cards.as_ptr())
    }

    pub fn num_cards(&self) -> usize {
        self.cards.len()
    }

    /// The card byte for a heap address, or `None` if the address is not covered.
    #[inline(always)]
    pub fn card_of(&self, addr: Address) -> Option<&AtomicU8> {
        if !self.layout.contains(addr) {
            return None;
        }
        self.cards.get(self.layout.card_index(addr))
    }

    pub fn card_index(&self, addr: Address) -> usize {
        self.layout.card_index(addr)
    }

    pub fn card_start(&self, index: usize) -> Address {
        self.layout.card_start(index)
    }

    pub fn get_raw(&self, index: usize) -> u8 {
        self.cards[index].load(Ordering::Relaxed)
    }

    pub fn get(&self, index: usize) -> CardState {
        CardState::from_u8(self.get_raw(index))
    }

    pub fn set(&self, index: usize, state: CardState) {
        self.cards[index].store(state as u8, Ordering::Relaxed);
    }

    /// Move card `index` from `current` to `new`. Returns false if it was not in `current`.
    pub fn compare_exchange(&self, index: usize, current: CardState, new: CardState) -> bool {
        self.cards[index]
            .compare_exchange(current as u8, new as u8, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }

    pub fn get_card(&self, addr: Address) -> Option<CardState> {
        self.card_of(addr)
            .map(|c| CardState::from_u8(c.load(Ordering::Relaxed)))
    }

    /// Card indices covering `range`, clipped to the table.
    pub fn card_indices(&self, range: Range<Address>) -> Range<usize> {
        let range = Address::range_intersection(
            &range,
            &(self.layout.min_heap_addr..self.layout.max_heap_addr),
        );
        if range.start >= range.end {
            return 0..0;
        }
        let first = self.layout.card_index(range.start);
        let last = self.layout.card_index(range.end - 1usize);
        first..last + 1
    }

    /// Mark every card of a newly allocated young region, so that the post barrier
    /// skips stores into young objects.
    pub fn mark_cards_as_young(&self, range: Range<Address>) {
        for i in self.card_indices(range) {
            self.set(i, CardState::Young);
        }
    }

    /// Clear every card in `range`, e.g. after the region was promoted or freed.
    pub fn clear_cards(&self, range: Range<Address>) {
        for i in self.card_indices(range) {
            self.set(i, CardState::Clear);
        }
    }

    /// Turn every `Processed` card back to `Clear` once refinement has finished.
    pub fn clear_processed(&self) {
        for card in self.cards.iter() {
            let _ = card.compare_exchange(
                CardState::Processed as u8,
                CardState::Clear as u8,
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }

    /// Visit the index of every card in state `Marked`.
    pub fn for_each_marked<F: FnMut(usize)>(&self, mut f: F) {
        for (i, card) in self.cards.iter().enumerate() {
            if card.load(Ordering::Relaxed) == CardState::Marked as u8 {
                f(i);
            }
        }
    }
}

impl std::fmt::Debug for CardTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CardTable({} cards at {})", self.num_cards(), self.base())
    }
}
