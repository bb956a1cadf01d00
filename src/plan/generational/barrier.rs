//! Generational barriers: SATB pre barrier plus an unconditional card-marking post barrier.

use crate::plan::barriers::*;
use crate::policy::region::{CardState, CardTable};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::options::Options;
use crate::util::ObjectReference;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Value the post barrier stores into the card of a written object.
pub const DIRTY_CARD_VALUE: u8 = CardState::Marked as u8;

pub struct GenBarrierSet {
    card_table: Arc<CardTable>,
    satb_queue: Arc<SatbQueue>,
    options: Options,
    entrypoints: Option<BarrierEntrypoints>,
}

impl GenBarrierSet {
    pub fn new(card_table: Arc<CardTable>, options: &Options) -> Self {
        GenBarrierSet {
            card_table,
            satb_queue: Arc::new(SatbQueue::new()),
            options: options.clone(),
            entrypoints: None,
        }
    }

    /// Publish runtime slow paths through [`BarrierSet::get_barrier_operand`].
    pub fn with_entrypoints(mut self, entrypoints: BarrierEntrypoints) -> Self {
        self.entrypoints = Some(entrypoints);
        self
    }

    pub fn card_table(&self) -> &Arc<CardTable> {
        &self.card_table
    }

    pub fn satb_queue(&self) -> &Arc<SatbQueue> {
        &self.satb_queue
    }
}

impl BarrierSet for GenBarrierSet {
    fn pre_type(&self) -> BarrierType {
        BarrierType::PreSatbBarrier
    }

    fn post_type(&self) -> BarrierType {
        BarrierType::PostIntergenerationalBarrier
    }

    fn create_thread_state(&self) -> BarrierThreadState {
        satb_thread_state(&self.options, &self.satb_queue)
    }

    #[inline(always)]
    fn pre_barrier(&self, thread: &mut BarrierThreadState, pre_val: ObjectReference) {
        thread.satb_enqueue(pre_val);
    }

    #[inline(always)]
    fn post_barrier(
        &self,
        _thread: &mut BarrierThreadState,
        obj: ObjectReference,
        _offset: usize,
        _stored: ObjectReference,
    ) {
        if let Some(card) = self.card_table.card_of(obj.to_raw_address()) {
            card.store(DIRTY_CARD_VALUE, Ordering::Relaxed);
        }
    }

    fn post_barrier_array(
        &self,
        _thread: &mut BarrierThreadState,
        obj: ObjectReference,
        offset: usize,
        count: usize,
    ) {
        let start = obj.to_raw_address() + offset;
        let end = start + count * BYTES_IN_WORD;
        for index in self.card_table.card_indices(start..end) {
            self.card_table.set(index, CardState::Marked);
        }
    }

    fn get_barrier_operand(&self, name: BarrierOperandName) -> Option<BarrierOperand> {
        let layout = self.card_table.layout();
        match name {
            BarrierOperandName::MinAddr => Some(address_operand(layout.min_heap_addr)),
            BarrierOperandName::CardTableAddr => Some(u8_address_operand(self.card_table.base())),
            BarrierOperandName::CardBits => Some(u8_operand(layout.log_card_size as u8)),
            BarrierOperandName::DirtyVal => Some(u8_operand(DIRTY_CARD_VALUE)),
            BarrierOperandName::PreWrbEntrypoint => pre_entrypoint_operand(self.entrypoints.as_ref()),
            BarrierOperandName::RegionSizeBits | BarrierOperandName::UpdateCard => None,
        }
    }
}
