//! G1 barriers: SATB pre barrier plus a cross-region card-marking post barrier that
//! enqueues dirty cards for refinement.

use crate::plan::barriers::*;
use crate::policy::region::{CardState, CardTable};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::options::Options;
use crate::util::ObjectReference;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

pub struct G1BarrierSet {
    card_table: Arc<CardTable>,
    satb_queue: Arc<SatbQueue>,
    options: Options,
    /// Card queues of registered mutators. The collector is the single consumer of
    /// each and only drains them while holding this lock.
    thread_queues: spin::Mutex<Vec<Arc<CardQueue>>>,
    /// Cards that did not fit a thread queue.
    overflow: parking_lot::Mutex<Vec<usize>>,
    entrypoints: Option<BarrierEntrypoints>,
}

impl G1BarrierSet {
    pub fn new(card_table: Arc<CardTable>, options: &Options) -> Self {
        G1BarrierSet {
            card_table,
            satb_queue: Arc::new(SatbQueue::new()),
            options: options.clone(),
            thread_queues: spin::Mutex::new(vec![]),
            overflow: parking_lot::Mutex::new(vec![]),
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

    /// Give `thread` its own card queue and remember it for draining.
    pub fn register_thread(&self, thread: &mut BarrierThreadState) {
        if thread.card_queue.is_some() {
            return;
        }
        let queue = Arc::new(CardQueue::new());
        self.thread_queues.lock().push(queue.clone());
        thread.card_queue = Some(queue);
    }

    pub fn registered_threads(&self) -> usize {
        self.thread_queues.lock().len()
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.lock().len()
    }

    #[cold]
    fn enqueue(&self, thread: &BarrierThreadState, mut card: usize) {
        if let Some(queue) = &thread.card_queue {
            for _ in 0..self.options.g1_card_enqueue_tries {
                match queue.try_push(card) {
                    Ok(()) => return,
                    Err(c) => card = c,
                }
            }
        }
        trace!("card {} goes to the overflow queue", card);
        self.overflow.lock().push(card);
    }

    /// Mark a card that is neither young nor already marked, and enqueue it.
    /// Callers must have issued the StoreLoad fence.
    #[inline(always)]
    fn mark_and_enqueue(&self, thread: &BarrierThreadState, index: usize) {
        let state = self.card_table.get(index);
        if state != CardState::Young && state != CardState::Marked {
            self.card_table.set(index, CardState::Marked);
            self.enqueue(thread, index);
        }
    }

    /// Pop every queued dirty card, from the thread queues and then the overflow queue.
    /// Each card that is still marked moves to `Processed` and is passed to `visitor`.
    /// Queues of threads that had gone away when draining started are dropped after
    /// their final drain. Returns the number
    /// of cards visited.
    pub fn drain_dirty_cards<F: FnMut(usize)>(&self, mut visitor: F) -> usize {
        let mut visited = 0;
        let mut visit = |card: usize| {
            if self.card_table.compare_exchange(card, CardState::Marked, CardState::Processed) {
                visited += 1;
                visitor(card);
            }
        };
        {
            let mut queues = self.thread_queues.lock();
            queues.retain(|queue| {
                // A queue we hold the only reference to has no producer left. Its last
                // pushes happen before the thread state was dropped, so draining it after
                // this check sees all of them.
                let exited = Arc::strong_count(queue) == 1;
                if exited {
                    fence(Ordering::Acquire);
                }
                while let Some(card) = queue.try_pop() {
                    visit(card);
                }
                !exited
            });
        }
        let overflow = std::mem::take(&mut *self.overflow.lock());
        for card in overflow {
            visit(card);
        }
        debug!("drained {} dirty cards", visited);
        visited
    }
}

impl BarrierSet for G1BarrierSet {
    fn pre_type(&self) -> BarrierType {
        BarrierType::PreSatbBarrier
    }

    fn post_type(&self) -> BarrierType {
        BarrierType::PostInterregionBarrier
    }

    fn create_thread_state(&self) -> BarrierThreadState {
        let mut state = satb_thread_state(&self.options, &self.satb_queue);
        self.register_thread(&mut state);
        state
    }

    #[inline(always)]
    fn pre_barrier(&self, thread: &mut BarrierThreadState, pre_val: ObjectReference) {
        thread.satb_enqueue(pre_val);
    }

    #[inline(always)]
    fn post_barrier(
        &self,
        thread: &mut BarrierThreadState,
        obj: ObjectReference,
        _offset: usize,
        stored: ObjectReference,
    ) {
        if stored.is_null() {
            return;
        }
        let addr = obj.to_raw_address();
        let layout = self.card_table.layout();
        if layout.same_region(addr, stored.to_raw_address()) {
            return;
        }
        let Some(card) = self.card_table.card_of(addr) else {
            return;
        };
        if card.load(Ordering::Relaxed) == CardState::Young as u8 {
            return;
        }
        fence(Ordering::SeqCst);
        if card.load(Ordering::Relaxed) != CardState::Marked as u8 {
            card.store(CardState::Marked as u8, Ordering::Relaxed);
            self.enqueue(thread, layout.card_index(addr));
        }
    }

    fn post_barrier_array(
        &self,
        thread: &mut BarrierThreadState,
        obj: ObjectReference,
        offset: usize,
        count: usize,
    ) {
        let start = obj.to_raw_address() + offset;
        let end = start + count * BYTES_IN_WORD;
        let cards = self.card_table.card_indices(start..end);
        if cards.is_empty() {
            return;
        }
        fence(Ordering::SeqCst);
        for index in cards {
            self.mark_and_enqueue(thread, index);
        }
    }

    fn get_barrier_operand(&self, name: BarrierOperandName) -> Option<BarrierOperand> {
        let layout = self.card_table.layout();
        match name {
            BarrierOperandName::MinAddr => Some(address_operand(layout.min_heap_addr)),
            BarrierOperandName::CardTableAddr => Some(u8_address_operand(self.card_table.base())),
            BarrierOperandName::CardBits => Some(u8_operand(layout.log_card_size as u8)),
            BarrierOperandName::DirtyVal => Some(u8_operand(CardState::Marked as u8)),
            BarrierOperandName::RegionSizeBits => Some(u8_operand(layout.log_region_size as u8)),
            BarrierOperandName::PreWrbEntrypoint => pre_entrypoint_operand(self.entrypoints.as_ref()),
            BarrierOperandName::UpdateCard => update_card_operand(self.entrypoints.as_ref()),
        }
    }
}
