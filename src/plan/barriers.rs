//! Write barriers: the hooks a mutator runs around every reference store.

mod barrier_type;

pub use self::barrier_type::*;

use crate::util::options::Options;
use crate::util::queue::LockFreeBuffer;
use crate::util::{Address, ObjectReference};
use downcast_rs::{impl_downcast, DowncastSync};
use std::sync::Arc;

/// Capacity of a thread-local dirty card queue.
pub const CARD_QUEUE_CAPACITY: usize = 256;

/// Single-producer single-consumer queue of dirty card indices. The mutator that owns
/// it pushes; the collector drains.
pub type CardQueue = LockFreeBuffer<usize, CARD_QUEUE_CAPACITY>;

/// SATB buffers flushed by mutators, waiting for the marker.
#[derive(Default)]
pub struct SatbQueue {
    buffers: spin::Mutex<Vec<Vec<ObjectReference>>>,
}

impl SatbQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_buffer(&self, buffer: Vec<ObjectReference>) {
        if !buffer.is_empty() {
            self.buffers.lock().push(buffer);
        }
    }

    /// Take every recorded object, in flush order.
    pub fn drain(&self) -> Vec<ObjectReference> {
        let buffers = std::mem::take(&mut *self.buffers.lock());
        buffers.into_iter().flatten().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }
}

/// Per-mutator barrier state. Every barrier call receives the state of the thread
/// doing the store.
pub struct BarrierThreadState {
    pre_wrb_entrypoint: Option<PreWriteBarrierFn>,
    satb: Vec<ObjectReference>,
    satb_capacity: usize,
    satb_queue: Option<Arc<SatbQueue>>,
    pub(crate) card_queue: Option<Arc<CardQueue>>,
}

impl BarrierThreadState {
    pub fn new(satb_capacity: usize, satb_queue: Option<Arc<SatbQueue>>) -> Self {
        assert!(satb_capacity > 0);
        BarrierThreadState {
            pre_wrb_entrypoint: None,
            satb: Vec::with_capacity(satb_capacity),
            satb_capacity,
            satb_queue,
            card_queue: None,
        }
    }

    /// State for a barrier set that records nothing.
    pub fn detached() -> Self {
        Self::new(1, None)
    }

    /// Turn on the SATB pre barrier for this thread at the start of marking.
    pub fn enable_pre_barrier(&mut self, entrypoint: PreWriteBarrierFn) {
        self.pre_wrb_entrypoint = Some(entrypoint);
    }

    /// Turn off the SATB pre barrier and hand over whatever is buffered.
    pub fn disable_pre_barrier(&mut self) {
        self.pre_wrb_entrypoint = None;
        self.flush_satb();
    }

    pub fn pre_wrb_entrypoint(&self) -> Option<PreWriteBarrierFn> {
        self.pre_wrb_entrypoint
    }

    pub fn is_marking_active(&self) -> bool {
        self.pre_wrb_entrypoint.is_some()
    }

    pub fn satb_buffer(&self) -> &[ObjectReference] {
        &self.satb
    }

    pub fn card_queue(&self) -> Option<&Arc<CardQueue>> {
        self.card_queue.as_ref()
    }

    /// Record an overwritten reference while marking is active.
    #[inline(always)]
    pub(crate) fn satb_enqueue(&mut self, pre_val: ObjectReference) {
        if !self.is_marking_active() || pre_val.is_null() {
            return;
        }
        self.satb.push(pre_val);
        if self.satb.len() >= self.satb_capacity {
            self.flush_satb();
        }
    }

    #[cold]
    pub fn flush_satb(&mut self) {
        if self.satb.is_empty() {
            return;
        }
        let buffer = std::mem::replace(&mut self.satb, Vec::with_capacity(self.satb_capacity));
        match &self.satb_queue {
            Some(queue) => {
                trace!("flush {} SATB entries", buffer.len());
                queue.push_buffer(buffer);
            }
            None => warn!("dropping {} SATB entries: no queue attached", buffer.len()),
        }
    }
}

impl Drop for BarrierThreadState {
    fn drop(&mut self) {
        self.flush_satb();
    }
}

impl std::fmt::Debug for BarrierThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarrierThreadState")
            .field("marking", &self.is_marking_active())
            .field("satb", &self.satb.len())
            .field("card_queue", &self.card_queue.as_ref().map(|q| q.len()))
            .finish()
    }
}

/// A family of barriers installed for the whole heap.
pub trait BarrierSet: DowncastSync {
    fn pre_type(&self) -> BarrierType;
    fn post_type(&self) -> BarrierType;

    /// Fresh state for a new mutator thread.
    fn create_thread_state(&self) -> BarrierThreadState;

    fn is_pre_barrier_enabled(&self, thread: &BarrierThreadState) -> bool {
        !self.pre_type().is_empty_barrier() && thread.is_marking_active()
    }

    /// Runs before `pre_val` is overwritten.
    fn pre_barrier(&self, thread: &mut BarrierThreadState, pre_val: ObjectReference);

    /// Runs after `stored` was written into the field at `obj + offset`.
    fn post_barrier(
        &self,
        thread: &mut BarrierThreadState,
        obj: ObjectReference,
        offset: usize,
        stored: ObjectReference,
    );

    /// Runs after `count` reference slots starting at `obj + offset` were written.
    fn post_barrier_array(
        &self,
        thread: &mut BarrierThreadState,
        obj: ObjectReference,
        offset: usize,
        count: usize,
    );

    fn get_barrier_operand(&self, name: BarrierOperandName) -> Option<BarrierOperand>;
}

impl_downcast!(sync BarrierSet);

/// Barriers for a runtime with no concurrent marking and no remembered sets.
pub struct NoBarrierSet;

impl BarrierSet for NoBarrierSet {
    fn pre_type(&self) -> BarrierType {
        BarrierType::PreWrbNone
    }

    fn post_type(&self) -> BarrierType {
        BarrierType::PostWrbNone
    }

    fn create_thread_state(&self) -> BarrierThreadState {
        BarrierThreadState::detached()
    }

    fn pre_barrier(&self, _thread: &mut BarrierThreadState, _pre_val: ObjectReference) {}

    fn post_barrier(
        &self,
        _thread: &mut BarrierThreadState,
        _obj: ObjectReference,
        _offset: usize,
        _stored: ObjectReference,
    ) {
    }

    fn post_barrier_array(
        &self,
        _thread: &mut BarrierThreadState,
        _obj: ObjectReference,
        _offset: usize,
        _count: usize,
    ) {
    }

    fn get_barrier_operand(&self, _name: BarrierOperandName) -> Option<BarrierOperand> {
        None
    }
}

pub(crate) fn address_operand(addr: Address) -> BarrierOperand {
    BarrierOperand::new(BarrierOperandType::AddressType, BarrierOperandValue::Address(addr))
}

pub(crate) fn u8_address_operand(addr: Address) -> BarrierOperand {
    BarrierOperand::new(BarrierOperandType::Uint8Address, BarrierOperandValue::Uint8Address(addr))
}

pub(crate) fn u8_operand(value: u8) -> BarrierOperand {
    BarrierOperand::new(BarrierOperandType::Uint8Type, BarrierOperandValue::Uint8(value))
}

pub(crate) fn pre_entrypoint_operand(entrypoints: Option<&BarrierEntrypoints>) -> Option<BarrierOperand> {
    entrypoints.map(|e| {
        BarrierOperand::new(
            BarrierOperandType::PreWriteBarrierFuncAddress,
            BarrierOperandValue::PreWriteBarrierFunc(e.pre_write),
        )
    })
}

pub(crate) fn update_card_operand(entrypoints: Option<&BarrierEntrypoints>) -> Option<BarrierOperand> {
    entrypoints.map(|e| {
        BarrierOperand::new(
            BarrierOperandType::FuncWithTwoObjRefAddresses,
            BarrierOperandValue::FuncWithTwoObjRefs(e.update_card),
        )
    })
}

/// SATB state for a thread of a barrier set that records into `queue`.
pub(crate) fn satb_thread_state(options: &Options, queue: &Arc<SatbQueue>) -> BarrierThreadState {
    BarrierThreadState::new(options.satb_buffer_capacity, Some(queue.clone()))
}
