//! The entry point a runtime uses to set up the heap.
//!
//! A runtime calls [`init`] once with its [`Options`], creates the spaces it needs with
//! [`Heap::new_space`], and calls [`Heap::bind_mutator`] for every thread that will
//! store references.

use crate::plan::{create_barrier_set, BarrierSet, BarrierThreadState};
use crate::policy::region::{CardTable, RegionPool, RegionSpace};
use crate::util::heap::HeapLayout;
use crate::util::options::Options;
use std::io::Result;
use std::sync::Arc;

/// A region pool, the card table over it and the barrier set selected by the options.
pub struct Heap {
    options: Options,
    pool: Arc<RegionPool>,
    card_table: Arc<CardTable>,
    barrier_set: Box<dyn BarrierSet>,
}

/// Reserve the heap described by `options`. Fails only if the region block cannot be
/// mapped.
pub fn init(options: Options) -> Result<Heap> {
    match crate::util::logger::try_init() {
        Ok(_) => debug!("regiongc initialized the logger."),
        Err(_) => debug!(
            "regiongc failed to initialize the logger. Possibly a logger has been initialized by user."
        ),
    }
    let pool = Arc::new(RegionPool::new(&options)?);
    let card_table = Arc::new(CardTable::new(pool.layout()));
    let barrier_set = create_barrier_set(&options, card_table.clone());
    info!(
        "heap of {} bytes in regions of {} bytes at {:?}",
        options.heap_size,
        options.region_size,
        pool.layout().min_heap_addr..pool.layout().max_heap_addr
    );
    Ok(Heap {
        options,
        pool,
        card_table,
        barrier_set,
    })
}

impl Heap {
    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn layout(&self) -> HeapLayout {
        self.pool.layout()
    }

    pub fn pool(&self) -> &Arc<RegionPool> {
        &self.pool
    }

    pub fn card_table(&self) -> &Arc<CardTable> {
        &self.card_table
    }

    pub fn barrier_set(&self) -> &dyn BarrierSet {
        self.barrier_set.as_ref()
    }

    /// A space allocating from this heap's pool. Eden regions of the space get young cards.
    pub fn new_space(&self, name: &'static str) -> RegionSpace {
        RegionSpace::new(name, self.pool.clone(), &self.options).with_card_table(self.card_table.clone())
    }

    /// Barrier state for a new mutator thread.
    pub fn bind_mutator(&self) -> BarrierThreadState {
        self.barrier_set.create_thread_state()
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("pool", &self.pool)
            .field("card_table", &self.card_table)
            .field("barrier", &self.options.barrier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::g1::G1BarrierSet;
    use crate::policy::region::{CardState, RegionFlags};
    use crate::util::test_util::small_heap_options;
    use crate::util::ObjectReference;

    #[test]
    fn init_wires_pool_cards_and_barriers() {
        let heap = init(small_heap_options(4)).unwrap();
        assert_eq!(heap.layout(), *heap.card_table().layout());
        assert!(heap.barrier_set().downcast_ref::<G1BarrierSet>().is_some());

        let space = heap.new_space("main");
        let old = space.region(space.new_region(RegionFlags::OLD, 0).unwrap());
        let eden = space.region(space.new_region(RegionFlags::EDEN, 0).unwrap());
        let src = ObjectReference::from_raw_address(old.alloc::<true>(32).unwrap());
        let dst = ObjectReference::from_raw_address(eden.alloc::<true>(32).unwrap());

        let mut mutator = heap.bind_mutator();
        heap.barrier_set().post_barrier(&mut mutator, src, 8, dst);
        assert_eq!(heap.card_table().get_card(src.to_raw_address()), Some(CardState::Marked));
        assert_eq!(heap.card_table().get_card(dst.to_raw_address()), Some(CardState::Young));
    }
}
