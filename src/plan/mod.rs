//! Collector plans. A plan decides which barriers the mutators run.

pub mod barriers;
pub mod g1;
pub mod generational;

pub use self::barriers::{BarrierSet, BarrierThreadState, NoBarrierSet};

use crate::policy::region::CardTable;
use crate::util::options::{BarrierSelector, Options};
use std::sync::Arc;

/// Build the barrier set chosen by `options.barrier` over `card_table`.
pub fn create_barrier_set(options: &Options, card_table: Arc<CardTable>) -> Box<dyn BarrierSet> {
    info!("using {} barriers", options.barrier);
    match options.barrier {
        BarrierSelector::NoBarrier => Box::new(NoBarrierSet),
        BarrierSelector::Generational => Box::new(generational::GenBarrierSet::new(card_table, options)),
        BarrierSelector::G1 => Box::new(g1::G1BarrierSet::new(card_table, options)),
    }
}
