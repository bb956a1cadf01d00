//! Generational collection over a card-marked old space.

mod barrier;

pub use self::barrier::{GenBarrierSet, DIRTY_CARD_VALUE};
