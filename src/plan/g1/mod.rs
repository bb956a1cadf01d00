//! G1: region-based generational collection with concurrent marking and
//! remembered sets refined from dirty cards.

mod barrier;

pub use self::barrier::G1BarrierSet;
