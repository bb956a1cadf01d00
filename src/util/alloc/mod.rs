mod tlab;
mod tlab_average;

pub use self::tlab::{Tlab, TlabPolicy};
pub use self::tlab_average::{WeightedAdaptiveTlabAverage, REDUCTION_RATE};
