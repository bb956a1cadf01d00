//! Memory policies: how the heap is divided and tracked.

pub mod region;
