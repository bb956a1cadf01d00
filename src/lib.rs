//! Region-based heap allocation and write barriers for a generational, G1-style
//! garbage collector.
//!
//! * [`policy::region`]: the region pool, region spaces, per-region remembered sets
//!   and the card table.
//! * [`util::alloc`]: thread-local allocation buffers and their adaptive sizing.
//! * [`plan`]: barrier type encoding and the no-op, generational and G1 barrier sets.
//! * [`util::queue::LockFreeBuffer`]: the single-producer single-consumer ring that
//!   carries dirty cards from mutators to the collector.
//!
//! [`memory_manager::init`] wires these together from a set of options.
//!
//! Geometry is never global: a [`util::heap::HeapLayout`] is created from
//! [`util::options::Options`] and handed to every component that needs it, and
//! per-thread barrier state is an explicit [`plan::BarrierThreadState`].

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

pub mod memory_manager;
pub mod plan;
pub mod policy;
pub mod util;
