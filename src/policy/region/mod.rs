//! Region-based heap organisation: regions, the pool they come from, the spaces that
//! own them, their remembered sets and the card table.

mod cardtable;
mod region;
mod region_pool;
mod regionspace;
mod remset;

pub use self::cardtable::{CardState, CardTable};
pub use self::region::{Region, RegionFlags, RegionKind};
pub use self::region_pool::{MmapPool, RegionBlock, RegionHandle, RegionPool};
pub use self::regionspace::RegionSpace;
pub use self::remset::{DummyLock, LockConfig, ReentrantLock, RegionRemSet, RemSet};
