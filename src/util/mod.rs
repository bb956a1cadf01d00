pub mod address;
pub mod alloc;
pub mod bitmap;
pub mod constants;
pub mod conversions;
pub mod heap;
pub mod logger;
pub mod memory;
pub mod options;
pub mod queue;
#[doc(hidden)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
