pub mod layout;

pub use self::layout::HeapLayout;
