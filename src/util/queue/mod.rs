pub use self::lock_free_buffer::LockFreeBuffer;

mod lock_free_buffer;
