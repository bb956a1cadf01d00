use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A bounded single-producer single-consumer ring buffer.
///
/// One slot is always left empty to tell a full buffer from an empty one, so at most
/// `N - 1` elements are live. `N` must be a power of two; this is checked when the
/// buffer is instantiated.
///
/// The producer keeps a cached copy of the consumer index and only re-reads the shared
/// index (with acquire ordering) when the cache says the buffer is full. The consumer
/// does the same with the producer index when the cache says the buffer is empty.
///
/// Exactly one thread may call [`try_push`](Self::try_push)/[`push`](Self::push) and
/// exactly one thread may call [`try_pop`](Self::try_pop)/[`pop`](Self::pop) at a time.
pub struct LockFreeBuffer<T, const N: usize> {
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
    /// Next slot to write. Written by the producer only.
    tail: CachePadded<AtomicUsize>,
    /// Next slot to read. Written by the consumer only.
    head: CachePadded<AtomicUsize>,
    /// Producer's last observed `head`.
    cached_head: CachePadded<AtomicUsize>,
    /// Consumer's last observed `tail`.
    cached_tail: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send, const N: usize> Send for LockFreeBuffer<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for LockFreeBuffer<T, N> {}

impl<T, const N: usize> LockFreeBuffer<T, N> {
    const MASK: usize = N - 1;
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(N.is_power_of_two() && N >= 2);

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        LockFreeBuffer {
            buffer: (0..N).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
            cached_head: CachePadded::new(AtomicUsize::new(0)),
            cached_tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// The maximum number of live elements.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Try to append `value`. Returns the value back if the buffer is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let tail = self.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & Self::MASK;
        if next == self.cached_head.load(Ordering::Relaxed) {
            let head = self.head.load(Ordering::Acquire);
            self.cached_head.store(head, Ordering::Relaxed);
            if next == head {
                return Err(value);
            }
        }
        unsafe { (*self.buffer[tail].get()).write(value) };
        self.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Append `value`, spinning until the consumer frees a slot.
    pub fn push(&self, mut value: T) {
        loop {
            match self.try_push(value) {
                Ok(()) => return,
                Err(v) => {
                    value = v;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Try to remove the oldest element.
    pub fn try_pop(&self) -> Option<T> {
        let head = self.head.load(Ordering::Relaxed);
        if head == self.cached_tail.load(Ordering::Relaxed) {
            let tail = self.tail.load(Ordering::Acquire);
            self.cached_tail.store(tail, Ordering::Relaxed);
            if head == tail {
                return None;
            }
        }
        let value = unsafe { (*self.buffer[head].get()).assume_init_read() };
        self.head.store((head + 1) & Self::MASK, Ordering::Release);
        Some(value)
    }

    /// Remove the oldest element, spinning until the producer provides one.
    pub fn pop(&self) -> T {
        loop {
            if let Some(v) = self.try_pop() {
                return v;
            }
            std::hint::spin_loop();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & Self::MASK
    }
}

impl<T, const N: usize> Default for LockFreeBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for LockFreeBuffer<T, N> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

impl<T, const N: usize> std::fmt::Debug for LockFreeBuffer<T, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LockFreeBuffer({}/{})", self.len(), N - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::panic_after;
    use std::sync::Arc;

    #[test]
    fn fill_then_drain_in_order() {
        let buffer = LockFreeBuffer::<i32, 8>::new();
        assert!(buffer.is_empty());
        for i in 1..=7 {
            assert!(buffer.try_push(i).is_ok());
        }
        assert_eq!(buffer.try_push(8), Err(8));
        assert_eq!(buffer.len(), 7);
        for i in 1..=7 {
            assert_eq!(buffer.pop(), i);
        }
        assert!(buffer.is_empty());
        assert_eq!(buffer.try_pop(), None);
    }

    #[test]
    fn wraps_around() {
        let buffer = LockFreeBuffer::<usize, 4>::new();
        for round in 0..10 {
            assert!(buffer.try_push(round).is_ok());
            assert!(buffer.try_push(round + 100).is_ok());
            assert_eq!(buffer.try_pop(), Some(round));
            assert_eq!(buffer.try_pop(), Some(round + 100));
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn drops_remaining_elements() {
        let marker = Arc::new(());
        {
            let buffer = LockFreeBuffer::<Arc<()>, 4>::new();
            buffer.push(marker.clone());
            buffer.push(marker.clone());
            assert_eq!(Arc::strong_count(&marker), 3);
        }
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn producer_consumer_threads() {
        const COUNT: usize = 100_000;
        panic_after(10_000, || {
            let buffer = Arc::new(LockFreeBuffer::<usize, 64>::new());
            let producer = {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for i in 0..COUNT {
                        buffer.push(i);
                    }
                })
            };
            for expected in 0..COUNT {
                assert_eq!(buffer.pop(), expected);
            }
            producer.join().unwrap();
            assert!(buffer.is_empty());
        });
    }
}
