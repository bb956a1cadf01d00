//! Helpers shared by unit tests, integration tests and benches.

use crate::policy::region::{CardTable, RegionPool, RegionSpace};
use crate::util::heap::HeapLayout;
use crate::util::options::Options;
use std::panic;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

// https://github.com/rust-lang/rfcs/issues/2798#issuecomment-552949300
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}

lazy_static! {
    // A global lock to make tests that touch process-wide state (env vars) serial.
    static ref SERIAL_TEST_LOCK: Mutex<()> = Mutex::default();
}

// force some tests to be executed serially
pub fn serial_test<F>(f: F)
where
    F: FnOnce(),
{
    // If one test fails, the lock will become poisoned. We would want to continue for other tests anyway.
    let _guard = SERIAL_TEST_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f();
}

// Always execute a cleanup closure no matter the test panics or not.
pub fn with_cleanup<T, C>(test: T, cleanup: C)
where
    T: FnOnce() + panic::UnwindSafe,
    C: FnOnce(),
{
    let res = panic::catch_unwind(test);
    cleanup();
    if let Err(e) = res {
        panic::resume_unwind(e);
    }
}

/// Options for a small heap of `regions` default-sized regions. Environment variables are
/// not consulted, so tests see the same values regardless of the caller's environment.
pub fn small_heap_options(regions: usize) -> Options {
    let mut options = Options::builtin();
    options.heap_size = regions * options.region_size;
    options
}

/// A region pool, a card table covering its block, and the layout they share.
pub struct TestHeap {
    pub layout: HeapLayout,
    pub pool: Arc<RegionPool>,
    pub card_table: Arc<CardTable>,
}

impl TestHeap {
    pub fn new(options: &Options) -> Self {
        let pool = Arc::new(RegionPool::new(options).expect("failed to map the region block"));
        let layout = pool.layout();
        let card_table = Arc::new(CardTable::new(layout));
        TestHeap {
            layout,
            pool,
            card_table,
        }
    }

    /// A space backed by this heap, with young cards maintained.
    pub fn space(&self, options: &Options) -> RegionSpace {
        RegionSpace::new("test", self.pool.clone(), options).with_card_table(self.card_table.clone())
    }
}
