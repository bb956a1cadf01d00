use criterion::Criterion;
use regiongc::policy::region::{RegionFlags, RegionSpace};
use regiongc::policy::region::RegionHandle;
use regiongc::util::alloc::{Tlab, TlabPolicy};
use regiongc::util::test_util::{small_heap_options, TestHeap};
use std::hint::black_box;

/// Free an exhausted region and take it (or another one) back from the space.
fn recycle(space: &RegionSpace, handle: RegionHandle, flags: RegionFlags) -> RegionHandle {
    space.free_region(handle);
    space.new_region(flags, 0).unwrap()
}

pub fn bench(c: &mut Criterion) {
    let options = small_heap_options(16);
    let heap = TestHeap::new(&options);
    let space = heap.space(&options);

    let mut old = space.new_region(RegionFlags::OLD, 0).unwrap();
    c.bench_function("region_alloc_atomic", |b| {
        b.iter(|| {
            if space.region(old).alloc::<true>(black_box(32)).is_none() {
                old = recycle(&space, old, RegionFlags::OLD);
            }
        })
    });

    let policy = TlabPolicy::new(&options);
    let mut eden = space.new_region(RegionFlags::EDEN, 0).unwrap();
    let mut tlab = Tlab::new();
    c.bench_function("tlab_alloc", |b| {
        b.iter(|| {
            if tlab.alloc(black_box(32)).is_none() {
                policy.retire(&mut tlab);
                let size = policy.refill_size(32).unwrap();
                tlab = match space.region(eden).create_tlab(size) {
                    Some(t) => t,
                    None => {
                        eden = recycle(&space, eden, RegionFlags::EDEN);
                        space.region(eden).create_tlab(size).unwrap()
                    }
                };
            }
        })
    });
}
