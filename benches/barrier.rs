use criterion::Criterion;
use regiongc::plan::create_barrier_set;
use regiongc::plan::g1::G1BarrierSet;
use regiongc::policy::region::RegionFlags;
use regiongc::util::options::BarrierSelector;
use regiongc::util::queue::LockFreeBuffer;
use regiongc::util::test_util::{small_heap_options, TestHeap};
use regiongc::util::ObjectReference;
use std::hint::black_box;

pub fn bench(c: &mut Criterion) {
    let mut options = small_heap_options(4);
    let heap = TestHeap::new(&options);
    let space = heap.space(&options);
    let old = space.region(space.new_region(RegionFlags::OLD, 0).unwrap());
    let young = space.region(space.new_region(RegionFlags::EDEN, 0).unwrap());
    let src = ObjectReference::from_raw_address(old.alloc::<false>(64).unwrap());
    let same = ObjectReference::from_raw_address(old.alloc::<false>(64).unwrap());
    let dst = ObjectReference::from_raw_address(young.alloc::<false>(64).unwrap());

    let g1 = create_barrier_set(&options, heap.card_table.clone());
    let mut state = g1.create_thread_state();
    c.bench_function("g1_post_barrier_same_region", |b| {
        b.iter(|| g1.post_barrier(&mut state, black_box(src), 8, black_box(same)))
    });
    c.bench_function("g1_post_barrier_cross_region", |b| {
        b.iter(|| {
            g1.post_barrier(&mut state, black_box(src), 8, black_box(dst));
            if let Some(g1) = g1.downcast_ref::<G1BarrierSet>() {
                g1.drain_dirty_cards(|c| {
                    black_box(c);
                });
            }
        })
    });

    options.barrier = BarrierSelector::Generational;
    let gen = create_barrier_set(&options, heap.card_table.clone());
    let mut state = gen.create_thread_state();
    c.bench_function("gen_post_barrier", |b| {
        b.iter(|| gen.post_barrier(&mut state, black_box(src), 8, black_box(dst)))
    });

    let buffer: LockFreeBuffer<usize, 1024> = LockFreeBuffer::new();
    c.bench_function("lock_free_buffer_push_pop", |b| {
        b.iter(|| {
            buffer.push(black_box(1));
            black_box(buffer.pop());
        })
    });
}
