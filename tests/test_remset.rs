use regiongc::policy::region::{RegionFlags, RegionRemSet};
use regiongc::util::test_util::{small_heap_options, TestHeap};
use regiongc::util::ObjectReference;

#[test]
fn remembered_objects_are_found_again() {
    let options = small_heap_options(4);
    let heap = TestHeap::new(&options);
    let space = heap.space(&options);
    let old = space.region(space.new_region(RegionFlags::OLD, 0).unwrap());
    let young = space.region(space.new_region(RegionFlags::EDEN, 0).unwrap());

    let sources: Vec<ObjectReference> = (0..3)
        .map(|_| ObjectReference::from_raw_address(old.alloc::<false>(4096).unwrap()))
        .collect();
    let target = ObjectReference::from_raw_address(young.alloc::<false>(64).unwrap());
    for src in &sources {
        old.mark_object(*src);
        RegionRemSet::add_ref_with_addr(&heap.pool, *src, 16, target);
    }
    old.swap_mark_bitmap();

    assert!(!young.remset().is_empty());
    assert_eq!(old.remset().ref_regions(), vec![young.handle()]);

    let mut found = vec![];
    young
        .remset()
        .iterate_over_objects(&heap.pool, |o| found.push(o));
    found.sort();
    assert_eq!(found, sources);

    let mut ranges = 0;
    young.remset().iterate(
        |start| start == old.begin(),
        |range| {
            assert!(old.contains(range.start));
            ranges += 1;
        },
    );
    assert_eq!(ranges, young.remset().get_remset_size());
}

#[test]
fn freeing_a_source_region_invalidates_its_entries() {
    let options = small_heap_options(4);
    let heap = TestHeap::new(&options);
    let space = heap.space(&options);
    let a = space.new_region(RegionFlags::OLD, 0).unwrap();
    let b = space.new_region(RegionFlags::OLD, 0).unwrap();
    let target = space.new_region(RegionFlags::OLD, 0).unwrap();

    let from_a = ObjectReference::from_raw_address(space.region(a).alloc::<false>(32).unwrap());
    let from_b = ObjectReference::from_raw_address(space.region(b).alloc::<false>(32).unwrap());
    let to = ObjectReference::from_raw_address(space.region(target).alloc::<false>(32).unwrap());
    RegionRemSet::add_ref_with_addr(&heap.pool, from_a, 8, to);
    RegionRemSet::add_ref_with_addr(&heap.pool, from_b, 8, to);
    let a_begin = space.region(a).begin();
    assert_eq!(space.region(target).remset().get_remset_size(), 2);

    space.free_region(a);

    let mut starts = vec![];
    space
        .region(target)
        .remset()
        .iterate(|_| true, |range| starts.push(range.start));
    assert_eq!(starts.len(), 1);
    assert!(space.region(b).contains(starts[0]));
    assert!(starts.iter().all(|s| *s != a_begin));
}

#[test]
fn freeing_a_target_region_forgets_it_in_sources() {
    let options = small_heap_options(4);
    let heap = TestHeap::new(&options);
    let space = heap.space(&options);
    let src = space.new_region(RegionFlags::OLD, 0).unwrap();
    let dst = space.new_region(RegionFlags::EDEN, 0).unwrap();
    let from = ObjectReference::from_raw_address(space.region(src).alloc::<false>(32).unwrap());
    let to = ObjectReference::from_raw_address(space.region(dst).alloc::<false>(32).unwrap());
    RegionRemSet::add_ref_with_addr(&heap.pool, from, 0, to);
    assert_eq!(space.region(src).remset().ref_regions(), vec![dst]);

    space.free_region(dst);
    assert!(space.region(src).remset().ref_regions().is_empty());
}
