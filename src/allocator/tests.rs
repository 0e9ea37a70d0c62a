use proptest::prelude::*;

use super::*;
use crate::device::MemDevice;

fn pool(dev: &MemDevice) -> Pool {
    Pool::new(dev, 26, &Config::default())
}

fn alloc<'a>(p: &Pool<'a>, data_capacity: u64) -> DataBlock<'a> {
    p.first_block()
        .unwrap()
        .find_first_free_block()
        .unwrap()
        .allocate(data_capacity)
        .unwrap()
}

/// A two-member chain at 851 and 941 with 54 payload bytes, built over the
/// fragments left by removing a block between two data blocks.
fn fragmented_chain(dev: &MemDevice) -> DataBlock<'_> {
    let p = pool(dev);
    p.format().unwrap().allocate(800).unwrap();
    let a = alloc(&p, 20);
    let _b = alloc(&p, 20);
    a.remove_chain().unwrap();
    alloc(&p, 50)
}

fn layout(p: &Pool) -> Vec<(u64, u64, bool)> {
    p.blocks()
        .unwrap()
        .into_iter()
        .map(|b| (b.start, b.length, b.free))
        .collect()
}

#[test]
fn format_makes_one_free_block() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap();

    assert_eq!(
        vec![BlockInfo { start: 26, length: 974, capacity: 949, free: true, next: None }],
        p.blocks().unwrap()
    );
    assert_eq!(949, p.free_capacity().unwrap());
    // footer mirrors the head
    let bytes = dev.snapshot();
    assert_eq!(974u64.to_be_bytes()[..], bytes[992..1000]);
}

#[test]
fn debug_lists_blocks() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap();
    assert_eq!(
        "Pool { first_block: 26, end: 1000, blocks: [BlockInfo { start: 26, length: 974, \
         capacity: 949, free: true, next: None }] }",
        format!("{:?}", p)
    );
}

#[test]
fn allocate_splits_free_block() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let root = p.format().unwrap().allocate(800).unwrap();

    assert_eq!(26, root.start());
    assert_eq!(800, root.data_chain_capacity().unwrap());
    assert_eq!(vec![(26, 825, false), (851, 149, true)], layout(&p));
    assert_eq!(124, p.free_capacity().unwrap());
}

#[test]
fn allocate_rounds_up_to_min_block() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let b = p.format().unwrap().allocate(0).unwrap();
    assert_eq!(45, b.length().unwrap());
    assert_eq!(20, b.data_chain_capacity().unwrap());
}

#[test]
fn allocate_absorbs_small_remainder() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(800).unwrap();

    let a = alloc(&p, 20);
    let b = alloc(&p, 20);
    let c = alloc(&p, 20);
    assert_eq!((851, 896, 941), (a.start(), b.start(), c.start()));
    // 14 bytes would be left over, too small for a block
    assert_eq!(59, c.length().unwrap());
    assert_eq!(34, c.data_chain_capacity().unwrap());
    assert_eq!(0, p.free_capacity().unwrap());
}

#[test]
fn allocate_fails_without_touching_store() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(800).unwrap();
    let before = dev.snapshot();

    let free = p.first_block().unwrap().find_first_free_block().unwrap();
    match free.allocate(125) {
        Err(Error::NotEnoughFreeSpace { requested, available }) => {
            assert_eq!(125, requested);
            assert_eq!(124, available);
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(before, dev.snapshot());

    // exactly the remaining capacity fits
    assert_eq!(124, alloc(&p, 124).data_chain_capacity().unwrap());
}

#[test]
fn allocate_builds_chain_over_fragments() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(800).unwrap();
    let a = alloc(&p, 20);
    let _b = alloc(&p, 20);
    a.remove_chain().unwrap();
    assert_eq!(
        vec![(26, 825, false), (851, 45, true), (896, 45, false), (941, 59, true)],
        layout(&p)
    );

    let chain = alloc(&p, 50);
    assert_eq!(851, chain.start());
    assert_eq!(54, chain.data_chain_capacity().unwrap());
    let blocks = p.blocks().unwrap();
    assert_eq!(Some(941), blocks[1].next);
    assert_eq!(None, blocks[3].next);
    assert!(blocks.iter().all(|b| !b.free));
}

#[test]
fn read_and_write_span_chain_members() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(800).unwrap();
    let a = alloc(&p, 20);
    let _b = alloc(&p, 20);
    a.remove_chain().unwrap();
    let chain = alloc(&p, 50);

    let data: Vec<u8> = (0..54u8).collect();
    chain.write(0, &data).unwrap();
    let mut all = vec![0u8; 54];
    chain.read(0, &mut all).unwrap();
    assert_eq!(data, all);

    let mut middle = vec![0u8; 20];
    chain.read(15, &mut middle).unwrap();
    assert_eq!(data[15..35], middle[..]);
    // the second member holds the tail of the data
    assert_eq!(data[20..], dev.snapshot()[941 + 17..941 + 17 + 34]);
}

#[test]
fn read_past_capacity_is_rejected() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let b = p.format().unwrap().allocate(20).unwrap();
    let mut buf = [0u8; 5];
    assert!(matches!(b.read(16, &mut buf), Err(Error::InvalidArgument(_))));
    assert!(matches!(b.read(u64::MAX, &mut buf), Err(Error::InvalidArgument(_))));
    assert!(b.read(15, &mut buf).is_ok());
    assert!(b.read(500, &mut []).is_ok());
}

#[test]
fn enlarge_splits_free_neighbour() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    assert_eq!(vec![(26, 45, false), (71, 929, true)], layout(&p));

    a.enlarge(100).unwrap();
    assert_eq!(vec![(26, 125, false), (151, 849, true)], layout(&p));
    assert_eq!(100, a.data_chain_capacity().unwrap());
    assert_eq!(None, a.next_position().unwrap());
}

#[test]
fn enlarge_absorbs_whole_neighbour() {
    let dev = MemDevice::new(200);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    assert_eq!(vec![(26, 45, false), (71, 129, true)], layout(&p));

    a.enlarge(120).unwrap();
    assert_eq!(vec![(26, 174, false)], layout(&p));
    assert_eq!(149, a.data_chain_capacity().unwrap());
}

#[test]
fn enlarge_links_new_tail() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let _b = alloc(&p, 20);

    a.enlarge(100).unwrap();
    assert_eq!(Some(116), a.next_position().unwrap());
    assert_eq!(100, a.data_chain_capacity().unwrap());
    assert_eq!(
        vec![(26, 45, false), (71, 45, false), (116, 105, false), (221, 779, true)],
        layout(&p)
    );
}

#[test]
fn enlarge_uses_neighbour_then_new_tail() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    let _c = alloc(&p, 20);
    b.remove_chain().unwrap();

    a.enlarge(100).unwrap();
    assert_eq!(
        vec![(26, 90, false), (116, 45, false), (161, 60, false), (221, 779, true)],
        layout(&p)
    );
    assert_eq!(Some(161), a.next_position().unwrap());
    assert_eq!(100, a.data_chain_capacity().unwrap());
}

#[test]
fn enlarge_fails_without_touching_store() {
    let dev = MemDevice::new(200);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let before = dev.snapshot();

    assert!(matches!(
        a.enlarge(200),
        Err(Error::NotEnoughFreeSpace { requested: 180, available: 129 })
    ));
    assert_eq!(before, dev.snapshot());
    assert_eq!(20, a.data_chain_capacity().unwrap());
}

#[test]
fn enlarged_space_reads_as_zeros() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 100);
    a.write(0, &[0xAB; 20]).unwrap();
    b.write(0, &[0xCD; 100]).unwrap();
    b.remove_chain().unwrap();

    a.enlarge(60).unwrap();
    let mut out = vec![0xFFu8; 60];
    a.read(0, &mut out).unwrap();
    assert_eq!([0xAB; 20][..], out[..20]);
    assert!(out[20..].iter().all(|&byte| byte == 0));
}

#[test]
fn write_enlarges_chain() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let _b = alloc(&p, 20);

    let data = vec![7u8; 70];
    a.write(10, &data).unwrap();
    assert_eq!(80, a.data_chain_capacity().unwrap());
    let mut out = vec![0u8; 80];
    a.read(0, &mut out).unwrap();
    assert!(out[..10].iter().all(|&byte| byte == 0));
    assert_eq!(data[..], out[10..]);
}

#[test]
fn remove_with_data_neighbours() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    let _c = alloc(&p, 20);

    b.remove_chain().unwrap();
    assert_eq!(
        vec![(26, 45, false), (71, 45, true), (116, 45, false), (161, 839, true)],
        layout(&p)
    );
}

#[test]
fn remove_merges_into_free_previous() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    let c = alloc(&p, 20);
    let _d = alloc(&p, 20);

    b.remove_chain().unwrap();
    c.remove_chain().unwrap();
    assert_eq!(
        vec![(26, 45, false), (71, 90, true), (161, 45, false), (206, 794, true)],
        layout(&p)
    );
}

#[test]
fn remove_merges_free_following() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    let c = alloc(&p, 20);
    let _d = alloc(&p, 20);

    c.remove_chain().unwrap();
    p.data_block_at(b.start()).unwrap().remove_chain().unwrap();
    assert_eq!(
        vec![(26, 45, false), (71, 90, true), (161, 45, false), (206, 794, true)],
        layout(&p)
    );
}

#[test]
fn remove_merges_both_sides() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    let c = alloc(&p, 20);

    b.remove_chain().unwrap();
    c.remove_chain().unwrap();
    assert_eq!(vec![(26, 45, false), (71, 929, true)], layout(&p));
    assert_eq!(904, p.free_capacity().unwrap());
}

#[test]
fn remove_last_block_of_store() {
    let dev = MemDevice::new(161);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    let _b = alloc(&p, 20);
    let c = alloc(&p, 20);
    assert_eq!(116, c.start());
    assert_eq!(0, p.free_capacity().unwrap());

    c.remove_chain().unwrap();
    assert_eq!(vec![(26, 45, false), (71, 45, false), (116, 45, true)], layout(&p));
}

#[test]
fn remove_whole_chain_restores_space() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(800).unwrap();
    let a = alloc(&p, 20);
    let _b = alloc(&p, 20);
    a.remove_chain().unwrap();
    let chain = alloc(&p, 50);
    let before = p.free_capacity().unwrap();
    assert_eq!(0, before);

    chain.remove_chain().unwrap();
    assert_eq!(
        vec![(26, 825, false), (851, 45, true), (896, 45, false), (941, 59, true)],
        layout(&p)
    );
}

#[test]
fn first_block_cannot_be_removed() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let root = p.format().unwrap().allocate(800).unwrap();
    assert!(matches!(root.remove_chain(), Err(Error::InvalidArgument(_))));
}

#[test]
fn looping_chain_is_detected() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    let a = p.format().unwrap().allocate(20).unwrap();
    let b = alloc(&p, 20);
    a.set_next_in_chain(&b).unwrap();
    b.set_next_in_chain(&a).unwrap();

    let head = p.data_block_at(26).unwrap();
    assert!(matches!(head.data_chain_capacity(), Err(Error::Inconsistent(_))));
}

#[test]
fn free_block_is_not_a_chain_head() {
    let dev = MemDevice::new(1000);
    let p = pool(&dev);
    p.format().unwrap().allocate(20).unwrap();
    assert!(matches!(p.data_block_at(71), Err(Error::Inconsistent(_))));
    assert!(matches!(p.block_at(1000), Err(Error::InvalidArgument(_))));
    assert!(matches!(p.block_at(25), Err(Error::InvalidArgument(_))));
}

/// An offset into `capacity` bytes and a payload that fits after it.
fn range_within(capacity: u64) -> impl Strategy<Value = (u64, Vec<u8>)> {
    (0..capacity).prop_flat_map(move |offset| {
        (
            Just(offset),
            prop::collection::vec(any::<u8>(), 0..=(capacity - offset) as usize),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn single_block_round_trip((offset, data) in range_within(200)) {
        let dev = MemDevice::new(1000);
        let p = pool(&dev);
        let block = p.format().unwrap().allocate(200).unwrap();
        prop_assert_eq!(None, block.next_position().unwrap());

        block.write(offset, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        block.read(offset, &mut out).unwrap();
        prop_assert_eq!(&data, &out);
        prop_assert_eq!(200, block.data_chain_capacity().unwrap());
    }

    #[test]
    fn chain_round_trip((offset, data) in range_within(54)) {
        let dev = MemDevice::new(1000);
        let chain = fragmented_chain(&dev);
        prop_assert_eq!(Some(941), chain.next_position().unwrap());

        chain.write(offset, &data).unwrap();
        let mut expected = vec![0u8; 54];
        expected[offset as usize..offset as usize + data.len()].copy_from_slice(&data);
        let mut all = vec![0xFFu8; 54];
        chain.read(0, &mut all).unwrap();
        prop_assert_eq!(expected, all);
    }

    #[test]
    fn growing_write_round_trip(
        offset in 0u64..150,
        data in prop::collection::vec(any::<u8>(), 1..300),
    ) {
        let dev = MemDevice::new(2000);
        let p = pool(&dev);
        let a = p.format().unwrap().allocate(20).unwrap();
        let _b = alloc(&p, 20);

        a.write(offset, &data).unwrap();
        let end = offset + data.len() as u64;
        let capacity = a.data_chain_capacity().unwrap();
        prop_assert!(capacity >= end.max(20));

        let mut expected = vec![0u8; capacity as usize];
        expected[offset as usize..end as usize].copy_from_slice(&data);
        let mut all = vec![0xFFu8; capacity as usize];
        a.read(0, &mut all).unwrap();
        prop_assert_eq!(expected, all);
    }
}
