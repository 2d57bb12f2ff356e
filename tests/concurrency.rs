//! Binding a worker pool must never change what a container holds,
//! only when the encode work happens.

use rand::{Rng, SeedableRng};
use trpx::{Mode, Parallelism, Terse};

fn frames(seed: u64, count: usize, len: usize) -> Vec<Vec<u16>> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..len).map(|_| rng.gen_range(0..2000)).collect())
        .collect()
}

#[test]
fn pool_bound_equals_unbound() {
    let frames = frames(7, 24, 500);

    let mut plain = Terse::new();
    let mut pooled = Terse::with_parallelism(Parallelism::default()).unwrap();
    for frame in &frames {
        plain.push_back_owned(frame.clone(), Mode::Auto).unwrap();
        pooled.push_back_owned(frame.clone(), Mode::Auto).unwrap();
    }

    let mut plain_bytes = Vec::new();
    plain.write(&mut plain_bytes).unwrap();
    let mut pooled_bytes = Vec::new();
    pooled.write(&mut pooled_bytes).unwrap();
    assert_eq!(plain_bytes, pooled_bytes);
}

#[test]
fn pending_slots_force_on_read() {
    let frames = frames(8, 6, 300);
    let mut terse = Terse::with_parallelism(Parallelism::default()).unwrap();
    for frame in &frames {
        terse.push_back_owned(frame.clone(), Mode::Unsigned).unwrap();
    }
    // reads force in place, in submission order regardless of
    // completion order
    for (i, frame) in frames.iter().enumerate() {
        let mut out = vec![0u16; 300];
        terse.prolix(&mut out, i).unwrap();
        assert_eq!(&out, frame, "frame {i}");
    }
}

#[test]
fn parallel_decode_matches_sequential() {
    let frames = frames(9, 16, 400);
    let mut terse = Terse::with_parallelism(Parallelism::default()).unwrap();
    for frame in &frames {
        terse.push_back_owned(frame.clone(), Mode::SmallUnsigned).unwrap();
    }
    let parallel: Vec<u16> = terse.prolix_to_vec().unwrap();

    terse.set_parallelism(Parallelism::new(0.0)).unwrap();
    let sequential: Vec<u16> = terse.prolix_to_vec().unwrap();
    assert_eq!(parallel, sequential);
    let flat: Vec<u16> = frames.into_iter().flatten().collect();
    assert_eq!(parallel, flat);
}

#[test]
fn erase_forces_outstanding_encodes() {
    let frames = frames(10, 5, 256);
    let mut terse = Terse::with_parallelism(Parallelism::default()).unwrap();
    for frame in &frames {
        terse.push_back_owned(frame.clone(), Mode::Auto).unwrap();
    }
    terse.erase(2).unwrap();
    assert_eq!(terse.number_of_frames(), 4);
    let mut out = vec![0u16; 256];
    terse.prolix(&mut out, 2).unwrap();
    assert_eq!(&out, &frames[3]);
}

#[test]
fn insert_order_is_slot_order() {
    let mut terse = Terse::with_parallelism(Parallelism::default()).unwrap();
    for v in 0..10u16 {
        terse.push_back_owned(vec![v; 64], Mode::Unsigned).unwrap();
    }
    terse.insert_owned(3, vec![99u16; 64], Mode::Unsigned).unwrap();
    let mut out = vec![0u16; 64];
    terse.prolix(&mut out, 3).unwrap();
    assert_eq!(out, vec![99u16; 64]);
    terse.prolix(&mut out, 4).unwrap();
    assert_eq!(out, vec![3u16; 64]);
}
