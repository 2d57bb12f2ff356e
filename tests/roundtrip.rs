use rand::{Rng, SeedableRng};
use trpx::{Mode, Sample, Terse};

fn roundtrip<T: Sample>(data: &[T], block: usize, mode: Mode) -> usize {
    let mut terse = Terse::new();
    terse.set_block_size(block).unwrap();
    terse.push_back(data, mode).unwrap();
    let mut out = vec![T::ZERO; data.len()];
    terse.prolix(&mut out, 0).unwrap();
    assert_eq!(out, data, "block {block} mode {mode:?}");
    terse.terse_size().unwrap()
}

#[test]
fn signed_monotone_fixture() {
    // 1000 consecutive values spanning zero compress below 30% of the
    // raw i32 bytes
    let data: Vec<i32> = (-500..500).collect();
    let size = roundtrip(&data, 12, Mode::Signed);
    assert!(size <= 1200, "compressed to {size} bytes");
}

#[test]
fn unsigned_overload_fixture() {
    let data: Vec<u16> = vec![0, 1, 2, 65535, 3, 65535, 65535, 4, 0, 0, 0, 0];
    roundtrip(&data, 12, Mode::Unsigned);
}

#[test]
fn small_unsigned_sparse_fixture() {
    let mut data = vec![0u8; 48];
    data[10] = 1;
    data[37] = 1;
    let size = roundtrip(&data, 12, Mode::SmallUnsigned);
    assert!(size <= 16, "compressed to {size} bytes");
}

#[test]
fn small_unsigned_radix_fixture() {
    // one weak block of twelve 2s: the 18-bit tag, a 5-bit header and a
    // single base-3 group
    let data = vec![2u8; 12];
    let size = roundtrip(&data, 12, Mode::SmallUnsigned);
    let expected_bits = 18 + 5 + ((3u64.pow(12) - 1).ilog2() as usize + 1);
    assert_eq!(size, (expected_bits + 7) / 8);
}

fn random_vector<T: Sample>(rng: &mut impl Rng, len: usize, spread: u32) -> Vec<T>
where
    rand::distributions::Standard: rand::distributions::Distribution<T>,
{
    (0..len)
        .map(|_| {
            let raw: T = rng.gen();
            // squeeze most values small, keep occasional wide ones
            if spread < T::BITS && rng.gen_ratio(7, 8) {
                T::from_field(raw.as_unsigned() & ((1u64 << spread) - 1), T::BITS)
            } else {
                raw
            }
        })
        .collect()
}

fn random_matrix<T: Sample>(seed: u64, modes: &[Mode])
where
    rand::distributions::Standard: rand::distributions::Distribution<T>,
{
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    for &block in &[8usize, 12, 16, 24, 32] {
        for &mode in modes {
            for _ in 0..8 {
                let len = rng.gen_range(1..400);
                let spread = rng.gen_range(1..=T::BITS);
                let data = random_vector::<T>(&mut rng, len, spread);
                roundtrip(&data, block, mode);
            }
        }
    }
}

#[test]
fn random_roundtrip_u8() {
    random_matrix::<u8>(11, &[Mode::Unsigned, Mode::SmallUnsigned]);
}

#[test]
fn random_roundtrip_u16() {
    random_matrix::<u16>(12, &[Mode::Unsigned, Mode::SmallUnsigned]);
}

#[test]
fn random_roundtrip_u32() {
    random_matrix::<u32>(13, &[Mode::Unsigned, Mode::SmallUnsigned]);
}

#[test]
fn random_roundtrip_u64() {
    random_matrix::<u64>(14, &[Mode::Unsigned, Mode::SmallUnsigned]);
}

#[test]
fn unsigned_data_in_legacy_signed_mode() {
    // unsigned data may still be stored in the legacy signed layout;
    // it simply keeps no sign bit
    let data: Vec<u16> = (0..500).map(|i| (i * i) as u16).collect();
    roundtrip(&data, 12, Mode::Signed);
    let sparse: Vec<u8> = (0..100).map(|i| u8::from(i % 17 == 0)).collect();
    roundtrip(&sparse, 16, Mode::Signed);
}

#[test]
fn random_roundtrip_signed() {
    random_matrix::<i8>(15, &[Mode::Signed]);
    random_matrix::<i16>(16, &[Mode::Signed]);
    random_matrix::<i32>(17, &[Mode::Signed]);
    random_matrix::<i64>(18, &[Mode::Signed]);
}

#[test]
fn all_overloads_roundtrip() {
    // dense overload runs exercise the masked loops of both unsigned
    // encodings
    for &block in &[8usize, 12, 24] {
        let mut data = vec![u16::MAX; 100];
        data[50] = 3;
        data[51] = 0;
        data[99] = 1200;
        roundtrip(&data, block, Mode::Unsigned);
        roundtrip(&data, block, Mode::SmallUnsigned);
    }
}

#[test]
fn wide_radix_blocks_roundtrip() {
    // 24 values of 6 packed as one base-7 magnitude need more than 64
    // bits
    let data = vec![6u8; 24];
    roundtrip(&data, 24, Mode::SmallUnsigned);
    let mut mixed: Vec<u8> = (0..96).map(|i| (i % 7) as u8).collect();
    mixed[95] = 6;
    roundtrip(&mixed, 24, Mode::SmallUnsigned);
}

#[test]
fn minimum_extremes_roundtrip() {
    roundtrip(&[i64::MIN, i64::MAX, -1, 0, 1], 8, Mode::Signed);
    roundtrip(&[i32::MIN; 9], 8, Mode::Signed);
    roundtrip(&[u64::MAX; 16], 8, Mode::Unsigned);
    roundtrip(&[u64::MAX; 16], 8, Mode::SmallUnsigned);
}
