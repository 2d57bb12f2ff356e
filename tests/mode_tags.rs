//! The 18-bit payload prefixes of the two unsigned encodings must stay
//! distinguishable from legacy signed payloads.

use proptest::prelude::*;
use trpx::{BitReader, Mode, Sample, Terse};

const UNSIGNED_TAG: u64 = 0b111111111111111000;
const SMALL_UNSIGNED_TAG: u64 = 0b111111111111111100;

fn leading_tag(payload: &[u8]) -> Option<u64> {
    if payload.len() * 8 < 18 {
        return None;
    }
    BitReader::new(payload).pop_u(18).ok()
}

fn first_payload<T: Sample>(data: &[T], mode: Mode) -> Vec<u8> {
    let mut terse = Terse::new();
    terse.push_back(data, mode).unwrap();
    terse.frame_bytes(0).unwrap().to_vec()
}

proptest! {
    /// Random signed frames never open with either unsigned tag.
    #[test]
    fn signed_payloads_avoid_tags(data in prop::collection::vec(-5000i32..5000, 1..300)) {
        let payload = first_payload(&data, Mode::Signed);
        if let Some(tag) = leading_tag(&payload) {
            prop_assert_ne!(tag, UNSIGNED_TAG);
            prop_assert_ne!(tag, SMALL_UNSIGNED_TAG);
        }
    }

    /// The tags the unsigned encoders write are exactly the documented
    /// bit patterns.
    #[test]
    fn unsigned_payloads_carry_tags(data in prop::collection::vec(0u16..u16::MAX, 1..300)) {
        let unsigned = first_payload(&data, Mode::Unsigned);
        prop_assert_eq!(leading_tag(&unsigned), Some(UNSIGNED_TAG));
        let small = first_payload(&data, Mode::SmallUnsigned);
        prop_assert_eq!(leading_tag(&small), Some(SMALL_UNSIGNED_TAG));
    }

    /// Decoding picks the right mode from the payload alone: unsigned
    /// data pushed under any unsigned mode comes back bit-exact.
    #[test]
    fn tag_dispatch_roundtrips(data in prop::collection::vec(0u16..u16::MAX, 1..200)) {
        for mode in [Mode::Signed, Mode::Unsigned, Mode::SmallUnsigned] {
            let mut terse = Terse::new();
            terse.push_back(&data, mode).unwrap();
            let mut out = vec![0u16; data.len()];
            terse.prolix(&mut out, 0).unwrap();
            prop_assert_eq!(&out, &data);
        }
    }
}

#[test]
fn zero_heavy_signed_frames_stay_signed() {
    // runs of zero blocks produce leading repeat bits, the pattern
    // closest to the all-ones tags
    for len in [1usize, 11, 12, 13, 24, 100] {
        let data = vec![0i16; len];
        let payload = first_payload(&data, Mode::Signed);
        let mut terse = Terse::new();
        terse.push_back(&data, Mode::Signed).unwrap();
        let mut out = vec![1i16; len];
        terse.prolix(&mut out, 0).unwrap();
        assert_eq!(out, data, "len {len} payload {payload:?}");
    }
}
