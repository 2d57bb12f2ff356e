//! Frame decompression: the exact inverse of the encoder's block loops.
//!
//! The first 18 bits of a payload select the decoder. The two unsigned
//! tags are bit patterns no realistic legacy signed payload begins with;
//! anything else rewinds and decodes as signed. Each mode tracks the
//! same header-delta state as its encoder, block by block.

use crate::bits::BitReader;
use crate::encode::{SMALL_BLOCK_CAP, SMALL_UNSIGNED_TAG, TAG_BITS, UNSIGNED_TAG};
use crate::error::TrpxError;
use crate::sample::{msb_u128, Sample};

/// Header-tracker sentinel mirrored from the encoder: after a weak block
/// the next strong width never arrives as a delta except from 65.
const BITS_SENTINEL: u32 = 65;

/// Decompress one payload into `out`, which must hold exactly the
/// frame's value count. `prolix_bits` is the container's stored bit
/// depth; the caller has already checked it against `T`.
pub(crate) fn decode_frame<T: Sample>(
    payload: &[u8],
    out: &mut [T],
    block: usize,
    prolix_bits: u32,
    signed: bool,
) -> Result<(), TrpxError> {
    decode_frame_measuring(payload, out, block, prolix_bits, signed).map(|_| ())
}

/// As [`decode_frame`], returning the byte length of the frame inside
/// `payload`. Used to split concatenated payloads when the container
/// prelude does not carry per-frame sizes.
pub(crate) fn decode_frame_measuring<T: Sample>(
    payload: &[u8],
    out: &mut [T],
    block: usize,
    prolix_bits: u32,
    signed: bool,
) -> Result<usize, TrpxError> {
    // Payloads too short to hold a tag can only be legacy signed data.
    let tag = if payload.len() as u64 * 8 >= TAG_BITS as u64 {
        BitReader::new(payload).pop_u(TAG_BITS)?
    } else {
        0
    };
    let mut r = BitReader::new(payload);
    match tag {
        UNSIGNED_TAG => {
            r.skip(TAG_BITS as u64)?;
            dispatch_block::<T, Unsigned>(&mut r, out, block, prolix_bits, false)?;
        }
        SMALL_UNSIGNED_TAG => {
            r.skip(TAG_BITS as u64)?;
            let block = block.min(SMALL_BLOCK_CAP);
            dispatch_block::<T, SmallUnsigned>(&mut r, out, block, prolix_bits, false)?;
        }
        _ => dispatch_block::<T, Signed>(&mut r, out, block, prolix_bits, signed)?,
    }
    Ok(r.bytes_consumed())
}

/// Byte length of the first frame in `bytes`, recovered by re-parsing
/// its block structure with the stored bit depth and signedness. Used
/// for legacy streams whose prelude lacks per-frame sizes.
pub(crate) fn measure_payload(
    bytes: &[u8],
    size: usize,
    block: usize,
    prolix_bits: u32,
    signed: bool,
) -> Result<usize, TrpxError> {
    fn measure<T: Sample>(
        bytes: &[u8],
        size: usize,
        block: usize,
        prolix_bits: u32,
    ) -> Result<usize, TrpxError> {
        let mut scratch = vec![T::ZERO; size];
        decode_frame_measuring(bytes, &mut scratch, block, prolix_bits, T::SIGNED)
    }
    match (signed, prolix_bits) {
        (false, 1..=8) => measure::<u8>(bytes, size, block, prolix_bits),
        (false, 9..=16) => measure::<u16>(bytes, size, block, prolix_bits),
        (false, 17..=32) => measure::<u32>(bytes, size, block, prolix_bits),
        (false, 33..=64) => measure::<u64>(bytes, size, block, prolix_bits),
        (true, 1..=8) => measure::<i8>(bytes, size, block, prolix_bits),
        (true, 9..=16) => measure::<i16>(bytes, size, block, prolix_bits),
        (true, 17..=32) => measure::<i32>(bytes, size, block, prolix_bits),
        (true, 33..=64) => measure::<i64>(bytes, size, block, prolix_bits),
        _ => Err(TrpxError::Header(format!(
            "unsupported stored bit depth {prolix_bits}"
        ))),
    }
}

/// Specialize the block loop for the common block sizes, as the hot
/// inner unpack benefits from a compile-time trip count.
fn dispatch_block<T: Sample, M: ModeDecode>(
    r: &mut BitReader,
    out: &mut [T],
    block: usize,
    prolix_bits: u32,
    signed: bool,
) -> Result<(), TrpxError> {
    match block {
        8 => M::run::<T, 8>(r, out, block, prolix_bits, signed),
        9 => M::run::<T, 9>(r, out, block, prolix_bits, signed),
        10 => M::run::<T, 10>(r, out, block, prolix_bits, signed),
        11 => M::run::<T, 11>(r, out, block, prolix_bits, signed),
        12 => M::run::<T, 12>(r, out, block, prolix_bits, signed),
        13 => M::run::<T, 13>(r, out, block, prolix_bits, signed),
        14 => M::run::<T, 14>(r, out, block, prolix_bits, signed),
        15 => M::run::<T, 15>(r, out, block, prolix_bits, signed),
        16 => M::run::<T, 16>(r, out, block, prolix_bits, signed),
        20 => M::run::<T, 20>(r, out, block, prolix_bits, signed),
        24 => M::run::<T, 24>(r, out, block, prolix_bits, signed),
        32 => M::run::<T, 32>(r, out, block, prolix_bits, signed),
        _ => M::run::<T, 0>(r, out, block, prolix_bits, signed),
    }
}

trait ModeDecode {
    fn run<T: Sample, const B: usize>(
        r: &mut BitReader,
        out: &mut [T],
        block: usize,
        prolix_bits: u32,
        signed: bool,
    ) -> Result<(), TrpxError>;
}

struct Signed;
struct Unsigned;
struct SmallUnsigned;

impl ModeDecode for Signed {
    fn run<T: Sample, const B: usize>(
        r: &mut BitReader,
        out: &mut [T],
        block: usize,
        _prolix_bits: u32,
        signed: bool,
    ) -> Result<(), TrpxError> {
        let mut s = 0u32;
        let mut from = 0;
        while from < out.len() {
            let to = (from + block).min(out.len());
            read_width_header(r, &mut s)?;
            pop_block::<T, B>(r, s, &mut out[from..to], signed)?;
            from += block;
        }
        Ok(())
    }
}

impl ModeDecode for Unsigned {
    fn run<T: Sample, const B: usize>(
        r: &mut BitReader,
        out: &mut [T],
        block: usize,
        prolix_bits: u32,
        _signed: bool,
    ) -> Result<(), TrpxError> {
        let mut s = 0u32;
        let mut masked = 0u32;
        let mut from = 0;
        while from < out.len() {
            let to = (from + block).min(out.len());
            read_width_header(r, &mut s)?;
            if s != prolix_bits {
                pop_block::<T, B>(r, s, &mut out[from..to], false)?;
            } else {
                read_width_header(r, &mut masked)?;
                pop_block::<T, B>(r, masked, &mut out[from..to], false)?;
                for v in out[from..to].iter_mut() {
                    *v = v.wrapping_decr();
                }
            }
            from += block;
        }
        Ok(())
    }
}

impl ModeDecode for SmallUnsigned {
    fn run<T: Sample, const B: usize>(
        r: &mut BitReader,
        out: &mut [T],
        block: usize,
        prolix_bits: u32,
        _signed: bool,
    ) -> Result<(), TrpxError> {
        let mut max = 0u64;
        let mut bits = 0u32;
        let mut from = 0;
        while from < out.len() {
            let to = (from + block).min(out.len());
            read_block_header::<T>(r, &mut max, &mut bits)?;
            match max {
                0 => pop_block::<T, B>(r, 0, &mut out[from..to], false)?,
                1 => pop_block::<T, B>(r, 1, &mut out[from..to], false)?,
                3 => pop_block::<T, B>(r, 2, &mut out[from..to], false)?,
                7 => pop_block::<T, B>(r, 3, &mut out[from..to], false)?,
                m if m < 7 => radix_unpack(r, m, &mut out[from..to], false)?,
                _ => {
                    if bits == prolix_bits {
                        decode_small_masked::<T, B>(
                            r,
                            out,
                            &mut from,
                            block,
                            &mut max,
                            &mut bits,
                            prolix_bits,
                        )?;
                    } else {
                        pop_block::<T, B>(r, bits, &mut out[from..to], false)?;
                    }
                }
            }
            if max < 7 {
                bits = BITS_SENTINEL;
            }
            from += block;
        }
        Ok(())
    }
}

/// Masked loop: every block until the continuation bit clears holds
/// values incremented by one. Weak blocks unpack through the radix path
/// whatever their maximum, then decrement; strong blocks unpack plainly
/// and decrement. Tracker state pins exactly as in the encoder.
fn decode_small_masked<T: Sample, const B: usize>(
    r: &mut BitReader,
    out: &mut [T],
    from: &mut usize,
    block: usize,
    max: &mut u64,
    bits: &mut u32,
    prolix_bits: u32,
) -> Result<(), TrpxError> {
    // Tracker state pins to the stored bit depth, the width the encoder
    // announced, not to the (possibly wider) destination type.
    *max = stored_max(prolix_bits);
    *bits = prolix_bits + 1;
    loop {
        let to = (*from + block).min(out.len());
        read_block_header::<T>(r, max, bits)?;
        if *max >= 7 {
            pop_block::<T, B>(r, *bits, &mut out[*from..to], false)?;
            for v in out[*from..to].iter_mut() {
                *v = v.wrapping_decr();
            }
            *max = stored_max(prolix_bits) / 2;
        } else {
            radix_unpack(r, *max, &mut out[*from..to], true)?;
            *bits = BITS_SENTINEL;
        }
        if to == out.len() {
            *from = to;
            return Ok(());
        }
        if r.pop_u(1)? == 0 {
            return Ok(());
        }
        *from = to;
    }
}

/// All-ones value of the stored bit depth.
fn stored_max(prolix_bits: u32) -> u64 {
    if prolix_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << prolix_bits) - 1
    }
}

/// The 1/4/6/12-bit significant-bits header of the signed and unsigned
/// encodings: a set leading bit repeats the previous width.
fn read_width_header(r: &mut BitReader, s: &mut u32) -> Result<(), TrpxError> {
    if r.pop_u(1)? == 0 {
        let mut b = r.pop_u(3)? as u32;
        if b == 7 {
            b += r.pop_u(2)? as u32;
            if b == 10 {
                b += r.pop_u(6)? as u32;
            }
        }
        *s = b;
    }
    Ok(())
}

/// Weak/strong block header of the small-unsigned encoding. Updates the
/// block maximum and the strong width through the same delta flags the
/// encoder emits; a full strong header parks the maximum at a sentinel
/// that keeps weak deltas from matching.
fn read_block_header<T: Sample>(
    r: &mut BitReader,
    max: &mut u64,
    bits: &mut u32,
) -> Result<(), TrpxError> {
    let first = r.pop_u(1)?;
    if first == 1 && *max == 0 {
        return Ok(());
    }
    let flag = (first << 1) | r.pop_u(1)?;
    match flag {
        0b11 => {}
        0b10 => {
            *bits = bits
                .checked_sub(1)
                .ok_or_else(|| TrpxError::Corrupt("width delta below zero".into()))?;
            *max = max
                .checked_sub(1)
                .ok_or_else(|| TrpxError::Corrupt("block maximum delta below zero".into()))?;
        }
        0b01 => {
            *bits += 1;
            *max = if *max == 6 { *max - 2 } else { *max + 1 };
        }
        _ => {
            let v = r.pop_u(3)? as u32;
            if v == 7 {
                *max = T::MAX_FIELD / 2;
                let mut b = 3 + r.pop_u(3)? as u32;
                if b == 10 {
                    b += r.pop_u(3)? as u32;
                    if b == 17 {
                        b += r.pop_u(6)? as u32;
                    }
                }
                *bits = b;
            } else {
                *max = v as u64;
                *bits = v;
            }
        }
    }
    Ok(())
}

/// Unpack one block of `width`-bit values. Fields of a signed payload
/// sign-extend from their width; unsigned fields keep their bit pattern
/// whatever the destination type, so only a wrapped overload ever
/// surfaces as a negative value.
fn pop_block<T: Sample, const B: usize>(
    r: &mut BitReader,
    width: u32,
    out: &mut [T],
    sign_extend: bool,
) -> Result<(), TrpxError> {
    if width > T::BITS {
        return Err(TrpxError::Corrupt(format!(
            "block width {width} exceeds value width {}",
            T::BITS
        )));
    }
    let field_bits = if sign_extend { width } else { T::BITS };
    if B != 0 && out.len() == B {
        for i in 0..B {
            out[i] = T::from_field(r.pop_u(width)?, field_bits);
        }
        Ok(())
    } else {
        for slot in out.iter_mut() {
            *slot = T::from_field(r.pop_u(width)?, field_bits);
        }
        Ok(())
    }
}

/// Unpack a weak block stored as one base-`max+1` magnitude. The field
/// is as wide as the largest magnitude the block length admits; radix
/// arithmetic runs in 128 bits because 24 base-7 digits overflow a u64.
fn radix_unpack<T: Sample>(
    r: &mut BitReader,
    max: u64,
    out: &mut [T],
    decrement: bool,
) -> Result<(), TrpxError> {
    let base = (max + 1) as u128;
    let mut mult: u128 = 1;
    for _ in 0..out.len() {
        mult *= base;
    }
    let mut val = r.pop_wide(msb_u128(mult - 1))?;
    for slot in out.iter_mut() {
        let digit = T::from_field((val % base) as u64, T::BITS);
        *slot = if decrement { digit.wrapping_decr() } else { digit };
        val /= base;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::encode_frame;
    use crate::sample::Mode;

    fn roundtrip<T: Sample>(data: &[T], block: usize, mode: Mode) {
        let payload = encode_frame(data, block, mode);
        let mut out = vec![T::ZERO; data.len()];
        decode_frame(&payload, &mut out, block, T::BITS, T::SIGNED).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn signed_blocks() {
        let data: Vec<i32> = (-500..500).collect();
        roundtrip(&data, 12, Mode::Signed);
    }

    #[test]
    fn unsigned_overloads() {
        let data: Vec<u16> = vec![0, 1, 2, 65535, 3, 65535, 65535, 4, 0, 0, 0, 0];
        roundtrip(&data, 12, Mode::Unsigned);
    }

    #[test]
    fn small_unsigned_masked_run() {
        let mut data = vec![255u8; 40];
        data[35] = 3;
        data[36] = 0;
        roundtrip(&data, 12, Mode::SmallUnsigned);
    }

    #[test]
    fn partial_final_block() {
        let data: Vec<u8> = (0..29).map(|i| (i % 5) as u8).collect();
        roundtrip(&data, 12, Mode::SmallUnsigned);
        roundtrip(&data, 12, Mode::Unsigned);
        roundtrip(&data, 12, Mode::Signed);
    }

    #[test]
    fn measured_size_matches_payload() {
        let data: Vec<u16> = (0..333).map(|i| (i * 7) % 1024).map(|v| v as u16).collect();
        for mode in [Mode::Signed, Mode::Unsigned, Mode::SmallUnsigned] {
            let payload = encode_frame(&data, 12, mode);
            let mut out = vec![0u16; data.len()];
            let used = decode_frame_measuring(&payload, &mut out, 12, 16, false).unwrap();
            assert_eq!(used, payload.len(), "{mode:?}");
        }
    }

    #[test]
    fn truncated_payload_fails() {
        let data: Vec<u16> = (0..64).map(|v| v as u16 * 100).collect();
        let payload = encode_frame(&data, 12, Mode::Unsigned);
        let mut out = vec![0u16; data.len()];
        let err = decode_frame(&payload[..payload.len() / 2], &mut out, 12, 16, false);
        assert!(err.is_err());
    }
}
