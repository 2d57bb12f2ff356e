//! Frame compression: block-adaptive significant-bits packing.
//!
//! A frame is cut into blocks of up to `block` values. Each block gets a
//! prefix-coded header giving the bit width its values are packed in,
//! delta-coded against the previous block. Unsigned encodings add a mask
//! expansion for blocks holding overloads (all significant bits set);
//! the small-unsigned encoding packs weak blocks in a compact radix.

use log::trace;

use crate::bits::BitWriter;
use crate::sample::{block_sig_bits, msb_u128, msb_u64, Mode, Sample};

/// Payload prefix announcing the unsigned encoding.
pub(crate) const UNSIGNED_TAG: u64 = 0b111111111111111000;
/// Payload prefix announcing the small-unsigned encoding.
pub(crate) const SMALL_UNSIGNED_TAG: u64 = 0b111111111111111100;
/// Bit length of the mode tags.
pub(crate) const TAG_BITS: u32 = 18;

/// Working block cap of the small-unsigned encoding.
pub(crate) const SMALL_BLOCK_CAP: usize = 24;

/// Header-tracker sentinel: forces a full width header after any weak
/// block, since no legal width is 64 or 66.
const BITS_SENTINEL: u32 = 65;

/// Compress one frame. `mode` must already be resolved (not `Auto`) and
/// consistent with the signedness of `T`.
pub(crate) fn encode_frame<T: Sample>(data: &[T], block: usize, mode: Mode) -> Vec<u8> {
    let payload = match mode {
        Mode::Signed => encode_plain(data, block, false),
        Mode::Unsigned => encode_plain(data, block, true),
        Mode::SmallUnsigned => encode_small(data, block),
        Mode::Auto => unreachable!("mode resolved before encode"),
    };
    trace!(
        "encoded frame: {} values -> {} bytes ({:?})",
        data.len(),
        payload.len(),
        mode
    );
    payload
}

/// The signed and unsigned encodings share one loop; the unsigned one
/// prefixes the mode tag and re-packs overloaded blocks incremented by
/// one under a second, independently tracked width header.
fn encode_plain<T: Sample>(data: &[T], block: usize, unsigned: bool) -> Vec<u8> {
    let vb = (T::BITS / 8) as usize;
    let mut w = BitWriter::with_capacity(data.len() * vb / 100 + block * vb + 2);
    if unsigned {
        w.push(TAG_BITS, UNSIGNED_TAG);
    }
    let mut scratch: Vec<T> = Vec::with_capacity(block);
    let mut prev_bits = 0u32;
    let mut prev_masked_bits = 0u32;
    let mut from = 0;
    while from < data.len() {
        grow_for_block(&mut w, data.len(), from, block, vb);
        let to = (from + block).min(data.len());
        let chunk = &data[from..to];
        let s = block_sig_bits(chunk);
        push_width_header(&mut w, &mut prev_bits, s);
        if !unsigned || s != T::BITS {
            w.push_seq(s, chunk);
        } else {
            scratch.clear();
            scratch.extend(chunk.iter().map(|v| v.wrapping_incr()));
            let masked = block_sig_bits(&scratch);
            push_width_header(&mut w, &mut prev_masked_bits, masked);
            w.push_seq(masked, &scratch);
        }
        from += block;
    }
    w.finish()
}

fn encode_small<T: Sample>(data: &[T], block: usize) -> Vec<u8> {
    let block = block.min(SMALL_BLOCK_CAP);
    let vb = (T::BITS / 8) as usize;
    let mut w = BitWriter::with_capacity(data.len() * vb / 100 + block * vb + 2);
    w.push(TAG_BITS, SMALL_UNSIGNED_TAG);
    let mut scratch: Vec<T> = Vec::with_capacity(block);
    let mut prev_max = 0u64;
    let mut prev_bits = 0u32;
    let mut from = 0;
    while from < data.len() {
        grow_for_block(&mut w, data.len(), from, block, vb);
        let to = (from + block).min(data.len());
        let chunk = &data[from..to];
        let max = block_max(chunk);
        if max < 7 {
            push_weak_block(&mut w, chunk, max, &mut prev_max);
            prev_bits = BITS_SENTINEL;
        } else {
            let s = msb_u64(max);
            if s == T::BITS {
                from = encode_small_masked(
                    &mut w,
                    data,
                    from,
                    block,
                    &mut scratch,
                    &mut prev_max,
                    &mut prev_bits,
                );
            } else {
                push_strong_block(&mut w, s, chunk, &mut prev_bits);
                prev_max = T::MAX_FIELD / 2;
            }
        }
        from += block;
    }
    w.finish()
}

/// Masked loop of the small-unsigned encoding. Entered on a block whose
/// width equals the full type width: announces that width, then encodes
/// incremented blocks (weak or strong on the incremented values) with a
/// one-bit continuation after each block that is not the frame's last.
/// Returns the start index of the last block encoded; the caller's loop
/// step moves past it.
fn encode_small_masked<T: Sample>(
    w: &mut BitWriter,
    data: &[T],
    mut from: usize,
    block: usize,
    scratch: &mut Vec<T>,
    prev_max: &mut u64,
    prev_bits: &mut u32,
) -> usize {
    let vb = (T::BITS / 8) as usize;
    let bits = T::BITS;
    if bits < 10 {
        w.push(8, 0b11100 | ((bits as u64 - 3) << 5));
    } else if bits < 17 {
        w.push(11, 0b11111100 | ((bits as u64 - 10) << 8));
    } else {
        w.push(17, 0b11111111100 | ((bits as u64 - 17) << 11));
    }
    *prev_max = T::MAX_FIELD;
    *prev_bits = bits + 1;
    loop {
        grow_for_block(w, data.len(), from, block, vb);
        let to = (from + block).min(data.len());
        scratch.clear();
        scratch.extend(data[from..to].iter().map(|v| v.wrapping_incr()));
        let max = block_max(scratch);
        if max < 7 {
            push_weak_block(w, scratch, max, prev_max);
            *prev_bits = BITS_SENTINEL;
        } else {
            push_strong_block(w, msb_u64(max), scratch, prev_bits);
            *prev_max = T::MAX_FIELD / 2;
        }
        if to == data.len() {
            return to;
        }
        let peek = &data[to..(to + block).min(data.len())];
        if block_max(peek) != T::MAX_FIELD {
            w.push(1, 0);
            return from;
        }
        w.push(1, 1);
        from = to;
    }
}

/// The 1/4/6/12-bit significant-bits header of the signed and unsigned
/// encodings: `1` repeats the previous width, otherwise `0` plus 3 bits
/// of width, escaping twice more for widths 7.. and 10..=64.
fn push_width_header(w: &mut BitWriter, prev: &mut u32, s: u32) {
    if *prev == s {
        w.push(1, 1);
    } else if s < 7 {
        w.push(4, (s as u64) << 1);
    } else if s < 10 {
        w.push(6, 0b1110 | ((s as u64 - 7) << 4));
    } else {
        w.push(12, 0b111110 | ((s as u64 - 10) << 6));
    }
    *prev = s;
}

/// Weak small-unsigned block, all values below 7. The header records the
/// block maximum as a delta against the previous one; the payload packs
/// the values one bit apiece (max 1), two bits apiece (max 3), or as
/// digits of a single base-`max+1` magnitude.
fn push_weak_block<T: Sample>(w: &mut BitWriter, values: &[T], max: u64, prev_max: &mut u64) {
    if *prev_max == 0 && max == 0 {
        w.push(1, 0b1);
    } else if *prev_max == max {
        w.push(2, 0b11);
    } else if prev_max.checked_add(1) == Some(max) {
        w.push(2, 0b10);
    } else if max != 6 && prev_max.checked_sub(1) == Some(max) {
        w.push(2, 0b01);
    } else if *prev_max == 6 && max == 4 {
        w.push(2, 0b10);
    } else {
        w.push(5, max << 2);
    }
    match max {
        0 => {}
        1 => w.push_seq(1, values),
        3 => w.push_seq(2, values),
        _ => {
            let base = (max + 1) as u128;
            let mut mult: u128 = 1;
            let mut compact: u128 = 0;
            for &v in values {
                compact += mult * v.as_unsigned() as u128;
                mult *= base;
            }
            w.push_wide(msb_u128(mult - 1), compact);
        }
    }
    *prev_max = max;
}

/// Strong small-unsigned block: a 2-to-17-bit width header delta-coded
/// against the previous strong block, then plain packed values.
fn push_strong_block<T: Sample>(w: &mut BitWriter, s: u32, values: &[T], prev_bits: &mut u32) {
    if *prev_bits == s {
        w.push(2, 0b11);
    } else if *prev_bits + 1 == s {
        w.push(2, 0b10);
    } else if prev_bits.checked_sub(1) == Some(s) {
        w.push(2, 0b01);
    } else if s < 10 {
        w.push(8, 0b11100 | ((s as u64 - 3) << 5));
    } else if s < 17 {
        w.push(11, 0b11111100 | ((s as u64 - 10) << 8));
    } else {
        w.push(17, 0b11111111100 | ((s as u64 - 17) << 11));
    }
    w.push_seq(s, values);
    *prev_bits = s;
}

fn block_max<T: Sample>(values: &[T]) -> u64 {
    values.iter().map(|v| v.as_unsigned()).max().unwrap_or(0)
}

/// Load-proportional growth: keep at least one block of headroom, and
/// when it runs out extrapolate the bytes written so far over the whole
/// frame.
fn grow_for_block(w: &mut BitWriter, size: usize, from: usize, block: usize, vb: usize) {
    let headroom = block * vb + 2;
    if w.bytes_written() + headroom > w.capacity() {
        let target = if from == 0 {
            0
        } else {
            (1.1 * w.capacity() as f64 * size as f64 / from as f64) as usize
        };
        w.grow(target.max(w.capacity() + headroom));
    }
}
