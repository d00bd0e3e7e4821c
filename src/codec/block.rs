//! Fixed-size packed integer blocks.
//!
//! A block is 128 non-negative integers encoded as one width byte followed
//! by the values bit-packed at that width, spanning byte boundaries with no
//! per-value padding. Width 0 means all values are zero and writes no value
//! bytes. Because 128 is a multiple of 8, a packed block always occupies
//! exactly `16 * width` bytes after the width byte, which is what makes
//! skip-without-decode possible.

use crate::codec::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::store::{IndexInput, IndexOutput};

/// Number of bits needed to represent `max_val`.
#[inline]
pub fn bits_required(max_val: u32) -> u8 {
    if max_val == 0 {
        0
    } else {
        (32 - max_val.leading_zeros()) as u8
    }
}

/// Packed byte length of one block at the given width (excluding the width
/// byte).
#[inline]
pub fn packed_len(width: u8) -> usize {
    BLOCK_SIZE / 8 * width as usize
}

/// Bit-pack `values` at `width` bits each into `out`.
pub fn pack(values: &[u32; BLOCK_SIZE], width: u8, out: &mut Vec<u8>) {
    if width == 0 {
        return;
    }
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    for &v in values {
        debug_assert!(width == 32 || v < (1u32 << width));
        acc |= (v as u64) << bits;
        bits += width as u32;
        while bits >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    debug_assert_eq!(bits, 0);
}

/// Inverse of [`pack`].
pub fn unpack(input: &[u8], width: u8, out: &mut [u32; BLOCK_SIZE]) {
    if width == 0 {
        out.fill(0);
        return;
    }
    let mask: u64 = if width == 32 {
        u32::MAX as u64
    } else {
        (1u64 << width) - 1
    };
    let mut acc: u64 = 0;
    let mut bits: u32 = 0;
    let mut next = 0usize;
    for slot in out.iter_mut() {
        while bits < width as u32 {
            acc |= (input[next] as u64) << bits;
            next += 1;
            bits += 8;
        }
        *slot = (acc & mask) as u32;
        acc >>= width;
        bits -= width as u32;
    }
}

/// Encode one block to the stream: width byte, then packed values.
///
/// `scratch` is reused across calls to avoid reallocating the pack buffer.
pub fn write_block(
    out: &mut IndexOutput,
    values: &[u32; BLOCK_SIZE],
    scratch: &mut Vec<u8>,
) -> Result<()> {
    let max = values.iter().copied().max().unwrap_or(0);
    let width = bits_required(max);
    out.write_u8(width)?;
    if width > 0 {
        scratch.clear();
        pack(values, width, scratch);
        out.write_bytes(scratch)?;
    }
    Ok(())
}

fn read_width(input: &mut IndexInput) -> Result<u8> {
    let width = input.read_u8()?;
    if width > 32 {
        return Err(Error::CorruptIndex(format!(
            "packed block width {width} out of range (0..=32)"
        )));
    }
    Ok(width)
}

/// Decode one block from the stream into `values`.
pub fn read_block(input: &mut IndexInput, values: &mut [u32; BLOCK_SIZE]) -> Result<()> {
    let width = read_width(input)?;
    if width == 0 {
        values.fill(0);
        return Ok(());
    }
    let mut packed = [0u8; BLOCK_SIZE / 8 * 32];
    let len = packed_len(width);
    input.read_bytes(&mut packed[..len])?;
    unpack(&packed[..len], width, values);
    Ok(())
}

/// Seek past one block without materializing its values.
pub fn skip_block(input: &mut IndexInput) -> Result<()> {
    let width = read_width(input)?;
    input.skip(packed_len(width) as u64);
    Ok(())
}
