//! Binary codec utilities
//!
//! Pure helpers for fixed-point scaling and 16/32-bit packing shared by the
//! vendor adapters. Nothing here knows about a particular device; vendor
//! modules decide byte order, offsets and scale factors.
//!
//! Scaling always rounds to the nearest integer (`f64::round`, half away from
//! zero) and refuses values that do not fit the target field instead of
//! wrapping them.

use crate::error::CodecError;

/// Scale `value` by `scale`, round, and check it fits `min..=max`
pub fn to_fixed(
    field: &'static str,
    value: f64,
    scale: f64,
    min: i64,
    max: i64,
) -> Result<i64, CodecError> {
    if !value.is_finite() {
        return Err(CodecError::NotFinite { field });
    }
    let scaled = (value * scale).round();
    if scaled < min as f64 || scaled > max as f64 {
        return Err(CodecError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(scaled as i64)
}

/// Fixed-point encode into an unsigned 16-bit field
pub fn scaled_u16(field: &'static str, value: f64, scale: f64) -> Result<u16, CodecError> {
    to_fixed(field, value, scale, 0, u16::MAX as i64).map(|v| v as u16)
}

/// Fixed-point encode into an unsigned 16-bit field that must not be 0
///
/// Frequencies use this: a positive input that rounds to 0 is refused.
pub fn scaled_u16_nonzero(field: &'static str, value: f64, scale: f64) -> Result<u16, CodecError> {
    to_fixed(field, value, scale, 1, u16::MAX as i64).map(|v| v as u16)
}

/// Fixed-point encode into a signed 16-bit field
pub fn scaled_i16(field: &'static str, value: f64, scale: f64) -> Result<i16, CodecError> {
    to_fixed(field, value, scale, i16::MIN as i64, i16::MAX as i64).map(|v| v as i16)
}

/// Read an unsigned 16-bit big-endian value at `offset`
pub fn read_u16_be(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a signed 16-bit big-endian value at `offset`
pub fn read_i16_be(data: &[u8], offset: usize) -> Option<i16> {
    read_u16_be(data, offset).map(|v| v as i16)
}

/// Read an unsigned 16-bit little-endian value at `offset`
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read a signed 16-bit little-endian value at `offset`
pub fn read_i16_le(data: &[u8], offset: usize) -> Option<i16> {
    read_u16_le(data, offset).map(|v| v as i16)
}

/// Sign-extend a 16-bit field that sits in the upper half of a 32-bit word
///
/// Computes `((hi << 24) | (lo << 16)) >> 16` with a 32-bit signed
/// arithmetic shift. The result always lies in `i16::MIN..=i16::MAX`.
pub fn sign_extend_upper16(hi: u8, lo: u8) -> i32 {
    let word = ((hi as u32) << 24) | ((lo as u32) << 16);
    (word as i32) >> 16
}

/// Write consecutive 32-bit little-endian words starting at `offset`
///
/// Words that would run past the end of `buf` are dropped.
pub fn put_u32_words_le(buf: &mut [u8], offset: usize, words: &[i32]) {
    for (i, word) in words.iter().enumerate() {
        let start = offset + i * 4;
        if let Some(slot) = buf.get_mut(start..start + 4) {
            slot.copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// Space-separated hex rendering of a frame, for trace logs
pub fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
