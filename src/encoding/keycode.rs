//! Order-preserving encodings for key segments.
//!
//! Every function here keeps the lexicographic order of the encoded bytes equal
//! to the natural order of the input, so range scans over encoded keys visit
//! entries in logical order.

use byteorder::{BigEndian, ByteOrder};

use super::EncodingError;
use crate::error::Result;

const ESCAPE: u8 = 0x00;
const ESCAPED_NULL: u8 = 0xFF;
const TERMINATOR: u8 = 0x00;

/// Append `bytes` to `out` with null bytes escaped and a two byte terminator.
///
/// The result is prefix-free: no escaped value is a prefix of another, which
/// lets a variable-length segment be followed by more key material.
pub fn escape_into(out: &mut Vec<u8>, bytes: &[u8]) {
    for &byte in bytes {
        if byte == ESCAPE {
            out.extend_from_slice(&[ESCAPE, ESCAPED_NULL]);
        } else {
            out.push(byte);
        }
    }
    out.extend_from_slice(&[ESCAPE, TERMINATOR]);
}

/// Decode one escaped segment, returning it together with the remaining input.
pub fn unescape(bytes: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != ESCAPE {
            result.push(bytes[i]);
            i += 1;
            continue;
        }

        match bytes.get(i + 1) {
            Some(&ESCAPED_NULL) => {
                result.push(ESCAPE);
                i += 2;
            }
            Some(&TERMINATOR) => return Ok((result, &bytes[i + 2..])),
            Some(_) => {
                return Err(
                    EncodingError::InvalidFormat("Invalid null byte escape".to_string()).into(),
                )
            }
            None => return Err(EncodingError::TruncatedData.into()),
        }
    }

    Err(EncodingError::TruncatedData.into())
}

/// Encode an unsigned integer as 8 big-endian bytes
pub fn encode_u64(value: u64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, value);
    buf
}

/// Decode an unsigned integer, returning the remaining input
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(EncodingError::TruncatedData.into());
    }
    Ok((BigEndian::read_u64(&bytes[..8]), &bytes[8..]))
}

/// Encode a signed integer with order preservation
pub fn encode_i64(value: i64) -> [u8; 8] {
    // Flip the sign bit so negative numbers sort before positive
    encode_u64((value as u64) ^ (1u64 << 63))
}

/// Decode a signed integer, returning the remaining input
pub fn decode_i64(bytes: &[u8]) -> Result<(i64, &[u8])> {
    let (unsigned, rest) = decode_u64(bytes)?;
    Ok(((unsigned ^ (1u64 << 63)) as i64, rest))
}

/// Encode a float with order preservation
pub fn encode_f64(value: f64) -> [u8; 8] {
    let bits = value.to_bits();

    // Negative values flip every bit, positive values only the sign bit
    let ordered = if bits & (1u64 << 63) != 0 {
        !bits
    } else {
        bits | (1u64 << 63)
    };
    encode_u64(ordered)
}

/// Decode a float, returning the remaining input
pub fn decode_f64(bytes: &[u8]) -> Result<(f64, &[u8])> {
    let (ordered, rest) = decode_u64(bytes)?;
    let bits = if ordered & (1u64 << 63) != 0 {
        ordered & !(1u64 << 63)
    } else {
        !ordered
    };
    Ok((f64::from_bits(bits), rest))
}

/// Smallest key strictly greater than every key starting with `prefix`.
///
/// Returns `None` when the prefix is all `0xFF`, meaning the range is unbounded.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    prefix.iter().rposition(|b| *b != 0xff).map(|i| {
        prefix[..i]
            .iter()
            .chain(std::iter::once(&(prefix[i] + 1)))
            .copied()
            .collect()
    })
}

/// Smallest key strictly greater than `key`.
pub fn successor(key: &[u8]) -> Vec<u8> {
    let mut next = Vec::with_capacity(key.len() + 1);
    next.extend_from_slice(key);
    next.push(0x00);
    next
}
