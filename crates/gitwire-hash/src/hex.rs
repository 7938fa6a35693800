//! Hex encoding/decoding for object ids as they appear on the wire.
//!
//! Writes are always lower-case; reads accept either case, which the
//! pkt-line length parser and OID parser both rely on.

use crate::HashError;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Decode one ASCII hex digit, accepting both cases.
#[inline]
fn nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Hex-encode `bytes` into `buf`, lower-case.
///
/// # Panics
///
/// Panics if `buf` is shorter than `bytes.len() * 2`.
pub fn hex_encode(bytes: &[u8], buf: &mut [u8]) {
    assert!(buf.len() >= bytes.len() * 2, "hex_encode: buffer too short");
    for (i, &b) in bytes.iter().enumerate() {
        buf[i * 2] = HEX_DIGITS[(b >> 4) as usize];
        buf[i * 2 + 1] = HEX_DIGITS[(b & 0x0f) as usize];
    }
}

/// Hex-encode `bytes` to a new lower-case `String`.
pub fn hex_to_string(bytes: &[u8]) -> String {
    let mut buf = vec![0u8; bytes.len() * 2];
    hex_encode(bytes, &mut buf);
    // Only ASCII hex digits were written.
    String::from_utf8(buf).expect("hex output is ASCII")
}

/// Decode a hex string into `buf`. The input length must be exactly
/// `buf.len() * 2`; both upper- and lower-case digits are accepted.
pub fn hex_decode(hex: &[u8], buf: &mut [u8]) -> Result<(), HashError> {
    if hex.len() != buf.len() * 2 {
        return Err(HashError::InvalidHexLength {
            expected: buf.len() * 2,
            actual: hex.len(),
        });
    }
    for (i, out) in buf.iter_mut().enumerate() {
        let hi = nibble(hex[i * 2]).ok_or(HashError::InvalidHex {
            position: i * 2,
            character: hex[i * 2] as char,
        })?;
        let lo = nibble(hex[i * 2 + 1]).ok_or(HashError::InvalidHex {
            position: i * 2 + 1,
            character: hex[i * 2 + 1] as char,
        })?;
        *out = (hi << 4) | lo;
    }
    Ok(())
}
