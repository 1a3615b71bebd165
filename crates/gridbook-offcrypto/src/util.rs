//! Byte-cursor and small decoding helpers shared by both header decoders.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::OffcryptoError;

/// Bounds-checked little-endian cursor over a borrowed byte buffer.
///
/// Every read validates against the remaining length first and fails with
/// [`OffcryptoError::CorruptHeader`] instead of slicing out of range.
pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub(crate) fn take(&mut self, n: usize, context: &'static str) -> Result<&'a [u8], OffcryptoError> {
        let end = self.pos.saturating_add(n);
        if end > self.bytes.len() {
            return Err(OffcryptoError::CorruptHeader { context });
        }
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn read_u16_le(&mut self, context: &'static str) -> Result<u16, OffcryptoError> {
        let b = self.take(2, context)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_u32_le(&mut self, context: &'static str) -> Result<u32, OffcryptoError> {
        let b = self.take(4, context)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn read_u64_le(&mut self, context: &'static str) -> Result<u64, OffcryptoError> {
        let b = self.take(8, context)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }
}

/// Decode a UTF-16LE string field, stopping at the first NUL code unit.
pub(crate) fn decode_utf16le(bytes: &[u8], context: &'static str) -> Result<String, OffcryptoError> {
    if bytes.len() % 2 != 0 {
        return Err(OffcryptoError::CorruptHeader { context });
    }

    let mut code_units: Vec<u16> = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        code_units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
    }

    let end = code_units
        .iter()
        .position(|u| *u == 0)
        .unwrap_or(code_units.len());

    String::from_utf16(&code_units[..end]).map_err(|_| OffcryptoError::CorruptHeader { context })
}

/// Encode a password the way every MS-OFFCRYPTO hash step consumes it: UTF-16LE code units,
/// no terminator.
pub(crate) fn password_to_utf16le_bytes(password: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(password.len() * 2);
    for unit in password.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Decode a base64 XML attribute value.
///
/// Some producers pretty-print the `EncryptionInfo` XML and may insert whitespace into long
/// base64 attribute values; some omit `=` padding. Be permissive about both.
pub(crate) fn decode_base64_attr(value: &[u8]) -> Result<Vec<u8>, OffcryptoError> {
    let is_ws = |b: u8| matches!(b, b'\r' | b'\n' | b'\t' | b' ');

    // Avoid allocating in the common case where there is no whitespace.
    let cleaned: Option<Vec<u8>> = if value.iter().any(|b| is_ws(*b)) {
        Some(value.iter().copied().filter(|b| !is_ws(*b)).collect())
    } else {
        None
    };
    let input = cleaned.as_deref().unwrap_or(value);

    STANDARD
        .decode(input)
        .or_else(|_| STANDARD_NO_PAD.decode(input))
        .map_err(|_| OffcryptoError::CorruptHeader {
            context: "invalid base64 attribute value",
        })
}

pub(crate) fn parse_decimal_u32(
    value: &[u8],
    context: &'static str,
) -> Result<u32, OffcryptoError> {
    let s = std::str::from_utf8(value).map_err(|_| OffcryptoError::CorruptHeader { context })?;
    s.trim()
        .parse::<u32>()
        .map_err(|_| OffcryptoError::CorruptHeader { context })
}

pub(crate) fn parse_decimal_usize(
    value: &[u8],
    context: &'static str,
) -> Result<usize, OffcryptoError> {
    let s = std::str::from_utf8(value).map_err(|_| OffcryptoError::CorruptHeader { context })?;
    s.trim()
        .parse::<usize>()
        .map_err(|_| OffcryptoError::CorruptHeader { context })
}

/// Constant-time byte comparison for verifier/HMAC digests.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_padded() {
        assert_eq!(decode_base64_attr(b"AQIDBA==").expect("decode"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn base64_unpadded() {
        assert_eq!(decode_base64_attr(b"AQIDBA").expect("decode"), vec![1, 2, 3, 4]);
    }

    #[test]
    fn base64_embedded_whitespace() {
        assert_eq!(
            decode_base64_attr(b"A QID\r\nBA==\t").expect("decode"),
            vec![1, 2, 3, 4]
        );
    }

    #[test]
    fn utf16le_trims_at_first_nul() {
        let mut bytes = Vec::new();
        for cu in "abc".encode_utf16() {
            bytes.extend_from_slice(&cu.to_le_bytes());
        }
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&0x41u16.to_le_bytes()); // after the terminator, ignored
        assert_eq!(decode_utf16le(&bytes, "test").expect("decode"), "abc");
    }

    #[test]
    fn utf16le_odd_length_is_corrupt() {
        let err = decode_utf16le(&[0x41], "test").unwrap_err();
        assert!(matches!(err, OffcryptoError::CorruptHeader { .. }));
    }

    #[test]
    fn reader_take_past_end_is_corrupt() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert_eq!(r.take(2, "x").expect("take"), &[1, 2]);
        let err = r.take(2, "x").unwrap_err();
        assert!(matches!(err, OffcryptoError::CorruptHeader { .. }));
    }

    #[test]
    fn ct_eq_differing_lengths() {
        assert!(!ct_eq(b"abc", b"abcd"));
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
    }
}
