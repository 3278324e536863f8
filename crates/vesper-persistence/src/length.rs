//! RDB length encoding and the string/double special encodings (spec §4.6).
//!
//! Four length forms, selected by the top two bits of the first byte:
//! `00` 6-bit length, `01` 14-bit length, `10` 32-bit big-endian length,
//! `11` a "special" encoding (signed int8/16/32, or an LZF-compressed
//! string). This module is the single place both the RDB snapshot writer
//! and the VM swap-file value codec (`vesper-vm`) go through, per spec
//! §4.9's note that swap-in reuses `rdbLoadObject`.

use crate::error::{PersistenceError, Result};

const SPECIAL_INT8: u8 = 0;
const SPECIAL_INT16: u8 = 1;
const SPECIAL_INT32: u8 = 2;
const SPECIAL_LZF: u8 = 3;

/// What a decoded length byte turned out to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedLength {
    Len(u64),
    Special(u8),
}

pub fn encode_length(n: u64, out: &mut Vec<u8>) {
    if n < (1 << 6) {
        out.push(n as u8);
    } else if n < (1 << 14) {
        out.push(0b0100_0000 | ((n >> 8) as u8));
        out.push((n & 0xFF) as u8);
    } else if n <= u32::MAX as u64 {
        out.push(0b1000_0000);
        out.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        panic!("RDB length {n} exceeds 32-bit encoding");
    }
}

pub fn encode_special(selector: u8, out: &mut Vec<u8>) {
    out.push(0b1100_0000 | selector);
}

pub fn decode_length(buf: &[u8], pos: &mut usize) -> Result<DecodedLength> {
    let first = *buf
        .get(*pos)
        .ok_or_else(|| PersistenceError::CorruptRdb("truncated length byte".into()))?;
    *pos += 1;
    match first >> 6 {
        0b00 => Ok(DecodedLength::Len(u64::from(first & 0x3F))),
        0b01 => {
            let low = *buf
                .get(*pos)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated 14-bit length".into()))?;
            *pos += 1;
            Ok(DecodedLength::Len((u64::from(first & 0x3F) << 8) | u64::from(low)))
        }
        0b10 => {
            let bytes = buf
                .get(*pos..*pos + 4)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated 32-bit length".into()))?;
            *pos += 4;
            let n = u32::from_be_bytes(bytes.try_into().unwrap());
            Ok(DecodedLength::Len(u64::from(n)))
        }
        _ => Ok(DecodedLength::Special(first & 0x3F)),
    }
}

/// Encodes a byte string, choosing the smallest applicable form: a
/// canonical-decimal integer in one of the three signed-int specials, an
/// LZF-style (here: `lz4_flex`, see DESIGN.md) compressed special when
/// `compress` is enabled and compression actually shrinks it, or a plain
/// length-prefixed byte run otherwise.
pub fn encode_string(bytes: &[u8], compress: bool, out: &mut Vec<u8>) {
    if let Some(n) = canonical_i64(bytes) {
        if let Ok(i8v) = i8::try_from(n) {
            encode_special(SPECIAL_INT8, out);
            out.push(i8v as u8);
            return;
        }
        if let Ok(i16v) = i16::try_from(n) {
            encode_special(SPECIAL_INT16, out);
            out.extend_from_slice(&i16v.to_le_bytes());
            return;
        }
        if let Ok(i32v) = i32::try_from(n) {
            encode_special(SPECIAL_INT32, out);
            out.extend_from_slice(&i32v.to_le_bytes());
            return;
        }
    }
    if compress && bytes.len() > 20 {
        let compressed = lz4_flex::compress(bytes);
        if compressed.len() < bytes.len() {
            encode_special(SPECIAL_LZF, out);
            encode_length(compressed.len() as u64, out);
            encode_length(bytes.len() as u64, out);
            out.extend_from_slice(&compressed);
            return;
        }
    }
    encode_length(bytes.len() as u64, out);
    out.extend_from_slice(bytes);
}

pub fn decode_string(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>> {
    match decode_length(buf, pos)? {
        DecodedLength::Len(len) => {
            let len = len as usize;
            let data = buf
                .get(*pos..*pos + len)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated string body".into()))?;
            *pos += len;
            Ok(data.to_vec())
        }
        DecodedLength::Special(SPECIAL_INT8) => {
            let b = *buf
                .get(*pos)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated int8".into()))?;
            *pos += 1;
            Ok((b as i8).to_string().into_bytes())
        }
        DecodedLength::Special(SPECIAL_INT16) => {
            let bytes = buf
                .get(*pos..*pos + 2)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated int16".into()))?;
            *pos += 2;
            let n = i16::from_le_bytes(bytes.try_into().unwrap());
            Ok(n.to_string().into_bytes())
        }
        DecodedLength::Special(SPECIAL_INT32) => {
            let bytes = buf
                .get(*pos..*pos + 4)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated int32".into()))?;
            *pos += 4;
            let n = i32::from_le_bytes(bytes.try_into().unwrap());
            Ok(n.to_string().into_bytes())
        }
        DecodedLength::Special(SPECIAL_LZF) => {
            let DecodedLength::Len(clen) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("expected compressed length".into()));
            };
            let DecodedLength::Len(ulen) = decode_length(buf, pos)? else {
                return Err(PersistenceError::CorruptRdb("expected uncompressed length".into()));
            };
            let compressed = buf
                .get(*pos..*pos + clen as usize)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated compressed string".into()))?;
            *pos += clen as usize;
            let decompressed = lz4_flex::decompress(compressed, ulen as usize)
                .map_err(|e| PersistenceError::Compression(e.to_string()))?;
            Ok(decompressed)
        }
        DecodedLength::Special(other) => {
            Err(PersistenceError::CorruptRdb(format!("unknown special encoding {other}")))
        }
    }
}

/// Sentinels for the 8-bit-prefixed double encoding (spec §4.6: ZSET
/// scores).
const DOUBLE_NAN: u8 = 253;
const DOUBLE_POS_INF: u8 = 254;
const DOUBLE_NEG_INF: u8 = 255;

pub fn encode_double(value: f64, out: &mut Vec<u8>) {
    if value.is_nan() {
        out.push(DOUBLE_NAN);
    } else if value == f64::INFINITY {
        out.push(DOUBLE_POS_INF);
    } else if value == f64::NEG_INFINITY {
        out.push(DOUBLE_NEG_INF);
    } else {
        let rendered = format!("{value:.17}");
        let rendered = trim_decimal(&rendered);
        out.push(rendered.len() as u8);
        out.extend_from_slice(rendered.as_bytes());
    }
}

fn trim_decimal(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() }
}

pub fn decode_double(buf: &[u8], pos: &mut usize) -> Result<f64> {
    let len = *buf
        .get(*pos)
        .ok_or_else(|| PersistenceError::CorruptRdb("truncated double length".into()))?;
    *pos += 1;
    match len {
        DOUBLE_NAN => Ok(f64::NAN),
        DOUBLE_POS_INF => Ok(f64::INFINITY),
        DOUBLE_NEG_INF => Ok(f64::NEG_INFINITY),
        len => {
            let bytes = buf
                .get(*pos..*pos + len as usize)
                .ok_or_else(|| PersistenceError::CorruptRdb("truncated double body".into()))?;
            *pos += len as usize;
            let s = std::str::from_utf8(bytes)
                .map_err(|_| PersistenceError::CorruptRdb("non-utf8 double".into()))?;
            s.parse()
                .map_err(|_| PersistenceError::CorruptRdb(format!("bad double literal: {s}")))
        }
    }
}

fn canonical_i64(bytes: &[u8]) -> Option<i64> {
    let s = std::str::from_utf8(bytes).ok()?;
    let n: i64 = s.parse().ok()?;
    if n.to_string() == s { Some(n) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_round_trips_all_three_forms() {
        for n in [0u64, 63, 64, 16383, 16384, 70_000, u32::MAX as u64] {
            let mut out = Vec::new();
            encode_length(n, &mut out);
            let mut pos = 0;
            assert_eq!(decode_length(&out, &mut pos).unwrap(), DecodedLength::Len(n));
            assert_eq!(pos, out.len());
        }
    }

    #[test]
    fn string_int_specials_round_trip() {
        for s in ["0", "-1", "127", "-128", "32000", "-32000", "2000000000", "-2000000000"] {
            let mut out = Vec::new();
            encode_string(s.as_bytes(), false, &mut out);
            let mut pos = 0;
            assert_eq!(decode_string(&out, &mut pos).unwrap(), s.as_bytes());
        }
    }

    #[test]
    fn string_non_numeric_round_trips_raw() {
        let mut out = Vec::new();
        encode_string(b"hello world", false, &mut out);
        let mut pos = 0;
        assert_eq!(decode_string(&out, &mut pos).unwrap(), b"hello world");
    }

    #[test]
    fn string_compression_round_trips() {
        let data = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let mut out = Vec::new();
        encode_string(data, true, &mut out);
        let mut pos = 0;
        assert_eq!(decode_string(&out, &mut pos).unwrap(), data);
    }

    #[test]
    fn double_sentinels_round_trip() {
        for v in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 0.0, -1.5, 3.0] {
            let mut out = Vec::new();
            encode_double(v, &mut out);
            let mut pos = 0;
            let decoded = decode_double(&out, &mut pos).unwrap();
            if v.is_nan() {
                assert!(decoded.is_nan());
            } else {
                assert_eq!(decoded, v);
            }
        }
    }
}
