//! Scalar field codec, keyed by the closed `data_type` tag set.
//!
//! Each function is pure: given raw bytes (or a value) and a length, decode
//! or encode with no knowledge of schema structure or position. The
//! encoder is strict — any mismatch between value and declared length is
//! fatal, on the theory that the document is authoritative and failing
//! early beats emitting a malformed package.

use crate::error::{CodecError, FieldPath};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    Int,
    HexLe,
    HexBe,
    Uuid,
    Ascii,
    Utf8,
    Utf16,
    Utf16Le,
    Utf16Be,
    Timestamp,
}

impl DataType {
    /// Parses a `data_type` tag, including the spec-1.0.0 aliases
    /// (`hex`, `special_decode`, `string`, `utf-8/16/16le/16be`).
    pub fn parse(tag: &str) -> Option<Self> {
        Some(match tag {
            "int" => Self::Int,
            "hex-le" | "hex" | "special_decode" => Self::HexLe,
            "hex-be" => Self::HexBe,
            "UUID" => Self::Uuid,
            "ASCII" => Self::Ascii,
            "UTF8" | "utf-8" => Self::Utf8,
            "UTF16" | "utf-16" => Self::Utf16,
            "UTF16LE" | "utf-16le" => Self::Utf16Le,
            "UTF16BE" | "utf-16be" => Self::Utf16Be,
            "timestamp" => Self::Timestamp,
            "string" => Self::Ascii,
            _ => return None,
        })
    }
}

pub const TIMESTAMP_LEN: usize = 13;

pub fn decode_scalar(bytes: &[u8], ty: DataType, path: &FieldPath) -> Result<Value, CodecError> {
    match ty {
        DataType::Int => Ok(Value::Int(le_bytes_to_u64(bytes))),
        DataType::HexLe => Ok(Value::Text(hex_string(bytes, false))),
        DataType::HexBe => Ok(Value::Text(hex_string(bytes, true))),
        DataType::Uuid => Ok(Value::Text(hex_string(bytes, true))),
        DataType::Ascii => decode_text(bytes, path, |b| {
            std::str::from_utf8(b).map(str::to_owned)
        }),
        DataType::Utf8 => decode_text(bytes, path, |b| {
            std::str::from_utf8(b).map(str::to_owned)
        }),
        DataType::Utf16 | DataType::Utf16Le => decode_text(bytes, path, decode_utf16_le),
        DataType::Utf16Be => decode_text(bytes, path, decode_utf16_be),
        DataType::Timestamp => decode_timestamp(bytes, path).map(Value::Text),
    }
}

fn decode_text(
    bytes: &[u8],
    path: &FieldPath,
    f: impl Fn(&[u8]) -> Result<String, std::str::Utf8Error>,
) -> Result<Value, CodecError> {
    f(bytes)
        .map(Value::Text)
        .map_err(|e| CodecError::DecodeError {
            path: path.clone(),
            message: format!("invalid text encoding: {e}"),
        })
}

fn decode_utf16_le(bytes: &[u8]) -> Result<String, std::str::Utf8Error> {
    decode_utf16(bytes, u16::from_le_bytes)
}

fn decode_utf16_be(bytes: &[u8]) -> Result<String, std::str::Utf8Error> {
    decode_utf16(bytes, u16::from_be_bytes)
}

fn decode_utf16(bytes: &[u8], from_bytes: fn([u8; 2]) -> u16) -> Result<String, std::str::Utf8Error> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| from_bytes([c[0], c[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

pub fn encode_scalar(
    value: &Value,
    ty: DataType,
    length: usize,
    path: &FieldPath,
) -> Result<Vec<u8>, CodecError> {
    match ty {
        DataType::Int => {
            let n = value.as_u64().ok_or_else(|| schema_err(path, "expected integer"))?;
            encode_int_le(n, length, path)
        }
        DataType::HexLe => encode_hex(value, length, false, path),
        DataType::HexBe | DataType::Uuid => encode_hex(value, length, true, path),
        DataType::Ascii | DataType::Utf8 => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            Ok(s.as_bytes().to_vec())
        }
        DataType::Utf16 | DataType::Utf16Le => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            Ok(s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect())
        }
        DataType::Utf16Be => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            Ok(s.encode_utf16().flat_map(|u| u.to_be_bytes()).collect())
        }
        DataType::Timestamp => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            encode_timestamp(s, path)
        }
    }
}

/// Minimal byte count needed to encode `value` under `ty`, for scalar
/// fields whose declared `length` is the `remaining` sentinel — there is no
/// length to honor directly, so the encoder emits the value's natural size
/// and leaves any outer padding/truncation (e.g. a Vendor Defined region) to
/// the caller.
pub fn natural_length(value: &Value, ty: DataType, path: &FieldPath) -> Result<usize, CodecError> {
    match ty {
        DataType::Int => {
            let n = value.as_u64().ok_or_else(|| schema_err(path, "expected integer"))?;
            Ok(if n == 0 { 1 } else { (64 - n.leading_zeros() as usize).div_ceil(8) })
        }
        DataType::HexLe | DataType::HexBe | DataType::Uuid => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected hex string"))?;
            let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
            Ok(digits.len().div_ceil(2))
        }
        DataType::Ascii | DataType::Utf8 => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            Ok(s.len())
        }
        DataType::Utf16 | DataType::Utf16Le | DataType::Utf16Be => {
            let s = value.as_text().ok_or_else(|| schema_err(path, "expected text"))?;
            Ok(s.encode_utf16().count() * 2)
        }
        DataType::Timestamp => Ok(TIMESTAMP_LEN),
    }
}

fn schema_err(path: &FieldPath, message: &str) -> CodecError {
    CodecError::SchemaError {
        path: path.clone(),
        message: message.to_string(),
    }
}

fn encode_int_le(value: u64, length: usize, path: &FieldPath) -> Result<Vec<u8>, CodecError> {
    if length < 8 && value >= (1u64 << (length * 8)) {
        return Err(CodecError::SchemaError {
            path: path.clone(),
            message: format!("integer {value} overflows {length}-byte field"),
        });
    }
    let full = value.to_le_bytes();
    Ok(full[..length.min(8)].to_vec())
}

fn encode_hex(value: &Value, length: usize, big_endian: bool, path: &FieldPath) -> Result<Vec<u8>, CodecError> {
    let s = value.as_text().ok_or_else(|| schema_err(path, "expected hex string"))?;
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    let n = u128::from_str_radix(digits, 16).map_err(|e| CodecError::SchemaError {
        path: path.clone(),
        message: format!("invalid hex string `{s}`: {e}"),
    })?;
    let max = if length >= 16 { u128::MAX } else { (1u128 << (length * 8)) - 1 };
    if n > max {
        return Err(CodecError::SchemaError {
            path: path.clone(),
            message: format!("hex value `{s}` larger than {length} bytes"),
        });
    }
    let be = n.to_be_bytes();
    let mut bytes = be[be.len() - length..].to_vec();
    if !big_endian {
        bytes.reverse();
    }
    Ok(bytes)
}

fn le_bytes_to_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}

fn hex_string(bytes: &[u8], big_endian: bool) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    let value = if big_endian {
        bytes.iter().fold(0u128, |acc, b| (acc << 8) | *b as u128)
    } else {
        bytes
            .iter()
            .rev()
            .fold(0u128, |acc, b| (acc << 8) | *b as u128)
    };
    format!("0x{value:x}")
}

/// Decodes the 13-byte DSP0240 timestamp into
/// `YYYY-MM-DD HH:MM:SS:uuuuuu ±HHMM (0xRR)`.
pub fn decode_timestamp(bytes: &[u8], path: &FieldPath) -> Result<String, CodecError> {
    if bytes.len() != TIMESTAMP_LEN {
        return Err(CodecError::DecodeError {
            path: path.clone(),
            message: format!("timestamp must be {TIMESTAMP_LEN} bytes, got {}", bytes.len()),
        });
    }
    let utc_offset = i16::from_le_bytes([bytes[0], bytes[1]]);
    let microsecond = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], 0]);
    let second = bytes[5];
    let minute = bytes[6];
    let hour = bytes[7];
    let day = bytes[8];
    let month = bytes[9];
    let year = u16::from_le_bytes([bytes[10], bytes[11]]);
    let resolution = bytes[12];

    let sign = if utc_offset >= 0 { '+' } else { '-' };
    let offset_abs = utc_offset.unsigned_abs();

    Ok(format!(
        "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}:{microsecond:06} {sign}{offset_abs:04} (0x{resolution:02x})"
    ))
}

/// Inverse of [`decode_timestamp`]. A missing `(0xRR)` suffix defaults the
/// resolution byte to `0x00`.
pub fn encode_timestamp(text: &str, path: &FieldPath) -> Result<Vec<u8>, CodecError> {
    let err = || CodecError::DecodeError {
        path: path.clone(),
        message: format!("malformed timestamp `{text}`"),
    };

    let (main, resolution) = match text.rfind('(') {
        Some(idx) if text.trim_end().ends_with(')') => {
            let paren = &text[idx + 1..text.trim_end().len() - 1];
            let hex = paren.strip_prefix("0x").or_else(|| paren.strip_prefix("0X")).ok_or_else(err)?;
            let r = u8::from_str_radix(hex, 16).map_err(|_| err())?;
            (text[..idx].trim_end(), r)
        }
        _ => (text.trim_end(), 0u8),
    };

    let (datetime_part, offset_part) = main.rsplit_once(' ').ok_or_else(err)?;
    let sign = offset_part.chars().next().ok_or_else(err)?;
    if sign != '+' && sign != '-' {
        return Err(err());
    }
    let offset_abs: i16 = offset_part[1..].parse().map_err(|_| err())?;
    let utc_offset: i16 = if sign == '-' { -offset_abs } else { offset_abs };

    let mut date_time = datetime_part.splitn(2, ' ');
    let date = date_time.next().ok_or_else(err)?;
    let time = date_time.next().ok_or_else(err)?;

    let mut date_parts = date.splitn(3, '-');
    let year: u16 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let month: u8 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let day: u8 = date_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;

    let mut time_parts = time.splitn(4, ':');
    let hour: u8 = time_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let minute: u8 = time_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let second: u8 = time_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
    let microsecond: u32 = time_parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;

    let mut out = Vec::with_capacity(TIMESTAMP_LEN);
    out.extend_from_slice(&utc_offset.to_le_bytes());
    out.extend_from_slice(&microsecond.to_le_bytes()[..3]);
    out.push(second);
    out.push(minute);
    out.push(hour);
    out.push(day);
    out.push(month);
    out.extend_from_slice(&year.to_le_bytes());
    out.push(resolution);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips() {
        // Worked example bytes from the scenario catalog (S6).
        let bytes: [u8; 13] = [0xe0, 0x01, 0x40, 0x42, 0x0f, 0x1e, 0x0f, 0x0a, 0x0f, 0x01, 0xe7, 0x07, 0x06];
        let path = FieldPath::default();
        let text = decode_timestamp(&bytes, &path).unwrap();
        assert!(text.starts_with("2023-01-15 10:15:30:1000000 +0480 (0x06)"));
        let back = encode_timestamp(&text, &path).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn timestamp_missing_resolution_defaults_to_zero() {
        let path = FieldPath::default();
        let back = encode_timestamp("2023-01-15 10:15:30:000000 +0000", &path).unwrap();
        assert_eq!(back[12], 0x00);
    }

    #[test]
    fn hex_le_round_trips() {
        let path = FieldPath::default();
        let v = decode_scalar(&[0x34, 0x12], DataType::HexLe, &path).unwrap();
        assert_eq!(v.as_text(), Some("0x1234"));
        let back = encode_scalar(&v, DataType::HexLe, 2, &path).unwrap();
        assert_eq!(back, vec![0x34, 0x12]);
    }

    #[test]
    fn uuid_round_trips_big_endian() {
        let path = FieldPath::default();
        let bytes: Vec<u8> = (0u8..16).collect();
        let v = decode_scalar(&bytes, DataType::Uuid, &path).unwrap();
        let back = encode_scalar(&v, DataType::Uuid, 16, &path).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn natural_length_matches_hex_digit_count() {
        let path = FieldPath::default();
        let v = Value::Text("0xdeadbeef01".into());
        assert_eq!(natural_length(&v, DataType::HexLe, &path).unwrap(), 5);
    }

    #[test]
    fn int_overflow_is_fatal() {
        let path = FieldPath::default();
        assert!(encode_int_le(256, 1, &path).is_err());
    }
}
