//! Per field-type decoding (C4): turns a field descriptor plus its raw
//! record bytes into a typed [`Value`].

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::codepage::CodePage;
use crate::error::{DbfResult, Error};
use crate::fields::{FieldDescriptor, FieldType};
use crate::memo::MemoPayload;

/// A memo value, decoded to the extent its tag allows: text memos are run
/// through the table's code page, picture/object/binary memos are kept raw.
#[derive(Debug, Clone)]
pub enum MemoValue {
    Text(String),
    Picture(Vec<u8>),
    Object(Vec<u8>),
    Binary(Vec<u8>),
}

/// A fixed-point decimal, kept as a scaled mantissa plus its number of
/// fractional digits. Backs `Numeric`, `Float`, and `Currency` values.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Decimal {
    pub mantissa: i64,
    pub exponent: u32,
}

impl Decimal {
    /// The integral portion of the value (before the decimal point).
    pub fn integral(&self) -> i64 {
        self.mantissa / 10_i64.pow(self.exponent)
    }

    /// The fractional portion of the value (after the decimal point),
    /// always non-negative.
    pub fn fractional(&self) -> u64 {
        let scale = 10_i64.pow(self.exponent);
        if self.mantissa >= 0 {
            (self.mantissa % scale) as u64
        } else {
            (-self.mantissa % scale) as u64
        }
    }

    /// Convert to `f64`, possibly losing precision.
    pub fn to_f64_lossy(&self) -> f64 {
        self.mantissa as f64 / 10_i64.pow(self.exponent) as f64
    }
}

impl Display for Decimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.exponent == 0 {
            return write!(f, "{}", self.mantissa);
        }
        write!(f, "{}.{:0width$}", self.integral(), self.fractional(), width = self.exponent as usize)
    }
}

/// A decoded field value. `Invalid` is the in-band sentinel used in place of
/// raising when the reader was not constructed with `validate_fields(true)`.
#[derive(Debug, Clone)]
pub enum Value {
    Character(String),
    Numeric(Option<Decimal>),
    Float(Option<f64>),
    Date(Option<NaiveDate>),
    Logical(Option<bool>),
    Integer(i32),
    Currency(Option<Decimal>),
    Double(f64),
    Timestamp(Option<NaiveDateTime>),
    Memo(Option<MemoValue>),
    Varchar(String),
    /// Picture, General, Autoincrement, and any unrecognized type tag.
    Bytes(Vec<u8>),
    /// Parse failure, carrying the raw bytes and a human-readable reason.
    Invalid(Vec<u8>, String),
}

impl Value {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Value::Invalid(..))
    }
}

/// Options that affect field decoding; a subset of the reader's full option
/// set (see `crate::reader::ReaderOptions`).
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub trim_strings: bool,
    pub validate_fields: bool,
    pub character_decode_fallback: Option<char>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            trim_strings: true,
            validate_fields: false,
            character_decode_fallback: None,
        }
    }
}

/// Anything that can resolve a memo block index to its payload. Implemented
/// by every member of the memo backend family (C5).
pub trait MemoSource {
    fn lookup(&self, index: u32) -> DbfResult<Option<MemoPayload>>;
}

fn strip_nuls(s: &str) -> &str {
    s.trim_end_matches('\0')
}

fn ascii_trim(bytes: &[u8]) -> &[u8] {
    let mut start = 0;
    let mut end = bytes.len();
    while start < end && bytes[start] == b' ' {
        start += 1;
    }
    while end > start && bytes[end - 1] == b' ' {
        end -= 1;
    }
    &bytes[start..end]
}

fn decode_character(raw: &[u8], codepage: &CodePage, opts: &DecodeOptions) -> String {
    let decoded = codepage.decode(raw, opts.character_decode_fallback);
    let decoded = strip_nuls(&decoded);
    if opts.trim_strings {
        decoded.trim_end_matches(' ').to_string()
    } else {
        decoded.to_string()
    }
}

fn numeric_text(raw: &[u8]) -> Option<&str> {
    let trimmed = std::str::from_utf8(ascii_trim(raw)).ok()?.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '*') {
        return None;
    }
    Some(trimmed)
}

fn parse_decimal(text: &str) -> Result<Decimal, String> {
    let lower = text.to_ascii_lowercase();
    if lower.contains("nan") || lower.contains("inf") {
        return Err(format!("non-numeric value {text:?}"));
    }
    match text.split_once('.') {
        None => {
            let mantissa = i64::from_str(text).map_err(|e| e.to_string())?;
            Ok(Decimal { mantissa, exponent: 0 })
        }
        Some((int_part, frac_part)) => {
            let exponent = frac_part.len() as u32;
            let sign = if int_part.starts_with('-') { -1 } else { 1 };
            let int_val: i64 = if int_part.is_empty() || int_part == "-" {
                0
            } else {
                i64::from_str(int_part).map_err(|e| e.to_string())?
            };
            let frac_val: i64 = if frac_part.is_empty() {
                0
            } else {
                i64::from_str(frac_part).map_err(|e| e.to_string())?
            };
            let scale = 10_i64.checked_pow(exponent).ok_or_else(|| "exponent too large".to_string())?;
            let mantissa = int_val * scale + sign * frac_val;
            Ok(Decimal { mantissa, exponent })
        }
    }
}

fn parse_numeric(raw: &[u8]) -> Result<Option<Decimal>, String> {
    match numeric_text(raw) {
        None => Ok(None),
        Some(text) => parse_decimal(text).map(Some),
    }
}

fn parse_float(raw: &[u8]) -> Result<Option<f64>, String> {
    match numeric_text(raw) {
        None => Ok(None),
        Some(text) => {
            let v: f64 = text.parse().map_err(|e: std::num::ParseFloatError| e.to_string())?;
            if !v.is_finite() {
                return Err(format!("non-finite float value {text:?}"));
            }
            Ok(Some(v))
        }
    }
}

fn parse_date(raw: &[u8]) -> Result<Option<NaiveDate>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;
    if text.chars().all(|c| c == ' ') || text.chars().all(|c| c == '0') {
        return Ok(None);
    }
    if text.len() != 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("date {text:?} is not 8 ASCII digits"));
    }
    let year: i32 = text[0..4].parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    let month: u32 = text[4..6].parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    let day: u32 = text[6..8].parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
    NaiveDate::from_ymd_opt(year, month, day)
        .map(Some)
        .ok_or_else(|| format!("invalid calendar date {year:04}-{month:02}-{day:02}"))
}

fn parse_logical(raw: &[u8]) -> Result<Option<bool>, String> {
    if raw.len() != 1 {
        return Err(format!("logical field must be 1 byte, got {}", raw.len()));
    }
    match raw[0] {
        b'T' | b't' | b'Y' | b'y' => Ok(Some(true)),
        b'F' | b'f' | b'N' | b'n' => Ok(Some(false)),
        b'?' | b' ' | 0x00 => Ok(None),
        other => Err(format!("unknown logical value {:?}", other as char)),
    }
}

fn parse_integer(raw: &[u8]) -> Result<i32, String> {
    if raw.len() != 4 {
        return Err(format!("Integer field must be 4 bytes, got {}", raw.len()));
    }
    Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn parse_currency(raw: &[u8]) -> Result<Decimal, String> {
    if raw.len() != 8 {
        return Err(format!("Currency field must be 8 bytes, got {}", raw.len()));
    }
    let mantissa = i64::from_le_bytes(raw[0..8].try_into().unwrap());
    Ok(Decimal { mantissa, exponent: 4 })
}

fn parse_double(raw: &[u8]) -> Result<f64, String> {
    if raw.len() != 8 {
        return Err(format!("Double field must be 8 bytes, got {}", raw.len()));
    }
    let v = f64::from_le_bytes(raw[0..8].try_into().unwrap());
    if !v.is_finite() {
        return Err(format!("non-finite double value {v}"));
    }
    Ok(v)
}

/// Convert a Julian day number to a Gregorian calendar date using the
/// standard Fliegel & Van Flandern algorithm.
fn julian_day_to_gregorian(jdn: i64) -> Option<NaiveDate> {
    let l = jdn + 68569;
    let n = (4 * l) / 146_097;
    let l = l - (146_097 * n + 3) / 4;
    let i = (4000 * (l + 1)) / 1_461_001;
    let l = l - (1461 * i) / 4 + 31;
    let j = (80 * l) / 2447;
    let day = l - (2447 * j) / 80;
    let l = j / 11;
    let month = j + 2 - 12 * l;
    let year = 100 * (n - 49) + i + l;
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

fn parse_timestamp(raw: &[u8]) -> Result<Option<NaiveDateTime>, String> {
    if raw.len() != 8 {
        return Err(format!("Timestamp field must be 8 bytes, got {}", raw.len()));
    }
    let jdn = u32::from_le_bytes(raw[0..4].try_into().unwrap());
    let millis = u32::from_le_bytes(raw[4..8].try_into().unwrap());
    if jdn == 0 {
        return Ok(None);
    }
    let date = julian_day_to_gregorian(jdn as i64)
        .ok_or_else(|| format!("invalid Julian day number {jdn}"))?;
    let datetime = date.and_hms_opt(0, 0, 0).unwrap() + Duration::milliseconds(millis as i64);
    Ok(Some(datetime))
}

fn parse_memo_index(raw: &[u8]) -> Result<u32, String> {
    if raw.iter().all(|&b| b == b' ' || b == 0) {
        return Ok(0);
    }
    if raw.len() == 4 && !raw.iter().all(|&b| b.is_ascii_digit() || b == b' ') {
        return Ok(u32::from_le_bytes(raw.try_into().unwrap()));
    }
    let text = std::str::from_utf8(ascii_trim(raw)).map_err(|e| e.to_string())?.trim();
    if text.is_empty() {
        return Ok(0);
    }
    text.parse::<u32>().map_err(|e| e.to_string())
}

/// Decode `raw` (the field's slice within a record, not including the
/// leading status byte) per `descriptor.field_type`. Field-parse failures
/// become `Value::Invalid` unless `opts.validate_fields` is set, in which
/// case they are raised as `Error::FieldParseError`.
pub fn decode_field(
    descriptor: &FieldDescriptor,
    raw: &[u8],
    memo: &dyn MemoSource,
    codepage: &CodePage,
    opts: &DecodeOptions,
) -> DbfResult<Value> {
    let result: Result<Value, String> = (|| {
        Ok(match descriptor.field_type {
            FieldType::Character => Value::Character(decode_character(raw, codepage, opts)),
            FieldType::Varchar => Value::Varchar(decode_character(raw, codepage, opts)),
            FieldType::Numeric => Value::Numeric(parse_numeric(raw)?),
            FieldType::Float => Value::Float(parse_float(raw)?),
            FieldType::Date => Value::Date(parse_date(raw)?),
            FieldType::Logical => Value::Logical(parse_logical(raw)?),
            FieldType::Integer => Value::Integer(parse_integer(raw)?),
            FieldType::Currency => {
                let text_is_blank = raw.iter().all(|&b| b == b' ' || b == 0);
                if text_is_blank {
                    Value::Currency(None)
                } else {
                    Value::Currency(Some(parse_currency(raw)?))
                }
            }
            FieldType::Double => Value::Double(parse_double(raw)?),
            FieldType::Timestamp | FieldType::TimestampAlternate => Value::Timestamp(parse_timestamp(raw)?),
            FieldType::Memo => {
                let index = parse_memo_index(raw)?;
                if index == 0 {
                    Value::Memo(None)
                } else {
                    let payload = memo.lookup(index).map_err(|e| e.to_string())?;
                    Value::Memo(payload.map(|p| match p {
                        MemoPayload::Text(bytes) => {
                            MemoValue::Text(codepage.decode(&bytes, opts.character_decode_fallback))
                        }
                        MemoPayload::Picture(bytes) => MemoValue::Picture(bytes),
                        MemoPayload::Object(bytes) => MemoValue::Object(bytes),
                        MemoPayload::Binary(bytes) => MemoValue::Binary(bytes),
                    }))
                }
            }
            FieldType::Picture | FieldType::General | FieldType::Autoincrement | FieldType::Other(_) => {
                Value::Bytes(raw.to_vec())
            }
        })
    })();

    match result {
        Ok(value) => Ok(value),
        Err(reason) => {
            if opts.validate_fields {
                Err(Error::field_parse(&descriptor.name, raw, reason))
            } else {
                Ok(Value::Invalid(raw.to_vec(), reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codepage::resolve;

    struct NullMemo;
    impl MemoSource for NullMemo {
        fn lookup(&self, _index: u32) -> DbfResult<Option<MemoPayload>> {
            Ok(None)
        }
    }

    fn descriptor(field_type: FieldType, length: usize, decimal_count: u8) -> FieldDescriptor {
        FieldDescriptor {
            name: "F".into(),
            field_type,
            length,
            decimal_count,
        }
    }

    fn decode(field_type: FieldType, raw: &[u8], validate: bool) -> DbfResult<Value> {
        let opts = DecodeOptions {
            validate_fields: validate,
            ..Default::default()
        };
        let d = descriptor(field_type, raw.len(), 2);
        decode_field(&d, raw, &NullMemo, &resolve(0x03, None), &opts)
    }

    #[test]
    fn character_trims_trailing_spaces_and_nuls() {
        let v = decode(FieldType::Character, b"hello   \0\0", false).unwrap();
        match v {
            Value::Character(s) => assert_eq!(s, "hello"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn numeric_all_stars_is_null() {
        let v = decode(FieldType::Numeric, b"******", false).unwrap();
        assert!(matches!(v, Value::Numeric(None)));
    }

    #[test]
    fn numeric_with_decimals_round_trips() {
        let v = decode(FieldType::Numeric, b" 12.50", false).unwrap();
        match v {
            Value::Numeric(Some(d)) => assert_eq!(d.to_string(), "12.50"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn date_all_zero_is_null() {
        let v = decode(FieldType::Date, b"00000000", false).unwrap();
        assert!(matches!(v, Value::Date(None)));
    }

    #[test]
    fn date_invalid_calendar_date_is_invalid_value_when_not_validating() {
        let v = decode(FieldType::Date, b"20241301", false).unwrap();
        assert!(v.is_invalid());
    }

    #[test]
    fn date_invalid_calendar_date_raises_when_validating() {
        let err = decode(FieldType::Date, b"20241301", true);
        assert!(err.is_err());
    }

    #[test]
    fn logical_values() {
        assert!(matches!(decode(FieldType::Logical, b"T", false).unwrap(), Value::Logical(Some(true))));
        assert!(matches!(decode(FieldType::Logical, b"n", false).unwrap(), Value::Logical(Some(false))));
        assert!(matches!(decode(FieldType::Logical, b"?", false).unwrap(), Value::Logical(None)));
    }

    #[test]
    fn integer_round_trips() {
        let raw = 12345i32.to_le_bytes();
        let v = decode(FieldType::Integer, &raw, false).unwrap();
        assert!(matches!(v, Value::Integer(12345)));
    }

    #[test]
    fn currency_scales_by_10000() {
        let raw = 123_450_000i64.to_le_bytes();
        let v = decode(FieldType::Currency, &raw, false).unwrap();
        match v {
            Value::Currency(Some(d)) => assert_eq!(d.to_f64_lossy(), 12345.0),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn timestamp_zero_day_is_null() {
        let mut raw = [0u8; 8];
        raw[0..4].copy_from_slice(&0u32.to_le_bytes());
        let v = decode(FieldType::Timestamp, &raw, false).unwrap();
        assert!(matches!(v, Value::Timestamp(None)));
    }

    #[test]
    fn double_non_finite_is_invalid() {
        let raw = f64::NAN.to_le_bytes();
        let v = decode(FieldType::Double, &raw, false).unwrap();
        assert!(v.is_invalid());
    }
}
