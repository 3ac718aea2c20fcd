//! Conversion between SQL wire values and native values.
//!
//! Each column of an entity may carry a [`Format`]. Values read from the
//! database pass through [`Format::from_sql`], values written pass through
//! [`Format::to_sql`]. Temporal formats without an explicit offset are read as
//! UTC; time-only values are anchored at 1970-01-01.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::value::{Native, SqlValue};

pub(crate) const DATETIME_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

/// Errors produced while converting values.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),
    #[error("value `{value}` does not match format `{format}`")]
    InvalidValue { format: Format, value: String },
    #[error("format `{format}` can not convert a {kind} value")]
    UnsupportedValue { format: Format, kind: &'static str },
    #[error("expected {expected}, found {found}")]
    Conversion {
        expected: &'static str,
        found: &'static str,
    },
    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Column value formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    None,
    Int,
    Float,
    String,
    Alphanumeric,
    Serialized,
    Json,
    Csv,
    Bool,
    Time,
    TimeMicro,
    TimeTz,
    TimeMicroTz,
    Date,
    DateTime,
    DateTimeMicro,
    DateTimeTz,
    DateTimeMicroTz,
    Timestamp,
}

const ALL: [Format; 19] = [
    Format::None,
    Format::Int,
    Format::Float,
    Format::String,
    Format::Alphanumeric,
    Format::Serialized,
    Format::Json,
    Format::Csv,
    Format::Bool,
    Format::Time,
    Format::TimeMicro,
    Format::TimeTz,
    Format::TimeMicroTz,
    Format::Date,
    Format::DateTime,
    Format::DateTimeMicro,
    Format::DateTimeTz,
    Format::DateTimeMicroTz,
    Format::Timestamp,
];

impl Format {
    /// The short code used in format maps, e.g. `Y-m-d H:i:s` or `bool`.
    pub fn code(self) -> &'static str {
        match self {
            Format::None => "",
            Format::Int => "int",
            Format::Float => "float",
            Format::String => "string",
            Format::Alphanumeric => "alphanumeric",
            Format::Serialized => "serialized",
            Format::Json => "json",
            Format::Csv => "csv",
            Format::Bool => "bool",
            Format::Time => "H:i:s",
            Format::TimeMicro => "H:i:s.u",
            Format::TimeTz => "H:i:sO",
            Format::TimeMicroTz => "H:i:s.uO",
            Format::Date => "Y-m-d",
            Format::DateTime => "Y-m-d H:i:s",
            Format::DateTimeMicro => "Y-m-d H:i:s.u",
            Format::DateTimeTz => "Y-m-d H:i:sO",
            Format::DateTimeMicroTz => "Y-m-d H:i:s.uO",
            Format::Timestamp => "U",
        }
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Format::Time
                | Format::TimeMicro
                | Format::TimeTz
                | Format::TimeMicroTz
                | Format::Date
                | Format::DateTime
                | Format::DateTimeMicro
                | Format::DateTimeTz
                | Format::DateTimeMicroTz
                | Format::Timestamp
        )
    }

    /// chrono layout used when writing a temporal value.
    fn layout(self) -> Option<&'static str> {
        Some(match self {
            Format::Time => "%H:%M:%S",
            Format::TimeMicro => "%H:%M:%S%.6f",
            Format::TimeTz => "%H:%M:%S%z",
            Format::TimeMicroTz => "%H:%M:%S%.6f%z",
            Format::Date => "%Y-%m-%d",
            Format::DateTime => DATETIME_LAYOUT,
            Format::DateTimeMicro => "%Y-%m-%d %H:%M:%S%.6f",
            Format::DateTimeTz => "%Y-%m-%d %H:%M:%S%z",
            Format::DateTimeMicroTz => "%Y-%m-%d %H:%M:%S%.6f%z",
            _ => return None,
        })
    }

    /// Converts a value read from the database.
    pub fn from_sql(self, value: &SqlValue) -> Result<Native, FormatError> {
        if value.is_null() {
            return Ok(Native::Null);
        }

        match self {
            Format::None => Ok(Native::from(value)),
            Format::Int => Ok(Native::Int(int_of(value))),
            Format::Float => Ok(Native::Float(float_of(value))),
            Format::Bool => Ok(Native::Bool(value.truthy())),
            Format::String => Ok(Native::Text(value.to_text())),
            Format::Alphanumeric => Ok(Native::Text(alphanumeric(&value.to_text()))),
            Format::Serialized => serde_json::from_slice::<Native>(raw_bytes(value).as_slice())
                .map_err(FormatError::Decode),
            Format::Json => serde_json::from_slice::<serde_json::Value>(raw_bytes(value).as_slice())
                .map(Native::Json)
                .map_err(FormatError::Decode),
            Format::Csv => Ok(Native::List(parse_csv_line(&value.to_text()))),
            Format::Timestamp => {
                let ts = match value {
                    SqlValue::Integer(i) => Some(*i),
                    SqlValue::Text(s) if is_integer(s) => s.parse().ok(),
                    _ => None,
                };
                ts.and_then(from_unix)
                    .map(Native::DateTime)
                    .ok_or_else(|| self.invalid(value.to_text()))
            }
            _ => {
                let text = value.to_text();
                self.read_temporal(&text)
                    .map(Native::DateTime)
                    .ok_or_else(|| self.invalid(text))
            }
        }
    }

    fn read_temporal(self, text: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            Format::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| utc(d.and_time(NaiveTime::default()))),
            Format::Time | Format::TimeMicro => {
                let layout = if text.len() > 8 { "%H:%M:%S%.f" } else { "%H:%M:%S" };
                NaiveTime::parse_from_str(text, layout)
                    .ok()
                    .map(|t| utc(epoch_date().and_time(t)))
            }
            Format::DateTime | Format::DateTimeMicro => {
                let layout = if text.len() > 19 {
                    "%Y-%m-%d %H:%M:%S%.f"
                } else {
                    DATETIME_LAYOUT
                };
                NaiveDateTime::parse_from_str(text, layout).ok().map(utc)
            }
            Format::TimeTz | Format::TimeMicroTz => {
                let (body, offset) = split_offset(text)?;
                let layout = if self == Format::TimeTz {
                    "%H:%M:%S"
                } else {
                    "%H:%M:%S%.f"
                };
                let time = NaiveTime::parse_from_str(body, layout).ok()?;
                with_offset(epoch_date().and_time(time), offset)
            }
            Format::DateTimeTz | Format::DateTimeMicroTz => {
                let (body, offset) = split_offset(text)?;
                let layout = if self == Format::DateTimeTz {
                    DATETIME_LAYOUT
                } else {
                    "%Y-%m-%d %H:%M:%S%.f"
                };
                let naive = NaiveDateTime::parse_from_str(body, layout).ok()?;
                with_offset(naive, offset)
            }
            _ => None,
        }
    }

    /// Converts a value before it is written to the database.
    pub fn to_sql(self, value: impl Into<Native>) -> Result<SqlValue, FormatError> {
        let value = value.into();
        if value.is_null() {
            return Ok(SqlValue::Null);
        }

        if self.is_temporal() {
            return self.write_temporal(value);
        }

        match self {
            Format::Int => Ok(SqlValue::Integer(native_int(&value))),
            Format::Bool => Ok(SqlValue::Integer(match value {
                Native::Bool(b) => b as i64,
                other => native_int(&other),
            })),
            Format::Float => Ok(SqlValue::Real(match value {
                Native::Float(f) => f,
                Native::Int(i) => i as f64,
                Native::Bool(b) => b as i64 as f64,
                other => parse_localized_float(&other.to_text()),
            })),
            Format::String => Ok(SqlValue::Text(value.to_text())),
            Format::Alphanumeric => Ok(SqlValue::Text(alphanumeric(&value.to_text()))),
            Format::Serialized => serde_json::to_string(&value)
                .map(SqlValue::Text)
                .map_err(FormatError::Decode),
            Format::Json => Ok(SqlValue::Text(value.to_json().to_string())),
            Format::Csv => Ok(SqlValue::Text(match value {
                Native::List(items) => write_csv_line(&items),
                other => other.to_text(),
            })),
            _ => Ok(direct(value)),
        }
    }

    fn write_temporal(self, value: Native) -> Result<SqlValue, FormatError> {
        if value.is_empty() {
            return Ok(SqlValue::Null);
        }
        let datetime = match value {
            Native::DateTime(dt) => dt,
            Native::Text(text) => parse_datetime(&text).ok_or_else(|| self.invalid(text))?,
            Native::Int(ts) => from_unix(ts).ok_or_else(|| self.invalid(ts.to_string()))?,
            Native::Float(ts) => {
                from_unix(ts as i64).ok_or_else(|| self.invalid(ts.to_string()))?
            }
            other => {
                return Err(FormatError::UnsupportedValue {
                    format: self,
                    kind: other.kind(),
                })
            }
        };
        match self.layout() {
            Some(layout) => Ok(SqlValue::Text(datetime.format(layout).to_string())),
            None => Ok(SqlValue::Integer(datetime.timestamp())),
        }
    }

    fn invalid(self, value: String) -> FormatError {
        FormatError::InvalidValue {
            format: self,
            value,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Format {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL.iter()
            .copied()
            .find(|f| f.code() == s)
            .ok_or_else(|| FormatError::UnknownFormat(s.to_string()))
    }
}

fn direct(value: Native) -> SqlValue {
    match value {
        Native::Null => SqlValue::Null,
        Native::Bool(b) => SqlValue::Integer(b as i64),
        Native::Int(i) => SqlValue::Integer(i),
        Native::Float(f) => SqlValue::Real(f),
        Native::Text(s) => SqlValue::Text(s),
        Native::Bytes(b) => SqlValue::Blob(b),
        other => SqlValue::Text(other.to_text()),
    }
}

fn raw_bytes(value: &SqlValue) -> Vec<u8> {
    match value {
        SqlValue::Blob(b) => b.clone(),
        other => other.to_text().into_bytes(),
    }
}

fn is_integer(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Numeric prefix of a string, `0.0` when there is none.
fn leading_number(s: &str) -> f64 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while bytes.get(i).map_or(false, u8::is_ascii_digit) {
            i += 1;
        }
        i
    };
    let mut end = match bytes.first() {
        Some(b'+' | b'-') => 1,
        _ => 0,
    };
    end = digits_from(end);
    if bytes.get(end) == Some(&b'.') {
        end = digits_from(end + 1);
    }
    // Exponent only when at least one digit follows it.
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

fn int_of(value: &SqlValue) -> i64 {
    match value {
        SqlValue::Integer(i) => *i,
        SqlValue::Real(f) => *f as i64,
        other => {
            let text = other.to_text();
            text.trim()
                .parse()
                .unwrap_or_else(|_| leading_number(&text) as i64)
        }
    }
}

fn float_of(value: &SqlValue) -> f64 {
    match value {
        SqlValue::Integer(i) => *i as f64,
        SqlValue::Real(f) => *f,
        other => leading_number(&other.to_text()),
    }
}

fn native_int(value: &Native) -> i64 {
    match value {
        Native::Int(i) => *i,
        Native::Float(f) => *f as i64,
        Native::Bool(b) => *b as i64,
        Native::DateTime(dt) => dt.timestamp(),
        other => int_of(&SqlValue::Text(other.to_text())),
    }
}

fn alphanumeric(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == ' ')
        .collect()
}

/// Normalises thousands and decimal separators before parsing.
///
/// When the first `,` comes after the first `.`, dots are thousands separators
/// and the comma is the decimal separator. When the first `.` comes after the
/// first `,`, commas are thousands separators.
pub fn parse_localized_float(s: &str) -> f64 {
    let s = s.trim();
    let comma = s.find(',').unwrap_or(0);
    let dot = s.find('.').unwrap_or(0);
    let normalised = if comma > dot {
        s.replace('.', "").replace(',', ".")
    } else if dot > comma {
        s.replace(',', "")
    } else {
        s.to_string()
    };
    leading_number(&normalised)
}

fn epoch_date() -> NaiveDate {
    NaiveDate::default()
}

fn utc(naive: NaiveDateTime) -> DateTime<FixedOffset> {
    Utc.from_utc_datetime(&naive).into()
}

fn with_offset(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    offset.from_local_datetime(&naive).single()
}

pub(crate) fn from_unix(ts: i64) -> Option<DateTime<FixedOffset>> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(Into::into)
}

/// Value of exactly two ASCII digits.
fn two_digits(bytes: &[u8]) -> Option<i32> {
    match bytes {
        [a, b] if a.is_ascii_digit() && b.is_ascii_digit() => {
            Some(i32::from(a - b'0') * 10 + i32::from(b - b'0'))
        }
        _ => None,
    }
}

/// Splits a trailing UTC offset (`Z`, `+hh`, `+hhmm`, `+hh:mm`) from `s`.
fn split_offset(s: &str) -> Option<(&str, FixedOffset)> {
    if let Some(body) = s.strip_suffix('Z') {
        return FixedOffset::east_opt(0).map(|o| (body, o));
    }
    for len in [6usize, 5, 3] {
        if s.len() <= len || !s.is_char_boundary(s.len() - len) {
            continue;
        }
        let (body, tail) = s.split_at(s.len() - len);
        let tail = tail.as_bytes();
        let sign = match tail[0] {
            b'+' => 1,
            b'-' => -1,
            _ => continue,
        };
        let (hours, minutes) = match len {
            6 if tail[3] == b':' => (&tail[1..3], &tail[4..]),
            5 => (&tail[1..3], &tail[3..]),
            3 => (&tail[1..], &b"00"[..]),
            _ => continue,
        };
        let (Some(h), Some(m)) = (two_digits(hours), two_digits(minutes)) else {
            continue;
        };
        return FixedOffset::east_opt(sign * (h * 3600 + m * 60)).map(|o| (body, o));
    }
    None
}

const LOOSE_DATETIME_LAYOUTS: [&str; 9] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

const LOOSE_DATE_LAYOUTS: [&str; 3] = ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y"];

const LOOSE_TIME_LAYOUTS: [&str; 3] = ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"];

fn parse_naive(s: &str) -> Option<NaiveDateTime> {
    for layout in LOOSE_DATETIME_LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    for layout in LOOSE_DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, layout) {
            return Some(d.and_time(NaiveTime::default()));
        }
    }
    for layout in LOOSE_TIME_LAYOUTS {
        if let Ok(t) = NaiveTime::parse_from_str(s, layout) {
            return Some(epoch_date().and_time(t));
        }
    }
    None
}

/// Lenient date/time parsing for user supplied text.
///
/// Accepts RFC 3339, ISO-like and German-style (`d.m.Y`) layouts with optional
/// time, microseconds and offset. Values without offset are UTC.
pub fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Some(naive) = parse_naive(s) {
        return Some(utc(naive));
    }
    let (body, offset) = split_offset(s)?;
    parse_naive(body.trim_end()).and_then(|naive| with_offset(naive, offset))
}

/// Parses one CSV line. Fields may be wrapped in double quotes; `""` inside a
/// quoted field is a literal quote.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    quoted = false;
                }
            }
            '"' if field.is_empty() => quoted = true,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn write_csv_line(items: &[String]) -> String {
    items
        .iter()
        .map(|item| {
            if item.contains(',') || item.contains('"') {
                format!("\"{}\"", item.replace('"', "\"\""))
            } else {
                item.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
