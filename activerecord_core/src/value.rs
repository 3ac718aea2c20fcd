//! Values exchanged with the database and with application code.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{self, FormatError};

/// Column-keyed values as stored in a table row.
pub type Values = BTreeMap<String, SqlValue>;

/// Property-keyed values as seen by application code.
pub type Properties = BTreeMap<String, Native>;

/// A column value in its SQL wire representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum SqlValue {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Blob(_) => "blob",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(i) => Some(*i),
            SqlValue::Real(f) => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Text rendering used by string-like formats. `Null` renders as an empty string.
    pub fn to_text(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Integer(i) => i.to_string(),
            SqlValue::Real(f) => f.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Dynamic truthiness: `0`, `0.0`, `""`, `"0"`, empty blobs and `Null` are false.
    pub fn truthy(&self) -> bool {
        match self {
            SqlValue::Null => false,
            SqlValue::Integer(i) => *i != 0,
            SqlValue::Real(f) => *f != 0.0,
            SqlValue::Text(s) => !(s.is_empty() || s == "0"),
            SqlValue::Blob(b) => !b.is_empty(),
        }
    }

    /// Loose comparison used for dirty tracking: numbers compare by value
    /// regardless of representation, so `1`, `1.0` and `"1"` are equal.
    pub fn loosely_equals(&self, other: &SqlValue) -> bool {
        use SqlValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Null, _) | (_, Null) => false,
            (Integer(a), Integer(b)) => a == b,
            (Blob(a), Blob(b)) => a == b,
            (Blob(a), Text(b)) | (Text(b), Blob(a)) => a.as_slice() == b.as_bytes(),
            (Text(a), Text(b)) => {
                if a == b {
                    return true;
                }
                match (numeric(a), numeric(b)) {
                    (Some(x), Some(y)) => x == y,
                    _ => false,
                }
            }
            _ => match (self.as_number(), other.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => numeric(s),
            _ => None,
        }
    }
}

fn numeric(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    t.parse::<f64>().ok()
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Integer(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// An application-side value, produced by [`crate::Format::from_sql`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Native {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    DateTime(DateTime<FixedOffset>),
    Json(serde_json::Value),
    List(Vec<String>),
}

impl Native {
    pub fn is_null(&self) -> bool {
        matches!(self, Native::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Native::Null => "null",
            Native::Bool(_) => "bool",
            Native::Int(_) => "int",
            Native::Float(_) => "float",
            Native::Text(_) => "text",
            Native::Bytes(_) => "bytes",
            Native::DateTime(_) => "datetime",
            Native::Json(_) => "json",
            Native::List(_) => "list",
        }
    }

    /// "Empty" in the dynamic-language sense: null, false, zero, `""`, `"0"` and empty collections.
    pub fn is_empty(&self) -> bool {
        match self {
            Native::Null => true,
            Native::Bool(b) => !b,
            Native::Int(i) => *i == 0,
            Native::Float(f) => *f == 0.0,
            Native::Text(s) => s.is_empty() || s == "0",
            Native::Bytes(b) => b.is_empty(),
            Native::DateTime(_) => false,
            Native::Json(v) => v.is_null(),
            Native::List(l) => l.is_empty(),
        }
    }

    /// Scalar text rendering. Booleans render as `1` / empty string, dates as `Y-m-d H:i:s`.
    pub fn to_text(&self) -> String {
        match self {
            Native::Null => String::new(),
            Native::Bool(true) => "1".to_string(),
            Native::Bool(false) => String::new(),
            Native::Int(i) => i.to_string(),
            Native::Float(f) => f.to_string(),
            Native::Text(s) => s.clone(),
            Native::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Native::DateTime(dt) => dt.format(format::DATETIME_LAYOUT).to_string(),
            Native::Json(v) => v.to_string(),
            Native::List(l) => l.join(","),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Native::Null => Value::Null,
            Native::Bool(b) => Value::Bool(*b),
            Native::Int(i) => Value::from(*i),
            Native::Float(f) => Value::from(*f),
            Native::Text(s) => Value::String(s.clone()),
            Native::Bytes(b) => Value::from(b.clone()),
            Native::DateTime(dt) => Value::String(dt.to_rfc3339()),
            Native::Json(v) => v.clone(),
            Native::List(l) => Value::from(l.clone()),
        }
    }

    /// Returns the typed value, see [`FromNative`].
    pub fn extract<T: FromNative>(self) -> Result<T, FormatError> {
        T::from_native(self)
    }
}

impl From<SqlValue> for Native {
    fn from(v: SqlValue) -> Self {
        match v {
            SqlValue::Null => Native::Null,
            SqlValue::Integer(i) => Native::Int(i),
            SqlValue::Real(f) => Native::Float(f),
            SqlValue::Text(s) => Native::Text(s),
            SqlValue::Blob(b) => Native::Bytes(b),
        }
    }
}

impl From<&SqlValue> for Native {
    fn from(v: &SqlValue) -> Self {
        Native::from(v.clone())
    }
}

macro_rules! native_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Native {
                fn from(v: $ty) -> Self {
                    Native::$variant(v.into())
                }
            }
        )*
    };
}

native_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    String => Text,
    &str => Text,
    &String => Text,
    Vec<u8> => Bytes,
    DateTime<FixedOffset> => DateTime,
    DateTime<Utc> => DateTime,
    serde_json::Value => Json,
    Vec<String> => List,
}

impl From<NaiveDateTime> for Native {
    fn from(v: NaiveDateTime) -> Self {
        Native::DateTime(Utc.from_utc_datetime(&v).into())
    }
}

impl From<NaiveDate> for Native {
    fn from(v: NaiveDate) -> Self {
        Native::from(v.and_time(chrono::NaiveTime::default()))
    }
}

impl<T: Into<Native>> From<Option<T>> for Native {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Native::Null)
    }
}

/// Typed extraction from a [`Native`] value.
///
/// Conversions are lenient in the same way the formats are: numeric text
/// parses into numbers, integers read as booleans, and so on.
pub trait FromNative: Sized {
    fn from_native(value: Native) -> Result<Self, FormatError>;
}

fn conversion(expected: &'static str, found: &Native) -> FormatError {
    FormatError::Conversion {
        expected,
        found: found.kind(),
    }
}

impl FromNative for Native {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        Ok(value)
    }
}

impl FromNative for i64 {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match &value {
            Native::Int(i) => Ok(*i),
            Native::Float(f) => Ok(*f as i64),
            Native::Bool(b) => Ok(*b as i64),
            Native::Text(s) => s
                .trim()
                .parse::<i64>()
                .or_else(|_| s.trim().parse::<f64>().map(|f| f as i64))
                .map_err(|_| conversion("i64", &value)),
            _ => Err(conversion("i64", &value)),
        }
    }
}

impl FromNative for i32 {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        let kind = conversion("i32", &value);
        let wide = i64::from_native(value)?;
        i32::try_from(wide).map_err(|_| kind)
    }
}

impl FromNative for f64 {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match &value {
            Native::Float(f) => Ok(*f),
            Native::Int(i) => Ok(*i as f64),
            Native::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
            Native::Text(s) => s.trim().parse().map_err(|_| conversion("f64", &value)),
            _ => Err(conversion("f64", &value)),
        }
    }
}

impl FromNative for bool {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match &value {
            Native::Bool(b) => Ok(*b),
            Native::Int(_) | Native::Float(_) | Native::Text(_) | Native::Bytes(_) => {
                Ok(!value.is_empty())
            }
            _ => Err(conversion("bool", &value)),
        }
    }
}

impl FromNative for String {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match value {
            Native::Text(s) => Ok(s),
            Native::Null => Err(conversion("string", &Native::Null)),
            other => Ok(other.to_text()),
        }
    }
}

impl FromNative for Vec<u8> {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match value {
            Native::Bytes(b) => Ok(b),
            Native::Text(s) => Ok(s.into_bytes()),
            other => Err(conversion("bytes", &other)),
        }
    }
}

impl FromNative for DateTime<FixedOffset> {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match &value {
            Native::DateTime(dt) => Ok(*dt),
            Native::Text(s) => format::parse_datetime(s).ok_or_else(|| conversion("datetime", &value)),
            Native::Int(ts) => format::from_unix(*ts).ok_or_else(|| conversion("datetime", &value)),
            _ => Err(conversion("datetime", &value)),
        }
    }
}

impl FromNative for DateTime<Utc> {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        DateTime::<FixedOffset>::from_native(value).map(|dt| dt.with_timezone(&Utc))
    }
}

impl FromNative for NaiveDateTime {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        DateTime::<FixedOffset>::from_native(value).map(|dt| dt.naive_local())
    }
}

impl FromNative for NaiveDate {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        DateTime::<FixedOffset>::from_native(value).map(|dt| dt.naive_local().date())
    }
}

impl FromNative for serde_json::Value {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match value {
            Native::Json(v) => Ok(v),
            Native::Text(s) => serde_json::from_str(&s).map_err(FormatError::Decode),
            other => Ok(other.to_json()),
        }
    }
}

impl FromNative for Vec<String> {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match value {
            Native::List(l) => Ok(l),
            Native::Text(s) => Ok(format::parse_csv_line(&s)),
            other => Err(conversion("list", &other)),
        }
    }
}

impl<T: FromNative> FromNative for Option<T> {
    fn from_native(value: Native) -> Result<Self, FormatError> {
        match value {
            Native::Null => Ok(None),
            other => T::from_native(other).map(Some),
        }
    }
}

/// A result row: column names and values in select order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value);
        self
    }

    /// Value of the first column named `column`.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_index(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Column map; later duplicates of a column name win.
    pub fn into_values(self) -> Values {
        self.columns.into_iter().zip(self.values).collect()
    }

    pub fn into_first(self) -> Option<SqlValue> {
        self.values.into_iter().next()
    }
}

impl<K: Into<String>, V: Into<SqlValue>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.push(k, v);
        }
        row
    }
}
