//! Canonical tagged values, rows, and result sets.
//!
//! Every backend-specific column type decodes into exactly one [`Value`]
//! variant, and every bind parameter starts life as a [`Value`]. The
//! per-backend mappings live in [`typemap`] (sqlx type names) and
//! [`codec`] (decode/encode logic, including the TDS structural mapping).

use std::fmt;

pub use sqlx::types::Uuid;
pub use sqlx::types::chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::DbError;

pub(crate) mod codec;
pub(crate) mod typemap;

/// A canonical database value.
///
/// The union is closed: decoding an unmapped backend type is an error, never
/// a silently coerced value. Integer and float widths are preserved exactly;
/// a column declared 16-bit decodes as [`Value::Int16`], never promoted.
///
/// # Examples
///
/// ```
/// use sqlgate::Value;
///
/// let v = Value::from(42i32);
/// assert_eq!(v, Value::Int32(42));
/// assert_eq!(v.as_i64(), Some(42));
///
/// let absent: Option<i64> = None;
/// assert_eq!(Value::from(absent), Value::Null);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(NaiveDateTime),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Widening integer accessor for callers that do not care about the
    /// declared width. `UInt64` values above `i64::MAX` return `None`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int8(v) => Some(i64::from(*v)),
            Value::UInt8(v) => Some(i64::from(*v)),
            Value::Int16(v) => Some(i64::from(*v)),
            Value::UInt16(v) => Some(i64::from(*v)),
            Value::Int32(v) => Some(i64::from(*v)),
            Value::UInt32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Widening float accessor.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int8(v) => write!(f, "{v}"),
            Value::UInt8(v) => write!(f, "{v}"),
            Value::Int16(v) => write!(f, "{v}"),
            Value::UInt16(v) => write!(f, "{v}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Timestamp(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Json(j) => write!(f, "{j}"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    i8 => Int8,
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    i64 => Int64,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
    String => Text,
    Vec<u8> => Bytes,
    NaiveDateTime => Timestamp,
    NaiveDate => Date,
    NaiveTime => Time,
    Uuid => Uuid,
    serde_json::Value => Json,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

/// Builds a `Vec<Value>` of bind parameters from anything convertible.
///
/// # Examples
///
/// ```
/// use sqlgate::{params, Value};
///
/// let binds = params![42, "alice", None::<i64>];
/// assert_eq!(binds[0], Value::Int32(42));
/// assert_eq!(binds[2], Value::Null);
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::Value>::new() };
    ($($p:expr),+ $(,)?) => {
        vec![$($crate::Value::from($p)),+]
    };
}

/// One decoded result row: an ordered mapping from column name to [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub(crate) fn from_pairs(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    /// Looks up a value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, v)| v)
    }

    /// Returns the value at a positional index, in result order.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.columns.get(index).map(|(_, v)| v)
    }

    /// Iterates `(column name, value)` pairs in result order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// The outcome of an awaited query: decoded rows, or an error in their place.
///
/// `query` never raises; callers match on this (or use [`into_rows`](Self::into_rows)).
#[derive(Debug, Clone, PartialEq)]
pub enum ResultSet {
    Rows(Vec<Row>),
    Error(DbError),
}

impl ResultSet {
    /// The decoded rows, if the request succeeded.
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            ResultSet::Rows(rows) => Some(rows),
            ResultSet::Error(_) => None,
        }
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&DbError> {
        match self {
            ResultSet::Rows(_) => None,
            ResultSet::Error(e) => Some(e),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultSet::Error(_))
    }

    /// Converts into `Result` for `?`-style consumption.
    pub fn into_rows(self) -> Result<Vec<Row>, DbError> {
        match self {
            ResultSet::Rows(rows) => Ok(rows),
            ResultSet::Error(e) => Err(e),
        }
    }
}
