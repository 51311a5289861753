//! Typed values, keys, and the commit timestamp sentinel.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use serde::{Serialize, Serializer};

use super::error::Error;

/// A store timestamp, microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self(crate::now_micros())
    }

    /// RFC 3339 rendering with microsecond precision.
    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from_timestamp_micros(self.0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_else(|| format!("{}us", self.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(Timestamp),
    /// Write-only marker: the store substitutes the transaction's commit time.
    CommitTimestamp,
}

impl Value {
    /// Convert to a bindable SQLite value.
    ///
    /// `commit_ts` is the timestamp allocated to the enclosing write; reads pass
    /// `None`, which rejects the sentinel.
    pub(crate) fn resolve(&self, commit_ts: Option<Timestamp>) -> Result<SqlValue, Error> {
        Ok(match self {
            Value::Null => SqlValue::Null,
            Value::Int64(v) => SqlValue::Integer(*v),
            Value::String(v) => SqlValue::Text(v.clone()),
            Value::Bytes(v) => SqlValue::Blob(v.clone()),
            Value::Timestamp(ts) => SqlValue::Integer(ts.as_micros()),
            Value::CommitTimestamp => match commit_ts {
                Some(ts) => SqlValue::Integer(ts.as_micros()),
                None => {
                    return Err(Error::InvalidArgument(
                        "commit timestamp sentinel can only be written".into(),
                    ))
                }
            },
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::CommitTimestamp => f.write_str("PENDING_COMMIT_TIMESTAMP()"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Primary key of a row, in primary-key column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(parts: impl IntoIterator<Item = Value>) -> Self {
        Self(parts.into_iter().collect())
    }

    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{part}")?;
        }
        f.write_str(")")
    }
}

impl From<(i64, i64)> for Key {
    fn from((a, b): (i64, i64)) -> Self {
        Self(vec![Value::Int64(a), Value::Int64(b)])
    }
}

impl From<i64> for Key {
    fn from(a: i64) -> Self {
        Self(vec![Value::Int64(a)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_timestamp_is_write_only() {
        let ts = Timestamp::from_micros(42);
        assert_eq!(
            Value::CommitTimestamp.resolve(Some(ts)).unwrap(),
            SqlValue::Integer(42)
        );
        assert!(matches!(
            Value::CommitTimestamp.resolve(None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_optional_values_map_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(7_i64)), Value::Int64(7));
    }

    #[test]
    fn test_timestamp_rfc3339() {
        let ts = Timestamp::from_micros(1_700_000_000_123_456);
        assert_eq!(ts.to_rfc3339(), "2023-11-14T22:13:20.123456Z");
        assert_eq!(
            serde_json::to_string(&ts).unwrap(),
            "\"2023-11-14T22:13:20.123456Z\""
        );
    }

    #[test]
    fn test_key_display() {
        assert_eq!(Key::from((2_i64, 3_i64)).to_string(), "(2, 3)");
    }
}
