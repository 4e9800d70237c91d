use std::fmt;

use chrono::{DateTime, Utc};

/// A single cell as read from, or written to, the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Integer(i64),
    Text(String),
    Boolean(bool),
    /// Milliseconds since the Unix epoch, client clock.
    Timestamp(i64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Integer(_) => "INT",
            Self::Text(_) => "TEXT",
            Self::Boolean(_) => "BOOLEAN",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Strict boolean view: only a stored boolean deserializes as one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) | Self::Timestamp(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        self.as_i64().and_then(DateTime::from_timestamp_millis)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// CQL literal form, used when rendering statements.
    pub fn literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(i) | Self::Timestamp(i) => i.to_string(),
            Self::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Self::Boolean(true) => "TRUE".to_string(),
            Self::Boolean(false) => "FALSE".to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Timestamp(ms) => match DateTime::from_timestamp_millis(*ms) {
                Some(ts) => write!(f, "{}", ts.to_rfc3339()),
                None => write!(f, "{}", ms),
            },
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
