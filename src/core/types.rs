use std::fmt;

use chrono::{DateTime, Utc};

use crate::core::Value;
use crate::result::QueryResult;

pub type Row = Vec<Value>;

/// Key of the one lock record. It lives for the whole migration history.
pub const LOCK_RECORD_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Int,
    Boolean,
    Text,
    Timestamp,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => write!(f, "INT"),
            Self::Boolean => write!(f, "BOOLEAN"),
            Self::Text => write!(f, "TEXT"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A table qualified by the keyspace it lives in.
///
/// The keyspace stands in for the catalog; the store has no schemas.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub keyspace: Option<String>,
    pub name: String,
}

impl TableRef {
    pub fn new(keyspace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace,
            name: name.into(),
        }
    }

    pub fn qualified(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(Some(keyspace.into()), name)
    }

    /// Name as recorded in the system catalog. Unquoted identifiers fold to lowercase.
    pub fn catalog_name(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn catalog_keyspace(&self) -> Option<String> {
        self.keyspace.as_ref().map(|ks| ks.to_lowercase())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.keyspace {
            Some(keyspace) => write!(f, "{}.{}", keyspace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// The global lock state as last read from the store.
///
/// Only as fresh as the read that produced it; the conditional update in the
/// acquire path is what decides ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub id: i64,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub lock_granted: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn unlocked() -> Self {
        Self {
            id: LOCK_RECORD_ID,
            locked: false,
            locked_by: None,
            lock_granted: None,
        }
    }

    /// Decodes every row of a `SELECT *` over the lock table.
    ///
    /// Rows without a usable ID are skipped; a missing or non-boolean LOCKED
    /// reads as unlocked.
    pub fn from_result(result: &QueryResult) -> Vec<LockRecord> {
        (0..result.row_count())
            .filter_map(|row| {
                let id = result.value(row, "ID")?.as_i64()?;
                let locked = result
                    .value(row, "LOCKED")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let locked_by = result
                    .value(row, "LOCKEDBY")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                let lock_granted = result.value(row, "LOCKGRANTED").and_then(Value::as_datetime);
                Some(LockRecord {
                    id,
                    locked,
                    locked_by,
                    lock_granted,
                })
            })
            .collect()
    }

    pub fn holder(&self) -> &str {
        self.locked_by.as_deref().unwrap_or("UNKNOWN")
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.locked_by, &self.lock_granted) {
            (Some(by), Some(at)) => write!(f, "{} since {}", by, at.to_rfc3339()),
            (Some(by), None) => write!(f, "{}", by),
            _ => write!(f, "UNKNOWN"),
        }
    }
}
