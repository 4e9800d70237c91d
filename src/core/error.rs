use std::time::Duration;

use thiserror::Error;

/// Failures reported by the backing store or by the plumbing around it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Wait interrupted: {0}")]
    Interrupted(String),
}

impl StoreError {
    /// True when the store says the relation does not exist (or is not yet queryable).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::TableNotFound(_))
    }
}

/// Errors surfaced by the lock coordinator, the initializer and the poller.
#[derive(Error, Debug)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Lock integrity violation: {0}")]
    Integrity(String),

    #[error("{table} table in {status} state")]
    UnexpectedState { table: String, status: String },

    #[error("{table} did not reach {expected} after {attempts} attempts")]
    ConvergenceTimeout {
        table: String,
        expected: String,
        attempts: u32,
    },

    #[error("{table} has no entry in the table status relation")]
    NotRegistered { table: String },

    #[error("Could not acquire change log lock: {0}")]
    Acquire(Box<LockError>),

    #[error("Could not release change log lock: {0}")]
    Release(Box<LockError>),

    #[error("Could not acquire change log lock within {waited:?}. Currently locked by {holder}")]
    WaitTimeout { waited: Duration, holder: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LockError {
    /// Duplicate lock rows, over-counted updates and unknown table states.
    ///
    /// These point at a corrupted table or a different backend, never at an
    /// ordinary race, so callers must not retry them.
    pub fn is_integrity(&self) -> bool {
        match self {
            Self::Integrity(_) | Self::UnexpectedState { .. } => true,
            Self::Acquire(inner) | Self::Release(inner) => inner.is_integrity(),
            _ => false,
        }
    }

    /// The innermost store failure, if this error wraps one.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(err) => Some(err),
            Self::Acquire(inner) | Self::Release(inner) => inner.store_error(),
            _ => None,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub type Result<T> = std::result::Result<T, LockError>;
