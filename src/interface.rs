use async_trait::async_trait;

use crate::core::{StoreError, StoreResult};
use crate::result::QueryResult;
use crate::statement::Statement;

/// Access to the shared store, as handed over by the migration engine.
///
/// Every call is a blocking network round-trip from the caller's point of
/// view. Implementations surface driver failures as [`StoreError`]s and must
/// report "table does not exist" as [`StoreError::TableNotFound`].
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Execute a statement that is expected to return rows.
    async fn query(&self, statement: &Statement) -> StoreResult<QueryResult>;

    /// Execute a write and return the affected-row count.
    ///
    /// A negative count means the driver could not tell.
    async fn update(&self, statement: &Statement) -> StoreResult<i64>;

    /// Execute pre-rendered text through the driver's raw path, bypassing any
    /// per-statement options.
    async fn execute_raw(&self, sql: &str) -> StoreResult<i64>;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;
}

/// Reports the keyspace the session is logged into.
pub trait CurrentKeyspaceProvider: Send + Sync {
    fn current_keyspace(&self) -> Option<String>;
}

/// A keyspace fixed at construction time.
#[derive(Debug, Clone)]
pub struct FixedKeyspace(pub String);

impl CurrentKeyspaceProvider for FixedKeyspace {
    fn current_keyspace(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Who is asking for the lock.
pub trait HostIdentity: Send + Sync {
    /// `(hostname, address)`
    fn identity(&self) -> (String, String);

    /// Value written to `LOCKEDBY`.
    fn locked_by(&self) -> String {
        let (hostname, address) = self.identity();
        format!("{} ({})", hostname, address)
    }
}

/// Outcome of a bounded existence probe.
///
/// `Failed` covers every error that is not a definite "not found", so an
/// unreachable store is never mistaken for a missing table.
#[derive(Debug)]
pub enum TableProbe {
    Exists,
    NotFound,
    Failed(StoreError),
}

impl TableProbe {
    pub fn from_result<T>(result: StoreResult<T>) -> Self {
        match result {
            Ok(_) => Self::Exists,
            Err(err) if err.is_not_found() => Self::NotFound,
            Err(err) => Self::Failed(err),
        }
    }

    /// `Ok(true)` when the table exists, `Ok(false)` when it definitely does not.
    pub fn exists(self) -> StoreResult<bool> {
        match self {
            Self::Exists => Ok(true),
            Self::NotFound => Ok(false),
            Self::Failed(err) => Err(err),
        }
    }
}
