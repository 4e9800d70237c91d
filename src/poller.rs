//! Waits for asynchronous table creation and deletion to settle.
//!
//! The managed store acknowledges `CREATE TABLE` / `DROP TABLE` immediately and
//! applies them in the background, reporting progress in a system relation
//! keyed by `(keyspace_name, table_name)`. A table is only usable once that
//! relation says `ACTIVE`, and only gone once its row disappears.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use crate::cancel::{CancelSignal, pause};
use crate::core::{LockError, Result, StoreError, StoreResult, TableRef};
use crate::dialect::{DialectCapabilities, MANAGED_STATUS_RELATION};
use crate::interface::StoreSession;
use crate::statement::{Statement, TableStatusStmt};

/// Which terminal state a caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedOutcome {
    Created,
    Dropped,
}

impl fmt::Display for ExpectedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "ACTIVE"),
            Self::Dropped => write!(f, "dropped"),
        }
    }
}

/// Status of a table as reported by the status relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Active,
    Creating,
    Deleting,
    /// No row for the table.
    Missing,
    Unexpected(String),
}

impl TableState {
    pub fn from_status(status: &str) -> Self {
        match status {
            "ACTIVE" => Self::Active,
            "CREATING" => Self::Creating,
            "DELETING" => Self::Deleting,
            other => Self::Unexpected(other.to_string()),
        }
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Creating => write!(f, "CREATING"),
            Self::Deleting => write!(f, "DELETING"),
            Self::Missing => write!(f, "MISSING"),
            Self::Unexpected(status) => write!(f, "{}", status),
        }
    }
}

/// A finite attempt count and a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Longest the poller can block with this budget.
    pub fn worst_case(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvergenceResult {
    Converged { attempts: u32 },
    /// Budget exhausted while the table was still transitioning.
    TimedOut { attempts: u32, last_state: TableState },
    /// The store reported a state that cannot lead to the expected outcome.
    UnexpectedState { status: String },
    /// No status row while waiting for a create: the table is not registered.
    Absent { attempts: u32 },
}

impl ConvergenceResult {
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Turn a non-converged result into an error.
    ///
    /// A timeout is only an error when `strict` is set; otherwise it is logged
    /// and treated as converged.
    pub fn ensure(self, table: &TableRef, expected: ExpectedOutcome, strict: bool) -> Result<()> {
        match self {
            Self::Converged { .. } => Ok(()),
            Self::TimedOut {
                attempts,
                last_state,
            } => {
                if strict {
                    Err(LockError::ConvergenceTimeout {
                        table: table.to_string(),
                        expected: expected.to_string(),
                        attempts,
                    })
                } else {
                    info!(
                        "{} still {} after {} attempts, continuing",
                        table, last_state, attempts
                    );
                    Ok(())
                }
            }
            Self::UnexpectedState { status } => Err(LockError::UnexpectedState {
                table: table.to_string(),
                status,
            }),
            Self::Absent { .. } => Err(LockError::NotRegistered {
                table: table.to_string(),
            }),
        }
    }
}

#[derive(Clone)]
pub struct ConvergencePoller {
    session: Arc<dyn StoreSession>,
    relation: String,
    cancel: Option<CancelSignal>,
}

impl ConvergencePoller {
    pub fn new(session: Arc<dyn StoreSession>, dialect: &DialectCapabilities) -> Self {
        Self {
            session,
            relation: dialect
                .status_relation
                .unwrap_or(MANAGED_STATUS_RELATION)
                .to_string(),
            cancel: None,
        }
    }

    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// One read of the status relation.
    pub async fn table_state(&self, table: &TableRef) -> StoreResult<TableState> {
        let keyspace = table.catalog_keyspace().ok_or_else(|| {
            StoreError::ExecutionError(format!(
                "cannot read the status of {} without a keyspace",
                table
            ))
        })?;

        let statement = Statement::TableStatus(TableStatusStmt {
            relation: self.relation.clone(),
            keyspace,
            table: table.catalog_name(),
        });

        let result = self.session.query(&statement).await?;
        match result.first_value("status") {
            None => Ok(TableState::Missing),
            Some(value) if value.is_null() => Ok(TableState::Missing),
            Some(value) => Ok(TableState::from_status(&value.to_string())),
        }
    }

    /// Poll until `table` reaches the expected terminal state.
    ///
    /// Query failures and interrupted sleeps are returned as errors. Every
    /// other outcome, including an exhausted budget, comes back as a
    /// [`ConvergenceResult`].
    pub async fn await_convergence(
        &self,
        table: &TableRef,
        expected: ExpectedOutcome,
        budget: PollBudget,
    ) -> StoreResult<ConvergenceResult> {
        let mut last_state = TableState::Missing;

        for attempt in 1..=budget.max_attempts {
            let state = self.table_state(table).await?;

            match (expected, &state) {
                (ExpectedOutcome::Created, TableState::Active)
                | (ExpectedOutcome::Dropped, TableState::Missing) => {
                    return Ok(ConvergenceResult::Converged { attempts: attempt });
                }
                (ExpectedOutcome::Created, TableState::Missing) => {
                    info!("{} has no table status entry", table);
                    return Ok(ConvergenceResult::Absent { attempts: attempt });
                }
                (ExpectedOutcome::Created, TableState::Creating)
                | (ExpectedOutcome::Dropped, TableState::Deleting) => {
                    info!("table status = {} ({}, attempt {})", state, table, attempt);
                }
                _ => {
                    error!("{} table in {} state.", table, state);
                    return Ok(ConvergenceResult::UnexpectedState {
                        status: state.to_string(),
                    });
                }
            }

            last_state = state;
            if attempt < budget.max_attempts {
                pause(budget.interval, self.cancel.as_ref()).await?;
            }
        }

        Ok(ConvergenceResult::TimedOut {
            attempts: budget.max_attempts,
            last_state,
        })
    }
}
