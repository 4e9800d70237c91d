//! Hook for structural changes issued by the migration engine.
//!
//! On stores with asynchronous DDL a `CREATE TABLE` or `DROP TABLE` returns
//! before the change is live. Later statements, lock operations included, are
//! only valid once the status relation confirms it, so the engine routes
//! every create/drop through here.

use std::sync::Arc;

use log::debug;

use crate::config::LockConfig;
use crate::core::{LockError, Result, TableRef};
use crate::dialect::DialectCapabilities;
use crate::interface::StoreSession;
use crate::poller::{ConvergencePoller, ExpectedOutcome, PollBudget};
use crate::statement::Statement;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralChangeKind {
    Create,
    Drop,
}

impl StructuralChangeKind {
    pub fn expected_outcome(self) -> ExpectedOutcome {
        match self {
            Self::Create => ExpectedOutcome::Created,
            Self::Drop => ExpectedOutcome::Dropped,
        }
    }
}

pub struct StructuralChangeExecutor {
    session: Arc<dyn StoreSession>,
    dialect: Arc<DialectCapabilities>,
    poller: ConvergencePoller,
    budget: PollBudget,
    strict: bool,
}

impl StructuralChangeExecutor {
    pub fn new(
        session: Arc<dyn StoreSession>,
        dialect: Arc<DialectCapabilities>,
        config: &LockConfig,
    ) -> Self {
        let poller = ConvergencePoller::new(Arc::clone(&session), &dialect);
        Self {
            session,
            dialect,
            poller,
            budget: PollBudget::new(config.create_poll_attempts, config.create_poll_interval),
            strict: config.fail_on_convergence_timeout,
        }
    }

    pub fn with_poller(mut self, poller: ConvergencePoller) -> Self {
        self.poller = poller;
        self
    }

    /// Run a create/drop statement, commit, and wait until the change is live.
    pub async fn execute(&self, statement: &Statement) -> Result<()> {
        let (kind, table) = match statement {
            Statement::CreateTable(stmt) => (StructuralChangeKind::Create, stmt.table.clone()),
            Statement::DropTable(stmt) => (StructuralChangeKind::Drop, stmt.table.clone()),
            other => {
                return Err(LockError::Config(format!(
                    "not a structural change: {}",
                    other
                )));
            }
        };

        self.session.update(statement).await?;
        self.session.commit().await?;
        self.after_structural_change(kind, &table).await
    }

    /// Block until a change the engine already issued has converged.
    ///
    /// A no-op on stores whose DDL is applied synchronously.
    pub async fn after_structural_change(
        &self,
        kind: StructuralChangeKind,
        table: &TableRef,
    ) -> Result<()> {
        if !self.dialect.ddl_is_asynchronous {
            return Ok(());
        }

        let expected = kind.expected_outcome();
        let result = self
            .poller
            .await_convergence(table, expected, self.budget)
            .await?;
        debug!("{} convergence for {}: {:?}", expected, table, result);
        result.ensure(table, expected, self.strict)
    }
}
