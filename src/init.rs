//! Brings the lock table into existence with exactly one unlocked seed row.
//!
//! Several runners may start at once against an empty keyspace. Each of them
//! probes, creates, waits and seeds; losing any of those races is expected and
//! is absorbed by the bounded retry loop in [`LockTableInitializer::ensure_initialized`].

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;

use crate::cancel::{CancelSignal, pause};
use crate::config::LockConfig;
use crate::core::{LOCK_RECORD_ID, LockError, Result, StoreError, StoreResult};
use crate::dialect::DialectCapabilities;
use crate::interface::{StoreSession, TableProbe};
use crate::lock::statements::{COLUMN_ID, COLUMN_LOCKED, LockStatements};
use crate::poller::{ConvergencePoller, ConvergenceResult, ExpectedOutcome, PollBudget};

#[derive(Clone)]
pub struct LockTableInitializer {
    session: Arc<dyn StoreSession>,
    dialect: Arc<DialectCapabilities>,
    config: Arc<LockConfig>,
    statements: LockStatements,
    poller: ConvergencePoller,
    cancel: Option<CancelSignal>,
}

impl LockTableInitializer {
    pub fn new(
        session: Arc<dyn StoreSession>,
        dialect: Arc<DialectCapabilities>,
        config: Arc<LockConfig>,
        statements: LockStatements,
        poller: ConvergencePoller,
    ) -> Self {
        Self {
            session,
            dialect,
            config,
            statements,
            poller,
            cancel: None,
        }
    }

    pub fn with_cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    /// Budget used for every wait on the lock table itself.
    pub fn lock_table_budget(&self) -> PollBudget {
        PollBudget::new(
            self.config.lock_table_poll_attempts,
            self.config.lock_table_poll_interval,
        )
    }

    /// `LIMIT 1` read; a "not found" answer means the table is absent.
    pub async fn probe(&self) -> TableProbe {
        TableProbe::from_result(self.session.query(&self.statements.probe()).await)
    }

    /// Idempotent; safe to run from several processes at once.
    ///
    /// Transient failures are retried with a randomized pause. Integrity
    /// failures and interruptions are returned at once, and the last
    /// iteration's error is returned as-is.
    pub async fn ensure_initialized(&self) -> Result<()> {
        let max_iterations = self.config.init_max_iterations.max(1);
        let mut iteration = 0;

        loop {
            iteration += 1;
            let err = match self.initialize_once().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let interrupted = matches!(err.store_error(), Some(StoreError::Interrupted(_)));
            if iteration >= max_iterations || err.is_integrity() || interrupted {
                return Err(err);
            }

            debug!(
                "Failed to create or initialize the lock table, trying again, iteration {} of {}: {}",
                iteration, max_iterations, err
            );
            self.jitter().await?;
        }
    }

    async fn initialize_once(&self) -> Result<()> {
        let mut created = false;

        if !self.probe().await.exists()? {
            self.create_table().await?;
            created = true;
        }

        if !self.check_initialized(created).await? {
            self.reset_rows().await?;
            self.seed().await?;
        }

        if self.dialect.legacy_boolean_check {
            self.migrate_legacy_format().await?;
        }

        Ok(())
    }

    /// Whether the table already holds its lock row.
    ///
    /// On asynchronous-DDL stores the status relation must report the table
    /// `ACTIVE` first; generic catalog calls may call a table usable while it
    /// is still transitioning. A table with no status entry is reported as not
    /// initialized after a single read. A failed read on other stores counts
    /// as "not initialized" only right after this process created the table.
    pub async fn check_initialized(&self, table_just_created: bool) -> Result<bool> {
        if self.dialect.ddl_is_asynchronous {
            let convergence = self
                .poller
                .await_convergence(
                    self.statements.table(),
                    ExpectedOutcome::Created,
                    self.lock_table_budget(),
                )
                .await?;

            return match convergence {
                ConvergenceResult::Converged { .. } => Ok(self.row_count().await? > 0),
                ConvergenceResult::TimedOut { last_state, .. } => {
                    info!("{} is {}, not initialized yet", self.statements.table(), last_state);
                    Ok(false)
                }
                ConvergenceResult::Absent { .. } => Ok(false),
                ConvergenceResult::UnexpectedState { status } => Err(LockError::UnexpectedState {
                    table: self.statements.table().to_string(),
                    status,
                }),
            };
        }

        match self.row_count().await {
            Ok(rows) => Ok(rows > 0),
            Err(err) => {
                warn!(
                    "Could not read {} while checking initialization: {}",
                    self.statements.table(),
                    err
                );
                Ok(!table_just_created)
            }
        }
    }

    async fn row_count(&self) -> StoreResult<usize> {
        if self.dialect.supports_row_count_aggregate {
            let result = self.session.query(&self.statements.count()).await?;
            let count = result
                .rows
                .first()
                .and_then(|row| row.first())
                .and_then(|value| value.as_i64())
                .unwrap_or(0);
            return Ok(usize::try_from(count).unwrap_or(0));
        }

        Ok(self
            .session
            .query(&self.statements.select_all())
            .await?
            .row_count())
    }

    async fn create_table(&self) -> Result<()> {
        let table = self.statements.table();

        match self.session.update(&self.statements.create_table()).await {
            Ok(_) => {}
            Err(StoreError::TableExists(_)) => {
                info!("{} was created concurrently by another runner", table);
            }
            Err(err) => return Err(err.into()),
        }
        self.session.commit().await?;
        info!("Created database lock table with name: {}", table);

        if self.dialect.ddl_is_asynchronous {
            self.poller
                .await_convergence(table, ExpectedOutcome::Created, self.lock_table_budget())
                .await?
                .ensure(
                    table,
                    ExpectedOutcome::Created,
                    self.config.fail_on_convergence_timeout,
                )?;
        }

        Ok(())
    }

    // No TRUNCATE: every stray row goes individually. With conditional writes
    // the seed row is kept, since a concurrent runner may already hold it.
    async fn reset_rows(&self) -> Result<()> {
        let rows = self.session.query(&self.statements.select_all()).await?;
        let keep_seed = self.dialect.supports_conditional_writes;

        for id in rows.column_values(COLUMN_ID) {
            if keep_seed && id.as_i64() == Some(LOCK_RECORD_ID) {
                continue;
            }
            self.session
                .update(&self.statements.delete_row(id.clone()))
                .await?;
        }

        Ok(())
    }

    async fn seed(&self) -> Result<()> {
        let applied = self.session.update(&self.statements.seed()).await?;
        if applied == 0 {
            debug!("Lock row already present in {}", self.statements.table());
        }
        self.session.commit().await?;
        Ok(())
    }

    async fn migrate_legacy_format(&self) -> Result<()> {
        let result = self.session.query(&self.statements.legacy_probe()).await?;
        let Some(value) = result.first_value(COLUMN_LOCKED) else {
            return Ok(());
        };
        if value.is_null() || value.as_bool().is_some() {
            return Ok(());
        }

        let table = self.statements.table();
        warn!(
            "{} stores LOCKED as {}, recreating it with a boolean column",
            table,
            value.type_name()
        );

        self.session.update(&self.statements.drop_table()).await?;
        self.session.commit().await?;
        if self.dialect.ddl_is_asynchronous {
            self.poller
                .await_convergence(table, ExpectedOutcome::Dropped, self.lock_table_budget())
                .await?
                .ensure(
                    table,
                    ExpectedOutcome::Dropped,
                    self.config.fail_on_convergence_timeout,
                )?;
        }

        self.create_table().await?;
        self.seed().await
    }

    async fn jitter(&self) -> StoreResult<()> {
        let max_ms = u64::try_from(self.config.init_max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Ok(());
        }
        let millis = rand::thread_rng().gen_range(0..max_ms);
        pause(Duration::from_millis(millis), self.cancel.as_ref()).await
    }
}
