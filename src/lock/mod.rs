//! Single global migration lock on top of a non-transactional store.
//!
//! # How It Works
//!
//! 1. The lock table is created and seeded on demand ([`LockTableInitializer`]).
//! 2. A filtered read looks for a row that is already locked.
//! 3. A conditional update claims row `ID = 1`. The affected-row count of that
//!    write is the only thing that decides who won; the read in step 2 is a
//!    shortcut, never a guarantee.
//! 4. Release clears the row and, whatever the store says, the local flag.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut lock = LockCoordinator::builder(session)
//!     .keyspace_provider(Arc::new(FixedKeyspace("migrations".into())))
//!     .build()?;
//!
//! if lock.acquire().await? {
//!     // run migrations
//!     lock.release().await?;
//! }
//! ```

pub mod statements;

use std::sync::Arc;
use std::time::Instant;

use log::{info, warn};

use crate::cancel::{CancelSignal, pause};
use crate::config::LockConfig;
use crate::core::{LockError, LockRecord, Result, StoreError, TableRef};
use crate::dialect::DialectCapabilities;
use crate::identity::SystemIdentity;
use crate::init::LockTableInitializer;
use crate::interface::{CurrentKeyspaceProvider, HostIdentity, StoreSession, TableProbe};
use crate::poller::ConvergencePoller;
use statements::{COLUMN_LOCKED, LockStatements};

/// Result of one acquire attempt.
#[derive(Debug)]
pub enum LockAttemptOutcome {
    Acquired,
    /// This coordinator already held the lock; nothing was sent to the store.
    AlreadyHeld,
    /// Someone else holds it, or won the race for it.
    HeldByOther,
    Failed(LockError),
}

impl LockAttemptOutcome {
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Acquired | Self::AlreadyHeld)
    }
}

pub struct LockCoordinatorBuilder {
    session: Arc<dyn StoreSession>,
    dialect: DialectCapabilities,
    config: LockConfig,
    identity: Option<Arc<dyn HostIdentity>>,
    keyspace_provider: Option<Arc<dyn CurrentKeyspaceProvider>>,
    cancel: Option<CancelSignal>,
}

impl LockCoordinatorBuilder {
    pub fn dialect(mut self, dialect: DialectCapabilities) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn config(mut self, config: LockConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(mut self, identity: Arc<dyn HostIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn keyspace_provider(mut self, provider: Arc<dyn CurrentKeyspaceProvider>) -> Self {
        self.keyspace_provider = Some(provider);
        self
    }

    /// Interrupts convergence polls and retry sleeps when fired.
    pub fn cancel_signal(mut self, signal: CancelSignal) -> Self {
        self.cancel = Some(signal);
        self
    }

    pub fn build(self) -> Result<LockCoordinator> {
        self.config.validate()?;

        let keyspace = self
            .keyspace_provider
            .as_ref()
            .and_then(|provider| provider.current_keyspace())
            .or_else(|| self.config.keyspace.clone());

        if keyspace.is_none() && self.dialect.ddl_is_asynchronous {
            return Err(LockError::Config(
                "a keyspace is required to poll table status".into(),
            ));
        }

        let table = TableRef::new(keyspace, self.config.lock_table.clone());
        let dialect = Arc::new(self.dialect);
        let config = Arc::new(self.config);
        let statements = LockStatements::new(table, &dialect);

        let mut poller = ConvergencePoller::new(Arc::clone(&self.session), &dialect);
        if let Some(signal) = &self.cancel {
            poller = poller.with_cancel_signal(signal.clone());
        }

        let mut initializer = LockTableInitializer::new(
            Arc::clone(&self.session),
            Arc::clone(&dialect),
            Arc::clone(&config),
            statements.clone(),
            poller,
        );
        if let Some(signal) = &self.cancel {
            initializer = initializer.with_cancel_signal(signal.clone());
        }

        let identity = self
            .identity
            .unwrap_or_else(|| Arc::new(SystemIdentity::detect()));

        Ok(LockCoordinator {
            session: self.session,
            dialect,
            config,
            identity,
            statements,
            initializer,
            cancel: self.cancel,
            has_lock: false,
            initialized: false,
            can_cache_table_info: false,
        })
    }
}

/// One process's view of the global migration lock.
///
/// `has_lock` is a belief, not a fact: it is reset on every failure path and
/// re-derived from the store on each acquire after a restart.
pub struct LockCoordinator {
    session: Arc<dyn StoreSession>,
    dialect: Arc<DialectCapabilities>,
    config: Arc<LockConfig>,
    identity: Arc<dyn HostIdentity>,
    statements: LockStatements,
    initializer: LockTableInitializer,
    cancel: Option<CancelSignal>,
    has_lock: bool,
    initialized: bool,
    can_cache_table_info: bool,
}

impl LockCoordinator {
    pub fn builder(session: Arc<dyn StoreSession>) -> LockCoordinatorBuilder {
        LockCoordinatorBuilder {
            session,
            dialect: DialectCapabilities::default(),
            config: LockConfig::default(),
            identity: None,
            keyspace_provider: None,
            cancel: None,
        }
    }

    pub fn lock_table(&self) -> &TableRef {
        self.statements.table()
    }

    pub fn dialect(&self) -> &DialectCapabilities {
        &self.dialect
    }

    pub fn has_lock(&self) -> bool {
        self.has_lock
    }

    /// Whether lock-table metadata may be cached by the engine right now.
    pub fn can_cache_table_info(&self) -> bool {
        self.can_cache_table_info
    }

    /// Returns `Ok(true)` when this process holds the lock afterwards.
    ///
    /// A lost race is `Ok(false)`. Every failure comes back as
    /// [`LockError::Acquire`].
    pub async fn acquire(&mut self) -> Result<bool> {
        match self.try_acquire().await {
            LockAttemptOutcome::Acquired | LockAttemptOutcome::AlreadyHeld => Ok(true),
            LockAttemptOutcome::HeldByOther => Ok(false),
            LockAttemptOutcome::Failed(err) => Err(err),
        }
    }

    pub async fn try_acquire(&mut self) -> LockAttemptOutcome {
        if self.has_lock {
            return LockAttemptOutcome::AlreadyHeld;
        }

        let result = self.acquire_inner().await;
        self.rollback_quietly().await;

        match result {
            Ok(true) => LockAttemptOutcome::Acquired,
            Ok(false) => LockAttemptOutcome::HeldByOther,
            Err(err) => {
                self.has_lock = false;
                self.can_cache_table_info = false;
                LockAttemptOutcome::Failed(LockError::Acquire(Box::new(err)))
            }
        }
    }

    async fn acquire_inner(&mut self) -> Result<bool> {
        self.session.rollback().await?;
        self.initializer.ensure_initialized().await?;
        self.initialized = true;

        let current = self.session.query(&self.statements.select_locked()).await?;
        let locked_rows = current
            .column_values(COLUMN_LOCKED)
            .into_iter()
            .filter(|value| value.as_bool() == Some(true))
            .count();
        if locked_rows > 1 {
            return Err(LockError::Integrity(format!(
                "{} rows of {} are marked as locked",
                locked_rows,
                self.lock_table()
            )));
        }
        if locked_rows == 1 {
            return Ok(false);
        }

        let locked_by = self.identity.locked_by();
        let granted = self.dialect.current_time_millis();
        let statement = self.statements.lock(&locked_by, granted);
        let mut rows_updated = self.session.update(&statement).await?;

        if rows_updated < 0 {
            warn!("Database did not return a proper row count, re-issuing the lock statement");
            self.session.rollback().await?;
            let sql = self.dialect.exact_count_sql(&statement.to_string());
            rows_updated = self.session.execute_raw(&sql).await?;

            // The uncounted first write may have been applied already.
            if rows_updated == 0 && self.row_stamped_by(&locked_by, granted).await? {
                info!("Lock update was applied before the re-issue");
                rows_updated = 1;
            }
        }

        match rows_updated {
            1 => {}
            // another node was faster
            0 => return Ok(false),
            n if n > 1 => {
                return Err(LockError::Integrity(format!(
                    "Did not update change log lock correctly: {} rows of {} updated",
                    n,
                    self.lock_table()
                )));
            }
            n => {
                return Err(StoreError::ExecutionError(format!(
                    "store reported an ambiguous row count ({}) for the lock update",
                    n
                ))
                .into());
            }
        }

        self.has_lock = true;
        self.can_cache_table_info = true;
        self.session.commit().await?;
        info!("Successfully acquired change log lock ({})", self.identity.locked_by());
        Ok(true)
    }

    /// Clears the lock row. Local state is cleared even when the store write
    /// fails; that failure is still returned as [`LockError::Release`].
    pub async fn release(&mut self) -> Result<()> {
        let result = self.release_inner().await;

        self.has_lock = false;
        self.can_cache_table_info = false;
        self.rollback_quietly().await;

        match result {
            Ok(()) => {
                info!("Successfully released change log lock");
                Ok(())
            }
            Err(err) => {
                warn!("Could not release change log lock cleanly: {}", err);
                Err(LockError::Release(Box::new(err)))
            }
        }
    }

    async fn release_inner(&mut self) -> Result<()> {
        if self.has_lock_table().await? {
            self.session.rollback().await?;
            self.session.update(&self.statements.unlock()).await?;
            self.session.commit().await?;
        }
        Ok(())
    }

    /// Keep calling [`acquire`](Self::acquire) until it succeeds or the
    /// configured wait time runs out.
    pub async fn wait_for_lock(&mut self) -> Result<()> {
        let started = Instant::now();
        let deadline = started + self.config.lock_wait_time;

        loop {
            if self.acquire().await? {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }

            info!("Waiting for changelog lock....");
            let nap = self.config.lock_recheck_interval.min(deadline - now);
            pause(nap, self.cancel.as_ref()).await?;
        }

        let holder = self
            .list_locks()
            .await
            .ok()
            .and_then(|locks| locks.into_iter().next())
            .map(|record| record.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());

        Err(LockError::WaitTimeout {
            waited: started.elapsed(),
            holder,
        })
    }

    /// Rows currently marked as locked. Empty when there is no lock table.
    pub async fn list_locks(&self) -> Result<Vec<LockRecord>> {
        if !self.has_lock_table().await? {
            return Ok(Vec::new());
        }

        let result = self.session.query(&self.statements.select_all()).await?;
        Ok(LockRecord::from_result(&result)
            .into_iter()
            .filter(|record| record.locked)
            .collect())
    }

    /// Operator escape hatch: clear the lock no matter who holds it.
    pub async fn force_release(&mut self) -> Result<()> {
        self.initializer
            .ensure_initialized()
            .await
            .map_err(|err| LockError::Release(Box::new(err)))?;
        self.initialized = true;
        self.release().await
    }

    /// Drops every cached belief about the store.
    pub fn reset(&mut self) {
        self.has_lock = false;
        self.initialized = false;
        self.can_cache_table_info = false;
    }

    /// Bounded read; only a definite "not found" counts as absent.
    pub async fn probe_lock_table(&self) -> TableProbe {
        self.initializer.probe().await
    }

    pub async fn has_lock_table(&self) -> Result<bool> {
        let exists = self.probe_lock_table().await.exists()?;
        if !exists {
            info!("No {} available", self.lock_table());
        }
        Ok(exists)
    }

    /// Whether the lock table is usable and seeded. A positive answer is cached.
    pub async fn is_initialized(&mut self, table_just_created: bool) -> Result<bool> {
        if !self.initialized {
            self.initialized = self.initializer.check_initialized(table_just_created).await?;
        }
        Ok(self.initialized)
    }

    /// Whether row `ID = 1` is locked with exactly this holder and grant time.
    async fn row_stamped_by(&self, locked_by: &str, granted_millis: i64) -> Result<bool> {
        let result = self.session.query(&self.statements.select_lock_row()).await?;
        Ok(LockRecord::from_result(&result).iter().any(|record| {
            record.locked
                && record.locked_by.as_deref() == Some(locked_by)
                && record.lock_granted.map(|at| at.timestamp_millis()) == Some(granted_millis)
        }))
    }

    async fn rollback_quietly(&self) {
        if let Err(err) = self.session.rollback().await {
            warn!("Rollback after lock operation failed: {}", err);
        }
    }
}
