use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{LockError, Result};

/// Lock coordination settings.
///
/// Durations are written as milliseconds when loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Lock table name
    pub lock_table: String,

    /// Keyspace used when the session cannot report one
    pub keyspace: Option<String>,

    /// Poll budget after a structural change issued by the engine
    pub create_poll_attempts: u32,

    #[serde(with = "duration_ms")]
    pub create_poll_interval: Duration,

    /// Poll budget for the lock table itself
    pub lock_table_poll_attempts: u32,

    #[serde(with = "duration_ms")]
    pub lock_table_poll_interval: Duration,

    /// Initialization attempts before the last error is surfaced
    pub init_max_iterations: u32,

    /// Upper bound of the randomized sleep between initialization attempts
    #[serde(with = "duration_ms")]
    pub init_max_jitter: Duration,

    /// Total time `wait_for_lock` keeps trying
    #[serde(with = "duration_ms")]
    pub lock_wait_time: Duration,

    #[serde(with = "duration_ms")]
    pub lock_recheck_interval: Duration,

    /// Treat an exhausted convergence budget as an error instead of assuming success
    pub fail_on_convergence_timeout: bool,
}

impl LockConfig {
    pub fn new() -> Self {
        Self {
            lock_table: "DATABASECHANGELOGLOCK".to_string(),
            keyspace: None,
            create_poll_attempts: 30,
            create_poll_interval: Duration::from_secs(5),
            lock_table_poll_attempts: 10,
            lock_table_poll_interval: Duration::from_secs(3),
            init_max_iterations: 20,
            init_max_jitter: Duration::from_millis(1000),
            lock_wait_time: Duration::from_secs(5 * 60),
            lock_recheck_interval: Duration::from_secs(10),
            fail_on_convergence_timeout: true,
        }
    }

    /// Set the lock table name
    pub fn lock_table(mut self, name: &str) -> Self {
        self.lock_table = name.to_string();
        self
    }

    /// Set the fallback keyspace
    pub fn keyspace(mut self, keyspace: &str) -> Self {
        self.keyspace = Some(keyspace.to_string());
        self
    }

    /// Set the structural-change poll budget
    pub fn create_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.create_poll_attempts = attempts;
        self.create_poll_interval = interval;
        self
    }

    /// Set the lock-table poll budget
    pub fn lock_table_polling(mut self, attempts: u32, interval: Duration) -> Self {
        self.lock_table_poll_attempts = attempts;
        self.lock_table_poll_interval = interval;
        self
    }

    /// Set initialization retries
    pub fn init_retries(mut self, iterations: u32, max_jitter: Duration) -> Self {
        self.init_max_iterations = iterations;
        self.init_max_jitter = max_jitter;
        self
    }

    /// Set the `wait_for_lock` budget
    pub fn lock_wait(mut self, wait_time: Duration, recheck_interval: Duration) -> Self {
        self.lock_wait_time = wait_time;
        self.lock_recheck_interval = recheck_interval;
        self
    }

    pub fn fail_on_convergence_timeout(mut self, fail: bool) -> Self {
        self.fail_on_convergence_timeout = fail;
        self
    }

    /// Parse a JSON document; absent fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LockError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.lock_table.trim().is_empty() {
            return Err(LockError::Config("lock_table cannot be empty".into()));
        }

        if self.create_poll_attempts == 0 || self.lock_table_poll_attempts == 0 {
            return Err(LockError::Config("poll attempts must be > 0".into()));
        }

        if self.init_max_iterations == 0 {
            return Err(LockError::Config("init_max_iterations must be > 0".into()));
        }

        if matches!(&self.keyspace, Some(ks) if ks.trim().is_empty()) {
            return Err(LockError::Config("keyspace cannot be blank".into()));
        }

        Ok(())
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert_eq!(config.lock_table, "DATABASECHANGELOGLOCK");
        assert_eq!(config.create_poll_attempts, 30);
        assert_eq!(config.lock_table_poll_interval, Duration::from_secs(3));
        assert_eq!(config.init_max_iterations, 20);
        assert!(config.fail_on_convergence_timeout);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = LockConfig::new()
            .lock_table("MIGRATION_LOCK")
            .keyspace("orders")
            .create_polling(5, Duration::from_millis(10))
            .init_retries(3, Duration::ZERO);

        assert_eq!(config.lock_table, "MIGRATION_LOCK");
        assert_eq!(config.keyspace.as_deref(), Some("orders"));
        assert_eq!(config.create_poll_attempts, 5);
        assert_eq!(config.init_max_jitter, Duration::ZERO);
    }

    #[test]
    fn test_from_json() {
        let config = LockConfig::from_json_str(
            r#"{ "keyspace": "billing", "lock_table_poll_interval": 250, "fail_on_convergence_timeout": false }"#,
        )
        .unwrap();

        assert_eq!(config.keyspace.as_deref(), Some("billing"));
        assert_eq!(config.lock_table_poll_interval, Duration::from_millis(250));
        assert!(!config.fail_on_convergence_timeout);
        assert_eq!(config.create_poll_attempts, 30);
    }

    #[test]
    fn test_from_json_rejects_unknown_and_invalid() {
        assert!(LockConfig::from_json_str(r#"{ "lock_tabel": "X" }"#).is_err());
        assert!(LockConfig::from_json_str(r#"{ "init_max_iterations": 0 }"#).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(LockConfig::new().lock_table(" ").validate().is_err());
        assert!(LockConfig::new().create_polling(0, Duration::ZERO).validate().is_err());
        assert!(LockConfig::new().keyspace("").validate().is_err());
    }
}
