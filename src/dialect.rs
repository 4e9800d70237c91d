//! Static facts about the target store.
//!
//! Nothing here talks to the store; the coordinator, the initializer and the
//! poller consult these flags to pick the code path that is safe for it.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MANAGED_ENDPOINT: Regex =
        Regex::new(r"^jdbc:cassandra://cassandra(-fips)?\..+\.amazonaws\.com:.+").unwrap();
}

/// Relation the managed store uses to report table lifecycle status.
pub const MANAGED_STATUS_RELATION: &str = "system_schema_mcs.tables";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectCapabilities {
    pub product_name: &'static str,
    pub short_name: &'static str,
    pub default_port: u16,

    pub supports_transactions: bool,
    pub supports_row_count_aggregate: bool,
    /// Until a lock table exists, a reset is simulated by deleting rows one at a time.
    pub supports_truncate: bool,
    pub supports_cascading_drop: bool,
    pub supports_sequences: bool,
    pub supports_schemas: bool,
    pub supports_tablespaces: bool,
    /// Lightweight `IF ...` writes whose applied-row count can be trusted.
    pub supports_conditional_writes: bool,
    pub identifiers_case_sensitive: bool,
    /// The keyspace plays the role of the catalog.
    pub keyspace_is_catalog: bool,
    pub auto_commit: bool,

    pub ddl_is_asynchronous: bool,
    /// Documented worst case for a create or drop to converge. Sizes polling
    /// budgets only; never used as a hard timeout.
    pub ddl_convergence_sla: Option<Duration>,
    pub status_relation: Option<&'static str>,

    /// Re-check the lock table for a pre-boolean `LOCKED` column on start-up.
    pub legacy_boolean_check: bool,
    /// Wrapper for the raw re-issue of a write whose row count came back
    /// ambiguous. `{sql}` is replaced by the statement with quotes doubled.
    pub exact_count_template: Option<&'static str>,
}

impl DialectCapabilities {
    /// The managed keyspace service: asynchronous DDL, no aggregates, no TRUNCATE.
    pub fn managed_keyspaces() -> Self {
        Self {
            product_name: "Keyspace",
            short_name: "keyspace",
            default_port: 9142,
            supports_transactions: false,
            supports_row_count_aggregate: false,
            supports_truncate: false,
            supports_cascading_drop: false,
            supports_sequences: false,
            supports_schemas: false,
            supports_tablespaces: false,
            supports_conditional_writes: true,
            identifiers_case_sensitive: true,
            keyspace_is_catalog: true,
            auto_commit: true,
            ddl_is_asynchronous: true,
            ddl_convergence_sla: Some(Duration::from_secs(30 * 60)),
            status_relation: Some(MANAGED_STATUS_RELATION),
            legacy_boolean_check: false,
            exact_count_template: None,
        }
    }

    /// Self-hosted Cassandra: schema changes are applied before the statement returns.
    pub fn cassandra() -> Self {
        Self {
            product_name: "Cassandra",
            short_name: "cassandra",
            default_port: 9042,
            supports_row_count_aggregate: true,
            supports_truncate: true,
            ddl_is_asynchronous: false,
            ddl_convergence_sla: None,
            status_relation: None,
            ..Self::managed_keyspaces()
        }
    }

    /// Pick the descriptor from a JDBC-style connection URL.
    pub fn for_url(url: &str) -> Option<Self> {
        if Self::url_maps_to_managed(url) {
            Some(Self::managed_keyspaces())
        } else if url.starts_with("jdbc:cassandra://") {
            Some(Self::cassandra())
        } else {
            None
        }
    }

    pub fn url_maps_to_managed(url: &str) -> bool {
        MANAGED_ENDPOINT.is_match(url)
    }

    /// Current time as the store sees it. There is no server-side function, so
    /// this is the client clock in milliseconds.
    pub fn current_time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Text sent through the raw path when re-issuing a write for an exact count.
    pub fn exact_count_sql(&self, sql: &str) -> String {
        match self.exact_count_template {
            Some(template) => template.replace("{sql}", &sql.replace('\'', "''")),
            None => sql.to_string(),
        }
    }

    /// Polls needed to cover the documented convergence SLA at `interval`.
    pub fn attempts_for_sla(&self, interval: Duration) -> Option<u32> {
        let sla = self.ddl_convergence_sla?;
        if interval.is_zero() {
            return None;
        }
        let attempts = sla.as_millis().div_ceil(interval.as_millis());
        Some(u32::try_from(attempts).unwrap_or(u32::MAX))
    }
}

impl Default for DialectCapabilities {
    fn default() -> Self {
        Self::managed_keyspaces()
    }
}
