#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use keyspace_lock::core::{ColumnDef, ColumnType};
use keyspace_lock::statement::{CreateTableStmt, DropTableStmt};
use keyspace_lock::{
    DialectCapabilities, LockConfig, LockCoordinator, MemoryStore, MemoryStoreOptions,
    StaticIdentity, Statement, TableRef,
};

pub const KEYSPACE: &str = "migrations";

/// Defaults scaled down to milliseconds.
pub fn fast_config() -> LockConfig {
    LockConfig::new()
        .create_polling(5, Duration::from_millis(2))
        .lock_table_polling(8, Duration::from_millis(2))
        .init_retries(5, Duration::from_millis(5))
        .lock_wait(Duration::from_millis(60), Duration::from_millis(10))
}

/// Store behaving like the managed service, with `latency` polls per DDL.
pub fn managed_store(latency: u32) -> MemoryStore {
    MemoryStore::with_options(MemoryStoreOptions {
        ddl_latency_polls: latency,
        ..Default::default()
    })
}

/// Store behaving like self-hosted Cassandra.
pub fn cassandra_store() -> MemoryStore {
    MemoryStore::with_options(MemoryStoreOptions {
        ddl_latency_polls: 0,
        supports_count: true,
        supports_truncate: true,
        ..Default::default()
    })
}

pub fn coordinator(store: &MemoryStore, host: &str) -> LockCoordinator {
    coordinator_with(
        store,
        host,
        DialectCapabilities::managed_keyspaces(),
        fast_config(),
    )
}

pub fn coordinator_with(
    store: &MemoryStore,
    host: &str,
    dialect: DialectCapabilities,
    config: LockConfig,
) -> LockCoordinator {
    let session = store.session();
    LockCoordinator::builder(Arc::new(session.clone()))
        .dialect(dialect)
        .config(config)
        .identity(Arc::new(StaticIdentity::new(host, "10.0.0.1")))
        .keyspace_provider(Arc::new(session))
        .build()
        .unwrap()
}

pub fn lock_table() -> TableRef {
    TableRef::qualified(KEYSPACE, "DATABASECHANGELOGLOCK")
}

pub fn create_table(name: &str) -> Statement {
    Statement::CreateTable(CreateTableStmt {
        table: TableRef::qualified(KEYSPACE, name),
        columns: vec![
            ColumnDef::new("ID", ColumnType::Int),
            ColumnDef::new("AUTHOR", ColumnType::Text),
        ],
        primary_key: vec!["ID".to_string()],
        if_not_exists: true,
    })
}

pub fn drop_table(name: &str) -> Statement {
    Statement::DropTable(DropTableStmt {
        table: TableRef::qualified(KEYSPACE, name),
        if_exists: true,
    })
}
