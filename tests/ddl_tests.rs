mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{KEYSPACE, cassandra_store, create_table, drop_table, fast_config, managed_store};
use keyspace_lock::interface::StoreSession;
use keyspace_lock::statement::{Projection, SelectStmt};
use keyspace_lock::{
    DialectCapabilities, LockConfig, LockError, MemoryStore, Statement, StructuralChangeExecutor,
    StructuralChangeKind, TableRef,
};
use tokio_test::{assert_err, assert_ok};

fn executor(store: &MemoryStore, dialect: DialectCapabilities, config: &LockConfig) -> StructuralChangeExecutor {
    StructuralChangeExecutor::new(Arc::new(store.session()), Arc::new(dialect), config)
}

fn select_all(name: &str) -> Statement {
    Statement::Select(SelectStmt {
        table: TableRef::qualified(KEYSPACE, name),
        projection: Projection::All,
        filter: Vec::new(),
        limit: None,
        allow_filtering: false,
    })
}

#[tokio::test]
async fn test_create_returns_once_table_is_usable() {
    let store = managed_store(3);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &fast_config());

    assert_ok!(ddl.execute(&create_table("ORDERS")).await);
    assert_eq!(store.stats().await.status_polls, 4);
    assert_ok!(store.session().query(&select_all("ORDERS")).await);
}

#[tokio::test]
async fn test_drop_returns_once_table_is_gone() {
    let store = managed_store(2);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &fast_config());
    ddl.execute(&create_table("ORDERS")).await.unwrap();

    assert_ok!(ddl.execute(&drop_table("ORDERS")).await);
    assert!(store.table_names().await.is_empty());
}

#[tokio::test]
async fn test_synchronous_store_is_not_polled() {
    let store = cassandra_store();
    let ddl = executor(&store, DialectCapabilities::cassandra(), &fast_config());

    assert_ok!(ddl.execute(&create_table("ORDERS")).await);
    assert_ok!(
        ddl.after_structural_change(
            StructuralChangeKind::Drop,
            &TableRef::qualified(KEYSPACE, "ORDERS")
        )
        .await
    );
    assert_eq!(store.stats().await.status_polls, 0);
}

#[tokio::test]
async fn test_only_structural_statements_are_accepted() {
    let store = managed_store(0);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &fast_config());

    let err = assert_err!(ddl.execute(&select_all("ORDERS")).await);
    assert!(matches!(err, LockError::Config(_)));
    assert_eq!(store.stats().await.updates, 0);
}

#[tokio::test]
async fn test_timeout_policy_follows_config() {
    let store = managed_store(1_000);
    let strict = fast_config().create_polling(2, Duration::from_millis(1));
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &strict);

    let err = assert_err!(ddl.execute(&create_table("ORDERS")).await);
    assert!(matches!(err, LockError::ConvergenceTimeout { attempts: 2, .. }));

    let lenient = strict.fail_on_convergence_timeout(false);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &lenient);
    assert_ok!(ddl.execute(&create_table("INVOICES")).await);
}

#[tokio::test]
async fn test_create_that_never_registers_fails_fast() {
    let store = managed_store(0);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &fast_config());

    let err = assert_err!(
        ddl.after_structural_change(
            StructuralChangeKind::Create,
            &TableRef::qualified(KEYSPACE, "ORDERS")
        )
        .await
    );
    assert!(matches!(err, LockError::NotRegistered { .. }));
    assert_eq!(store.stats().await.status_polls, 1);
}

#[tokio::test]
async fn test_failed_table_status_is_an_error() {
    let store = managed_store(0);
    let ddl = executor(&store, DialectCapabilities::managed_keyspaces(), &fast_config());
    ddl.execute(&create_table("ORDERS")).await.unwrap();

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    store.force_status(&table, "INACCESSIBLE_ENCRYPTION_CREDENTIALS").await;

    let err = assert_err!(
        ddl.after_structural_change(StructuralChangeKind::Create, &table)
            .await
    );
    assert!(matches!(err, LockError::UnexpectedState { .. }));
}
