mod common;

use common::{KEYSPACE, cassandra_store, create_table, managed_store};
use keyspace_lock::interface::StoreSession;
use keyspace_lock::statement::{InsertStmt, Predicate, Projection, SelectStmt, UpdateStmt};
use keyspace_lock::{Statement, StoreError, TableRef, Value};
use tokio_test::{assert_err, assert_ok};

fn orders() -> TableRef {
    TableRef::qualified(KEYSPACE, "ORDERS")
}

fn select(projection: Projection, filter: Vec<Predicate>, allow_filtering: bool) -> Statement {
    Statement::Select(SelectStmt {
        table: orders(),
        projection,
        filter,
        limit: None,
        allow_filtering,
    })
}

fn insert(id: i64, author: &str, if_not_exists: bool) -> Statement {
    Statement::Insert(InsertStmt {
        table: orders(),
        columns: vec!["ID".into(), "AUTHOR".into()],
        values: vec![Value::Integer(id), Value::from(author)],
        if_not_exists,
    })
}

#[tokio::test]
async fn test_table_is_not_queryable_while_creating() {
    let store = managed_store(1);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    let err = assert_err!(session.query(&select(Projection::All, vec![], false)).await);
    assert!(err.is_not_found());

    store.settle_ddl().await;
    assert_ok!(session.query(&select(Projection::All, vec![], false)).await);
}

#[tokio::test]
async fn test_non_key_filter_requires_allow_filtering() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();
    session.update(&insert(1, "ada", false)).await.unwrap();

    let filter = vec![Predicate::equals("AUTHOR", "ada")];
    let err = assert_err!(session.query(&select(Projection::All, filter.clone(), false)).await);
    assert!(matches!(err, StoreError::ExecutionError(_)));

    let result = session
        .query(&select(Projection::All, filter, true))
        .await
        .unwrap();
    assert_eq!(result.row_count(), 1);
}

#[tokio::test]
async fn test_count_and_truncate_depend_on_store() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    let err = assert_err!(session.query(&select(Projection::CountAll, vec![], false)).await);
    assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    let err = assert_err!(session.execute_raw("TRUNCATE migrations.ORDERS").await);
    assert!(matches!(err, StoreError::UnsupportedOperation(_)));

    let store = cassandra_store();
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();
    session.update(&insert(1, "ada", false)).await.unwrap();
    session.update(&insert(2, "grace", false)).await.unwrap();

    let result = session
        .query(&select(Projection::CountAll, vec![], false))
        .await
        .unwrap();
    assert_eq!(result.first_value("count"), Some(&Value::Integer(2)));
    assert_eq!(session.execute_raw("TRUNCATE TABLE migrations.ORDERS").await.unwrap(), 2);
}

#[tokio::test]
async fn test_conditional_writes_report_applied_rows() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    assert_eq!(session.update(&insert(1, "ada", true)).await.unwrap(), 1);
    assert_eq!(session.update(&insert(1, "grace", true)).await.unwrap(), 0);

    let claim = |author: &str, expected: &str| {
        Statement::Update(UpdateStmt {
            table: orders(),
            assignments: vec![("AUTHOR".into(), Value::from(author))],
            key: vec![Predicate::equals("ID", 1)],
            conditions: vec![Predicate::equals("AUTHOR", expected)],
        })
    };
    assert_eq!(session.update(&claim("grace", "ada")).await.unwrap(), 1);
    assert_eq!(session.update(&claim("linus", "ada")).await.unwrap(), 0);

    let rows = store.rows(&orders()).await.unwrap();
    assert_eq!(rows, vec![vec![Value::Integer(1), Value::from("grace")]]);
}

#[tokio::test]
async fn test_raw_path_only_knows_issued_statements() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    let err = assert_err!(session.execute_raw("UPDATE migrations.ORDERS SET X = 1").await);
    assert!(matches!(err, StoreError::ParseError(_)));

    store.ambiguous_next_updates(1).await;
    let statement = insert(7, "ada", true);
    assert_eq!(session.update(&statement).await.unwrap(), -1);
    assert!(store.rows(&orders()).await.unwrap().is_empty());

    assert_eq!(store.withheld_statements().await, 1);

    assert_eq!(session.execute_raw(&statement.to_string()).await.unwrap(), 1);
    assert_eq!(store.rows(&orders()).await.unwrap().len(), 1);

    // Replayed once, then forgotten.
    assert_eq!(store.withheld_statements().await, 0);
    let err = assert_err!(session.execute_raw(&statement.to_string()).await);
    assert!(matches!(err, StoreError::ParseError(_)));
}

#[tokio::test]
async fn test_counted_writes_are_not_kept_for_raw_path() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    for id in 0..50 {
        session.update(&insert(id, "ada", false)).await.unwrap();
    }
    assert_eq!(store.withheld_statements().await, 0);
}

#[tokio::test]
async fn test_uncounted_write_is_applied() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    store.uncounted_next_updates(1).await;
    let statement = insert(7, "ada", true);
    assert_eq!(session.update(&statement).await.unwrap(), -1);
    assert_eq!(store.rows(&orders()).await.unwrap().len(), 1);

    // Re-issuing the conditional insert finds the row already there.
    assert_eq!(session.execute_raw(&statement.to_string()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_without_key_is_rejected() {
    let store = managed_store(0);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    let statement = Statement::Update(UpdateStmt {
        table: orders(),
        assignments: vec![("AUTHOR".into(), Value::from("ada"))],
        key: vec![Predicate::equals("AUTHOR", "grace")],
        conditions: vec![],
    });
    let err = assert_err!(session.update(&statement).await);
    assert!(matches!(err, StoreError::ExecutionError(_)));
}

#[tokio::test]
async fn test_status_relation_reports_lifecycle() {
    let store = managed_store(1);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();

    let status = Statement::TableStatus(keyspace_lock::statement::TableStatusStmt {
        relation: "system_schema_mcs.tables".into(),
        keyspace: KEYSPACE.into(),
        table: "orders".into(),
    });

    let first = session.query(&status).await.unwrap();
    assert_eq!(first.first_value("status"), Some(&Value::from("CREATING")));
    let second = session.query(&status).await.unwrap();
    assert_eq!(second.first_value("status"), Some(&Value::from("ACTIVE")));
}
