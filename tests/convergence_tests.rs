mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{KEYSPACE, create_table, drop_table, managed_store};
use keyspace_lock::interface::StoreSession;
use keyspace_lock::{
    ConvergencePoller, ConvergenceResult, DialectCapabilities, ExpectedOutcome, LockError,
    PollBudget, StoreError, TableRef, TableState, cancel_pair,
};
use tokio_test::{assert_err, assert_ok};

fn poller(store: &keyspace_lock::MemoryStore) -> ConvergencePoller {
    ConvergencePoller::new(
        Arc::new(store.session()),
        &DialectCapabilities::managed_keyspaces(),
    )
}

fn budget(attempts: u32) -> PollBudget {
    PollBudget::new(attempts, Duration::from_millis(1))
}

#[tokio::test]
async fn test_create_converges_after_creating_states() {
    let store = managed_store(2);
    store.session().update(&create_table("ORDERS")).await.unwrap();

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Created, budget(5))
        .await
        .unwrap();

    // CREATING, CREATING, ACTIVE
    assert_eq!(result, ConvergenceResult::Converged { attempts: 3 });
    assert_eq!(store.stats().await.status_polls, 3);
}

#[tokio::test]
async fn test_create_timeout_is_reported() {
    let store = managed_store(10);
    store.session().update(&create_table("ORDERS")).await.unwrap();

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Created, budget(3))
        .await
        .unwrap();

    assert_eq!(
        result,
        ConvergenceResult::TimedOut {
            attempts: 3,
            last_state: TableState::Creating,
        }
    );
    assert_eq!(store.stats().await.status_polls, 3);

    assert_ok!(result.clone().ensure(&table, ExpectedOutcome::Created, false));
    let err = assert_err!(result.ensure(&table, ExpectedOutcome::Created, true));
    assert!(matches!(err, LockError::ConvergenceTimeout { attempts: 3, .. }));
}

#[tokio::test]
async fn test_unexpected_status_stops_polling() {
    let store = managed_store(0);
    store.session().update(&create_table("ORDERS")).await.unwrap();
    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    store.force_status(&table, "ERROR").await;

    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Created, budget(5))
        .await
        .unwrap();

    assert_eq!(
        result,
        ConvergenceResult::UnexpectedState {
            status: "ERROR".into()
        }
    );
    assert_eq!(store.stats().await.status_polls, 1);

    let err = assert_err!(result.ensure(&table, ExpectedOutcome::Created, false));
    assert!(err.is_integrity());
    assert_eq!(err.to_string(), "migrations.ORDERS table in ERROR state");
}

#[tokio::test]
async fn test_drop_of_missing_table_converges_immediately() {
    let store = managed_store(2);
    let table = TableRef::qualified(KEYSPACE, "NEVER_CREATED");

    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Dropped, budget(5))
        .await
        .unwrap();

    assert_eq!(result, ConvergenceResult::Converged { attempts: 1 });
}

#[tokio::test]
async fn test_create_of_unregistered_table_is_absent_after_one_poll() {
    let store = managed_store(2);
    let table = TableRef::qualified(KEYSPACE, "NEVER_CREATED");

    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Created, budget(5))
        .await
        .unwrap();

    assert_eq!(result, ConvergenceResult::Absent { attempts: 1 });
    assert_eq!(store.stats().await.status_polls, 1);

    let err = assert_err!(result.ensure(&table, ExpectedOutcome::Created, false));
    assert!(matches!(err, LockError::NotRegistered { .. }));
}

#[tokio::test]
async fn test_drop_waits_while_deleting() {
    let store = managed_store(2);
    let session = store.session();
    session.update(&create_table("ORDERS")).await.unwrap();
    store.settle_ddl().await;
    session.update(&drop_table("ORDERS")).await.unwrap();

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Dropped, budget(5))
        .await
        .unwrap();

    // DELETING, DELETING, gone
    assert_eq!(result, ConvergenceResult::Converged { attempts: 3 });
    assert!(store.table_names().await.is_empty());
}

#[tokio::test]
async fn test_active_table_while_waiting_for_drop_is_unexpected() {
    let store = managed_store(0);
    store.session().update(&create_table("ORDERS")).await.unwrap();

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Dropped, budget(5))
        .await
        .unwrap();

    assert_eq!(
        result,
        ConvergenceResult::UnexpectedState {
            status: "ACTIVE".into()
        }
    );
}

#[tokio::test]
async fn test_cancel_interrupts_polling() {
    let store = managed_store(100);
    store.session().update(&create_table("ORDERS")).await.unwrap();
    let (handle, signal) = cancel_pair();
    let poller = poller(&store).with_cancel_signal(signal);
    let table = TableRef::qualified(KEYSPACE, "ORDERS");

    let (result, _) = tokio::join!(
        poller.await_convergence(
            &table,
            ExpectedOutcome::Created,
            PollBudget::new(100, Duration::from_secs(1)),
        ),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel();
        }
    );

    assert!(matches!(result, Err(StoreError::Interrupted(_))));
    assert_eq!(store.stats().await.status_polls, 1);
}

#[tokio::test]
async fn test_status_read_requires_keyspace() {
    let store = managed_store(0);
    let unqualified = TableRef::new(None, "ORDERS");

    let err = assert_err!(poller(&store).table_state(&unqualified).await);
    assert!(matches!(err, StoreError::ExecutionError(_)));
}

#[tokio::test]
async fn test_status_query_failure_propagates() {
    let store = managed_store(2);
    store.session().update(&create_table("ORDERS")).await.unwrap();
    store.fail_next_queries(1).await;

    let table = TableRef::qualified(KEYSPACE, "ORDERS");
    let result = poller(&store)
        .await_convergence(&table, ExpectedOutcome::Created, budget(5))
        .await;

    assert!(matches!(result, Err(StoreError::ConnectionError(_))));
}
