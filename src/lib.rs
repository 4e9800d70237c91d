// ============================================================================
// keyspace-lock Library
// ============================================================================
//
// Migration lock coordination for stores without transactions, where schema
// changes are applied asynchronously and become visible some time after the
// statement returns.

pub mod cancel;
pub mod config;
pub mod core;
pub mod ddl;
pub mod dialect;
pub mod identity;
pub mod init;
pub mod interface;
pub mod lock;
pub mod memory;
pub mod poller;
pub mod result;
pub mod statement;

// Re-export main types for convenience
pub use core::{LockError, LockRecord, Result, StoreError, StoreResult, TableRef, Value};
pub use result::QueryResult;
pub use statement::Statement;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use config::LockConfig;
pub use ddl::{StructuralChangeExecutor, StructuralChangeKind};
pub use dialect::DialectCapabilities;
pub use identity::{StaticIdentity, SystemIdentity};
pub use init::LockTableInitializer;
pub use interface::{CurrentKeyspaceProvider, FixedKeyspace, HostIdentity, StoreSession, TableProbe};
pub use lock::{LockAttemptOutcome, LockCoordinator, LockCoordinatorBuilder};
pub use memory::{MemorySession, MemoryStore, MemoryStoreOptions, MemoryStoreStats};
pub use poller::{ConvergencePoller, ConvergenceResult, ExpectedOutcome, PollBudget, TableState};
