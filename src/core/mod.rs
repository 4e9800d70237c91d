pub mod error;
pub mod types;
pub mod value;

pub use error::{LockError, Result, StoreError, StoreResult};
pub use types::{ColumnDef, ColumnType, LOCK_RECORD_ID, LockRecord, Row, TableRef};
pub use value::Value;
