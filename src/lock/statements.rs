//! Statements against the lock table.

use crate::core::{ColumnDef, ColumnType, LOCK_RECORD_ID, TableRef, Value};
use crate::dialect::DialectCapabilities;
use crate::statement::{
    CreateTableStmt, DeleteStmt, DropTableStmt, InsertStmt, Predicate, Projection, SelectStmt,
    Statement, UpdateStmt,
};

pub const COLUMN_ID: &str = "ID";
pub const COLUMN_LOCKED: &str = "LOCKED";
pub const COLUMN_LOCKED_BY: &str = "LOCKEDBY";
pub const COLUMN_LOCK_GRANTED: &str = "LOCKGRANTED";

#[derive(Debug, Clone)]
pub struct LockStatements {
    table: TableRef,
    conditional: bool,
}

impl LockStatements {
    pub fn new(table: TableRef, dialect: &DialectCapabilities) -> Self {
        Self {
            table,
            conditional: dialect.supports_conditional_writes,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn create_table(&self) -> Statement {
        Statement::CreateTable(CreateTableStmt {
            table: self.table.clone(),
            columns: vec![
                ColumnDef::new(COLUMN_ID, ColumnType::Int),
                ColumnDef::new(COLUMN_LOCKED, ColumnType::Boolean),
                ColumnDef::new(COLUMN_LOCKED_BY, ColumnType::Text),
                ColumnDef::new(COLUMN_LOCK_GRANTED, ColumnType::Timestamp),
            ],
            primary_key: vec![COLUMN_ID.to_string()],
            if_not_exists: true,
        })
    }

    pub fn drop_table(&self) -> Statement {
        Statement::DropTable(DropTableStmt {
            table: self.table.clone(),
            if_exists: true,
        })
    }

    /// Bounded existence probe. Never an aggregate.
    pub fn probe(&self) -> Statement {
        self.select(Projection::All, Vec::new(), Some(1), false)
    }

    pub fn select_all(&self) -> Statement {
        self.select(Projection::All, Vec::new(), None, false)
    }

    /// Plain row count for stores that support aggregates.
    pub fn count(&self) -> Statement {
        self.select(Projection::CountAll, Vec::new(), None, false)
    }

    /// Rows currently marked as locked. `LOCKED` is not part of the key, so
    /// this needs the unbounded-scan opt-in.
    pub fn select_locked(&self) -> Statement {
        self.select(
            Projection::Columns(vec![COLUMN_ID.to_string(), COLUMN_LOCKED.to_string()]),
            vec![Predicate::equals(COLUMN_LOCKED, true)],
            None,
            true,
        )
    }

    /// Reads one `LOCKED` value to detect the pre-boolean column format.
    /// The lock row, addressed by key.
    pub fn select_lock_row(&self) -> Statement {
        self.select(
            Projection::All,
            vec![Predicate::equals(COLUMN_ID, LOCK_RECORD_ID)],
            None,
            false,
        )
    }

    pub fn legacy_probe(&self) -> Statement {
        self.select(
            Projection::Columns(vec![COLUMN_LOCKED.to_string()]),
            Vec::new(),
            Some(1),
            false,
        )
    }

    /// The single unlocked seed row.
    pub fn seed(&self) -> Statement {
        Statement::Insert(InsertStmt {
            table: self.table.clone(),
            columns: vec![COLUMN_ID.to_string(), COLUMN_LOCKED.to_string()],
            values: vec![Value::Integer(LOCK_RECORD_ID), Value::Boolean(false)],
            if_not_exists: self.conditional,
        })
    }

    pub fn delete_row(&self, id: Value) -> Statement {
        Statement::Delete(DeleteStmt {
            table: self.table.clone(),
            key: vec![Predicate::equals(COLUMN_ID, id)],
        })
    }

    pub fn lock(&self, locked_by: &str, granted_millis: i64) -> Statement {
        let conditions = if self.conditional {
            vec![Predicate::equals(COLUMN_LOCKED, false)]
        } else {
            Vec::new()
        };

        Statement::Update(UpdateStmt {
            table: self.table.clone(),
            assignments: vec![
                (COLUMN_LOCKED.to_string(), Value::Boolean(true)),
                (COLUMN_LOCKED_BY.to_string(), Value::from(locked_by)),
                (COLUMN_LOCK_GRANTED.to_string(), Value::Timestamp(granted_millis)),
            ],
            key: vec![Predicate::equals(COLUMN_ID, LOCK_RECORD_ID)],
            conditions,
        })
    }

    pub fn unlock(&self) -> Statement {
        Statement::Update(UpdateStmt {
            table: self.table.clone(),
            assignments: vec![
                (COLUMN_LOCKED.to_string(), Value::Boolean(false)),
                (COLUMN_LOCKED_BY.to_string(), Value::Null),
            ],
            key: vec![Predicate::equals(COLUMN_ID, LOCK_RECORD_ID)],
            conditions: Vec::new(),
        })
    }

    fn select(
        &self,
        projection: Projection,
        filter: Vec<Predicate>,
        limit: Option<usize>,
        allow_filtering: bool,
    ) -> Statement {
        Statement::Select(SelectStmt {
            table: self.table.clone(),
            projection,
            filter,
            limit,
            allow_filtering,
        })
    }
}
