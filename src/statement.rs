//! Typed statements issued against the store.
//!
//! Every statement renders to CQL text through `Display`, which is what a
//! driver-backed session sends over the wire. Sessions that understand the
//! structure (the in-memory store) match on the variants directly.

use std::fmt;

use crate::core::{ColumnDef, TableRef, Value};

/// Root statement type
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStmt),
    DropTable(DropTableStmt),
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
    /// Read from the store's table-status relation.
    TableStatus(TableStatusStmt),
    /// Pre-rendered text, passed through untouched.
    Raw(String),
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStmt {
    pub table: TableRef,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub if_not_exists: bool,
}

/// DROP TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DropTableStmt {
    pub table: TableRef,
    pub if_exists: bool,
}

/// `column = value`, used for key restrictions, filters and IF conditions.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub value: Value,
}

impl Predicate {
    pub fn equals(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
    CountAll,
}

/// SELECT statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub table: TableRef,
    pub projection: Projection,
    pub filter: Vec<Predicate>,
    pub limit: Option<usize>,
    /// Unbounded-scan opt-in; required to filter on a non-key column.
    pub allow_filtering: bool,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub if_not_exists: bool,
}

/// UPDATE statement
///
/// `conditions` turns the write into a conditional one: the store applies it
/// only when every condition holds for the addressed row.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: TableRef,
    pub assignments: Vec<(String, Value)>,
    pub key: Vec<Predicate>,
    pub conditions: Vec<Predicate>,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: TableRef,
    pub key: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableStatusStmt {
    pub relation: String,
    pub keyspace: String,
    pub table: String,
}

impl Statement {
    /// Table touched by the statement, when there is one.
    pub fn table(&self) -> Option<&TableRef> {
        match self {
            Self::CreateTable(stmt) => Some(&stmt.table),
            Self::DropTable(stmt) => Some(&stmt.table),
            Self::Select(stmt) => Some(&stmt.table),
            Self::Insert(stmt) => Some(&stmt.table),
            Self::Update(stmt) => Some(&stmt.table),
            Self::Delete(stmt) => Some(&stmt.table),
            Self::TableStatus(_) | Self::Raw(_) => None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self, Self::CreateTable(_) | Self::DropTable(_))
    }
}

fn join_predicates(f: &mut fmt::Formatter<'_>, predicates: &[Predicate]) -> fmt::Result {
    for (i, predicate) in predicates.iter().enumerate() {
        if i > 0 {
            write!(f, " AND ")?;
        }
        write!(f, "{} = {}", predicate.column, predicate.value.literal())?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(stmt) => {
                write!(f, "CREATE TABLE ")?;
                if stmt.if_not_exists {
                    write!(f, "IF NOT EXISTS ")?;
                }
                write!(f, "{} (", stmt.table)?;
                for column in &stmt.columns {
                    write!(f, "{} {}, ", column.name, column.data_type)?;
                }
                write!(f, "PRIMARY KEY ({}))", stmt.primary_key.join(", "))
            }
            Self::DropTable(stmt) => {
                write!(f, "DROP TABLE ")?;
                if stmt.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", stmt.table)
            }
            Self::Select(stmt) => {
                match &stmt.projection {
                    Projection::All => write!(f, "SELECT * FROM {}", stmt.table)?,
                    Projection::Columns(columns) => {
                        write!(f, "SELECT {} FROM {}", columns.join(", "), stmt.table)?
                    }
                    Projection::CountAll => write!(f, "SELECT COUNT(*) FROM {}", stmt.table)?,
                }
                if !stmt.filter.is_empty() {
                    write!(f, " WHERE ")?;
                    join_predicates(f, &stmt.filter)?;
                }
                if let Some(limit) = stmt.limit {
                    write!(f, " LIMIT {}", limit)?;
                }
                if stmt.allow_filtering {
                    write!(f, " ALLOW FILTERING")?;
                }
                Ok(())
            }
            Self::Insert(stmt) => {
                let values: Vec<String> = stmt.values.iter().map(Value::literal).collect();
                write!(
                    f,
                    "INSERT INTO {} ({}) VALUES ({})",
                    stmt.table,
                    stmt.columns.join(", "),
                    values.join(", ")
                )?;
                if stmt.if_not_exists {
                    write!(f, " IF NOT EXISTS")?;
                }
                Ok(())
            }
            Self::Update(stmt) => {
                let assignments: Vec<String> = stmt
                    .assignments
                    .iter()
                    .map(|(column, value)| format!("{} = {}", column, value.literal()))
                    .collect();
                write!(f, "UPDATE {} SET {} WHERE ", stmt.table, assignments.join(", "))?;
                join_predicates(f, &stmt.key)?;
                if !stmt.conditions.is_empty() {
                    write!(f, " IF ")?;
                    join_predicates(f, &stmt.conditions)?;
                }
                Ok(())
            }
            Self::Delete(stmt) => {
                write!(f, "DELETE FROM {} WHERE ", stmt.table)?;
                join_predicates(f, &stmt.key)
            }
            Self::TableStatus(stmt) => write!(
                f,
                "SELECT keyspace_name, table_name, status FROM {} WHERE keyspace_name = {} AND table_name = {}",
                stmt.relation,
                Value::from(stmt.keyspace.as_str()).literal(),
                Value::from(stmt.table.as_str()).literal()
            ),
            Self::Raw(sql) => write!(f, "{}", sql),
        }
    }
}
