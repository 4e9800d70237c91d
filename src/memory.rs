//! In-process store with the limitations of the managed keyspace service.
//!
//! Used by tests and dry runs. It keeps the behaviours the lock protocol has
//! to survive:
//! - `CREATE TABLE` / `DROP TABLE` settle only after a number of status polls
//! - no `COUNT(*)`, no `TRUNCATE`
//! - filtering on a non-key column requires `ALLOW FILTERING`
//! - `IF` conditions and `IF NOT EXISTS` report how many rows they applied to
//! - faults (failed reads/writes, ambiguous row counts, stuck statuses) can be injected
//!
//! The raw path only understands writes whose row count was withheld, which
//! is the one case a client re-issues a statement as text.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::{ColumnDef, Row, StoreError, StoreResult, TableRef, Value};
use crate::interface::{CurrentKeyspaceProvider, StoreSession};
use crate::result::QueryResult;
use crate::statement::{
    CreateTableStmt, DeleteStmt, DropTableStmt, InsertStmt, Predicate, Projection, SelectStmt,
    Statement, TableStatusStmt, UpdateStmt,
};

#[derive(Debug, Clone)]
pub struct MemoryStoreOptions {
    /// Keyspace sessions report as logged in, and used for unqualified names.
    pub keyspace: String,
    /// Status polls a create or drop stays in CREATING / DELETING. Zero makes DDL synchronous.
    pub ddl_latency_polls: u32,
    pub supports_count: bool,
    pub supports_truncate: bool,
}

impl Default for MemoryStoreOptions {
    fn default() -> Self {
        Self {
            keyspace: "migrations".to_string(),
            ddl_latency_polls: 0,
            supports_count: false,
            supports_truncate: false,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStoreStats {
    pub queries: u64,
    pub updates: u64,
    pub raw_executions: u64,
    pub status_polls: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Creating { polls_left: u32 },
    Active,
    Deleting { polls_left: u32 },
}

#[derive(Debug)]
struct MemTable {
    name: String,
    columns: Vec<ColumnDef>,
    primary_key: Vec<String>,
    rows: Vec<Row>,
    lifecycle: Lifecycle,
    forced_status: Option<String>,
}

impl MemTable {
    fn column_index(&self, name: &str) -> StoreResult<usize> {
        self.columns
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                StoreError::ExecutionError(format!("Undefined column name {} in {}", name, self.name))
            })
    }

    fn is_key(&self, column: &str) -> bool {
        self.primary_key
            .iter()
            .any(|key| key.eq_ignore_ascii_case(column))
    }

    /// Key predicates must name every primary key column and nothing else.
    fn check_key(&self, key: &[Predicate]) -> StoreResult<()> {
        let covered = self
            .primary_key
            .iter()
            .all(|pk| key.iter().any(|p| p.column.eq_ignore_ascii_case(pk)));
        if !covered || key.iter().any(|p| !self.is_key(&p.column)) {
            return Err(StoreError::ExecutionError(format!(
                "Some partition key parts are missing or non-key columns restricted in {}",
                self.name
            )));
        }
        Ok(())
    }

    fn matches(&self, row: &Row, predicates: &[Predicate]) -> StoreResult<bool> {
        for predicate in predicates {
            let index = self.column_index(&predicate.column)?;
            if row.get(index) != Some(&predicate.value) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matching_rows(&self, predicates: &[Predicate]) -> StoreResult<Vec<usize>> {
        let mut found = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            if self.matches(row, predicates)? {
                found.push(i);
            }
        }
        Ok(found)
    }

    fn assign(&mut self, row: usize, assignments: &[(String, Value)]) -> StoreResult<()> {
        for (column, value) in assignments {
            let index = self.column_index(column)?;
            self.rows[row][index] = value.clone();
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_queries: u32,
    failing_updates: u32,
    ambiguous_updates: u32,
    uncounted_updates: u32,
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, MemTable>,
    faults: Faults,
    stats: MemoryStoreStats,
    /// Writes answered with `-1`, by rendered text, until replayed raw.
    withheld: HashMap<String, Statement>,
}

/// Shared store; clones see the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
    options: Arc<MemoryStoreOptions>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_options(MemoryStoreOptions::default())
    }

    pub fn with_options(options: MemoryStoreOptions) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &MemoryStoreOptions {
        &self.options
    }

    /// A new session, as a separate runner process would open.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
        }
    }

    pub async fn stats(&self) -> MemoryStoreStats {
        self.state.lock().await.stats
    }

    /// Names of every table the store knows, whatever their status.
    pub async fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().await.tables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rows of a table, bypassing lifecycle checks.
    pub async fn rows(&self, table: &TableRef) -> Option<Vec<Row>> {
        let key = self.table_key(table);
        let state = self.state.lock().await;
        state.tables.get(&key).map(|t| t.rows.clone())
    }

    /// Appends a row without any key checks, to model a corrupted table.
    pub async fn insert_raw_row(&self, table: &TableRef, row: Row) -> StoreResult<()> {
        let key = self.table_key(table);
        let mut state = self.state.lock().await;
        let table = state
            .tables
            .get_mut(&key)
            .ok_or_else(|| StoreError::TableNotFound(key.clone()))?;
        table.rows.push(row);
        Ok(())
    }

    /// Pin the status reported for a table, e.g. `"ERROR"`.
    pub async fn force_status(&self, table: &TableRef, status: &str) {
        let key = self.table_key(table);
        let mut state = self.state.lock().await;
        if let Some(table) = state.tables.get_mut(&key) {
            table.forced_status = Some(status.to_string());
        }
    }

    /// Finish every pending create and drop.
    pub async fn settle_ddl(&self) {
        let mut state = self.state.lock().await;
        state
            .tables
            .retain(|_, table| !matches!(table.lifecycle, Lifecycle::Deleting { .. }));
        for table in state.tables.values_mut() {
            table.lifecycle = Lifecycle::Active;
        }
    }

    pub async fn fail_next_queries(&self, count: u32) {
        self.state.lock().await.faults.failing_queries = count;
    }

    pub async fn fail_next_updates(&self, count: u32) {
        self.state.lock().await.faults.failing_updates = count;
    }

    /// The next `count` writes report `-1` rows and are not applied.
    pub async fn ambiguous_next_updates(&self, count: u32) {
        self.state.lock().await.faults.ambiguous_updates = count;
    }

    /// The next `count` writes are applied but report `-1` rows.
    pub async fn uncounted_next_updates(&self, count: u32) {
        self.state.lock().await.faults.uncounted_updates = count;
    }

    /// Writes still waiting for a raw replay.
    pub async fn withheld_statements(&self) -> usize {
        self.state.lock().await.withheld.len()
    }

    fn table_key(&self, table: &TableRef) -> String {
        let keyspace = table
            .catalog_keyspace()
            .unwrap_or_else(|| self.options.keyspace.to_lowercase());
        format!("{}.{}", keyspace, table.catalog_name())
    }

    fn active_table<'a>(&self, state: &'a mut StoreState, table: &TableRef) -> StoreResult<&'a mut MemTable> {
        let key = self.table_key(table);
        match state.tables.get_mut(&key) {
            Some(t) if t.lifecycle == Lifecycle::Active => Ok(t),
            _ => Err(StoreError::TableNotFound(format!("unconfigured table {}", table))),
        }
    }

    async fn run_query(&self, statement: &Statement) -> StoreResult<QueryResult> {
        let mut state = self.state.lock().await;
        state.stats.queries += 1;
        if state.faults.failing_queries > 0 {
            state.faults.failing_queries -= 1;
            return Err(StoreError::ConnectionError("injected read failure".into()));
        }

        match statement {
            Statement::Select(stmt) => self.select(&mut state, stmt),
            Statement::TableStatus(stmt) => {
                state.stats.status_polls += 1;
                Ok(Self::status(&mut state, stmt))
            }
            other => Err(StoreError::ExecutionError(format!(
                "statement does not return rows: {}",
                other
            ))),
        }
    }

    async fn run_update(&self, statement: &Statement) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        state.stats.updates += 1;
        if state.faults.failing_updates > 0 {
            state.faults.failing_updates -= 1;
            return Err(StoreError::ConnectionError("injected write failure".into()));
        }

        if state.faults.ambiguous_updates > 0 {
            state.faults.ambiguous_updates -= 1;
            state
                .withheld
                .insert(statement.to_string(), statement.clone());
            return Ok(-1);
        }

        if state.faults.uncounted_updates > 0 {
            state.faults.uncounted_updates -= 1;
            self.apply(&mut state, statement)?;
            state
                .withheld
                .insert(statement.to_string(), statement.clone());
            return Ok(-1);
        }

        self.apply(&mut state, statement)
    }

    async fn run_raw(&self, sql: &str) -> StoreResult<i64> {
        let mut state = self.state.lock().await;
        state.stats.raw_executions += 1;

        let words: Vec<&str> = sql.split_whitespace().collect();
        if words
            .first()
            .is_some_and(|word| word.eq_ignore_ascii_case("TRUNCATE"))
        {
            return self.truncate(&mut state, &words);
        }

        let statement = state
            .withheld
            .remove(sql.trim())
            .ok_or_else(|| StoreError::ParseError(format!("unrecognized raw statement: {}", sql)))?;
        self.apply(&mut state, &statement)
    }

    fn apply(&self, state: &mut StoreState, statement: &Statement) -> StoreResult<i64> {
        match statement {
            Statement::CreateTable(stmt) => self.create_table(state, stmt),
            Statement::DropTable(stmt) => self.drop_table(state, stmt),
            Statement::Insert(stmt) => self.insert(state, stmt),
            Statement::Update(stmt) => self.update(state, stmt),
            Statement::Delete(stmt) => self.delete(state, stmt),
            Statement::Raw(sql) => Err(StoreError::ParseError(format!(
                "raw text must go through execute_raw: {}",
                sql
            ))),
            Statement::Select(_) | Statement::TableStatus(_) => Err(StoreError::ExecutionError(
                "reads must go through query".into(),
            )),
        }
    }

    fn create_table(&self, state: &mut StoreState, stmt: &CreateTableStmt) -> StoreResult<i64> {
        let key = self.table_key(&stmt.table);
        if state.tables.contains_key(&key) {
            return if stmt.if_not_exists {
                Ok(0)
            } else {
                Err(StoreError::TableExists(stmt.table.to_string()))
            };
        }

        let lifecycle = match self.options.ddl_latency_polls {
            0 => Lifecycle::Active,
            polls => Lifecycle::Creating { polls_left: polls },
        };
        state.tables.insert(
            key,
            MemTable {
                name: stmt.table.to_string(),
                columns: stmt.columns.clone(),
                primary_key: stmt.primary_key.clone(),
                rows: Vec::new(),
                lifecycle,
                forced_status: None,
            },
        );
        Ok(0)
    }

    fn drop_table(&self, state: &mut StoreState, stmt: &DropTableStmt) -> StoreResult<i64> {
        let key = self.table_key(&stmt.table);
        let dropping = match state.tables.get(&key) {
            Some(table) => !matches!(table.lifecycle, Lifecycle::Deleting { .. }),
            None => false,
        };
        if !dropping {
            return if stmt.if_exists {
                Ok(0)
            } else {
                Err(StoreError::TableNotFound(stmt.table.to_string()))
            };
        }

        match self.options.ddl_latency_polls {
            0 => {
                state.tables.remove(&key);
            }
            polls => {
                if let Some(table) = state.tables.get_mut(&key) {
                    table.lifecycle = Lifecycle::Deleting { polls_left: polls };
                    table.rows.clear();
                }
            }
        }
        Ok(0)
    }

    fn insert(&self, state: &mut StoreState, stmt: &InsertStmt) -> StoreResult<i64> {
        let table = self.active_table(state, &stmt.table)?;
        if stmt.columns.len() != stmt.values.len() {
            return Err(StoreError::ExecutionError(
                "Unmatched column names/values".into(),
            ));
        }

        let mut row = vec![Value::Null; table.columns.len()];
        let mut key = Vec::new();
        for (column, value) in stmt.columns.iter().zip(&stmt.values) {
            row[table.column_index(column)?] = value.clone();
            if table.is_key(column) {
                key.push(Predicate::equals(column.clone(), value.clone()));
            }
        }
        table.check_key(&key)?;
        if key.iter().any(|p| p.value.is_null()) {
            return Err(StoreError::ExecutionError("Invalid null value for key column".into()));
        }

        let existing = table.matching_rows(&key)?;
        if existing.is_empty() {
            table.rows.push(row);
            return Ok(1);
        }
        if stmt.if_not_exists {
            return Ok(0);
        }

        let assignments: Vec<(String, Value)> = stmt
            .columns
            .iter()
            .cloned()
            .zip(stmt.values.iter().cloned())
            .collect();
        for index in existing {
            table.assign(index, &assignments)?;
        }
        Ok(1)
    }

    fn update(&self, state: &mut StoreState, stmt: &UpdateStmt) -> StoreResult<i64> {
        let table = self.active_table(state, &stmt.table)?;
        table.check_key(&stmt.key)?;

        let targets = table.matching_rows(&stmt.key)?;
        if targets.is_empty() {
            if !stmt.conditions.is_empty() {
                return Ok(0);
            }
            // Writes are upserts.
            let mut row = vec![Value::Null; table.columns.len()];
            for predicate in &stmt.key {
                row[table.column_index(&predicate.column)?] = predicate.value.clone();
            }
            table.rows.push(row);
            let index = table.rows.len() - 1;
            table.assign(index, &stmt.assignments)?;
            return Ok(1);
        }

        let mut applied = 0;
        for index in targets {
            if table.matches(&table.rows[index], &stmt.conditions)? {
                table.assign(index, &stmt.assignments)?;
                applied += 1;
            }
        }
        Ok(applied)
    }

    fn delete(&self, state: &mut StoreState, stmt: &DeleteStmt) -> StoreResult<i64> {
        let table = self.active_table(state, &stmt.table)?;
        table.check_key(&stmt.key)?;

        let before = table.rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in table.rows.drain(..) {
            let mut hit = true;
            for predicate in &stmt.key {
                let index = table
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(&predicate.column));
                if index.and_then(|i| row.get(i)) != Some(&predicate.value) {
                    hit = false;
                    break;
                }
            }
            if !hit {
                kept.push(row);
            }
        }
        table.rows = kept;
        Ok(i64::try_from(before - table.rows.len()).unwrap_or(i64::MAX))
    }

    fn truncate(&self, state: &mut StoreState, words: &[&str]) -> StoreResult<i64> {
        if !self.options.supports_truncate {
            return Err(StoreError::UnsupportedOperation(
                "TRUNCATE is not supported".into(),
            ));
        }

        let name = match words {
            [_, table, name] if table.eq_ignore_ascii_case("TABLE") => name,
            [_, name] => name,
            _ => return Err(StoreError::ParseError(format!("bad TRUNCATE: {}", words.join(" ")))),
        };
        let table = match name.split_once('.') {
            Some((keyspace, table)) => TableRef::qualified(keyspace, table.trim_end_matches(';')),
            None => TableRef::new(None, name.trim_end_matches(';')),
        };

        let table = self.active_table(state, &table)?;
        let removed = table.rows.len();
        table.rows.clear();
        Ok(i64::try_from(removed).unwrap_or(i64::MAX))
    }

    fn select(&self, state: &mut StoreState, stmt: &SelectStmt) -> StoreResult<QueryResult> {
        let supports_count = self.options.supports_count;
        let table = self.active_table(state, &stmt.table)?;

        if stmt.projection == Projection::CountAll && !supports_count {
            return Err(StoreError::UnsupportedOperation(
                "aggregate COUNT is not supported".into(),
            ));
        }

        if !stmt.allow_filtering && stmt.filter.iter().any(|p| !table.is_key(&p.column)) {
            return Err(StoreError::ExecutionError(
                "Cannot execute this query as it might involve data filtering and thus may have \
                 unpredictable performance. If you want to execute this query despite the \
                 performance unpredictability, use ALLOW FILTERING"
                    .into(),
            ));
        }

        let mut rows = Vec::new();
        for row in &table.rows {
            if table.matches(row, &stmt.filter)? {
                rows.push(row.clone());
            }
        }

        if stmt.projection == Projection::CountAll {
            let count = i64::try_from(rows.len()).unwrap_or(i64::MAX);
            return Ok(QueryResult::new(
                vec!["count".into()],
                vec![vec![Value::Integer(count)]],
            ));
        }

        if let Some(limit) = stmt.limit {
            rows.truncate(limit);
        }

        match &stmt.projection {
            Projection::Columns(columns) => {
                let indexes = columns
                    .iter()
                    .map(|c| table.column_index(c))
                    .collect::<StoreResult<Vec<_>>>()?;
                let rows = rows
                    .into_iter()
                    .map(|row| indexes.iter().map(|&i| row[i].clone()).collect())
                    .collect();
                Ok(QueryResult::new(columns.clone(), rows))
            }
            _ => Ok(QueryResult::new(
                table.columns.iter().map(|c| c.name.clone()).collect(),
                rows,
            )),
        }
    }

    fn status(state: &mut StoreState, stmt: &TableStatusStmt) -> QueryResult {
        let columns = vec![
            "keyspace_name".to_string(),
            "table_name".to_string(),
            "status".to_string(),
        ];
        let key = format!("{}.{}", stmt.keyspace, stmt.table);

        let Some((forced, lifecycle)) = state
            .tables
            .get(&key)
            .map(|t| (t.forced_status.clone(), t.lifecycle))
        else {
            return QueryResult::new(columns, Vec::new());
        };

        let (next, status) = match (forced, lifecycle) {
            (Some(status), current) => (Some(current), status),
            (None, Lifecycle::Active) | (None, Lifecycle::Creating { polls_left: 0 }) => {
                (Some(Lifecycle::Active), "ACTIVE".to_string())
            }
            (None, Lifecycle::Creating { polls_left }) => (
                Some(Lifecycle::Creating {
                    polls_left: polls_left - 1,
                }),
                "CREATING".to_string(),
            ),
            (None, Lifecycle::Deleting { polls_left: 0 }) => (None, String::new()),
            (None, Lifecycle::Deleting { polls_left }) => (
                Some(Lifecycle::Deleting {
                    polls_left: polls_left - 1,
                }),
                "DELETING".to_string(),
            ),
        };

        match next {
            Some(lifecycle) => {
                if let Some(table) = state.tables.get_mut(&key) {
                    table.lifecycle = lifecycle;
                }
            }
            None => {
                state.tables.remove(&key);
                return QueryResult::new(columns, Vec::new());
            }
        }

        QueryResult::new(
            columns,
            vec![vec![
                Value::from(stmt.keyspace.as_str()),
                Value::from(stmt.table.as_str()),
                Value::Text(status),
            ]],
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One runner's connection to a [`MemoryStore`].
#[derive(Clone)]
pub struct MemorySession {
    store: MemoryStore,
}

impl MemorySession {
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn query(&self, statement: &Statement) -> StoreResult<QueryResult> {
        self.store.run_query(statement).await
    }

    async fn update(&self, statement: &Statement) -> StoreResult<i64> {
        self.store.run_update(statement).await
    }

    async fn execute_raw(&self, sql: &str) -> StoreResult<i64> {
        self.store.run_raw(sql).await
    }

    // No transactions: every write is already durable.
    async fn commit(&self) -> StoreResult<()> {
        self.store.state.lock().await.stats.commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.store.state.lock().await.stats.rollbacks += 1;
        Ok(())
    }
}

impl CurrentKeyspaceProvider for MemorySession {
    fn current_keyspace(&self) -> Option<String> {
        Some(self.store.options.keyspace.clone())
    }
}
