use crate::core::{Row, Value};

/// Rows returned by a read, with the column names the store reported.
///
/// Column lookups ignore case: the store folds unquoted identifiers, so
/// `LOCKED`, `locked` and `Locked` name the same column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Cell at `row` in the named column.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Every value of one column, in row order.
    pub fn column_values(&self, column: &str) -> Vec<&Value> {
        match self.column_index(column) {
            Some(index) => self.rows.iter().filter_map(|row| row.get(index)).collect(),
            None => Vec::new(),
        }
    }

    pub fn first_value(&self, column: &str) -> Option<&Value> {
        self.value(0, column)
    }
}
