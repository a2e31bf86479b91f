//! Query results.
//!
//! Statements run to completion inside their transaction, so a [`Cursor`]
//! owns its rows and stays valid after the connection moves on.

use crate::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::value::Value;
use std::sync::Arc;

/// One result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Value of column `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Value of the column named `name` (ASCII case-insensitive).
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.values.get(index)
    }

    /// Column `index` as text; `None` for `NULL` or a missing column.
    #[must_use]
    pub fn text(&self, index: usize) -> Option<String> {
        self.get(index).and_then(Value::to_text)
    }

    /// Column `index` as an integer, converting reals and numeric text.
    #[must_use]
    pub fn integer(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_i64)
    }

    /// All values in column order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true for a row without columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The rows of a query, in result order.
#[derive(Debug, Clone)]
pub struct Cursor {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<Value>>,
}

impl Cursor {
    pub(crate) fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.into(),
            rows: rows.into_iter(),
        }
    }

    /// Result column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Position of the column named `name` (ASCII case-insensitive).
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Rows not yet consumed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when every row has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.len() == 0
    }
}

impl Iterator for Cursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        let values = self.rows.next()?;
        Some(Row {
            columns: Arc::clone(&self.columns),
            values,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for Cursor {}

/// A query compiled once that must produce exactly one row, whose first
/// column is returned as text.
///
/// The statement is re-planned against the current schema on each
/// evaluation, so it survives schema changes made after it was compiled.
#[derive(Debug)]
pub struct ScalarStatement<'c> {
    connection: &'c Connection,
    sql: String,
}

impl<'c> ScalarStatement<'c> {
    pub(crate) fn new(connection: &'c Connection, sql: String) -> Self {
        Self { connection, sql }
    }

    /// The statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Runs the statement without parameters.
    pub fn evaluate(&self) -> DbResult<Option<String>> {
        self.evaluate_with(&[])
    }

    /// Runs the statement with `params`.
    ///
    /// Returns `None` when the single value is `NULL`, and fails with
    /// [`DbError::NotExactlyOneRow`] unless the query yields exactly one row.
    pub fn evaluate_with(&self, params: &[Value]) -> DbResult<Option<String>> {
        let mut cursor = self.connection.query(&self.sql, params)?;
        let rows = cursor.len();
        match (cursor.next(), rows) {
            (Some(row), 1) => Ok(row.text(0)),
            _ => Err(DbError::NotExactlyOneRow { rows: rows.min(2) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> Cursor {
        Cursor::new(
            vec!["id".into(), "Name".into()],
            vec![
                vec![Value::Integer(1), Value::from("a")],
                vec![Value::Integer(2), Value::Null],
            ],
        )
    }

    #[test]
    fn rows_come_out_in_order() {
        let mut rows = cursor();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.column_index("name"), Some(1));
        let first = rows.next().unwrap();
        assert_eq!(first.integer(0), Some(1));
        assert_eq!(first.get_by_name("NAME"), Some(&Value::from("a")));
        let second = rows.next().unwrap();
        assert_eq!(second.text(1), None);
        assert!(rows.is_empty());
        assert!(rows.next().is_none());
    }

    #[test]
    fn into_values_keeps_column_order() {
        let values = cursor().next().unwrap().into_values();
        assert_eq!(values, vec![Value::Integer(1), Value::from("a")]);
    }
}
