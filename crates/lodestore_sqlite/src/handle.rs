//! The abstract SQL handle and its rusqlite adapter.
//!
//! The backend speaks to the database only through [`SqlDatabase`],
//! the narrow set of operations it needs. Concrete clients are adapters
//! behind this handle, which keeps the backend contract testable
//! without a particular engine.

use crate::translator::SqlStatement;
use crate::value::SqlValue;
use lodestore_core::{StoreError, StoreResult};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;

/// One fetched row: column names paired with values, in select order.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow {
    /// Column name/value pairs.
    pub columns: Vec<(String, SqlValue)>,
}

impl SqlRow {
    /// Returns the value of the named column.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }
}

/// The narrow database surface the backend uses.
pub trait SqlDatabase: Send + Sync {
    /// Executes a statement, returning the number of affected rows.
    fn execute(&self, statement: &SqlStatement) -> StoreResult<usize>;

    /// Runs a query, returning all rows.
    fn query(&self, statement: &SqlStatement) -> StoreResult<Vec<SqlRow>>;

    /// Executes the statements atomically.
    fn transaction(&self, statements: &[SqlStatement]) -> StoreResult<()>;
}

/// A [`SqlDatabase`] over a rusqlite connection.
pub struct RusqliteDatabase {
    conn: Mutex<Connection>,
}

impl RusqliteDatabase {
    /// Opens an in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Connection::open_in_memory()
            .map(Self::from_connection)
            .map_err(|e| StoreError::sync(format!("failed to open in-memory database: {e}")))
    }

    /// Opens (or creates) a database file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Connection::open(path)
            .map(Self::from_connection)
            .map_err(|e| StoreError::sync(format!("failed to open database: {e}")))
    }

    /// Wraps an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

fn to_param(value: &SqlValue) -> rusqlite::types::Value {
    match value {
        SqlValue::Null => rusqlite::types::Value::Null,
        SqlValue::Integer(i) => rusqlite::types::Value::Integer(*i),
        SqlValue::Real(f) => rusqlite::types::Value::Real(*f),
        SqlValue::Text(s) => rusqlite::types::Value::Text(s.clone()),
        SqlValue::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_column(value: rusqlite::types::Value) -> SqlValue {
    match value {
        rusqlite::types::Value::Null => SqlValue::Null,
        rusqlite::types::Value::Integer(i) => SqlValue::Integer(i),
        rusqlite::types::Value::Real(f) => SqlValue::Real(f),
        rusqlite::types::Value::Text(s) => SqlValue::Text(s),
        rusqlite::types::Value::Blob(b) => SqlValue::Blob(b),
    }
}

/// Maps a rusqlite failure to the store error taxonomy.
///
/// Unique and foreign-key violations are validation errors (not
/// retryable); busy/locked conditions are transaction errors
/// (retryable); a missing table is a lifecycle state error.
fn map_sqlite_error(error: rusqlite::Error) -> StoreError {
    let message = error.to_string();
    if let rusqlite::Error::SqliteFailure(code, _) = &error {
        match code.code {
            rusqlite::ErrorCode::ConstraintViolation => {
                return StoreError::validation(message);
            }
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                return StoreError::transaction(message);
            }
            _ => {}
        }
    }
    if message.contains("no such table") {
        return StoreError::state("missing table", "table created");
    }
    StoreError::sync(message)
}

impl SqlDatabase for RusqliteDatabase {
    fn execute(&self, statement: &SqlStatement) -> StoreResult<usize> {
        let conn = self.conn.lock();
        conn.execute(
            &statement.sql,
            rusqlite::params_from_iter(statement.params.iter().map(to_param)),
        )
        .map_err(map_sqlite_error)
    }

    fn query(&self, statement: &SqlStatement) -> StoreResult<Vec<SqlRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&statement.sql).map_err(map_sqlite_error)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(
                statement.params.iter().map(to_param),
            ))
            .map_err(map_sqlite_error)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqlite_error)? {
            let mut columns = Vec::with_capacity(column_names.len());
            for (index, name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value =
                    row.get(index).map_err(map_sqlite_error)?;
                columns.push((name.clone(), from_column(value)));
            }
            result.push(SqlRow { columns });
        }
        Ok(result)
    }

    fn transaction(&self, statements: &[SqlStatement]) -> StoreResult<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction().map_err(map_sqlite_error)?;
        for statement in statements {
            tx.execute(
                &statement.sql,
                rusqlite::params_from_iter(statement.params.iter().map(to_param)),
            )
            .map_err(map_sqlite_error)?;
        }
        tx.commit().map_err(map_sqlite_error)
    }
}
