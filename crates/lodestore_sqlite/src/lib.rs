//! # lodestore SQLite backend
//!
//! The local relational backend for lodestore: translates the core
//! query model to parameterized SQL, manages table creation from a
//! typed schema, and adapts `rusqlite` behind a narrow [`SqlDatabase`]
//! handle so the backend stays testable without a concrete engine.
//!
//! ```rust,ignore
//! use lodestore_sqlite::{ColumnDef, ColumnType, RusqliteDatabase, SqliteBackend, TableSchema};
//!
//! let db = Arc::new(RusqliteDatabase::open("app.db")?);
//! let schema = TableSchema::new("users", vec![
//!     ColumnDef::new("id", ColumnType::Text),
//!     ColumnDef::new("name", ColumnType::Text),
//! ]);
//! let backend = SqliteBackend::new(db, schema, adapter);
//! backend.initialize().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod handle;
mod schema;
mod translator;
mod value;

pub use backend::SqliteBackend;
pub use handle::{RusqliteDatabase, SqlDatabase, SqlRow};
pub use schema::{ColumnDef, ColumnType, IndexSpec, TableSchema};
pub use translator::{delete_statement, select_statement, SqlStatement};
pub use value::SqlValue;
