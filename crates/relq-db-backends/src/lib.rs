//! # relq-db-backends
//!
//! [`DbExecutor`](relq_db::DbExecutor) implementations. The query engine only
//! ever sees the trait; this crate supplies the connection underneath it.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, on by default)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
