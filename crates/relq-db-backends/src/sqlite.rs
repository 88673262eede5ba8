//! SQLite executor using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`], a blocking
//! [`DbExecutor`] over a single `rusqlite` connection.
//!
//! Features:
//! - WAL mode for file-based databases, foreign keys enforced
//! - In-memory database support via `:memory:` path (great for testing)
//! - A `REGEXP` function backed by the `regex` crate, for `regex`/`iregex` lookups
//! - Simple `Mutex`-based concurrency control

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::Regex;
use relq_core::{RelqError, RelqResult, Settings};
use relq_db::query::compiler::DatabaseBackendType;
use relq_db::value::Value;
use relq_db::{DbExecutor, Row};
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;

/// A SQLite database backend.
///
/// The connection sits behind a `Mutex`, so one backend can be shared between
/// threads; statements run one at a time.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    conn: Mutex<rusqlite::Connection>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    /// WAL journal mode is enabled for file-based databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> RelqResult<Self> {
        let path = path.into();
        let in_memory = path.to_str() == Some(":memory:");
        let conn = if in_memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| RelqError::OperationalError(format!("SQLite open failed: {e}")))?;

        let pragmas = if in_memory {
            "PRAGMA foreign_keys=ON;"
        } else {
            "PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;"
        };
        conn.execute_batch(pragmas)
            .map_err(|e| RelqError::OperationalError(format!("Failed to set pragmas: {e}")))?;
        register_regexp(&conn)?;

        tracing::debug!("Opened SQLite database at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database (convenience constructor).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn memory() -> RelqResult<Self> {
        Self::open(":memory:")
    }

    /// Opens the database named in `settings`, which must select SQLite.
    pub fn from_settings(settings: &Settings) -> RelqResult<Self> {
        let engine = DatabaseBackendType::from_engine(&settings.database.engine)?;
        if engine != DatabaseBackendType::SQLite {
            return Err(RelqError::ImproperlyConfigured(format!(
                "SqliteBackend cannot serve the '{}' engine",
                settings.database.engine
            )));
        }
        Self::open(&settings.database.name)
    }

    /// Returns the database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Runs one or more statements without parameters, e.g. schema setup.
    pub fn execute_batch(&self, sql: &str) -> RelqResult<()> {
        self.lock()?.execute_batch(sql).map_err(map_error)
    }

    fn lock(&self) -> RelqResult<MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| RelqError::OperationalError("SQLite connection lock poisoned".to_string()))
    }

    /// Binds `Value`s to a `rusqlite` statement. Dates and times are bound
    /// as ISO-8601 text.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> RelqResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.naive_utc().to_string()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
                Value::List(_) => {
                    return Err(RelqError::DatabaseError(format!(
                        "Cannot bind a list as parameter {idx}"
                    )))
                }
            }
            .map_err(|e| RelqError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> RelqResult<Row> {
        let mut values = Vec::with_capacity(column_names.len());
        for i in 0..column_names.len() {
            let value = match sqlite_row.get_ref(i).map_err(map_error)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(v) => Value::Int(v),
                ValueRef::Real(v) => Value::Float(v),
                ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).to_string()),
                ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
            };
            values.push(value);
        }
        Ok(Row::new(column_names.to_vec(), values))
    }
}

/// Constraint failures become integrity errors; everything else is passed on
/// as a database error.
fn map_error(err: rusqlite::Error) -> RelqError {
    match err.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => RelqError::IntegrityError(err.to_string()),
        _ => RelqError::DatabaseError(err.to_string()),
    }
}

/// Installs `regexp(pattern, text)`, which SQLite calls for `text REGEXP
/// pattern`. Compiled patterns are cached per statement.
fn register_regexp(conn: &rusqlite::Connection) -> RelqResult<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(
                0,
                |vr| -> Result<Regex, Box<dyn std::error::Error + Send + Sync>> {
                    Ok(Regex::new(vr.as_str()?)?)
                },
            )?;
            match ctx.get_raw(1) {
                ValueRef::Null => Ok(None),
                ValueRef::Text(text) => Ok(Some(pattern.is_match(&String::from_utf8_lossy(text)))),
                other => {
                    let text = match other {
                        ValueRef::Integer(v) => v.to_string(),
                        ValueRef::Real(v) => v.to_string(),
                        _ => return Ok(Some(false)),
                    };
                    Ok(Some(pattern.is_match(&text)))
                }
            }
        },
    )
    .map_err(|e| RelqError::OperationalError(format!("Failed to register REGEXP: {e}")))
}

impl DbExecutor for SqliteBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> RelqResult<u64> {
        tracing::trace!("sqlite execute: {sql}");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(map_error)?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt.raw_execute().map_err(map_error)?;
        Ok(count as u64)
    }

    fn query(&self, sql: &str, params: &[Value]) -> RelqResult<Vec<Row>> {
        tracing::trace!("sqlite query: {sql}");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(map_error)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(map_error)? {
            rows.push(Self::convert_row(row, &column_names)?);
        }
        Ok(rows)
    }

    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> RelqResult<Value> {
        tracing::trace!("sqlite insert: {sql}");
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(map_error)?;
        Self::bind_params(&mut stmt, params)?;
        stmt.raw_execute().map_err(map_error)?;
        Ok(Value::Int(conn.last_insert_rowid()))
    }
}
