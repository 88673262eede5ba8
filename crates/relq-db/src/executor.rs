//! The execution boundary.
//!
//! [`DbExecutor`] is the minimal blocking interface the query engine needs
//! from a database: run a statement, run a query, report the last inserted id.
//! Concrete backends live in `relq-db-backends`. Rows come back as [`Row`],
//! with typed access through [`FromValue`].

use relq_core::{RelqError, RelqResult};

use crate::query::compiler::{DatabaseBackendType, SqlCompiler};
use crate::value::Value;

/// Minimal blocking database executor.
///
/// Statement execution and row fetching are plain calls; a long-running
/// statement can only be interrupted by closing the connection underneath.
pub trait DbExecutor {
    /// Returns the dialect used to compile statements for this executor.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a statement that does not return rows and returns the number of
    /// affected rows.
    fn execute_sql(&self, sql: &str, params: &[Value]) -> RelqResult<u64>;

    /// Runs a query and returns all result rows.
    fn query(&self, sql: &str, params: &[Value]) -> RelqResult<Vec<Row>>;

    /// Runs a query that must return exactly one row.
    fn query_one(&self, sql: &str, params: &[Value]) -> RelqResult<Row> {
        let mut rows = self.query(sql, params)?.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row),
            (None, _) => Err(RelqError::DoesNotExist(
                "Query returned no rows".to_string(),
            )),
            (Some(_), Some(_)) => Err(RelqError::MultipleObjectsReturned(
                "Query returned more than one row".to_string(),
            )),
        }
    }

    /// Executes an INSERT and returns the id of the inserted row.
    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> RelqResult<Value>;

    /// A compiler for this executor's dialect.
    fn compiler(&self) -> SqlCompiler {
        SqlCompiler::new(self.backend_type())
    }
}

/// A single result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row, returning its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    pub fn get<T: FromValue>(&self, column: &str) -> RelqResult<T> {
        let value = self.get_value(column).ok_or_else(|| {
            RelqError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Gets a typed value by column index.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> RelqResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            RelqError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            ))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value of a column.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// Conversion from a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts the conversion.
    fn from_value(value: &Value) -> RelqResult<Self>;
}

fn mismatch(expected: &str, value: &Value) -> RelqError {
    RelqError::DatabaseError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for Value {
    fn from_value(value: &Value) -> RelqResult<Self> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> RelqResult<Self> {
        value.as_int().ok_or_else(|| mismatch("Int", value))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> RelqResult<Self> {
        let i = value.as_int().ok_or_else(|| mismatch("Int", value))?;
        Self::try_from(i)
            .map_err(|e| RelqError::DatabaseError(format!("Int value out of i32 range: {e}")))
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> RelqResult<Self> {
        let i = value.as_int().ok_or_else(|| mismatch("Int", value))?;
        Self::try_from(i)
            .map_err(|e| RelqError::DatabaseError(format!("Negative value for u64: {e}")))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> RelqResult<Self> {
        match value {
            Value::Float(f) => Ok(*f),
            #[allow(clippy::cast_precision_loss)]
            Value::Int(i) => Ok(*i as Self),
            _ => Err(mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> RelqResult<Self> {
        value.truthy().ok_or_else(|| mismatch("Bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> RelqResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for chrono::NaiveDate {
    fn from_value(value: &Value) -> RelqResult<Self> {
        match value {
            Value::Date(d) => Ok(*d),
            Value::DateTime(dt) => Ok(dt.date()),
            Value::String(s) => Self::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| RelqError::DatabaseError(format!("Invalid date '{s}': {e}"))),
            _ => Err(mismatch("Date", value)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> RelqResult<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}
