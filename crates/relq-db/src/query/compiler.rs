//! Dialect operations used while compiling queries to SQL.
//!
//! [`SqlCompiler`] knows how one backend quotes identifiers, numbers
//! parameters, spells lookup operators, and truncates or extracts parts of
//! dates. The query types build their SQL text through it, so the same
//! [`Query`](super::query::Query) compiles to PostgreSQL (`$1, $2, ...`),
//! SQLite or MySQL (`?`).

use relq_core::{RelqError, RelqResult};

use super::lookups::LookupType;
use crate::value::Value;

/// The type of database backend, used by the compiler to generate
/// backend-specific SQL syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
    /// MySQL (uses `?` placeholders).
    MySQL,
}

impl DatabaseBackendType {
    /// Parses an engine name from settings.
    ///
    /// Dotted paths are accepted and only the last segment is used, so
    /// `"relq.backends.sqlite3"` and `"sqlite"` both select SQLite.
    pub fn from_engine(engine: &str) -> RelqResult<Self> {
        let name = engine.rsplit('.').next().unwrap_or(engine);
        match name.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            "postgres" | "postgresql" | "postgresql_psycopg2" => Ok(Self::PostgreSQL),
            "mysql" => Ok(Self::MySQL),
            _ => Err(RelqError::ImproperlyConfigured(format!(
                "Unknown database engine '{engine}'"
            ))),
        }
    }

    /// The vendor name used in log output.
    pub const fn vendor(self) -> &'static str {
        match self {
            Self::PostgreSQL => "postgresql",
            Self::SQLite => "sqlite",
            Self::MySQL => "mysql",
        }
    }
}

/// Granularity for date truncation and extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DateKind {
    /// Calendar year.
    Year,
    /// Month of the year.
    Month,
    /// Day of the month.
    Day,
}

impl DateKind {
    /// Lowercase name, as used by `DATE_TRUNC` and `EXTRACT`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
        }
    }

    const fn strftime(self) -> &'static str {
        match self {
            Self::Year => "%Y",
            Self::Month => "%m",
            Self::Day => "%d",
        }
    }

    const fn truncated_format(self) -> &'static str {
        match self {
            Self::Year => "%Y-01-01 00:00:00",
            Self::Month => "%Y-%m-01 00:00:00",
            Self::Day => "%Y-%m-%d 00:00:00",
        }
    }
}

/// Escapes the LIKE wildcards `%` and `_` (and the escape character itself).
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Per-dialect SQL fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    /// Creates a new compiler for the given backend type.
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    /// The dialect this compiler targets.
    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    /// Quotes a table, alias or column name. Already-quoted names pass through.
    pub fn quote_name(&self, name: &str) -> String {
        let q = match self.backend {
            DatabaseBackendType::MySQL => '`',
            _ => '"',
        };
        if name.len() >= 2 && name.starts_with(q) && name.ends_with(q) {
            return name.to_string();
        }
        format!("{q}{name}{q}")
    }

    /// Quotes `alias.column`.
    pub fn qualified(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote_name(alias), self.quote_name(column))
    }

    /// Pushes a parameter and returns its placeholder.
    ///
    /// Parameters are numbered by their position in `params`, so fragments
    /// must be compiled in the order they appear in the final statement.
    pub fn placeholder(&self, params: &mut Vec<Value>, value: Value) -> String {
        params.push(value);
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${}", params.len()),
            DatabaseBackendType::SQLite | DatabaseBackendType::MySQL => "?".to_string(),
        }
    }

    /// The right-hand template of a comparison operator, with `%s` standing
    /// for the placeholder. Lookups with their own shape (`in`, `range`,
    /// `isnull` and the date parts) return `None`.
    pub const fn operator_sql(&self, lookup: LookupType) -> Option<&'static str> {
        use DatabaseBackendType::{MySQL, PostgreSQL, SQLite};
        use LookupType as L;
        let op = match (self.backend, lookup) {
            (_, L::Exact) => "= %s",
            (_, L::Gt) => "> %s",
            (_, L::Gte) => ">= %s",
            (_, L::Lt) => "< %s",
            (_, L::Lte) => "<= %s",

            (SQLite, L::IExact | L::Contains | L::IContains)
            | (SQLite, L::StartsWith | L::IStartsWith | L::EndsWith | L::IEndsWith) => {
                "LIKE %s ESCAPE '\\'"
            }
            (SQLite, L::Regex) => "REGEXP %s",
            (SQLite, L::IRegex) => "REGEXP '(?i)' || %s",

            (PostgreSQL, L::IExact) => "= UPPER(%s)",
            (PostgreSQL, L::Contains | L::StartsWith | L::EndsWith) => "LIKE %s",
            (PostgreSQL, L::IContains | L::IStartsWith | L::IEndsWith) => "LIKE UPPER(%s)",
            (PostgreSQL, L::Regex) => "~ %s",
            (PostgreSQL, L::IRegex) => "~* %s",

            (MySQL, L::IExact | L::IContains | L::IStartsWith | L::IEndsWith) => "LIKE %s",
            (MySQL, L::Contains | L::StartsWith | L::EndsWith) => "LIKE BINARY %s",
            (MySQL, L::Regex) => "REGEXP BINARY %s",
            (MySQL, L::IRegex) => "REGEXP %s",

            (_, L::In | L::Range | L::IsNull | L::Year | L::Month | L::Day) => return None,
        };
        Some(op)
    }

    /// Wraps the left-hand column for case-insensitive lookups where the
    /// dialect compares upper-cased text.
    pub fn lookup_cast(&self, lookup: LookupType, lhs: &str) -> String {
        let upper = self.backend == DatabaseBackendType::PostgreSQL
            && matches!(
                lookup,
                LookupType::IExact
                    | LookupType::IContains
                    | LookupType::IStartsWith
                    | LookupType::IEndsWith
            );
        if upper {
            format!("UPPER({lhs})")
        } else {
            lhs.to_string()
        }
    }

    /// The bound value for a text lookup: escaped and wrapped in wildcards
    /// for LIKE operators, unchanged otherwise.
    pub fn prep_text(&self, lookup: LookupType, raw: &str) -> String {
        match lookup {
            LookupType::Contains | LookupType::IContains => format!("%{}%", escape_like(raw)),
            LookupType::StartsWith | LookupType::IStartsWith => format!("{}%", escape_like(raw)),
            LookupType::EndsWith | LookupType::IEndsWith => format!("%{}", escape_like(raw)),
            LookupType::IExact if self.backend != DatabaseBackendType::PostgreSQL => {
                escape_like(raw)
            }
            _ => raw.to_string(),
        }
    }

    /// SQL truncating a date column to the start of its year, month or day.
    pub fn date_trunc_sql(&self, kind: DateKind, column: &str) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => {
                format!("DATE_TRUNC('{}', {column})", kind.as_str())
            }
            DatabaseBackendType::MySQL => format!(
                "CAST(DATE_FORMAT({column}, '{}') AS DATETIME)",
                kind.truncated_format()
            ),
            DatabaseBackendType::SQLite => {
                format!("strftime('{}', {column})", kind.truncated_format())
            }
        }
    }

    /// SQL extracting the year, month or day number from a date column.
    pub fn date_extract_sql(&self, kind: DateKind, column: &str) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => {
                format!("EXTRACT('{}' FROM {column})", kind.as_str())
            }
            DatabaseBackendType::MySQL => {
                format!("EXTRACT({} FROM {column})", kind.as_str().to_uppercase())
            }
            DatabaseBackendType::SQLite => {
                format!("CAST(strftime('{}', {column}) AS INTEGER)", kind.strftime())
            }
        }
    }

    /// The expression used for `order_by("?")`.
    pub const fn random_function_sql(&self) -> &'static str {
        match self.backend {
            DatabaseBackendType::MySQL => "RAND()",
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::SQLite => "RANDOM()",
        }
    }

    /// The LIMIT value meaning "no limit", for dialects that cannot take an
    /// OFFSET on its own.
    pub const fn no_limit_value(&self) -> Option<&'static str> {
        match self.backend {
            DatabaseBackendType::PostgreSQL => None,
            DatabaseBackendType::SQLite => Some("-1"),
            DatabaseBackendType::MySQL => Some("18446744073709551615"),
        }
    }

    /// Whether truncated dates come back as text and must be parsed.
    pub const fn needs_datetime_string_cast(&self) -> bool {
        matches!(self.backend, DatabaseBackendType::SQLite)
    }

    /// Whether an UPDATE may filter on a subquery over its own table. MySQL
    /// refuses this, so the matching keys are selected first instead.
    pub const fn update_can_self_select(&self) -> bool {
        !matches!(self.backend, DatabaseBackendType::MySQL)
    }

    /// The literal inserted into the primary-key column of a row that has
    /// no other values.
    pub const fn pk_default_value(&self) -> &'static str {
        match self.backend {
            DatabaseBackendType::SQLite => "NULL",
            DatabaseBackendType::PostgreSQL | DatabaseBackendType::MySQL => "DEFAULT",
        }
    }

    /// The `LIMIT ... OFFSET ...` suffix for a slice, or an empty string.
    pub fn limit_offset_sql(&self, low: usize, high: Option<usize>) -> String {
        let mut out = String::new();
        match high {
            Some(high) => out.push_str(&format!(" LIMIT {}", high.saturating_sub(low))),
            None if low > 0 => {
                if let Some(no_limit) = self.no_limit_value() {
                    out.push_str(&format!(" LIMIT {no_limit}"));
                }
            }
            None => {}
        }
        if low > 0 {
            out.push_str(&format!(" OFFSET {low}"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::PostgreSQL)
    }

    fn sqlite() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::SQLite)
    }

    fn mysql() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::MySQL)
    }

    #[test]
    fn test_from_engine() {
        assert_eq!(
            DatabaseBackendType::from_engine("sqlite3").unwrap(),
            DatabaseBackendType::SQLite
        );
        assert_eq!(
            DatabaseBackendType::from_engine("relq.backends.postgresql").unwrap(),
            DatabaseBackendType::PostgreSQL
        );
        assert!(DatabaseBackendType::from_engine("oracle").is_err());
    }

    #[test]
    fn test_quote_name() {
        assert_eq!(sqlite().quote_name("queries_tag"), "\"queries_tag\"");
        assert_eq!(mysql().quote_name("queries_tag"), "`queries_tag`");
        assert_eq!(pg().quote_name("\"T3\""), "\"T3\"");
        assert_eq!(pg().qualified("T3", "id"), "\"T3\".\"id\"");
    }

    #[test]
    fn test_placeholders_are_numbered_on_pg() {
        let mut params = Vec::new();
        assert_eq!(pg().placeholder(&mut params, Value::Int(1)), "$1");
        assert_eq!(pg().placeholder(&mut params, Value::Int(2)), "$2");
        assert_eq!(sqlite().placeholder(&mut params, Value::Int(3)), "?");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_operator_templates() {
        assert_eq!(sqlite().operator_sql(LookupType::Exact), Some("= %s"));
        assert_eq!(
            sqlite().operator_sql(LookupType::IStartsWith),
            Some("LIKE %s ESCAPE '\\'")
        );
        assert_eq!(pg().operator_sql(LookupType::IContains), Some("LIKE UPPER(%s)"));
        assert_eq!(mysql().operator_sql(LookupType::Contains), Some("LIKE BINARY %s"));
        assert_eq!(pg().operator_sql(LookupType::In), None);
    }

    #[test]
    fn test_lookup_cast_only_upper_cases_on_pg() {
        assert_eq!(pg().lookup_cast(LookupType::IExact, "\"name\""), "UPPER(\"name\")");
        assert_eq!(pg().lookup_cast(LookupType::Exact, "\"name\""), "\"name\"");
        assert_eq!(sqlite().lookup_cast(LookupType::IExact, "\"name\""), "\"name\"");
    }

    #[test]
    fn test_prep_text_escapes_wildcards() {
        assert_eq!(sqlite().prep_text(LookupType::Contains, "50%_off"), "%50\\%\\_off%");
        assert_eq!(sqlite().prep_text(LookupType::StartsWith, "a\\b"), "a\\\\b%");
        assert_eq!(sqlite().prep_text(LookupType::IEndsWith, "x"), "%x");
        assert_eq!(sqlite().prep_text(LookupType::IExact, "a_b"), "a\\_b");
        assert_eq!(pg().prep_text(LookupType::IExact, "a_b"), "a_b");
        assert_eq!(sqlite().prep_text(LookupType::Exact, "a_b"), "a_b");
    }

    #[test]
    fn test_date_trunc_per_dialect() {
        assert_eq!(
            pg().date_trunc_sql(DateKind::Year, "\"pub_date\""),
            "DATE_TRUNC('year', \"pub_date\")"
        );
        assert_eq!(
            mysql().date_trunc_sql(DateKind::Month, "`pub_date`"),
            "CAST(DATE_FORMAT(`pub_date`, '%Y-%m-01 00:00:00') AS DATETIME)"
        );
        assert_eq!(
            sqlite().date_trunc_sql(DateKind::Day, "\"pub_date\""),
            "strftime('%Y-%m-%d 00:00:00', \"pub_date\")"
        );
    }

    #[test]
    fn test_date_extract_per_dialect() {
        assert_eq!(
            pg().date_extract_sql(DateKind::Month, "\"created\""),
            "EXTRACT('month' FROM \"created\")"
        );
        assert_eq!(
            mysql().date_extract_sql(DateKind::Day, "`created`"),
            "EXTRACT(DAY FROM `created`)"
        );
        assert_eq!(
            sqlite().date_extract_sql(DateKind::Month, "\"created\""),
            "CAST(strftime('%m', \"created\") AS INTEGER)"
        );
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(sqlite().limit_offset_sql(0, None), "");
        assert_eq!(sqlite().limit_offset_sql(0, Some(5)), " LIMIT 5");
        assert_eq!(sqlite().limit_offset_sql(2, Some(5)), " LIMIT 3 OFFSET 2");
        assert_eq!(sqlite().limit_offset_sql(2, None), " LIMIT -1 OFFSET 2");
        assert_eq!(
            mysql().limit_offset_sql(1, None),
            " LIMIT 18446744073709551615 OFFSET 1"
        );
        assert_eq!(pg().limit_offset_sql(1, None), " OFFSET 1");
    }

    #[test]
    fn test_random_function() {
        assert_eq!(mysql().random_function_sql(), "RAND()");
        assert_eq!(sqlite().random_function_sql(), "RANDOM()");
    }

    #[test]
    fn test_string_cast_only_on_sqlite() {
        assert!(sqlite().needs_datetime_string_cast());
        assert!(!pg().needs_datetime_string_cast());
    }

    #[test]
    fn test_mysql_cannot_update_from_own_table() {
        assert!(!mysql().update_can_self_select());
        assert!(sqlite().update_can_self_select());
        assert!(pg().update_can_self_select());
    }
}
