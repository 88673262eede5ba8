//! Settings for the relq crates.
//!
//! [`Settings`] is a plain serde struct with defaults for every field, so a
//! configuration file only needs to name what it changes. There is no global
//! instance: callers load a value and pass it to whatever needs it.

use serde::{Deserialize, Serialize};

/// Database connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// The SQL dialect: "sqlite", "postgresql", or "mysql".
    pub engine: String,
    /// The database name (or file path for `SQLite`, `:memory:` for a scratch db).
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            engine: "sqlite".to_string(),
            name: ":memory:".to_string(),
        }
    }
}

/// The complete set of settings.
///
/// # Examples
///
/// ```
/// use relq_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(!settings.debug);
/// assert_eq!(settings.database.engine, "sqlite");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Enables pretty log output.
    pub debug: bool,
    /// An `EnvFilter` directive, e.g. "info" or "relq_db=debug".
    pub log_level: String,
    /// The database the executor connects to.
    pub database: DatabaseSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            database: DatabaseSettings::default(),
        }
    }
}
