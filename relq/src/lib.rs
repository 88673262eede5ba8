//! # relq
//!
//! A Django-style ORM query engine and formset library for Rust.
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on `relq`
//! for everything, or on the individual crates for finer-grained control.
//!
//! ```no_run
//! use relq::prelude::*;
//!
//! let settings = relq::core::settings_loader::from_env();
//! relq::core::logging::setup_logging(&settings);
//! let db = relq::connect(&settings)?;
//! # let registry = std::sync::Arc::new(ModelRegistry::new());
//! let articles = QuerySet::new(registry, "Article")?
//!     .filter(Q::filter("reporter__first_name", "John"))?;
//! for row in articles.fetch(&db)? {
//!     println!("{:?}", row.get_value("headline"));
//! }
//! # Ok::<(), RelqError>(())
//! ```

/// Errors, settings and logging setup.
pub use relq_core as core;

/// Model schema, query building and SQL compilation.
#[cfg(feature = "db")]
pub use relq_db as db;

/// Database executors.
pub use relq_db_backends as db_backends;

/// Forms and formsets.
#[cfg(feature = "forms")]
pub use relq_forms as forms;

pub use relq_core::{RelqError, RelqResult, Settings};

// Third-party re-exports for user convenience
pub use chrono;
pub use serde_json;

/// Opens the database named in `settings`.
///
/// Only the SQLite engine has an executor; any other engine is reported as
/// `ImproperlyConfigured`.
#[cfg(feature = "sqlite")]
pub fn connect(settings: &Settings) -> RelqResult<db_backends::SqliteBackend> {
    tracing::debug!(
        engine = %settings.database.engine,
        name = %settings.database.name,
        "connecting"
    );
    db_backends::SqliteBackend::from_settings(settings)
}

/// The types most programs need.
pub mod prelude {
    pub use relq_core::{ErrorKind, RelqError, RelqResult, Settings, ValidationError};

    #[cfg(feature = "db")]
    pub use relq_db::{
        DbExecutor, FieldDef, FieldType, Manager, Model, ModelMeta, ModelRegistry, OnDelete,
        OrderDirection, QuerySet, Row, Value, Q,
    };

    #[cfg(feature = "sqlite")]
    pub use relq_db_backends::SqliteBackend;

    #[cfg(feature = "forms")]
    pub use relq_forms::{
        all_valid, formset_for_form, BaseForm, Form, FormData, FormFieldDef, FormFieldType,
        FormSet, FormSetFactory,
    };
}
