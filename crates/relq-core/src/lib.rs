//! # relq-core
//!
//! Foundation types shared by every relq crate: the error taxonomy, the
//! settings struct and its loaders, and `tracing` subscriber setup.
//!
//! ## Modules
//!
//! - [`error`] - [`RelqError`], [`ValidationError`] and the result alias
//! - [`settings`] - [`Settings`] and database configuration
//! - [`settings_loader`] - TOML/JSON loading with environment overrides
//! - [`logging`] - Tracing subscriber installation

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{ErrorKind, RelqError, RelqResult, ValidationError};
pub use settings::{DatabaseSettings, Settings};
