//! Field metadata consumed by the query engine.
//!
//! A [`FieldDef`] tells the engine the column behind a name, whether it may be
//! NULL, and (for relations) which model it points to. Nothing here generates
//! DDL; tables are assumed to exist.

pub mod types;

pub use types::{FieldDef, FieldType, OnDelete};
