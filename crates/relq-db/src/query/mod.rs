//! Query building, compilation, and execution.
//!
//! This module contains the complete query pipeline:
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`where_node`] - The boolean constraint tree behind WHERE
//! - [`join`] - Table aliases, join reuse and outer-join promotion
//! - [`query`] - The SELECT statement under construction
//! - [`subqueries`] - DELETE, UPDATE, INSERT, date and count statements
//! - [`compiler`] - Dialect-specific quoting, operators and functions
//! - [`queryset`] - QuerySet and Manager for lazy query building

pub mod compiler;
pub mod join;
pub mod lookups;
#[allow(clippy::module_inception)]
pub mod query;
pub mod queryset;
pub mod subqueries;
pub mod where_node;

pub use compiler::{DatabaseBackendType, DateKind, SqlCompiler};
pub use join::{JoinManager, JoinType};
pub use lookups::{LookupType, Q};
pub use query::{OrderDirection, Query, SelectColumn};
pub use queryset::{Manager, QuerySet};
pub use subqueries::{CountQuery, DateQuery, DeleteQuery, InsertQuery, InsertValue, UpdateQuery};
pub use where_node::{Connector, WhereNode};
