//! The SQL-level query object.
//!
//! A [`Query`] owns everything needed to compile one SELECT: the alias map
//! ([`JoinManager`]), the WHERE tree, the projection, ordering, distinctness
//! and slice bounds. Lookup keywords are resolved against the shared
//! [`ModelRegistry`] into joins, trimmed where the final join adds nothing,
//! and turned into [`Constraint`]s. Queries are plain values: cloning one
//! gives a fully independent copy.
//!
//! # Examples
//!
//! ```
//! use relq_db::fields::{FieldDef, FieldType};
//! use relq_db::model::{ModelMeta, ModelRegistry};
//! use relq_db::query::compiler::{DatabaseBackendType, SqlCompiler};
//! use relq_db::query::lookups::Q;
//! use relq_db::query::Query;
//!
//! let registry = ModelRegistry::new()
//!     .with_model(
//!         ModelMeta::new("many_to_one", "Reporter")
//!             .field(FieldDef::auto("id"))
//!             .field(FieldDef::new("first_name", FieldType::CharField)),
//!     )
//!     .unwrap()
//!     .with_model(
//!         ModelMeta::new("many_to_one", "Article")
//!             .field(FieldDef::auto("id"))
//!             .field(FieldDef::foreign_key("reporter", "Reporter")),
//!     )
//!     .unwrap()
//!     .into_shared()
//!     .unwrap();
//!
//! let mut query = Query::new(registry, "Article").unwrap();
//! query.add_q(&Q::filter("reporter__first_name", "John")).unwrap();
//! let (sql, params) = query
//!     .as_sql(&SqlCompiler::new(DatabaseBackendType::SQLite))
//!     .unwrap();
//! assert!(sql.contains("INNER JOIN \"many_to_one_reporter\""));
//! assert!(sql.ends_with("WHERE \"many_to_one_reporter\".\"first_name\" = ?"));
//! assert_eq!(params.len(), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use relq_core::{RelqError, RelqResult};

use super::compiler::{DatabaseBackendType, DateKind, SqlCompiler};
use super::join::{JoinManager, JoinOptions, JoinType, Reuse};
use super::lookups::{LookupType, Q};
use super::subqueries::CountQuery;
use super::where_node::{
    isnull_flag, Connector, Constraint, LookupValue, WhereChild, WhereNode, WhereSql,
};
use crate::executor::{DbExecutor, Row};
use crate::fields::FieldDef;
use crate::model::{ModelMeta, ModelRegistry, NameStep, LOOKUP_SEP};
use crate::value::Value;

static ORDER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-+]?[.\w]+$|^\?$").expect("valid regex"));

/// Sort direction of an ordering term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum OrderDirection {
    /// Smallest first.
    Asc,
    /// Largest first.
    Desc,
}

impl OrderDirection {
    /// The SQL keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    const fn from_desc(desc: bool) -> Self {
        if desc {
            Self::Desc
        } else {
            Self::Asc
        }
    }
}

/// One entry of the SELECT list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectColumn {
    /// `alias.column`.
    Column {
        /// Table alias.
        alias: String,
        /// Column name.
        column: String,
    },
    /// A date column truncated to year, month or day.
    Date {
        /// Table alias.
        alias: String,
        /// Column name.
        column: String,
        /// Truncation precision.
        kind: DateKind,
    },
    /// Literal SQL such as `COUNT(*)`.
    Raw(String),
}

impl SelectColumn {
    /// A plain qualified column.
    pub fn column(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Column {
            alias: alias.into(),
            column: column.into(),
        }
    }

    /// Renders the column.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> String {
        match self {
            Self::Column { alias, column } => compiler.qualified(alias, column),
            Self::Date {
                alias,
                column,
                kind,
            } => compiler.date_trunc_sql(*kind, &compiler.qualified(alias, column)),
            Self::Raw(sql) => sql.clone(),
        }
    }

    fn relabel(&mut self, change_map: &HashMap<String, String>) {
        if let Self::Column { alias, .. } | Self::Date { alias, .. } = self {
            if let Some(new) = change_map.get(alias.as_str()) {
                alias.clone_from(new);
            }
        }
    }
}

/// A resolved ordering term: alias, column, descending.
type OrderTerm = (String, String, bool);

/// A single SELECT statement under construction.
#[derive(Debug, Clone)]
pub struct Query {
    registry: Arc<ModelRegistry>,
    model: String,
    pub(crate) joins: JoinManager,
    pub(crate) where_: WhereNode,
    pub(crate) select: Vec<SelectColumn>,
    pub(crate) group_by: Vec<SelectColumn>,
    pub(crate) order_by: Vec<String>,
    pub(crate) default_ordering: bool,
    pub(crate) standard_ordering: bool,
    pub(crate) distinct: bool,
    pub(crate) low_mark: usize,
    pub(crate) high_mark: Option<usize>,
}

impl Query {
    /// Creates an unfiltered query over `model`.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> RelqResult<Self> {
        let table = registry.get(model)?.db_table.clone();
        Ok(Self {
            registry,
            model: model.to_string(),
            joins: JoinManager::new(&table),
            where_: WhereNode::default(),
            select: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            default_ordering: true,
            standard_ordering: true,
            distinct: false,
            low_mark: 0,
            high_mark: None,
        })
    }

    /// The schema this query resolves names against.
    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// The base model's name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The base model's metadata.
    pub fn get_meta(&self) -> RelqResult<&ModelMeta> {
        self.registry.get(&self.model)
    }

    /// The alias of the base table.
    pub fn base_alias(&self) -> &str {
        self.joins.base_alias()
    }

    /// The alias map.
    pub fn joins(&self) -> &JoinManager {
        &self.joins
    }

    /// The WHERE tree.
    pub fn where_node(&self) -> &WhereNode {
        &self.where_
    }

    /// The explicit SELECT list; empty means "every concrete column".
    pub fn select(&self) -> &[SelectColumn] {
        &self.select
    }

    /// Explicit ordering terms.
    pub fn order_by(&self) -> &[String] {
        &self.order_by
    }

    /// Whether SELECT DISTINCT is used.
    pub const fn is_distinct(&self) -> bool {
        self.distinct
    }

    /// Sets SELECT DISTINCT.
    pub fn set_distinct(&mut self, distinct: bool) {
        self.distinct = distinct;
    }

    /// The current slice bounds as `(low, high)`.
    pub const fn limits(&self) -> (usize, Option<usize>) {
        (self.low_mark, self.high_mark)
    }

    /// Number of aliases still referenced.
    pub fn count_active_tables(&self) -> usize {
        self.joins.count_active_tables()
    }

    pub(crate) fn pk_column(&self) -> RelqResult<String> {
        Ok(self.registry.pk(&self.model)?.column.clone())
    }

    // ── Filtering ────────────────────────────────────────────────────

    /// Shorthand for adding one lookup.
    pub fn filter(&mut self, key: &str, value: impl Into<Value>) -> RelqResult<()> {
        self.add_q(&Q::filter(key, value))
    }

    /// Adds a filter expression, ANDed with what is already there.
    ///
    /// Multi-valued relations referenced by one call share their joins;
    /// a later call joins them afresh.
    pub fn add_q(&mut self, q: &Q) -> RelqResult<()> {
        let mut used = HashSet::new();
        let node = self.build_q(q, &mut used, false)?;
        self.where_.add(WhereChild::Node(node), Connector::And);
        Ok(())
    }

    /// Adds `key__in (subquery)`, where `key` names a path and may end in
    /// `__in`. A subquery with no explicit SELECT list selects its primary key.
    pub fn add_subquery_filter(&mut self, key: &str, inner: Self) -> RelqResult<()> {
        let key = if key.ends_with(&format!("{LOOKUP_SEP}in")) {
            key.to_string()
        } else {
            format!("{key}{LOOKUP_SEP}in")
        };
        let mut used = HashSet::new();
        let node = self.add_filter(&key, LookupValue::Query(Box::new(inner)), false, &mut used)?;
        self.where_.add(WhereChild::Node(node), Connector::And);
        Ok(())
    }

    fn build_q(
        &mut self,
        q: &Q,
        used: &mut HashSet<String>,
        negate: bool,
    ) -> RelqResult<WhereNode> {
        match q {
            Q::Filter { key, value } => {
                self.add_filter(key, LookupValue::Value(value.clone()), negate, used)
            }
            Q::And(children) | Q::Or(children) => {
                let connector = if matches!(q, Q::Or(_)) {
                    Connector::Or
                } else {
                    Connector::And
                };
                let mut node = WhereNode::new(connector);
                for child in children {
                    let before = (connector == Connector::Or).then(|| self.joins.refcounts());
                    let built = self.build_q(child, used, negate)?;
                    node.add(WhereChild::Node(built), connector);
                    if let Some(before) = before {
                        self.joins.promote_unused_aliases(&before, used);
                    }
                }
                Ok(node)
            }
            Q::Not(inner) => {
                let built = self.build_q(inner, used, !negate)?;
                if built.is_empty() {
                    return Ok(built);
                }
                Ok(WhereNode::with_children(
                    Connector::And,
                    true,
                    vec![WhereChild::Node(built)],
                ))
            }
        }
    }

    /// Resolves one lookup keyword into joins and a constraint node.
    ///
    /// `negate` is set when the filter sits under an odd number of
    /// negations; joins are then promoted and a NULL guard is added so the
    /// negation keeps rows the joins would otherwise lose. A negated filter
    /// across a multi-valued relation is answered with a subquery instead.
    /// Aliases the filter joins are added to `can_reuse`.
    pub fn add_filter(
        &mut self,
        key: &str,
        value: LookupValue,
        negate: bool,
        can_reuse: &mut HashSet<String>,
    ) -> RelqResult<WhereNode> {
        let (names, lookup) = parse_lookup(key)?;
        let steps = self.resolve_path(&self.model, &names)?;
        let last = steps
            .last()
            .ok_or_else(|| RelqError::field(format!("Cannot parse keyword query '{key}'")))?;

        if negate && steps.iter().any(NameStep::is_multi) {
            return self.split_exclude(key, value);
        }

        let (lookup, value) = prepare_value(key, lookup, value)?;
        let field_null = last.field.null;
        let target = last.target.clone();
        let empty_in = matches!(&value, LookupValue::List(v) if v.is_empty());
        let isnull_true =
            lookup == LookupType::IsNull && matches!(&value, LookupValue::Value(v) if isnull_flag(v));

        let base = self.base_alias().to_string();
        let mut join_list = self.setup_joins(&base, &steps, Some(&*can_reuse));
        let start = join_list.last().cloned().unwrap_or(base);
        let (alias, column, trimmed_null) =
            self.trim_joins(start, target.column.clone(), &mut join_list);
        let column_null = trimmed_null.unwrap_or(field_null);

        let mut node = WhereNode::default();
        node.add(
            WhereChild::Constraint(
                Constraint::new(alias.clone(), column.clone(), lookup, value)
                    .with_field_type(Some(target.field_type)),
            ),
            Connector::And,
        );

        if isnull_true && !negate && !join_list.is_empty() {
            self.joins.promote_alias_chain(&join_list, false);
        }

        if negate {
            for a in &join_list {
                self.joins.promote_alias(a, false);
            }
            if lookup != LookupType::IsNull {
                let guard = if column_null && !empty_in {
                    Some((alias.clone(), column.clone()))
                } else {
                    join_list.iter().find_map(|a| {
                        let entry = self.joins.get(a)?;
                        if entry.join_type == Some(JoinType::LeftOuter) {
                            Some((a.clone(), entry.rhs_col.clone()?))
                        } else {
                            None
                        }
                    })
                };
                if let Some((guard_alias, guard_col)) = guard {
                    let is_null = Constraint::new(
                        guard_alias,
                        guard_col,
                        LookupType::IsNull,
                        LookupValue::Value(Value::Bool(true)),
                    );
                    node.add(
                        WhereChild::Node(WhereNode::with_children(
                            Connector::And,
                            true,
                            vec![WhereChild::Constraint(is_null)],
                        )),
                        Connector::And,
                    );
                }
            }
        }

        tracing::trace!("Filter '{key}' on '{}' resolved to {alias}.{column}", self.model);
        can_reuse.extend(join_list);
        Ok(node)
    }

    /// Answers a negated multi-valued lookup with
    /// `pk IN (SELECT pk ... WHERE lookup)`, to be negated by the caller.
    fn split_exclude(&self, key: &str, value: LookupValue) -> RelqResult<WhereNode> {
        let mut inner = Self::new(Arc::clone(&self.registry), &self.model)?;
        let mut used = HashSet::new();
        let node = inner.add_filter(key, value, false, &mut used)?;
        inner.where_.add(WhereChild::Node(node), Connector::And);
        inner.clear_ordering(true);
        let pk = self.pk_column()?;
        inner.select = vec![SelectColumn::column(inner.base_alias(), pk.clone())];
        inner.bump_prefix("U");
        tracing::debug!("Split exclude of '{key}' on '{}' into a subquery", self.model);

        let pk_field = self.registry.pk(&self.model)?.field_type.clone();
        let leaf = Constraint::new(
            self.base_alias(),
            pk,
            LookupType::In,
            LookupValue::Query(Box::new(inner)),
        )
        .with_field_type(Some(pk_field));
        Ok(WhereNode::with_children(
            Connector::And,
            false,
            vec![WhereChild::Constraint(leaf)],
        ))
    }

    /// Prepares a query for use inside `IN (...)`.
    pub(crate) fn prepare_as_subquery(&mut self) -> RelqResult<()> {
        match self.select.len() {
            0 => {
                let pk = self.pk_column()?;
                self.select = vec![SelectColumn::column(self.base_alias(), pk)];
            }
            1 => {}
            n => {
                return Err(RelqError::invalid_query(format!(
                    "A subquery used with 'in' must select one column, not {n}"
                )))
            }
        }
        self.clear_ordering(true);
        self.bump_prefix("U");
        Ok(())
    }

    // ── Path resolution ──────────────────────────────────────────────

    fn resolve_path(&self, model: &str, names: &[&str]) -> RelqResult<Vec<NameStep>> {
        let mut current = model.to_string();
        let mut steps: Vec<NameStep> = Vec::with_capacity(names.len());
        for name in names {
            if let Some(prev) = steps.last() {
                if !prev.is_relation {
                    return Err(RelqError::field(format!(
                        "Join on field '{}' not permitted. Did you misspell '{name}' for the lookup type?",
                        prev.field.name
                    )));
                }
            }
            let step = self.registry.resolve_name(&current, name)?;
            current.clone_from(&step.model);
            steps.push(step);
        }
        Ok(steps)
    }

    /// Joins every hop of `steps` starting at `start`. With `can_reuse`,
    /// multi-valued hops only reuse aliases in that set; without it every
    /// hop reuses whatever matches.
    fn setup_joins(
        &mut self,
        start: &str,
        steps: &[NameStep],
        can_reuse: Option<&HashSet<String>>,
    ) -> Vec<String> {
        let mut alias = start.to_string();
        let mut join_list = Vec::new();
        for hop in steps.iter().flat_map(|s| s.hops.iter()) {
            let reuse = match can_reuse {
                Some(set) if hop.multi => Reuse::Only(set),
                _ => Reuse::Always,
            };
            alias = self.joins.join(
                &alias,
                &hop.table,
                &hop.lhs_col,
                &hop.rhs_col,
                JoinOptions {
                    reuse,
                    nullable: hop.nullable,
                    ..JoinOptions::default()
                },
            );
            join_list.push(alias.clone());
        }
        join_list
    }

    /// Drops trailing joins whose joined column is the compared column: the
    /// same value is available on the left-hand side.
    ///
    /// The third value is set once a join was trimmed and tells whether the
    /// left-hand column now compared may hold NULL.
    fn trim_joins(
        &mut self,
        mut alias: String,
        mut column: String,
        join_list: &mut Vec<String>,
    ) -> (String, String, Option<bool>) {
        let mut lhs_nullable = None;
        while let Some(last) = join_list.last() {
            let Some(entry) = self.joins.get(last) else {
                break;
            };
            if entry.rhs_col.as_deref() != Some(column.as_str()) {
                break;
            }
            let (Some(lhs), Some(lhs_col)) = (entry.lhs_alias.clone(), entry.lhs_col.clone())
            else {
                break;
            };
            lhs_nullable = Some(entry.nullable);
            let last = last.clone();
            self.joins.unref_alias(&last);
            join_list.pop();
            alias = lhs;
            column = lhs_col;
        }
        (alias, column, lhs_nullable)
    }

    /// Resolves a lookup path to a selectable column, joining as needed.
    /// Returns the alias, the column and the field found at the end.
    pub(crate) fn setup_column(&mut self, name: &str) -> RelqResult<(String, String, FieldDef)> {
        let pieces: Vec<&str> = name.split(LOOKUP_SEP).collect();
        let steps = self.resolve_path(&self.model, &pieces)?;
        let Some(last) = steps.last() else {
            return Err(RelqError::field(format!("Cannot resolve '{name}' into a column")));
        };
        let target = last.target.clone();
        let base = self.base_alias().to_string();
        let mut joins = self.setup_joins(&base, &steps, None);
        let start = joins.last().cloned().unwrap_or(base);
        let (alias, column, _) = self.trim_joins(start, target.column.clone(), &mut joins);
        self.joins.promote_alias_chain(&joins, false);
        Ok((alias, column, target))
    }

    // ── Projection ───────────────────────────────────────────────────

    /// Selects the named fields instead of the default columns.
    pub fn add_fields(&mut self, names: &[&str]) -> RelqResult<()> {
        for name in names {
            let (alias, column, _) = self.setup_column(name)?;
            self.select.push(SelectColumn::column(alias, column));
        }
        Ok(())
    }

    /// Adds GROUP BY terms.
    pub fn add_group_by(&mut self, names: &[&str]) -> RelqResult<()> {
        for name in names {
            let (alias, column, _) = self.setup_column(name)?;
            self.group_by.push(SelectColumn::column(alias, column));
        }
        Ok(())
    }

    /// Returns to the default columns.
    pub fn clear_select(&mut self) {
        self.select.clear();
    }

    /// Every concrete column of the model, inherited ones read through the
    /// parent-link joins.
    fn default_columns(&mut self) -> RelqResult<Vec<SelectColumn>> {
        let registry = Arc::clone(&self.registry);
        let base = self.base_alias().to_string();
        let mut columns = Vec::new();
        for (owner, field) in registry.concrete_fields_with_model(&self.model)? {
            let alias = if owner.model_name == self.model {
                base.clone()
            } else {
                let step = registry.resolve_name(&self.model, &field.name)?;
                let joins = self.setup_joins(&base, std::slice::from_ref(&step), None);
                joins.last().cloned().unwrap_or_else(|| base.clone())
            };
            columns.push(SelectColumn::column(alias, field.column.clone()));
        }
        Ok(columns)
    }

    // ── Ordering ─────────────────────────────────────────────────────

    /// Appends ordering terms: field paths with an optional `-`, `?` for
    /// random, a column position, or `table.column`. No terms at all turns
    /// the model's default ordering off.
    pub fn add_ordering<I, S>(&mut self, names: I) -> RelqResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let bad: Vec<&String> = names.iter().filter(|n| !ORDER_PATTERN.is_match(n)).collect();
        if !bad.is_empty() {
            return Err(RelqError::field(format!("Invalid order_by arguments: {bad:?}")));
        }
        if names.is_empty() {
            self.default_ordering = false;
        } else {
            self.order_by.extend(names);
        }
        Ok(())
    }

    /// Removes explicit ordering; with `force_empty` the default ordering
    /// is dropped as well.
    pub fn clear_ordering(&mut self, force_empty: bool) {
        self.order_by.clear();
        if force_empty {
            self.default_ordering = false;
        }
    }

    /// Flips every ordering direction.
    pub fn reverse_ordering(&mut self) {
        self.standard_ordering = !self.standard_ordering;
    }

    /// Resolves the ordering without compiling anything, reporting unknown
    /// names and default orderings that loop back on themselves.
    pub fn validate_ordering(&self) -> RelqResult<()> {
        let mut probe = self.clone();
        probe.get_ordering(&SqlCompiler::new(DatabaseBackendType::SQLite), &[])?;
        Ok(())
    }

    /// Returns the ORDER BY terms and, for DISTINCT queries, the ordering
    /// columns that have to be added to the SELECT list.
    fn get_ordering(
        &mut self,
        compiler: &SqlCompiler,
        selected: &[String],
    ) -> RelqResult<(Vec<String>, Vec<String>)> {
        let mut visited = HashSet::new();
        let ordering = if !self.order_by.is_empty() {
            self.order_by.clone()
        } else if self.default_ordering {
            visited.insert(self.model.clone());
            self.get_meta()?.ordering.clone()
        } else {
            Vec::new()
        };
        let default_desc = !self.standard_ordering;
        let base = self.base_alias().to_string();
        let model = self.model.clone();

        let mut result = Vec::new();
        let mut extra = Vec::new();
        let mut seen = HashSet::new();
        for name in &ordering {
            if name == "?" {
                result.push(compiler.random_function_sql().to_string());
                continue;
            }
            let (bare, desc) = order_dir(name, default_desc);
            if bare.chars().all(|c| c.is_ascii_digit()) {
                result.push(format!("{bare} {}", OrderDirection::from_desc(desc).as_sql()));
                continue;
            }
            if let Some((table, column)) = bare.split_once('.') {
                let elt = compiler.qualified(table, column);
                if !self.distinct || selected.contains(&elt) {
                    result.push(format!("{elt} {}", OrderDirection::from_desc(desc).as_sql()));
                }
                continue;
            }
            for (alias, column, desc) in
                self.find_ordering_name(name, &model, &base, default_desc, &visited)?
            {
                if !seen.insert((alias.clone(), column.clone())) {
                    continue;
                }
                let elt = compiler.qualified(&alias, &column);
                if self.distinct && !selected.contains(&elt) && !extra.contains(&elt) {
                    extra.push(elt.clone());
                }
                result.push(format!("{elt} {}", OrderDirection::from_desc(desc).as_sql()));
            }
        }
        Ok((result, extra))
    }

    /// Expands one ordering name on `model` (reached through `alias`) into
    /// column terms. Ordering by a relation uses the related model's default
    /// ordering; `visited` holds the models whose default ordering is
    /// already being expanded.
    fn find_ordering_name(
        &mut self,
        name: &str,
        model: &str,
        alias: &str,
        default_desc: bool,
        visited: &HashSet<String>,
    ) -> RelqResult<Vec<OrderTerm>> {
        let (bare, desc) = order_dir(name, default_desc);
        let pieces: Vec<&str> = bare.split(LOOKUP_SEP).collect();
        let steps = self.resolve_path(model, &pieces)?;
        let Some(last) = steps.last() else {
            return Err(RelqError::field(format!("Cannot resolve ordering term '{name}'")));
        };
        let mut joins = self.setup_joins(alias, &steps, None);
        self.joins.promote_alias_chain(&joins, false);
        let target_alias = joins.last().cloned().unwrap_or_else(|| alias.to_string());

        if last.is_relation {
            let registry = Arc::clone(&self.registry);
            let related = registry.get(&last.model)?;
            if !related.ordering.is_empty() {
                if visited.contains(&related.model_name) {
                    return Err(RelqError::OrderingCycle {
                        model: related.model_name.clone(),
                    });
                }
                let mut visited = visited.clone();
                visited.insert(related.model_name.clone());
                let mut terms = Vec::new();
                for item in &related.ordering {
                    terms.extend(self.find_ordering_name(
                        item,
                        &related.model_name,
                        &target_alias,
                        desc,
                        &visited,
                    )?);
                }
                return Ok(terms);
            }
        }

        let (alias, column, _) =
            self.trim_joins(target_alias, last.target.column.clone(), &mut joins);
        Ok(vec![(alias, column, desc)])
    }

    // ── Slicing ──────────────────────────────────────────────────────

    /// Narrows the slice. Bounds are relative to the current slice and are
    /// clamped so the window never grows.
    pub fn set_limits(&mut self, low: Option<usize>, high: Option<usize>) {
        if let Some(high) = high {
            let absolute = self.low_mark + high;
            self.high_mark = Some(self.high_mark.map_or(absolute, |h| h.min(absolute)));
        }
        if let Some(low) = low {
            let absolute = self.low_mark + low;
            self.low_mark = self.high_mark.map_or(absolute, |h| h.min(absolute));
        }
    }

    /// Removes the slice.
    pub fn clear_limits(&mut self) {
        self.low_mark = 0;
        self.high_mark = None;
    }

    /// Filters may only be added before a slice is taken.
    pub const fn can_filter(&self) -> bool {
        self.low_mark == 0 && self.high_mark.is_none()
    }

    // ── Aliases ──────────────────────────────────────────────────────

    /// Renames every alias to `<prefix><n>`, so the query can be nested in
    /// another without alias clashes.
    pub fn bump_prefix(&mut self, prefix: &str) {
        let change_map = self.joins.bump_prefix(prefix);
        self.relabel(&change_map);
    }

    /// Renames aliases throughout the query.
    pub fn change_aliases(&mut self, change_map: &HashMap<String, String>) {
        self.joins.change_aliases(change_map);
        self.relabel(change_map);
    }

    fn relabel(&mut self, change_map: &HashMap<String, String>) {
        self.where_.relabel_aliases(change_map);
        for column in self.select.iter_mut().chain(self.group_by.iter_mut()) {
            column.relabel(change_map);
        }
    }

    // ── Combining ────────────────────────────────────────────────────

    /// Merges `rhs` into this query with AND or OR.
    ///
    /// Joins of `rhs` are re-created here. Under AND each gets a fresh
    /// alias, since `rhs` filtered independently; under OR existing joins
    /// are shared where possible and joins only one side uses become LEFT
    /// OUTER so that the other side's rows survive.
    pub fn combine(&mut self, rhs: &Self, connector: Connector) -> RelqResult<()> {
        if self.model != rhs.model {
            return Err(RelqError::invalid_query(
                "Cannot combine queries on two different base models.",
            ));
        }
        if !self.can_filter() || !rhs.can_filter() {
            return Err(RelqError::invalid_query(
                "Cannot combine queries once a slice has been taken.",
            ));
        }
        if self.distinct != rhs.distinct {
            return Err(RelqError::invalid_query(
                "Cannot combine a unique query with a non-unique query.",
            ));
        }

        let conjunction = connector == Connector::And;
        let existing: Vec<String> = self
            .joins
            .entries()
            .skip(1)
            .filter(|e| e.refcount > 0)
            .map(|e| e.alias.clone())
            .collect();

        let mut change_map: HashMap<String, String> = HashMap::new();
        let mut used: HashSet<String> = HashSet::new();
        for entry in rhs.joins.entries() {
            if entry.refcount == 0 {
                continue;
            }
            let new_alias = match (&entry.lhs_alias, &entry.lhs_col, &entry.rhs_col) {
                (Some(lhs), Some(lhs_col), Some(rhs_col)) => {
                    let lhs = change_map.get(lhs).cloned().unwrap_or_else(|| lhs.clone());
                    let reuse = if conjunction {
                        Reuse::Never
                    } else {
                        Reuse::Except(&used)
                    };
                    self.joins.join(
                        &lhs,
                        &entry.table,
                        lhs_col,
                        rhs_col,
                        JoinOptions {
                            reuse,
                            promote: entry.join_type == Some(JoinType::LeftOuter),
                            outer_if_first: !conjunction,
                            nullable: entry.nullable,
                        },
                    )
                }
                _ => {
                    let base = self.base_alias().to_string();
                    self.joins.ref_alias(&base);
                    base
                }
            };
            used.insert(new_alias.clone());
            change_map.insert(entry.alias.clone(), new_alias);
        }

        if !conjunction {
            for alias in existing.iter().filter(|a| !used.contains(*a)) {
                self.joins.promote_alias(alias, true);
            }
        }

        let mut w = rhs.where_.clone();
        w.relabel_aliases(&change_map);
        if !rhs.where_.is_empty() {
            if self.where_.is_empty() {
                self.where_.add(WhereChild::Everything, Connector::And);
            }
        } else if !self.where_.is_empty() {
            w = WhereNode::with_children(Connector::And, false, vec![WhereChild::Everything]);
        }
        self.where_.add(WhereChild::Node(w), connector);

        self.select = rhs
            .select
            .iter()
            .cloned()
            .map(|mut c| {
                c.relabel(&change_map);
                c
            })
            .collect();
        if !rhs.order_by.is_empty() {
            self.order_by.clone_from(&rhs.order_by);
        }
        tracing::debug!("Combined two queries on '{}' with {connector}", self.model);
        Ok(())
    }

    // ── Compilation ──────────────────────────────────────────────────

    /// Compiles the query to SQL and its bound parameters. The query itself
    /// is left untouched.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        let mut query = self.clone();
        let mut params = Vec::new();
        let sql = query.compile_select(compiler, &mut params, true)?;
        tracing::debug!("Compiled query on '{}': {sql}", self.model);
        Ok((sql, params))
    }

    /// Compiles the query for nesting inside another, appending its
    /// parameters to `params`.
    pub(crate) fn compile_nested(
        &self,
        compiler: &SqlCompiler,
        params: &mut Vec<Value>,
    ) -> RelqResult<String> {
        self.clone().compile_select(compiler, params, true)
    }

    pub(crate) fn compile_select(
        &mut self,
        compiler: &SqlCompiler,
        params: &mut Vec<Value>,
        with_limits: bool,
    ) -> RelqResult<String> {
        if self.select.is_empty() {
            self.select = self.default_columns()?;
        }
        let mut columns: Vec<String> = self.select.iter().map(|c| c.as_sql(compiler)).collect();
        let (ordering, extra) = self.get_ordering(compiler, &columns)?;
        columns.extend(extra);

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&columns.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&self.get_from_clause(compiler));
        match self.where_.as_sql(compiler, params)? {
            WhereSql::MatchAll => {}
            WhereSql::MatchNothing => sql.push_str(" WHERE 1=0"),
            WhereSql::Sql(w) => {
                sql.push_str(" WHERE ");
                sql.push_str(&w);
            }
        }
        if !self.group_by.is_empty() {
            let terms: Vec<String> = self.group_by.iter().map(|c| c.as_sql(compiler)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&terms.join(", "));
        }
        if !ordering.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering.join(", "));
        }
        if with_limits {
            sql.push_str(&compiler.limit_offset_sql(self.low_mark, self.high_mark));
        }
        Ok(sql)
    }

    /// The FROM clause: every live alias in creation order, joins with their
    /// ON condition.
    pub(crate) fn get_from_clause(&self, compiler: &SqlCompiler) -> String {
        let mut from = String::new();
        for entry in self.joins.entries().filter(|e| e.refcount > 0) {
            let name = compiler.quote_name(&entry.table);
            let alias = if entry.alias == entry.table {
                String::new()
            } else {
                format!(" {}", compiler.quote_name(&entry.alias))
            };
            match (entry.join_type, &entry.lhs_alias, &entry.lhs_col, &entry.rhs_col) {
                (Some(join_type), Some(lhs), Some(lhs_col), Some(rhs_col)) if !from.is_empty() => {
                    from.push_str(&format!(
                        " {} {name}{alias} ON ({} = {})",
                        join_type.sql_keyword(),
                        compiler.qualified(lhs, lhs_col),
                        compiler.qualified(&entry.alias, rhs_col)
                    ));
                }
                _ => {
                    if !from.is_empty() {
                        from.push_str(", ");
                    }
                    from.push_str(&name);
                    from.push_str(&alias);
                }
            }
        }
        if from.is_empty() {
            if let Some(entry) = self.joins.get(self.base_alias()) {
                from = compiler.quote_name(&entry.table);
            }
        }
        from
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Runs the query and returns every row.
    pub fn execute_sql(&self, db: &dyn DbExecutor) -> RelqResult<Vec<Row>> {
        let (sql, params) = self.as_sql(&db.compiler())?;
        db.query(&sql, &params)
    }

    /// Runs the query and iterates over the rows.
    pub fn results_iter(&self, db: &dyn DbExecutor) -> RelqResult<std::vec::IntoIter<Row>> {
        Ok(self.execute_sql(db)?.into_iter())
    }

    /// Counts matching rows, honouring DISTINCT and the slice.
    pub fn get_count(&self, db: &dyn DbExecutor) -> RelqResult<u64> {
        let compiler = db.compiler();
        let mut counting = self.clone();
        counting.clear_ordering(true);
        counting.clear_limits();
        let (sql, params) = if counting.select.len() > 1 {
            CountQuery::new(counting).as_sql(&compiler)?
        } else {
            counting.add_count_column(&compiler)?;
            counting.as_sql(&compiler)?
        };
        let number = match db.query(&sql, &params)?.first() {
            Some(row) => row.get_by_index::<u64>(0)?,
            None => 0,
        };
        Ok(self.apply_limits_to_count(number))
    }

    fn apply_limits_to_count(&self, number: u64) -> u64 {
        let low = self.low_mark as u64;
        let mut number = number.saturating_sub(low);
        if let Some(high) = self.high_mark {
            number = number.min((high as u64).saturating_sub(low));
        }
        number
    }

    fn add_count_column(&mut self, compiler: &SqlCompiler) -> RelqResult<()> {
        let count = if self.distinct {
            let column = match self.select.as_slice() {
                [] => SelectColumn::column(self.base_alias(), self.pk_column()?),
                [column] => column.clone(),
                _ => {
                    return Err(RelqError::invalid_query(
                        "Cannot add a count column with multiple columns selected",
                    ))
                }
            };
            self.distinct = false;
            format!("COUNT(DISTINCT {})", column.as_sql(compiler))
        } else {
            match self.select.as_slice() {
                [] => "COUNT(*)".to_string(),
                [column] => format!("COUNT({})", column.as_sql(compiler)),
                _ => {
                    return Err(RelqError::invalid_query(
                        "Cannot add a count column with multiple columns selected",
                    ))
                }
            }
        };
        self.select = vec![SelectColumn::Raw(count)];
        Ok(())
    }

    /// Whether at least one row matches.
    pub fn has_results(&self, db: &dyn DbExecutor) -> RelqResult<bool> {
        let mut probe = self.clone();
        probe.clear_ordering(true);
        probe.select = vec![SelectColumn::Raw("1".to_string())];
        probe.set_limits(None, Some(1));
        Ok(!probe.execute_sql(db)?.is_empty())
    }
}

/// Splits a lookup keyword into field names and the trailing operator.
fn parse_lookup(key: &str) -> RelqResult<(Vec<&str>, LookupType)> {
    let mut parts: Vec<&str> = key.split(LOOKUP_SEP).collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(RelqError::field(format!("Cannot parse keyword query '{key}'")));
    }
    let mut lookup = LookupType::Exact;
    if parts.len() > 1 {
        if let Some(t) = parts.last().and_then(|p| LookupType::from_name(p)) {
            lookup = t;
            parts.pop();
        }
    }
    Ok((parts, lookup))
}

/// Checks and normalizes the value given for a lookup.
fn prepare_value(
    key: &str,
    lookup: LookupType,
    value: LookupValue,
) -> RelqResult<(LookupType, LookupValue)> {
    match (lookup, value) {
        (LookupType::Exact, LookupValue::Value(Value::Null)) => Ok((
            LookupType::IsNull,
            LookupValue::Value(Value::Bool(true)),
        )),
        (LookupType::IsNull, v @ LookupValue::Value(_)) => Ok((LookupType::IsNull, v)),
        (_, LookupValue::Value(Value::Null)) => {
            Err(RelqError::field("Cannot use None as a query value"))
        }
        (LookupType::In, LookupValue::Value(Value::List(items))) => {
            Ok((LookupType::In, LookupValue::List(items)))
        }
        (LookupType::In, LookupValue::Value(v)) => Ok((LookupType::In, LookupValue::List(vec![v]))),
        (LookupType::In, LookupValue::Query(mut inner)) => {
            inner.prepare_as_subquery()?;
            Ok((LookupType::In, LookupValue::Query(inner)))
        }
        (LookupType::In, v @ LookupValue::List(_)) => Ok((LookupType::In, v)),
        (LookupType::Range, LookupValue::Value(Value::List(items))) if items.len() == 2 => {
            let mut items = items.into_iter();
            match (items.next(), items.next()) {
                (Some(low), Some(high)) => Ok((LookupType::Range, LookupValue::Range(low, high))),
                _ => Err(RelqError::field(format!(
                    "The 'range' lookup on '{key}' needs exactly two values"
                ))),
            }
        }
        (LookupType::Range, v @ LookupValue::Range(..)) => Ok((LookupType::Range, v)),
        (LookupType::Range, _) => Err(RelqError::field(format!(
            "The 'range' lookup on '{key}' needs exactly two values"
        ))),
        (lookup, LookupValue::Value(Value::List(_))) => Err(RelqError::field(format!(
            "The '{lookup}' lookup on '{key}' does not accept a list"
        ))),
        (lookup, v @ LookupValue::Value(_)) => Ok((lookup, v)),
        (lookup, _) => Err(RelqError::field(format!(
            "The '{lookup}' lookup on '{key}' needs a single value"
        ))),
    }
}

/// Strips a direction prefix; `-` flips `default_desc`.
fn order_dir(name: &str, default_desc: bool) -> (&str, bool) {
    if let Some(rest) = name.strip_prefix('-') {
        (rest, !default_desc)
    } else if let Some(rest) = name.strip_prefix('+') {
        (rest, default_desc)
    } else {
        (name, default_desc)
    }
}
