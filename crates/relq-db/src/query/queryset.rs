//! QuerySet and Manager for building and executing database queries.
//!
//! A [`QuerySet`] wraps a [`Query`] and never touches the database until a
//! terminal method (`fetch`, `count`, `get`, `delete`, ...) is called with a
//! [`DbExecutor`]. Every builder method works on its own copy, so a queryset
//! that has been derived from another leaves the original untouched. The
//! [`Manager`] is the entry point for a model, equivalent to Django's
//! `objects`.
//!
//! # Examples
//!
//! ```
//! use relq_db::fields::{FieldDef, FieldType};
//! use relq_db::model::{ModelMeta, ModelRegistry};
//! use relq_db::query::compiler::{DatabaseBackendType, SqlCompiler};
//! use relq_db::query::lookups::Q;
//! use relq_db::query::queryset::QuerySet;
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
//!             .field(FieldDef::new("headline", FieldType::CharField))
//!             .field(FieldDef::foreign_key("reporter", "Reporter")),
//!     )
//!     .unwrap()
//!     .into_shared()
//!     .unwrap();
//!
//! let qs = QuerySet::new(registry, "Article")
//!     .unwrap()
//!     .filter(Q::filter("reporter__first_name", "John"))
//!     .unwrap();
//! let (sql, _) = qs.as_sql(&SqlCompiler::new(DatabaseBackendType::SQLite)).unwrap();
//! assert!(sql.contains("INNER JOIN \"many_to_one_reporter\""));
//! ```

use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;

use chrono::NaiveDateTime;
use relq_core::{RelqError, RelqResult};

use super::compiler::{DateKind, SqlCompiler};
use super::lookups::Q;
use super::query::{OrderDirection, Query};
use super::subqueries::{
    DateQuery, DeleteQuery, InsertQuery, InsertValue, UpdateQuery, GET_ITERATOR_CHUNK_SIZE,
};
use super::where_node::Connector;
use crate::executor::{DbExecutor, Row};
use crate::fields::OnDelete;
use crate::model::{Model, ModelRegistry};
use crate::value::Value;

/// The entry point for model-level query operations.
///
/// The `Manager` holds no query state; it hands out fresh querysets over
/// the model `M` and maps rows back to `M` for the single-object shortcuts.
#[derive(Debug)]
pub struct Manager<M: Model> {
    registry: Arc<ModelRegistry>,
    _phantom: PhantomData<M>,
}

impl<M: Model> Clone for Manager<M> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            _phantom: PhantomData,
        }
    }
}

impl<M: Model> Manager<M> {
    /// Creates a manager. `M` must be registered.
    pub fn new(registry: Arc<ModelRegistry>) -> RelqResult<Self> {
        registry.get(M::model_name())?;
        Ok(Self {
            registry,
            _phantom: PhantomData,
        })
    }

    /// Returns a new `QuerySet` that returns all objects.
    pub fn all(&self) -> RelqResult<QuerySet> {
        QuerySet::new(Arc::clone(&self.registry), M::model_name())
    }

    /// Returns a new `QuerySet` with the given filter applied.
    pub fn filter(&self, q: Q) -> RelqResult<QuerySet> {
        self.all()?.filter(q)
    }

    /// Returns a new `QuerySet` with the given exclusion applied.
    pub fn exclude(&self, q: Q) -> RelqResult<QuerySet> {
        self.all()?.exclude(q)
    }

    /// Returns a `QuerySet` that matches nothing.
    pub fn none(&self) -> RelqResult<QuerySet> {
        Ok(self.all()?.none())
    }

    /// Fetches every object.
    pub fn fetch(&self, db: &dyn DbExecutor) -> RelqResult<Vec<M>> {
        self.all()?.fetch_models(db)
    }

    /// Fetches the single object matching `q`.
    pub fn get(&self, q: Q, db: &dyn DbExecutor) -> RelqResult<M> {
        M::from_row(&self.all()?.get(q, db)?)
    }

    /// Inserts a row and returns its primary key.
    pub fn create<I, K, V>(&self, values: I, db: &dyn DbExecutor) -> RelqResult<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.all()?.create(values, db)
    }
}

/// A lazy, composable database query.
///
/// Filtering and ordering methods consume `self` and return the modified
/// queryset, so chains read left to right. Cloning is cheap enough to keep
/// an intermediate queryset around and derive several others from it.
#[derive(Debug, Clone)]
pub struct QuerySet {
    query: Query,
    /// Names requested through `values()`, used as row column names.
    fields: Option<Vec<String>>,
    /// Whether this queryset should return no results.
    is_none: bool,
}

impl QuerySet {
    /// Creates a queryset over every row of `model`.
    ///
    /// Fails when the model's default ordering cannot be resolved, which
    /// includes default orderings that loop back through relations.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> RelqResult<Self> {
        let query = Query::new(registry, model)?;
        query.validate_ordering()?;
        Ok(Self::from_query(query))
    }

    /// Wraps an existing query.
    pub const fn from_query(query: Query) -> Self {
        Self {
            query,
            fields: None,
            is_none: false,
        }
    }

    /// Returns a reference to the underlying query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// The base model's name.
    pub fn model(&self) -> &str {
        self.query.model()
    }

    /// Whether this queryset was emptied with [`none`](Self::none).
    pub const fn is_none(&self) -> bool {
        self.is_none
    }

    // ── Builders ─────────────────────────────────────────────────────

    /// Returns a copy of this queryset.
    #[must_use]
    pub fn all(&self) -> Self {
        self.clone()
    }

    /// Returns a queryset that matches nothing without querying.
    #[must_use]
    pub const fn none(mut self) -> Self {
        self.is_none = true;
        self
    }

    /// Adds a filter condition.
    ///
    /// Every lookup inside one `q` shares the joins of multi-valued
    /// relations; separate calls join them separately.
    pub fn filter(mut self, q: Q) -> RelqResult<Self> {
        self.check_filterable()?;
        self.query.add_q(&q)?;
        Ok(self)
    }

    /// Adds an exclusion condition.
    pub fn exclude(self, q: Q) -> RelqResult<Self> {
        self.filter(!q)
    }

    /// Keeps rows where `key` is among the rows of `inner`. Without a
    /// `values()` projection the inner queryset contributes its primary key.
    pub fn filter_in(mut self, key: &str, inner: &Self) -> RelqResult<Self> {
        self.check_filterable()?;
        if inner.is_none {
            return Ok(self.none());
        }
        self.query.add_subquery_filter(key, inner.query.clone())?;
        Ok(self)
    }

    /// Replaces the ordering. No terms disables the default ordering.
    pub fn order_by<I, S>(mut self, names: I) -> RelqResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query.clear_ordering(false);
        self.query.add_ordering(names)?;
        self.query.validate_ordering()?;
        Ok(self)
    }

    /// Turns SELECT DISTINCT on or off.
    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.query.set_distinct(distinct);
        self
    }

    /// Projects the named fields. Rows carry the names as written, so
    /// `values(&["reporter__first_name"])` yields a column of that name.
    /// No names projects every concrete field.
    pub fn values(mut self, fields: &[&str]) -> RelqResult<Self> {
        let names: Vec<String> = if fields.is_empty() {
            self.query
                .registry()
                .concrete_fields_with_model(self.query.model())?
                .into_iter()
                .map(|(_, f)| f.name.clone())
                .collect()
        } else {
            fields.iter().map(|f| (*f).to_string()).collect()
        };
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.query.clear_select();
        self.query.add_fields(&refs)?;
        self.fields = Some(names);
        Ok(self)
    }

    /// Reverses the ordering.
    #[must_use]
    pub fn reverse(mut self) -> Self {
        self.query.reverse_ordering();
        self
    }

    /// Restricts the rows to `[low, high)` of the current result.
    #[must_use]
    pub fn slice(mut self, low: Option<usize>, high: Option<usize>) -> Self {
        self.query.set_limits(low, high);
        self
    }

    /// Rows matching both querysets.
    pub fn and(mut self, other: &Self) -> RelqResult<Self> {
        if other.is_none {
            self.is_none = true;
        }
        if self.is_none {
            return Ok(self);
        }
        self.query.combine(&other.query, Connector::And)?;
        Ok(self)
    }

    /// Rows matching either queryset.
    pub fn or(mut self, other: &Self) -> RelqResult<Self> {
        if self.is_none {
            return Ok(other.clone());
        }
        if other.is_none {
            return Ok(self);
        }
        self.query.combine(&other.query, Connector::Or)?;
        Ok(self)
    }

    fn check_filterable(&self) -> RelqResult<()> {
        if self.query.can_filter() {
            Ok(())
        } else {
            Err(RelqError::invalid_query(
                "Cannot filter a query once a slice has been taken.",
            ))
        }
    }

    // ── Compilation ──────────────────────────────────────────────────

    /// Compiles the SELECT for the given dialect.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        self.query.as_sql(compiler)
    }

    /// Names given to the columns of fetched rows.
    fn column_names(&self) -> RelqResult<Vec<String>> {
        if let Some(fields) = &self.fields {
            return Ok(fields.clone());
        }
        Ok(self
            .query
            .registry()
            .concrete_fields_with_model(self.query.model())?
            .into_iter()
            .map(|(_, f)| f.column.clone())
            .collect())
    }

    // ── Execution ────────────────────────────────────────────────────

    /// Runs the query and returns every row.
    ///
    /// Columns are named after the field columns, or after the names given
    /// to `values()`.
    pub fn fetch(&self, db: &dyn DbExecutor) -> RelqResult<Vec<Row>> {
        Ok(self.iter(db)?.collect())
    }

    /// Runs the query and iterates over the rows.
    pub fn iter(&self, db: &dyn DbExecutor) -> RelqResult<impl Iterator<Item = Row>> {
        let rows = if self.is_none {
            Vec::new()
        } else {
            self.query.execute_sql(db)?
        };
        let names = self.column_names()?;
        Ok(rows.into_iter().map(move |row| {
            if row.len() == names.len() {
                Row::new(names.clone(), row.into_values())
            } else {
                row
            }
        }))
    }

    /// Runs the query and maps each row to `M`.
    pub fn fetch_models<M: Model>(&self, db: &dyn DbExecutor) -> RelqResult<Vec<M>> {
        self.iter(db)?.map(|row| M::from_row(&row)).collect()
    }

    /// Returns the number of matching rows.
    pub fn count(&self, db: &dyn DbExecutor) -> RelqResult<u64> {
        if self.is_none {
            return Ok(0);
        }
        self.query.get_count(db)
    }

    /// Returns whether any rows match.
    pub fn exists(&self, db: &dyn DbExecutor) -> RelqResult<bool> {
        if self.is_none {
            return Ok(false);
        }
        self.query.has_results(db)
    }

    /// Returns the single row matching `q`.
    ///
    /// Returns `DoesNotExist` if no rows match, or
    /// `MultipleObjectsReturned` if more than one does.
    pub fn get(&self, q: Q, db: &dyn DbExecutor) -> RelqResult<Row> {
        let model = self.model().to_string();
        let mut rows = self.clone().filter(q.clone())?.fetch(db)?;
        match rows.len() {
            0 => Err(RelqError::DoesNotExist(format!(
                "{model} matching query does not exist."
            ))),
            1 => Ok(rows.remove(0)),
            n => Err(RelqError::MultipleObjectsReturned(format!(
                "get() returned more than one {model} -- it returned {n}! Lookup parameters were {q:?}"
            ))),
        }
    }

    /// Sets fields on every matching row and returns the number of rows
    /// changed. Fields of ancestor models are written to their own tables.
    pub fn update<I, K, V>(&self, values: I, db: &dyn DbExecutor) -> RelqResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        if !self.query.can_filter() {
            return Err(RelqError::invalid_query(
                "Cannot update a query once a slice has been taken.",
            ));
        }
        if self.is_none {
            return Ok(0);
        }
        let mut update = UpdateQuery::from_query(self.query.clone());
        update.add_update_values(values)?;
        update.execute(db)
    }

    /// Deletes every matching row along with the rows that depend on it.
    ///
    /// Reverse relations are followed according to their `on_delete`
    /// action, many-to-many rows are removed, and the rows of ancestor
    /// tables go too. Returns the number of rows deleted across all tables.
    pub fn delete(&self, db: &dyn DbExecutor) -> RelqResult<u64> {
        if !self.query.can_filter() {
            return Err(RelqError::invalid_query(
                "Cannot use 'limit' or 'offset' with delete.",
            ));
        }
        if self.is_none {
            return Ok(0);
        }
        let mut keys = self.query.clone();
        keys.clear_select();
        keys.clear_ordering(true);
        keys.set_distinct(false);
        keys.add_fields(&["pk"])?;
        let pks = first_values(keys.execute_sql(db)?);
        if pks.is_empty() {
            return Ok(0);
        }
        let mut collector = Collector::new(Arc::clone(self.query.registry()));
        collector.collect(self.model(), pks, db)?;
        collector.delete(db)
    }

    /// Distinct values of a date field truncated to `kind`.
    pub fn dates(
        &self,
        field: &str,
        kind: DateKind,
        order: OrderDirection,
        db: &dyn DbExecutor,
    ) -> RelqResult<Vec<NaiveDateTime>> {
        let mut dates = DateQuery::from_query(self.query.clone());
        dates.add_date_select(field, kind, order)?;
        if self.is_none {
            return Ok(Vec::new());
        }
        dates.results(db)
    }

    /// Inserts a row and returns its primary key.
    ///
    /// For a model with ancestors, the root table is written first and each
    /// child row receives its parent's key through the parent link.
    pub fn create<I, K, V>(&self, values: I, db: &dyn DbExecutor) -> RelqResult<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let registry = Arc::clone(self.query.registry());
        let model = self.model();
        let meta = registry.get(model)?;
        let lineage = registry.lineage(meta)?;
        let pk_name = registry.pk(model)?.name.clone();

        let mut per_table: Vec<Vec<(String, InsertValue)>> = vec![Vec::new(); lineage.len()];
        for (name, value) in values {
            let name = match name.as_ref() {
                "pk" => pk_name.clone(),
                other => other.to_string(),
            };
            let slot = lineage
                .iter()
                .position(|m| m.local_field(&name).is_some_and(|f| f.is_concrete()))
                .ok_or_else(|| {
                    RelqError::field(format!("'{name}' is not a concrete field of '{model}'"))
                })?;
            per_table[slot].push((name, InsertValue::Param(value.into())));
        }

        let mut parent_id: Option<Value> = None;
        for (owner, mut row) in lineage.iter().zip(per_table).rev() {
            let owner_pk = registry.pk(&owner.model_name)?;
            if let Some(id) = &parent_id {
                if let Some(link) = owner.parent_link() {
                    if !row.iter().any(|(n, _)| *n == link.name) {
                        row.push((link.name.clone(), InsertValue::Param(id.clone())));
                    }
                }
            }
            let explicit = row.iter().find_map(|(n, v)| match v {
                InsertValue::Param(value) if *n == owner_pk.name => Some(value.clone()),
                _ => None,
            });
            let mut insert = InsertQuery::new(Arc::clone(&registry), &owner.model_name)?;
            insert.insert_values(row)?;
            let returned = insert.execute_sql(db)?;
            parent_id = Some(explicit.unwrap_or(returned));
        }
        parent_id.ok_or_else(|| RelqError::invalid_query("Nothing was inserted"))
    }
}

fn first_values(rows: Vec<Row>) -> Vec<Value> {
    rows.into_iter()
        .filter_map(|row| row.into_values().into_iter().next())
        .collect()
}

/// Rows scheduled for deletion, gathered by following relations.
///
/// Entries are kept in collection order: a model's ancestors before the
/// model, and a model before the rows that point at it. Deleting in reverse
/// order therefore removes referencing rows first.
struct Collector {
    registry: Arc<ModelRegistry>,
    seen: HashSet<(String, String)>,
    batches: Vec<(String, Vec<Value>)>,
    nulls: Vec<(String, String, Vec<Value>)>,
}

impl Collector {
    fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            seen: HashSet::new(),
            batches: Vec::new(),
            nulls: Vec::new(),
        }
    }

    fn collect(&mut self, model: &str, pks: Vec<Value>, db: &dyn DbExecutor) -> RelqResult<()> {
        let fresh: Vec<Value> = pks
            .into_iter()
            .filter(|pk| self.seen.insert((model.to_string(), pk.to_string())))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }
        let registry = Arc::clone(&self.registry);

        // The parent link is the primary key, so ancestors share the keys.
        if let Some((_, parent)) = registry.parent_of(registry.get(model)?)? {
            self.collect(&parent.model_name, fresh.clone(), db)?;
        }
        self.batches.push((model.to_string(), fresh.clone()));

        for rel in registry.reverse_relations(model)? {
            let action = rel.field.delete_action().unwrap_or(OnDelete::Cascade);
            if action == OnDelete::DoNothing {
                continue;
            }
            let mut related = Vec::new();
            for chunk in fresh.chunks(GET_ITERATOR_CHUNK_SIZE) {
                let mut query = Query::new(Arc::clone(&registry), &rel.related.model_name)?;
                query.clear_ordering(true);
                query.filter(
                    &format!("{}__pk__in", rel.field.name),
                    Value::List(chunk.to_vec()),
                )?;
                query.add_fields(&["pk"])?;
                related.extend(first_values(query.execute_sql(db)?));
            }
            if related.is_empty() {
                continue;
            }
            match action {
                OnDelete::Cascade => self.collect(&rel.related.model_name, related, db)?,
                OnDelete::SetNull => self.nulls.push((
                    rel.related.model_name.clone(),
                    rel.field.column.clone(),
                    related,
                )),
                OnDelete::Protect => {
                    return Err(RelqError::IntegrityError(format!(
                        "Cannot delete some instances of model '{model}' because they are \
                         referenced through a protected foreign key: '{}.{}'",
                        rel.related.model_name, rel.field.name
                    )))
                }
                OnDelete::DoNothing => {}
            }
        }
        Ok(())
    }

    fn delete(self, db: &dyn DbExecutor) -> RelqResult<u64> {
        for (model, column, pks) in &self.nulls {
            UpdateQuery::new(Arc::clone(&self.registry), model)?.clear_related(column, pks, db)?;
        }
        let mut deleted = 0;
        for (model, pks) in self.batches.iter().rev() {
            tracing::debug!("Deleting {} rows of '{model}'", pks.len());
            let delete = DeleteQuery::new(Arc::clone(&self.registry), model)?;
            delete.delete_batch_related(pks, db)?;
            deleted += delete.delete_batch(pks, db)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registry, sqlite, RecordingExecutor};

    fn qs(model: &str) -> QuerySet {
        QuerySet::new(registry(), model).unwrap()
    }

    fn sql_of(qs: &QuerySet) -> String {
        qs.as_sql(&sqlite()).unwrap().0
    }

    struct Note {
        id: i64,
        note: String,
    }

    impl Model for Note {
        fn model_name() -> &'static str {
            "Note"
        }

        fn from_row(row: &Row) -> RelqResult<Self> {
            Ok(Self {
                id: row.get("id")?,
                note: row.get("note")?,
            })
        }
    }

    #[test]
    fn test_builders_leave_original_untouched() {
        let base = qs("Item").filter(Q::filter("name", "one")).unwrap();
        let before = sql_of(&base);
        let derived = base
            .clone()
            .filter(Q::filter("tags__name", "t1"))
            .unwrap()
            .order_by(["-name"])
            .unwrap();
        assert_eq!(sql_of(&base), before);
        assert_ne!(sql_of(&derived), before);
    }

    #[test]
    fn test_new_rejects_cyclic_default_ordering() {
        let err = QuerySet::new(registry(), "LoopX").unwrap_err();
        assert!(matches!(err, RelqError::OrderingCycle { .. }));
        assert!(qs("Tag").order_by(["parent"]).is_ok());
        assert!(qs("Tag").order_by(["nope"]).is_err());
    }

    #[test]
    fn test_exclude_negates() {
        let q = qs("Note").exclude(Q::filter("note", "n1")).unwrap();
        assert!(sql_of(&q).contains("WHERE NOT (\"queries_note\".\"note\" = ?)"));
    }

    #[test]
    fn test_exclude_empty_q_excludes_nothing() {
        let q = qs("Note").exclude(Q::empty()).unwrap();
        assert!(!sql_of(&q).contains("WHERE"));
    }

    #[test]
    fn test_filter_after_slice_fails() {
        let sliced = qs("Note").slice(Some(1), Some(3));
        assert!(sliced.clone().filter(Q::filter("note", "x")).is_err());
        let db = RecordingExecutor::new();
        assert!(sliced.delete(&db).is_err());
        assert!(sliced.update([("note", "x")], &db).is_err());
    }

    #[test]
    fn test_values_names_columns() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::from("i1"), Value::from("a1")]]);
        let rows = qs("Item")
            .values(&["name", "creator__name"])
            .unwrap()
            .fetch(&db)
            .unwrap();
        assert_eq!(rows[0].columns(), ["name", "creator__name"]);
        assert_eq!(rows[0].get::<String>("creator__name").unwrap(), "a1");
    }

    #[test]
    fn test_fetch_models() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![
            vec![Value::Int(1), Value::from("n1"), Value::from("foo")],
            vec![Value::Int(2), Value::from("n2"), Value::from("bar")],
        ]);
        let notes: Vec<Note> = qs("Note").fetch_models(&db).unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[1].id, notes[1].note.as_str()), (2, "n2"));
    }

    #[test]
    fn test_none_skips_the_database() {
        let db = RecordingExecutor::new();
        let empty = qs("Note").none();
        assert!(empty.fetch(&db).unwrap().is_empty());
        assert_eq!(empty.count(&db).unwrap(), 0);
        assert!(!empty.exists(&db).unwrap());
        assert_eq!(empty.delete(&db).unwrap(), 0);
        assert!(db.statements().is_empty());
    }

    #[test]
    fn test_or_with_none_returns_other() {
        let lhs = qs("Note").none();
        let rhs = qs("Note").filter(Q::filter("note", "n1")).unwrap();
        let combined = lhs.or(&rhs).unwrap();
        assert!(!combined.is_none());
        let both = rhs.and(&qs("Note").none()).unwrap();
        assert!(both.is_none());
    }

    #[test]
    fn test_and_or_reject_different_models() {
        assert!(qs("Note").or(&qs("Tag")).is_err());
        assert!(qs("Note").and(&qs("Tag")).is_err());
    }

    #[test]
    fn test_get_cardinality() {
        let db = RecordingExecutor::new();
        let err = qs("Note").get(Q::filter("note", "zz"), &db).unwrap_err();
        assert!(matches!(err, RelqError::DoesNotExist(_)));
        assert!(err.to_string().ends_with("Note matching query does not exist."));

        db.push_rows(vec![
            vec![Value::Int(1), Value::from("n"), Value::Null],
            vec![Value::Int(2), Value::from("n"), Value::Null],
        ]);
        let err = qs("Note").get(Q::filter("note", "n"), &db).unwrap_err();
        assert!(matches!(err, RelqError::MultipleObjectsReturned(_)));
        assert!(err.to_string().contains("it returned 2!"));
    }

    #[test]
    fn test_manager_get_maps_model() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(3), Value::from("n3"), Value::Null]]);
        let manager: Manager<Note> = Manager::new(registry()).unwrap();
        let note = manager.get(Q::filter("pk", 3), &db).unwrap();
        assert_eq!(note.note, "n3");
        let (sql, params) = &db.statements()[0];
        assert!(sql.contains("WHERE \"queries_note\".\"id\" = ?"));
        assert_eq!(params, &vec![Value::Int(3)]);
    }

    #[test]
    fn test_count_uses_limits() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(10)]]);
        assert_eq!(qs("Note").slice(Some(2), Some(5)).count(&db).unwrap(), 3);
        assert_eq!(
            db.statements()[0].0,
            "SELECT COUNT(*) FROM \"queries_note\""
        );
    }

    #[test]
    fn test_distinct_values_count_uses_derived_table() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(2)]]);
        let count = qs("Note")
            .values(&["note", "misc"])
            .unwrap()
            .distinct(true)
            .count(&db)
            .unwrap();
        assert_eq!(count, 2);
        assert!(db.statements()[0].0.starts_with("SELECT COUNT(*) FROM (SELECT DISTINCT"));
    }

    #[test]
    fn test_filter_in_subquery() {
        let tags = qs("Tag").filter(Q::filter("name__startswith", "t")).unwrap();
        let items = qs("Item").filter_in("tags", &tags).unwrap();
        let sql = sql_of(&items);
        assert!(sql.contains("IN (SELECT \"U0\".\"id\" FROM \"queries_tag\" \"U0\""));
    }

    #[test]
    fn test_delete_cascades_and_clears_m2m() {
        let db = RecordingExecutor::new();
        // Matching Note keys, then the ExtraInfo and Item rows pointing at them.
        db.push_rows(vec![vec![Value::Int(1)]]);
        db.push_rows(vec![]);
        db.push_rows(vec![vec![Value::Int(7)]]);
        let deleted = qs("Note")
            .filter(Q::filter("note", "n1"))
            .unwrap()
            .delete(&db)
            .unwrap();
        assert_eq!(deleted, 2);
        let sql: Vec<String> = db.statements().into_iter().map(|(s, _)| s).collect();
        assert!(sql[0].starts_with("SELECT \"queries_note\".\"id\" FROM \"queries_note\""));
        let deletes: Vec<&String> = sql.iter().filter(|s| s.starts_with("DELETE")).collect();
        assert_eq!(
            deletes,
            [
                "DELETE FROM \"queries_item_tags\" WHERE \"item_id\" IN (?)",
                "DELETE FROM \"queries_item\" WHERE \"id\" IN (?)",
                "DELETE FROM \"queries_note\" WHERE \"id\" IN (?)",
            ]
        );
    }

    #[test]
    fn test_delete_sets_null_on_nullable_children() {
        let mut reg = ModelRegistry::new();
        reg.register(
            crate::model::ModelMeta::new("t", "Folder")
                .field(crate::fields::FieldDef::auto("id")),
        )
        .unwrap();
        reg.register(
            crate::model::ModelMeta::new("t", "Doc")
                .field(crate::fields::FieldDef::auto("id"))
                .field(
                    crate::fields::FieldDef::foreign_key("folder", "Folder")
                        .nullable()
                        .on_delete(OnDelete::SetNull),
                ),
        )
        .unwrap();
        let reg = reg.into_shared().unwrap();
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(1)]]);
        db.push_rows(vec![vec![Value::Int(5)], vec![Value::Int(6)]]);
        QuerySet::new(reg, "Folder").unwrap().delete(&db).unwrap();
        let sql: Vec<String> = db.statements().into_iter().map(|(s, _)| s).collect();
        assert!(sql.contains(
            &"UPDATE \"t_doc\" SET \"folder_id\" = NULL WHERE \"id\" IN (?, ?)".to_string()
        ));
        assert_eq!(sql.last().unwrap(), "DELETE FROM \"t_folder\" WHERE \"id\" IN (?)");
    }

    #[test]
    fn test_delete_protected_relation_fails() {
        let mut reg = ModelRegistry::new();
        reg.register(
            crate::model::ModelMeta::new("t", "Owner").field(crate::fields::FieldDef::auto("id")),
        )
        .unwrap();
        reg.register(
            crate::model::ModelMeta::new("t", "Pet")
                .field(crate::fields::FieldDef::auto("id"))
                .field(
                    crate::fields::FieldDef::foreign_key("owner", "Owner")
                        .on_delete(OnDelete::Protect),
                ),
        )
        .unwrap();
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(1)]]);
        db.push_rows(vec![vec![Value::Int(2)]]);
        let err = QuerySet::new(reg.into_shared().unwrap(), "Owner")
            .unwrap()
            .delete(&db)
            .unwrap_err();
        assert!(matches!(err, RelqError::IntegrityError(_)));
        assert!(db.statements().iter().all(|(s, _)| !s.starts_with("DELETE")));
    }

    #[test]
    fn test_delete_child_removes_ancestor_rows_last() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(4)]]);
        qs("Restaurant").delete(&db).unwrap();
        let deletes: Vec<String> = db
            .statements()
            .into_iter()
            .map(|(s, _)| s)
            .filter(|s| s.starts_with("DELETE"))
            .collect();
        assert_eq!(
            deletes,
            [
                "DELETE FROM \"inherit_restaurant\" WHERE \"place_ptr_id\" IN (?)",
                "DELETE FROM \"inherit_place\" WHERE \"id\" IN (?)",
            ]
        );
    }

    #[test]
    fn test_create_writes_ancestors_first() {
        let db = RecordingExecutor::new();
        let id = qs("Restaurant")
            .create(
                [
                    ("name", Value::from("Demon Dogs")),
                    ("serves_pizza", Value::Bool(true)),
                ],
                &db,
            )
            .unwrap();
        assert_eq!(id, Value::Int(1));
        let statements = db.statements();
        assert_eq!(
            statements[0].0,
            "INSERT INTO \"inherit_place\" (\"name\") VALUES (?)"
        );
        assert_eq!(
            statements[1].0,
            "INSERT INTO \"inherit_restaurant\" (\"serves_pizza\", \"place_ptr_id\") VALUES (?, ?)"
        );
        assert_eq!(statements[1].1, vec![Value::Bool(true), Value::Int(1)]);
    }

    #[test]
    fn test_create_rejects_unknown_field() {
        let db = RecordingExecutor::new();
        let err = qs("Note").create([("tags", Value::Int(1))], &db).unwrap_err();
        assert_eq!(err.to_string(), "'tags' is not a concrete field of 'Note'");
    }

    #[test]
    fn test_update_returns_count() {
        let db = RecordingExecutor::new();
        let n = qs("Note")
            .filter(Q::filter("note", "n1"))
            .unwrap()
            .update([("misc", "x")], &db)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(
            db.statements()[0].0,
            "UPDATE \"queries_note\" SET \"misc\" = ? WHERE \"queries_note\".\"note\" = ?"
        );
    }

    #[test]
    fn test_dates() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![
            vec![Value::from("2005-07-01 00:00:00")],
            vec![Value::from("2005-08-01 00:00:00")],
        ]);
        let dates = qs("Article")
            .dates("pub_date", DateKind::Month, OrderDirection::Asc, &db)
            .unwrap();
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].to_string(), "2005-07-01 00:00:00");
    }
}
