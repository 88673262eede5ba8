//! Statements other than a plain SELECT.
//!
//! Each type wraps a [`Query`] for its alias map and WHERE tree and changes
//! only how the statement is rendered or executed.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use relq_core::logging::statement_span;
use relq_core::{RelqError, RelqResult};

use super::compiler::{DateKind, SqlCompiler};
use super::lookups::LookupType;
use super::query::{OrderDirection, Query, SelectColumn};
use super::where_node::{Connector, Constraint, LookupValue, WhereChild, WhereNode, WhereSql};
use crate::executor::DbExecutor;
use crate::model::ModelRegistry;
use crate::value::Value;

/// Number of primary keys handled by one batched statement.
pub const GET_ITERATOR_CHUNK_SIZE: usize = 100;

/// An unqualified `column IN (values)` node.
fn column_in(column: &str, values: &[Value]) -> WhereNode {
    let constraint = Constraint {
        alias: None,
        column: column.to_string(),
        field_type: None,
        lookup: LookupType::In,
        value: LookupValue::List(values.to_vec()),
    };
    WhereNode::with_children(Connector::And, false, vec![WhereChild::Constraint(constraint)])
}

fn push_where(
    sql: &mut String,
    node: &WhereNode,
    compiler: &SqlCompiler,
    params: &mut Vec<Value>,
) -> RelqResult<()> {
    match node.as_sql(compiler, params)? {
        WhereSql::MatchAll => {}
        WhereSql::MatchNothing => sql.push_str(" WHERE 1=0"),
        WhereSql::Sql(w) => {
            sql.push_str(" WHERE ");
            sql.push_str(&w);
        }
    }
    Ok(())
}

fn base_table(query: &Query) -> RelqResult<String> {
    query
        .joins()
        .get(query.base_alias())
        .map(|e| e.table.clone())
        .ok_or_else(|| RelqError::invalid_query("Query has no base table"))
}

// ── DELETE ───────────────────────────────────────────────────────────

/// A DELETE restricted to one table.
#[derive(Debug, Clone)]
pub struct DeleteQuery {
    query: Query,
}

impl DeleteQuery {
    /// Creates an unfiltered DELETE on `model`.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> RelqResult<Self> {
        Ok(Self {
            query: Query::new(registry, model)?,
        })
    }

    /// Turns a filtered query into a DELETE.
    pub const fn from_query(query: Query) -> Self {
        Self { query }
    }

    /// The wrapped query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Compiles the statement. Filters that need a join are rejected.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        if self.query.count_active_tables() != 1 {
            return Err(RelqError::invalid_query(
                "Can only delete from one table at a time.",
            ));
        }
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", compiler.quote_name(&base_table(&self.query)?));
        push_where(&mut sql, self.query.where_node(), compiler, &mut params)?;
        Ok((sql, params))
    }

    /// Runs the statement and returns the number of deleted rows.
    pub fn execute(&self, db: &dyn DbExecutor) -> RelqResult<u64> {
        let (sql, params) = self.as_sql(&db.compiler())?;
        db.execute_sql(&sql, &params)
    }

    fn do_query(db: &dyn DbExecutor, table: &str, where_: &WhereNode) -> RelqResult<u64> {
        let _span = statement_span("DELETE", table).entered();
        let compiler = db.compiler();
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", compiler.quote_name(table));
        push_where(&mut sql, where_, &compiler, &mut params)?;
        tracing::debug!("Batch delete: {sql}");
        db.execute_sql(&sql, &params)
    }

    /// Removes every many-to-many row referencing the given keys, on either
    /// side of the relation.
    pub fn delete_batch_related(&self, pk_list: &[Value], db: &dyn DbExecutor) -> RelqResult<()> {
        let registry = Arc::clone(self.query.registry());
        for (m2m, column) in registry.m2m_tables_for(self.query.model())? {
            for chunk in pk_list.chunks(GET_ITERATOR_CHUNK_SIZE) {
                Self::do_query(db, &m2m.table, &column_in(&column, chunk))?;
            }
        }
        Ok(())
    }

    /// Deletes the rows with the given keys, in chunks.
    pub fn delete_batch(&self, pk_list: &[Value], db: &dyn DbExecutor) -> RelqResult<u64> {
        let table = self.query.get_meta()?.db_table.clone();
        let pk = self.query.pk_column()?;
        let mut deleted = 0;
        for chunk in pk_list.chunks(GET_ITERATOR_CHUNK_SIZE) {
            deleted += Self::do_query(db, &table, &column_in(&pk, chunk))?;
        }
        Ok(deleted)
    }
}

// ── UPDATE ───────────────────────────────────────────────────────────

/// An UPDATE of one table, with coalesced updates of ancestor tables.
#[derive(Debug, Clone)]
pub struct UpdateQuery {
    query: Query,
    values: Vec<(String, Value)>,
    related_updates: BTreeMap<String, Vec<(String, Value)>>,
    related_ids: Option<Vec<Value>>,
}

impl UpdateQuery {
    /// Creates an unfiltered UPDATE on `model`.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> RelqResult<Self> {
        Ok(Self::from_query(Query::new(registry, model)?))
    }

    /// Turns a filtered query into an UPDATE.
    pub fn from_query(mut query: Query) -> Self {
        query.clear_ordering(true);
        Self {
            query,
            values: Vec::new(),
            related_updates: BTreeMap::new(),
            related_ids: None,
        }
    }

    /// The wrapped query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Column assignments for the base table.
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    /// Keys captured by [`pre_sql_setup`](Self::pre_sql_setup), if any.
    pub fn related_ids(&self) -> Option<&[Value]> {
        self.related_ids.as_deref()
    }

    /// Adds `field = value` assignments. Fields of an ancestor model are
    /// routed to an update of that model's table.
    pub fn add_update_values<I, K, V>(&mut self, values: I) -> RelqResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let registry = Arc::clone(self.query.registry());
        let model = self.query.model().to_string();
        let meta = registry.get(&model)?;
        for (name, value) in values {
            let name = match name.as_ref() {
                "pk" => registry.pk(&model)?.name.clone(),
                other => other.to_string(),
            };
            let found = registry
                .lineage(meta)?
                .into_iter()
                .find_map(|owner| owner.local_field(&name).map(|f| (owner, f)));
            match found {
                Some((_, field)) if field.is_many_to_many() => {
                    return Err(cannot_update(&name));
                }
                Some((owner, field)) if owner.model_name == model => {
                    self.values.push((field.column.clone(), value.into()));
                }
                Some((owner, field)) => {
                    self.add_related_update(&owner.model_name, &field.column, value.into());
                }
                None => {
                    // Unknown names get the usual resolution error; anything
                    // that does resolve is a reverse relation.
                    registry.resolve_name(&model, &name)?;
                    return Err(cannot_update(&name));
                }
            }
        }
        Ok(())
    }

    /// Queues `column = value` for the table of ancestor `model`.
    pub fn add_related_update(&mut self, model: &str, column: &str, value: Value) {
        self.related_updates
            .entry(model.to_string())
            .or_default()
            .push((column.to_string(), value));
    }

    /// One UPDATE per ancestor table, restricted to the captured keys.
    pub fn get_related_updates(&self) -> RelqResult<Vec<Self>> {
        let mut out = Vec::with_capacity(self.related_updates.len());
        for (model, values) in &self.related_updates {
            let mut query = Self::new(Arc::clone(self.query.registry()), model)?;
            query.values.clone_from(values);
            if let Some(ids) = &self.related_ids {
                query.query.filter("pk__in", Value::List(ids.clone()))?;
            }
            out.push(query);
        }
        Ok(out)
    }

    /// Sets `column` to NULL on the rows with the given keys, in chunks.
    pub fn clear_related(
        &mut self,
        column: &str,
        pk_list: &[Value],
        db: &dyn DbExecutor,
    ) -> RelqResult<u64> {
        let pk = self.query.pk_column()?;
        let mut updated = 0;
        for chunk in pk_list.chunks(GET_ITERATOR_CHUNK_SIZE) {
            self.query.where_ = column_in(&pk, chunk);
            self.values = vec![(column.to_string(), Value::Null)];
            updated += self.execute(db)?;
        }
        Ok(updated)
    }

    /// Rewrites a filter that spans several tables into a single-table one.
    ///
    /// With ancestor updates pending, or on a backend that cannot update
    /// from a subquery over the same table, the matching keys are selected
    /// once and every statement filters on that list. Otherwise the keys
    /// are matched through an embedded subquery.
    pub fn pre_sql_setup(&mut self, db: &dyn DbExecutor) -> RelqResult<()> {
        self.query.clear_ordering(true);
        if self.related_updates.is_empty() {
            if self.query.count_active_tables() <= 1 {
                return Ok(());
            }
            if db.compiler().update_can_self_select() {
                return self.embed_pk_subquery();
            }
        }
        let mut select = self.query.clone();
        select.clear_limits();
        select.select = vec![SelectColumn::column(select.base_alias(), select.pk_column()?)];
        let ids: Vec<Value> = select
            .execute_sql(db)?
            .into_iter()
            .filter_map(|row| row.into_values().into_iter().next())
            .collect();
        tracing::debug!(
            "Captured {} keys of '{}' to update",
            ids.len(),
            self.query.model()
        );
        let mut fresh = Query::new(Arc::clone(self.query.registry()), self.query.model())?;
        fresh.clear_ordering(true);
        fresh.filter("pk__in", Value::List(ids.clone()))?;
        self.query = fresh;
        self.related_ids = Some(ids);
        Ok(())
    }

    fn embed_pk_subquery(&mut self) -> RelqResult<()> {
        if self.query.count_active_tables() <= 1 {
            return Ok(());
        }
        let mut inner = self.query.clone();
        inner.clear_limits();
        inner.clear_select();
        let mut fresh = Query::new(Arc::clone(self.query.registry()), self.query.model())?;
        fresh.clear_ordering(true);
        fresh.add_subquery_filter("pk", inner)?;
        self.query = fresh;
        Ok(())
    }

    /// Compiles the UPDATE of the base table. An update with nothing to set
    /// compiles to an empty statement.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        if self.values.is_empty() {
            return Ok((String::new(), Vec::new()));
        }
        if self.query.count_active_tables() > 1 && !compiler.update_can_self_select() {
            return Err(RelqError::invalid_query(format!(
                "An UPDATE of '{}' across joins needs its keys selected first on {}",
                self.query.model(),
                compiler.backend().vendor()
            )));
        }
        let mut this = self.clone();
        this.embed_pk_subquery()?;

        let mut params = Vec::new();
        let mut assignments = Vec::with_capacity(this.values.len());
        for (column, value) in &this.values {
            let column = compiler.quote_name(column);
            if value.is_null() {
                assignments.push(format!("{column} = NULL"));
            } else {
                let mark = compiler.placeholder(&mut params, value.clone());
                assignments.push(format!("{column} = {mark}"));
            }
        }
        let mut sql = format!(
            "UPDATE {} SET {}",
            compiler.quote_name(&base_table(&this.query)?),
            assignments.join(", ")
        );
        push_where(&mut sql, this.query.where_node(), compiler, &mut params)?;
        Ok((sql, params))
    }

    /// Runs the update and every ancestor update. Returns the rows changed
    /// in the base table, or in the first ancestor table when only ancestor
    /// fields were set.
    pub fn execute(&mut self, db: &dyn DbExecutor) -> RelqResult<u64> {
        let table = self.query.get_meta()?.db_table.clone();
        let _span = statement_span("UPDATE", &table).entered();
        self.pre_sql_setup(db)?;
        if self.related_ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok(0);
        }
        let (sql, params) = self.as_sql(&db.compiler())?;
        let mut rows = None;
        if !sql.is_empty() {
            tracing::debug!("Update: {sql}");
            rows = Some(db.execute_sql(&sql, &params)?);
        }
        for mut related in self.get_related_updates()? {
            let n = related.execute(db)?;
            rows.get_or_insert(n);
        }
        Ok(rows.unwrap_or(0))
    }
}

fn cannot_update(name: &str) -> RelqError {
    RelqError::field(format!(
        "Cannot update model field '{name}' (only non-relations and foreign keys permitted)."
    ))
}

// ── INSERT ───────────────────────────────────────────────────────────

/// A value in an INSERT: bound as a parameter, or written into the SQL as is.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A bound parameter.
    Param(Value),
    /// Literal SQL such as `DEFAULT` or `NULL`.
    Raw(String),
}

impl From<Value> for InsertValue {
    fn from(value: Value) -> Self {
        Self::Param(value)
    }
}

/// A single-row INSERT.
#[derive(Debug, Clone)]
pub struct InsertQuery {
    registry: Arc<ModelRegistry>,
    model: String,
    table: String,
    columns: Vec<String>,
    values: Vec<InsertValue>,
}

impl InsertQuery {
    /// Creates an INSERT into the table of `model`.
    pub fn new(registry: Arc<ModelRegistry>, model: &str) -> RelqResult<Self> {
        let table = registry.get(model)?.db_table.clone();
        Ok(Self {
            registry,
            model: model.to_string(),
            table,
            columns: Vec::new(),
            values: Vec::new(),
        })
    }

    /// The target columns, in order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Adds values by field name. `pk` names the primary key. Only fields
    /// stored in this model's own table are accepted.
    pub fn insert_values<I, K>(&mut self, values: I) -> RelqResult<()>
    where
        I: IntoIterator<Item = (K, InsertValue)>,
        K: AsRef<str>,
    {
        let meta = self.registry.get(&self.model)?;
        for (name, value) in values {
            let name = match name.as_ref() {
                "pk" => self.registry.pk(&self.model)?.name.clone(),
                other => other.to_string(),
            };
            let field = meta
                .local_field(&name)
                .filter(|f| f.is_concrete())
                .ok_or_else(|| {
                    let choices: Vec<&str> = meta
                        .fields
                        .iter()
                        .filter(|f| f.is_concrete())
                        .map(|f| f.name.as_str())
                        .collect();
                    RelqError::field(format!(
                        "Cannot insert into '{name}' on '{}'. Choices are: {}",
                        self.model,
                        choices.join(", ")
                    ))
                })?;
            self.columns.push(field.column.clone());
            self.values.push(value);
        }
        Ok(())
    }

    /// Compiles the statement. A row with no values inserts the dialect's
    /// default primary-key marker.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        let (columns, values) = if self.columns.is_empty() {
            let pk = self.registry.pk(&self.model)?.column.clone();
            (
                vec![pk],
                vec![InsertValue::Raw(compiler.pk_default_value().to_string())],
            )
        } else {
            (self.columns.clone(), self.values.clone())
        };
        let mut params = Vec::new();
        let marks: Vec<String> = values
            .into_iter()
            .map(|v| match v {
                InsertValue::Param(value) => compiler.placeholder(&mut params, value),
                InsertValue::Raw(sql) => sql,
            })
            .collect();
        let columns: Vec<String> = columns.iter().map(|c| compiler.quote_name(c)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            compiler.quote_name(&self.table),
            columns.join(", "),
            marks.join(", ")
        );
        Ok((sql, params))
    }

    /// Runs the INSERT and returns the new row's id.
    pub fn execute_sql(&self, db: &dyn DbExecutor) -> RelqResult<Value> {
        let _span = statement_span("INSERT", &self.table).entered();
        let (sql, params) = self.as_sql(&db.compiler())?;
        tracing::debug!("Insert: {sql}");
        db.insert_returning_id(&sql, &params)
    }
}

// ── DATES ────────────────────────────────────────────────────────────

/// Selects the distinct truncated values of one date column.
#[derive(Debug, Clone)]
pub struct DateQuery {
    query: Query,
}

impl DateQuery {
    /// Wraps a filtered query.
    pub const fn from_query(query: Query) -> Self {
        Self { query }
    }

    /// The wrapped query.
    pub const fn query(&self) -> &Query {
        &self.query
    }

    /// Selects `field` truncated to `kind`, distinct and ordered.
    pub fn add_date_select(
        &mut self,
        field: &str,
        kind: DateKind,
        order: OrderDirection,
    ) -> RelqResult<()> {
        let (alias, column, def) = self.query.setup_column(field)?;
        if !def.field_type.is_date() {
            return Err(RelqError::field(format!(
                "'{field}' isn't a DateField or DateTimeField."
            )));
        }
        self.query.select = vec![SelectColumn::Date {
            alias,
            column,
            kind,
        }];
        self.query.distinct = true;
        self.query.clear_ordering(true);
        self.query.order_by = vec![match order {
            OrderDirection::Asc => "1".to_string(),
            OrderDirection::Desc => "-1".to_string(),
        }];
        if def.null {
            self.query.filter(&format!("{field}__isnull"), false)?;
        }
        Ok(())
    }

    /// Compiles the statement.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        self.query.as_sql(compiler)
    }

    /// Runs the query and returns the dates. Backends that truncate dates
    /// to text have their results parsed.
    pub fn results(&self, db: &dyn DbExecutor) -> RelqResult<Vec<NaiveDateTime>> {
        let parse_text = db.compiler().needs_datetime_string_cast();
        let mut out = Vec::new();
        for row in self.query.results_iter(db)? {
            let Some(value) = row.values().first() else {
                continue;
            };
            if let Some(date) = parse_datetime(value, parse_text)? {
                out.push(date);
            }
        }
        Ok(out)
    }
}

/// Reads a truncated date returned by the database. Text is accepted only
/// when `parse_text` is set.
fn parse_datetime(value: &Value, parse_text: bool) -> RelqResult<Option<NaiveDateTime>> {
    match value {
        Value::Null => Ok(None),
        Value::DateTime(dt) => Ok(Some(*dt)),
        Value::DateTimeTz(dt) => Ok(Some(dt.naive_utc())),
        Value::Date(d) => Ok(d.and_hms_opt(0, 0, 0)),
        Value::String(s) if parse_text => {
            let s = s.trim();
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .map(Some)
                .or_else(|_| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d").map(|d| d.and_hms_opt(0, 0, 0))
                })
                .map_err(|e| RelqError::DatabaseError(format!("Invalid date '{s}': {e}")))
        }
        other => Err(RelqError::DatabaseError(format!(
            "Expected a date, got {other:?}"
        ))),
    }
}

// ── COUNT ────────────────────────────────────────────────────────────

/// Counts the rows of any query by selecting from it as a derived table.
#[derive(Debug, Clone)]
pub struct CountQuery {
    inner: Query,
}

impl CountQuery {
    /// Wraps `inner`; its ordering is dropped.
    pub fn new(mut inner: Query) -> Self {
        inner.clear_ordering(true);
        Self { inner }
    }

    /// Compiles `SELECT COUNT(*) FROM (inner) A1`.
    pub fn as_sql(&self, compiler: &SqlCompiler) -> RelqResult<(String, Vec<Value>)> {
        let (inner, params) = self.inner.as_sql(compiler)?;
        Ok((format!("SELECT COUNT(*) FROM ({inner}) A1"), params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compiler::DatabaseBackendType;
    use crate::testing::{registry, sqlite, RecordingExecutor};

    fn query(model: &str) -> Query {
        Query::new(registry(), model).unwrap()
    }

    #[test]
    fn test_delete_single_table() {
        let mut q = query("Note");
        q.filter("note", "n1").unwrap();
        let (sql, params) = DeleteQuery::from_query(q).as_sql(&sqlite()).unwrap();
        assert_eq!(sql, "DELETE FROM \"queries_note\" WHERE \"queries_note\".\"note\" = ?");
        assert_eq!(params, vec![Value::from("n1")]);
    }

    #[test]
    fn test_delete_with_join_is_rejected() {
        let mut q = query("Item");
        q.filter("creator__name", "a1").unwrap();
        let err = DeleteQuery::from_query(q).as_sql(&sqlite()).unwrap_err();
        assert_eq!(err.to_string(), "Invalid query: Can only delete from one table at a time.");
    }

    #[test]
    fn test_delete_batch_chunks_keys() {
        let db = RecordingExecutor::new();
        let pks: Vec<Value> = (1..=250).map(Value::Int).collect();
        let delete = DeleteQuery::new(registry(), "Note").unwrap();
        delete.delete_batch(&pks, &db).unwrap();
        let statements = db.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].0.starts_with("DELETE FROM \"queries_note\" WHERE \"id\" IN (?"));
        assert_eq!(statements[0].1.len(), 100);
        assert_eq!(statements[2].1.len(), 50);
    }

    #[test]
    fn test_delete_batch_related_clears_both_sides() {
        let db = RecordingExecutor::new();
        DeleteQuery::new(registry(), "Tag")
            .unwrap()
            .delete_batch_related(&[Value::Int(1)], &db)
            .unwrap();
        let sql: Vec<String> = db.statements().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sql, ["DELETE FROM \"queries_item_tags\" WHERE \"tag_id\" IN (?)"]);
    }

    #[test]
    fn test_update_simple() {
        let mut update = UpdateQuery::from_query(query("Note"));
        update.add_update_values([("note", Value::from("x")), ("misc", Value::Null)]).unwrap();
        let (sql, params) = update.as_sql(&sqlite()).unwrap();
        assert_eq!(sql, "UPDATE \"queries_note\" SET \"note\" = ?, \"misc\" = NULL");
        assert_eq!(params, vec![Value::from("x")]);
    }

    #[test]
    fn test_update_without_values_is_empty() {
        let update = UpdateQuery::from_query(query("Note"));
        assert_eq!(update.as_sql(&sqlite()).unwrap(), (String::new(), Vec::new()));
    }

    #[test]
    fn test_update_rejects_m2m_and_reverse() {
        let mut update = UpdateQuery::from_query(query("Item"));
        let err = update.add_update_values([("tags", Value::Int(1))]).unwrap_err();
        assert!(err.to_string().starts_with("Cannot update model field 'tags'"));
        let mut update = UpdateQuery::from_query(query("Author"));
        assert!(update.add_update_values([("ranking", Value::Int(1))]).is_err());
        let err = update.add_update_values([("nope", Value::Int(1))]).unwrap_err();
        assert!(err.to_string().starts_with("Cannot resolve keyword 'nope'"));
    }

    #[test]
    fn test_update_across_join_uses_subselect() {
        let mut q = query("Item");
        q.filter("creator__name", "a1").unwrap();
        let mut update = UpdateQuery::from_query(q);
        update.add_update_values([("name", "renamed")]).unwrap();
        let (sql, params) = update.as_sql(&sqlite()).unwrap();
        assert_eq!(
            sql,
            "UPDATE \"queries_item\" SET \"name\" = ? WHERE \"queries_item\".\"id\" IN \
             (SELECT \"U0\".\"id\" FROM \"queries_item\" \"U0\" INNER JOIN \"queries_author\" \"U1\" \
             ON (\"U0\".\"creator_id\" = \"U1\".\"id\") WHERE \"U1\".\"name\" = ?)"
        );
        assert_eq!(params, vec![Value::from("renamed"), Value::from("a1")]);
    }

    #[test]
    fn test_mysql_update_across_join_selects_keys_first() {
        let db = RecordingExecutor::with_backend(DatabaseBackendType::MySQL);
        db.push_rows(vec![vec![Value::Int(2)], vec![Value::Int(5)]]);
        let mut q = query("Item");
        q.filter("creator__name", "a1").unwrap();
        let mut update = UpdateQuery::from_query(q);
        update.add_update_values([("name", "renamed")]).unwrap();
        assert_eq!(update.execute(&db).unwrap(), 1);

        let statements = db.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].0.starts_with("SELECT `queries_item`.`id` FROM `queries_item`"));
        assert!(statements[0].0.contains("INNER JOIN `queries_author`"));
        assert_eq!(
            statements[1].0,
            "UPDATE `queries_item` SET `name` = ? WHERE `queries_item`.`id` IN (?, ?)"
        );
        assert_eq!(
            statements[1].1,
            vec![Value::from("renamed"), Value::Int(2), Value::Int(5)]
        );
    }

    #[test]
    fn test_mysql_update_with_no_matching_keys_runs_no_update() {
        let db = RecordingExecutor::with_backend(DatabaseBackendType::MySQL);
        let mut q = query("Item");
        q.filter("creator__name", "nobody").unwrap();
        let mut update = UpdateQuery::from_query(q);
        update.add_update_values([("name", "renamed")]).unwrap();
        assert_eq!(update.execute(&db).unwrap(), 0);
        assert_eq!(db.statements().len(), 1);
    }

    #[test]
    fn test_mysql_update_across_join_cannot_compile_directly() {
        let mut q = query("Item");
        q.filter("creator__name", "a1").unwrap();
        let mut update = UpdateQuery::from_query(q);
        update.add_update_values([("name", "renamed")]).unwrap();
        let err = update
            .as_sql(&SqlCompiler::new(DatabaseBackendType::MySQL))
            .unwrap_err();
        assert_eq!(err.kind(), relq_core::ErrorKind::Structural);
    }

    #[test]
    fn test_update_of_ancestor_field_captures_ids() {
        let db = RecordingExecutor::new();
        db.push_rows(vec![vec![Value::Int(4)], vec![Value::Int(9)]]);
        let mut q = query("Restaurant");
        q.filter("serves_pizza", true).unwrap();
        let mut update = UpdateQuery::from_query(q);
        update
            .add_update_values([("name", Value::from("Pizza Place")), ("serves_pizza", Value::Bool(false))])
            .unwrap();
        update.execute(&db).unwrap();
        assert_eq!(update.related_ids(), Some(&[Value::Int(4), Value::Int(9)][..]));
        let sql: Vec<String> = db.statements().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sql.len(), 3);
        assert!(sql[0].starts_with("SELECT \"inherit_restaurant\".\"place_ptr_id\" FROM"));
        assert_eq!(
            sql[1],
            "UPDATE \"inherit_restaurant\" SET \"serves_pizza\" = ? \
             WHERE \"inherit_restaurant\".\"place_ptr_id\" IN (?, ?)"
        );
        assert_eq!(
            sql[2],
            "UPDATE \"inherit_place\" SET \"name\" = ? WHERE \"inherit_place\".\"id\" IN (?, ?)"
        );
    }

    #[test]
    fn test_clear_related_sets_null() {
        let db = RecordingExecutor::new();
        let mut update = UpdateQuery::new(registry(), "Tag").unwrap();
        update.clear_related("parent_id", &[Value::Int(3)], &db).unwrap();
        assert_eq!(
            db.statements()[0].0,
            "UPDATE \"queries_tag\" SET \"parent_id\" = NULL WHERE \"id\" IN (?)"
        );
    }

    #[test]
    fn test_insert_params_and_raw() {
        let mut insert = InsertQuery::new(registry(), "Note").unwrap();
        insert
            .insert_values([
                ("pk", InsertValue::Raw("DEFAULT".into())),
                ("note", Value::from("n1").into()),
            ])
            .unwrap();
        let (sql, params) = insert.as_sql(&sqlite()).unwrap();
        assert_eq!(sql, "INSERT INTO \"queries_note\" (\"id\", \"note\") VALUES (DEFAULT, ?)");
        assert_eq!(params, vec![Value::from("n1")]);
    }

    #[test]
    fn test_insert_without_values_uses_default_marker() {
        let insert = InsertQuery::new(registry(), "LoopZ").unwrap();
        let (sql, params) = insert.as_sql(&sqlite()).unwrap();
        assert_eq!(sql, "INSERT INTO \"queries_loopz\" (\"id\") VALUES (NULL)");
        assert!(params.is_empty());
    }

    #[test]
    fn test_insert_rejects_unknown_field() {
        let mut insert = InsertQuery::new(registry(), "Note").unwrap();
        assert!(insert
            .insert_values([("tags", InsertValue::Param(Value::Int(1)))])
            .is_err());
    }

    #[test]
    fn test_date_select() {
        let mut dates = DateQuery::from_query(query("Article"));
        dates
            .add_date_select("pub_date", DateKind::Month, OrderDirection::Desc)
            .unwrap();
        let (sql, _) = dates.as_sql(&sqlite()).unwrap();
        assert!(sql.starts_with("SELECT DISTINCT strftime("));
        assert!(sql.ends_with("ORDER BY 1 DESC"));
    }

    #[test]
    fn test_date_select_requires_date_field() {
        let mut dates = DateQuery::from_query(query("Article"));
        let err = dates
            .add_date_select("headline", DateKind::Year, OrderDirection::Asc)
            .unwrap_err();
        assert_eq!(err.to_string(), "'headline' isn't a DateField or DateTimeField.");
    }

    #[test]
    fn test_parse_datetime_from_text() {
        let parsed = parse_datetime(&Value::from("2005-07-01 00:00:00"), true).unwrap();
        assert_eq!(parsed.map(|d| d.to_string()), Some("2005-07-01 00:00:00".to_string()));
        let parsed = parse_datetime(&Value::from("2005-07-01"), true).unwrap();
        assert!(parsed.is_some());
        assert_eq!(parse_datetime(&Value::Null, true).unwrap(), None);
    }

    #[test]
    fn test_date_results_parse_text_only_where_backend_returns_text() {
        let day = NaiveDate::from_ymd_opt(2005, 7, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        let mut dates = DateQuery::from_query(query("Article"));
        dates
            .add_date_select("pub_date", DateKind::Day, OrderDirection::Asc)
            .unwrap();

        let sqlite_db = RecordingExecutor::new();
        sqlite_db.push_rows(vec![vec![Value::from("2005-07-01 00:00:00")]]);
        assert_eq!(dates.results(&sqlite_db).unwrap(), vec![day]);

        let pg_db = RecordingExecutor::with_backend(DatabaseBackendType::PostgreSQL);
        pg_db.push_rows(vec![vec![Value::DateTime(day)]]);
        assert_eq!(dates.results(&pg_db).unwrap(), vec![day]);

        let pg_db = RecordingExecutor::with_backend(DatabaseBackendType::PostgreSQL);
        pg_db.push_rows(vec![vec![Value::from("2005-07-01 00:00:00")]]);
        assert!(dates.results(&pg_db).is_err());
    }

    #[test]
    fn test_count_query_wraps_inner() {
        let mut inner = query("Note");
        inner.add_fields(&["note", "misc"]).unwrap();
        inner.set_distinct(true);
        let (sql, _) = CountQuery::new(inner).as_sql(&sqlite()).unwrap();
        assert_eq!(
            sql,
            "SELECT COUNT(*) FROM (SELECT DISTINCT \"queries_note\".\"note\", \
             \"queries_note\".\"misc\" FROM \"queries_note\") A1"
        );
    }
}
