//! Model metadata and the schema context.
//!
//! [`ModelMeta`] describes one table: its fields, default ordering, and
//! (through a parent-link field) its inheritance parent. [`ModelRegistry`]
//! holds every model a query may touch and answers the name-resolution
//! questions the join machinery asks: what does `reporter` mean on
//! `Article`, which table sits behind `tags`, who points back at `Author`.
//!
//! There is no global registry. A registry is built once, validated, wrapped
//! in an [`Arc`](std::sync::Arc) and handed to every query.

use std::collections::BTreeMap;
use std::sync::Arc;

use relq_core::{RelqError, RelqResult};

use crate::executor::Row;
use crate::fields::{FieldDef, FieldType};

/// Separator between the parts of a lookup keyword.
pub const LOOKUP_SEP: &str = "__";

/// A Rust type that can be built from a result row of a registered model.
///
/// # Examples
///
/// ```
/// use relq_db::executor::Row;
/// use relq_db::model::Model;
/// use relq_db::value::Value;
/// use relq_core::RelqResult;
///
/// struct Reporter {
///     id: i64,
///     first_name: String,
/// }
///
/// impl Model for Reporter {
///     fn model_name() -> &'static str {
///         "Reporter"
///     }
///
///     fn from_row(row: &Row) -> RelqResult<Self> {
///         Ok(Self {
///             id: row.get("id")?,
///             first_name: row.get("first_name")?,
///         })
///     }
/// }
///
/// let row = Row::new(
///     vec!["id".into(), "first_name".into()],
///     vec![Value::Int(1), Value::from("John")],
/// );
/// let r = Reporter::from_row(&row).unwrap();
/// assert_eq!((r.id, r.first_name.as_str()), (1, "John"));
/// ```
pub trait Model: Sized {
    /// The name the model is registered under.
    fn model_name() -> &'static str;

    /// Constructs an instance from a database row.
    fn from_row(row: &Row) -> RelqResult<Self>;
}

/// Table-level metadata for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMeta {
    /// The application label, used to derive the default table name.
    pub app_label: String,
    /// The registry key, e.g. `"Article"`.
    pub model_name: String,
    /// The database table name.
    pub db_table: String,
    /// Fields declared on this model (not its ancestors).
    pub fields: Vec<FieldDef>,
    /// Default ordering terms, e.g. `["-pub_date", "headline"]`.
    pub ordering: Vec<String>,
}

impl ModelMeta {
    /// Creates metadata with the table name `<app_label>_<model name lowercased>`.
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        let app_label = app_label.into();
        let model_name = model_name.into();
        Self {
            db_table: format!("{app_label}_{}", model_name.to_lowercase()),
            app_label,
            model_name,
            fields: Vec::new(),
            ordering: Vec::new(),
        }
    }

    /// Overrides the table name.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        self.db_table = table.into();
        self
    }

    /// Appends a field.
    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets the default ordering.
    #[must_use]
    pub fn ordering<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ordering = terms.into_iter().map(Into::into).collect();
        self
    }

    /// The primary key field declared on this model.
    pub fn pk(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.primary_key)
    }

    /// A field declared on this model, by name.
    pub fn local_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The parent-link field, for models using multi-table inheritance.
    pub fn parent_link(&self) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.is_parent_link())
    }

    /// Lowercased model name, used for default reverse names and M2M columns.
    pub fn lower_name(&self) -> String {
        self.model_name.to_lowercase()
    }
}

/// Table and columns of a many-to-many intermediate table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToManyTable {
    /// The intermediate table.
    pub table: String,
    /// Column pointing at the model that declares the field.
    pub source_column: String,
    /// Column pointing at the related model.
    pub target_column: String,
}

/// One table hop needed to reach a name from the current model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathHop {
    /// The table joined by this hop.
    pub table: String,
    /// Column on the left-hand (already joined) side.
    pub lhs_col: String,
    /// Column on the joined table.
    pub rhs_col: String,
    /// Whether rows on the right may be missing for a given left row.
    pub nullable: bool,
    /// Whether one left row may match many right rows.
    pub multi: bool,
}

/// The result of resolving one name of a lookup path.
#[derive(Debug, Clone)]
pub struct NameStep {
    /// Joins needed to reach the target, in order.
    pub hops: Vec<PathHop>,
    /// The field the name refers to.
    pub field: FieldDef,
    /// The field whose column is compared (a relation's target key).
    pub target: FieldDef,
    /// The model that owns `target`.
    pub model: String,
    /// Whether the name is a relation that can be traversed further.
    pub is_relation: bool,
}

impl NameStep {
    /// Whether any hop may multiply rows.
    pub fn is_multi(&self) -> bool {
        self.hops.iter().any(|h| h.multi)
    }
}

/// A foreign key or one-to-one field on another model pointing at a model.
#[derive(Debug, Clone)]
pub struct ReverseRelation<'a> {
    /// The model declaring the field.
    pub related: &'a ModelMeta,
    /// The pointing field.
    pub field: &'a FieldDef,
}

/// The explicit schema context: every model a query may touch.
///
/// # Examples
///
/// ```
/// use relq_db::fields::{FieldDef, FieldType};
/// use relq_db::model::{ModelMeta, ModelRegistry};
///
/// let mut registry = ModelRegistry::new();
/// registry
///     .register(
///         ModelMeta::new("many_to_one", "Reporter")
///             .field(FieldDef::auto("id"))
///             .field(FieldDef::new("first_name", FieldType::CharField)),
///     )
///     .unwrap();
/// registry
///     .register(
///         ModelMeta::new("many_to_one", "Article")
///             .field(FieldDef::auto("id"))
///             .field(FieldDef::foreign_key("reporter", "Reporter")),
///     )
///     .unwrap();
/// let registry = registry.into_shared().unwrap();
/// assert_eq!(registry.get("Article").unwrap().db_table, "many_to_one_article");
/// ```
#[derive(Debug, Default, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<String, ModelMeta>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a model. Names must be unique.
    pub fn register(&mut self, meta: ModelMeta) -> RelqResult<()> {
        if self.models.contains_key(&meta.model_name) {
            return Err(RelqError::ImproperlyConfigured(format!(
                "Model '{}' is already registered",
                meta.model_name
            )));
        }
        self.models.insert(meta.model_name.clone(), meta);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with_model(mut self, meta: ModelMeta) -> RelqResult<Self> {
        self.register(meta)?;
        Ok(self)
    }

    /// Validates the registry and wraps it for sharing between queries.
    pub fn into_shared(self) -> RelqResult<Arc<Self>> {
        self.validate()?;
        Ok(Arc::new(self))
    }

    /// Checks that every model has one primary key and every relation target
    /// (and `to_field`) exists.
    pub fn validate(&self) -> RelqResult<()> {
        for meta in self.models.values() {
            let pks = meta.fields.iter().filter(|f| f.primary_key).count();
            if pks != 1 {
                return Err(RelqError::ImproperlyConfigured(format!(
                    "Model '{}' must declare exactly one primary key, found {pks}",
                    meta.model_name
                )));
            }
            if meta.fields.iter().filter(|f| f.is_parent_link()).count() > 1 {
                return Err(RelqError::ImproperlyConfigured(format!(
                    "Model '{}' has more than one parent link",
                    meta.model_name
                )));
            }
            for field in meta.fields.iter().filter(|f| f.is_relation()) {
                let target = self.related_meta(meta, field)?;
                if let Some(name) = field.target_field_name() {
                    if target.local_field(name).is_none() {
                        return Err(RelqError::ImproperlyConfigured(format!(
                            "'{}.{}' targets unknown field '{}.{name}'",
                            meta.model_name, field.name, target.model_name
                        )));
                    }
                }
            }
        }
        self.check_inheritance_cycles()
    }

    fn check_inheritance_cycles(&self) -> RelqResult<()> {
        for meta in self.models.values() {
            let mut current = meta;
            let mut depth = 0;
            while let Some((_, parent)) = self.parent_of(current)? {
                depth += 1;
                if depth > self.models.len() {
                    return Err(RelqError::ImproperlyConfigured(format!(
                        "Inheritance cycle through model '{}'",
                        meta.model_name
                    )));
                }
                current = parent;
            }
        }
        Ok(())
    }

    /// Looks up a model by name.
    pub fn get(&self, model: &str) -> RelqResult<&ModelMeta> {
        self.models.get(model).ok_or_else(|| {
            RelqError::ImproperlyConfigured(format!("Model '{model}' is not registered"))
        })
    }

    /// Iterates over all registered models in name order.
    pub fn models(&self) -> impl Iterator<Item = &ModelMeta> {
        self.models.values()
    }

    /// The model a relation field points to, resolving `"self"`.
    pub fn related_meta(&self, owner: &ModelMeta, field: &FieldDef) -> RelqResult<&ModelMeta> {
        match field.related_model() {
            Some("self") => Ok(self.get(&owner.model_name)?),
            Some(name) => self.get(name),
            None => Err(RelqError::field(format!(
                "Field '{}' on '{}' is not a relation",
                field.name, owner.model_name
            ))),
        }
    }

    /// The primary key of a model.
    pub fn pk(&self, model: &str) -> RelqResult<&FieldDef> {
        let meta = self.get(model)?;
        meta.pk().ok_or_else(|| {
            RelqError::ImproperlyConfigured(format!("Model '{model}' has no primary key"))
        })
    }

    /// The field a foreign key compares against on its target.
    pub fn relation_target<'a>(
        &'a self,
        owner: &ModelMeta,
        field: &FieldDef,
    ) -> RelqResult<(&'a ModelMeta, &'a FieldDef)> {
        let target = self.related_meta(owner, field)?;
        let key = match field.target_field_name() {
            Some(name) => target.local_field(name),
            None => target.pk(),
        }
        .ok_or_else(|| {
            RelqError::ImproperlyConfigured(format!(
                "Cannot find the target field of '{}.{}'",
                owner.model_name, field.name
            ))
        })?;
        Ok((target, key))
    }

    /// The parent link and parent model, if `meta` inherits from another model.
    pub fn parent_of<'a>(
        &'a self,
        meta: &'a ModelMeta,
    ) -> RelqResult<Option<(&'a FieldDef, &'a ModelMeta)>> {
        match meta.parent_link() {
            Some(link) => Ok(Some((link, self.related_meta(meta, link)?))),
            None => Ok(None),
        }
    }

    /// `meta` followed by its ancestors, nearest first.
    pub fn lineage<'a>(&'a self, meta: &'a ModelMeta) -> RelqResult<Vec<&'a ModelMeta>> {
        let mut chain = vec![meta];
        let mut current = meta;
        while let Some((_, parent)) = self.parent_of(current)? {
            if chain.iter().any(|m| m.model_name == parent.model_name) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        Ok(chain)
    }

    /// Concrete fields visible on a model, ancestors' fields first, each with
    /// the model that stores it.
    pub fn concrete_fields_with_model<'a>(
        &'a self,
        model: &str,
    ) -> RelqResult<Vec<(&'a ModelMeta, &'a FieldDef)>> {
        let meta = self.get(model)?;
        let mut out = Vec::new();
        for owner in self.lineage(meta)?.into_iter().rev() {
            out.extend(
                owner
                    .fields
                    .iter()
                    .filter(|f| f.is_concrete())
                    .map(|f| (owner, f)),
            );
        }
        Ok(out)
    }

    /// Intermediate-table layout of a many-to-many field.
    pub fn m2m_table(&self, owner: &ModelMeta, field: &FieldDef) -> RelqResult<ManyToManyTable> {
        let target = self.related_meta(owner, field)?;
        let table = match &field.field_type {
            FieldType::ManyToManyField {
                db_table: Some(t), ..
            } => t.clone(),
            FieldType::ManyToManyField { .. } => format!("{}_{}", owner.db_table, field.name),
            _ => {
                return Err(RelqError::field(format!(
                    "Field '{}' is not a many-to-many field",
                    field.name
                )))
            }
        };
        let (source_column, target_column) = if target.model_name == owner.model_name {
            let lower = owner.lower_name();
            (format!("from_{lower}_id"), format!("to_{lower}_id"))
        } else {
            (
                format!("{}_id", owner.lower_name()),
                format!("{}_id", target.lower_name()),
            )
        };
        Ok(ManyToManyTable {
            table,
            source_column,
            target_column,
        })
    }

    /// Foreign keys and one-to-one fields on other models pointing at `model`.
    pub fn reverse_relations(&self, model: &str) -> RelqResult<Vec<ReverseRelation<'_>>> {
        let mut out = Vec::new();
        for related in self.models.values() {
            for field in related
                .fields
                .iter()
                .filter(|f| f.is_relation() && !f.is_many_to_many())
            {
                if self.related_meta(related, field)?.model_name == model {
                    out.push(ReverseRelation { related, field });
                }
            }
        }
        Ok(out)
    }

    /// Intermediate tables involving `model`, each with the column that holds
    /// `model`'s key. A self-referential table appears once per side.
    pub fn m2m_tables_for(&self, model: &str) -> RelqResult<Vec<(ManyToManyTable, String)>> {
        let mut out = Vec::new();
        for owner in self.models.values() {
            for field in owner.fields.iter().filter(|f| f.is_many_to_many()) {
                let target = self.related_meta(owner, field)?;
                let table = self.m2m_table(owner, field)?;
                if owner.model_name == model {
                    let column = table.source_column.clone();
                    out.push((table.clone(), column));
                }
                if target.model_name == model {
                    let column = table.target_column.clone();
                    out.push((table, column));
                }
            }
        }
        Ok(out)
    }

    /// Every name usable in a lookup on `model`, sorted.
    pub fn field_names(&self, model: &str) -> RelqResult<Vec<String>> {
        let meta = self.get(model)?;
        let mut names = Vec::new();
        for owner in self.lineage(meta)? {
            names.extend(owner.fields.iter().map(|f| f.name.clone()));
            for (name, _) in self.reverse_names(owner)? {
                names.push(name);
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Reverse accessor names on `meta`: declared related names, or the
    /// lowercased name of the pointing model.
    fn reverse_names<'a>(
        &'a self,
        meta: &ModelMeta,
    ) -> RelqResult<Vec<(String, ReverseRelation<'a>)>> {
        let mut out = Vec::new();
        for related in self.models.values() {
            for field in related.fields.iter().filter(|f| f.is_relation()) {
                if field.is_parent_link() {
                    continue;
                }
                if self.related_meta(related, field)?.model_name != meta.model_name {
                    continue;
                }
                let name = field
                    .declared_related_name()
                    .map_or_else(|| related.lower_name(), str::to_string);
                out.push((name, ReverseRelation { related, field }));
            }
        }
        Ok(out)
    }

    /// Resolves one name of a lookup path on `model` into the hops needed to
    /// reach it. `pk` names the primary key.
    pub fn resolve_name(&self, model: &str, name: &str) -> RelqResult<NameStep> {
        let meta = self.get(model)?;
        let name = if name == "pk" {
            self.pk(model)?.name.as_str()
        } else {
            name
        };

        let mut hops = Vec::new();
        let mut current = meta;
        for owner in self.lineage(meta)? {
            if owner.model_name != current.model_name {
                // Step from the child into its parent through the link column.
                let (link, _) = self.parent_of(current)?.ok_or_else(|| {
                    RelqError::ImproperlyConfigured(format!(
                        "Model '{}' lost its parent link",
                        current.model_name
                    ))
                })?;
                hops.push(PathHop {
                    table: owner.db_table.clone(),
                    lhs_col: link.column.clone(),
                    rhs_col: self.pk(&owner.model_name)?.column.clone(),
                    nullable: false,
                    multi: false,
                });
                current = owner;
            }
            if let Some(field) = owner.local_field(name) {
                return self.step_for_field(owner, field, hops);
            }
            if let Some((_, rel)) = self
                .reverse_names(owner)?
                .into_iter()
                .find(|(n, _)| n == name)
            {
                return self.step_for_reverse(owner, &rel, hops);
            }
        }

        Err(RelqError::field(format!(
            "Cannot resolve keyword '{name}' into field. Choices are: {}",
            self.field_names(model)?.join(", ")
        )))
    }

    fn step_for_field(
        &self,
        owner: &ModelMeta,
        field: &FieldDef,
        mut hops: Vec<PathHop>,
    ) -> RelqResult<NameStep> {
        if field.is_many_to_many() {
            let target = self.related_meta(owner, field)?;
            let target_pk = self.pk(&target.model_name)?;
            let m2m = self.m2m_table(owner, field)?;
            hops.push(PathHop {
                table: m2m.table,
                lhs_col: self.pk(&owner.model_name)?.column.clone(),
                rhs_col: m2m.source_column,
                nullable: true,
                multi: true,
            });
            hops.push(PathHop {
                table: target.db_table.clone(),
                lhs_col: m2m.target_column,
                rhs_col: target_pk.column.clone(),
                nullable: true,
                multi: false,
            });
            return Ok(NameStep {
                hops,
                field: field.clone(),
                target: target_pk.clone(),
                model: target.model_name.clone(),
                is_relation: true,
            });
        }
        if field.is_relation() {
            let (target, key) = self.relation_target(owner, field)?;
            hops.push(PathHop {
                table: target.db_table.clone(),
                lhs_col: field.column.clone(),
                rhs_col: key.column.clone(),
                nullable: field.null,
                multi: false,
            });
            return Ok(NameStep {
                hops,
                field: field.clone(),
                target: key.clone(),
                model: target.model_name.clone(),
                is_relation: true,
            });
        }
        Ok(NameStep {
            hops,
            field: field.clone(),
            target: field.clone(),
            model: owner.model_name.clone(),
            is_relation: false,
        })
    }

    fn step_for_reverse(
        &self,
        owner: &ModelMeta,
        rel: &ReverseRelation<'_>,
        mut hops: Vec<PathHop>,
    ) -> RelqResult<NameStep> {
        let related_pk = self.pk(&rel.related.model_name)?;
        if rel.field.is_many_to_many() {
            let m2m = self.m2m_table(rel.related, rel.field)?;
            hops.push(PathHop {
                table: m2m.table,
                lhs_col: self.pk(&owner.model_name)?.column.clone(),
                rhs_col: m2m.target_column,
                nullable: true,
                multi: true,
            });
            hops.push(PathHop {
                table: rel.related.db_table.clone(),
                lhs_col: m2m.source_column,
                rhs_col: related_pk.column.clone(),
                nullable: true,
                multi: false,
            });
        } else {
            let (_, key) = self.relation_target(rel.related, rel.field)?;
            hops.push(PathHop {
                table: rel.related.db_table.clone(),
                lhs_col: key.column.clone(),
                rhs_col: rel.field.column.clone(),
                nullable: true,
                multi: matches!(rel.field.field_type, FieldType::ForeignKey { .. }),
            });
        }
        Ok(NameStep {
            hops,
            field: rel.field.clone(),
            target: related_pk.clone(),
            model: rel.related.model_name.clone(),
            is_relation: true,
        })
    }
}
