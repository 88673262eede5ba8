//! Field type definitions.
//!
//! [`FieldType`] says how a value is stored and compared; relation variants
//! carry the target model and the naming details the join resolver needs.
//! [`FieldDef`] is the full description of one field on one model.

use crate::value::Value;

/// The type of a model field.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    /// Auto-incrementing 32-bit integer primary key.
    AutoField,
    /// Auto-incrementing 64-bit integer primary key.
    BigAutoField,
    /// Variable-length string with a max length.
    CharField,
    /// Unlimited-length text.
    TextField,
    /// 32-bit signed integer.
    IntegerField,
    /// 64-bit signed integer.
    BigIntegerField,
    /// 64-bit floating-point number.
    FloatField,
    /// Boolean (true/false).
    BooleanField,
    /// Date without time.
    DateField,
    /// Date and time.
    DateTimeField,
    /// Time without date.
    TimeField,
    /// Many-to-one relationship.
    ForeignKey {
        /// The target model name, or `"self"`.
        to: String,
        /// The target field; the target's primary key when `None`.
        to_field: Option<String>,
        /// Behavior when the referenced row is deleted.
        on_delete: OnDelete,
        /// The name the target uses for the reverse relation.
        related_name: Option<String>,
    },
    /// One-to-one relationship (unique foreign key).
    OneToOneField {
        /// The target model name, or `"self"`.
        to: String,
        /// Behavior when the referenced row is deleted.
        on_delete: OnDelete,
        /// The name the target uses for the reverse relation.
        related_name: Option<String>,
        /// Marks the link from a child model to its inheritance parent.
        parent_link: bool,
    },
    /// Many-to-many relationship through an intermediate table.
    ManyToManyField {
        /// The target model name, or `"self"`.
        to: String,
        /// Explicit intermediate table name.
        db_table: Option<String>,
        /// The name the target uses for the reverse relation.
        related_name: Option<String>,
    },
}

impl FieldType {
    /// Returns `true` for date and datetime storage.
    pub const fn is_date(&self) -> bool {
        matches!(self, Self::DateField | Self::DateTimeField)
    }

    /// Returns `true` for types whose LIKE lookups compare text.
    pub const fn is_textual(&self) -> bool {
        matches!(self, Self::CharField | Self::TextField)
    }
}

/// Behavior when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OnDelete {
    /// Delete all related rows.
    Cascade,
    /// Refuse the deletion while related rows exist.
    Protect,
    /// Set the foreign key to NULL.
    SetNull,
    /// Leave related rows alone.
    DoNothing,
}

/// Complete definition of a model field.
///
/// # Examples
///
/// ```
/// use relq_db::fields::{FieldDef, FieldType};
///
/// let reporter = FieldDef::foreign_key("reporter", "Reporter");
/// assert_eq!(reporter.column, "reporter_id");
/// assert_eq!(reporter.related_model(), Some("Reporter"));
///
/// let headline = FieldDef::new("headline", FieldType::CharField).max_length(100);
/// assert!(!headline.is_relation());
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDef {
    /// The attribute name used in lookups.
    pub name: String,
    /// The database column name.
    pub column: String,
    /// The type of this field.
    pub field_type: FieldType,
    /// Whether this field is the primary key.
    pub primary_key: bool,
    /// Whether NULL is allowed in the database.
    pub null: bool,
    /// Whether a UNIQUE constraint exists.
    pub unique: bool,
    /// Maximum character length.
    pub max_length: Option<usize>,
    /// Default value for new rows.
    pub default: Option<Value>,
    /// Human-readable name.
    pub verbose_name: String,
}

impl FieldDef {
    /// Creates a new `FieldDef`. The column defaults to the field name.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            verbose_name: name.replace('_', " "),
            name,
            field_type,
            primary_key: false,
            null: false,
            unique: false,
            max_length: None,
            default: None,
        }
    }

    /// An auto-incrementing integer primary key.
    pub fn auto(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::AutoField).primary_key()
    }

    /// A foreign key stored in `<name>_id`.
    pub fn foreign_key(name: impl Into<String>, to: impl Into<String>) -> Self {
        let name = name.into();
        let column = format!("{name}_id");
        Self::new(
            name,
            FieldType::ForeignKey {
                to: to.into(),
                to_field: None,
                on_delete: OnDelete::Cascade,
                related_name: None,
            },
        )
        .column(column)
    }

    /// A one-to-one relation stored in `<name>_id`.
    pub fn one_to_one(name: impl Into<String>, to: impl Into<String>) -> Self {
        let name = name.into();
        let column = format!("{name}_id");
        Self::new(
            name,
            FieldType::OneToOneField {
                to: to.into(),
                on_delete: OnDelete::Cascade,
                related_name: None,
                parent_link: false,
            },
        )
        .column(column)
        .unique()
    }

    /// The primary-key link from a child model to its inheritance parent.
    pub fn parent_link(name: impl Into<String>, to: impl Into<String>) -> Self {
        let mut field = Self::one_to_one(name, to).primary_key();
        if let FieldType::OneToOneField { parent_link, .. } = &mut field.field_type {
            *parent_link = true;
        }
        field
    }

    /// A many-to-many relation; it owns no column on the model's table.
    pub fn many_to_many(name: impl Into<String>, to: impl Into<String>) -> Self {
        let mut field = Self::new(
            name,
            FieldType::ManyToManyField {
                to: to.into(),
                db_table: None,
                related_name: None,
            },
        );
        field.column = String::new();
        field
    }

    /// Sets the database column name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    /// Marks this field as the primary key.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Allows NULL values in the database.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    /// Marks this field as having a UNIQUE constraint.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the maximum character length.
    #[must_use]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Sets the default value for this field.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sets the verbose (human-readable) name.
    #[must_use]
    pub fn verbose_name(mut self, name: impl Into<String>) -> Self {
        self.verbose_name = name.into();
        self
    }

    /// Points a foreign key at a non-primary-key field of the target.
    #[must_use]
    pub fn to_field(mut self, target: impl Into<String>) -> Self {
        if let FieldType::ForeignKey { to_field, .. } = &mut self.field_type {
            *to_field = Some(target.into());
        }
        self
    }

    /// Sets the reverse relation name seen from the target model.
    #[must_use]
    pub fn related_name(mut self, name: impl Into<String>) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey { related_name, .. }
            | FieldType::OneToOneField { related_name, .. }
            | FieldType::ManyToManyField { related_name, .. } => {
                *related_name = Some(name.into());
            }
            _ => {}
        }
        self
    }

    /// Sets the ON DELETE behavior of a foreign key or one-to-one field.
    #[must_use]
    pub fn on_delete(mut self, action: OnDelete) -> Self {
        match &mut self.field_type {
            FieldType::ForeignKey { on_delete, .. } | FieldType::OneToOneField { on_delete, .. } => {
                *on_delete = action;
            }
            _ => {}
        }
        self
    }

    /// Names the intermediate table of a many-to-many field.
    #[must_use]
    pub fn db_table(mut self, table: impl Into<String>) -> Self {
        if let FieldType::ManyToManyField { db_table, .. } = &mut self.field_type {
            *db_table = Some(table.into());
        }
        self
    }

    /// Returns `true` if this field represents a relational field.
    pub const fn is_relation(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::ForeignKey { .. }
                | FieldType::OneToOneField { .. }
                | FieldType::ManyToManyField { .. }
        )
    }

    /// Returns `true` for many-to-many fields.
    pub const fn is_many_to_many(&self) -> bool {
        matches!(self.field_type, FieldType::ManyToManyField { .. })
    }

    /// Returns `true` if the field is stored in a column of its model's table.
    pub const fn is_concrete(&self) -> bool {
        !self.is_many_to_many()
    }

    /// Returns `true` for the link to an inheritance parent.
    pub const fn is_parent_link(&self) -> bool {
        matches!(
            self.field_type,
            FieldType::OneToOneField {
                parent_link: true,
                ..
            }
        )
    }

    /// The target model name of a relation, as declared.
    pub fn related_model(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::ForeignKey { to, .. }
            | FieldType::OneToOneField { to, .. }
            | FieldType::ManyToManyField { to, .. } => Some(to),
            _ => None,
        }
    }

    /// The explicitly targeted field of a foreign key.
    pub fn target_field_name(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::ForeignKey { to_field, .. } => to_field.as_deref(),
            _ => None,
        }
    }

    /// The declared reverse relation name.
    pub fn declared_related_name(&self) -> Option<&str> {
        match &self.field_type {
            FieldType::ForeignKey { related_name, .. }
            | FieldType::OneToOneField { related_name, .. }
            | FieldType::ManyToManyField { related_name, .. } => related_name.as_deref(),
            _ => None,
        }
    }

    /// The ON DELETE action of a foreign key or one-to-one field.
    pub const fn delete_action(&self) -> Option<OnDelete> {
        match &self.field_type {
            FieldType::ForeignKey { on_delete, .. } | FieldType::OneToOneField { on_delete, .. } => {
                Some(*on_delete)
            }
            _ => None,
        }
    }
}
