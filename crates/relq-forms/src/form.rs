//! The `Form` trait and the general-purpose `BaseForm`.
//!
//! A form owns a list of [`FormFieldDef`]s. Binding it to [`FormData`] reads
//! each field's submitted value under the form's prefix; validation then
//! cleans every field and runs the form-level [`clean`](Form::clean) hook.

use std::collections::HashMap;

use relq_db::Value;

use crate::data::FormData;
use crate::fields::{clean_field_value, FormFieldDef};

/// Key under which form-level errors are stored.
pub const NON_FIELD_ERRORS: &str = "__all__";

/// Per-field error messages.
pub type FormErrors = HashMap<String, Vec<String>>;

/// Cleaned values keyed by field name.
pub type CleanedData = HashMap<String, Value>;

/// The core form abstraction.
///
/// Formsets drive their members through this trait: they set each form's
/// prefix and initial data, append the ORDER/DELETE fields, bind the shared
/// submission, and reset blank extra forms.
pub trait Form: Send + Sync {
    /// Returns the form's field definitions.
    fn fields(&self) -> &[FormFieldDef];

    /// Appends a field, replacing any field of the same name.
    fn add_field(&mut self, field: FormFieldDef);

    /// Returns the initial values.
    fn initial(&self) -> &HashMap<String, Value>;

    /// Replaces the initial values.
    fn set_initial(&mut self, initial: HashMap<String, Value>);

    /// Returns the prefix namespacing this form's keys.
    fn prefix(&self) -> Option<&str>;

    /// Sets the prefix namespacing this form's keys.
    fn set_prefix(&mut self, prefix: Option<String>);

    /// Binds submitted data, discarding earlier results.
    fn bind(&mut self, data: &FormData);

    /// Returns `true` if this form has been bound to data.
    fn is_bound(&self) -> bool;

    /// Returns the raw submitted value of a field.
    fn raw_value(&self, field: &str) -> Option<&str>;

    /// Validates the form. An unbound form is never valid.
    fn is_valid(&mut self) -> bool;

    /// Returns per-field errors from the last validation.
    fn errors(&self) -> &FormErrors;

    /// Returns the cleaned values from the last validation.
    fn cleaned_data(&self) -> &CleanedData;

    /// Returns the form to its unbound state.
    fn reset(&mut self);

    /// Cross-field validation hook, run after every field has been cleaned.
    fn clean(&self, _cleaned: &CleanedData) -> Result<(), FormErrors> {
        Ok(())
    }

    /// Returns the submitted key for a field.
    fn add_prefix(&self, field: &str) -> String {
        match self.prefix() {
            Some(p) => format!("{p}-{field}"),
            None => field.to_string(),
        }
    }

    /// Returns `true` if the form is bound and nothing was entered in any
    /// field outside `exceptions`.
    fn is_empty(&self, exceptions: &[&str]) -> bool {
        self.is_bound()
            && self
                .fields()
                .iter()
                .filter(|f| !exceptions.contains(&f.name.as_str()))
                .all(|f| self.raw_value(&f.name).map_or(true, str::is_empty))
    }
}

/// A form built from a list of field definitions.
#[derive(Debug, Clone, Default)]
pub struct BaseForm {
    field_defs: Vec<FormFieldDef>,
    initial_data: HashMap<String, Value>,
    prefix: Option<String>,
    bound: bool,
    raw_data: HashMap<String, Option<String>>,
    errors: FormErrors,
    cleaned_data: CleanedData,
}

impl BaseForm {
    /// Creates an unbound form with the given fields.
    pub fn new(fields: Vec<FormFieldDef>) -> Self {
        Self {
            field_defs: fields,
            ..Self::default()
        }
    }

    /// Sets the initial values.
    #[must_use]
    pub fn with_initial(mut self, initial: HashMap<String, Value>) -> Self {
        self.initial_data = initial;
        self
    }

    /// Sets the prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Returns the form-level errors.
    pub fn non_field_errors(&self) -> &[String] {
        self.errors.get(NON_FIELD_ERRORS).map_or(&[], Vec::as_slice)
    }
}

impl Form for BaseForm {
    fn fields(&self) -> &[FormFieldDef] {
        &self.field_defs
    }

    fn add_field(&mut self, field: FormFieldDef) {
        self.field_defs.retain(|f| f.name != field.name);
        self.field_defs.push(field);
    }

    fn initial(&self) -> &HashMap<String, Value> {
        &self.initial_data
    }

    fn set_initial(&mut self, initial: HashMap<String, Value>) {
        self.initial_data = initial;
    }

    fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    fn set_prefix(&mut self, prefix: Option<String>) {
        self.prefix = prefix;
    }

    fn bind(&mut self, data: &FormData) {
        self.bound = true;
        self.errors.clear();
        self.cleaned_data.clear();
        self.raw_data = self
            .field_defs
            .iter()
            .map(|field| {
                let value = data.get(&self.add_prefix(&field.name)).map(String::from);
                (field.name.clone(), value)
            })
            .collect();
    }

    fn is_bound(&self) -> bool {
        self.bound
    }

    fn raw_value(&self, field: &str) -> Option<&str> {
        self.raw_data.get(field).and_then(Option::as_deref)
    }

    fn is_valid(&mut self) -> bool {
        if !self.bound {
            return false;
        }
        self.errors.clear();
        self.cleaned_data.clear();

        for field in &self.field_defs {
            if field.disabled {
                let value = self
                    .initial_data
                    .get(&field.name)
                    .or(field.initial.as_ref())
                    .cloned()
                    .unwrap_or(Value::Null);
                self.cleaned_data.insert(field.name.clone(), value);
                continue;
            }
            let raw = self.raw_data.get(&field.name).and_then(Option::as_deref);
            match clean_field_value(field, raw) {
                Ok(value) => {
                    self.cleaned_data.insert(field.name.clone(), value);
                }
                Err(messages) => {
                    self.errors.insert(field.name.clone(), messages);
                }
            }
        }

        if let Err(form_errors) = self.clean(&self.cleaned_data) {
            for (key, messages) in form_errors {
                self.errors.entry(key).or_default().extend(messages);
            }
        }
        self.errors.is_empty()
    }

    fn errors(&self) -> &FormErrors {
        &self.errors
    }

    fn cleaned_data(&self) -> &CleanedData {
        &self.cleaned_data
    }

    fn reset(&mut self) {
        self.bound = false;
        self.raw_data.clear();
        self.errors.clear();
        self.cleaned_data.clear();
    }
}
