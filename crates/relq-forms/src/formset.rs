//! Formsets: several copies of one form handled together.
//!
//! A [`FormSet`] is built by a [`FormSetFactory`] from a form constructor.
//! Its size comes from the hidden management fields `<prefix>-TOTAL_FORMS`
//! and `<prefix>-INITIAL_FORMS`. The first `INITIAL_FORMS` forms are
//! "change" forms for existing rows; the rest are "add" forms, and blank add
//! forms at the end of the set are ignored.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use relq_core::{RelqError, RelqResult, ValidationError};
use relq_db::Value;

use crate::data::FormData;
use crate::fields::{FormFieldDef, FormFieldType};
use crate::form::{CleanedData, Form, FormErrors};

/// Management field holding the number of forms submitted.
pub const TOTAL_FORM_COUNT: &str = "TOTAL_FORMS";
/// Management field holding the number of change forms.
pub const INITIAL_FORM_COUNT: &str = "INITIAL_FORMS";
/// Management field echoing `min_num`.
pub const MIN_NUM_FORM_COUNT: &str = "MIN_NUM_FORMS";
/// Management field echoing `max_num`.
pub const MAX_NUM_FORM_COUNT: &str = "MAX_NUM_FORMS";
/// Per-form field carrying the requested position.
pub const ORDERING_FIELD_NAME: &str = "ORDER";
/// Per-form field marking the row for deletion.
pub const DELETION_FIELD_NAME: &str = "DELETE";
/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "form";
/// Upper bound on TOTAL_FORMS, whatever the client sends.
pub const ABSOLUTE_MAX: usize = 1000;

/// Builds one fresh, unbound member form.
pub type FormConstructor = Arc<dyn Fn() -> Box<dyn Form> + Send + Sync>;

fn tampered() -> RelqError {
    RelqError::ValidationError(ValidationError::new(
        "ManagementForm data is missing or has been tampered with",
        "missing_management_form",
    ))
}

/// Configuration shared by every formset of one kind.
#[derive(Clone)]
pub struct FormSetFactory {
    form: FormConstructor,
    extra: usize,
    can_order: bool,
    can_delete: bool,
    min_num: usize,
    max_num: usize,
    prefix: String,
}

impl fmt::Debug for FormSetFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormSetFactory")
            .field("extra", &self.extra)
            .field("can_order", &self.can_order)
            .field("can_delete", &self.can_delete)
            .field("min_num", &self.min_num)
            .field("max_num", &self.max_num)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl FormSetFactory {
    /// Creates a factory with one extra form and no ordering or deletion.
    pub fn new<F>(form: F) -> Self
    where
        F: Fn() -> Box<dyn Form> + Send + Sync + 'static,
    {
        Self {
            form: Arc::new(form),
            extra: 1,
            can_order: false,
            can_delete: false,
            min_num: 0,
            max_num: ABSOLUTE_MAX,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    /// Sets the number of blank add forms offered.
    #[must_use]
    pub const fn extra(mut self, extra: usize) -> Self {
        self.extra = extra;
        self
    }

    /// Adds an `ORDER` field to every form.
    #[must_use]
    pub const fn can_order(mut self, can_order: bool) -> Self {
        self.can_order = can_order;
        self
    }

    /// Adds a `DELETE` field to every form.
    #[must_use]
    pub const fn can_delete(mut self, can_delete: bool) -> Self {
        self.can_delete = can_delete;
        self
    }

    /// Sets the fewest rows a valid submission may contain.
    #[must_use]
    pub const fn min_num(mut self, min_num: usize) -> Self {
        self.min_num = min_num;
        self
    }

    /// Sets the most rows a valid submission may contain.
    #[must_use]
    pub const fn max_num(mut self, max_num: usize) -> Self {
        self.max_num = max_num;
        self
    }

    /// Sets the prefix of every submitted key.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// An unbound formset of `extra` blank forms.
    pub fn unbound(&self) -> FormSet {
        self.build(self.extra, 0, &[], None)
    }

    /// An unbound formset with one change form per initial row followed by
    /// `extra` blank forms.
    pub fn with_initial(&self, initial: Vec<HashMap<String, Value>>) -> FormSet {
        let change = initial.len();
        self.build(change + self.extra, change, &initial, None)
    }

    /// A formset bound to a submission.
    ///
    /// Fails with a validation error when `TOTAL_FORMS` is missing or not a
    /// number, or when `INITIAL_FORMS` is present but not a number.
    pub fn bind(&self, data: &FormData) -> RelqResult<FormSet> {
        self.bind_with_initial(data, Vec::new())
    }

    /// A bound formset whose change forms also carry initial rows.
    pub fn bind_with_initial(
        &self,
        data: &FormData,
        initial: Vec<HashMap<String, Value>>,
    ) -> RelqResult<FormSet> {
        let (total, change) = self.management_counts(data, initial.len())?;
        Ok(self.build(total, change, &initial, Some(data)))
    }

    fn management_counts(&self, data: &FormData, initial_rows: usize) -> RelqResult<(usize, usize)> {
        let key = |name: &str| format!("{}-{name}", self.prefix);
        let total: usize = data
            .get(&key(TOTAL_FORM_COUNT))
            .and_then(|raw| raw.trim().parse().ok())
            .ok_or_else(tampered)?;
        if total > ABSOLUTE_MAX {
            tracing::warn!(
                prefix = %self.prefix,
                total,
                "TOTAL_FORMS clamped to {ABSOLUTE_MAX}"
            );
        }
        let total = total.min(ABSOLUTE_MAX);

        let change = match data.get(&key(INITIAL_FORM_COUNT)) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| tampered())?,
            None if initial_rows > 0 => total.saturating_sub(self.extra).min(initial_rows),
            None => total.saturating_sub(self.extra),
        };
        Ok((total, change.min(total)))
    }

    fn build(
        &self,
        total: usize,
        change: usize,
        initial: &[HashMap<String, Value>],
        data: Option<&FormData>,
    ) -> FormSet {
        let forms = (0..total)
            .map(|i| {
                let mut form = (self.form)();
                form.set_prefix(Some(format!("{}-{i}", self.prefix)));
                if i < change {
                    if let Some(row) = initial.get(i) {
                        form.set_initial(row.clone());
                    }
                }
                self.add_fields(form.as_mut(), i);
                if let Some(data) = data {
                    form.bind(data);
                }
                form
            })
            .collect();
        FormSet {
            forms,
            initial_form_count: change,
            can_order: self.can_order,
            can_delete: self.can_delete,
            min_num: self.min_num,
            max_num: self.max_num,
            prefix: self.prefix.clone(),
            is_bound: data.is_some(),
            validated: None,
            errors: Vec::new(),
            non_form_errors: Vec::new(),
            cleaned_data: Vec::new(),
            deleted_data: Vec::new(),
        }
    }

    fn add_fields(&self, form: &mut dyn Form, index: usize) {
        if self.can_order {
            let position = i64::try_from(index + 1).unwrap_or(i64::MAX);
            form.add_field(
                FormFieldDef::new(
                    ORDERING_FIELD_NAME,
                    FormFieldType::Integer {
                        min_value: None,
                        max_value: None,
                    },
                )
                .label("Order")
                .initial(position)
                .required(false),
            );
        }
        if self.can_delete {
            form.add_field(
                FormFieldDef::new(DELETION_FIELD_NAME, FormFieldType::Boolean)
                    .label("Delete")
                    .required(false),
            );
        }
    }
}

/// Returns a factory for formsets of `form`.
pub fn formset_for_form<F>(form: F, extra: usize, orderable: bool, deletable: bool) -> FormSetFactory
where
    F: Fn() -> Box<dyn Form> + Send + Sync + 'static,
{
    FormSetFactory::new(form)
        .extra(extra)
        .can_order(orderable)
        .can_delete(deletable)
}

/// Validates every formset, without stopping at the first failure, and
/// returns whether all of them are valid.
pub fn all_valid(formsets: &mut [FormSet]) -> bool {
    let mut valid = true;
    for formset in formsets {
        valid &= formset.is_valid();
    }
    valid
}

/// A collection of forms of the same kind.
pub struct FormSet {
    forms: Vec<Box<dyn Form>>,
    initial_form_count: usize,
    can_order: bool,
    can_delete: bool,
    min_num: usize,
    max_num: usize,
    prefix: String,
    is_bound: bool,
    validated: Option<bool>,
    errors: Vec<FormErrors>,
    non_form_errors: Vec<String>,
    cleaned_data: Vec<CleanedData>,
    deleted_data: Vec<CleanedData>,
}

impl fmt::Debug for FormSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormSet")
            .field("prefix", &self.prefix)
            .field("total_form_count", &self.forms.len())
            .field("initial_form_count", &self.initial_form_count)
            .field("is_bound", &self.is_bound)
            .field("validated", &self.validated)
            .finish_non_exhaustive()
    }
}

impl FormSet {
    /// Every form, change forms first.
    pub fn forms(&self) -> &[Box<dyn Form>] {
        &self.forms
    }

    /// Forms editing existing rows.
    pub fn change_forms(&self) -> &[Box<dyn Form>] {
        &self.forms[..self.initial_form_count]
    }

    /// Forms for new rows.
    pub fn add_forms(&self) -> &[Box<dyn Form>] {
        &self.forms[self.initial_form_count..]
    }

    /// The number of forms.
    pub fn total_form_count(&self) -> usize {
        self.forms.len()
    }

    /// The number of change forms.
    pub const fn initial_form_count(&self) -> usize {
        self.initial_form_count
    }

    /// The key prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns `true` if the formset was built from a submission.
    pub const fn is_bound(&self) -> bool {
        self.is_bound
    }

    /// The hidden management values to render with the forms.
    pub fn management_form_data(&self) -> FormData {
        let mut data = FormData::new();
        let prefix = &self.prefix;
        data.set(
            format!("{prefix}-{TOTAL_FORM_COUNT}"),
            self.total_form_count().to_string(),
        );
        data.set(
            format!("{prefix}-{INITIAL_FORM_COUNT}"),
            self.initial_form_count.to_string(),
        );
        data.set(
            format!("{prefix}-{MIN_NUM_FORM_COUNT}"),
            self.min_num.to_string(),
        );
        data.set(
            format!("{prefix}-{MAX_NUM_FORM_COUNT}"),
            self.max_num.to_string(),
        );
        data
    }

    /// Validates every form and the formset as a whole. The result is
    /// computed once; an unbound formset is never valid.
    pub fn is_valid(&mut self) -> bool {
        if let Some(valid) = self.validated {
            return valid;
        }
        let valid = self.full_clean();
        self.validated = Some(valid);
        valid
    }

    /// Per-form errors in form order, filled in by [`is_valid`](Self::is_valid).
    /// Ignored blank forms have no errors.
    pub fn errors(&self) -> &[FormErrors] {
        &self.errors
    }

    /// Errors about the formset as a whole, such as too few rows.
    pub fn non_form_errors(&self) -> &[String] {
        &self.non_form_errors
    }

    /// Cleaned rows that were not deleted, sorted by ORDER when the formset
    /// is orderable. Empty unless the formset is valid.
    pub fn cleaned_data(&self) -> &[CleanedData] {
        &self.cleaned_data
    }

    /// Cleaned rows marked for deletion. Empty unless the formset is valid.
    pub fn deleted_data(&self) -> &[CleanedData] {
        &self.deleted_data
    }

    fn full_clean(&mut self) -> bool {
        self.errors = vec![FormErrors::new(); self.forms.len()];
        self.non_form_errors.clear();
        self.cleaned_data.clear();
        self.deleted_data.clear();
        if !self.is_bound {
            return false;
        }

        let mut valid = true;
        let mut rows: Vec<(usize, CleanedData)> = Vec::new();

        for i in 0..self.initial_form_count {
            let form = &mut self.forms[i];
            if form.is_valid() {
                rows.push((i, form.cleaned_data().clone()));
            } else {
                valid = false;
            }
            self.errors[i] = form.errors().clone();
        }

        // Scanning backwards, every add form is optional until the first
        // non-blank one; from there on all of them must validate.
        let mut required = false;
        for i in (self.initial_form_count..self.forms.len()).rev() {
            let form = &mut self.forms[i];
            if !required && form.is_empty(&[ORDERING_FIELD_NAME]) {
                form.reset();
                continue;
            }
            required = true;
            if form.is_valid() {
                rows.push((i, form.cleaned_data().clone()));
            } else {
                valid = false;
            }
            self.errors[i] = form.errors().clone();
        }
        rows.sort_by_key(|(i, _)| *i);

        let (deleted, mut kept): (Vec<_>, Vec<_>) = rows
            .into_iter()
            .map(|(_, data)| data)
            .partition(|data| self.can_delete && marked_for_deletion(data));
        if self.can_order {
            kept.sort_by_key(order_key);
        }

        if kept.len() < self.min_num {
            self.non_form_errors
                .push(format!("Please submit at least {} forms.", self.min_num));
            valid = false;
        }
        if kept.len() > self.max_num {
            self.non_form_errors
                .push(format!("Please submit at most {} forms.", self.max_num));
            valid = false;
        }

        tracing::debug!(
            prefix = %self.prefix,
            forms = self.forms.len(),
            kept = kept.len(),
            deleted = deleted.len(),
            valid,
            "formset validated"
        );
        if valid {
            self.cleaned_data = kept;
            self.deleted_data = deleted;
        }
        valid
    }
}

fn marked_for_deletion(data: &CleanedData) -> bool {
    data.get(DELETION_FIELD_NAME)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Rows without an ORDER value sort after all numbered rows.
fn order_key(data: &CleanedData) -> (bool, i64) {
    match data.get(ORDERING_FIELD_NAME).and_then(Value::as_int) {
        Some(n) => (false, n),
        None => (true, 0),
    }
}
