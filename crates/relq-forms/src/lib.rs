//! # relq-forms
//!
//! Form handling for relq: typed field cleaning, binding of url-encoded
//! submissions, and formsets that manage many copies of one form with add,
//! change, delete and reorder semantics.
//!
//! ## Modules
//!
//! - [`data`] - [`FormData`], the submitted key/value pairs
//! - [`fields`] - [`FormFieldDef`] and value cleaning
//! - [`form`] - The [`Form`] trait and [`BaseForm`]
//! - [`formset`] - [`FormSet`], [`FormSetFactory`] and [`all_valid`]

#![allow(clippy::missing_const_for_fn, clippy::return_self_not_must_use)]

pub mod data;
pub mod fields;
pub mod form;
pub mod formset;

pub use data::FormData;
pub use fields::{clean_field_value, FormFieldDef, FormFieldType};
pub use form::{BaseForm, CleanedData, Form, FormErrors, NON_FIELD_ERRORS};
pub use formset::{all_valid, formset_for_form, FormSet, FormSetFactory};
