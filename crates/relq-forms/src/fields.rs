//! Form field definitions and type-level cleaning.
//!
//! A [`FormFieldDef`] describes one input of a form: its type, whether it is
//! required, its initial value and any extra validators. [`clean_field_value`]
//! turns the raw submitted string into a typed [`Value`] or a list of error
//! messages.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use relq_db::Value;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$").expect("valid regex")
});

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://[^\s/$.?#][^\s]*$").expect("valid regex"));

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[-a-zA-Z0-9_]+$").expect("valid regex"));

/// A check run on the cleaned value after type coercion succeeded.
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// The type of a form field together with its type-specific limits.
#[derive(Debug, Clone, PartialEq)]
pub enum FormFieldType {
    /// Free text.
    Char {
        /// Minimum length in characters.
        min_length: Option<usize>,
        /// Maximum length in characters.
        max_length: Option<usize>,
        /// Whether surrounding whitespace is stripped.
        strip: bool,
    },
    /// A whole number.
    Integer {
        /// Smallest accepted value.
        min_value: Option<i64>,
        /// Largest accepted value.
        max_value: Option<i64>,
    },
    /// A floating-point number.
    Float {
        /// Smallest accepted value.
        min_value: Option<f64>,
        /// Largest accepted value.
        max_value: Option<f64>,
    },
    /// A checkbox. Unchecked cleans to `false`.
    Boolean,
    /// Yes, no or unknown.
    NullBoolean,
    /// `YYYY-MM-DD`.
    Date,
    /// `YYYY-MM-DD HH:MM[:SS]`, with either a space or `T` separator.
    DateTime,
    /// `HH:MM[:SS]`.
    Time,
    /// An email address.
    Email,
    /// An `http`/`https` URL.
    Url,
    /// Letters, numbers, underscores and hyphens.
    Slug,
    /// One of a fixed set of `(value, label)` pairs.
    Choice {
        /// The accepted choices.
        choices: Vec<(String, String)>,
    },
    /// Text that must match a pattern.
    Regex {
        /// The pattern.
        regex: String,
    },
}

/// Complete definition of a form field.
#[derive(Clone)]
pub struct FormFieldDef {
    /// The field name; the submitted key is `<form prefix>-<name>`.
    pub name: String,
    /// The field type, controlling coercion.
    pub field_type: FormFieldType,
    /// Whether an empty submission is an error.
    pub required: bool,
    /// The value shown before anything is submitted.
    pub initial: Option<Value>,
    /// Human-readable label.
    pub label: String,
    /// Help text displayed alongside the field.
    pub help_text: String,
    /// Extra checks on the cleaned value.
    pub validators: Vec<Validator>,
    /// Custom error messages keyed by error code.
    pub error_messages: HashMap<String, String>,
    /// Disabled fields keep their initial value and are not validated.
    pub disabled: bool,
}

impl fmt::Debug for FormFieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormFieldDef")
            .field("name", &self.name)
            .field("field_type", &self.field_type)
            .field("required", &self.required)
            .field("initial", &self.initial)
            .field("validators", &self.validators.len())
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl FormFieldDef {
    /// Creates a required field whose label is derived from the name.
    pub fn new(name: impl Into<String>, field_type: FormFieldType) -> Self {
        let name = name.into();
        let label = name.replace('_', " ");
        Self {
            name,
            field_type,
            required: true,
            initial: None,
            label,
            help_text: String::new(),
            validators: Vec::new(),
            error_messages: HashMap::new(),
            disabled: false,
        }
    }

    /// A plain text field without length limits.
    pub fn char(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FormFieldType::Char {
                min_length: None,
                max_length: None,
                strip: true,
            },
        )
    }

    /// An integer field without bounds.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(
            name,
            FormFieldType::Integer {
                min_value: None,
                max_value: None,
            },
        )
    }

    /// Sets whether this field is required.
    #[must_use]
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Sets the initial value.
    #[must_use]
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    /// Sets the label.
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the help text.
    #[must_use]
    pub fn help_text(mut self, text: impl Into<String>) -> Self {
        self.help_text = text.into();
        self
    }

    /// Adds a validator.
    #[must_use]
    pub fn validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(check));
        self
    }

    /// Overrides the message for an error code such as `"required"`.
    #[must_use]
    pub fn error_message(mut self, code: impl Into<String>, msg: impl Into<String>) -> Self {
        self.error_messages.insert(code.into(), msg.into());
        self
    }

    /// Sets whether this field is disabled.
    #[must_use]
    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    fn message(&self, code: &str, default: impl FnOnce() -> String) -> String {
        self.error_messages.get(code).cloned().unwrap_or_else(default)
    }
}

/// Cleans a raw submitted string into a typed `Value`.
///
/// Empty input is an error for required fields. Otherwise it cleans to
/// `Null`, or to `false` for a checkbox. Type errors short-circuit the
/// field's validators; all other errors accumulate.
pub fn clean_field_value(field: &FormFieldDef, raw: Option<&str>) -> Result<Value, Vec<String>> {
    let raw_str = raw.unwrap_or("");
    let is_empty = match &field.field_type {
        FormFieldType::Char { strip: true, .. } => raw_str.trim().is_empty(),
        FormFieldType::Boolean => !is_checked(raw_str),
        _ => raw_str.is_empty(),
    };

    if field.required && is_empty {
        return Err(vec![
            field.message("required", || "This field is required.".to_string()),
        ]);
    }
    if is_empty {
        return Ok(match field.field_type {
            FormFieldType::Boolean => Value::Bool(false),
            _ => Value::Null,
        });
    }

    let mut errors = Vec::new();
    let value = match &field.field_type {
        FormFieldType::Char {
            min_length,
            max_length,
            strip,
        } => {
            let s = if *strip { raw_str.trim() } else { raw_str };
            let len = s.chars().count();
            if let Some(min) = min_length.filter(|min| len < *min) {
                errors.push(format!(
                    "Ensure this value has at least {min} characters (it has {len})."
                ));
            }
            if let Some(max) = max_length.filter(|max| len > *max) {
                errors.push(format!(
                    "Ensure this value has at most {max} characters (it has {len})."
                ));
            }
            Value::String(s.to_string())
        }

        FormFieldType::Integer {
            min_value,
            max_value,
        } => match raw_str.trim().parse::<i64>() {
            Ok(n) => {
                if let Some(min) = min_value.filter(|min| n < *min) {
                    errors.push(format!("Ensure this value is greater than or equal to {min}."));
                }
                if let Some(max) = max_value.filter(|max| n > *max) {
                    errors.push(format!("Ensure this value is less than or equal to {max}."));
                }
                Value::Int(n)
            }
            Err(_) => return Err(vec![field.message("invalid", || "Enter a whole number.".into())]),
        },

        FormFieldType::Float {
            min_value,
            max_value,
        } => match raw_str.trim().parse::<f64>() {
            Ok(n) => {
                if let Some(min) = min_value.filter(|min| n < *min) {
                    errors.push(format!("Ensure this value is greater than or equal to {min}."));
                }
                if let Some(max) = max_value.filter(|max| n > *max) {
                    errors.push(format!("Ensure this value is less than or equal to {max}."));
                }
                Value::Float(n)
            }
            Err(_) => return Err(vec![field.message("invalid", || "Enter a number.".into())]),
        },

        FormFieldType::Boolean => Value::Bool(true),

        FormFieldType::NullBoolean => match raw_str.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" | "2" => Value::Bool(true),
            "false" | "0" | "no" | "off" | "3" => Value::Bool(false),
            "null" | "none" | "unknown" => Value::Null,
            _ => return Err(vec!["Select a valid choice.".to_string()]),
        },

        FormFieldType::Date => match chrono::NaiveDate::parse_from_str(raw_str.trim(), "%Y-%m-%d") {
            Ok(d) => Value::Date(d),
            Err(_) => return Err(vec![field.message("invalid", || "Enter a valid date.".into())]),
        },

        FormFieldType::DateTime => {
            let s = raw_str.trim();
            let parsed = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
                .iter()
                .find_map(|fmt| chrono::NaiveDateTime::parse_from_str(s, fmt).ok())
                .or_else(|| {
                    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                });
            match parsed {
                Some(dt) => Value::DateTime(dt),
                None => {
                    return Err(vec![
                        field.message("invalid", || "Enter a valid date/time.".into()),
                    ])
                }
            }
        }

        FormFieldType::Time => {
            let s = raw_str.trim();
            match chrono::NaiveTime::parse_from_str(s, "%H:%M:%S")
                .or_else(|_| chrono::NaiveTime::parse_from_str(s, "%H:%M"))
            {
                Ok(t) => Value::Time(t),
                Err(_) => return Err(vec![field.message("invalid", || "Enter a valid time.".into())]),
            }
        }

        FormFieldType::Email => {
            let s = raw_str.trim();
            if !EMAIL_RE.is_match(s) {
                errors.push(field.message("invalid", || "Enter a valid e-mail address.".into()));
            }
            Value::String(s.to_string())
        }

        FormFieldType::Url => {
            let s = raw_str.trim();
            if !URL_RE.is_match(s) {
                errors.push(field.message("invalid", || "Enter a valid URL.".into()));
            }
            Value::String(s.to_string())
        }

        FormFieldType::Slug => {
            let s = raw_str.trim();
            if !SLUG_RE.is_match(s) {
                errors.push(field.message("invalid", || {
                    "Enter a valid 'slug' consisting of letters, numbers, underscores or hyphens."
                        .into()
                }));
            }
            Value::String(s.to_string())
        }

        FormFieldType::Choice { choices } => {
            if !choices.iter().any(|(v, _)| v == raw_str) {
                errors.push(format!(
                    "Select a valid choice. That choice is not one of the available choices: {raw_str}"
                ));
            }
            Value::String(raw_str.to_string())
        }

        FormFieldType::Regex { regex } => {
            let re = Regex::new(regex).map_err(|e| vec![format!("Invalid pattern: {e}")])?;
            if !re.is_match(raw_str) {
                errors.push(field.message("invalid", || "Enter a valid value.".into()));
            }
            Value::String(raw_str.to_string())
        }
    };

    if errors.is_empty() {
        for check in &field.validators {
            if let Err(e) = check(&value) {
                errors.push(e);
            }
        }
    }

    if errors.is_empty() {
        Ok(value)
    } else {
        Err(errors)
    }
}

/// Browsers send `on` for a ticked checkbox and nothing otherwise.
fn is_checked(raw: &str) -> bool {
    !matches!(raw.to_lowercase().as_str(), "" | "false" | "0" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_field_strips_and_limits() {
        let field = FormFieldDef::new(
            "name",
            FormFieldType::Char {
                min_length: Some(2),
                max_length: Some(5),
                strip: true,
            },
        );
        assert_eq!(
            clean_field_value(&field, Some("  Ann ")),
            Ok(Value::String("Ann".into()))
        );
        let errors = clean_field_value(&field, Some("Bartholomew")).unwrap_err();
        assert!(errors[0].contains("at most 5"));
        let errors = clean_field_value(&field, Some("A")).unwrap_err();
        assert!(errors[0].contains("at least 2"));
    }

    #[test]
    fn test_required_and_optional_empty_values() {
        let required = FormFieldDef::char("name");
        assert_eq!(
            clean_field_value(&required, None),
            Err(vec!["This field is required.".to_string()])
        );
        assert!(clean_field_value(&required, Some("   ")).is_err());

        let optional = FormFieldDef::integer("n").required(false).initial(3);
        assert_eq!(clean_field_value(&optional, Some("")), Ok(Value::Null));
    }

    #[test]
    fn test_custom_required_message() {
        let field = FormFieldDef::char("name").error_message("required", "Name please.");
        assert_eq!(
            clean_field_value(&field, None),
            Err(vec!["Name please.".to_string()])
        );
    }

    #[test]
    fn test_integer_field() {
        let field = FormFieldDef::new(
            "age",
            FormFieldType::Integer {
                min_value: Some(0),
                max_value: Some(150),
            },
        );
        assert_eq!(clean_field_value(&field, Some("42")), Ok(Value::Int(42)));
        assert_eq!(
            clean_field_value(&field, Some("abc")),
            Err(vec!["Enter a whole number.".to_string()])
        );
        assert!(clean_field_value(&field, Some("-1")).unwrap_err()[0].contains("greater than"));
        assert!(clean_field_value(&field, Some("200")).unwrap_err()[0].contains("less than"));
    }

    #[test]
    fn test_boolean_field() {
        let optional = FormFieldDef::new("delete", FormFieldType::Boolean).required(false);
        assert_eq!(clean_field_value(&optional, Some("on")), Ok(Value::Bool(true)));
        assert_eq!(clean_field_value(&optional, None), Ok(Value::Bool(false)));
        assert_eq!(clean_field_value(&optional, Some("false")), Ok(Value::Bool(false)));

        let required = FormFieldDef::new("agree", FormFieldType::Boolean);
        assert!(clean_field_value(&required, Some("off")).is_err());
    }

    #[test]
    fn test_null_boolean_field() {
        let field = FormFieldDef::new("ok", FormFieldType::NullBoolean).required(false);
        assert_eq!(clean_field_value(&field, Some("yes")), Ok(Value::Bool(true)));
        assert_eq!(clean_field_value(&field, Some("0")), Ok(Value::Bool(false)));
        assert_eq!(clean_field_value(&field, Some("unknown")), Ok(Value::Null));
        assert!(clean_field_value(&field, Some("maybe")).is_err());
    }

    #[test]
    fn test_date_and_time_fields() {
        let date = FormFieldDef::new("d", FormFieldType::Date);
        assert_eq!(
            clean_field_value(&date, Some("2008-03-01")),
            Ok(Value::Date(chrono::NaiveDate::from_ymd_opt(2008, 3, 1).unwrap()))
        );
        assert!(clean_field_value(&date, Some("03/01/2008")).is_err());

        let dt = FormFieldDef::new("dt", FormFieldType::DateTime);
        let expected = chrono::NaiveDate::from_ymd_opt(2008, 3, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(
            clean_field_value(&dt, Some("2008-03-01T10:30")),
            Ok(Value::DateTime(expected))
        );

        let time = FormFieldDef::new("t", FormFieldType::Time);
        assert_eq!(
            clean_field_value(&time, Some("10:30")),
            Ok(Value::Time(chrono::NaiveTime::from_hms_opt(10, 30, 0).unwrap()))
        );
    }

    #[test]
    fn test_pattern_fields() {
        let email = FormFieldDef::new("email", FormFieldType::Email);
        assert!(clean_field_value(&email, Some("joe@example.com")).is_ok());
        assert!(clean_field_value(&email, Some("joe@")).is_err());

        let url = FormFieldDef::new("url", FormFieldType::Url);
        assert!(clean_field_value(&url, Some("http://example.com/a")).is_ok());
        assert!(clean_field_value(&url, Some("example")).is_err());

        let slug = FormFieldDef::new("slug", FormFieldType::Slug);
        assert!(clean_field_value(&slug, Some("a-slug_1")).is_ok());
        assert!(clean_field_value(&slug, Some("not a slug")).is_err());

        let code = FormFieldDef::new(
            "code",
            FormFieldType::Regex {
                regex: r"^[A-Z]{3}$".into(),
            },
        );
        assert!(clean_field_value(&code, Some("ABC")).is_ok());
        assert!(clean_field_value(&code, Some("abcd")).is_err());
    }

    #[test]
    fn test_choice_field() {
        let field = FormFieldDef::new(
            "size",
            FormFieldType::Choice {
                choices: vec![("s".into(), "Small".into()), ("l".into(), "Large".into())],
            },
        );
        assert_eq!(clean_field_value(&field, Some("s")), Ok(Value::String("s".into())));
        assert!(clean_field_value(&field, Some("m")).is_err());
    }

    #[test]
    fn test_validators_run_after_coercion() {
        let field = FormFieldDef::integer("even").validator(|v| match v.as_int() {
            Some(n) if n % 2 == 0 => Ok(()),
            _ => Err("Must be even.".to_string()),
        });
        assert!(clean_field_value(&field, Some("4")).is_ok());
        assert_eq!(
            clean_field_value(&field, Some("3")),
            Err(vec!["Must be even.".to_string()])
        );
        assert_eq!(
            clean_field_value(&field, Some("x")),
            Err(vec!["Enter a whole number.".to_string()])
        );
    }
}
