//! Error types for the relq crates.
//!
//! [`RelqError`] covers every failure the query engine and the formset engine
//! can report. Each variant belongs to one [`ErrorKind`], which is what callers
//! usually branch on: a bad lookup keyword is a resolution problem, a tampered
//! management payload is a validation problem, and so on.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Represents a validation error with optional field-level errors.
///
/// Validation errors can be either simple (a single message) or compound
/// (containing per-field error lists).
///
/// # Examples
///
/// ```
/// use relq_core::error::ValidationError;
///
/// let err = ValidationError::new("This field is required.", "required");
/// assert_eq!(err.to_string(), "This field is required.");
///
/// let mut field_errors = std::collections::HashMap::new();
/// field_errors.insert(
///     "headline".to_string(),
///     vec![ValidationError::new("Ensure this value has at most 100 characters.", "max_length")],
/// );
/// let err = ValidationError::with_field_errors(field_errors);
/// assert!(err.to_string().starts_with("headline:"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The primary error message.
    pub message: String,
    /// A short code identifying the failure (e.g. "required", "invalid").
    pub code: String,
    /// Additional parameters providing context for the error message.
    pub params: HashMap<String, String>,
    /// Per-field validation errors, keyed by field name.
    pub field_errors: HashMap<String, Vec<Self>>,
}

impl ValidationError {
    /// Creates a new `ValidationError` with a message and code.
    pub fn new(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            params: HashMap::new(),
            field_errors: HashMap::new(),
        }
    }

    /// Creates a `ValidationError` containing per-field errors.
    pub fn with_field_errors(field_errors: HashMap<String, Vec<Self>>) -> Self {
        Self {
            message: String::new(),
            code: String::new(),
            params: HashMap::new(),
            field_errors,
        }
    }

    /// Adds a parameter to this validation error.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.message.is_empty() {
            return write!(f, "{}", self.message);
        }
        let mut fields: Vec<_> = self.field_errors.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        let mut first = true;
        for (field, errors) in fields {
            for error in errors {
                if !first {
                    write!(f, "; ")?;
                }
                write!(f, "{field}: {error}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Broad category of a [`RelqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An unknown field, relation, or lookup keyword.
    Resolution,
    /// Malformed composite input such as a tampered management form.
    Validation,
    /// An illegal query shape, rejected before any SQL is generated.
    Structural,
    /// Raised by the execution collaborator and passed through unchanged.
    Backend,
    /// Missing or invalid configuration and schema registration problems.
    Configuration,
    /// A row lookup that did not return exactly one object.
    Lookup,
}

/// The error type for the relq crates.
#[derive(Error, Debug)]
pub enum RelqError {
    // ── Resolution ───────────────────────────────────────────────────

    /// A lookup keyword, field name, or ordering term could not be resolved.
    #[error("{0}")]
    FieldError(String),

    // ── Validation ───────────────────────────────────────────────────

    /// One or more values failed validation.
    #[error("Validation error: {0}")]
    ValidationError(ValidationError),

    // ── Structural ───────────────────────────────────────────────────

    /// The query cannot be built or compiled in its current shape.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Default ordering across relations revisited a model.
    #[error("Infinite loop caused by ordering on model '{model}'")]
    OrderingCycle {
        /// The model whose default ordering was entered twice.
        model: String,
    },

    // ── Lookup ───────────────────────────────────────────────────────

    /// A query expected exactly one result but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one result but found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    // ── Backend ──────────────────────────────────────────────────────

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The model schema or settings are inconsistent.
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RelqError {
    /// Returns the category this error belongs to.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::FieldError(_) => ErrorKind::Resolution,
            Self::ValidationError(_) => ErrorKind::Validation,
            Self::InvalidQuery(_) | Self::OrderingCycle { .. } => ErrorKind::Structural,
            Self::DoesNotExist(_) | Self::MultipleObjectsReturned(_) => ErrorKind::Lookup,
            Self::DatabaseError(_) | Self::IntegrityError(_) | Self::OperationalError(_) => {
                ErrorKind::Backend
            }
            Self::ConfigurationError(_)
            | Self::ImproperlyConfigured(_)
            | Self::SerializationError(_)
            | Self::IoError(_) => ErrorKind::Configuration,
        }
    }

    /// Shorthand for building a [`RelqError::FieldError`].
    pub fn field(message: impl Into<String>) -> Self {
        Self::FieldError(message.into())
    }

    /// Shorthand for building a [`RelqError::InvalidQuery`].
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

impl From<ValidationError> for RelqError {
    fn from(err: ValidationError) -> Self {
        Self::ValidationError(err)
    }
}

/// A convenience type alias for `Result<T, RelqError>`.
pub type RelqResult<T> = Result<T, RelqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display_simple() {
        let err = ValidationError::new("This field is required.", "required");
        assert_eq!(err.to_string(), "This field is required.");
    }

    #[test]
    fn test_validation_error_display_field_errors_sorted() {
        let mut field_errors = HashMap::new();
        field_errors.insert(
            "title".to_string(),
            vec![ValidationError::new("Too long.", "max_length")],
        );
        field_errors.insert(
            "choice".to_string(),
            vec![ValidationError::new("Required.", "required")],
        );
        let err = ValidationError::with_field_errors(field_errors);
        assert_eq!(err.to_string(), "choice: Required.; title: Too long.");
    }

    #[test]
    fn test_validation_error_with_param() {
        let err = ValidationError::new("Too short.", "min_length").with_param("min", "8");
        assert_eq!(err.params.get("min").unwrap(), "8");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(RelqError::field("x").kind(), ErrorKind::Resolution);
        assert_eq!(
            RelqError::ValidationError(ValidationError::new("x", "y")).kind(),
            ErrorKind::Validation
        );
        assert_eq!(RelqError::invalid_query("x").kind(), ErrorKind::Structural);
        assert_eq!(
            RelqError::OrderingCycle { model: "LoopX".into() }.kind(),
            ErrorKind::Structural
        );
        assert_eq!(RelqError::DatabaseError("x".into()).kind(), ErrorKind::Backend);
        assert_eq!(RelqError::IntegrityError("x".into()).kind(), ErrorKind::Backend);
        assert_eq!(RelqError::DoesNotExist("x".into()).kind(), ErrorKind::Lookup);
        assert_eq!(
            RelqError::ImproperlyConfigured("x".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_field_error_display_is_bare_message() {
        let err = RelqError::field("Cannot resolve keyword 'reporter_id' into field.");
        assert_eq!(
            err.to_string(),
            "Cannot resolve keyword 'reporter_id' into field."
        );
    }

    #[test]
    fn test_ordering_cycle_display() {
        let err = RelqError::OrderingCycle { model: "LoopY".into() };
        assert!(err.to_string().contains("Infinite loop"));
        assert!(err.to_string().contains("LoopY"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: RelqError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_validation_error_conversion() {
        let err: RelqError = ValidationError::new("tampered", "invalid").into();
        assert!(matches!(err, RelqError::ValidationError(_)));
    }
}
