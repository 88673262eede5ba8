//! Lookup operators and composable filter expressions.
//!
//! A lookup keyword such as `reporter__first_name__startswith` names a path
//! through relations followed by an optional operator. [`LookupType`] is the
//! operator; [`Q`] bundles keyword/value pairs into a boolean expression that
//! can be combined with `&`, `|` and `!` before it is applied to a query.

use std::fmt;
use std::ops;

use crate::value::Value;

/// Comparison operator at the end of a lookup keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupType {
    /// `= value`; the default when no operator is named.
    Exact,
    /// Case-insensitive equality.
    IExact,
    /// `LIKE %value%`.
    Contains,
    /// Case-insensitive `contains`.
    IContains,
    /// `> value`.
    Gt,
    /// `>= value`.
    Gte,
    /// `< value`.
    Lt,
    /// `<= value`.
    Lte,
    /// Membership in a list or subquery.
    In,
    /// `LIKE value%`.
    StartsWith,
    /// Case-insensitive `startswith`.
    IStartsWith,
    /// `LIKE %value`.
    EndsWith,
    /// Case-insensitive `endswith`.
    IEndsWith,
    /// `BETWEEN low AND high`.
    Range,
    /// `IS NULL` / `IS NOT NULL`.
    IsNull,
    /// Calendar year of a date column.
    Year,
    /// Month of a date column.
    Month,
    /// Day of month of a date column.
    Day,
    /// Regular expression match.
    Regex,
    /// Case-insensitive regular expression match.
    IRegex,
}

impl LookupType {
    /// Every operator, in keyword form.
    pub const ALL: [Self; 20] = [
        Self::Exact,
        Self::IExact,
        Self::Contains,
        Self::IContains,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::In,
        Self::StartsWith,
        Self::IStartsWith,
        Self::EndsWith,
        Self::IEndsWith,
        Self::Range,
        Self::IsNull,
        Self::Year,
        Self::Month,
        Self::Day,
        Self::Regex,
        Self::IRegex,
    ];

    /// The keyword spelling of the operator.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Range => "range",
            Self::IsNull => "isnull",
            Self::Year => "year",
            Self::Month => "month",
            Self::Day => "day",
            Self::Regex => "regex",
            Self::IRegex => "iregex",
        }
    }

    /// Parses a keyword into an operator.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Operators implemented with `LIKE`, whose values need escaping.
    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
        )
    }
}

impl fmt::Display for LookupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A composable filter expression.
///
/// # Examples
///
/// ```
/// use relq_db::query::lookups::Q;
///
/// let q = Q::filter("reporter__first_name", "John") | !Q::filter("headline__startswith", "Draft");
/// assert!(matches!(q, Q::Or(ref children) if children.len() == 2));
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Q {
    /// A single lookup keyword with its value.
    Filter {
        /// The lookup keyword, e.g. `"tags__name__in"`.
        key: String,
        /// The compared value.
        value: Value,
    },
    /// Logical AND of the children.
    And(Vec<Q>),
    /// Logical OR of the children.
    Or(Vec<Q>),
    /// Logical negation.
    Not(Box<Q>),
}

impl Q {
    /// A single lookup.
    pub fn filter(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Filter {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Several lookups that must all hold, applied as one filter call.
    pub fn all<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self::And(pairs.into_iter().map(|(k, v)| Self::filter(k, v)).collect())
    }

    /// A filter with no constraints.
    pub const fn empty() -> Self {
        Self::And(Vec::new())
    }

    /// Returns `true` for a connector with no children.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            Self::Not(inner) => inner.is_empty(),
            Self::Filter { .. } => false,
        }
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}
