//! The WHERE clause tree.
//!
//! Leaves are [`Constraint`]s: one column of one alias compared with a
//! lookup operator. Inner nodes join children with AND or OR and may be
//! negated. Compiling a node yields a [`WhereSql`], which distinguishes
//! "no restriction" and "nothing can match" from real SQL so that an empty
//! `in` list never turns into invalid syntax.

use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use relq_core::{RelqError, RelqResult};

use super::compiler::{DateKind, SqlCompiler};
use super::lookups::LookupType;
use super::query::Query;
use crate::fields::FieldType;
use crate::value::Value;

/// How the children of a node are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Connector {
    /// All children must hold.
    And,
    /// At least one child must hold.
    Or,
}

impl Connector {
    const fn joiner(self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "AND",
            Self::Or => "OR",
        })
    }
}

/// The right-hand side of a constraint.
#[derive(Debug, Clone)]
pub enum LookupValue {
    /// A single bound value.
    Value(Value),
    /// The members of an `in` lookup.
    List(Vec<Value>),
    /// The bounds of a `range` lookup.
    Range(Value, Value),
    /// A nested query for `in`, compiled inline.
    Query(Box<Query>),
}

/// A single comparison of one column.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// The table alias, or `None` for an unqualified column.
    pub alias: Option<String>,
    /// The column name.
    pub column: String,
    /// The type of the compared field, when known.
    pub field_type: Option<FieldType>,
    /// The comparison operator.
    pub lookup: LookupType,
    /// The compared value.
    pub value: LookupValue,
}

impl Constraint {
    /// Creates a constraint on `alias.column`.
    pub fn new(
        alias: impl Into<String>,
        column: impl Into<String>,
        lookup: LookupType,
        value: LookupValue,
    ) -> Self {
        Self {
            alias: Some(alias.into()),
            column: column.into(),
            field_type: None,
            lookup,
            value,
        }
    }

    /// Records the compared field's type.
    #[must_use]
    pub fn with_field_type(mut self, field_type: Option<FieldType>) -> Self {
        self.field_type = field_type;
        self
    }

    fn lhs(&self, compiler: &SqlCompiler) -> String {
        match &self.alias {
            Some(alias) => compiler.qualified(alias, &self.column),
            None => compiler.quote_name(&self.column),
        }
    }

    fn as_sql(&self, compiler: &SqlCompiler, params: &mut Vec<Value>) -> RelqResult<WhereSql> {
        let lhs = self.lhs(compiler);
        let sql = match (self.lookup, &self.value) {
            (LookupType::IsNull, LookupValue::Value(v)) => {
                if isnull_flag(v) {
                    format!("{lhs} IS NULL")
                } else {
                    format!("{lhs} IS NOT NULL")
                }
            }
            (LookupType::In, LookupValue::List(values)) => {
                if values.is_empty() {
                    return Ok(WhereSql::MatchNothing);
                }
                let marks: Vec<String> = values
                    .iter()
                    .map(|v| compiler.placeholder(params, v.clone()))
                    .collect();
                format!("{lhs} IN ({})", marks.join(", "))
            }
            (LookupType::In, LookupValue::Query(inner)) => {
                let sub = inner.compile_nested(compiler, params)?;
                format!("{lhs} IN ({sub})")
            }
            (LookupType::Range, LookupValue::Range(low, high)) => {
                let low = compiler.placeholder(params, low.clone());
                let high = compiler.placeholder(params, high.clone());
                format!("{lhs} BETWEEN {low} AND {high}")
            }
            (LookupType::Year, LookupValue::Value(v)) => {
                let (first, last) = self.year_bounds(v)?;
                let first = compiler.placeholder(params, first);
                let last = compiler.placeholder(params, last);
                format!("{lhs} BETWEEN {first} AND {last}")
            }
            (LookupType::Month | LookupType::Day, LookupValue::Value(v)) => {
                let kind = if self.lookup == LookupType::Month {
                    DateKind::Month
                } else {
                    DateKind::Day
                };
                let n = date_part(self.lookup, v)?;
                let mark = compiler.placeholder(params, Value::Int(n));
                format!("{} = {mark}", compiler.date_extract_sql(kind, &lhs))
            }
            (lookup, LookupValue::Value(v)) => {
                let template = compiler.operator_sql(lookup).ok_or_else(|| {
                    RelqError::field(format!(
                        "Invalid value for the '{lookup}' lookup on '{}'",
                        self.column
                    ))
                })?;
                let value = if lookup.is_pattern() || lookup == LookupType::IExact {
                    let raw = v.as_str().map_or_else(|| v.to_string(), str::to_string);
                    Value::String(compiler.prep_text(lookup, &raw))
                } else {
                    v.clone()
                };
                let mark = compiler.placeholder(params, value);
                format!(
                    "{} {}",
                    compiler.lookup_cast(lookup, &lhs),
                    template.replace("%s", &mark)
                )
            }
            (lookup, _) => {
                return Err(RelqError::field(format!(
                    "Invalid value for the '{lookup}' lookup on '{}'",
                    self.column
                )))
            }
        };
        Ok(WhereSql::Sql(sql))
    }

    fn year_bounds(&self, value: &Value) -> RelqResult<(Value, Value)> {
        let year = i32::try_from(date_part(LookupType::Year, value)?)
            .map_err(|_| RelqError::field(format!("Invalid year: {value}")))?;
        let first = NaiveDate::from_ymd_opt(year, 1, 1);
        let last = NaiveDate::from_ymd_opt(year, 12, 31);
        let (Some(first), Some(last)) = (first, last) else {
            return Err(RelqError::field(format!("Invalid year: {year}")));
        };
        if matches!(self.field_type, Some(FieldType::DateTimeField)) {
            let start = first.and_hms_opt(0, 0, 0);
            let end = last.and_hms_micro_opt(23, 59, 59, 999_999);
            if let (Some(start), Some(end)) = (start, end) {
                return Ok((Value::DateTime(start), Value::DateTime(end)));
            }
        }
        Ok((Value::Date(first), Value::Date(last)))
    }
}

/// Reads the value of an `isnull` lookup; anything not falsy means "is null".
pub(crate) fn isnull_flag(value: &Value) -> bool {
    value.truthy().unwrap_or(!value.is_null())
}

fn date_part(lookup: LookupType, value: &Value) -> RelqResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| RelqError::field(format!("Invalid value for '{lookup}': '{s}'"))),
        other => Err(RelqError::field(format!(
            "Invalid value for '{lookup}': {other}"
        ))),
    }
}

/// One child of a [`WhereNode`].
#[derive(Debug, Clone)]
pub enum WhereChild {
    /// A leaf comparison.
    Constraint(Constraint),
    /// A nested group.
    Node(WhereNode),
    /// Matches every row; keeps an unconstrained side of an OR from
    /// narrowing the result.
    Everything,
}

/// Result of compiling part of a WHERE tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhereSql {
    /// No restriction.
    MatchAll,
    /// No row can match.
    MatchNothing,
    /// A SQL condition.
    Sql(String),
}

impl WhereSql {
    fn negate(self, negated: bool) -> Self {
        if !negated {
            return self;
        }
        match self {
            Self::MatchAll => Self::MatchNothing,
            Self::MatchNothing => Self::MatchAll,
            sql @ Self::Sql(_) => sql,
        }
    }
}

/// A boolean group of constraints.
#[derive(Debug, Clone)]
pub struct WhereNode {
    /// How children combine.
    pub connector: Connector,
    /// Whether the whole group is negated.
    pub negated: bool,
    /// The group members.
    pub children: Vec<WhereChild>,
}

impl Default for WhereNode {
    fn default() -> Self {
        Self::new(Connector::And)
    }
}

impl WhereNode {
    /// Creates an empty node.
    pub const fn new(connector: Connector) -> Self {
        Self {
            connector,
            negated: false,
            children: Vec::new(),
        }
    }

    /// Creates a node from existing children.
    pub const fn with_children(
        connector: Connector,
        negated: bool,
        children: Vec<WhereChild>,
    ) -> Self {
        Self {
            connector,
            negated,
            children,
        }
    }

    /// Returns `true` if the node has no children.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of direct children.
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Adds a child, combining it with the existing children through
    /// `connector`.
    ///
    /// A node with fewer than two children simply takes the new connector.
    /// Otherwise, if the connectors differ, the existing children are pushed
    /// down into a new group first. A non-negated child node with the same
    /// connector, or a single child, is flattened into this one.
    pub fn add(&mut self, child: WhereChild, connector: Connector) {
        if self.negated {
            if self.children.is_empty() {
                self.negated = false;
            } else {
                let inner = std::mem::take(self);
                self.children.push(WhereChild::Node(inner));
            }
        }
        if self.children.len() < 2 {
            self.connector = connector;
        }
        if self.connector == connector {
            match child {
                WhereChild::Node(node)
                    if !node.negated
                        && (node.connector == connector || node.children.len() == 1) =>
                {
                    self.children.extend(node.children);
                }
                WhereChild::Node(node) if node.children.is_empty() => {}
                other => self.children.push(other),
            }
        } else {
            let existing = Self {
                connector: self.connector,
                negated: false,
                children: std::mem::take(&mut self.children),
            };
            self.connector = connector;
            self.children = vec![WhereChild::Node(existing), child];
        }
    }

    /// Rewrites every alias referenced by leaves through `change_map`.
    pub fn relabel_aliases(&mut self, change_map: &HashMap<String, String>) {
        for child in &mut self.children {
            match child {
                WhereChild::Constraint(c) => {
                    if let Some(new) = c.alias.as_ref().and_then(|a| change_map.get(a)) {
                        c.alias = Some(new.clone());
                    }
                }
                WhereChild::Node(node) => node.relabel_aliases(change_map),
                WhereChild::Everything => {}
            }
        }
    }

    /// Visits every leaf.
    pub fn constraints(&self) -> Vec<&Constraint> {
        let mut out = Vec::new();
        for child in &self.children {
            match child {
                WhereChild::Constraint(c) => out.push(c),
                WhereChild::Node(node) => out.extend(node.constraints()),
                WhereChild::Everything => {}
            }
        }
        out
    }

    /// Compiles the node. Parameters are appended to `params`; anything
    /// pushed by children that end up discarded is rolled back.
    ///
    /// A node with no children compiles to [`WhereSql::MatchAll`] whether or
    /// not it is negated: it carries no constraint to negate.
    pub fn as_sql(&self, compiler: &SqlCompiler, params: &mut Vec<Value>) -> RelqResult<WhereSql> {
        if self.children.is_empty() {
            return Ok(WhereSql::MatchAll);
        }
        let mark = params.len();
        let mut parts = Vec::new();
        for child in &self.children {
            let compiled = match child {
                WhereChild::Constraint(c) => c.as_sql(compiler, params)?,
                WhereChild::Node(node) => node.as_sql(compiler, params)?,
                WhereChild::Everything => WhereSql::MatchAll,
            };
            match (compiled, self.connector) {
                (WhereSql::Sql(sql), _) => parts.push(sql),
                (WhereSql::MatchAll, Connector::Or) => {
                    params.truncate(mark);
                    return Ok(WhereSql::MatchAll.negate(self.negated));
                }
                (WhereSql::MatchNothing, Connector::And) => {
                    params.truncate(mark);
                    return Ok(WhereSql::MatchNothing.negate(self.negated));
                }
                (WhereSql::MatchAll, Connector::And) | (WhereSql::MatchNothing, Connector::Or) => {}
            }
        }
        if parts.is_empty() {
            params.truncate(mark);
            let all = match self.connector {
                Connector::And => WhereSql::MatchAll,
                Connector::Or => WhereSql::MatchNothing,
            };
            return Ok(all.negate(self.negated));
        }
        let joined = parts.join(self.connector.joiner());
        let sql = if self.negated {
            format!("NOT ({joined})")
        } else if parts.len() > 1 {
            format!("({joined})")
        } else {
            joined
        };
        Ok(WhereSql::Sql(sql))
    }
}
