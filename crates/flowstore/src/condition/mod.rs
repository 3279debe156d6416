//! Boolean condition trees for entity search.
//!
//! A [`Condition`] is either a single comparison against a payload field or an
//! `AND`/`OR` group of nested conditions. Trees deserialize from the JSON
//! shape callers already produce:
//!
//! ```json
//! {
//!   "type": "group",
//!   "operator": "AND",
//!   "conditions": [
//!     {"type": "simple", "jsonPath": "$.status", "operatorType": "EQUALS", "value": "NEW"},
//!     {"type": "simple", "jsonPath": "$.total", "operatorType": "GREATER_OR_EQUAL", "value": 10}
//!   ]
//! }
//! ```
//!
//! Trees are compiled once into a [`Predicate`] via [`Condition::compile`].
//! Compilation rejects unsupported operators and bad paths up front; a type
//! mismatch inside an otherwise valid comparison simply evaluates to `false`.

mod compile;
mod path;

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

pub use compile::Predicate;
pub use path::FieldPath;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEqual,
    /// Case-insensitive string equality.
    IEquals,
    /// Array membership or substring containment.
    Contains,
    /// Case-insensitive [`Operator::Contains`].
    IContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    IsNull,
    NotNull,
}

impl Operator {
    /// Wire name of the operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::NotEqual => "NOT_EQUAL",
            Operator::IEquals => "IEQUALS",
            Operator::Contains => "CONTAINS",
            Operator::IContains => "ICONTAINS",
            Operator::StartsWith => "STARTS_WITH",
            Operator::EndsWith => "ENDS_WITH",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::LessThan => "LESS_THAN",
            Operator::GreaterOrEqual => "GREATER_OR_EQUAL",
            Operator::LessOrEqual => "LESS_OR_EQUAL",
            Operator::IsNull => "IS_NULL",
            Operator::NotNull => "NOT_NULL",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_ascii_uppercase().as_str() {
            "EQUALS" => Operator::Equals,
            "NOT_EQUAL" => Operator::NotEqual,
            "IEQUALS" => Operator::IEquals,
            "CONTAINS" => Operator::Contains,
            "ICONTAINS" => Operator::IContains,
            "STARTS_WITH" => Operator::StartsWith,
            "ENDS_WITH" => Operator::EndsWith,
            "GREATER_THAN" => Operator::GreaterThan,
            "LESS_THAN" => Operator::LessThan,
            "GREATER_OR_EQUAL" => Operator::GreaterOrEqual,
            "LESS_OR_EQUAL" => Operator::LessOrEqual,
            "IS_NULL" => Operator::IsNull,
            "NOT_NULL" => Operator::NotNull,
            other => {
                return Err(Error::MalformedCondition(format!(
                    "unsupported operator {other:?}"
                )));
            }
        };
        Ok(op)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Group combinators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupOperator {
    And,
    Or,
}

impl GroupOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupOperator::And => "AND",
            GroupOperator::Or => "OR",
        }
    }
}

impl FromStr for GroupOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AND" => Ok(GroupOperator::And),
            "OR" => Ok(GroupOperator::Or),
            other => Err(Error::MalformedCondition(format!(
                "unsupported group operator {other:?}"
            ))),
        }
    }
}

/// A single field comparison.
///
/// Operator names are kept as written so that trees built by callers
/// round-trip unchanged; they are validated by [`Condition::compile`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparison {
    pub json_path: String,
    pub operator_type: String,
    #[serde(default)]
    pub value: Value,
}

/// An ordered `AND`/`OR` combination of child conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub operator: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A boolean condition tree over entity payload fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Condition {
    Simple(Comparison),
    Group(Group),
}

impl Condition {
    /// A comparison using a typed operator.
    pub fn simple(path: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Condition::Simple(Comparison {
            json_path: path.into(),
            operator_type: operator.as_str().to_string(),
            value: value.into(),
        })
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(path, Operator::Equals, value)
    }

    pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(path, Operator::Contains, value)
    }

    pub fn greater_or_equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(path, Operator::GreaterOrEqual, value)
    }

    pub fn less_or_equal(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::simple(path, Operator::LessOrEqual, value)
    }

    /// A group with the given combinator.
    pub fn group(operator: GroupOperator, conditions: Vec<Condition>) -> Self {
        Condition::Group(Group {
            operator: operator.as_str().to_string(),
            conditions,
        })
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::group(GroupOperator::And, conditions)
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Self::group(GroupOperator::Or, conditions)
    }

    /// The empty condition: matches every record.
    pub fn all() -> Self {
        Self::and(vec![])
    }

    /// Compile the tree into a reusable predicate.
    ///
    /// Fails with [`Error::MalformedCondition`] on unsupported operators or
    /// malformed paths anywhere in the tree.
    pub fn compile(&self) -> crate::Result<Predicate> {
        compile::compile(self)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::all()
    }
}
