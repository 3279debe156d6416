//! Compilation of condition trees into predicates.

use std::cmp::Ordering;

use serde_json::{Number, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use super::{Comparison, Condition, FieldPath, GroupOperator, Operator};
use crate::entity::EntityRecord;
use crate::error::Result;

type Eval = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// A compiled condition, evaluable against any number of payloads.
pub struct Predicate {
    eval: Eval,
}

impl Predicate {
    /// Evaluate against a payload document.
    pub fn matches(&self, payload: &Value) -> bool {
        (self.eval)(payload)
    }

    /// Evaluate against a record's payload.
    pub fn matches_record(&self, record: &EntityRecord) -> bool {
        self.matches(&record.payload)
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate").finish_non_exhaustive()
    }
}

pub(super) fn compile(condition: &Condition) -> Result<Predicate> {
    Ok(Predicate {
        eval: compile_node(condition)?,
    })
}

fn compile_node(condition: &Condition) -> Result<Eval> {
    match condition {
        Condition::Simple(comparison) => compile_comparison(comparison),
        Condition::Group(group) => {
            let operator: GroupOperator = group.operator.parse()?;
            let children = group
                .conditions
                .iter()
                .map(compile_node)
                .collect::<Result<Vec<_>>>()?;
            // An empty group of either kind is the empty filter.
            if children.is_empty() {
                return Ok(Box::new(|_: &Value| true));
            }
            let eval: Eval = match operator {
                GroupOperator::And => {
                    Box::new(move |payload: &Value| children.iter().all(|c| c(payload)))
                }
                GroupOperator::Or => {
                    Box::new(move |payload: &Value| children.iter().any(|c| c(payload)))
                }
            };
            Ok(eval)
        }
    }
}

fn compile_comparison(comparison: &Comparison) -> Result<Eval> {
    let operator: Operator = comparison.operator_type.parse()?;
    let path = FieldPath::parse(&comparison.json_path)?;
    let literal = comparison.value.clone();

    let eval: Eval = Box::new(move |payload: &Value| {
        let actual = path.resolve(payload).unwrap_or(&Value::Null);
        evaluate(operator, actual, &literal)
    });
    Ok(eval)
}

fn evaluate(operator: Operator, actual: &Value, literal: &Value) -> bool {
    match operator {
        Operator::Equals => values_equal(actual, literal),
        Operator::NotEqual => !values_equal(actual, literal),
        Operator::IEquals => match (actual, literal) {
            (Value::String(a), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        },
        Operator::Contains => contains(actual, literal, false),
        Operator::IContains => contains(actual, literal, true),
        Operator::StartsWith => match (actual, literal) {
            (Value::String(a), Value::String(b)) => a.starts_with(b.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (actual, literal) {
            (Value::String(a), Value::String(b)) => a.ends_with(b.as_str()),
            _ => false,
        },
        Operator::GreaterThan => compare_ordered(actual, literal) == Some(Ordering::Greater),
        Operator::LessThan => compare_ordered(actual, literal) == Some(Ordering::Less),
        Operator::GreaterOrEqual => matches!(
            compare_ordered(actual, literal),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::LessOrEqual => matches!(
            compare_ordered(actual, literal),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::IsNull => actual.is_null(),
        Operator::NotNull => !actual.is_null(),
    }
}

/// Structural equality with numbers compared by value (`1 == 1.0`).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

fn contains(actual: &Value, literal: &Value, ignore_case: bool) -> bool {
    match (actual, literal) {
        (Value::Array(items), _) => items.iter().any(|item| match (item, literal) {
            (Value::String(a), Value::String(b)) if ignore_case => {
                a.to_lowercase() == b.to_lowercase()
            }
            _ => values_equal(item, literal),
        }),
        (Value::String(haystack), Value::String(needle)) if ignore_case => haystack
            .to_lowercase()
            .contains(needle.to_lowercase().as_str()),
        (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
        _ => false,
    }
}

/// Order two values of the same ordered kind (numbers or dates).
///
/// Returns `None` for any other combination, which makes the ordering
/// operators evaluate to `false`.
fn compare_ordered(actual: &Value, literal: &Value) -> Option<Ordering> {
    match (actual, literal) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => {
            let a = parse_temporal(a)?;
            let b = parse_temporal(b)?;
            Some(a.cmp(&b))
        }
        _ => None,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Parse an RFC 3339 timestamp or a `YYYY-MM-DD` date (as midnight UTC).
fn parse_temporal(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(instant) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(instant);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}
