//! Condition evaluation for workflow triggers.
//!
//! A condition is a structured predicate tree evaluated against the trigger
//! payload. Evaluation is pure and total: it performs no I/O, never errors,
//! and a malformed or missing field simply fails to match ("conservative
//! false"), so bad events can never fire a workflow.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum nesting depth accepted at workflow-save time.
pub const MAX_CONDITION_DEPTH: usize = 10;

/// Structured predicate over trigger payload fields.
///
/// Leaf operators compare one payload field against a literal; `all`, `any`
/// and `not` compose sub-conditions. Field references use dotted paths into
/// the payload (`contact.email`, `deal.items.0.sku`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    /// Nesting depth of this condition tree. A leaf has depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Condition::Eq { .. }
            | Condition::Ne { .. }
            | Condition::Gt { .. }
            | Condition::Gte { .. }
            | Condition::Lt { .. }
            | Condition::Lte { .. }
            | Condition::In { .. } => 1,
            Condition::All { conditions } | Condition::Any { conditions } => {
                1 + conditions.iter().map(Condition::depth).max().unwrap_or(0)
            }
            Condition::Not { condition } => 1 + condition.depth(),
        }
    }
}

/// Evaluate a condition against a trigger payload.
///
/// A field that is absent from the payload never satisfies a leaf predicate,
/// and ordering comparisons on non-numeric operands evaluate false rather
/// than erroring. Workflows without a condition are handled by the caller
/// (absent condition means always-true).
pub fn evaluate(condition: &Condition, payload: &Value) -> bool {
    match condition {
        Condition::Eq { field, value } => {
            lookup(payload, field).map(|v| v == value).unwrap_or(false)
        }
        Condition::Ne { field, value } => {
            lookup(payload, field).map(|v| v != value).unwrap_or(false)
        }
        Condition::Gt { field, value } => compare(payload, field, value, |l, r| l > r),
        Condition::Gte { field, value } => compare(payload, field, value, |l, r| l >= r),
        Condition::Lt { field, value } => compare(payload, field, value, |l, r| l < r),
        Condition::Lte { field, value } => compare(payload, field, value, |l, r| l <= r),
        Condition::In { field, values } => lookup(payload, field)
            .map(|v| values.contains(v))
            .unwrap_or(false),
        Condition::All { conditions } => conditions.iter().all(|c| evaluate(c, payload)),
        Condition::Any { conditions } => conditions.iter().any(|c| evaluate(c, payload)),
        Condition::Not { condition } => !evaluate(condition, payload),
    }
}

/// Resolve a dotted field path against the payload.
///
/// Shared with the field-update executor so record id references follow the
/// same path rules as condition fields.
pub(crate) fn lookup<'a>(payload: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in field.split('.') {
        if segment.is_empty() {
            return None;
        }
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                let index = segment.parse::<usize>().ok()?;
                current = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

fn compare(payload: &Value, field: &str, value: &Value, op: fn(f64, f64) -> bool) -> bool {
    let Some(left) = lookup(payload, field).and_then(as_f64) else {
        return false;
    };
    let Some(right) = as_f64(value) else {
        return false;
    };
    op(left, right)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}
