//! Condition evaluation.
//!
//! Comparison operators coerce numerically when both sides parse as
//! numbers, lexicographically for strings, and fail as invalid input on
//! mismatched types (which evaluates the condition false and is logged by
//! the engine).

use serde_json::Value;

use semstreams_model::value::{compare, loosely_equal};
use semstreams_net::api::FilterOp;

use crate::config::{ConditionSpec, Logic};
use crate::error::RuleError;

/// Walk a dotted path into a JSON payload.
#[must_use]
pub fn field_at<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = payload;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Evaluate one condition against a payload.
///
/// # Errors
///
/// Returns [`RuleError::Compare`] when an ordered comparison meets
/// incomparable operands.
pub fn evaluate(payload: &Value, condition: &ConditionSpec) -> Result<bool, RuleError> {
    let actual = field_at(payload, &condition.field);
    match condition.op {
        FilterOp::Exists => Ok(actual.is_some()),
        FilterOp::Eq => Ok(actual.is_some_and(|a| loosely_equal(a, &condition.value))),
        FilterOp::Ne => Ok(actual.is_some_and(|a| !loosely_equal(a, &condition.value))),
        FilterOp::Contains => Ok(actual.is_some_and(|a| contains(a, &condition.value))),
        FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
            let Some(actual) = actual else {
                return Ok(false);
            };
            let ordering = compare(actual, &condition.value)?;
            Ok(match condition.op {
                FilterOp::Lt => ordering == std::cmp::Ordering::Less,
                FilterOp::Le => ordering != std::cmp::Ordering::Greater,
                FilterOp::Gt => ordering == std::cmp::Ordering::Greater,
                FilterOp::Ge => ordering != std::cmp::Ordering::Less,
                _ => unreachable!("ordered ops only"),
            })
        }
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, expected)),
        _ => false,
    }
}

/// Evaluate a condition list under `and`/`or` logic.
///
/// Incomparable conditions count as false rather than aborting the whole
/// rule; the error is reported to the caller alongside the verdict.
#[must_use]
pub fn evaluate_all(
    payload: &Value,
    conditions: &[ConditionSpec],
    logic: Logic,
) -> (bool, Vec<RuleError>) {
    if conditions.is_empty() {
        return (false, Vec::new());
    }
    let mut errors = Vec::new();
    let mut verdicts = conditions.iter().map(|condition| {
        evaluate(payload, condition).unwrap_or_else(|e| {
            errors.push(e);
            false
        })
    });
    let verdict = match logic {
        Logic::And => verdicts.all(|v| v),
        Logic::Or => verdicts.any(|v| v),
    };
    (verdict, errors)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn spec(field: &str, op: FilterOp, value: Value) -> ConditionSpec {
        ConditionSpec {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_numeric_comparison_with_coercion() {
        let payload = json!({"properties": {"battery": "15.5"}});
        assert!(evaluate(&payload, &spec("properties.battery", FilterOp::Lt, json!(20))).unwrap());
        assert!(!evaluate(&payload, &spec("properties.battery", FilterOp::Ge, json!(20))).unwrap());
    }

    #[test]
    fn test_string_comparison() {
        let payload = json!({"status": "critical"});
        assert!(evaluate(&payload, &spec("status", FilterOp::Eq, json!("critical"))).unwrap());
        assert!(evaluate(&payload, &spec("status", FilterOp::Contains, json!("crit"))).unwrap());
    }

    #[test]
    fn test_exists_and_missing_fields() {
        let payload = json!({"a": {"b": 1}});
        assert!(evaluate(&payload, &spec("a.b", FilterOp::Exists, json!(null))).unwrap());
        assert!(!evaluate(&payload, &spec("a.c", FilterOp::Exists, json!(null))).unwrap());
        // Ordered comparison on a missing field is simply false.
        assert!(!evaluate(&payload, &spec("a.c", FilterOp::Lt, json!(5))).unwrap());
    }

    #[test]
    fn test_mismatched_types_error() {
        let payload = json!({"a": {"nested": true}});
        let err = evaluate(&payload, &spec("a", FilterOp::Lt, json!(5))).unwrap_err();
        assert!(matches!(err, RuleError::Compare(_)));
    }

    #[test]
    fn test_and_or_logic() {
        let payload = json!({"battery": 15, "status": "ok"});
        let conditions = vec![
            spec("battery", FilterOp::Lt, json!(20)),
            spec("status", FilterOp::Eq, json!("critical")),
        ];
        let (and_verdict, _) = evaluate_all(&payload, &conditions, Logic::And);
        let (or_verdict, _) = evaluate_all(&payload, &conditions, Logic::Or);
        assert!(!and_verdict);
        assert!(or_verdict);
    }

    #[test]
    fn test_array_contains() {
        let payload = json!({"tags": ["rescue", "active"]});
        assert!(evaluate(&payload, &spec("tags", FilterOp::Contains, json!("rescue"))).unwrap());
        assert!(!evaluate(&payload, &spec("tags", FilterOp::Contains, json!("idle"))).unwrap());
    }

    #[test]
    fn test_empty_condition_list_never_fires() {
        let (verdict, errors) = evaluate_all(&json!({}), &[], Logic::And);
        assert!(!verdict);
        assert!(errors.is_empty());
    }
}
