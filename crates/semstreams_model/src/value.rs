//! Dynamically typed property values.
//!
//! Payloads expose arbitrary JSON as properties, so property values are the
//! tagged sum over {string, number, bool, null, object, array} that
//! `serde_json::Value` already is. This module adds the comparison semantics
//! the engine needs: numeric coercion when both sides parse as numbers,
//! lexicographic comparison for strings, and a classified failure on
//! mismatched types.

use serde_json::Value;

use crate::error::{Classified, ErrorClass};

/// Failure to compare two property values.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CompareError {
    /// The two operands have no common comparable representation.
    #[error("cannot compare {left} with {right}")]
    Mismatched {
        /// JSON type name of the left operand.
        left: &'static str,
        /// JSON type name of the right operand.
        right: &'static str,
    },
}

impl Classified for CompareError {
    fn class(&self) -> ErrorClass {
        ErrorClass::InvalidInput
    }
}

/// JSON type name for diagnostics.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Coerce a value to `f64` when it is a number or a string that parses as
/// one.
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Returns `true` if the value is a scalar (string, number or bool).
///
/// Scalars are what the predicate index canonicalises; objects, arrays and
/// nulls are never index keys.
#[must_use]
pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Canonical string form of a scalar, used as the object half of predicate
/// index keys. Non-scalars return `None`.
#[must_use]
pub fn canonical_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Ordered comparison of two property values.
///
/// Numbers (or strings that parse as numbers on both sides) compare
/// numerically; strings compare lexicographically; booleans compare as
/// false < true.
///
/// # Errors
///
/// Returns [`CompareError::Mismatched`] when the operands have no common
/// comparable representation.
pub fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, CompareError> {
    if let (Some(l), Some(r)) = (as_number(left), as_number(right)) {
        return Ok(l.partial_cmp(&r).unwrap_or(std::cmp::Ordering::Equal));
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => Ok(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Ok(l.cmp(r)),
        _ => Err(CompareError::Mismatched {
            left: type_name(left),
            right: type_name(right),
        }),
    }
}

/// Equality with the same coercion rules as [`compare`], but total: values
/// with no common representation are simply unequal.
#[must_use]
pub fn loosely_equal(left: &Value, right: &Value) -> bool {
    match compare(left, right) {
        Ok(ord) => ord == std::cmp::Ordering::Equal,
        Err(_) => left == right,
    }
}
