//! Operations on runtime values.
//!
//! Runtime values are plain `serde_json::Value`s so that attributes,
//! arguments and return values can be bound without conversion.

use std::cmp::Ordering;

use serde_json::Value;

use super::ExpressionError;
use super::parser::CompareOp;

/// Short type name for error messages.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Require a boolean.
///
/// # Errors
///
/// Returns `ExpressionError::TypeMismatch` for any other value.
pub fn as_bool(value: &Value, what: &str) -> Result<bool, ExpressionError> {
    value.as_bool().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "{} must be boolean, got {}",
            what,
            type_name(value)
        ))
    })
}

/// Require a string.
///
/// # Errors
///
/// Returns `ExpressionError::TypeMismatch` for any other value.
pub fn as_str<'v>(value: &'v Value, what: &str) -> Result<&'v str, ExpressionError> {
    value.as_str().ok_or_else(|| {
        ExpressionError::type_mismatch(format!(
            "{} must be a string, got {}",
            what,
            type_name(value)
        ))
    })
}

/// Navigate to a named property.
///
/// Missing properties and navigation from `null` yield `null`.
///
/// # Errors
///
/// Returns `ExpressionError::TypeMismatch` when navigating from a scalar
/// or array.
pub fn property(value: &Value, name: &str) -> Result<Value, ExpressionError> {
    match value {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(ExpressionError::type_mismatch(format!(
            "cannot read property '{}' of {}",
            name,
            type_name(other)
        ))),
    }
}

/// Apply a comparison operator.
///
/// Equality is structural, except that numbers compare by numeric value.
/// Ordering is defined for two numbers or two strings.
///
/// # Errors
///
/// Returns `ExpressionError::TypeMismatch` when ordering incomparable values.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => Ok(equals(left, right)),
        CompareOp::Ne => Ok(!equals(left, right)),
        _ => {
            let ordering = order(left, right).ok_or_else(|| {
                ExpressionError::type_mismatch(format!(
                    "cannot compare {} {} {}",
                    type_name(left),
                    op.symbol(),
                    type_name(right)
                ))
            })?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
