//! Decoded field values and literal coercion

use std::collections::BTreeMap;

use serde_json::{Number, Value};

/// Decoded telegram fields keyed by entity name
///
/// Ordered so that the same telegram always produces the same map.
pub type FieldMap = BTreeMap<String, Value>;

/// Coerce a profile literal into a field value
///
/// The textual form decides: a `.` means float, otherwise integer, and
/// anything that fails to parse as a number is kept as a string.
pub fn coerce_literal(literal: &Value) -> Value {
    match literal {
        Value::Bool(b) => Value::from(i64::from(*b)),
        Value::Number(n) => coerce_text(&n.to_string()),
        Value::String(s) => coerce_text(s),
        other => other.clone(),
    }
}

fn coerce_text(text: &str) -> Value {
    let trimmed = text.trim();
    if trimmed.contains('.') {
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    } else if let Ok(n) = trimmed.parse::<i64>() {
        return Value::from(n);
    }
    Value::String(text.to_string())
}

/// Truthiness of an evaluated value: non-zero numbers and non-empty strings
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Compare an expected value against a decoded one
///
/// Numbers compare numerically, so `1` matches `1.0`; strings compare
/// case-insensitively so `"ON"` matches `"on"`.
pub fn values_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => (a - b).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
        (Value::Bool(a), Value::Number(_)) => values_match(&Value::from(i64::from(*a)), actual),
        (Value::Number(_), Value::Bool(b)) => values_match(expected, &Value::from(i64::from(*b))),
        _ => expected == actual,
    }
}

/// Build a number value, preferring an integer when the value is whole
pub fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_integer_literal() {
        assert_eq!(coerce_literal(&json!("1")), json!(1));
        assert_eq!(coerce_literal(&json!(" 42 ")), json!(42));
        assert_eq!(coerce_literal(&json!(7)), json!(7));
        assert_eq!(coerce_literal(&json!("-3")), json!(-3));
    }

    #[test]
    fn test_coerce_float_literal() {
        assert_eq!(coerce_literal(&json!("21.5")), json!(21.5));
        assert_eq!(coerce_literal(&json!(0.25)), json!(0.25));
        assert_eq!(coerce_literal(&json!("1.0")), json!(1.0));
    }

    #[test]
    fn test_coerce_string_fallback() {
        assert_eq!(coerce_literal(&json!("ON")), json!("ON"));
        assert_eq!(coerce_literal(&json!("0x10")), json!("0x10"));
        assert_eq!(coerce_literal(&json!("v1.2.3")), json!("v1.2.3"));
    }

    #[test]
    fn test_values_match() {
        assert!(values_match(&json!(1), &json!(1.0)));
        assert!(values_match(&json!("ON"), &json!("on")));
        assert!(values_match(&json!(1), &json!(true)));
        assert!(!values_match(&json!(1), &json!(0)));
        assert!(!values_match(&json!(50), &json!("50")));
    }

    #[test]
    fn test_number_prefers_integer() {
        assert_eq!(number(20.0), json!(20));
        assert_eq!(number(20.5), json!(20.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn test_truthiness() {
        assert!(is_truthy(&json!(1)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("ON")));
    }
}
