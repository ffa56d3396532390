//! Rounding of aggregation results

use serde_json::{Number, Value};

/// Round every float inside `value` to `places` decimal places
///
/// Lists and objects are rounded element-wise; integers, strings, booleans
/// and nulls pass through unchanged. `None` leaves the value untouched.
///
/// Rounding works on the binary value, so a decimal tie whose binary form
/// falls just below it rounds down (`1.005` → `1.0` at two places).
pub fn round_value(value: Value, places: Option<u32>) -> Value {
    let Some(places) = places else {
        return value;
    };
    round_to(value, 10f64.powi(places as i32))
}

fn round_to(value: Value, scale: f64) -> Value {
    match value {
        Value::Number(n) if n.is_f64() => match n.as_f64() {
            Some(x) => Number::from_f64((x * scale).round() / scale)
                .map(Value::Number)
                .unwrap_or(Value::Number(n)),
            None => Value::Number(n),
        },
        Value::Array(items) => Value::Array(items.into_iter().map(|v| round_to(v, scale)).collect()),
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, round_to(v, scale))).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_nested() {
        let value = json!({"a": 1.23456, "b": [2.71828, 3, "s", null], "c": {"d": 0.006}});
        assert_eq!(
            round_value(value, Some(2)),
            json!({"a": 1.23, "b": [2.72, 3, "s", null], "c": {"d": 0.01}})
        );
    }

    #[test]
    fn test_round_none_is_identity() {
        let value = json!([1.23456]);
        assert_eq!(round_value(value.clone(), None), value);
    }

    #[test]
    fn test_round_zero_places() {
        assert_eq!(round_value(json!(2.6), Some(0)), json!(3.0));
        assert_eq!(round_value(json!(7), Some(0)), json!(7));
    }

    #[test]
    fn test_round_binary_ties() {
        // 1.005 is stored as 1.00499999999999989...
        assert_eq!(round_value(json!(1.005), Some(2)), json!(1.0));
        assert_eq!(round_value(json!(0.125), Some(2)), json!(0.13));
    }

    #[test]
    fn test_round_is_idempotent() {
        let once = round_value(json!([1.23456, {"x": 9.87654}]), Some(3));
        assert_eq!(round_value(once.clone(), Some(3)), once);
    }
}
