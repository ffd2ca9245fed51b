//! Lenient numeric coercion for provider scalars.
//!
//! Amounts and counts arrive as native numbers, locale-formatted strings
//! (`"1 234,56"`) or not at all. Both coercions are total: anything that
//! cannot be read as a number becomes zero, so a malformed figure never
//! aborts an aggregation.

use serde_json::Value;

/// Characters used as thousands separators in ru-RU formatted numbers.
const GROUP_SEPARATORS: [char; 3] = [' ', '\u{a0}', '\u{202f}'];

/// Coerce a raw scalar to `f64`, failing to `0.0`.
pub fn to_float(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::String(s) => parse_float_text(s).unwrap_or(0.0),
        Value::Array(_) | Value::Object(_) => 0.0,
    }
}

/// Coerce a raw scalar to `i64`, failing to `0`.
///
/// Text goes through a float intermediate so `"1,0"` reads as `1`; the
/// fractional part is truncated.
pub fn to_int(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u).unwrap_or(i64::MAX)
            } else {
                n.as_f64().map(truncate).unwrap_or(0)
            }
        }
        Value::Bool(b) => i64::from(*b),
        Value::String(s) => parse_float_text(s).map(truncate).unwrap_or(0),
        Value::Array(_) | Value::Object(_) => 0,
    }
}

fn parse_float_text(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !GROUP_SEPARATORS.contains(c))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|x| x.is_finite())
}

fn truncate(x: f64) -> i64 {
    if x.is_finite() {
        x.trunc() as i64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_locale_formatted() {
        assert_eq!(to_float(&json!("1 234,56")), 1234.56);
        assert_eq!(to_float(&json!("1\u{a0}000,00")), 1000.0);
        assert_eq!(to_float(&json!("  42.5 ")), 42.5);
    }

    #[test]
    fn test_float_fails_to_zero() {
        assert_eq!(to_float(&Value::Null), 0.0);
        assert_eq!(to_float(&json!("")), 0.0);
        assert_eq!(to_float(&json!("   ")), 0.0);
        assert_eq!(to_float(&json!("abc")), 0.0);
        assert_eq!(to_float(&json!("1,2,3")), 0.0);
        assert_eq!(to_float(&json!("NaN")), 0.0);
        assert_eq!(to_float(&json!("inf")), 0.0);
        assert_eq!(to_float(&json!([1, 2])), 0.0);
        assert_eq!(to_float(&json!({"Сумма": 1})), 0.0);
    }

    #[test]
    fn test_float_native_numbers() {
        assert_eq!(to_float(&json!(500)), 500.0);
        assert_eq!(to_float(&json!(-3.25)), -3.25);
        assert_eq!(to_float(&json!(true)), 1.0);
    }

    #[test]
    fn test_int_through_float_intermediate() {
        assert_eq!(to_int(&json!("1,0")), 1);
        assert_eq!(to_int(&json!("2 500,9")), 2500);
        assert_eq!(to_int(&json!("-7,8")), -7);
        assert_eq!(to_int(&json!(3.99)), 3);
        assert_eq!(to_int(&json!(12)), 12);
        assert_eq!(to_int(&json!("1e19")), i64::MAX);
    }

    #[test]
    fn test_int_fails_to_zero() {
        assert_eq!(to_int(&json!("bad")), 0);
        assert_eq!(to_int(&Value::Null), 0);
        assert_eq!(to_int(&json!("")), 0);
        assert_eq!(to_int(&json!("nan")), 0);
        assert_eq!(to_int(&json!("-inf")), 0);
        assert_eq!(to_int(&json!({})), 0);
    }
}
