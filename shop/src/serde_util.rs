// shop/src/serde_util.rs

//! Lenient conversions for provider JSON, which mixes numbers and numeric strings.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

pub fn value_to_i64(value: &Value) -> Option<i64> {
  match value {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
  match value {
    Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
    Value::String(s) => Decimal::from_str(s.trim()).ok(),
    _ => None,
  }
}

pub fn value_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Accepts `0`, `"0"` and `1032`, `"1032"` alike.
pub fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Value::deserialize(deserializer)?;
  value_to_i64(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {}", raw)))
}

/// Accepts `"0"` and `0` alike, yielding the text form.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = Value::deserialize(deserializer)?;
  value_to_string(&raw).ok_or_else(|| serde::de::Error::custom(format!("expected a string or number, got {}", raw)))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn numbers_and_numeric_strings_convert() {
    assert_eq!(value_to_i64(&json!(1032)), Some(1032));
    assert_eq!(value_to_i64(&json!("0")), Some(0));
    assert_eq!(value_to_i64(&json!("abc")), None);
    assert_eq!(value_to_decimal(&json!(1000)), Some(Decimal::from(1000)));
    assert_eq!(value_to_decimal(&json!("1.50")), Decimal::from_str("1.50").ok());
    assert_eq!(value_to_string(&json!(254712345678_i64)), Some("254712345678".to_string()));
  }
}
