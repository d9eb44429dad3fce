//! Shared JSON parsing helpers used by the exchange codecs.

use crate::event::Level;

/// Parse a JSON value (string or number) as `f64`.
///
/// Exchanges encode numbers as JSON strings (`"30000.5"`) or native numbers
/// (`30000.5`) depending on the field.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_u64()
    }
}

/// A field as an owned string, accepting numbers too.
pub fn field_string(v: &serde_json::Value, key: &str) -> Option<String> {
    match v.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse book levels given as `[["price", "size", ...], ...]`.
///
/// Levels that fail to parse are skipped.
pub fn parse_levels(levels: Option<&serde_json::Value>) -> Vec<Level> {
    let Some(levels) = levels.and_then(|l| l.as_array()) else {
        return Vec::new();
    };
    levels
        .iter()
        .filter_map(|level| {
            let arr = level.as_array()?;
            Some(Level { price: parse_str_f64(arr.first())?, size: parse_str_f64(arr.get(1))? })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numbers_from_strings_or_numbers() {
        assert_eq!(parse_str_f64(Some(&json!("30000.5"))), Some(30000.5));
        assert_eq!(parse_str_f64(Some(&json!(1.25))), Some(1.25));
        assert_eq!(parse_str_f64(Some(&json!("x"))), None);
        assert_eq!(parse_str_u64(Some(&json!("42"))), Some(42));
        assert_eq!(parse_str_u64(Some(&json!(42))), Some(42));
        assert_eq!(parse_str_u64(None), None);
    }

    #[test]
    fn levels_skip_garbage() {
        let levels = json!([["100.5", "2", "0", "3"], ["bad"], ["99", "1"]]);
        assert_eq!(
            parse_levels(Some(&levels)),
            vec![Level { price: 100.5, size: 2.0 }, Level { price: 99.0, size: 1.0 }]
        );
        assert!(parse_levels(None).is_empty());
    }

    #[test]
    fn field_string_accepts_numbers() {
        let v = json!({"a": "x", "b": 7, "c": null});
        assert_eq!(field_string(&v, "a").as_deref(), Some("x"));
        assert_eq!(field_string(&v, "b").as_deref(), Some("7"));
        assert_eq!(field_string(&v, "c"), None);
    }
}
