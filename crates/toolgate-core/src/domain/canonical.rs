//! Canonical JSON forms for argument equality and rule-set digests.
//!
//! Canonicalization sorts object keys by UTF-16 code units (RFC 8785
//! §3.2.3) and rewrites integer-valued floats as integers, so `1` and `1.0`
//! compare equal while `"1"` and `1` do not. Array order is preserved.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::domain::error::Result;

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.to_string(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_numbers(v)))
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(normalize_numbers).collect()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Value::Number(n.clone()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Value::Number(Number::from(f as i64))
            }
            _ => Value::Number(n.clone()),
        },
        other => other.clone(),
    }
}

/// Canonical value: normalized numbers, UTF-16 sorted keys.
pub fn canonicalize(value: &Value) -> Value {
    sort_keys_utf16(&normalize_numbers(value))
}

/// Structural equality under the canonical form.
pub fn canonical_eq(a: &Value, b: &Value) -> bool {
    a == b || canonicalize(a) == canonicalize(b)
}

/// Compact canonical JSON text.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value))?)
}

/// SHA-256 hex digest of the canonical JSON text.
pub fn compute_digest(value: &Value) -> Result<String> {
    let canonical = canonical_json(value)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_valued_float_equals_integer() {
        assert!(canonical_eq(&json!({"limit": 10}), &json!({"limit": 10.0})));
        assert!(!canonical_eq(&json!({"limit": 10}), &json!({"limit": 10.5})));
    }

    #[test]
    fn test_float_past_i64_range_is_not_saturated() {
        assert!(!canonical_eq(&json!(9223372036854775808.0), &json!(i64::MAX)));
        assert!(canonical_eq(&json!(-9223372036854775808.0), &json!(i64::MIN)));
    }

    #[test]
    fn test_string_and_number_never_coerce() {
        assert!(!canonical_eq(&json!({"limit": "10"}), &json!({"limit": 10})));
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = json!({"a": 1, "b": {"y": 2, "x": 3}});
        let b = json!({"b": {"x": 3, "y": 2}, "a": 1});
        assert_eq!(canonical_json(&a).expect("a"), canonical_json(&b).expect("b"));
    }

    #[test]
    fn test_array_order_is_preserved() {
        assert!(!canonical_eq(&json!([1, 2, 3]), &json!([3, 2, 1])));
    }

    #[test]
    fn test_canonical_json_integer_float() {
        let canonical = canonical_json(&json!({"value": 1.0})).expect("canonical_json");
        assert_eq!(canonical, r#"{"value":1}"#);
    }

    #[test]
    fn test_compute_digest_is_stable_hex() {
        let input = json!({"name": "rules", "version": "1"});
        let digest = compute_digest(&input).expect("digest");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(digest, compute_digest(&input).expect("digest again"));
        assert_ne!(
            digest,
            compute_digest(&json!({"name": "rules", "version": "2"})).expect("other")
        );
    }
}
