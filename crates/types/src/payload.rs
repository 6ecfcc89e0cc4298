// Path: crates/types/src/payload.rs
//! Canonicalization of opaque JSON payloads.
//!
//! Transaction bodies and entity domains are free-form JSON to the core, but
//! replay across hosts requires a bit-exact rendering. The canonical dialect
//! here is JCS (RFC 8785) serialization after a normalization pass:
//! object keys sorted, no insignificant whitespace, and every number that is
//! not exactly an `i64`/`u64` rendered as its decimal string (this covers
//! arbitrary-precision integers and keeps non-finite values unrepresentable).
//! Canonicalization is idempotent: re-canonicalizing canonical bytes yields
//! the same bytes.

use crate::error::CodecError;
use serde_json::Value;

/// Canonicalizes a JSON value into the deterministic byte rendering used by
/// the codec for transaction bodies and entity domains.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>, CodecError> {
    let normalized = normalize(value);
    serde_jcs::to_vec(&normalized).map_err(|e| CodecError::Payload(e.to_string()))
}

/// Parses raw JSON text and canonicalizes it in one step.
pub fn canonicalize_str(text: &str) -> Result<Vec<u8>, CodecError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| CodecError::Payload(e.to_string()))?;
    canonicalize(&value)
}

/// Parses canonical payload bytes back into a JSON value for application
/// callbacks.
pub fn parse(bytes: &[u8]) -> Result<Value, CodecError> {
    serde_json::from_slice(bytes).map_err(|e| CodecError::Payload(e.to_string()))
}

fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            if n.is_u64() || n.is_i64() {
                Value::Number(n.clone())
            } else {
                // Arbitrary-precision or fractional: exact decimal string.
                Value::String(n.to_string())
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys_and_strips_whitespace() {
        let bytes = canonicalize_str(r#"{ "b": 1,  "a": [2, 3] }"#).unwrap();
        assert_eq!(bytes, br#"{"a":[2,3],"b":1}"#);
    }

    #[test]
    fn is_idempotent() {
        let first = canonicalize_str(r#"{"z":{"y":1,"x":"v"},"a":[true,null]}"#).unwrap();
        let second = canonicalize(&parse(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn big_integers_become_decimal_strings() {
        // Beyond u64: preserved exactly, as a string.
        let bytes = canonicalize_str(r#"{"n": 340282366920938463463374607431768211455}"#).unwrap();
        assert_eq!(
            bytes,
            br#"{"n":"340282366920938463463374607431768211455"}"#
        );
    }

    #[test]
    fn in_range_integers_stay_numbers() {
        let bytes = canonicalize(&json!({"n": 18446744073709551615u64, "m": -5})).unwrap();
        assert_eq!(bytes, br#"{"m":-5,"n":18446744073709551615}"#);
    }

    #[test]
    fn fractional_numbers_become_strings() {
        let bytes = canonicalize_str(r#"{"f": 1.5}"#).unwrap();
        assert_eq!(bytes, br#"{"f":"1.5"}"#);
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(canonicalize_str("{not json").is_err());
        assert!(parse(b"[1,").is_err());
    }
}
