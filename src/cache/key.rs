// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic cache keys.
//!
//! ```text
//! "{service}:{operation}:{digest}"
//!                          └─ first 16 hex chars of SHA-256 over the
//!                             canonical JSON of {service, operation,
//!                             payload[, context]}
//! ```
//!
//! Canonical JSON sorts object keys at every depth, so two payloads that
//! differ only in key order share a key.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex characters of the digest kept in the key.
const DIGEST_HEX_LEN: usize = 16;

/// Derive the cache key for one request.
#[must_use]
pub fn derive_key(service: &str, operation: &str, payload: &Value, context: Option<&Value>) -> String {
    let mut key_data = serde_json::Map::new();
    key_data.insert("service".into(), Value::String(service.to_string()));
    key_data.insert("operation".into(), Value::String(operation.to_string()));
    key_data.insert("payload".into(), payload.clone());
    if let Some(context) = context {
        key_data.insert("context".into(), context.clone());
    }

    let canonical = canonical_json(&Value::Object(key_data));
    let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
    format!("{}:{}:{}", service, operation, &digest[..DIGEST_HEX_LEN])
}

/// Serialize `value` with object keys sorted recursively.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_format() {
        let key = derive_key("vision", "describe", &json!({"url": "a.png"}), None);
        let parts: Vec<&str> = key.split(':').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "vision");
        assert_eq!(parts[1], "describe");
        assert_eq!(parts[2].len(), 16);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_key_ignores_object_key_order() {
        let a = json!({"b": 1, "a": {"y": [1, {"q": 1, "p": 2}], "x": null}});
        let b = json!({"a": {"x": null, "y": [1, {"p": 2, "q": 1}]}, "b": 1});

        assert_eq!(derive_key("s", "o", &a, None), derive_key("s", "o", &b, None));
    }

    #[test]
    fn test_key_depends_on_every_input() {
        let payload = json!({"text": "hello"});
        let base = derive_key("s", "o", &payload, None);

        assert_ne!(base, derive_key("s", "o", &json!({"text": "hello!"}), None));
        assert_ne!(base, derive_key("s", "o2", &payload, None));
        assert_ne!(base, derive_key("s2", "o", &payload, None));
        assert_ne!(base, derive_key("s", "o", &payload, Some(&json!({"doc": "v2"}))));
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            derive_key("s", "o", &json!([1, 2]), None),
            derive_key("s", "o", &json!([2, 1]), None)
        );
    }

    #[test]
    fn test_canonical_json_escapes_keys() {
        let value = json!({"b\"q": "x\ny", "a": 1.5});
        assert_eq!(canonical_json(&value), r#"{"a":1.5,"b\"q":"x\ny"}"#);
    }
}
