use serde_json::Value;
use sha2::{Digest, Sha256};

/// Serialize a JSON value with object keys sorted recursively.
///
/// Cache keys, audit chain hashes, and webhook signatures all hash this
/// form, so two maps with the same entries must produce identical bytes
/// regardless of insertion order.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 of arbitrary bytes, hex-encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 content hash of a text body, hex-encoded. Audit entries store
/// this instead of prompt/response plaintext.
pub fn content_hash(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// SHA-256 over the canonical form of a JSON value, hex-encoded.
pub fn hash_canonical(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_sorts_keys() {
        let a = serde_json::from_str::<Value>(r#"{"b":1,"a":2}"#).unwrap();
        let b = serde_json::from_str::<Value>(r#"{"a":2,"b":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn test_canonical_nested() {
        let v = json!({"z": {"y": [3, {"b": 1, "a": 2}], "x": null}});
        assert_eq!(canonical_json(&v), r#"{"z":{"x":null,"y":[3,{"a":2,"b":1}]}}"#);
    }

    #[test]
    fn test_array_order_preserved() {
        let v = json!(["b", "a"]);
        assert_eq!(canonical_json(&v), r#"["b","a"]"#);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello "));
        assert_eq!(content_hash("hello").len(), 64);
    }
}
