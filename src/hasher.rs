//! Canonical serialization and SHA-256 digests.
//!
//! Every digest in the system goes through [`canonical_string`], which writes
//! JSON with object keys sorted at every depth and no insignificant
//! whitespace. Two nodes holding logically identical data therefore hash the
//! same bytes, whatever order their fields were built in.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest (64 characters).
pub type HashHex = String;

/// Types that have a fixed JSON form for hashing.
pub trait Canonical {
    fn canonical_value(&self) -> Value;
}

impl Canonical for Value {
    fn canonical_value(&self) -> Value {
        self.clone()
    }
}

/// Hash any canonical value.
pub fn digest<C: Canonical + ?Sized>(item: &C) -> HashHex {
    sha256_hex(canonical_string(&item.canonical_value()).as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> HashHex {
    hex::encode(Sha256::digest(bytes))
}

/// Render a JSON value with recursively sorted keys.
pub fn canonical_string(value: &Value) -> String {
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
                write_canonical(&map[key.as_str()], out);
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
    use serde_json::{json, Map};

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_canonical_string_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": [3, {"y": true, "x": null}], "c": "s"}});
        assert_eq!(
            canonical_string(&value),
            r#"{"a":{"c":"s","z":[3,{"x":null,"y":true}]},"b":1}"#
        );
    }

    #[test]
    fn test_digest_independent_of_insertion_order() {
        let mut first = Map::new();
        first.insert("sender".into(), json!("A"));
        first.insert("amount".into(), json!(10.5));
        let mut second = Map::new();
        second.insert("amount".into(), json!(10.5));
        second.insert("sender".into(), json!("A"));

        let a = digest(&Value::Object(first));
        let b = digest(&Value::Object(second));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_digest_changes_with_content() {
        assert_ne!(digest(&json!({"n": 1})), digest(&json!({"n": 2})));
    }
}
