//! Content hashing for change detection
//!
//! Each upstream record is hashed over a canonical JSON rendering so the
//! digest depends only on field values, never on the property order the
//! upstream API happened to emit. Two payloads with identical fields always
//! produce identical digests, which is what the reconciler compares against
//! the stored `data_hash` column.

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

/// Compute the content hash for a raw upstream item.
///
/// The item is serialized with all object keys sorted lexicographically
/// (recursively), then digested with SHA-256 and encoded as lowercase hex.
///
/// If canonical serialization fails, a unique fallback token is returned
/// instead. A fallback never matches a stored hash, so a record that could
/// not be hashed is always treated as changed rather than silently skipped.
pub fn content_hash(item: &Value) -> String {
    match canonical_json(item) {
        Ok(canonical) => {
            let mut hasher = Sha256::new();
            hasher.update(canonical.as_bytes());
            hex::encode(hasher.finalize())
        },
        Err(e) => {
            warn!(error = %e, "Hash calculation failed, using fallback token");
            fallback_token()
        },
    }
}

/// Serialize a JSON value with object keys sorted at every nesting level.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    let mut out = String::new();
    write_canonical(value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> serde_json::Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out)?;
                }
            }
            out.push('}');
            Ok(())
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
            Ok(())
        },
        scalar => {
            out.push_str(&serde_json::to_string(scalar)?);
            Ok(())
        },
    }
}

/// Unique placeholder used when hashing fails.
fn fallback_token() -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("fallback_{}_{}", Utc::now().timestamp_millis(), &nonce[..9])
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_order_independent() {
        let a: Value =
            serde_json::from_str(r#"{"contentid":"7","title":"Park","tel":"054-000"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"tel":"054-000","contentid":"7","title":"Park"}"#).unwrap();

        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hash_is_order_independent_for_nested_objects() {
        let a: Value =
            serde_json::from_str(r#"{"outer":{"x":1,"y":2},"name":"n"}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"name":"n","outer":{"y":2,"x":1}}"#).unwrap();

        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let item = json!({"contentid": "7", "title": "Park", "mapx": 128.5});
        assert_eq!(content_hash(&item), content_hash(&item));
    }

    #[test]
    fn test_hash_changes_when_a_field_changes() {
        let before = json!({"contentid": "7", "title": "Park"});
        let after = json!({"contentid": "7", "title": "Garden"});
        assert_ne!(content_hash(&before), content_hash(&after));
    }

    #[test]
    fn test_hash_is_lowercase_hex_digest() {
        let digest = content_hash(&json!({"contentid": "7"}));
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value: Value = serde_json::from_str(r#"{"b":1,"a":"x","c":null}"#).unwrap();
        assert_eq!(canonical_json(&value).unwrap(), r#"{"a":"x","b":1,"c":null}"#);
    }

    #[test]
    fn test_canonical_json_preserves_array_order() {
        let value = json!({"items": [3, 1, 2]});
        assert_eq!(canonical_json(&value).unwrap(), r#"{"items":[3,1,2]}"#);
    }

    #[test]
    fn test_fallback_token_shape() {
        let token = fallback_token();
        assert!(token.starts_with("fallback_"));
        assert_ne!(token, fallback_token());
    }
}
