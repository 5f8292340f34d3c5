//! Fingerprints: deterministic identity hashes for task types and arguments.
//!
//! - `TypeFingerprint` = hash(type name + declared version)
//! - `ArgsFingerprint` = hash(canonical JSON of the constructor arguments)
//!
//! `ArgsFingerprint` is the idempotency key within a task type.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of digest bytes kept (hex-encoded to twice as many chars).
const DIGEST_BYTES: usize = 16;

fn digest(bytes: &[u8]) -> String {
    let hash = Sha256::digest(bytes);
    hex::encode(&hash[..DIGEST_BYTES])
}

/// Identifies a concrete task type at a given code version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeFingerprint(String);

impl TypeFingerprint {
    pub fn of(task_type: &str, version: u32) -> Self {
        Self(digest(format!("{task_type}@v{version}").as_bytes()))
    }

    /// Wrap a fingerprint read back from storage.
    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Deterministic hash of a task's constructor arguments.
///
/// Object keys are sorted before hashing, so two argument sets that differ
/// only in key order share a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgsFingerprint(String);

impl ArgsFingerprint {
    pub fn of(args: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(args, &mut canonical);
        Self(digest(canonical.as_bytes()))
    }

    pub fn from_raw(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArgsFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
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
    use serde_json::json;

    #[test]
    fn args_fingerprint_ignores_key_order() {
        let a = json!({ "to": "a@example.com", "subject": "hi", "meta": { "x": 1, "y": [1, 2] } });
        let b = json!({ "meta": { "y": [1, 2], "x": 1 }, "subject": "hi", "to": "a@example.com" });

        assert_eq!(ArgsFingerprint::of(&a), ArgsFingerprint::of(&b));
    }

    #[test]
    fn args_fingerprint_distinguishes_values() {
        let a = json!({ "to": "a@example.com" });
        let b = json!({ "to": "b@example.com" });
        let c = json!({ "to": ["a@example.com"] });

        assert_ne!(ArgsFingerprint::of(&a), ArgsFingerprint::of(&b));
        assert_ne!(ArgsFingerprint::of(&a), ArgsFingerprint::of(&c));
    }

    #[test]
    fn type_fingerprint_tracks_version() {
        let v1 = TypeFingerprint::of("mail.send", 1);
        let v2 = TypeFingerprint::of("mail.send", 2);

        assert_ne!(v1, v2);
        assert_eq!(v1, TypeFingerprint::of("mail.send", 1));
        assert_eq!(v1.as_str().len(), DIGEST_BYTES * 2);
    }
}
