//! Sensitive-name redaction for audit payloads.
//!
//! Before an argument map is persisted, every key whose lowercased name
//! matches the sensitive set (or ends with `_<name>`) is replaced by a
//! salted hash of the *name*, and its value by `"<redacted>"`. The salt is
//! process-local and stored alongside the log so in-process queries can
//! match hashed names; it is never written to exports.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Key names whose values must never reach the audit store.
const SENSITIVE_NAMES: &[&str] = &[
    "password", "passwd", "secret", "token", "auth", "cookie", "api_key",
    "key", "credential", "ssn", "social_security", "credit_card",
    "card_number", "cvv",
];

/// List-valued keys whose string members are field *names* and get the
/// same hashing treatment as keys (form field inventories).
const NAME_LIST_KEYS: &[&str] = &["fields", "filled_fields"];

/// Placeholder stored in place of a redacted value.
pub const REDACTED_VALUE: &str = "<redacted>";

/// Salted sensitive-name hasher applied to every audit payload.
#[derive(Debug, Clone)]
pub struct Redactor {
    salt: String,
}

impl Redactor {
    /// Creates a redactor over the given process-local salt.
    #[must_use]
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// Returns true if the key names sensitive material.
    #[must_use]
    pub fn is_sensitive(name: &str) -> bool {
        let lower = name.to_lowercase();
        SENSITIVE_NAMES.iter().any(|s| {
            lower == *s || lower.ends_with(&format!("_{s}")) || lower.ends_with(s)
        })
    }

    /// Salted hash of a field name, rendered as `[k:<hex16>]`.
    #[must_use]
    pub fn hash_name(&self, name: &str) -> String {
        let digest = Sha256::digest(format!("{}:{name}", self.salt).as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        format!("[k:{hex}]")
    }

    /// Redacts an argument map: sensitive keys are hashed, their values
    /// replaced, nested objects walked recursively.
    #[must_use]
    pub fn redact(&self, args: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::with_capacity(args.len());
        for (key, value) in args {
            if Self::is_sensitive(key) {
                out.insert(self.hash_name(key), Value::String(REDACTED_VALUE.into()));
                continue;
            }
            let redacted = match value {
                Value::Object(inner) => Value::Object(self.redact(inner)),
                Value::Array(items) if NAME_LIST_KEYS.contains(&key.as_str()) => {
                    Value::Array(items.iter().map(|item| self.redact_name_item(item)).collect())
                }
                other => other.clone(),
            };
            out.insert(key.clone(), redacted);
        }
        out
    }

    fn redact_name_item(&self, item: &Value) -> Value {
        match item {
            Value::String(name) if Self::is_sensitive(name) => {
                Value::String(self.hash_name(name))
            }
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn redactor() -> Redactor {
        Redactor::new("test-salt")
    }

    #[test]
    fn sensitive_names_detected() {
        assert!(Redactor::is_sensitive("password"));
        assert!(Redactor::is_sensitive("Password"));
        assert!(Redactor::is_sensitive("user_password"));
        assert!(Redactor::is_sensitive("api_key"));
        assert!(Redactor::is_sensitive("session_token"));
        assert!(!Redactor::is_sensitive("url"));
        assert!(!Redactor::is_sensitive("title"));
    }

    #[test]
    fn sensitive_value_never_survives() {
        let args = json!({"password": "hunter2", "url": "https://example.com"});
        let redacted = redactor().redact(args.as_object().unwrap());
        let text = serde_json::to_string(&redacted).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("https://example.com"));
    }

    #[test]
    fn sensitive_key_becomes_salted_hash() {
        let args = json!({"password": "x"});
        let redacted = redactor().redact(args.as_object().unwrap());
        assert!(redacted.get("password").is_none());
        let key = redacted.keys().next().unwrap();
        assert!(key.starts_with("[k:"), "hashed key, got {key}");
        assert_eq!(
            redacted.values().next().unwrap(),
            &Value::String(REDACTED_VALUE.into())
        );
    }

    #[test]
    fn hash_is_salt_dependent() {
        let a = Redactor::new("salt-a").hash_name("password");
        let b = Redactor::new("salt-b").hash_name("password");
        assert_ne!(a, b);
    }

    #[test]
    fn nested_objects_are_walked() {
        let args = json!({"outer": {"secret": "s3cr3t", "name": "ok"}});
        let redacted = redactor().redact(args.as_object().unwrap());
        let text = serde_json::to_string(&redacted).unwrap();
        assert!(!text.contains("s3cr3t"));
        assert!(text.contains("ok"));
    }

    #[test]
    fn field_name_lists_are_hashed() {
        let args = json!({"fields": ["email", "password"]});
        let redacted = redactor().redact(args.as_object().unwrap());
        let list = redacted.get("fields").unwrap().as_array().unwrap();
        assert_eq!(list[0], Value::String("email".into()));
        assert!(list[1].as_str().unwrap().starts_with("[k:"));
    }
}
