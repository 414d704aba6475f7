//! Document keys and handles
//!
//! A key is 1..=254 bytes from `[A-Za-z0-9_\-:.@()+,=;$!*'%]`.
//! A handle is `collection/key`.

use regex::Regex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use crate::error::{WriteError, WriteResult};

/// Maximum key length in bytes
pub const MAX_KEY_LENGTH: usize = 254;

static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();
static COLLECTION_NAME_PATTERN: OnceLock<Regex> = OnceLock::new();

fn key_pattern() -> &'static Regex {
    KEY_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_\-:.@()+,=;$!*'%]+$").expect("key pattern compiles")
    })
}

fn collection_name_pattern() -> &'static Regex {
    COLLECTION_NAME_PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_\-]{0,255}$").expect("collection name pattern compiles")
    })
}

/// Returns true if `key` is a well-formed document key.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LENGTH && key_pattern().is_match(key)
}

/// Validate a user-supplied key.
pub fn validate_key(key: &str) -> WriteResult<()> {
    if key.is_empty() {
        return Err(WriteError::key_bad("illegal document key: empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(WriteError::key_bad(format!(
            "illegal document key: longer than {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    if !key_pattern().is_match(key) {
        return Err(WriteError::key_bad(format!(
            "illegal document key: '{}'",
            key
        )));
    }
    Ok(())
}

pub fn is_valid_collection_name(name: &str) -> bool {
    collection_name_pattern().is_match(name)
}

/// Split a `collection/key` handle.
pub fn split_document_id(id: &str) -> Option<(&str, &str)> {
    let (collection, key) = id.split_once('/')?;
    if collection.is_empty() || key.is_empty() {
        return None;
    }
    Some((collection, key))
}

/// True if `id` is a well-formed `collection/key` reference.
pub fn is_valid_document_id(id: &str) -> bool {
    match split_document_id(id) {
        Some((collection, key)) => is_valid_collection_name(collection) && is_valid_key(key),
        None => false,
    }
}

/// Extract the key a remove/read call addresses.
///
/// Strings may be bare keys or `collection/key` handles; objects carry
/// `_key`. Anything else yields `None`.
pub fn extract_key(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(match s.rfind('/') {
            Some(pos) => &s[pos + 1..],
            None => s.as_str(),
        }),
        Value::Object(obj) => obj.get(super::KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// Key-generation policy of a collection.
pub trait KeyGenerator: Send + Sync + std::fmt::Debug {
    /// Produce a fresh key.
    fn generate(&self) -> String;

    /// Validate a user-supplied key. Restores bypass the user-key policy.
    fn validate(&self, key: &str, is_restore: bool) -> WriteResult<()>;

    /// Observe a key written by restore or replication.
    fn track(&self, key: &str);
}

/// Monotonic numeric keys, user keys allowed by default.
#[derive(Debug)]
pub struct TraditionalKeyGenerator {
    last: AtomicU64,
    allow_user_keys: bool,
}

impl TraditionalKeyGenerator {
    pub fn new(allow_user_keys: bool) -> Self {
        Self {
            last: AtomicU64::new(0),
            allow_user_keys,
        }
    }
}

impl Default for TraditionalKeyGenerator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl KeyGenerator for TraditionalKeyGenerator {
    fn generate(&self) -> String {
        (self.last.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn validate(&self, key: &str, is_restore: bool) -> WriteResult<()> {
        if !self.allow_user_keys && !is_restore {
            return Err(WriteError::key_bad("collection does not allow using user-defined keys"));
        }
        validate_key(key)?;
        self.track(key);
        Ok(())
    }

    fn track(&self, key: &str) {
        if let Ok(numeric) = key.parse::<u64>() {
            self.last.fetch_max(numeric, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_keys() {
        assert!(is_valid_key("a"));
        assert!(is_valid_key("user:42@host(1)+x,y=z;$!*'%"));
        assert!(is_valid_key(&"k".repeat(MAX_KEY_LENGTH)));
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("slash/inside"));
        assert!(!is_valid_key(&"k".repeat(MAX_KEY_LENGTH + 1)));
        assert!(validate_key("ä").is_err());
    }

    #[test]
    fn test_document_ids() {
        assert!(is_valid_document_id("vertices/a1"));
        assert!(!is_valid_document_id("vertices/"));
        assert!(!is_valid_document_id("/a1"));
        assert!(!is_valid_document_id("a1"));
        assert!(!is_valid_document_id("1bad/a1"));
    }

    #[test]
    fn test_extract_key() {
        assert_eq!(extract_key(&json!("abc")), Some("abc"));
        assert_eq!(extract_key(&json!("coll/abc")), Some("abc"));
        assert_eq!(extract_key(&json!({"_key": "k"})), Some("k"));
        assert_eq!(extract_key(&json!({"_key": 1})), None);
        assert_eq!(extract_key(&json!(12)), None);
    }

    #[test]
    fn test_traditional_generator_skips_tracked_keys() {
        let generator = TraditionalKeyGenerator::default();
        assert_eq!(generator.generate(), "1");
        generator.validate("100", false).unwrap();
        assert_eq!(generator.generate(), "101");
    }

    #[test]
    fn test_user_keys_forbidden_unless_restore() {
        let generator = TraditionalKeyGenerator::new(false);
        assert!(generator.validate("abc", false).is_err());
        assert!(generator.validate("abc", true).is_ok());
    }
}
