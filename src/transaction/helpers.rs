//! Document-level helpers of the write path

use serde_json::{Map, Value};

use crate::collection::LogicalCollection;
use crate::document::{sanitize, RevisionId, ID, KEY, OLD_REV, REV};

/// Result object of a single document write.
///
/// Contains `_id`, `_key` and `_rev`; `_oldRev` when the write replaced a
/// revision; `old`/`new` when requested.
pub fn build_document_identity(
    collection: &LogicalCollection,
    key: &str,
    revision: RevisionId,
    old_revision: Option<RevisionId>,
    old: Option<&Map<String, Value>>,
    new: Option<&Map<String, Value>>,
) -> Value {
    let mut identity = Map::new();
    identity.insert(ID.to_string(), Value::String(format!("{}/{}", collection.name(), key)));
    identity.insert(KEY.to_string(), Value::String(key.to_string()));
    identity.insert(REV.to_string(), Value::String(revision.encode()));
    if let Some(old_revision) = old_revision.filter(RevisionId::is_set) {
        identity.insert(OLD_REV.to_string(), Value::String(old_revision.encode()));
    }
    if let Some(old) = old {
        identity.insert("old".to_string(), Value::Object(sanitize(old, collection.name())));
    }
    if let Some(new) = new {
        identity.insert("new".to_string(), Value::Object(sanitize(new, collection.name())));
    }
    Value::Object(identity)
}

/// True if a modification changes the value of any shard key.
///
/// `_key` is skipped: the storage layer rejects key changes on its own. A
/// patch that omits a shard key leaves it untouched; a missing value
/// otherwise counts as `null`.
pub fn shard_keys_changed(
    collection: &LogicalCollection,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    is_patch: bool,
) -> bool {
    collection
        .shard_keys()
        .iter()
        .filter(|key| key.as_str() != KEY)
        .any(|key| match new.get(key) {
            None if is_patch => false,
            new_value => {
                new_value.unwrap_or(&Value::Null) != old.get(key).unwrap_or(&Value::Null)
            }
        })
}

/// True if a modification changes the smart-join attribute.
///
/// The new value must be a string, unless a patch leaves it out.
pub fn smart_join_attribute_changed(
    collection: &LogicalCollection,
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    is_patch: bool,
) -> bool {
    let Some(attribute) = collection.smart_join_attribute() else {
        return false;
    };
    match new.get(attribute) {
        None if is_patch => false,
        Some(Value::String(value)) => old.get(attribute).and_then(Value::as_str) != Some(value),
        _ => true,
    }
}

/// True if the incoming document carries an application version that is not
/// newer than the stored one.
///
/// Only numeric values on both sides take part in the comparison.
pub fn is_stale_version(attribute: &str, old: &Map<String, Value>, new: &Map<String, Value>) -> bool {
    match (
        old.get(attribute).and_then(Value::as_f64),
        new.get(attribute).and_then(Value::as_f64),
    ) {
        (Some(old), Some(new)) => new <= old,
        _ => false,
    }
}
