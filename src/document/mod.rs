//! Documents: keys, revisions, typed views and construction
//!
//! Stored documents keep their system attributes first and in fixed order.
//! The stored `_id` is a collection-scoped marker; [`sanitize`] rewrites it
//! into the `collection/key` form before a document leaves the node.

pub mod builder;
pub mod key;
pub mod revision;
pub mod view;

pub use builder::{
    merge_objects_for_update, new_object_for_insert, new_object_for_replace, BuildOptions,
    BuiltDocument,
};
pub use key::{extract_key, validate_key, KeyGenerator, TraditionalKeyGenerator, MAX_KEY_LENGTH};
pub use revision::{RevisionGenerator, RevisionId};
pub use view::DocumentView;

use serde_json::{json, Map, Value};

pub const KEY: &str = "_key";
pub const ID: &str = "_id";
pub const REV: &str = "_rev";
pub const FROM: &str = "_from";
pub const TO: &str = "_to";
pub const OLD_REV: &str = "_oldRev";

/// Field of the stored `_id` marker holding the collection id
const ID_MARKER_FIELD: &str = "$cid";

pub fn is_system_attribute(name: &str) -> bool {
    matches!(name, KEY | ID | REV | FROM | TO)
}

/// Stored form of `_id`.
pub fn id_marker(collection_id: u64) -> Value {
    json!({ ID_MARKER_FIELD: collection_id })
}

/// Rewrite a stored document into its wire form.
///
/// Only the `_id` marker changes; attribute order is kept.
pub fn sanitize(document: &Map<String, Value>, collection_name: &str) -> Map<String, Value> {
    let key = DocumentView::new(document).key().unwrap_or_default();
    document
        .iter()
        .map(|(k, v)| {
            let value = if k == ID && v.get(ID_MARKER_FIELD).is_some() {
                Value::String(format!("{}/{}", collection_name, key))
            } else {
                v.clone()
            };
            (k.clone(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_resolves_id_marker() {
        let stored = match json!({"_key": "a", "_id": id_marker(3), "_rev": "1", "v": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let wire = sanitize(&stored, "docs");
        assert_eq!(wire["_id"], json!("docs/a"));
        assert_eq!(wire.keys().collect::<Vec<_>>(), stored.keys().collect::<Vec<_>>());
    }

    #[test]
    fn test_system_attributes() {
        for name in [KEY, ID, REV, FROM, TO] {
            assert!(is_system_attribute(name));
        }
        assert!(!is_system_attribute(OLD_REV));
        assert!(!is_system_attribute("key"));
    }
}
