//! Typed read access to a stored document
//!
//! Stored documents carry their system attributes first, in fixed order:
//! `_key`, `_id`, `_rev`, then `_from`, `_to` for edges. The view checks the
//! expected slot first and falls back to a lookup by name, so documents
//! that arrive in another order (restores, hand-built fixtures) still read
//! correctly.

use serde_json::{Map, Value};

use super::revision::RevisionId;
use super::{is_system_attribute, FROM, ID, KEY, REV, TO};

const KEY_SLOT: usize = 0;
const ID_SLOT: usize = 1;
const REV_SLOT: usize = 2;
const FROM_SLOT: usize = 3;
const TO_SLOT: usize = 4;

/// Read-only view over a document object.
#[derive(Debug, Clone, Copy)]
pub struct DocumentView<'a> {
    object: &'a Map<String, Value>,
}

impl<'a> DocumentView<'a> {
    pub fn new(object: &'a Map<String, Value>) -> Self {
        Self { object }
    }

    fn system(&self, name: &str, slot: usize) -> Option<&'a Value> {
        if let Some((k, v)) = self.object.iter().nth(slot) {
            if k == name {
                return Some(v);
            }
        }
        self.object.get(name)
    }

    pub fn key(&self) -> Option<&'a str> {
        self.system(KEY, KEY_SLOT).and_then(Value::as_str)
    }

    /// Stored `_id` value (the collection-scoped marker for stored documents).
    pub fn id(&self) -> Option<&'a Value> {
        self.system(ID, ID_SLOT)
    }

    pub fn rev(&self) -> Option<RevisionId> {
        self.system(REV, REV_SLOT).and_then(RevisionId::from_value)
    }

    pub fn from(&self) -> Option<&'a str> {
        self.system(FROM, FROM_SLOT).and_then(Value::as_str)
    }

    pub fn to(&self) -> Option<&'a str> {
        self.system(TO, TO_SLOT).and_then(Value::as_str)
    }

    /// Attribute lookup by name.
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.object.get(name)
    }

    /// Non-system attributes in stored order.
    pub fn user_attributes(&self) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        self.object
            .iter()
            .filter(|(k, _)| !is_system_attribute(k))
    }

    /// Copy of the non-system attributes.
    pub fn user_object(&self) -> Map<String, Value> {
        self.user_attributes()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn as_map(&self) -> &'a Map<String, Value> {
        self.object
    }
}
