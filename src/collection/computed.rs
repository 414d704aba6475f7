//! Computed values
//!
//! Expression evaluation is external: each computed attribute wraps a
//! caller-supplied function of the document under construction.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::document::is_system_attribute;

/// Write operation that triggers a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeOn {
    Insert,
    Update,
    Replace,
}

pub type ComputeFn = Arc<dyn Fn(&Map<String, Value>) -> Value + Send + Sync>;

/// One computed attribute.
#[derive(Clone)]
pub struct ComputedAttribute {
    name: String,
    compute_on: Vec<ComputeOn>,
    /// Replace a value supplied by the client
    overwrite: bool,
    compute: ComputeFn,
}

impl ComputedAttribute {
    pub fn new(
        name: impl Into<String>,
        compute_on: &[ComputeOn],
        overwrite: bool,
        compute: ComputeFn,
    ) -> Self {
        Self {
            name: name.into(),
            compute_on: compute_on.to_vec(),
            overwrite,
            compute,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn triggers_on(&self, on: ComputeOn) -> bool {
        self.compute_on.contains(&on)
    }
}

impl fmt::Debug for ComputedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedAttribute")
            .field("name", &self.name)
            .field("compute_on", &self.compute_on)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

/// Computed attributes of a collection.
#[derive(Debug, Clone, Default)]
pub struct ComputedValues {
    attributes: Vec<ComputedAttribute>,
}

impl ComputedValues {
    /// System attributes can never be computed and are skipped.
    pub fn new(attributes: Vec<ComputedAttribute>) -> Self {
        Self {
            attributes: attributes
                .into_iter()
                .filter(|a| !is_system_attribute(&a.name))
                .collect(),
        }
    }

    pub fn must_compute_on(&self, on: ComputeOn) -> bool {
        self.attributes.iter().any(|a| a.triggers_on(on))
    }

    /// Fill in computed attributes triggered by `on`.
    pub fn apply(&self, document: &mut Map<String, Value>, on: ComputeOn) {
        for attribute in self.attributes.iter().filter(|a| a.triggers_on(on)) {
            if !attribute.overwrite && document.contains_key(&attribute.name) {
                continue;
            }
            let value = (attribute.compute)(document);
            document.insert(attribute.name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn constant(value: Value) -> ComputeFn {
        Arc::new(move |_: &Map<String, Value>| value.clone())
    }

    #[test]
    fn test_apply_respects_trigger_and_overwrite() {
        let values = ComputedValues::new(vec![
            ComputedAttribute::new("a", &[ComputeOn::Insert], false, constant(json!(1))),
            ComputedAttribute::new("b", &[ComputeOn::Insert], true, constant(json!(2))),
            ComputedAttribute::new("c", &[ComputeOn::Update], false, constant(json!(3))),
        ]);
        let mut doc = Map::new();
        doc.insert("a".into(), json!("client"));
        doc.insert("b".into(), json!("client"));
        values.apply(&mut doc, ComputeOn::Insert);

        assert_eq!(doc["a"], json!("client"));
        assert_eq!(doc["b"], json!(2));
        assert!(!doc.contains_key("c"));
    }

    #[test]
    fn test_system_attributes_never_computed() {
        let values = ComputedValues::new(vec![ComputedAttribute::new(
            "_key",
            &[ComputeOn::Insert],
            true,
            constant(json!("x")),
        )]);
        assert!(!values.must_compute_on(ComputeOn::Insert));
    }
}
