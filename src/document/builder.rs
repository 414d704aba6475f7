//! Document Builder
//!
//! Pure construction of the document that will be stored by an insert,
//! update or replace. No I/O: the only side effects are drawing a revision
//! from the database clock and a key from the collection's key generator.
//!
//! Output order is fixed: `_key`, `_id`, `_rev`, `_from`, `_to` (edges
//! only), then user attributes, then computed attributes.

use serde_json::{Map, Value};

use super::key::is_valid_document_id;
use super::revision::{RevisionGenerator, RevisionId};
use super::view::DocumentView;
use super::{id_marker, is_system_attribute, FROM, ID, KEY, REV, TO};
use crate::collection::{ComputeOn, ComputedValues, LogicalCollection};
use crate::error::{ErrorCode, WriteError, WriteResult};

/// Construction options for one document
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions<'a> {
    /// Trust the supplied `_key`/`_rev`
    pub is_restore: bool,
    /// Explicit nulls in an update patch are stored rather than deleting
    pub keep_null: bool,
    /// Nested objects are merged by update rather than replaced
    pub merge_objects: bool,
    /// Reuse the previous revision when the content does not change
    pub allow_no_op: bool,
    /// Computed values to apply, if any trigger for this operation
    pub computed: Option<&'a ComputedValues>,
}

impl Default for BuildOptions<'_> {
    fn default() -> Self {
        Self {
            is_restore: false,
            keep_null: true,
            merge_objects: true,
            allow_no_op: false,
            computed: None,
        }
    }
}

/// A fully formed document, ready for storage.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltDocument {
    pub document: Map<String, Value>,
    pub revision: RevisionId,
    /// Content is identical to the previous version, revision reused
    pub no_op: bool,
}

/// Build the document stored by an insert.
pub fn new_object_for_insert(
    collection: &LogicalCollection,
    value: &Map<String, Value>,
    options: &BuildOptions<'_>,
    revisions: &RevisionGenerator,
) -> WriteResult<BuiltDocument> {
    let key = match value.get(KEY) {
        Some(Value::String(key)) => {
            collection.key_generator().validate(key, options.is_restore)?;
            key.clone()
        }
        Some(_) => return Err(WriteError::key_bad("illegal document key: not a string")),
        None => collection.key_generator().generate(),
    };

    let edges = if collection.is_edge() {
        Some((
            edge_attribute(value.get(FROM))?,
            edge_attribute(value.get(TO))?,
        ))
    } else {
        None
    };

    let revision = choose_revision(value, options.is_restore, revisions);

    let mut document = Map::with_capacity(value.len() + 3);
    document.insert(KEY.to_string(), Value::String(key));
    document.insert(ID.to_string(), id_marker(collection.id()));
    document.insert(REV.to_string(), Value::String(revision.encode()));
    if let Some((from, to)) = edges {
        document.insert(FROM.to_string(), Value::String(from));
        document.insert(TO.to_string(), Value::String(to));
    }
    for (k, v) in value.iter().filter(|(k, _)| !is_system_attribute(k)) {
        document.insert(k.clone(), v.clone());
    }
    if let Some(computed) = options.computed {
        computed.apply(&mut document, ComputeOn::Insert);
    }

    Ok(BuiltDocument {
        document,
        revision,
        no_op: false,
    })
}

/// Build the document stored by an update: `patch` merged into `old`.
pub fn merge_objects_for_update(
    collection: &LogicalCollection,
    old: &Map<String, Value>,
    patch: &Map<String, Value>,
    options: &BuildOptions<'_>,
    revisions: &RevisionGenerator,
) -> WriteResult<BuiltDocument> {
    let old_view = DocumentView::new(old);
    let edges = if collection.is_edge() {
        Some((
            patched_edge_attribute(patch.get(FROM), old_view.from())?,
            patched_edge_attribute(patch.get(TO), old_view.to())?,
        ))
    } else {
        None
    };

    let user = merge_maps(old, patch, options.keep_null, options.merge_objects, true);
    let unchanged = options.allow_no_op
        && edges_unchanged(&edges, &old_view)
        && user == old_view.user_object();

    assemble(old_view, edges, user, patch, unchanged, ComputeOn::Update, options, revisions)
}

/// Build the document stored by a replace: user attributes of `value` only.
pub fn new_object_for_replace(
    collection: &LogicalCollection,
    old: &Map<String, Value>,
    value: &Map<String, Value>,
    options: &BuildOptions<'_>,
    revisions: &RevisionGenerator,
) -> WriteResult<BuiltDocument> {
    let old_view = DocumentView::new(old);
    let edges = if collection.is_edge() {
        Some((
            edge_attribute(value.get(FROM))?,
            edge_attribute(value.get(TO))?,
        ))
    } else {
        None
    };

    let user: Map<String, Value> = value
        .iter()
        .filter(|(k, _)| !is_system_attribute(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let unchanged = options.allow_no_op
        && edges_unchanged(&edges, &old_view)
        && user == old_view.user_object();

    assemble(old_view, edges, user, value, unchanged, ComputeOn::Replace, options, revisions)
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    old: DocumentView<'_>,
    edges: Option<(String, String)>,
    user: Map<String, Value>,
    incoming: &Map<String, Value>,
    unchanged: bool,
    trigger: ComputeOn,
    options: &BuildOptions<'_>,
    revisions: &RevisionGenerator,
) -> WriteResult<BuiltDocument> {
    let key = old
        .key()
        .ok_or_else(|| WriteError::internal("stored document without _key"))?;

    let revision = match (unchanged, old.rev()) {
        (true, Some(previous)) => previous,
        _ => choose_revision(incoming, options.is_restore, revisions),
    };

    let mut document = Map::with_capacity(user.len() + 5);
    document.insert(KEY.to_string(), Value::String(key.to_string()));
    document.insert(
        ID.to_string(),
        old.id().cloned().unwrap_or(Value::Null),
    );
    document.insert(REV.to_string(), Value::String(revision.encode()));
    if let Some((from, to)) = edges {
        document.insert(FROM.to_string(), Value::String(from));
        document.insert(TO.to_string(), Value::String(to));
    }
    document.extend(user);
    if !unchanged {
        if let Some(computed) = options.computed {
            computed.apply(&mut document, trigger);
        }
    }

    Ok(BuiltDocument {
        document,
        revision,
        no_op: unchanged,
    })
}

/// Restores keep a supplied, parseable `_rev`; everything else draws a new one.
fn choose_revision(
    value: &Map<String, Value>,
    is_restore: bool,
    revisions: &RevisionGenerator,
) -> RevisionId {
    if is_restore {
        if let Some(rev) = value.get(REV).and_then(RevisionId::from_value) {
            if rev.is_set() {
                revisions.observe(rev);
                return rev;
            }
        }
    }
    revisions.next()
}

fn edge_attribute(value: Option<&Value>) -> WriteResult<String> {
    match value {
        Some(Value::String(id)) if is_valid_document_id(id) => Ok(id.clone()),
        _ => Err(WriteError::from_code(ErrorCode::InvalidEdgeAttribute)),
    }
}

fn patched_edge_attribute(patch: Option<&Value>, old: Option<&str>) -> WriteResult<String> {
    match patch {
        Some(_) => edge_attribute(patch),
        None => old
            .map(str::to_string)
            .ok_or_else(|| WriteError::from_code(ErrorCode::InvalidEdgeAttribute)),
    }
}

fn edges_unchanged(edges: &Option<(String, String)>, old: &DocumentView<'_>) -> bool {
    match edges {
        Some((from, to)) => old.from() == Some(from.as_str()) && old.to() == Some(to.as_str()),
        None => true,
    }
}

/// Merge `patch` into `old`. Old attributes keep their position, new ones
/// are appended in patch order.
fn merge_maps(
    old: &Map<String, Value>,
    patch: &Map<String, Value>,
    keep_null: bool,
    merge_objects: bool,
    top_level: bool,
) -> Map<String, Value> {
    let skip = |k: &str| top_level && is_system_attribute(k);
    let mut out = Map::with_capacity(old.len() + patch.len());

    for (k, old_value) in old.iter().filter(|(k, _)| !skip(k)) {
        match patch.get(k) {
            None => {
                out.insert(k.clone(), old_value.clone());
            }
            Some(Value::Null) if !keep_null => {}
            Some(Value::Object(nested_patch)) if merge_objects => {
                let merged = match old_value {
                    Value::Object(nested_old) => {
                        merge_maps(nested_old, nested_patch, keep_null, merge_objects, false)
                    }
                    _ => prune_nulls(nested_patch, keep_null),
                };
                out.insert(k.clone(), Value::Object(merged));
            }
            Some(value) => {
                out.insert(k.clone(), prune_value(value, keep_null));
            }
        }
    }

    for (k, value) in patch.iter().filter(|(k, _)| !skip(k)) {
        if old.contains_key(k) || (value.is_null() && !keep_null) {
            continue;
        }
        out.insert(k.clone(), prune_value(value, keep_null));
    }
    out
}

fn prune_value(value: &Value, keep_null: bool) -> Value {
    match value {
        Value::Object(map) if !keep_null => Value::Object(prune_nulls(map, keep_null)),
        other => other.clone(),
    }
}

fn prune_nulls(map: &Map<String, Value>, keep_null: bool) -> Map<String, Value> {
    map.iter()
        .filter(|(_, v)| keep_null || !v.is_null())
        .map(|(k, v)| (k.clone(), prune_value(v, keep_null)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{CollectionType, ComputedAttribute, LogicalCollection};
    use serde_json::json;
    use std::sync::Arc;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn documents() -> LogicalCollection {
        LogicalCollection::builder(7, "docs").build()
    }

    fn edges() -> LogicalCollection {
        LogicalCollection::builder(8, "links")
            .collection_type(CollectionType::Edge)
            .build()
    }

    fn keys(map: &Map<String, Value>) -> Vec<&str> {
        map.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_insert_orders_system_attributes_first() {
        let revisions = RevisionGenerator::new();
        let value = object(json!({"v": 1, "_key": "a", "w": 2}));
        let built =
            new_object_for_insert(&documents(), &value, &BuildOptions::default(), &revisions)
                .unwrap();
        assert_eq!(keys(&built.document), vec!["_key", "_id", "_rev", "v", "w"]);
        assert_eq!(built.document["_id"], id_marker(7));
        assert_eq!(DocumentView::new(&built.document).rev(), Some(built.revision));
    }

    #[test]
    fn test_insert_generates_key_when_missing() {
        let revisions = RevisionGenerator::new();
        let built = new_object_for_insert(
            &documents(),
            &object(json!({"v": 1})),
            &BuildOptions::default(),
            &revisions,
        )
        .unwrap();
        assert_eq!(built.document["_key"], json!("1"));
    }

    #[test]
    fn test_insert_rejects_bad_key() {
        let revisions = RevisionGenerator::new();
        let err = new_object_for_insert(
            &documents(),
            &object(json!({"_key": "no spaces"})),
            &BuildOptions::default(),
            &revisions,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::DocumentKeyBad);
    }

    #[test]
    fn test_restore_keeps_supplied_revision() {
        let revisions = RevisionGenerator::new();
        let options = BuildOptions {
            is_restore: true,
            ..Default::default()
        };
        let built = new_object_for_insert(
            &documents(),
            &object(json!({"_key": "a", "_rev": "_gx-AAAAAAB"})),
            &options,
            &revisions,
        )
        .unwrap();
        assert_eq!(built.document["_rev"], json!("_gx-AAAAAAB"));
        assert!(revisions.next() > built.revision);
    }

    #[test]
    fn test_edge_insert_requires_valid_handles() {
        let revisions = RevisionGenerator::new();
        let options = BuildOptions::default();
        let ok = new_object_for_insert(
            &edges(),
            &object(json!({"_to": "v/b", "_from": "v/a", "label": "x"})),
            &options,
            &revisions,
        )
        .unwrap();
        assert_eq!(
            keys(&ok.document),
            vec!["_key", "_id", "_rev", "_from", "_to", "label"]
        );

        let err = new_object_for_insert(
            &edges(),
            &object(json!({"_from": "v/a", "_to": "nope"})),
            &options,
            &revisions,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEdgeAttribute);
    }

    #[test]
    fn test_update_merges_nested_objects() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "1",
            "v": 1, "nested": {"x": 1, "y": 2}}));
        let patch = object(json!({"nested": {"y": 3, "z": 4}, "w": true}));
        let built =
            merge_objects_for_update(&documents(), &old, &patch, &BuildOptions::default(), &revisions)
                .unwrap();
        assert_eq!(built.document["nested"], json!({"x": 1, "y": 3, "z": 4}));
        assert_eq!(built.document["v"], json!(1));
        assert_eq!(built.document["w"], json!(true));
        assert_ne!(built.revision, RevisionId::new(1));
        assert!(!built.no_op);
    }

    #[test]
    fn test_update_without_merge_objects_replaces_nested() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "1", "nested": {"x": 1}}));
        let patch = object(json!({"nested": {"y": 2}}));
        let options = BuildOptions {
            merge_objects: false,
            ..Default::default()
        };
        let built = merge_objects_for_update(&documents(), &old, &patch, &options, &revisions).unwrap();
        assert_eq!(built.document["nested"], json!({"y": 2}));
    }

    #[test]
    fn test_keep_null_false_deletes_attributes() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "1",
            "gone": 1, "nested": {"x": 1, "y": 2}}));
        let patch = object(json!({"gone": null, "nested": {"x": null}, "fresh": {"n": null, "m": 1}}));
        let options = BuildOptions {
            keep_null: false,
            ..Default::default()
        };
        let built = merge_objects_for_update(&documents(), &old, &patch, &options, &revisions).unwrap();
        assert!(!built.document.contains_key("gone"));
        assert_eq!(built.document["nested"], json!({"y": 2}));
        assert_eq!(built.document["fresh"], json!({"m": 1}));
    }

    #[test]
    fn test_keep_null_true_stores_nulls() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "1", "v": 1}));
        let patch = object(json!({"v": null}));
        let built =
            merge_objects_for_update(&documents(), &old, &patch, &BuildOptions::default(), &revisions)
                .unwrap();
        assert_eq!(built.document["v"], Value::Null);
    }

    #[test]
    fn test_unchanged_update_reuses_revision() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "_gx-", "v": 1, "w": 2}));
        let patch = object(json!({"_key": "a", "v": 1}));
        let options = BuildOptions {
            allow_no_op: true,
            ..Default::default()
        };
        let built = merge_objects_for_update(&documents(), &old, &patch, &options, &revisions).unwrap();
        assert!(built.no_op);
        assert_eq!(built.revision, RevisionId::parse("_gx-").unwrap());
        assert_eq!(built.document["_rev"], json!("_gx-"));
    }

    #[test]
    fn test_replace_drops_old_attributes_and_keeps_identity() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "a", "_id": id_marker(7), "_rev": "1", "v": 1, "old": true}));
        let value = object(json!({"_key": "ignored", "v": 2}));
        let built =
            new_object_for_replace(&documents(), &old, &value, &BuildOptions::default(), &revisions)
                .unwrap();
        assert_eq!(keys(&built.document), vec!["_key", "_id", "_rev", "v"]);
        assert_eq!(built.document["_key"], json!("a"));
        assert_eq!(built.document["v"], json!(2));
    }

    #[test]
    fn test_edge_update_carries_old_handles() {
        let revisions = RevisionGenerator::new();
        let old = object(json!({"_key": "e", "_id": id_marker(8), "_rev": "1",
            "_from": "v/a", "_to": "v/b", "w": 1}));
        let built = merge_objects_for_update(
            &edges(),
            &old,
            &object(json!({"w": 2})),
            &BuildOptions::default(),
            &revisions,
        )
        .unwrap();
        assert_eq!(built.document["_from"], json!("v/a"));
        assert_eq!(built.document["_to"], json!("v/b"));

        let err = merge_objects_for_update(
            &edges(),
            &old,
            &object(json!({"_to": 5})),
            &BuildOptions::default(),
            &revisions,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidEdgeAttribute);
    }

    #[test]
    fn test_computed_values_fill_missing_attributes() {
        let revisions = RevisionGenerator::new();
        let computed = ComputedValues::new(vec![ComputedAttribute::new(
            "size",
            &[ComputeOn::Insert],
            false,
            Arc::new(|doc: &Map<String, Value>| json!(doc.len())),
        )]);
        let options = BuildOptions {
            computed: Some(&computed),
            ..Default::default()
        };
        let built = new_object_for_insert(
            &documents(),
            &object(json!({"_key": "a", "v": 1})),
            &options,
            &revisions,
        )
        .unwrap();
        assert_eq!(keys(&built.document), vec!["_key", "_id", "_rev", "v", "size"]);
        assert_eq!(built.document["size"], json!(4));
    }
}
