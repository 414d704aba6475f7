//! Per-operation document processing
//!
//! One processor runs one call: every document of a batch passes through
//! the same per-kind step, then the collected replication payload is shipped
//! once for the whole batch.
//!
//! Batch rules:
//! - a failing item is counted and reported in place; later items still run
//! - a resource-limit failure fails every remaining item with the same error
//! - role/replication and internal errors fail the whole call
//! - followers report errors only through the counts
//! - silent calls without errors return a `Null` buffer

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::batch::BatchOptions;
use super::helpers::{
    build_document_identity, is_stale_version, shard_keys_changed, smart_join_attribute_changed,
};
use super::options::{OperationKind, OperationOptions, OverwriteMode};
use super::result::{error_object, OperationResult};
use super::scratch::ScratchPool;
use super::state::TransactionState;
use crate::collection::LogicalCollection;
use crate::database::Database;
use crate::document::{
    extract_key, merge_objects_for_update, new_object_for_insert, new_object_for_replace, sanitize,
    BuildOptions, DocumentView, RevisionId, KEY, REV,
};
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::failure_point::points;
use crate::replication::{replicate_operations, ReplicationDecision};
use crate::schema::SchemaValidator;
use crate::storage::{StorageEngine, StoredDocument, TransactionId};

/// Everything one call needs, resolved before the first document.
pub(crate) struct ProcessorContext<'a> {
    pub database: &'a Database,
    pub collection: &'a Arc<LogicalCollection>,
    pub state: &'a TransactionState,
    pub scratch: &'a ScratchPool<Vec<Value>>,
    pub options: OperationOptions,
    pub decision: ReplicationDecision,
    pub batch: BatchOptions,
}

impl ProcessorContext<'_> {
    fn trx(&self) -> TransactionId {
        self.state.id()
    }

    fn storage(&self) -> &dyn StorageEngine {
        self.database.storage().as_ref()
    }

    fn is_follower(&self) -> bool {
        self.decision.is_follower()
    }

    fn replicates(&self) -> bool {
        self.decision.replicates(self.collection.replication_version())
    }

    fn build_options(&self, allow_no_op: bool) -> BuildOptions<'_> {
        BuildOptions {
            is_restore: self.options.is_restore,
            keep_null: self.options.keep_null,
            merge_objects: self.options.merge_objects,
            allow_no_op,
            computed: self.batch.computed.as_deref(),
        }
    }

    fn track_wait_for_sync(&self) {
        if (self.collection.wait_for_sync() && !self.options.is_restore) || self.options.wait_for_sync {
            self.state.set_wait_for_sync();
        }
    }

    fn identity(
        &self,
        key: &str,
        revision: RevisionId,
        old_revision: Option<RevisionId>,
        old: Option<&Map<String, Value>>,
        new: Option<&Map<String, Value>>,
    ) -> Value {
        build_document_identity(self.collection, key, revision, old_revision, old, new)
    }

    /// Attach the found revision to a conflict of a single-document call.
    fn with_found(&self, error: WriteError, key: &str, found: &StoredDocument, is_array: bool) -> Failed {
        let report = (error.code() == ErrorCode::Conflict && !is_array && !self.is_follower())
            .then(|| {
                let old = self.options.return_old.then(|| found.document.as_ref());
                self.identity(key, found.revision, None, old, None)
            });
        Failed { error, report }
    }
}

#[derive(Debug, Default)]
struct Processed {
    /// Entry of the result buffer
    report: Option<Value>,
    /// Entry of the replication payload
    replicate: Option<Value>,
}

#[derive(Debug)]
struct Failed {
    error: WriteError,
    /// Diagnostics of a failed single-document call
    report: Option<Value>,
}

impl From<WriteError> for Failed {
    fn from(error: WriteError) -> Self {
        Self { error, report: None }
    }
}

type ItemResult = Result<Processed, Failed>;

pub(crate) enum OperationProcessor<'a> {
    Read(ProcessorContext<'a>),
    Insert(ProcessorContext<'a>),
    Update(ProcessorContext<'a>),
    Replace(ProcessorContext<'a>),
    Remove(ProcessorContext<'a>),
}

impl<'a> OperationProcessor<'a> {
    pub fn new(kind: OperationKind, context: ProcessorContext<'a>) -> WriteResult<Self> {
        Ok(match kind {
            OperationKind::Read => Self::Read(context),
            OperationKind::Insert => Self::Insert(context),
            OperationKind::Update => Self::Update(context),
            OperationKind::Replace => Self::Replace(context),
            OperationKind::Remove => Self::Remove(context),
            other => {
                return Err(WriteError::internal(format!(
                    "no document processor for {}",
                    other
                )))
            }
        })
    }

    fn context(&self) -> &ProcessorContext<'a> {
        match self {
            Self::Read(c) | Self::Insert(c) | Self::Update(c) | Self::Replace(c) | Self::Remove(c) => c,
        }
    }

    fn kind(&self) -> OperationKind {
        match self {
            Self::Read(_) => OperationKind::Read,
            Self::Insert(_) => OperationKind::Insert,
            Self::Update(_) => OperationKind::Update,
            Self::Replace(_) => OperationKind::Replace,
            Self::Remove(_) => OperationKind::Remove,
        }
    }

    fn process(&self, value: &Value, is_array: bool) -> ItemResult {
        match self {
            Self::Read(c) => read_document(c, value, is_array),
            Self::Insert(c) => insert_document(c, value, is_array),
            Self::Update(c) => modify_document(c, value, is_array, true),
            Self::Replace(c) => modify_document(c, value, is_array, false),
            Self::Remove(c) => remove_document(c, value, is_array),
        }
    }

    /// Run the call over a single document or an array of documents.
    pub async fn execute(self, value: &Value) -> WriteResult<OperationResult> {
        let ctx = self.context();
        let failure_points = ctx.database.failure_points();
        let is_insert = self.kind() == OperationKind::Insert;
        let mut payload = ctx.scratch.checkout();

        let mut outcome = match value {
            Value::Array(items) => {
                let mut results = Vec::with_capacity(items.len());
                let mut error_counts = BTreeMap::new();
                let mut resource_error: Option<WriteError> = None;
                for item in items {
                    let processed = match &resource_error {
                        Some(error) => Err(Failed::from(error.clone())),
                        None if is_insert && failure_points.is_enabled(points::INSERT_FAKE_RESULT_1) => {
                            Err(Failed::from(WriteError::debug(points::INSERT_FAKE_RESULT_1)))
                        }
                        None => self.process(item, true),
                    };
                    match processed {
                        Ok(processed) => {
                            results.extend(processed.report);
                            payload.extend(processed.replicate);
                        }
                        Err(failed) => {
                            let error = failed.error;
                            if error.is_whole_call() {
                                return Err(error);
                            }
                            if error.is_resource_limit() && resource_error.is_none() {
                                resource_error = Some(error.clone());
                            }
                            *error_counts.entry(error.code()).or_insert(0) += 1;
                            if !ctx.is_follower() {
                                results.push(error_object(&error));
                            }
                        }
                    }
                }
                OperationResult {
                    result: Ok(()),
                    buffer: Value::Array(results),
                    error_counts,
                }
            }
            single => match self.process(single, false) {
                Ok(processed) => {
                    payload.extend(processed.replicate);
                    OperationResult::ok(processed.report.unwrap_or_else(|| json!({})))
                }
                Err(failed) if failed.error.is_whole_call() => return Err(failed.error),
                Err(failed) => {
                    return Ok(OperationResult::failed_with(
                        failed.error,
                        failed.report.unwrap_or(Value::Null),
                    ))
                }
            },
        };

        if is_insert && failure_points.is_enabled(points::INSERT_FAKE_RESULT_2) {
            return Ok(OperationResult::failed(WriteError::debug(points::INSERT_FAKE_RESULT_2)));
        }

        if ctx.replicates() && !payload.is_empty() {
            replicate_operations(
                ctx.database,
                ctx.collection,
                ctx.trx(),
                &ctx.decision.followers,
                &ctx.options,
                &payload,
                self.kind(),
            )
            .await?;
        } else if self.kind() != OperationKind::Read {
            ctx.database.intermediate_commit_if_required(ctx.trx()).await?;
        }

        if ctx.options.silent && !outcome.has_item_errors() {
            outcome.buffer = Value::Null;
        }
        Ok(outcome)
    }
}

fn insert_document(ctx: &ProcessorContext<'_>, value: &Value, is_array: bool) -> ItemResult {
    let object = value.as_object().ok_or_else(WriteError::type_invalid)?;

    let key = object.get(KEY).and_then(Value::as_str);
    let existing = match (ctx.options.overwrite_mode, key) {
        (OverwriteMode::Conflict, _) | (_, None) => None,
        (_, Some(key)) => ctx
            .storage()
            .lookup_for_update(ctx.trx(), ctx.collection, key)?
            .map(|found| (key, found)),
    };

    match existing {
        None => insert_new(ctx, object),
        Some((key, found)) => match ctx.options.overwrite_mode {
            OverwriteMode::Ignore => Ok(Processed {
                report: (!ctx.options.silent).then(|| ctx.identity(key, found.revision, None, None, None)),
                replicate: None,
            }),
            mode => modify_existing(ctx, object, key, &found, mode == OverwriteMode::Update, false, is_array),
        },
    }
}

fn insert_new(ctx: &ProcessorContext<'_>, object: &Map<String, Value>) -> ItemResult {
    ctx.database.failure_points().check(points::COLLECTION_INSERT)?;

    let built = new_object_for_insert(
        ctx.collection,
        object,
        &ctx.build_options(false),
        ctx.database.revisions(),
    )?;
    if ctx.batch.validate_smart_join {
        if let Some(attribute) = ctx.collection.smart_join_attribute() {
            if !built.document.get(attribute).map_or(false, Value::is_string) {
                return Err(WriteError::from_code(ErrorCode::InvalidSmartJoinAttribute).into());
            }
        }
    }
    if let Some(schema) = &ctx.batch.schema {
        SchemaValidator::new(schema).validate(&built.document, None)?;
    }

    let key = DocumentView::new(&built.document)
        .key()
        .unwrap_or_default()
        .to_string();
    if ctx.options.is_restore {
        ctx.collection.key_generator().track(&key);
    }
    let stored = ctx
        .storage()
        .insert(ctx.trx(), ctx.collection, built.revision, built.document)?;
    ctx.track_wait_for_sync();
    ctx.database.metrics().increment_inserted();

    Ok(Processed {
        report: (!ctx.options.silent).then(|| {
            let new = ctx.options.return_new.then(|| stored.document.as_ref());
            ctx.identity(&key, stored.revision, None, None, new)
        }),
        replicate: ctx
            .replicates()
            .then(|| Value::Object(sanitize(&stored.document, ctx.collection.name()))),
    })
}

fn modify_document(ctx: &ProcessorContext<'_>, value: &Value, is_array: bool, is_update: bool) -> ItemResult {
    let object = value.as_object().ok_or_else(WriteError::type_invalid)?;
    let key = match object.get(KEY) {
        None => return Err(WriteError::handle_bad().into()),
        Some(Value::String(key)) if !key.is_empty() => key.as_str(),
        Some(_) => return Err(WriteError::key_bad("invalid document key").into()),
    };
    let found = ctx
        .storage()
        .lookup_for_update(ctx.trx(), ctx.collection, key)?
        .ok_or_else(WriteError::document_not_found)?;
    modify_existing(ctx, object, key, &found, is_update, true, is_array)
}

/// Update or replace `found` with `object`.
///
/// Insert-with-overwrite enters here with `check_revision` off.
fn modify_existing(
    ctx: &ProcessorContext<'_>,
    object: &Map<String, Value>,
    key: &str,
    found: &StoredDocument,
    is_update: bool,
    check_revision: bool,
    is_array: bool,
) -> ItemResult {
    let point = if is_update {
        points::COLLECTION_UPDATE
    } else {
        points::COLLECTION_REPLACE
    };
    ctx.database.failure_points().check(point)?;

    let old = found.document.as_ref();
    if check_revision && !ctx.options.ignore_revs && !ctx.is_follower() {
        let expected = object.get(REV).and_then(RevisionId::from_value);
        if expected.map_or(false, |rev| rev.is_set() && rev != found.revision) {
            return Err(ctx.with_found(WriteError::conflict(), key, found, is_array));
        }
    }

    if let Some(attribute) = ctx.options.version_attribute.as_deref() {
        if is_stale_version(attribute, old, object) {
            ctx.database.metrics().increment_noop_updates();
            return Ok(unchanged(ctx, key, found));
        }
    }

    let allow_no_op = !ctx.options.is_restore
        && !ctx.options.is_synchronous_replication()
        && ctx.batch.computed.is_none();
    let options = ctx.build_options(allow_no_op);
    let revisions = ctx.database.revisions();
    let built = if is_update {
        merge_objects_for_update(ctx.collection, old, object, &options, revisions)?
    } else {
        new_object_for_replace(ctx.collection, old, object, &options, revisions)?
    };

    if built.no_op {
        ctx.track_wait_for_sync();
        ctx.database.metrics().increment_noop_updates();
        return Ok(unchanged(ctx, key, found));
    }

    if ctx.batch.validate_shard_keys && shard_keys_changed(ctx.collection, old, object, is_update) {
        return Err(WriteError::from_code(ErrorCode::MustNotChangeShardingAttributes).into());
    }
    if ctx.batch.validate_smart_join && smart_join_attribute_changed(ctx.collection, old, object, is_update) {
        return Err(WriteError::from_code(ErrorCode::MustNotChangeSmartJoinAttribute).into());
    }
    if let Some(schema) = &ctx.batch.schema {
        SchemaValidator::new(schema).validate(&built.document, Some(old))?;
    }

    let stored = if is_update {
        ctx.storage()
            .update(ctx.trx(), ctx.collection, found, built.revision, built.document)
    } else {
        ctx.storage()
            .replace(ctx.trx(), ctx.collection, found, built.revision, built.document)
    }
    .map_err(|e| ctx.with_found(e, key, found, is_array))?;

    ctx.track_wait_for_sync();
    if is_update {
        ctx.database.metrics().increment_updated();
    } else {
        ctx.database.metrics().increment_replaced();
    }

    Ok(Processed {
        report: (!ctx.options.silent).then(|| {
            ctx.identity(
                key,
                stored.revision,
                Some(found.revision),
                ctx.options.return_old.then_some(old),
                ctx.options.return_new.then(|| stored.document.as_ref()),
            )
        }),
        replicate: ctx
            .replicates()
            .then(|| Value::Object(sanitize(&stored.document, ctx.collection.name()))),
    })
}

/// Result of a write that leaves the stored document as it is.
fn unchanged(ctx: &ProcessorContext<'_>, key: &str, found: &StoredDocument) -> Processed {
    let old = found.document.as_ref();
    Processed {
        report: (!ctx.options.silent).then(|| {
            ctx.identity(
                key,
                found.revision,
                Some(found.revision),
                ctx.options.return_old.then_some(old),
                ctx.options.return_new.then_some(old),
            )
        }),
        replicate: None,
    }
}

fn remove_document(ctx: &ProcessorContext<'_>, value: &Value, is_array: bool) -> ItemResult {
    let key = extract_key(value).unwrap_or_default();
    if key.is_empty() {
        return Err(WriteError::handle_bad().into());
    }
    let found = ctx
        .storage()
        .lookup_for_update(ctx.trx(), ctx.collection, key)?
        .ok_or_else(WriteError::document_not_found)?;
    ctx.database
        .failure_points()
        .check(points::COLLECTION_REMOVE)?;

    if !ctx.options.ignore_revs && !ctx.is_follower() {
        let expected = value.get(REV).and_then(RevisionId::from_value);
        if value.is_object() && expected.map_or(false, |rev| rev.is_set() && rev != found.revision) {
            return Err(ctx.with_found(WriteError::conflict(), key, &found, is_array));
        }
    }

    ctx.storage()
        .remove(ctx.trx(), ctx.collection, &found)
        .map_err(|e| ctx.with_found(e, key, &found, is_array))?;
    ctx.track_wait_for_sync();
    ctx.database.metrics().increment_removed();

    Ok(Processed {
        report: (!ctx.options.silent).then(|| {
            let old = ctx.options.return_old.then(|| found.document.as_ref());
            ctx.identity(key, found.revision, None, old, None)
        }),
        replicate: ctx
            .replicates()
            .then(|| json!({ KEY: key, REV: found.revision.encode() })),
    })
}

fn read_document(ctx: &ProcessorContext<'_>, value: &Value, is_array: bool) -> ItemResult {
    let key = extract_key(value).unwrap_or_default();
    if key.is_empty() {
        return Err(WriteError::handle_bad().into());
    }
    let found = ctx
        .storage()
        .read(ctx.trx(), ctx.collection, key)?
        .ok_or_else(WriteError::document_not_found)?;

    if !ctx.options.ignore_revs && value.is_object() {
        let expected = value.get(REV).and_then(RevisionId::from_value);
        if expected.map_or(false, |rev| rev.is_set() && rev != found.revision) {
            return Err(Failed {
                error: WriteError::conflict(),
                report: (!is_array).then(|| ctx.identity(key, found.revision, None, None, None)),
            });
        }
    }

    let report = if !ctx.options.silent {
        Some(Value::Object(sanitize(&found.document, ctx.collection.name())))
    } else if is_array {
        Some(Value::Null)
    } else {
        None
    };
    Ok(Processed {
        report,
        replicate: None,
    })
}
