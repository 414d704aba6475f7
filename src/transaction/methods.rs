//! Transaction facade
//!
//! [`TransactionMethods`] is the entry point of the write path. It owns the
//! transaction lifecycle and routes every operation:
//! - on a coordinator, to the cluster methods
//! - everywhere else, through role resolution into a document processor
//!
//! Dropping a running top-level transaction aborts it; the abort never
//! raises, failures are logged. After an operation fails as a whole the
//! transaction refuses to commit and has to be aborted.

use serde_json::{json, Value};
use std::sync::Arc;

use super::batch::BatchOptions;
use super::context::TransactionContext;
use super::hooks::apply_status_change_hooks;
use super::options::{
    AccessMode, CountType, OperationKind, OperationOptions, TransactionCollections,
    TransactionOptions,
};
use super::processor::{OperationProcessor, ProcessorContext};
use super::result::OperationResult;
use super::state::{TransactionState, TransactionStatus};
use crate::collection::LogicalCollection;
use crate::database::Database;
use crate::document::sanitize;
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::failure_point::points;
use crate::observability::{log_event, Event, Logger};
use crate::replication::{determine_replication, replicate_truncate, ReplicationDecision};
use crate::storage::TransactionId;

pub struct TransactionMethods {
    context: Arc<TransactionContext>,
    state: Arc<TransactionState>,
    /// Owns the state; false for nested transactions
    main: bool,
    declared: Vec<(Arc<LogicalCollection>, AccessMode)>,
}

impl TransactionMethods {
    /// Create a transaction over the declared collections.
    ///
    /// Joins the running transaction of `context` if there is one.
    pub fn new(
        context: Arc<TransactionContext>,
        collections: TransactionCollections,
        options: TransactionOptions,
    ) -> WriteResult<Self> {
        let database = Arc::clone(context.database());
        let mut declared = Vec::new();
        if !database.server().is_coordinator() {
            for (name, mode) in collections.declared() {
                declared.push((database.collections().lookup(&name)?, mode));
            }
        }

        let (state, main) = context.acquire_state(&options);
        if main {
            for (collection, mode) in &declared {
                state.add_collection(Arc::clone(collection), *mode);
            }
        }
        Ok(Self {
            context,
            state,
            main,
            declared,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.state.id()
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    pub fn is_main(&self) -> bool {
        self.main
    }

    pub fn state(&self) -> &Arc<TransactionState> {
        &self.state
    }

    pub fn context(&self) -> &Arc<TransactionContext> {
        &self.context
    }

    pub fn database(&self) -> &Database {
        self.context.database()
    }

    /// Lock the declared collections and start the transaction.
    ///
    /// A nested transaction only makes its own collections usable.
    pub async fn begin(&self) -> WriteResult<()> {
        if !self.main {
            for (collection, mode) in &self.declared {
                self.state.use_collection(collection, *mode).await?;
            }
            return Ok(());
        }
        if self.state.status() != TransactionStatus::Created {
            return Err(WriteError::transaction_internal(
                "invalid transaction status on begin",
            ));
        }

        let database = self.database();
        if let Err(e) = self.state.lock_collections().await {
            self.state.release_locks();
            return Err(e);
        }
        let started = if database.server().is_coordinator() {
            match database.cluster() {
                Some(cluster) => cluster.begin_on_servers(self.id()).await,
                None => Ok(()),
            }
        } else {
            database
                .storage()
                .begin(self.id(), self.state.intermediate_commits())
        };
        if let Err(e) = started {
            self.state.release_locks();
            return Err(e);
        }

        self.state.set_status(TransactionStatus::Running);
        log_event(
            Event::TransactionBegin,
            &[("database", database.name()), ("trx", &self.id().to_string())],
        );
        Ok(())
    }

    pub async fn commit(&self) -> WriteResult<()> {
        let database = self.database();
        database.failure_points().check(points::COMMIT_FAIL)?;
        if self.state.status() != TransactionStatus::Running {
            return Err(WriteError::transaction_internal(
                "transaction not running on commit",
            ));
        }
        if self.state.must_abort() {
            return Err(WriteError::transaction_internal(
                "transaction has a failed write and must be aborted",
            ));
        }
        if !self.state.is_read_only() && database.server().is_read_only() {
            return Err(WriteError::new(
                ErrorCode::ReadOnly,
                "server is in read-only mode",
            ));
        }
        if !self.main {
            return Ok(());
        }

        if database.server().is_coordinator() {
            if let Some(cluster) = database.cluster() {
                cluster.commit_on_servers(self.id()).await?;
            }
        } else {
            database
                .storage()
                .commit(self.id(), self.state.wait_for_sync())?;
        }
        database.metrics().increment_committed();
        self.finish_state(TransactionStatus::Committed)
    }

    pub async fn abort(&self) -> WriteResult<()> {
        let database = self.database();
        if self.state.status() != TransactionStatus::Running {
            return Err(WriteError::transaction_internal(
                "transaction not running on abort",
            ));
        }
        if !self.main {
            return Ok(());
        }

        if database.server().is_coordinator() {
            if let Some(cluster) = database.cluster() {
                if let Err(e) = cluster.abort_on_servers(self.id()).await {
                    Logger::warn(
                        "CLUSTER_ABORT_FAILED",
                        &[("error", e.message()), ("trx", &self.id().to_string())],
                    );
                }
            }
        } else {
            database.storage().abort(self.id())?;
        }
        database.metrics().increment_aborted();
        self.finish_state(TransactionStatus::Aborted)
    }

    /// Commit if `result` is ok, abort otherwise and hand `result` back.
    pub async fn finish(&self, result: WriteResult<()>) -> WriteResult<()> {
        match result {
            Ok(()) => self.commit().await,
            Err(e) => {
                if let Err(abort_error) = self.abort().await {
                    Logger::warn(
                        "TRANSACTION_ABORT_FAILED",
                        &[("error", abort_error.message()), ("trx", &self.id().to_string())],
                    );
                }
                Err(e)
            }
        }
    }

    fn finish_state(&self, status: TransactionStatus) -> WriteResult<()> {
        self.state.set_status(status);
        self.state.release_locks();
        let event = if status == TransactionStatus::Committed {
            Event::TransactionCommit
        } else {
            Event::TransactionAbort
        };
        log_event(
            event,
            &[("database", self.database().name()), ("trx", &self.id().to_string())],
        );
        apply_status_change_hooks(self.database().hooks(), self.id(), status)
    }

    pub async fn insert(
        &self,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.modify(OperationKind::Insert, collection, value, options).await
    }

    /// Merge each value into the stored document with the same `_key`.
    pub async fn update(
        &self,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.modify(OperationKind::Update, collection, value, options).await
    }

    pub async fn replace(
        &self,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.modify(OperationKind::Replace, collection, value, options).await
    }

    /// Remove documents given as objects with `_key`, keys, or document ids.
    pub async fn remove(
        &self,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.modify(OperationKind::Remove, collection, value, options).await
    }

    /// Read documents given as objects with `_key`, keys, or document ids.
    pub async fn document(
        &self,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.ensure_running()?;
        if let Some(result) = check_input(OperationKind::Read, value)? {
            return Ok(result);
        }
        let result = if self.database().server().is_coordinator() {
            self.forward(OperationKind::Read, collection, value, options).await
        } else {
            self.read_local(collection, value, options).await
        };
        self.audit(OperationKind::Read, collection, &result);
        result
    }

    /// Number of documents visible to this transaction.
    ///
    /// Every count type is exact outside a coordinator.
    pub async fn count(&self, collection: &str, count_type: CountType) -> WriteResult<OperationResult> {
        self.ensure_running()?;
        let database = self.database();
        if database.server().is_coordinator() {
            let cluster = self.cluster_methods()?;
            return cluster.count(self.id(), collection, count_type).await;
        }
        let collection = self.use_collection(collection, AccessMode::Read).await?;
        let count = database.storage().count(self.id(), &collection)?;
        Ok(OperationResult::ok(json!(count)))
    }

    /// Every document of the collection, in key order.
    pub async fn all(&self, collection: &str, options: &OperationOptions) -> WriteResult<OperationResult> {
        self.ensure_running()?;
        let database = self.database();
        if database.server().is_coordinator() {
            return Err(WriteError::internal("all() is not available on a coordinator"));
        }
        let collection = self.use_collection(collection, AccessMode::Read).await?;
        self.check_read_allowed(&collection, options)?;
        let documents = database
            .storage()
            .all(self.id(), &collection)?
            .iter()
            .map(|stored| Value::Object(sanitize(&stored.document, collection.name())))
            .collect();
        Ok(OperationResult::ok(Value::Array(documents)))
    }

    /// Remove every document of the collection.
    pub async fn truncate(&self, collection: &str, options: &OperationOptions) -> WriteResult<OperationResult> {
        self.ensure_running()?;
        let database = self.database();
        let result = if database.server().is_coordinator() {
            self.forward(OperationKind::Truncate, collection, &Value::Null, options)
                .await
        } else {
            self.truncate_local(collection, options).await
        };
        self.audit(OperationKind::Truncate, collection, &result);
        result
    }

    async fn truncate_local(&self, name: &str, options: &OperationOptions) -> WriteResult<OperationResult> {
        let database = self.database();
        let collection = self.use_collection(name, AccessMode::Write).await?;
        let mut options = options.clone();
        let decision = determine_replication(
            database,
            &collection,
            OperationKind::Truncate,
            None,
            self.context.is_replicated(),
            &mut options,
        )?;
        database.storage().truncate(self.id(), &collection)?;
        if decision.is_leader() {
            let replicated =
                replicate_truncate(database, &collection, self.id(), &decision.followers, &options).await;
            if replicated.is_err() {
                self.state.set_must_abort();
            }
            replicated?;
        }
        Ok(OperationResult::ok(Value::Null))
    }

    async fn modify(
        &self,
        kind: OperationKind,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        self.ensure_running()?;
        if let Some(result) = check_input(kind, value)? {
            return Ok(result);
        }
        let result = if self.database().server().is_coordinator() {
            self.forward(kind, collection, value, options).await
        } else {
            self.modify_local(kind, collection, value, options).await
        };
        self.audit(kind, collection, &result);
        result
    }

    async fn modify_local(
        &self,
        kind: OperationKind,
        name: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        let database = self.database();
        let collection = self.use_collection(name, AccessMode::Write).await?;
        let mut options = options.clone();
        let decision = determine_replication(
            database,
            &collection,
            kind,
            Some(value),
            self.context.is_replicated(),
            &mut options,
        )?;
        let batch = BatchOptions::build(&options, &collection, kind, database.server().is_db_server());
        let processor = OperationProcessor::new(
            kind,
            ProcessorContext {
                database,
                collection: &collection,
                state: &self.state,
                scratch: self.context.scratch(),
                options,
                decision,
                batch,
            },
        )?;
        let result = processor.execute(value).await;
        if result.is_err() {
            // staged documents were neither replicated nor reported
            self.state.set_must_abort();
        }
        result
    }

    async fn read_local(&self, name: &str, value: &Value, options: &OperationOptions) -> WriteResult<OperationResult> {
        let database = self.database();
        let collection = self.use_collection(name, AccessMode::Read).await?;
        self.check_read_allowed(&collection, options)?;
        let processor = OperationProcessor::new(
            OperationKind::Read,
            ProcessorContext {
                database,
                collection: &collection,
                state: &self.state,
                scratch: self.context.scratch(),
                options: options.clone(),
                decision: ReplicationDecision::none(),
                batch: BatchOptions::default(),
            },
        )?;
        processor.execute(value).await
    }

    /// Followers only serve reads that explicitly allow dirty data.
    fn check_read_allowed(&self, collection: &LogicalCollection, options: &OperationOptions) -> WriteResult<()> {
        if self.database().server().is_db_server()
            && !collection.follower_info().is_leader()
            && !options.allow_dirty_reads
        {
            return Err(WriteError::leader_resigned());
        }
        Ok(())
    }

    async fn forward(
        &self,
        kind: OperationKind,
        collection: &str,
        value: &Value,
        options: &OperationOptions,
    ) -> WriteResult<OperationResult> {
        let cluster = self.cluster_methods()?;
        cluster.forward(self.id(), kind, collection, value, options).await
    }

    fn cluster_methods(&self) -> WriteResult<&Arc<dyn crate::cluster::ClusterMethods>> {
        self.database()
            .cluster()
            .ok_or_else(|| WriteError::internal("coordinator without cluster methods"))
    }

    async fn use_collection(&self, name: &str, mode: AccessMode) -> WriteResult<Arc<LogicalCollection>> {
        let collection = self.database().collections().lookup(name)?;
        self.state.use_collection(&collection, mode).await?;
        Ok(collection)
    }

    fn ensure_running(&self) -> WriteResult<()> {
        if self.state.status() != TransactionStatus::Running {
            return Err(WriteError::transaction_internal("transaction not running"));
        }
        Ok(())
    }

    fn audit(&self, kind: OperationKind, collection: &str, result: &WriteResult<OperationResult>) {
        let event = match kind {
            OperationKind::Insert => Event::DocumentCreate,
            OperationKind::Update => Event::DocumentModify,
            OperationKind::Replace => Event::DocumentReplace,
            OperationKind::Remove => Event::DocumentRemove,
            OperationKind::Read => Event::DocumentRead,
            OperationKind::Truncate => Event::CollectionTruncate,
            OperationKind::Count => return,
        };
        let code = match result {
            Ok(outcome) => outcome.error_code().map_or(0, |c| c.number()),
            Err(e) => e.code().number(),
        };
        log_event(
            event,
            &[
                ("code", &code.to_string()),
                ("collection", collection),
                ("database", self.database().name()),
            ],
        );
    }

    fn implicit_abort(&self) {
        let database = Arc::clone(self.context.database());
        let trx = self.id();
        if database.server().is_coordinator() {
            if let (Some(cluster), Ok(handle)) = (
                database.cluster().cloned(),
                tokio::runtime::Handle::try_current(),
            ) {
                handle.spawn(async move {
                    if let Err(e) = cluster.abort_on_servers(trx).await {
                        implicit_abort_failed(trx, &e);
                    }
                });
            }
        } else if let Err(e) = database.storage().abort(trx) {
            implicit_abort_failed(trx, &e);
        }
        database.metrics().increment_aborted();
        // hook failures are logged by the hook runner
        let _ = self.finish_state(TransactionStatus::Aborted);
    }
}

impl Drop for TransactionMethods {
    fn drop(&mut self) {
        if !self.main {
            return;
        }
        self.context.release_state(&self.state);
        if self.state.status() != TransactionStatus::Running {
            self.state.release_locks();
            return;
        }
        if self.state.is_read_only() {
            let database = self.database();
            if !database.server().is_coordinator() {
                if let Err(e) = database.storage().commit(self.id(), false) {
                    implicit_abort_failed(self.id(), &e);
                }
            }
            self.state.set_status(TransactionStatus::Committed);
            self.state.release_locks();
            return;
        }
        self.implicit_abort();
    }
}

fn implicit_abort_failed(trx: TransactionId, error: &WriteError) {
    log_event(
        Event::ImplicitAbortFailed,
        &[("error", error.message()), ("trx", &trx.to_string())],
    );
}

/// Reject values that are neither documents nor batches; short-circuit
/// empty batches.
fn check_input(kind: OperationKind, value: &Value) -> WriteResult<Option<OperationResult>> {
    match value {
        Value::Array(items) if items.is_empty() => Ok(Some(OperationResult::ok(json!([])))),
        Value::Array(_) | Value::Object(_) => Ok(None),
        Value::String(_) if matches!(kind, OperationKind::Remove | OperationKind::Read) => Ok(None),
        _ => Err(WriteError::type_invalid()),
    }
}

impl std::fmt::Debug for TransactionMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionMethods")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("main", &self.main)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ServerRole, ServerState};
    use crate::collection::LogicalCollection;

    fn setup() -> Arc<TransactionContext> {
        let database = Database::builder("db", ServerState::single()).build().unwrap();
        database.create_collection(LogicalCollection::builder(1, "docs"));
        database.create_collection(LogicalCollection::builder(2, "other"));
        TransactionContext::new(database)
    }

    fn write(name: &str) -> TransactionCollections {
        TransactionCollections::new().write(name)
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let ctx = setup();
        let err = TransactionMethods::new(ctx, write("missing"), TransactionOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DataSourceNotFound);
    }

    #[tokio::test]
    async fn test_operations_require_running_transaction() {
        let ctx = setup();
        let trx = TransactionMethods::new(ctx, write("docs"), TransactionOptions::default()).unwrap();
        let err = trx
            .insert("docs", &json!({"a": 1}), &OperationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransactionInternal);

        let err = trx.commit().await.unwrap_err();
        assert_eq!(err.message(), "transaction not running on commit");
        let err = trx.abort().await.unwrap_err();
        assert_eq!(err.message(), "transaction not running on abort");
    }

    #[tokio::test]
    async fn test_nested_transaction_joins_running_one() {
        let ctx = setup();
        let outer = TransactionMethods::new(Arc::clone(&ctx), write("docs"), TransactionOptions::default()).unwrap();
        outer.begin().await.unwrap();

        let inner = TransactionMethods::new(Arc::clone(&ctx), write("docs"), TransactionOptions::default()).unwrap();
        assert!(!inner.is_main());
        assert_eq!(inner.id(), outer.id());
        inner.begin().await.unwrap();
        inner
            .insert("docs", &json!({"_key": "n"}), &OperationOptions::default())
            .await
            .unwrap();
        // nested commit is a no-op
        inner.commit().await.unwrap();
        assert_eq!(outer.status(), TransactionStatus::Running);
        drop(inner);

        outer.commit().await.unwrap();
        assert_eq!(outer.status(), TransactionStatus::Committed);
    }

    #[tokio::test]
    async fn test_undeclared_write_collection_is_rejected() {
        let ctx = setup();
        let trx = TransactionMethods::new(ctx, write("docs"), TransactionOptions::default()).unwrap();
        trx.begin().await.unwrap();
        let err = trx
            .insert("other", &json!({}), &OperationOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransactionUnregisteredCollection);

        // reads of undeclared collections are added implicitly
        let count = trx.count("other", CountType::Normal).await.unwrap();
        assert_eq!(count.buffer, json!(0));
    }

    #[tokio::test]
    async fn test_input_shape() {
        let ctx = setup();
        let trx = TransactionMethods::new(ctx, write("docs"), TransactionOptions::default()).unwrap();
        trx.begin().await.unwrap();
        let options = OperationOptions::default();

        let err = trx.insert("docs", &json!(42), &options).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DocumentTypeInvalid);
        let err = trx.update("docs", &json!("key"), &options).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DocumentTypeInvalid);

        let empty = trx.insert("docs", &json!([]), &options).await.unwrap();
        assert_eq!(empty.buffer, json!([]));
    }

    #[tokio::test]
    async fn test_read_only_server_refuses_commit_of_writes() {
        let database = Database::builder("db", ServerState::new("SNGL", ServerRole::Single))
            .build()
            .unwrap();
        database.create_collection(LogicalCollection::builder(1, "docs"));
        let ctx = TransactionContext::new(Arc::clone(&database));
        let trx = TransactionMethods::new(ctx, write("docs"), TransactionOptions::default()).unwrap();
        trx.begin().await.unwrap();
        database.server().set_read_only(true);
        let err = trx.commit().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReadOnly);
        assert_eq!(err.message(), "server is in read-only mode");
    }
}
