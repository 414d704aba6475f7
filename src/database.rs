//! Database: the collaborators a transaction runs against
//!
//! Everything the write path needs is injected here once: server state,
//! collections, storage engine, follower transport, replicated log,
//! coordinator methods, status-change hooks, metrics and failure points.
//! There is no process-wide registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cluster::{ClusterMethods, FollowerTransport, ReplicatedLog, ServerState};
use crate::collection::{CollectionBuilder, CollectionRegistry, LogicalCollection};
use crate::config::{ConfigError, WriteConfig};
use crate::document::RevisionGenerator;
use crate::error::WriteResult;
use crate::failure_point::FailurePoints;
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::storage::{MemoryStorageEngine, StorageEngine, TransactionId};
use crate::transaction::TransactionHooks;

pub struct Database {
    name: String,
    server: Arc<ServerState>,
    collections: CollectionRegistry,
    storage: Arc<dyn StorageEngine>,
    transport: Option<Arc<dyn FollowerTransport>>,
    replicated_log: Option<Arc<dyn ReplicatedLog>>,
    cluster: Option<Arc<dyn ClusterMethods>>,
    hooks: Vec<Arc<dyn TransactionHooks>>,
    metrics: Arc<MetricsRegistry>,
    failure_points: Arc<FailurePoints>,
    config: WriteConfig,
    revisions: RevisionGenerator,
    next_transaction_id: AtomicU64,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("server", &self.server)
            .field("collections", &self.collections.names())
            .finish()
    }
}

impl Database {
    pub fn builder(name: impl Into<String>, server: ServerState) -> DatabaseBuilder {
        DatabaseBuilder::new(name, server)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &Arc<ServerState> {
        &self.server
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    /// Register a collection (shard) of this database.
    pub fn create_collection(&self, builder: CollectionBuilder) -> Arc<LogicalCollection> {
        self.collections.add(builder.build())
    }

    pub fn storage(&self) -> &Arc<dyn StorageEngine> {
        &self.storage
    }

    pub fn transport(&self) -> Option<&Arc<dyn FollowerTransport>> {
        self.transport.as_ref()
    }

    pub fn replicated_log(&self) -> Option<&Arc<dyn ReplicatedLog>> {
        self.replicated_log.as_ref()
    }

    pub fn cluster(&self) -> Option<&Arc<dyn ClusterMethods>> {
        self.cluster.as_ref()
    }

    pub fn hooks(&self) -> &[Arc<dyn TransactionHooks>] {
        &self.hooks
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn failure_points(&self) -> &Arc<FailurePoints> {
        &self.failure_points
    }

    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    /// Revision clock shared by every collection of this database
    pub fn revisions(&self) -> &RevisionGenerator {
        &self.revisions
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.next_transaction_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Flush the transaction's pending writes if it crossed its thresholds.
    pub async fn intermediate_commit_if_required(&self, trx: TransactionId) -> WriteResult<()> {
        if self.storage.intermediate_commit_if_required(trx).await? {
            self.metrics.increment_intermediate_commits();
            log_event(
                Event::IntermediateCommit,
                &[("database", &self.name), ("trx", &trx.to_string())],
            );
        }
        Ok(())
    }
}

/// Builder for [`Database`]
pub struct DatabaseBuilder {
    name: String,
    server: ServerState,
    storage: Option<Arc<dyn StorageEngine>>,
    transport: Option<Arc<dyn FollowerTransport>>,
    replicated_log: Option<Arc<dyn ReplicatedLog>>,
    cluster: Option<Arc<dyn ClusterMethods>>,
    hooks: Vec<Arc<dyn TransactionHooks>>,
    config: WriteConfig,
    failure_points: Option<Arc<FailurePoints>>,
}

impl DatabaseBuilder {
    pub fn new(name: impl Into<String>, server: ServerState) -> Self {
        Self {
            name: name.into(),
            server,
            storage: None,
            transport: None,
            replicated_log: None,
            cluster: None,
            hooks: Vec::new(),
            config: WriteConfig::default(),
            failure_points: None,
        }
    }

    pub fn storage(mut self, storage: Arc<dyn StorageEngine>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn FollowerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn replicated_log(mut self, log: Arc<dyn ReplicatedLog>) -> Self {
        self.replicated_log = Some(log);
        self
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterMethods>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Add a status-change hook; hooks run in registration order.
    pub fn hooks(mut self, hooks: Arc<dyn TransactionHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn config(mut self, config: WriteConfig) -> Self {
        self.config = config;
        self
    }

    pub fn failure_points(mut self, failure_points: Arc<FailurePoints>) -> Self {
        self.failure_points = Some(failure_points);
        self
    }

    pub fn build(self) -> Result<Arc<Database>, ConfigError> {
        self.config.validate()?;
        Ok(Arc::new(Database {
            name: self.name,
            server: Arc::new(self.server),
            collections: CollectionRegistry::new(),
            storage: self
                .storage
                .unwrap_or_else(|| Arc::new(MemoryStorageEngine::new())),
            transport: self.transport,
            replicated_log: self.replicated_log,
            cluster: self.cluster,
            hooks: self.hooks,
            metrics: Arc::new(MetricsRegistry::new()),
            failure_points: self.failure_points.unwrap_or_default(),
            config: self.config,
            revisions: RevisionGenerator::new(),
            next_transaction_id: AtomicU64::new(0),
        }))
    }
}
