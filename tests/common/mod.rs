//! Shared fixtures for the integration tests
//!
//! - `LoopbackTransport` dispatches a leader's replication requests into the
//!   `TransactionMethods` of in-process follower nodes
//! - `FakeLog` stands in for the replicated log of version 2 shards
//! - `RecordingCluster` stands in for the coordinator's cluster methods

#![allow(dead_code)]

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use shardwrite::cluster::{
    ClusterMethods, FollowerTransport, ParticipantStatus, ReplicatedLog, ReplicatedOperation,
    ReplicationRequest, ReplicationResponse, RequestVerb, ServerRole, ServerState,
};
use shardwrite::collection::{CollectionBuilder, LogicalCollection};
use shardwrite::error::{ErrorCode, WriteError, WriteFuture, WriteResult};
use shardwrite::storage::{MemoryStorageEngine, TransactionId};
use shardwrite::transaction::{CountType, OperationKind};
use shardwrite::{
    Database, OperationOptions, OperationResult, OverwriteMode, TransactionCollections,
    TransactionContext, TransactionMethods, TransactionOptions,
};

pub const SHARD: &str = "s100";
pub const LEADER: &str = "PRMR-1";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {}", other),
    }
}

/// One server with a single shard.
pub struct Node {
    pub database: Arc<Database>,
    pub storage: Arc<MemoryStorageEngine>,
    pub collection: Arc<LogicalCollection>,
}

impl Node {
    pub fn committed(&self, key: &str) -> Option<Map<String, Value>> {
        self.storage
            .committed_document(&self.collection, key)
            .map(|stored| stored.document.as_ref().clone())
    }

    pub fn committed_rev(&self, key: &str) -> Option<String> {
        self.committed(key)
            .and_then(|doc| doc.get("_rev").and_then(Value::as_str).map(str::to_string))
    }

    pub fn count(&self) -> usize {
        self.storage.committed_count(&self.collection)
    }

    pub fn context(&self) -> Arc<TransactionContext> {
        TransactionContext::new(Arc::clone(&self.database))
    }

    /// A running transaction writing the shard.
    pub async fn begin(&self) -> TransactionMethods {
        let trx = TransactionMethods::new(
            self.context(),
            TransactionCollections::new().write(self.collection.name()),
            TransactionOptions::default(),
        )
        .unwrap();
        trx.begin().await.unwrap();
        trx
    }

    /// Run one operation in its own transaction and commit it.
    pub async fn run(&self, kind: OperationKind, value: Value, options: &OperationOptions) -> WriteResult<OperationResult> {
        let trx = self.begin().await;
        let name = self.collection.name().to_string();
        let result = match kind {
            OperationKind::Insert => trx.insert(&name, &value, options).await,
            OperationKind::Update => trx.update(&name, &value, options).await,
            OperationKind::Replace => trx.replace(&name, &value, options).await,
            OperationKind::Remove => trx.remove(&name, &value, options).await,
            OperationKind::Read => trx.document(&name, &value, options).await,
            OperationKind::Truncate => trx.truncate(&name, options).await,
            OperationKind::Count => trx.count(&name, CountType::Normal).await,
        };
        match &result {
            Ok(_) => trx.commit().await?,
            Err(_) => trx.abort().await?,
        }
        result
    }
}

pub struct NodeBuilder {
    server: ServerState,
    storage: Arc<MemoryStorageEngine>,
    transport: Option<Arc<LoopbackTransport>>,
    log: Option<Arc<FakeLog>>,
    configure: Box<dyn Fn(CollectionBuilder) -> CollectionBuilder>,
}

impl NodeBuilder {
    pub fn new(server: ServerState) -> Self {
        Self {
            server,
            storage: Arc::new(MemoryStorageEngine::new()),
            transport: None,
            log: None,
            configure: Box::new(|b| b),
        }
    }

    pub fn single() -> Self {
        Self::new(ServerState::single())
    }

    pub fn db_server(id: &str) -> Self {
        Self::new(ServerState::new(id, ServerRole::DbServer))
    }

    pub fn storage(mut self, storage: MemoryStorageEngine) -> Self {
        self.storage = Arc::new(storage);
        self
    }

    pub fn transport(mut self, transport: &Arc<LoopbackTransport>) -> Self {
        self.transport = Some(Arc::clone(transport));
        self
    }

    pub fn log(mut self, log: &Arc<FakeLog>) -> Self {
        self.log = Some(Arc::clone(log));
        self
    }

    pub fn collection(mut self, configure: impl Fn(CollectionBuilder) -> CollectionBuilder + 'static) -> Self {
        self.configure = Box::new(configure);
        self
    }

    pub fn build(self) -> Node {
        let mut builder = Database::builder("db", self.server).storage(self.storage.clone());
        if let Some(transport) = self.transport {
            builder = builder.transport(transport);
        }
        if let Some(log) = self.log {
            builder = builder.replicated_log(log);
        }
        let database = builder.build().unwrap();
        let collection = database.create_collection((self.configure)(LogicalCollection::builder(100, SHARD)));
        Node {
            database,
            storage: self.storage,
            collection,
        }
    }
}

/// Leader `PRMR-1` with in-sync followers reachable over a loopback.
pub struct Cluster {
    pub leader: Node,
    pub followers: Vec<Node>,
    pub transport: Arc<LoopbackTransport>,
}

impl Cluster {
    pub fn new(follower_ids: &[&str]) -> Self {
        Self::with_collection(follower_ids, |b| b)
    }

    pub fn with_collection(
        follower_ids: &[&str],
        configure: impl Fn(CollectionBuilder) -> CollectionBuilder + Clone + 'static,
    ) -> Self {
        init_tracing();
        let transport = LoopbackTransport::new();
        let leader = NodeBuilder::db_server(LEADER)
            .transport(&transport)
            .collection(configure.clone())
            .build();
        let followers: Vec<Node> = follower_ids
            .iter()
            .map(|id| {
                let node = NodeBuilder::db_server(id).collection(configure.clone()).build();
                node.collection.follower_info().set_the_leader(LEADER);
                leader.collection.follower_info().add(*id);
                transport.add_node(id, Arc::clone(&node.database));
                node
            })
            .collect();
        Self {
            leader,
            followers,
            transport,
        }
    }

    pub fn in_sync_followers(&self) -> Vec<String> {
        self.leader.collection.follower_info().get().as_ref().clone()
    }
}

/// How a follower answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    /// Apply the request on the follower node
    Node,
    /// No response at all
    Timeout,
    /// Answer with a bare status code
    Status(u16),
    /// Answer "leader refuses replication"
    Refuse,
}

/// In-process follower transport.
#[derive(Default)]
pub struct LoopbackTransport {
    nodes: Mutex<HashMap<String, Arc<Database>>>,
    behaviors: Mutex<HashMap<String, Behavior>>,
    requests: Mutex<Vec<ReplicationRequest>>,
}

impl LoopbackTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_node(&self, id: &str, database: Arc<Database>) {
        self.nodes.lock().unwrap().insert(id.to_string(), database);
    }

    pub fn set_behavior(&self, id: &str, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(id.to_string(), behavior);
    }

    pub fn requests(&self) -> Vec<ReplicationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, id: &str) -> Vec<ReplicationRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.destination == id)
            .collect()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

impl FollowerTransport for LoopbackTransport {
    fn send(&self, request: ReplicationRequest) -> WriteFuture<'_, ReplicationResponse> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(&request.destination)
                .cloned()
                .unwrap_or(Behavior::Node);
            match behavior {
                Behavior::Timeout => Err(WriteError::new(ErrorCode::BackendUnavailable, "request timed out")),
                Behavior::Status(status) => Ok(ReplicationResponse::ok(status)),
                Behavior::Refuse => Ok(ReplicationResponse::failed(WriteError::from_code(
                    ErrorCode::ShardLeaderRefusesReplication,
                ))),
                Behavior::Node => {
                    let node = self.nodes.lock().unwrap().get(&request.destination).cloned();
                    match node {
                        Some(database) => Ok(apply_on_follower(database, &request).await),
                        None => Err(WriteError::from_code(ErrorCode::BackendUnavailable)),
                    }
                }
            }
        })
    }
}

/// Execute a replication request the way a follower's REST handler would.
async fn apply_on_follower(database: Arc<Database>, request: &ReplicationRequest) -> ReplicationResponse {
    let segments: Vec<&str> = request.path.split('/').collect();
    let is_truncate = segments.last() == Some(&"truncate");
    let collection = if is_truncate {
        segments[segments.len() - 2]
    } else {
        segments[segments.len() - 1]
    }
    .to_string();

    let mut options = OperationOptions::default();
    options.is_restore = request.param("isRestore") == Some("true");
    options.is_synchronous_replication_from = request
        .param("isSynchronousReplication")
        .unwrap_or_default()
        .to_string();
    options.overwrite_mode = match request.param("overwriteMode") {
        Some("replace") => OverwriteMode::Replace,
        Some("update") => OverwriteMode::Update,
        Some("ignore") => OverwriteMode::Ignore,
        _ => OverwriteMode::Conflict,
    };
    options.truncate_compact = request.param("compact") != Some("false");

    let trx = match TransactionMethods::new(
        TransactionContext::new(database),
        TransactionCollections::new().write(collection.clone()),
        TransactionOptions::default(),
    ) {
        Ok(trx) => trx,
        Err(e) => return ReplicationResponse::failed(e),
    };
    if let Err(e) = trx.begin().await {
        return ReplicationResponse::failed(e);
    }

    let outcome = if is_truncate {
        trx.truncate(&collection, &options).await
    } else {
        match request.verb {
            RequestVerb::Post => trx.insert(&collection, &request.body, &options).await,
            RequestVerb::Put => trx.replace(&collection, &request.body, &options).await,
            RequestVerb::Patch => trx.update(&collection, &request.body, &options).await,
            RequestVerb::Delete => trx.remove(&collection, &request.body, &options).await,
        }
    };
    let result = match outcome {
        Ok(result) => result,
        Err(e) => return ReplicationResponse::failed(e),
    };
    if let Err(e) = result.result.clone() {
        return ReplicationResponse::failed(e);
    }
    if let Err(e) = trx.commit().await {
        return ReplicationResponse::failed(e);
    }
    if result.has_item_errors() {
        return ReplicationResponse {
            status: 202,
            error_codes: Some(result.error_counts),
            error: None,
        };
    }
    ReplicationResponse::ok(if is_truncate { 200 } else { 201 })
}

/// Replicated log double: records operations, status is settable.
pub struct FakeLog {
    status: Mutex<ParticipantStatus>,
    healthy: AtomicUsize,
    write_concern: AtomicUsize,
    operations: Mutex<Vec<ReplicatedOperation>>,
}

impl FakeLog {
    pub fn leader() -> Arc<Self> {
        Arc::new(Self {
            status: Mutex::new(ParticipantStatus::Leader(
                shardwrite::cluster::LeaderStatus::ServiceAvailable,
            )),
            healthy: AtomicUsize::new(3),
            write_concern: AtomicUsize::new(2),
            operations: Mutex::new(Vec::new()),
        })
    }

    pub fn set_status(&self, status: ParticipantStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn set_healthy(&self, healthy: usize) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn operations(&self) -> Vec<ReplicatedOperation> {
        self.operations.lock().unwrap().clone()
    }
}

impl ReplicatedLog for FakeLog {
    fn status(&self, _shard: &str) -> ParticipantStatus {
        *self.status.lock().unwrap()
    }

    fn healthy_participants(&self, _shard: &str) -> usize {
        self.healthy.load(Ordering::Relaxed)
    }

    fn write_concern(&self, _shard: &str) -> usize {
        self.write_concern.load(Ordering::Relaxed)
    }

    fn replicate(&self, operation: ReplicatedOperation) -> WriteFuture<'_, ()> {
        Box::pin(async move {
            self.operations.lock().unwrap().push(operation);
            Ok(())
        })
    }
}

/// Cluster methods double for coordinator tests.
#[derive(Default)]
pub struct RecordingCluster {
    pub forwarded: Mutex<Vec<(TransactionId, OperationKind, String, Value)>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_commit: AtomicBool,
}

impl RecordingCluster {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ClusterMethods for RecordingCluster {
    fn forward<'a>(
        &'a self,
        trx: TransactionId,
        kind: OperationKind,
        collection: &'a str,
        value: &'a Value,
        _options: &'a OperationOptions,
    ) -> WriteFuture<'a, OperationResult> {
        Box::pin(async move {
            self.forwarded
                .lock()
                .unwrap()
                .push((trx, kind, collection.to_string(), value.clone()));
            Ok(OperationResult::ok(Value::Null))
        })
    }

    fn count<'a>(
        &'a self,
        _trx: TransactionId,
        _collection: &'a str,
        count_type: CountType,
    ) -> WriteFuture<'a, OperationResult> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("count:{:?}", count_type));
            Ok(OperationResult::ok(Value::from(42)))
        })
    }

    fn begin_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("begin:{}", trx));
            Ok(())
        })
    }

    fn commit_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("commit:{}", trx));
            if self.fail_commit.load(Ordering::Relaxed) {
                return Err(WriteError::from_code(ErrorCode::BackendUnavailable));
            }
            Ok(())
        })
    }

    fn abort_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(format!("abort:{}", trx));
            Ok(())
        })
    }
}
