//! Cluster collaborators of the write path
//!
//! The write path never talks to the agency or the network directly. It
//! consumes:
//! - [`ServerState`]: this server's identity, role and run state
//! - [`FollowerTransport`]: one request/response to a follower
//! - [`ReplicatedLog`]: the consensus log of replication version 2 shards
//! - [`ClusterMethods`]: forwarding of coordinator operations to shard owners

mod coordinator;
mod network;
mod replicated_log;

pub use coordinator::ClusterMethods;
pub use network::{FollowerTransport, ReplicationRequest, ReplicationResponse, RequestVerb};
pub use replicated_log::{LeaderStatus, ParticipantStatus, ReplicatedLog, ReplicatedOperation};

use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Role of a server in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    /// Standalone server, nothing to replicate
    Single,
    /// Routes operations to the servers owning the shards
    Coordinator,
    /// Owns shards, leads or follows them
    DbServer,
}

/// Identity and run state of this server.
#[derive(Debug)]
pub struct ServerState {
    id: String,
    role: ServerRole,
    read_only: AtomicBool,
    stopping: AtomicBool,
}

impl ServerState {
    pub fn new(id: impl Into<String>, role: ServerRole) -> Self {
        Self {
            id: id.into(),
            role,
            read_only: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        }
    }

    /// Server with a freshly generated id (`PRMR-<uuid>` for shard owners).
    pub fn generate(role: ServerRole) -> Self {
        let prefix = match role {
            ServerRole::Single => "SNGL",
            ServerRole::Coordinator => "CRDN",
            ServerRole::DbServer => "PRMR",
        };
        Self::new(format!("{}-{}", prefix, Uuid::new_v4()), role)
    }

    pub fn single() -> Self {
        Self::new("SNGL", ServerRole::Single)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> ServerRole {
        self.role
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == ServerRole::Coordinator
    }

    pub fn is_db_server(&self) -> bool {
        self.role == ServerRole::DbServer
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Relaxed)
    }

    /// Enter shutdown. Irreversible.
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Relaxed);
    }
}
