//! Replicated-log contract (replication version 2)
//!
//! Shards of version 2 do not fan out writes themselves: the leader hands
//! one operation per call to the log, which commits it on the participants.

use serde_json::Value;

use crate::error::WriteFuture;
use crate::storage::TransactionId;
use crate::transaction::OperationKind;

/// State of the local replicated state machine when this server leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderStatus {
    ServiceAvailable,
    /// Leader is still replaying the log; it must not accept client writes
    RecoveryInProgress,
    Unavailable,
}

/// Local participant status of a shard's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantStatus {
    Leader(LeaderStatus),
    Follower,
    Unconfigured,
}

/// One operation handed to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedOperation {
    pub kind: OperationKind,
    pub shard: String,
    pub trx: TransactionId,
    /// Array of post-images (or `{_key,_rev}` for removals)
    pub payload: Value,
}

pub trait ReplicatedLog: Send + Sync {
    fn status(&self, shard: &str) -> ParticipantStatus;

    /// Participants currently known to be healthy, the leader included.
    fn healthy_participants(&self, shard: &str) -> usize;

    fn write_concern(&self, shard: &str) -> usize;

    /// Replicate one operation; resolves once applied locally.
    fn replicate(&self, operation: ReplicatedOperation) -> WriteFuture<'_, ()>;
}
