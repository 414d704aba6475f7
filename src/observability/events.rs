//! Observable events of the write path
//!
//! Events are explicit and typed. Document events double as the audit trail
//! of client writes: they carry database, collection and resulting code.

use std::fmt;

use super::logger::Severity;

/// Observable write-path events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Transaction lifecycle
    TransactionBegin,
    TransactionCommit,
    TransactionAbort,
    /// Implicit abort on drop failed; logged, never propagated
    ImplicitAbortFailed,
    /// A status-change hook failed or panicked
    StatusHookFailed,
    IntermediateCommit,

    // Document audit
    DocumentCreate,
    DocumentModify,
    DocumentReplace,
    DocumentRemove,
    DocumentRead,
    CollectionTruncate,

    // Replication
    ReplicationSent,
    FollowerDropped,
    FollowerDropFailed,
    FollowerRefused,
    ReplicationShutdown,
    /// A follower refused a request from a leader it does not recognise
    RefusedOperation,

    // Testing
    FailurePointTriggered,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::TransactionBegin => "TRANSACTION_BEGIN",
            Event::TransactionCommit => "TRANSACTION_COMMIT",
            Event::TransactionAbort => "TRANSACTION_ABORT",
            Event::ImplicitAbortFailed => "TRANSACTION_IMPLICIT_ABORT_FAILED",
            Event::StatusHookFailed => "TRANSACTION_STATUS_HOOK_FAILED",
            Event::IntermediateCommit => "INTERMEDIATE_COMMIT",

            Event::DocumentCreate => "DOCUMENT_CREATE",
            Event::DocumentModify => "DOCUMENT_MODIFY",
            Event::DocumentReplace => "DOCUMENT_REPLACE",
            Event::DocumentRemove => "DOCUMENT_REMOVE",
            Event::DocumentRead => "DOCUMENT_READ",
            Event::CollectionTruncate => "COLLECTION_TRUNCATE",

            Event::ReplicationSent => "REPLICATION_SENT",
            Event::FollowerDropped => "FOLLOWER_DROPPED",
            Event::FollowerDropFailed => "FOLLOWER_DROP_FAILED",
            Event::FollowerRefused => "FOLLOWER_REFUSED",
            Event::ReplicationShutdown => "REPLICATION_SHUTDOWN",
            Event::RefusedOperation => "OPERATION_REFUSED",

            Event::FailurePointTriggered => "FAILURE_POINT_TRIGGERED",
        }
    }

    /// Severity the event is logged with
    pub fn severity(&self) -> Severity {
        match self {
            Event::ImplicitAbortFailed | Event::StatusHookFailed | Event::FollowerDropFailed => {
                Severity::Error
            }
            Event::FollowerDropped
            | Event::FollowerRefused
            | Event::RefusedOperation
            | Event::ReplicationShutdown
            | Event::FailurePointTriggered => Severity::Warn,
            Event::ReplicationSent | Event::DocumentRead | Event::IntermediateCommit => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
