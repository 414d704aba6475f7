//! Write-path error types
//!
//! Every failure on the write path is a [`WriteError`]: a closed
//! [`ErrorCode`] plus a human-readable message.
//!
//! Error classes:
//! - BadInput: malformed key or document shape, fails the item
//! - Conflict: revision mismatch or unique-constraint violation, fails the item
//! - InvariantViolation: shard-key/smart-join change, edge attribute, schema
//! - RoleReplication: fatal to the whole call, `LeaderResigned` is retryable
//! - Resource: short-circuits the rest of a batch
//! - Debug: injected by failure points, behaves like an internal error

use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Error class, used to decide how far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    BadInput,
    Conflict,
    InvariantViolation,
    RoleReplication,
    Resource,
    Debug,
    Internal,
}

/// Error codes of the write path.
///
/// Numeric values are stable and travel over the wire in per-item error
/// objects and in the error-codes map of a follower response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ErrorCode {
    Internal,
    LockTimeout,
    Debug,
    ShuttingDown,
    ResourceLimit,
    ReadOnly,
    MustNotChangeShardingAttributes,
    Conflict,
    DocumentNotFound,
    DataSourceNotFound,
    DocumentHandleBad,
    UniqueConstraintViolated,
    DocumentKeyBad,
    DocumentTypeInvalid,
    InvalidEdgeAttribute,
    WriteConcernNotFulfilled,
    BackendUnavailable,
    CouldNotDropFollower,
    ShardLeaderRefusesReplication,
    ShardFollowerRefusesOperation,
    LeaderResigned,
    NotLeader,
    SchemaValidationFailed,
    TransactionInternal,
    TransactionUnregisteredCollection,
    MustNotChangeSmartJoinAttribute,
    InvalidSmartJoinAttribute,
    ReplicatedStateNotAvailable,
}

impl ErrorCode {
    /// Numeric error number.
    pub fn number(&self) -> u32 {
        match self {
            ErrorCode::Internal => 4,
            ErrorCode::LockTimeout => 18,
            ErrorCode::Debug => 22,
            ErrorCode::ShuttingDown => 30,
            ErrorCode::ResourceLimit => 32,
            ErrorCode::ReadOnly => 1004,
            ErrorCode::MustNotChangeShardingAttributes => 1008,
            ErrorCode::Conflict => 1200,
            ErrorCode::DocumentNotFound => 1202,
            ErrorCode::DataSourceNotFound => 1203,
            ErrorCode::DocumentHandleBad => 1205,
            ErrorCode::UniqueConstraintViolated => 1210,
            ErrorCode::DocumentKeyBad => 1221,
            ErrorCode::DocumentTypeInvalid => 1227,
            ErrorCode::InvalidEdgeAttribute => 1233,
            ErrorCode::WriteConcernNotFulfilled => 1429,
            ErrorCode::BackendUnavailable => 1447,
            ErrorCode::CouldNotDropFollower => 1464,
            ErrorCode::ShardLeaderRefusesReplication => 1465,
            ErrorCode::ShardFollowerRefusesOperation => 1466,
            ErrorCode::LeaderResigned => 1467,
            ErrorCode::NotLeader => 1496,
            ErrorCode::SchemaValidationFailed => 1620,
            ErrorCode::TransactionInternal => 1650,
            ErrorCode::TransactionUnregisteredCollection => 1652,
            ErrorCode::MustNotChangeSmartJoinAttribute => 4003,
            ErrorCode::InvalidSmartJoinAttribute => 4008,
            ErrorCode::ReplicatedStateNotAvailable => 6002,
        }
    }

    /// Resolve a numeric error number back to a code.
    pub fn from_number(number: u32) -> Option<Self> {
        ALL_CODES.iter().copied().find(|c| c.number() == number)
    }

    /// Stable upper-snake name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Internal => "INTERNAL",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::Debug => "DEBUG",
            ErrorCode::ShuttingDown => "SHUTTING_DOWN",
            ErrorCode::ResourceLimit => "RESOURCE_LIMIT",
            ErrorCode::ReadOnly => "READ_ONLY",
            ErrorCode::MustNotChangeShardingAttributes => "MUST_NOT_CHANGE_SHARDING_ATTRIBUTES",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::DocumentNotFound => "DOCUMENT_NOT_FOUND",
            ErrorCode::DataSourceNotFound => "DATA_SOURCE_NOT_FOUND",
            ErrorCode::DocumentHandleBad => "DOCUMENT_HANDLE_BAD",
            ErrorCode::UniqueConstraintViolated => "UNIQUE_CONSTRAINT_VIOLATED",
            ErrorCode::DocumentKeyBad => "DOCUMENT_KEY_BAD",
            ErrorCode::DocumentTypeInvalid => "DOCUMENT_TYPE_INVALID",
            ErrorCode::InvalidEdgeAttribute => "INVALID_EDGE_ATTRIBUTE",
            ErrorCode::WriteConcernNotFulfilled => "WRITE_CONCERN_NOT_FULFILLED",
            ErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            ErrorCode::CouldNotDropFollower => "COULD_NOT_DROP_FOLLOWER",
            ErrorCode::ShardLeaderRefusesReplication => "SHARD_LEADER_REFUSES_REPLICATION",
            ErrorCode::ShardFollowerRefusesOperation => "SHARD_FOLLOWER_REFUSES_OPERATION",
            ErrorCode::LeaderResigned => "LEADER_RESIGNED",
            ErrorCode::NotLeader => "NOT_LEADER",
            ErrorCode::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            ErrorCode::TransactionInternal => "TRANSACTION_INTERNAL",
            ErrorCode::TransactionUnregisteredCollection => "TRANSACTION_UNREGISTERED_COLLECTION",
            ErrorCode::MustNotChangeSmartJoinAttribute => "MUST_NOT_CHANGE_SMART_JOIN_ATTRIBUTE",
            ErrorCode::InvalidSmartJoinAttribute => "INVALID_SMART_JOIN_ATTRIBUTE",
            ErrorCode::ReplicatedStateNotAvailable => "REPLICATED_STATE_NOT_AVAILABLE",
        }
    }

    /// Error class of this code.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorCode::DocumentHandleBad
            | ErrorCode::DocumentKeyBad
            | ErrorCode::DocumentTypeInvalid
            | ErrorCode::DocumentNotFound
            | ErrorCode::DataSourceNotFound => ErrorClass::BadInput,
            ErrorCode::Conflict | ErrorCode::UniqueConstraintViolated => ErrorClass::Conflict,
            ErrorCode::MustNotChangeShardingAttributes
            | ErrorCode::MustNotChangeSmartJoinAttribute
            | ErrorCode::InvalidSmartJoinAttribute
            | ErrorCode::InvalidEdgeAttribute
            | ErrorCode::SchemaValidationFailed => ErrorClass::InvariantViolation,
            ErrorCode::LeaderResigned
            | ErrorCode::ShardLeaderRefusesReplication
            | ErrorCode::ShardFollowerRefusesOperation
            | ErrorCode::WriteConcernNotFulfilled
            | ErrorCode::CouldNotDropFollower
            | ErrorCode::BackendUnavailable
            | ErrorCode::NotLeader
            | ErrorCode::ReplicatedStateNotAvailable
            | ErrorCode::ReadOnly
            | ErrorCode::ShuttingDown => ErrorClass::RoleReplication,
            ErrorCode::ResourceLimit => ErrorClass::Resource,
            ErrorCode::Debug => ErrorClass::Debug,
            ErrorCode::Internal
            | ErrorCode::LockTimeout
            | ErrorCode::TransactionInternal
            | ErrorCode::TransactionUnregisteredCollection => ErrorClass::Internal,
        }
    }

    /// HTTP-like status code a server would answer with.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::BadInput => match self {
                ErrorCode::DocumentNotFound | ErrorCode::DataSourceNotFound => 404,
                _ => 400,
            },
            ErrorClass::Conflict => match self {
                ErrorCode::Conflict => 412,
                _ => 409,
            },
            ErrorClass::InvariantViolation => 400,
            ErrorClass::RoleReplication => match self {
                ErrorCode::ReadOnly => 403,
                ErrorCode::ShardLeaderRefusesReplication
                | ErrorCode::ShardFollowerRefusesOperation => 406,
                _ => 503,
            },
            ErrorClass::Resource => 507,
            ErrorClass::Debug | ErrorClass::Internal => 500,
        }
    }
}

const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::Internal,
    ErrorCode::LockTimeout,
    ErrorCode::Debug,
    ErrorCode::ShuttingDown,
    ErrorCode::ResourceLimit,
    ErrorCode::ReadOnly,
    ErrorCode::MustNotChangeShardingAttributes,
    ErrorCode::Conflict,
    ErrorCode::DocumentNotFound,
    ErrorCode::DataSourceNotFound,
    ErrorCode::DocumentHandleBad,
    ErrorCode::UniqueConstraintViolated,
    ErrorCode::DocumentKeyBad,
    ErrorCode::DocumentTypeInvalid,
    ErrorCode::InvalidEdgeAttribute,
    ErrorCode::WriteConcernNotFulfilled,
    ErrorCode::BackendUnavailable,
    ErrorCode::CouldNotDropFollower,
    ErrorCode::ShardLeaderRefusesReplication,
    ErrorCode::ShardFollowerRefusesOperation,
    ErrorCode::LeaderResigned,
    ErrorCode::NotLeader,
    ErrorCode::SchemaValidationFailed,
    ErrorCode::TransactionInternal,
    ErrorCode::TransactionUnregisteredCollection,
    ErrorCode::MustNotChangeSmartJoinAttribute,
    ErrorCode::InvalidSmartJoinAttribute,
    ErrorCode::ReplicatedStateNotAvailable,
];

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Write-path error: code plus message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} ({number}): {message}", number = .code.number())]
pub struct WriteError {
    code: ErrorCode,
    message: String,
}

impl WriteError {
    /// Create an error with an explicit message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an error carrying the default message for its code.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, default_message(code))
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Debug, message)
    }

    pub fn conflict() -> Self {
        Self::new(ErrorCode::Conflict, "conflict, _rev values do not match")
    }

    pub fn document_not_found() -> Self {
        Self::from_code(ErrorCode::DocumentNotFound)
    }

    pub fn unique_constraint_violated(key: &str) -> Self {
        Self::new(
            ErrorCode::UniqueConstraintViolated,
            format!("unique constraint violated - in index primary of type primary over '_key'; conflicting key: {}", key),
        )
    }

    pub fn key_bad(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DocumentKeyBad, message)
    }

    pub fn handle_bad() -> Self {
        Self::from_code(ErrorCode::DocumentHandleBad)
    }

    pub fn type_invalid() -> Self {
        Self::from_code(ErrorCode::DocumentTypeInvalid)
    }

    pub fn leader_resigned() -> Self {
        Self::from_code(ErrorCode::LeaderResigned)
    }

    pub fn resource_limit(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ResourceLimit, message)
    }

    pub fn transaction_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionInternal, message)
    }

    /// Class of the underlying code.
    pub fn class(&self) -> ErrorClass {
        self.code.class()
    }

    /// True when the caller should retry against the new leader.
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::LeaderResigned
    }

    /// True when the error fails the whole call instead of a single item.
    pub fn is_whole_call(&self) -> bool {
        matches!(self.class(), ErrorClass::RoleReplication | ErrorClass::Internal)
    }

    /// True for the resource-limit condition that short-circuits a batch.
    pub fn is_resource_limit(&self) -> bool {
        self.code == ErrorCode::ResourceLimit
    }
}

impl From<ErrorCode> for WriteError {
    fn from(code: ErrorCode) -> Self {
        Self::from_code(code)
    }
}

fn default_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Internal => "internal error",
        ErrorCode::LockTimeout => "lock timeout",
        ErrorCode::Debug => "intentional debug error",
        ErrorCode::ShuttingDown => "shutdown in progress",
        ErrorCode::ResourceLimit => "resource limit exceeded",
        ErrorCode::ReadOnly => "server is in read-only mode",
        ErrorCode::MustNotChangeShardingAttributes => {
            "must not change the value of a shard key attribute"
        }
        ErrorCode::Conflict => "conflict",
        ErrorCode::DocumentNotFound => "document not found",
        ErrorCode::DataSourceNotFound => "collection or view not found",
        ErrorCode::DocumentHandleBad => "illegal document identifier",
        ErrorCode::UniqueConstraintViolated => "unique constraint violated",
        ErrorCode::DocumentKeyBad => "illegal document key",
        ErrorCode::DocumentTypeInvalid => "invalid document type",
        ErrorCode::InvalidEdgeAttribute => "invalid edge attribute",
        ErrorCode::WriteConcernNotFulfilled => "write concern not fulfilled",
        ErrorCode::BackendUnavailable => "A cluster backend which was required for the operation could not be reached",
        ErrorCode::CouldNotDropFollower => "could not drop follower",
        ErrorCode::ShardLeaderRefusesReplication => "a shard leader refuses to perform a replication operation",
        ErrorCode::ShardFollowerRefusesOperation => "a shard follower refuses to perform an operation that is not a replication",
        ErrorCode::LeaderResigned => "a shard leader resigned in the meantime",
        ErrorCode::NotLeader => "not a leader",
        ErrorCode::SchemaValidationFailed => "schema validation failed",
        ErrorCode::TransactionInternal => "internal transaction error",
        ErrorCode::TransactionUnregisteredCollection => "unregistered collection used in transaction",
        ErrorCode::MustNotChangeSmartJoinAttribute => "must not change the value of the smartJoinAttribute",
        ErrorCode::InvalidSmartJoinAttribute => "non-string smart join attribute value",
        ErrorCode::ReplicatedStateNotAvailable => "replicated state not available",
    }
}

/// Result type for write-path operations
pub type WriteResult<T> = Result<T, WriteError>;

/// Boxed future of a write-path operation, used at trait seams
pub type WriteFuture<'a, T> = Pin<Box<dyn Future<Output = WriteResult<T>> + Send + 'a>>;
