//! shardwrite - the document write path of a sharded document database
//!
//! Turns client insert/update/replace/remove requests into:
//! - a validated, versioned document
//! - a local storage mutation
//! - synchronous replication of that mutation to follower replicas
//!
//! Entry point is [`transaction::TransactionMethods`], running against a
//! [`database::Database`] that bundles every collaborator (storage engine,
//! follower transport, replicated log, cluster methods, status hooks).

pub mod cluster;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod failure_point;
pub mod observability;
pub mod replication;
pub mod schema;
pub mod storage;
pub mod transaction;

pub use database::{Database, DatabaseBuilder};
pub use error::{ErrorClass, ErrorCode, WriteError, WriteResult};
pub use transaction::{
    CountType, OperationOptions, OperationResult, OverwriteMode, TransactionCollections,
    TransactionContext, TransactionMethods, TransactionOptions, TransactionStatus,
};
