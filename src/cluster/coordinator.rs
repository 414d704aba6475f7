//! Coordinator contract
//!
//! On a coordinator every operation is forwarded to the servers owning the
//! shards. Routing and the wire protocol live outside this crate.

use serde_json::Value;

use crate::error::WriteFuture;
use crate::storage::TransactionId;
use crate::transaction::{CountType, OperationKind, OperationOptions, OperationResult};

pub trait ClusterMethods: Send + Sync {
    /// Forward a document operation (insert, update, replace, remove, read
    /// or truncate) of `collection`.
    fn forward<'a>(
        &'a self,
        trx: TransactionId,
        kind: OperationKind,
        collection: &'a str,
        value: &'a Value,
        options: &'a OperationOptions,
    ) -> WriteFuture<'a, OperationResult>;

    /// Sum the counts of all shards of `collection`.
    fn count<'a>(
        &'a self,
        trx: TransactionId,
        collection: &'a str,
        count_type: CountType,
    ) -> WriteFuture<'a, OperationResult>;

    /// Begin the transaction on the shard owners.
    fn begin_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()>;

    fn commit_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()>;

    fn abort_on_servers(&self, trx: TransactionId) -> WriteFuture<'_, ()>;
}
