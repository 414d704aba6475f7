//! Storage engine contract
//!
//! The write path consumes storage through [`StorageEngine`]. The engine
//! owns index maintenance and durability; the write path only relies on:
//! - reads see committed data plus the transaction's own writes
//! - losing a write race is reported as `Conflict` (first writer wins)
//! - update/replace/remove are handed the previous version unmodified
//! - pending writes can be flushed early by an intermediate commit
//!
//! [`MemoryStorageEngine`] is the in-process reference engine.

mod memory;

pub use memory::MemoryStorageEngine;

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::collection::LogicalCollection;
use crate::config::IntermediateCommitConfig;
use crate::document::RevisionId;
use crate::error::{WriteFuture, WriteResult};

/// Transaction identifier shared by the facade and the engine
pub type TransactionId = u64;

/// Engine-local identity of one stored document version.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LocalDocumentId(u64);

impl LocalDocumentId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// One stored document version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub local_id: LocalDocumentId,
    pub revision: RevisionId,
    pub document: Arc<Map<String, Value>>,
}

/// Storage engine consumed by the write path.
pub trait StorageEngine: Send + Sync {
    /// Start tracking a transaction.
    fn begin(&self, trx: TransactionId, thresholds: IntermediateCommitConfig) -> WriteResult<()>;

    /// Make the transaction's writes visible to everyone.
    fn commit(&self, trx: TransactionId, wait_for_sync: bool) -> WriteResult<()>;

    /// Discard the transaction's pending writes.
    fn abort(&self, trx: TransactionId) -> WriteResult<()>;

    /// Read a document as seen by `trx`.
    fn read(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        key: &str,
    ) -> WriteResult<Option<StoredDocument>>;

    /// Read a document `trx` is about to modify.
    ///
    /// Fails with `Conflict` if another transaction holds a pending write
    /// on the key.
    fn lookup_for_update(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        key: &str,
    ) -> WriteResult<Option<StoredDocument>>;

    fn insert(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument>;

    fn update(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument>;

    fn replace(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument>;

    fn remove(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
    ) -> WriteResult<()>;

    fn count(&self, trx: TransactionId, collection: &LogicalCollection) -> WriteResult<u64>;

    /// Every document visible to `trx`, in key order.
    fn all(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
    ) -> WriteResult<Vec<StoredDocument>>;

    /// Remove every document; returns how many were removed.
    fn truncate(&self, trx: TransactionId, collection: &LogicalCollection) -> WriteResult<u64>;

    /// Flush pending writes if the transaction crossed its thresholds.
    ///
    /// Returns whether a flush happened.
    fn intermediate_commit_if_required(&self, trx: TransactionId) -> WriteFuture<'_, bool>;
}
