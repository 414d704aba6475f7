//! In-memory storage engine
//!
//! - Committed documents per collection, keyed by `_key`
//! - Per-transaction overlay of pending writes (tombstones for removals)
//! - Key ownership: the first transaction to write a key owns it until it
//!   commits or aborts; any other writer gets `Conflict`
//! - Intermediate commits move the overlay into the committed state once
//!   the transaction's pending operation count or size crosses a threshold

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{LocalDocumentId, StorageEngine, StoredDocument, TransactionId};
use crate::collection::LogicalCollection;
use crate::config::IntermediateCommitConfig;
use crate::document::RevisionId;
use crate::error::{ErrorCode, WriteError, WriteFuture, WriteResult};

type Overlay = HashMap<u64, BTreeMap<String, Option<StoredDocument>>>;

#[derive(Debug)]
struct PendingTransaction {
    writes: Overlay,
    thresholds: IntermediateCommitConfig,
    pending_ops: u64,
    pending_bytes: u64,
    total_bytes: u64,
}

#[derive(Debug, Default)]
struct EngineState {
    committed: HashMap<u64, BTreeMap<String, StoredDocument>>,
    transactions: HashMap<TransactionId, PendingTransaction>,
    key_owners: HashMap<(u64, String), TransactionId>,
}

impl EngineState {
    fn transaction(&mut self, trx: TransactionId) -> WriteResult<&mut PendingTransaction> {
        self.transactions.get_mut(&trx).ok_or_else(|| {
            WriteError::transaction_internal(format!("unknown transaction {}", trx))
        })
    }

    fn visible(&self, trx: TransactionId, collection: u64, key: &str) -> Option<StoredDocument> {
        let pending = self
            .transactions
            .get(&trx)
            .and_then(|t| t.writes.get(&collection))
            .and_then(|w| w.get(key));
        match pending {
            Some(entry) => entry.clone(),
            None => self
                .committed
                .get(&collection)
                .and_then(|docs| docs.get(key))
                .cloned(),
        }
    }

    /// Claim `key` for `trx`; fails if another transaction owns it.
    fn claim(&mut self, trx: TransactionId, collection: u64, key: &str) -> WriteResult<()> {
        let owner = self
            .key_owners
            .entry((collection, key.to_string()))
            .or_insert(trx);
        if *owner != trx {
            return Err(WriteError::new(
                ErrorCode::Conflict,
                format!("write-write conflict on key '{}'", key),
            ));
        }
        Ok(())
    }

    fn owned_by_other(&self, trx: TransactionId, collection: u64, key: &str) -> bool {
        self.key_owners
            .get(&(collection, key.to_string()))
            .map(|owner| *owner != trx)
            .unwrap_or(false)
    }

    fn apply(&mut self, writes: Overlay) {
        for (collection, docs) in writes {
            let committed = self.committed.entry(collection).or_default();
            for (key, entry) in docs {
                match entry {
                    Some(doc) => {
                        committed.insert(key, doc);
                    }
                    None => {
                        committed.remove(&key);
                    }
                }
            }
        }
    }

    fn release(&mut self, trx: TransactionId) {
        self.key_owners.retain(|_, owner| *owner != trx);
    }
}

/// In-memory storage engine
#[derive(Debug, Default)]
pub struct MemoryStorageEngine {
    state: Mutex<EngineState>,
    next_local_id: AtomicU64,
    /// Per-transaction size limit, `ResourceLimit` once exceeded
    max_transaction_bytes: Option<u64>,
    synced_commits: AtomicU64,
    intermediate_commits: AtomicU64,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the bytes a single transaction may write.
    pub fn with_max_transaction_bytes(mut self, limit: u64) -> Self {
        self.max_transaction_bytes = Some(limit);
        self
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_local_id(&self) -> LocalDocumentId {
        LocalDocumentId::new(self.next_local_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Committed version of a document, bypassing any transaction.
    pub fn committed_document(&self, collection: &LogicalCollection, key: &str) -> Option<StoredDocument> {
        self.state()
            .committed
            .get(&collection.id())
            .and_then(|docs| docs.get(key))
            .cloned()
    }

    pub fn committed_count(&self, collection: &LogicalCollection) -> usize {
        self.state()
            .committed
            .get(&collection.id())
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// Commits that asked for a sync to durable storage.
    pub fn synced_commits(&self) -> u64 {
        self.synced_commits.load(Ordering::Relaxed)
    }

    pub fn intermediate_commits(&self) -> u64 {
        self.intermediate_commits.load(Ordering::Relaxed)
    }

    pub fn active_transactions(&self) -> usize {
        self.state().transactions.len()
    }

    fn stage(
        &self,
        state: &mut EngineState,
        trx: TransactionId,
        collection: u64,
        key: &str,
        entry: Option<StoredDocument>,
    ) -> WriteResult<()> {
        let bytes = entry
            .as_ref()
            .and_then(|doc| serde_json::to_vec(doc.document.as_ref()).ok())
            .map(|encoded| encoded.len() as u64)
            .unwrap_or(key.len() as u64);
        let limit = self.max_transaction_bytes;
        let pending = state.transaction(trx)?;
        if let Some(limit) = limit {
            if pending.total_bytes + bytes > limit {
                return Err(WriteError::resource_limit(format!(
                    "transaction size limit of {} bytes reached",
                    limit
                )));
            }
        }
        pending.total_bytes += bytes;
        pending.pending_bytes += bytes;
        pending.pending_ops += 1;
        pending
            .writes
            .entry(collection)
            .or_default()
            .insert(key.to_string(), entry);
        state.claim(trx, collection, key)
    }

    fn modify(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument> {
        let key = key_of(&document)?;
        let mut state = self.state();
        check_previous(&state, trx, collection.id(), &key, previous)?;
        let stored = StoredDocument {
            local_id: self.next_local_id(),
            revision,
            document: Arc::new(document),
        };
        self.stage(&mut state, trx, collection.id(), &key, Some(stored.clone()))?;
        Ok(stored)
    }
}

fn key_of(document: &Map<String, Value>) -> WriteResult<String> {
    document
        .get(crate::document::KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| WriteError::internal("document without _key handed to storage"))
}

/// The version a modification was based on must still be the visible one.
fn check_previous(
    state: &EngineState,
    trx: TransactionId,
    collection: u64,
    key: &str,
    previous: &StoredDocument,
) -> WriteResult<()> {
    if state.owned_by_other(trx, collection, key) {
        return Err(WriteError::new(
            ErrorCode::Conflict,
            format!("write-write conflict on key '{}'", key),
        ));
    }
    match state.visible(trx, collection, key) {
        Some(current) if current.revision == previous.revision => Ok(()),
        Some(_) => Err(WriteError::conflict()),
        None => Err(WriteError::document_not_found()),
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn begin(&self, trx: TransactionId, thresholds: IntermediateCommitConfig) -> WriteResult<()> {
        let mut state = self.state();
        if state.transactions.contains_key(&trx) {
            return Err(WriteError::transaction_internal(format!(
                "transaction {} already begun",
                trx
            )));
        }
        state.transactions.insert(
            trx,
            PendingTransaction {
                writes: HashMap::new(),
                thresholds,
                pending_ops: 0,
                pending_bytes: 0,
                total_bytes: 0,
            },
        );
        Ok(())
    }

    fn commit(&self, trx: TransactionId, wait_for_sync: bool) -> WriteResult<()> {
        let mut state = self.state();
        let pending = state.transactions.remove(&trx).ok_or_else(|| {
            WriteError::transaction_internal(format!("unknown transaction {}", trx))
        })?;
        state.apply(pending.writes);
        state.release(trx);
        if wait_for_sync {
            self.synced_commits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn abort(&self, trx: TransactionId) -> WriteResult<()> {
        let mut state = self.state();
        if state.transactions.remove(&trx).is_none() {
            return Err(WriteError::transaction_internal(format!(
                "unknown transaction {}",
                trx
            )));
        }
        state.release(trx);
        Ok(())
    }

    fn read(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        key: &str,
    ) -> WriteResult<Option<StoredDocument>> {
        Ok(self.state().visible(trx, collection.id(), key))
    }

    fn lookup_for_update(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        key: &str,
    ) -> WriteResult<Option<StoredDocument>> {
        let state = self.state();
        if state.owned_by_other(trx, collection.id(), key) {
            return Err(WriteError::new(
                ErrorCode::Conflict,
                format!("write-write conflict on key '{}'", key),
            ));
        }
        Ok(state.visible(trx, collection.id(), key))
    }

    fn insert(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument> {
        let key = key_of(&document)?;
        let mut state = self.state();
        if state.owned_by_other(trx, collection.id(), &key) {
            return Err(WriteError::new(
                ErrorCode::Conflict,
                format!("write-write conflict on key '{}'", key),
            ));
        }
        if state.visible(trx, collection.id(), &key).is_some() {
            return Err(WriteError::unique_constraint_violated(&key));
        }
        let stored = StoredDocument {
            local_id: self.next_local_id(),
            revision,
            document: Arc::new(document),
        };
        self.stage(&mut state, trx, collection.id(), &key, Some(stored.clone()))?;
        Ok(stored)
    }

    fn update(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument> {
        self.modify(trx, collection, previous, revision, document)
    }

    fn replace(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
        revision: RevisionId,
        document: Map<String, Value>,
    ) -> WriteResult<StoredDocument> {
        self.modify(trx, collection, previous, revision, document)
    }

    fn remove(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
        previous: &StoredDocument,
    ) -> WriteResult<()> {
        let key = key_of(&previous.document)?;
        let mut state = self.state();
        check_previous(&state, trx, collection.id(), &key, previous)?;
        self.stage(&mut state, trx, collection.id(), &key, None)
    }

    fn count(&self, trx: TransactionId, collection: &LogicalCollection) -> WriteResult<u64> {
        Ok(self.all(trx, collection)?.len() as u64)
    }

    fn all(
        &self,
        trx: TransactionId,
        collection: &LogicalCollection,
    ) -> WriteResult<Vec<StoredDocument>> {
        let state = self.state();
        let mut merged: BTreeMap<&str, Option<&StoredDocument>> = state
            .committed
            .get(&collection.id())
            .map(|docs| docs.iter().map(|(k, v)| (k.as_str(), Some(v))).collect())
            .unwrap_or_default();
        if let Some(writes) = state
            .transactions
            .get(&trx)
            .and_then(|t| t.writes.get(&collection.id()))
        {
            for (key, entry) in writes {
                merged.insert(key.as_str(), entry.as_ref());
            }
        }
        Ok(merged.into_values().flatten().cloned().collect())
    }

    fn truncate(&self, trx: TransactionId, collection: &LogicalCollection) -> WriteResult<u64> {
        let visible = self.all(trx, collection)?;
        let mut state = self.state();
        for doc in &visible {
            let key = key_of(&doc.document)?;
            if state.owned_by_other(trx, collection.id(), &key) {
                return Err(WriteError::new(
                    ErrorCode::Conflict,
                    format!("write-write conflict on key '{}'", key),
                ));
            }
        }
        for doc in &visible {
            let key = key_of(&doc.document)?;
            self.stage(&mut state, trx, collection.id(), &key, None)?;
        }
        Ok(visible.len() as u64)
    }

    fn intermediate_commit_if_required(&self, trx: TransactionId) -> WriteFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state();
            let pending = state.transaction(trx)?;
            if pending.pending_ops < pending.thresholds.max_count
                && pending.pending_bytes < pending.thresholds.max_size_bytes
            {
                return Ok(false);
            }
            let writes = std::mem::take(&mut pending.writes);
            pending.pending_ops = 0;
            pending.pending_bytes = 0;
            state.apply(writes);
            self.intermediate_commits.fetch_add(1, Ordering::Relaxed);
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(key: &str, v: i64) -> Map<String, Value> {
        match json!({"_key": key, "v": v}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn setup() -> (MemoryStorageEngine, LogicalCollection) {
        (
            MemoryStorageEngine::new(),
            LogicalCollection::builder(1, "docs").build(),
        )
    }

    #[test]
    fn test_writes_invisible_until_commit() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        engine.begin(2, IntermediateCommitConfig::default()).unwrap();
        engine.insert(1, &coll, RevisionId::new(10), doc("a", 1)).unwrap();

        assert!(engine.read(1, &coll, "a").unwrap().is_some());
        assert!(engine.read(2, &coll, "a").unwrap().is_none());

        engine.commit(1, false).unwrap();
        assert!(engine.read(2, &coll, "a").unwrap().is_some());
    }

    #[test]
    fn test_duplicate_key_violates_unique_constraint() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        engine.insert(1, &coll, RevisionId::new(10), doc("a", 1)).unwrap();
        let err = engine
            .insert(1, &coll, RevisionId::new(11), doc("a", 2))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UniqueConstraintViolated);
    }

    #[test]
    fn test_first_writer_wins() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        let base = engine.insert(1, &coll, RevisionId::new(10), doc("a", 1)).unwrap();
        engine.commit(1, false).unwrap();

        engine.begin(2, IntermediateCommitConfig::default()).unwrap();
        engine.begin(3, IntermediateCommitConfig::default()).unwrap();
        engine
            .update(2, &coll, &base, RevisionId::new(11), doc("a", 2))
            .unwrap();

        let err = engine.lookup_for_update(3, &coll, "a").unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
        let err = engine.remove(3, &coll, &base).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);

        engine.abort(2).unwrap();
        assert!(engine.remove(3, &coll, &base).is_ok());
    }

    #[test]
    fn test_stale_previous_revision_conflicts() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        let base = engine.insert(1, &coll, RevisionId::new(10), doc("a", 1)).unwrap();
        engine
            .update(1, &coll, &base, RevisionId::new(11), doc("a", 2))
            .unwrap();
        let err = engine
            .update(1, &coll, &base, RevisionId::new(12), doc("a", 3))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Conflict);
    }

    #[test]
    fn test_abort_discards_writes() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        engine.insert(1, &coll, RevisionId::new(10), doc("a", 1)).unwrap();
        engine.abort(1).unwrap();
        assert!(engine.committed_document(&coll, "a").is_none());
        assert_eq!(engine.active_transactions(), 0);
    }

    #[test]
    fn test_count_all_and_truncate() {
        let (engine, coll) = setup();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        for (i, key) in ["c", "a", "b"].iter().enumerate() {
            engine
                .insert(1, &coll, RevisionId::new(10 + i as u64), doc(key, i as i64))
                .unwrap();
        }
        engine.commit(1, true).unwrap();
        assert_eq!(engine.synced_commits(), 1);

        engine.begin(2, IntermediateCommitConfig::default()).unwrap();
        let keys: Vec<_> = engine
            .all(2, &coll)
            .unwrap()
            .iter()
            .map(|d| d.document["_key"].clone())
            .collect();
        assert_eq!(keys, vec![json!("a"), json!("b"), json!("c")]);

        assert_eq!(engine.truncate(2, &coll).unwrap(), 3);
        assert_eq!(engine.count(2, &coll).unwrap(), 0);
        assert_eq!(engine.committed_count(&coll), 3);
        engine.commit(2, false).unwrap();
        assert_eq!(engine.committed_count(&coll), 0);
    }

    #[test]
    fn test_size_limit_reports_resource_limit() {
        let engine = MemoryStorageEngine::new().with_max_transaction_bytes(40);
        let coll = LogicalCollection::builder(1, "docs").build();
        engine.begin(1, IntermediateCommitConfig::default()).unwrap();
        engine.insert(1, &coll, RevisionId::new(1), doc("a", 1)).unwrap();
        let err = engine
            .insert(1, &coll, RevisionId::new(2), doc("b", 2))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResourceLimit);
    }

    #[tokio::test]
    async fn test_intermediate_commit_after_threshold() {
        let (engine, coll) = setup();
        let thresholds = IntermediateCommitConfig {
            max_count: 2,
            ..Default::default()
        };
        engine.begin(1, thresholds).unwrap();
        engine.insert(1, &coll, RevisionId::new(1), doc("a", 1)).unwrap();
        assert!(!engine.intermediate_commit_if_required(1).await.unwrap());

        engine.insert(1, &coll, RevisionId::new(2), doc("b", 2)).unwrap();
        assert!(engine.intermediate_commit_if_required(1).await.unwrap());
        assert_eq!(engine.committed_count(&coll), 2);
        assert_eq!(engine.intermediate_commits(), 1);
    }
}
