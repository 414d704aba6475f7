//! Transaction state shared by a top-level transaction and its nested calls
//!
//! - Collections are registered before begin and locked at begin
//! - Locks are held until the state finishes (commit or abort)
//! - A write that failed as a whole may have left staged documents behind;
//!   such a state can only be aborted
//! - The inner mutex is never held across an await point

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

use super::options::{AccessMode, TransactionOptions};
use crate::collection::LogicalCollection;
use crate::config::IntermediateCommitConfig;
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::storage::TransactionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Created,
    Running,
    Committed,
    Aborted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Running => "running",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

#[derive(Debug)]
enum CollectionLock {
    Shared(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Exclusive(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

#[derive(Debug)]
struct TransactionCollection {
    collection: Arc<LogicalCollection>,
    mode: AccessMode,
    lock: Option<CollectionLock>,
}

#[derive(Debug)]
struct Inner {
    status: TransactionStatus,
    collections: Vec<TransactionCollection>,
    wait_for_sync: bool,
    must_abort: bool,
}

/// State of one transaction.
#[derive(Debug)]
pub struct TransactionState {
    id: TransactionId,
    lock_timeout: Duration,
    intermediate_commits: IntermediateCommitConfig,
    allow_implicit_collections: bool,
    inner: Mutex<Inner>,
}

impl TransactionState {
    pub(crate) fn new(
        id: TransactionId,
        options: &TransactionOptions,
        default_lock_timeout: Duration,
        default_intermediate_commits: IntermediateCommitConfig,
    ) -> Self {
        Self {
            id,
            lock_timeout: options.lock_timeout.unwrap_or(default_lock_timeout),
            intermediate_commits: options
                .intermediate_commits
                .unwrap_or(default_intermediate_commits),
            allow_implicit_collections: options.allow_implicit_collections,
            inner: Mutex::new(Inner {
                status: TransactionStatus::Created,
                collections: Vec::new(),
                wait_for_sync: options.wait_for_sync,
                must_abort: false,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner().status
    }

    pub(crate) fn set_status(&self, status: TransactionStatus) {
        self.inner().status = status;
    }

    pub fn intermediate_commits(&self) -> IntermediateCommitConfig {
        self.intermediate_commits
    }

    pub fn wait_for_sync(&self) -> bool {
        self.inner().wait_for_sync
    }

    pub(crate) fn set_wait_for_sync(&self) {
        self.inner().wait_for_sync = true;
    }

    pub fn must_abort(&self) -> bool {
        self.inner().must_abort
    }

    pub(crate) fn set_must_abort(&self) {
        self.inner().must_abort = true;
    }

    /// True when no collection is used for writing.
    pub fn is_read_only(&self) -> bool {
        self.inner()
            .collections
            .iter()
            .all(|c| c.mode == AccessMode::Read)
    }

    pub fn access_mode(&self, name: &str) -> Option<AccessMode> {
        self.inner()
            .collections
            .iter()
            .find(|c| c.collection.name() == name)
            .map(|c| c.mode)
    }

    /// Register a collection without locking it; the strongest mode wins.
    pub(crate) fn add_collection(&self, collection: Arc<LogicalCollection>, mode: AccessMode) {
        let mut inner = self.inner();
        match inner
            .collections
            .iter_mut()
            .find(|c| c.collection.name() == collection.name())
        {
            Some(existing) => existing.mode = existing.mode.max(mode),
            None => inner.collections.push(TransactionCollection {
                collection,
                mode,
                lock: None,
            }),
        }
    }

    /// Make `collection` usable with `mode` while the transaction runs.
    ///
    /// Undeclared collections are only added for reading, and only when
    /// implicit collections are allowed. A collection declared for reading
    /// cannot be upgraded to write access.
    pub(crate) async fn use_collection(
        &self,
        collection: &Arc<LogicalCollection>,
        mode: AccessMode,
    ) -> WriteResult<()> {
        let registered = self.access_mode(collection.name());
        match registered {
            Some(current) if current >= mode || mode == AccessMode::Read => return Ok(()),
            Some(_) => return Err(unregistered(collection.name(), mode)),
            None if mode != AccessMode::Read || !self.allow_implicit_collections => {
                return Err(unregistered(collection.name(), mode));
            }
            None => self.add_collection(Arc::clone(collection), mode),
        }
        self.lock_collections().await
    }

    /// Acquire the locks of every registered collection not yet locked.
    pub(crate) async fn lock_collections(&self) -> WriteResult<()> {
        let pending: Vec<(Arc<LogicalCollection>, AccessMode)> = self
            .inner()
            .collections
            .iter()
            .filter(|c| c.lock.is_none())
            .map(|c| (Arc::clone(&c.collection), c.mode))
            .collect();

        for (collection, mode) in pending {
            let lock = Arc::clone(collection.lock());
            let acquired = match mode {
                AccessMode::Exclusive => tokio::time::timeout(self.lock_timeout, lock.write_owned())
                    .await
                    .map(CollectionLock::Exclusive),
                _ => tokio::time::timeout(self.lock_timeout, lock.read_owned())
                    .await
                    .map(CollectionLock::Shared),
            };
            let guard = acquired.map_err(|_| {
                WriteError::new(
                    ErrorCode::LockTimeout,
                    format!("timeout waiting to lock collection {}", collection.name()),
                )
            })?;
            let mut inner = self.inner();
            if let Some(entry) = inner
                .collections
                .iter_mut()
                .find(|c| c.collection.name() == collection.name())
            {
                entry.lock = Some(guard);
            }
        }
        Ok(())
    }

    /// Drop every collection lock.
    pub(crate) fn release_locks(&self) {
        for collection in self.inner().collections.iter_mut() {
            collection.lock = None;
        }
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.inner()
            .collections
            .iter()
            .map(|c| c.collection.name().to_string())
            .collect()
    }
}

fn unregistered(name: &str, mode: AccessMode) -> WriteError {
    let mode = match mode {
        AccessMode::Read => "read",
        AccessMode::Write => "write",
        AccessMode::Exclusive => "exclusive",
    };
    WriteError::new(
        ErrorCode::TransactionUnregisteredCollection,
        format!("unregistered collection used in transaction: {} [{}]", name, mode),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(options: TransactionOptions) -> TransactionState {
        TransactionState::new(
            1,
            &options,
            Duration::from_millis(50),
            IntermediateCommitConfig::default(),
        )
    }

    fn collection(name: &str) -> Arc<LogicalCollection> {
        Arc::new(LogicalCollection::builder(1, name).build())
    }

    #[test]
    fn test_strongest_mode_wins() {
        let state = state(TransactionOptions::default());
        let docs = collection("docs");
        state.add_collection(Arc::clone(&docs), AccessMode::Read);
        assert!(state.is_read_only());
        state.add_collection(docs, AccessMode::Write);
        assert_eq!(state.access_mode("docs"), Some(AccessMode::Write));
        assert!(!state.is_read_only());
    }

    #[tokio::test]
    async fn test_read_declared_cannot_write() {
        let state = state(TransactionOptions::default());
        let docs = collection("docs");
        state.add_collection(Arc::clone(&docs), AccessMode::Read);
        state.lock_collections().await.unwrap();

        let err = state.use_collection(&docs, AccessMode::Write).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransactionUnregisteredCollection);
        assert_eq!(err.message(), "unregistered collection used in transaction: docs [write]");
    }

    #[tokio::test]
    async fn test_implicit_read_collections() {
        let state = state(TransactionOptions::default());
        let other = collection("other");
        state.use_collection(&other, AccessMode::Read).await.unwrap();
        assert_eq!(state.access_mode("other"), Some(AccessMode::Read));

        let strict = self::state(TransactionOptions {
            allow_implicit_collections: false,
            ..TransactionOptions::default()
        });
        let err = strict.use_collection(&other, AccessMode::Read).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::TransactionUnregisteredCollection);
    }

    #[tokio::test]
    async fn test_exclusive_lock_times_out() {
        let docs = collection("docs");
        let first = state(TransactionOptions::default());
        first.add_collection(Arc::clone(&docs), AccessMode::Write);
        first.lock_collections().await.unwrap();

        let second = state(TransactionOptions::default());
        second.add_collection(Arc::clone(&docs), AccessMode::Exclusive);
        let err = second.lock_collections().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockTimeout);

        first.release_locks();
        second.lock_collections().await.unwrap();
    }
}
