//! Transaction context
//!
//! A context ties transactions to a database. While a top-level
//! transaction runs, every `TransactionMethods` created from the same
//! context joins it as a nested transaction instead of starting a new one.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use super::options::TransactionOptions;
use super::scratch::ScratchPool;
use super::state::TransactionState;
use crate::database::Database;

pub struct TransactionContext {
    database: Arc<Database>,
    /// Writes applied from the replicated log (version 2 followers)
    replicated: bool,
    active: Mutex<Option<Arc<TransactionState>>>,
    scratch: ScratchPool<Vec<Value>>,
}

impl TransactionContext {
    pub fn new(database: Arc<Database>) -> Arc<Self> {
        Self::with_kind(database, false)
    }

    /// Context of writes applied from the replicated log.
    pub fn replicated(database: Arc<Database>) -> Arc<Self> {
        Self::with_kind(database, true)
    }

    fn with_kind(database: Arc<Database>, replicated: bool) -> Arc<Self> {
        Arc::new(Self {
            database,
            replicated,
            active: Mutex::new(None),
            scratch: ScratchPool::new(),
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated
    }

    fn active(&self) -> MutexGuard<'_, Option<Arc<TransactionState>>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The running top-level state, if any.
    pub fn active_state(&self) -> Option<Arc<TransactionState>> {
        self.active()
            .as_ref()
            .filter(|s| !s.status().is_finished())
            .cloned()
    }

    /// Join the running state, or register a new top-level one.
    ///
    /// Returns the state and whether the caller owns it.
    pub(crate) fn acquire_state(&self, options: &TransactionOptions) -> (Arc<TransactionState>, bool) {
        let mut active = self.active();
        if let Some(state) = active.as_ref().filter(|s| !s.status().is_finished()) {
            return (Arc::clone(state), false);
        }
        let config = self.database.config();
        let state = Arc::new(TransactionState::new(
            self.database.next_transaction_id(),
            options,
            config.lock_timeout(),
            config.intermediate_commits,
        ));
        *active = Some(Arc::clone(&state));
        (state, true)
    }

    pub(crate) fn release_state(&self, state: &Arc<TransactionState>) {
        let mut active = self.active();
        if active.as_ref().map_or(false, |s| Arc::ptr_eq(s, state)) {
            *active = None;
        }
    }

    pub(crate) fn scratch(&self) -> &ScratchPool<Vec<Value>> {
        &self.scratch
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("database", &self.database.name())
            .field("replicated", &self.replicated)
            .field("active", &self.active().as_ref().map(|s| s.id()))
            .finish()
    }
}
