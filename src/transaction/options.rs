//! Request-scoped options and transaction descriptors

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::IntermediateCommitConfig;

/// What an insert does when the supplied `_key` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteMode {
    /// Fail with `UniqueConstraintViolated`
    #[default]
    Conflict,
    /// Keep the existing document, write nothing
    Ignore,
    /// Merge into the existing document
    Update,
    /// Replace the existing document
    Replace,
}

impl OverwriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverwriteMode::Conflict => "conflict",
            OverwriteMode::Ignore => "ignore",
            OverwriteMode::Update => "update",
            OverwriteMode::Replace => "replace",
        }
    }
}

/// Whether index caches are refilled after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefillIndexCaches {
    /// Server default applies
    #[default]
    Default,
    Refill,
    DontRefill,
}

/// Options of one operation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationOptions {
    /// Trust supplied `_key`/`_rev` values
    pub is_restore: bool,
    pub overwrite_mode: OverwriteMode,
    /// Skip the optimistic-concurrency check against a supplied `_rev`
    pub ignore_revs: bool,
    /// Suppress per-document results
    pub silent: bool,
    pub return_old: bool,
    pub return_new: bool,
    pub wait_for_sync: bool,
    /// Explicit nulls in an update are stored instead of deleting
    pub keep_null: bool,
    /// Nested objects are merged by update
    pub merge_objects: bool,
    /// Apply the collection schema
    pub validate: bool,
    /// Allow document reads on a follower
    pub allow_dirty_reads: bool,
    /// Compact storage after a truncate
    pub truncate_compact: bool,
    pub refill_index_caches: RefillIndexCaches,
    /// Application-level counter used to reject stale writes
    pub version_attribute: Option<String>,
    /// Believed leader (`SERVER[_TERM]`), set only on requests a leader
    /// sends to its followers
    pub is_synchronous_replication_from: String,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            is_restore: false,
            overwrite_mode: OverwriteMode::Conflict,
            ignore_revs: true,
            silent: false,
            return_old: false,
            return_new: false,
            wait_for_sync: false,
            keep_null: true,
            merge_objects: true,
            validate: true,
            allow_dirty_reads: false,
            truncate_compact: true,
            refill_index_caches: RefillIndexCaches::Default,
            version_attribute: None,
            is_synchronous_replication_from: String::new(),
        }
    }
}

impl OperationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options of a request coming from the leader of a shard.
    pub fn from_leader(leader: impl Into<String>) -> Self {
        Self {
            is_restore: true,
            is_synchronous_replication_from: leader.into(),
            ..Self::default()
        }
    }

    pub fn is_synchronous_replication(&self) -> bool {
        !self.is_synchronous_replication_from.is_empty()
    }
}

/// Kind of operation, used for routing, logging and replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Insert,
    Update,
    Replace,
    Remove,
    Truncate,
    Count,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Replace => "replace",
            OperationKind::Remove => "remove",
            OperationKind::Truncate => "truncate",
            OperationKind::Count => "count",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, OperationKind::Read | OperationKind::Count)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessMode {
    Read,
    Write,
    Exclusive,
}

/// Kind of count to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CountType {
    #[default]
    Normal,
    /// Per-shard breakdown; a plain count on a single server
    Detailed,
    /// Cached count if available
    TryCache,
    /// Cached count, even if outdated
    ForceCache,
}

/// Collections a transaction declares at begin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionCollections {
    pub read: Vec<String>,
    pub write: Vec<String>,
    pub exclusive: Vec<String>,
}

impl TransactionCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, name: impl Into<String>) -> Self {
        self.read.push(name.into());
        self
    }

    pub fn write(mut self, name: impl Into<String>) -> Self {
        self.write.push(name.into());
        self
    }

    pub fn exclusive(mut self, name: impl Into<String>) -> Self {
        self.exclusive.push(name.into());
        self
    }

    /// Every declared collection with its strongest access mode.
    pub fn declared(&self) -> Vec<(String, AccessMode)> {
        let mut out: Vec<(String, AccessMode)> = Vec::new();
        let all = self
            .read
            .iter()
            .map(|n| (n, AccessMode::Read))
            .chain(self.write.iter().map(|n| (n, AccessMode::Write)))
            .chain(self.exclusive.iter().map(|n| (n, AccessMode::Exclusive)));
        for (name, mode) in all {
            match out.iter_mut().find(|(n, _)| n == name) {
                Some(entry) => entry.1 = entry.1.max(mode),
                None => out.push((name.clone(), mode)),
            }
        }
        out
    }
}

/// Options of a whole transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOptions {
    /// Thresholds for intermediate commits; database default if `None`
    pub intermediate_commits: Option<IntermediateCommitConfig>,
    /// Collection lock timeout; database default if `None`
    pub lock_timeout: Option<Duration>,
    /// Undeclared collections may be added while running
    pub allow_implicit_collections: bool,
    /// Sync to disk on commit
    pub wait_for_sync: bool,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            intermediate_commits: None,
            lock_timeout: None,
            allow_implicit_collections: true,
            wait_for_sync: false,
        }
    }
}
