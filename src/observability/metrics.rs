//! Write-path metrics registry
//!
//! - Counters only, monotonic
//! - Thread-safe, lock-free
//! - Owned by a database and shared by every transaction running on it

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics registry containing all write-path counters
///
/// All counters use Relaxed ordering; exactness per counter is all that is
/// required, there is no cross-counter consistency.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Documents shipped to followers by synchronous replication
    synchronous_ops_total: AtomicU64,
    /// Time spent waiting for followers, nanoseconds
    synchronous_time_total_ns: AtomicU64,
    /// Followers that answered with a leader refusal
    followers_refused: AtomicU64,
    /// Followers removed from a follower list
    followers_dropped: AtomicU64,
    documents_inserted: AtomicU64,
    documents_updated: AtomicU64,
    documents_replaced: AtomicU64,
    documents_removed: AtomicU64,
    /// Updates that turned out to be no-ops
    noop_updates: AtomicU64,
    intermediate_commits: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Replication

    /// Record one synchronous replication round
    pub fn record_synchronous_replication(&self, documents: u64, elapsed: Duration) {
        self.synchronous_ops_total
            .fetch_add(documents, Ordering::Relaxed);
        self.synchronous_time_total_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn increment_followers_refused(&self) {
        self.followers_refused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_followers_dropped(&self) {
        self.followers_dropped.fetch_add(1, Ordering::Relaxed);
    }

    // Documents

    pub fn increment_inserted(&self) {
        self.documents_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_updated(&self) {
        self.documents_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_replaced(&self) {
        self.documents_replaced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_removed(&self) {
        self.documents_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_noop_updates(&self) {
        self.noop_updates.fetch_add(1, Ordering::Relaxed);
    }

    // Transactions

    pub fn increment_intermediate_commits(&self) {
        self.intermediate_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            synchronous_ops_total: self.synchronous_ops_total.load(Ordering::Relaxed),
            synchronous_time_total_ns: self.synchronous_time_total_ns.load(Ordering::Relaxed),
            followers_refused: self.followers_refused.load(Ordering::Relaxed),
            followers_dropped: self.followers_dropped.load(Ordering::Relaxed),
            documents_inserted: self.documents_inserted.load(Ordering::Relaxed),
            documents_updated: self.documents_updated.load(Ordering::Relaxed),
            documents_replaced: self.documents_replaced.load(Ordering::Relaxed),
            documents_removed: self.documents_removed.load(Ordering::Relaxed),
            noop_updates: self.noop_updates.load(Ordering::Relaxed),
            intermediate_commits: self.intermediate_commits.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub synchronous_ops_total: u64,
    pub synchronous_time_total_ns: u64,
    pub followers_refused: u64,
    pub followers_dropped: u64,
    pub documents_inserted: u64,
    pub documents_updated: u64,
    pub documents_replaced: u64,
    pub documents_removed: u64,
    pub noop_updates: u64,
    pub intermediate_commits: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
}
