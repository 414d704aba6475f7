//! Named failure points for fault-injection testing
//!
//! A failure point is a named hook on the write path. When enabled, the code
//! at that hook takes its failure branch (usually returning a `Debug` error)
//! so tests can reproduce rare failures deterministically.
//!
//! Points can be enabled two ways:
//! - per database, through the [`FailurePoints`] set handed to it
//! - process-wide, via the `SHARDWRITE_FAILURE_POINTS` environment variable
//!   (comma separated names, read once)
//!
//! # Testing
//!
//! ```bash
//! SHARDWRITE_FAILURE_POINTS=LogicalCollection::insert cargo test
//! ```

use std::collections::HashSet;
use std::sync::{OnceLock, RwLock};

use crate::error::{WriteError, WriteResult};
use crate::observability::{log_event, Event};

/// Cache of the failure points enabled through the environment
static ENV_POINTS: OnceLock<HashSet<String>> = OnceLock::new();

#[inline]
fn env_points() -> &'static HashSet<String> {
    ENV_POINTS.get_or_init(|| {
        std::env::var("SHARDWRITE_FAILURE_POINTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Set of failure points enabled for one database.
#[derive(Debug, Default)]
pub struct FailurePoints {
    enabled: RwLock<HashSet<String>>,
}

impl FailurePoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable a failure point.
    pub fn enable(&self, name: &str) {
        if let Ok(mut enabled) = self.enabled.write() {
            enabled.insert(name.to_string());
        }
    }

    /// Disable a failure point. Disabling an unknown point is a no-op.
    pub fn disable(&self, name: &str) {
        if let Ok(mut enabled) = self.enabled.write() {
            enabled.remove(name);
        }
    }

    /// Disable every point enabled on this set.
    pub fn clear(&self) {
        if let Ok(mut enabled) = self.enabled.write() {
            enabled.clear();
        }
    }

    /// True if the point is enabled here or through the environment.
    #[inline]
    pub fn is_enabled(&self, name: &str) -> bool {
        if env_points().contains(name) {
            return true;
        }
        self.enabled
            .read()
            .map(|enabled| !enabled.is_empty() && enabled.contains(name))
            .unwrap_or(false)
    }

    /// Returns a `Debug` error if the point is enabled.
    pub fn check(&self, name: &str) -> WriteResult<()> {
        if self.is_enabled(name) {
            log_event(Event::FailurePointTriggered, &[("point", name)]);
            return Err(WriteError::debug(format!("failure point {} triggered", name)));
        }
        Ok(())
    }
}

/// All defined failure point names
pub mod points {
    // Role resolution
    pub const INSERT_LEADER_REFUSAL: &str = "documents::insertLeaderRefusal";
    pub const REFUSE_ON_FOLLOWER: &str = "synchronousReplication::refuseOnFollower";
    pub const NEVER_REFUSE_ON_FOLLOWER: &str = "synchronousReplication::neverRefuseOnFollower";
    pub const EXPECT_FOLLOWING_TERM: &str = "synchronousReplication::expectFollowingTerm";

    // Processor results
    pub const INSERT_FAKE_RESULT_1: &str = "insertLocal::fakeResult1";
    pub const INSERT_FAKE_RESULT_2: &str = "insertLocal::fakeResult2";

    // Local writes
    pub const COLLECTION_INSERT: &str = "LogicalCollection::insert";
    pub const COLLECTION_UPDATE: &str = "LogicalCollection::update";
    pub const COLLECTION_REPLACE: &str = "LogicalCollection::replace";
    pub const COLLECTION_REMOVE: &str = "LogicalCollection::remove";

    // Fan-out
    pub const RANDOMIZE_REPLICATION_TIMEOUT: &str = "replicateOperations_randomize_timeout";
    pub const DROP_FOLLOWER_BEFORE_SENDING: &str = "replicateOperationsDropFollowerBeforeSending";
    pub const DROP_FOLLOWER: &str = "replicateOperationsDropFollower";

    // Lifecycle
    pub const COMMIT_FAIL: &str = "TransactionCommitFail";

    /// Get all failure point names
    pub fn all() -> &'static [&'static str] {
        &[
            INSERT_LEADER_REFUSAL,
            REFUSE_ON_FOLLOWER,
            NEVER_REFUSE_ON_FOLLOWER,
            EXPECT_FOLLOWING_TERM,
            INSERT_FAKE_RESULT_1,
            INSERT_FAKE_RESULT_2,
            COLLECTION_INSERT,
            COLLECTION_UPDATE,
            COLLECTION_REPLACE,
            COLLECTION_REMOVE,
            RANDOMIZE_REPLICATION_TIMEOUT,
            DROP_FOLLOWER_BEFORE_SENDING,
            DROP_FOLLOWER,
            COMMIT_FAIL,
        ]
    }
}
