//! Replication-role resolution
//!
//! Decided once per call, before any document is touched:
//! - NONE: not a shard owner (single server, coordinator)
//! - LEADER: writes are replicated to the snapshotted followers
//! - FOLLOWER: writes come from the leader and are never replicated further
//!
//! Replication version 1 reads the collection's follower metadata.
//! Replication version 2 reads the status of the shard's replicated log; its
//! follower list is always empty because the log replicates by itself.

use serde_json::Value;
use std::sync::Arc;

use crate::cluster::{LeaderStatus, ParticipantStatus};
use crate::collection::{LogicalCollection, ReplicationVersion, WriteState};
use crate::database::Database;
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::failure_point::points;
use crate::observability::{log_event, Event};
use crate::transaction::{OperationKind, OperationOptions};

/// Marker attribute of documents used by the leader-refusal retry test
const LEADER_REFUSAL_TEST_ATTRIBUTE: &str = "ThisIsTheRetryOnLeaderRefusalTest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationType {
    None,
    Leader,
    Follower,
}

/// Outcome of role resolution for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationDecision {
    pub replication_type: ReplicationType,
    /// Stable snapshot; only filled for version 1 leaders
    pub followers: Arc<Vec<String>>,
}

impl ReplicationDecision {
    pub fn none() -> Self {
        Self::with_type(ReplicationType::None)
    }

    fn with_type(replication_type: ReplicationType) -> Self {
        Self {
            replication_type,
            followers: Arc::new(Vec::new()),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.replication_type == ReplicationType::Leader
    }

    pub fn is_follower(&self) -> bool {
        self.replication_type == ReplicationType::Follower
    }

    /// True when the call must collect a replication payload.
    pub fn replicates(&self, version: ReplicationVersion) -> bool {
        self.is_leader() && (!self.followers.is_empty() || version == ReplicationVersion::Two)
    }
}

/// Determine the replication role of this server for one call.
///
/// Followers always run silent: the leader ignores their per-document
/// results, so `options.silent` is forced on. A leader that replicates
/// needs the per-document results, so `options.silent` is forced off.
pub fn determine_replication(
    database: &Database,
    collection: &LogicalCollection,
    kind: OperationKind,
    value: Option<&Value>,
    replicated_context: bool,
    options: &mut OperationOptions,
) -> WriteResult<ReplicationDecision> {
    if !database.server().is_db_server() {
        return Ok(ReplicationDecision::none());
    }
    let decision = match collection.replication_version() {
        ReplicationVersion::One => determine_version_one(database, collection, kind, value, options)?,
        ReplicationVersion::Two => {
            determine_version_two(database, collection, replicated_context, options)?
        }
    };
    if decision.is_follower() {
        options.silent = true;
    }
    Ok(decision)
}

fn determine_version_one(
    database: &Database,
    collection: &LogicalCollection,
    kind: OperationKind,
    value: Option<&Value>,
    options: &mut OperationOptions,
) -> WriteResult<ReplicationDecision> {
    let failure_points = database.failure_points();
    if kind == OperationKind::Insert
        && failure_points.is_enabled(points::INSERT_LEADER_REFUSAL)
        && value
            .and_then(Value::as_object)
            .map_or(false, |o| o.contains_key(LEADER_REFUSAL_TEST_ATTRIBUTE))
    {
        return Err(WriteError::leader_resigned());
    }

    let follower_info = collection.follower_info();
    let leader = follower_info.leader();

    if leader.is_empty() {
        if options.is_synchronous_replication() {
            // someone believes we follow them
            return Err(WriteError::from_code(ErrorCode::ShardLeaderRefusesReplication));
        }
        match follower_info.allowed_to_write() {
            WriteState::Allowed => {}
            WriteState::Forbidden if database.server().is_read_only() => {
                return Err(WriteError::from_code(ErrorCode::ReadOnly));
            }
            WriteState::Forbidden => {
                return Err(WriteError::new(
                    ErrorCode::WriteConcernNotFulfilled,
                    format!(
                        "not enough in-sync followers for shard {}/{} (write concern {})",
                        database.name(),
                        collection.name(),
                        follower_info.write_concern()
                    ),
                ));
            }
            WriteState::Unavailable | WriteState::Startup => {
                return Err(WriteError::from_code(ErrorCode::BackendUnavailable));
            }
        }
        let followers = follower_info.get();
        if !followers.is_empty() {
            options.silent = false;
        }
        return Ok(ReplicationDecision {
            replication_type: ReplicationType::Leader,
            followers,
        });
    }

    if !options.is_synchronous_replication() {
        return Err(WriteError::leader_resigned());
    }
    let from = options.is_synchronous_replication_from.as_str();
    let mut refuse = from != leader;
    if failure_points.is_enabled(points::NEVER_REFUSE_ON_FOLLOWER) {
        refuse = false;
    }
    if failure_points.is_enabled(points::REFUSE_ON_FOLLOWER) {
        refuse = true;
    }
    if failure_points.is_enabled(points::EXPECT_FOLLOWING_TERM) && !options.is_restore {
        refuse |= !from.contains('_');
    }
    if refuse {
        return Err(refusal(database, collection, kind, from, &leader));
    }
    Ok(ReplicationDecision::with_type(ReplicationType::Follower))
}

fn determine_version_two(
    database: &Database,
    collection: &LogicalCollection,
    replicated_context: bool,
    options: &mut OperationOptions,
) -> WriteResult<ReplicationDecision> {
    if replicated_context {
        // writes applied from the log
        return Ok(ReplicationDecision::with_type(ReplicationType::Follower));
    }
    let log = database.replicated_log().ok_or_else(|| {
        WriteError::new(
            ErrorCode::ReplicatedStateNotAvailable,
            "could not get replicated state",
        )
    })?;
    match log.status(collection.name()) {
        ParticipantStatus::Leader(LeaderStatus::ServiceAvailable) => {
            let healthy = log.healthy_participants(collection.name());
            let write_concern = log.write_concern(collection.name());
            if healthy < write_concern {
                return Err(WriteError::new(
                    ErrorCode::WriteConcernNotFulfilled,
                    format!(
                        "{} healthy participants, write concern {}",
                        healthy, write_concern
                    ),
                ));
            }
            options.silent = false;
            Ok(ReplicationDecision::with_type(ReplicationType::Leader))
        }
        // still replaying the log, nothing may be replicated
        ParticipantStatus::Leader(LeaderStatus::RecoveryInProgress) => {
            Ok(ReplicationDecision::with_type(ReplicationType::Follower))
        }
        ParticipantStatus::Leader(LeaderStatus::Unavailable) => Err(WriteError::new(
            ErrorCode::ReplicatedStateNotAvailable,
            "replicated state leader unavailable",
        )),
        ParticipantStatus::Follower | ParticipantStatus::Unconfigured => {
            Err(WriteError::leader_resigned())
        }
    }
}

fn refusal(
    database: &Database,
    collection: &LogicalCollection,
    kind: OperationKind,
    from: &str,
    leader: &str,
) -> WriteError {
    let shard = format!("{}/{}", database.name(), collection.name());
    log_event(
        Event::RefusedOperation,
        &[
            ("from", from),
            ("leader", leader),
            ("operation", kind.as_str()),
            ("shard", &shard),
        ],
    );
    let base = WriteError::from_code(ErrorCode::ShardFollowerRefusesOperation);
    WriteError::new(
        ErrorCode::ShardFollowerRefusesOperation,
        format!(
            "{}: shard: {}, operation: {}, from: {}, current leader: {}",
            base.message(),
            shard,
            kind,
            from,
            leader
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ServerRole, ServerState};
    use crate::collection::Availability;
    use serde_json::json;

    fn db_server() -> Arc<Database> {
        Database::builder("db", ServerState::new("PRMR-1", ServerRole::DbServer))
            .build()
            .unwrap()
    }

    fn collection(database: &Database) -> Arc<LogicalCollection> {
        database.create_collection(LogicalCollection::builder(1, "s100"))
    }

    fn resolve(
        database: &Database,
        collection: &LogicalCollection,
        options: &mut OperationOptions,
    ) -> WriteResult<ReplicationDecision> {
        determine_replication(database, collection, OperationKind::Insert, None, false, options)
    }

    #[test]
    fn test_single_server_does_not_replicate() {
        let database = Database::builder("db", ServerState::single()).build().unwrap();
        let coll = collection(&database);
        let decision = resolve(&database, &coll, &mut OperationOptions::default()).unwrap();
        assert_eq!(decision.replication_type, ReplicationType::None);
    }

    #[test]
    fn test_leader_snapshots_followers() {
        let database = db_server();
        let coll = collection(&database);
        coll.follower_info().add("PRMR-2");
        let mut options = OperationOptions {
            silent: true,
            ..Default::default()
        };
        let decision = resolve(&database, &coll, &mut options).unwrap();
        assert!(decision.is_leader());
        assert_eq!(decision.followers.as_ref(), &vec!["PRMR-2".to_string()]);
        assert!(decision.replicates(ReplicationVersion::One));
        assert!(!options.silent);

        coll.follower_info().add("PRMR-3");
        assert_eq!(decision.followers.len(), 1);
    }

    #[test]
    fn test_leader_without_followers_stays_silent() {
        let database = db_server();
        let coll = collection(&database);
        let mut options = OperationOptions {
            silent: true,
            ..Default::default()
        };
        let decision = resolve(&database, &coll, &mut options).unwrap();
        assert!(decision.is_leader());
        assert!(options.silent);
    }

    #[test]
    fn test_leader_refuses_replication_requests() {
        let database = db_server();
        let coll = collection(&database);
        let mut options = OperationOptions::from_leader("PRMR-9");
        let err = resolve(&database, &coll, &mut options).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShardLeaderRefusesReplication);
    }

    #[test]
    fn test_write_concern_and_availability() {
        let database = db_server();
        let coll = database.create_collection(LogicalCollection::builder(1, "s100").write_concern(2));
        let err = resolve(&database, &coll, &mut OperationOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::WriteConcernNotFulfilled);

        database.server().set_read_only(true);
        let err = resolve(&database, &coll, &mut OperationOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ReadOnly);

        coll.follower_info().set_availability(Availability::Startup);
        let err = resolve(&database, &coll, &mut OperationOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BackendUnavailable);
    }

    #[test]
    fn test_follower_accepts_its_leader_and_goes_silent() {
        let database = db_server();
        let coll = collection(&database);
        coll.follower_info().set_the_leader("PRMR-1");
        let mut options = OperationOptions::from_leader("PRMR-1");
        let decision = resolve(&database, &coll, &mut options).unwrap();
        assert!(decision.is_follower());
        assert!(options.silent);
        assert!(!decision.replicates(ReplicationVersion::One));
    }

    #[test]
    fn test_follower_refuses_client_writes_and_strangers() {
        let database = db_server();
        let coll = collection(&database);
        coll.follower_info().set_the_leader("PRMR-1");

        let err = resolve(&database, &coll, &mut OperationOptions::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::LeaderResigned);

        let err = resolve(&database, &coll, &mut OperationOptions::from_leader("PRMR-7")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShardFollowerRefusesOperation);
        assert!(err.message().contains("shard: db/s100"));
        assert!(err.message().contains("operation: insert"));
        assert!(err.message().contains("from: PRMR-7"));
        assert!(err.message().contains("current leader: PRMR-1"));
    }

    #[test]
    fn test_failure_points_override_refusal() {
        let database = db_server();
        let coll = collection(&database);
        coll.follower_info().set_the_leader("PRMR-1");

        database.failure_points().enable(points::NEVER_REFUSE_ON_FOLLOWER);
        assert!(resolve(&database, &coll, &mut OperationOptions::from_leader("PRMR-7")).is_ok());

        database.failure_points().enable(points::REFUSE_ON_FOLLOWER);
        assert!(resolve(&database, &coll, &mut OperationOptions::from_leader("PRMR-1")).is_err());
    }

    #[test]
    fn test_expect_following_term() {
        let database = db_server();
        let coll = collection(&database);
        coll.follower_info().set_the_leader("PRMR-1");
        database.failure_points().enable(points::EXPECT_FOLLOWING_TERM);

        let mut options = OperationOptions::from_leader("PRMR-1");
        options.is_restore = false;
        let err = resolve(&database, &coll, &mut options).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ShardFollowerRefusesOperation);
    }

    #[test]
    fn test_leader_refusal_failure_point_needs_marker() {
        let database = db_server();
        let coll = collection(&database);
        database.failure_points().enable(points::INSERT_LEADER_REFUSAL);

        let plain = json!({"_key": "a"});
        let marked = json!({"_key": "a", "ThisIsTheRetryOnLeaderRefusalTest": true});
        let mut options = OperationOptions::default();
        assert!(determine_replication(&database, &coll, OperationKind::Insert, Some(&plain), false, &mut options).is_ok());
        let err = determine_replication(&database, &coll, OperationKind::Insert, Some(&marked), false, &mut options)
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
