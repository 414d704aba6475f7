//! Synchronous replication of shard writes
//!
//! - [`role`]: decides per call whether this server leads, follows or does
//!   not replicate at all, and snapshots the follower list
//! - [`fanout`]: ships a batch to every follower (or to the replicated log)
//!   and drops followers that fail
//! - [`timeout`]: per-request timeout derived from batch size

pub mod fanout;
pub mod role;
pub mod timeout;

pub use fanout::{replicate_operations, replicate_truncate, TRUNCATE_REPLICATION_TIMEOUT};
pub use role::{determine_replication, ReplicationDecision, ReplicationType};
pub use timeout::choose_timeout;
