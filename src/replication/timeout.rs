//! Replication request timeout
//!
//! Followers are assumed to process at least 2500 documents per second, with
//! extra time for large payloads. The result is clamped to the configured
//! limits and scaled by the configured factor.

use std::time::Duration;

use crate::config::ReplicationTimeoutConfig;

/// Documents per second a follower is assumed to handle
const DOCUMENTS_PER_SECOND: f64 = 2500.0;

/// Timeout for replicating `count` documents totalling `total_bytes`.
pub fn choose_timeout(config: &ReplicationTimeoutConfig, count: usize, total_bytes: usize) -> Duration {
    let mut timeout = count as f64 / DOCUMENTS_PER_SECOND;
    timeout += (total_bytes as f64 / 4096.0) * config.timeout_per_4k_secs;
    let clamped = timeout.clamp(config.lower_limit_secs, config.upper_limit_secs);
    Duration::from_secs_f64(clamped * config.timeout_factor)
}
