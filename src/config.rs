//! Write-path configuration
//!
//! Loading configuration is left to the embedding server; these types only
//! describe the knobs, their defaults and their validation rules.
//!
//! - Replication timeouts bound the per-follower request timeout
//! - Intermediate-commit thresholds bound a transaction's pending writes
//! - Lock timeout bounds collection lock acquisition at begin

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("replication timeout lower limit {lower}s exceeds upper limit {upper}s")]
    TimeoutLimitsInverted { lower: f64, upper: f64 },

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

fn default_lower_limit() -> f64 {
    900.0
}

fn default_upper_limit() -> f64 {
    3600.0
}

fn default_timeout_factor() -> f64 {
    1.0
}

fn default_timeout_per_4k() -> f64 {
    0.1
}

/// Bounds for the timeout of synchronous replication requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationTimeoutConfig {
    /// Lower bound in seconds
    #[serde(default = "default_lower_limit")]
    pub lower_limit_secs: f64,
    /// Upper bound in seconds
    #[serde(default = "default_upper_limit")]
    pub upper_limit_secs: f64,
    /// Multiplier applied after clamping
    #[serde(default = "default_timeout_factor")]
    pub timeout_factor: f64,
    /// Seconds added per 4 KiB of payload
    #[serde(default = "default_timeout_per_4k")]
    pub timeout_per_4k_secs: f64,
}

impl Default for ReplicationTimeoutConfig {
    fn default() -> Self {
        Self {
            lower_limit_secs: default_lower_limit(),
            upper_limit_secs: default_upper_limit(),
            timeout_factor: default_timeout_factor(),
            timeout_per_4k_secs: default_timeout_per_4k(),
        }
    }
}

impl ReplicationTimeoutConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lower_limit_secs > self.upper_limit_secs {
            return Err(ConfigError::TimeoutLimitsInverted {
                lower: self.lower_limit_secs,
                upper: self.upper_limit_secs,
            });
        }
        if self.timeout_factor <= 0.0 {
            return Err(ConfigError::NotPositive("timeout_factor"));
        }
        Ok(())
    }
}

fn default_max_count() -> u64 {
    1_000_000
}

fn default_max_size() -> u64 {
    512 * 1024 * 1024
}

/// Thresholds after which a transaction flushes its pending writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateCommitConfig {
    /// Maximum pending operations
    #[serde(default = "default_max_count")]
    pub max_count: u64,
    /// Maximum pending bytes
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
}

impl Default for IntermediateCommitConfig {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_size_bytes: default_max_size(),
        }
    }
}

impl IntermediateCommitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_count == 0 {
            return Err(ConfigError::NotPositive("max_count"));
        }
        if self.max_size_bytes == 0 {
            return Err(ConfigError::NotPositive("max_size_bytes"));
        }
        Ok(())
    }
}

fn default_lock_timeout() -> f64 {
    900.0
}

/// Top-level write-path configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteConfig {
    #[serde(default)]
    pub replication_timeouts: ReplicationTimeoutConfig,
    #[serde(default)]
    pub intermediate_commits: IntermediateCommitConfig,
    /// Collection lock timeout in seconds
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: f64,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            replication_timeouts: ReplicationTimeoutConfig::default(),
            intermediate_commits: IntermediateCommitConfig::default(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

impl WriteConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.replication_timeouts.validate()?;
        self.intermediate_commits.validate()?;
        if self.lock_timeout_secs <= 0.0 {
            return Err(ConfigError::NotPositive("lock_timeout_secs"));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.lock_timeout_secs)
    }
}
