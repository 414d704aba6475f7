//! Observability for the write path
//!
//! - Structured logging (JSON lines through `tracing`)
//! - Typed events, including the document audit trail
//! - Lock-free counters
//!
//! # Usage
//!
//! ```ignore
//! use shardwrite::observability::{log_event, Event, MetricsRegistry};
//!
//! log_event(Event::FollowerDropped, &[("follower", "PRMR-2"), ("shard", "s100")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_followers_dropped();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log an event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
