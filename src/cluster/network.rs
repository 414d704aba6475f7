//! Follower request/response contract
//!
//! The transport itself is external. A request is one HTTP-like call to a
//! follower; `Err` from [`FollowerTransport::send`] means no response was
//! received at all (timeout, connection failure).

use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{ErrorCode, WriteError, WriteFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestVerb {
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for RequestVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestVerb::Post => "POST",
            RequestVerb::Put => "PUT",
            RequestVerb::Patch => "PATCH",
            RequestVerb::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// One outbound request to a follower.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationRequest {
    /// Server id of the follower
    pub destination: String,
    pub verb: RequestVerb,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub body: Value,
    pub timeout: Duration,
}

impl ReplicationRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Answer of a follower.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicationResponse {
    /// HTTP-like status code
    pub status: u16,
    /// Per-item error counts reported by the follower (error-codes header)
    pub error_codes: Option<BTreeMap<ErrorCode, usize>>,
    /// Structured error of a failed request
    pub error: Option<WriteError>,
}

impl ReplicationResponse {
    pub fn ok(status: u16) -> Self {
        Self {
            status,
            error_codes: None,
            error: None,
        }
    }

    pub fn failed(error: WriteError) -> Self {
        Self {
            status: error.code().status_code(),
            error_codes: None,
            error: Some(error),
        }
    }

    /// Accepted, created or ok, and no item failed on the follower.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 201 | 202)
            && self.error.is_none()
            && self.error_codes.as_ref().map_or(true, BTreeMap::is_empty)
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(WriteError::code)
    }
}

/// Sends requests to followers.
pub trait FollowerTransport: Send + Sync {
    fn send(&self, request: ReplicationRequest) -> WriteFuture<'_, ReplicationResponse>;
}
