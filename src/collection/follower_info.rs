//! Follower metadata of one shard
//!
//! Single writer per shard: read at role-resolution time, shrunk by the
//! fan-out when a follower fails.
//!
//! - The follower list is ordered and de-duplicated
//! - Readers get an immutable snapshot; later changes never affect it
//! - Removal is idempotent, removing an absent follower is not an error
//! - Only the leader may remove followers

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{ErrorCode, WriteError, WriteResult};

/// Whether the leader may accept writes right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    Allowed,
    /// Too few in-sync replicas for the configured write concern
    Forbidden,
    /// Shard is not currently serviceable
    Unavailable,
    /// Server is still starting up
    Startup,
}

/// Externally reported availability of the shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
    Startup,
}

#[derive(Debug)]
struct Inner {
    /// Empty when this server is the leader
    leader: String,
    followers: Arc<Vec<String>>,
    following_term_ids: HashMap<String, u64>,
    write_concern: usize,
    availability: Availability,
}

/// Follower metadata of a shard.
#[derive(Debug)]
pub struct FollowerInfo {
    inner: RwLock<Inner>,
}

impl Default for FollowerInfo {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FollowerInfo {
    pub fn new(write_concern: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                leader: String::new(),
                followers: Arc::new(Vec::new()),
                following_term_ids: HashMap::new(),
                write_concern: write_concern.max(1),
                availability: Availability::Available,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// The leader this server follows, empty if it leads itself.
    ///
    /// May carry a term suffix (`SERVER_TERM`).
    pub fn leader(&self) -> String {
        self.read().leader.clone()
    }

    pub fn is_leader(&self) -> bool {
        self.read().leader.is_empty()
    }

    /// Follow `leader`; drops any followers this server had.
    pub fn set_the_leader(&self, leader: impl Into<String>) {
        let mut inner = self.write();
        inner.leader = leader.into();
        inner.followers = Arc::new(Vec::new());
        inner.following_term_ids.clear();
    }

    /// Take over leadership.
    pub fn become_leader(&self) {
        self.write().leader.clear();
    }

    /// Snapshot of the current followers.
    pub fn get(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.read().followers)
    }

    /// Add a follower; adding a present follower is a no-op.
    pub fn add(&self, server: impl Into<String>) {
        let server = server.into();
        let mut inner = self.write();
        if inner.followers.contains(&server) {
            return;
        }
        let mut followers = inner.followers.as_ref().clone();
        followers.push(server);
        inner.followers = Arc::new(followers);
    }

    /// Remove a follower.
    ///
    /// Returns whether it was present. Fails with `NotLeader` if this server
    /// no longer leads the shard.
    pub fn remove(&self, server: &str) -> WriteResult<bool> {
        let mut inner = self.write();
        if !inner.leader.is_empty() {
            return Err(WriteError::new(
                ErrorCode::NotLeader,
                format!("cannot drop follower {}, not the leader", server),
            ));
        }
        if !inner.followers.iter().any(|f| f == server) {
            return Ok(false);
        }
        let followers: Vec<String> = inner
            .followers
            .iter()
            .filter(|f| f.as_str() != server)
            .cloned()
            .collect();
        inner.followers = Arc::new(followers);
        inner.following_term_ids.remove(server);
        Ok(true)
    }

    /// Term id the follower was told to follow, 0 if unknown.
    pub fn following_term_id(&self, server: &str) -> u64 {
        self.read()
            .following_term_ids
            .get(server)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_following_term_id(&self, server: &str, term: u64) {
        self.write()
            .following_term_ids
            .insert(server.to_string(), term);
    }

    pub fn write_concern(&self) -> usize {
        self.read().write_concern
    }

    pub fn set_write_concern(&self, write_concern: usize) {
        self.write().write_concern = write_concern.max(1);
    }

    pub fn set_availability(&self, availability: Availability) {
        self.write().availability = availability;
    }

    /// Can the leader accept a write given the current in-sync followers?
    pub fn allowed_to_write(&self) -> WriteState {
        let inner = self.read();
        match inner.availability {
            Availability::Unavailable => WriteState::Unavailable,
            Availability::Startup => WriteState::Startup,
            Availability::Available if inner.followers.len() + 1 < inner.write_concern => {
                WriteState::Forbidden
            }
            Availability::Available => WriteState::Allowed,
        }
    }
}
