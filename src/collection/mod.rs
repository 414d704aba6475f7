//! Collections (shards) and their write-path metadata
//!
//! A [`LogicalCollection`] carries everything the write path needs to know
//! about one shard:
//! - type (document or edge), shard keys, smart-join attribute
//! - schema and computed values
//! - replication scheme and follower metadata
//! - key generator and the collection lock taken by transactions

mod computed;
mod follower_info;

pub use computed::{ComputeFn, ComputeOn, ComputedAttribute, ComputedValues};
pub use follower_info::{Availability, FollowerInfo, WriteState};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::document::{KeyGenerator, TraditionalKeyGenerator, KEY};
use crate::error::{ErrorCode, WriteError, WriteResult};
use crate::schema::CollectionSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionType {
    Document,
    Edge,
}

/// Replication scheme of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationVersion {
    /// Primary/backup: the leader ships each write to its followers
    One,
    /// Consensus log: writes are replicated through the log layer
    Two,
}

/// Metadata of one collection (shard).
#[derive(Debug)]
pub struct LogicalCollection {
    id: u64,
    name: String,
    collection_type: CollectionType,
    shard_keys: Vec<String>,
    smart_join_attribute: Option<String>,
    schema: Option<Arc<CollectionSchema>>,
    computed_values: Option<Arc<ComputedValues>>,
    replication_version: ReplicationVersion,
    wait_for_sync: bool,
    follower_info: Arc<FollowerInfo>,
    key_generator: Arc<dyn KeyGenerator>,
    lock: Arc<tokio::sync::RwLock<()>>,
}

impl LogicalCollection {
    pub fn builder(id: u64, name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder::new(id, name)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_type(&self) -> CollectionType {
        self.collection_type
    }

    pub fn is_edge(&self) -> bool {
        self.collection_type == CollectionType::Edge
    }

    pub fn shard_keys(&self) -> &[String] {
        &self.shard_keys
    }

    /// True when the only shard key is `_key`.
    pub fn uses_default_shard_keys(&self) -> bool {
        self.shard_keys.len() == 1 && self.shard_keys[0] == KEY
    }

    pub fn smart_join_attribute(&self) -> Option<&str> {
        self.smart_join_attribute.as_deref()
    }

    pub fn schema(&self) -> Option<&Arc<CollectionSchema>> {
        self.schema.as_ref()
    }

    pub fn computed_values(&self) -> Option<&Arc<ComputedValues>> {
        self.computed_values.as_ref()
    }

    pub fn replication_version(&self) -> ReplicationVersion {
        self.replication_version
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }

    pub fn follower_info(&self) -> &Arc<FollowerInfo> {
        &self.follower_info
    }

    pub fn key_generator(&self) -> &Arc<dyn KeyGenerator> {
        &self.key_generator
    }

    /// Lock taken by transactions: read/write access shares it, exclusive
    /// access holds it alone.
    pub fn lock(&self) -> &Arc<tokio::sync::RwLock<()>> {
        &self.lock
    }
}

/// Builder for [`LogicalCollection`]
pub struct CollectionBuilder {
    id: u64,
    name: String,
    collection_type: CollectionType,
    shard_keys: Vec<String>,
    smart_join_attribute: Option<String>,
    schema: Option<Arc<CollectionSchema>>,
    computed_values: Option<Arc<ComputedValues>>,
    replication_version: ReplicationVersion,
    wait_for_sync: bool,
    write_concern: usize,
    key_generator: Option<Arc<dyn KeyGenerator>>,
}

impl CollectionBuilder {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            collection_type: CollectionType::Document,
            shard_keys: vec![KEY.to_string()],
            smart_join_attribute: None,
            schema: None,
            computed_values: None,
            replication_version: ReplicationVersion::One,
            wait_for_sync: false,
            write_concern: 1,
            key_generator: None,
        }
    }

    pub fn collection_type(mut self, collection_type: CollectionType) -> Self {
        self.collection_type = collection_type;
        self
    }

    /// Empty input keeps the default `_key` shard key.
    pub fn shard_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if !keys.is_empty() {
            self.shard_keys = keys;
        }
        self
    }

    pub fn smart_join_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.smart_join_attribute = Some(attribute.into());
        self
    }

    pub fn schema(mut self, schema: CollectionSchema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn computed_values(mut self, values: ComputedValues) -> Self {
        self.computed_values = Some(Arc::new(values));
        self
    }

    pub fn replication_version(mut self, version: ReplicationVersion) -> Self {
        self.replication_version = version;
        self
    }

    pub fn wait_for_sync(mut self, wait_for_sync: bool) -> Self {
        self.wait_for_sync = wait_for_sync;
        self
    }

    pub fn write_concern(mut self, write_concern: usize) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn key_generator(mut self, generator: Arc<dyn KeyGenerator>) -> Self {
        self.key_generator = Some(generator);
        self
    }

    pub fn build(self) -> LogicalCollection {
        LogicalCollection {
            id: self.id,
            name: self.name,
            collection_type: self.collection_type,
            shard_keys: self.shard_keys,
            smart_join_attribute: self.smart_join_attribute,
            schema: self.schema,
            computed_values: self.computed_values,
            replication_version: self.replication_version,
            wait_for_sync: self.wait_for_sync,
            follower_info: Arc::new(FollowerInfo::new(self.write_concern)),
            key_generator: self
                .key_generator
                .unwrap_or_else(|| Arc::new(TraditionalKeyGenerator::default())),
            lock: Arc::new(tokio::sync::RwLock::new(())),
        }
    }
}

/// Name resolver for the collections of one database.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    by_name: RwLock<HashMap<String, Arc<LogicalCollection>>>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection, replacing one with the same name.
    pub fn add(&self, collection: LogicalCollection) -> Arc<LogicalCollection> {
        let collection = Arc::new(collection);
        self.by_name
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(collection.name().to_string(), Arc::clone(&collection));
        collection
    }

    pub fn lookup(&self, name: &str) -> WriteResult<Arc<LogicalCollection>> {
        self.by_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| {
                WriteError::new(
                    ErrorCode::DataSourceNotFound,
                    format!("collection or view not found: {}", name),
                )
            })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
