//! Per-call batch options
//!
//! Derived once per top-level call, shared by every document of the batch.
//! Restores and writes coming from a leader skip every check: the leader
//! already applied them.

use std::sync::Arc;

use super::options::{OperationKind, OperationOptions, OverwriteMode};
use crate::collection::{ComputeOn, ComputedValues, LogicalCollection};
use crate::schema::CollectionSchema;

#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Reject update/replace that change a shard key
    pub validate_shard_keys: bool,
    /// Reject update/replace that change the smart-join attribute
    pub validate_smart_join: bool,
    pub schema: Option<Arc<CollectionSchema>>,
    /// Set only if a computed attribute triggers for this operation
    pub computed: Option<Arc<ComputedValues>>,
}

impl BatchOptions {
    pub fn build(
        options: &OperationOptions,
        collection: &LogicalCollection,
        kind: OperationKind,
        is_db_server: bool,
    ) -> Self {
        let mut batch = Self::default();
        if options.is_restore || options.is_synchronous_replication() {
            return batch;
        }

        if is_db_server {
            batch.validate_shard_keys =
                kind != OperationKind::Insert && !collection.uses_default_shard_keys();
            batch.validate_smart_join = collection.smart_join_attribute().is_some();
        }

        if options.validate {
            batch.schema = collection.schema().cloned();
        }

        if let Some(computed) = collection.computed_values() {
            let pick = match kind {
                OperationKind::Insert => {
                    computed.must_compute_on(ComputeOn::Insert)
                        || match options.overwrite_mode {
                            OverwriteMode::Replace => computed.must_compute_on(ComputeOn::Replace),
                            OverwriteMode::Update => computed.must_compute_on(ComputeOn::Update),
                            _ => false,
                        }
                }
                OperationKind::Update => computed.must_compute_on(ComputeOn::Update),
                OperationKind::Replace => computed.must_compute_on(ComputeOn::Replace),
                _ => false,
            };
            if pick {
                batch.computed = Some(Arc::clone(computed));
            }
        }
        batch
    }
}
