//! Transactions and the document operations running inside them

mod batch;
mod context;
mod helpers;
mod hooks;
mod methods;
mod options;
mod processor;
mod result;
mod scratch;
mod state;

pub use batch::BatchOptions;
pub use context::TransactionContext;
pub use helpers::{
    build_document_identity, is_stale_version, shard_keys_changed, smart_join_attribute_changed,
};
pub use hooks::TransactionHooks;
pub use methods::TransactionMethods;
pub use options::{
    AccessMode, CountType, OperationKind, OperationOptions, OverwriteMode, RefillIndexCaches,
    TransactionCollections, TransactionOptions,
};
pub use result::{error_object, OperationResult};
pub use scratch::{Reusable, ScratchGuard, ScratchPool};
pub use state::{TransactionState, TransactionStatus};
