//! Transaction status-change hooks
//!
//! Hooks are injected through the database builder. A failing or panicking
//! hook never escapes the commit/abort boundary: its failure is converted to
//! an error and the first such error is returned once every hook ran.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::state::TransactionStatus;
use crate::error::{WriteError, WriteResult};
use crate::observability::{log_event, Event};
use crate::storage::TransactionId;

pub trait TransactionHooks: Send + Sync {
    fn on_status_change(&self, trx: TransactionId, status: TransactionStatus) -> WriteResult<()>;
}

/// Run every hook; returns the first failure.
pub(crate) fn apply_status_change_hooks(
    hooks: &[Arc<dyn TransactionHooks>],
    trx: TransactionId,
    status: TransactionStatus,
) -> WriteResult<()> {
    let mut first_error = None;
    for hook in hooks {
        let outcome = catch_unwind(AssertUnwindSafe(|| hook.on_status_change(trx, status)))
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "status hook panicked".to_string());
                Err(WriteError::internal(message))
            });
        if let Err(e) = outcome {
            log_event(
                Event::StatusHookFailed,
                &[
                    ("error", e.message()),
                    ("status", status.as_str()),
                    ("trx", &trx.to_string()),
                ],
            );
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
