//! Aggregated outcome of an operation call

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::error::{ErrorCode, WriteError};

/// Outcome of a (possibly batched) operation.
///
/// - `result` is the overall outcome; for a single document it carries the
///   item's error, for arrays it is ok and items fail individually
/// - `buffer` holds the result document(s); `Null` for silent calls without
///   errors
/// - `error_counts` counts per-item failures of array calls by code
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub result: Result<(), WriteError>,
    pub buffer: Value,
    pub error_counts: BTreeMap<ErrorCode, usize>,
}

impl OperationResult {
    pub fn ok(buffer: Value) -> Self {
        Self {
            result: Ok(()),
            buffer,
            error_counts: BTreeMap::new(),
        }
    }

    pub fn failed(error: WriteError) -> Self {
        Self {
            result: Err(error),
            buffer: Value::Null,
            error_counts: BTreeMap::new(),
        }
    }

    /// Failed single-document call that still reports the found document.
    pub fn failed_with(error: WriteError, buffer: Value) -> Self {
        Self {
            result: Err(error),
            buffer,
            error_counts: BTreeMap::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&WriteError> {
        self.result.as_ref().err()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error().map(WriteError::code)
    }

    /// True when at least one item of an array call failed.
    pub fn has_item_errors(&self) -> bool {
        !self.error_counts.is_empty()
    }

    pub fn count_of(&self, code: ErrorCode) -> usize {
        self.error_counts.get(&code).copied().unwrap_or(0)
    }
}

/// Per-item error object of an array result.
pub fn error_object(error: &WriteError) -> Value {
    json!({
        "error": true,
        "errorNum": error.code().number(),
        "errorMessage": error.message(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_object_shape() {
        let object = error_object(&WriteError::document_not_found());
        assert_eq!(object["error"], json!(true));
        assert_eq!(object["errorNum"], json!(1202));
        assert_eq!(object["errorMessage"], json!("document not found"));
    }

    #[test]
    fn test_accessors() {
        let mut result = OperationResult::ok(json!([]));
        assert!(result.is_ok());
        assert!(!result.has_item_errors());
        result.error_counts.insert(ErrorCode::Conflict, 2);
        assert_eq!(result.count_of(ErrorCode::Conflict), 2);
        assert_eq!(result.count_of(ErrorCode::DocumentNotFound), 0);

        let failed = OperationResult::failed(WriteError::conflict());
        assert_eq!(failed.error_code(), Some(ErrorCode::Conflict));
        assert_eq!(failed.buffer, Value::Null);
    }
}
