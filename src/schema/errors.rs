//! Schema validation failure details

use std::fmt;

use crate::error::{ErrorCode, WriteError};

/// Validation failure details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationDetails {
    /// Field path (e.g., "user.address.city")
    pub field: String,
    /// Expected type or condition
    pub expected: String,
    /// Actual value or type found
    pub actual: String,
}

impl ValidationDetails {
    pub fn new(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(field, "field to be present", "missing")
    }

    pub fn extra_field(field: impl Into<String>) -> Self {
        Self::new(field, "no undeclared fields", "extra field present")
    }

    pub fn type_mismatch(field: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::new(field, expected, actual)
    }

    pub fn null_value(field: impl Into<String>) -> Self {
        Self::new(field, "non-null value", "null")
    }

    /// Convert into the write error reported to the caller.
    ///
    /// A schema-level message, when configured, replaces the details.
    pub fn into_write_error(self, schema_message: Option<&str>) -> WriteError {
        let message = match schema_message {
            Some(message) => message.to_string(),
            None => format!("schema validation failed: {}", self),
        };
        WriteError::new(ErrorCode::SchemaValidationFailed, message)
    }
}

impl fmt::Display for ValidationDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field '{}': expected {}, got {}", self.field, self.expected, self.actual)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_details_message() {
        let err = ValidationDetails::missing_field("name").into_write_error(None);
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
        assert!(err.message().contains("field 'name'"));
    }

    #[test]
    fn test_schema_message_overrides_details() {
        let err = ValidationDetails::null_value("age").into_write_error(Some("age is required"));
        assert_eq!(err.message(), "age is required");
    }
}
