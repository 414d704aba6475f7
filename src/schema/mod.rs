//! Collection schemas
//!
//! A collection may carry a schema that every write is checked against
//! before it reaches storage.
//!
//! - System attributes (`_key`, `_id`, `_rev`, `_from`, `_to`) are never validated
//! - No defaults, no coercion
//! - The validation level decides which writes are checked
//! - Deterministic validation

mod errors;
mod types;
mod validator;

pub use errors::ValidationDetails;
pub use types::{CollectionSchema, FieldDef, FieldType, ValidationLevel};
pub use validator::SchemaValidator;
