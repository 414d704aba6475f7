//! Schema validator for documents
//!
//! Validation semantics:
//! - All required fields are present
//! - Undeclared fields only when the schema allows them
//! - Field types exactly match, no coercion
//! - Nulls only for nullable fields
//!
//! The validation level decides whether a write is checked at all.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::errors::ValidationDetails;
use super::types::{CollectionSchema, FieldDef, FieldType, ValidationLevel};
use crate::document::is_system_attribute;
use crate::error::WriteResult;

/// Validator bound to one collection schema.
///
/// Validator does not mutate documents.
pub struct SchemaValidator<'a> {
    schema: &'a CollectionSchema,
}

impl<'a> SchemaValidator<'a> {
    pub fn new(schema: &'a CollectionSchema) -> Self {
        Self { schema }
    }

    /// Validate the document a write would store.
    ///
    /// `old` is the previous version for update/replace, `None` for insert.
    pub fn validate(
        &self,
        new: &Map<String, Value>,
        old: Option<&Map<String, Value>>,
    ) -> WriteResult<()> {
        let applies = match (self.schema.level, old) {
            (ValidationLevel::None, _) => false,
            (ValidationLevel::New, Some(_)) => false,
            (ValidationLevel::Moderate, Some(old)) => self.check(old).is_ok(),
            _ => true,
        };
        if !applies {
            return Ok(());
        }
        self.check(new)
            .map_err(|details| details.into_write_error(self.schema.message.as_deref()))
    }

    /// Check a document against the schema regardless of level.
    pub fn check(&self, document: &Map<String, Value>) -> Result<(), ValidationDetails> {
        self.check_object(document, &self.schema.fields, "", true)
    }

    fn check_object(
        &self,
        obj: &Map<String, Value>,
        fields: &BTreeMap<String, FieldDef>,
        path_prefix: &str,
        top_level: bool,
    ) -> Result<(), ValidationDetails> {
        if !self.schema.allow_additional {
            for key in obj.keys() {
                if top_level && is_system_attribute(key) {
                    continue;
                }
                if !fields.contains_key(key) {
                    return Err(ValidationDetails::extra_field(make_path(path_prefix, key)));
                }
            }
        }

        for (field_name, field_def) in fields {
            let field_path = make_path(path_prefix, field_name);
            match obj.get(field_name) {
                Some(Value::Null) if field_def.nullable => {}
                Some(Value::Null) => return Err(ValidationDetails::null_value(field_path)),
                Some(value) => self.check_value(value, &field_def.field_type, &field_path)?,
                None if field_def.required => {
                    return Err(ValidationDetails::missing_field(field_path));
                }
                None => {}
            }
        }
        Ok(())
    }

    fn check_value(
        &self,
        value: &Value,
        expected_type: &FieldType,
        field_path: &str,
    ) -> Result<(), ValidationDetails> {
        let matches = match expected_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Float => value.is_number(),
            FieldType::Object { fields } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| type_error(field_path, "object", value))?;
                return self.check_object(obj, fields, field_path, false);
            }
            FieldType::Array { element_type } => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| type_error(field_path, "array", value))?;
                for (i, elem) in arr.iter().enumerate() {
                    let elem_path = format!("{}[{}]", field_path, i);
                    if elem.is_null() {
                        return Err(ValidationDetails::null_value(elem_path));
                    }
                    self.check_value(elem, element_type, &elem_path)?;
                }
                return Ok(());
            }
        };
        if matches {
            Ok(())
        } else {
            Err(type_error(field_path, expected_type.type_name(), value))
        }
    }
}

/// Returns the JSON type name for error messages.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "int"
            } else {
                "float"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn make_path(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", prefix, field)
    }
}

fn type_error(field_path: &str, expected: &str, actual: &Value) -> ValidationDetails {
    ValidationDetails::type_mismatch(field_path, expected, json_type_name(actual))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn user_schema(level: ValidationLevel) -> CollectionSchema {
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), FieldDef::required(FieldType::String));

        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FieldDef::required(FieldType::String));
        fields.insert("age".to_string(), FieldDef::optional(FieldType::Int));
        fields.insert(
            "address".to_string(),
            FieldDef::optional(FieldType::Object { fields: address }),
        );
        fields.insert(
            "tags".to_string(),
            FieldDef::optional(FieldType::Array {
                element_type: Box::new(FieldType::String),
            }),
        );
        CollectionSchema::new(level, fields)
    }

    #[test]
    fn test_valid_document_passes() {
        let schema = user_schema(ValidationLevel::Strict);
        let doc = object(json!({"_key": "a", "_rev": "1", "name": "x", "age": 3,
            "address": {"city": "y"}, "tags": ["t"], "extra": 1}));
        assert!(SchemaValidator::new(&schema).validate(&doc, None).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let schema = user_schema(ValidationLevel::Strict);
        let err = SchemaValidator::new(&schema)
            .validate(&object(json!({"age": 3})), None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
        assert!(err.message().contains("name"));
    }

    #[test]
    fn test_type_mismatch_reports_path() {
        let schema = user_schema(ValidationLevel::Strict);
        let details = SchemaValidator::new(&schema)
            .check(&object(json!({"name": "x", "address": {"city": 5}})))
            .unwrap_err();
        assert_eq!(details.field, "address.city");
        assert_eq!(details.actual, "int");

        let details = SchemaValidator::new(&schema)
            .check(&object(json!({"name": "x", "tags": ["a", 1]})))
            .unwrap_err();
        assert_eq!(details.field, "tags[1]");
    }

    #[test]
    fn test_float_rejected_for_int() {
        let schema = user_schema(ValidationLevel::Strict);
        assert!(SchemaValidator::new(&schema)
            .check(&object(json!({"name": "x", "age": 1.5})))
            .is_err());
    }

    #[test]
    fn test_additional_fields_denied_but_system_attributes_ignored() {
        let schema = user_schema(ValidationLevel::Strict).deny_additional();
        let validator = SchemaValidator::new(&schema);
        assert!(validator
            .check(&object(json!({"_key": "a", "_id": "c/a", "name": "x"})))
            .is_ok());
        let details = validator
            .check(&object(json!({"name": "x", "extra": true})))
            .unwrap_err();
        assert_eq!(details.field, "extra");
    }

    #[test]
    fn test_level_new_only_checks_inserts() {
        let schema = user_schema(ValidationLevel::New);
        let validator = SchemaValidator::new(&schema);
        let invalid = object(json!({"age": "old"}));
        assert!(validator.validate(&invalid, None).is_err());
        assert!(validator.validate(&invalid, Some(&invalid)).is_ok());
    }

    #[test]
    fn test_level_moderate_skips_previously_invalid() {
        let schema = user_schema(ValidationLevel::Moderate);
        let validator = SchemaValidator::new(&schema);
        let valid = object(json!({"name": "x"}));
        let invalid = object(json!({"age": "old"}));
        assert!(validator.validate(&invalid, Some(&invalid)).is_ok());
        assert!(validator.validate(&invalid, Some(&valid)).is_err());
    }

    #[test]
    fn test_level_none_disables_validation() {
        let schema = user_schema(ValidationLevel::None);
        assert!(SchemaValidator::new(&schema)
            .validate(&object(json!({})), None)
            .is_ok());
    }
}
