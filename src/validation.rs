//! Schema validation helpers.
//!
//! This module validates a `serde_json::Value` against a [`Schema`] before any
//! remote call is made, so malformed desired state never reaches the API.
//!
//! # Example
//!
//! ```
//! use hemmer_provider_tfe::schema::{Schema, Attribute};
//! use hemmer_provider_tfe::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute(
//!         "enforce_mode",
//!         Attribute::optional_string().with_allowed_values(["advisory", "hard-mandatory"]),
//!     );
//!
//! let diagnostics = validate(&schema, &json!({"name": "policy-test"}));
//! assert!(diagnostics.is_empty());
//!
//! let diagnostics = validate(&schema, &json!({"name": "policy-test", "enforce_mode": "strict"}));
//! assert_eq!(diagnostics.len(), 1);
//! assert_eq!(diagnostics[0].attribute, Some("enforce_mode".to_string()));
//! ```

use crate::error::ProviderError;
use crate::schema::{Attribute, AttributeType, Diagnostic, DiagnosticSeverity, Schema};
use serde_json::Value;

/// Validate a JSON value against a schema.
///
/// Returns a list of diagnostics for any validation errors found.
/// An empty list means the value is valid.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Optional attributes may be absent or null
/// - Computed attributes are skipped (provider sets these)
/// - Attribute types must match the schema
/// - String attributes with an allow-list must hold one of the listed values
pub fn validate(schema: &Schema, value: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match value {
        Value::Object(map) => map,
        _ => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", value_type_name(value))),
            );
            return diagnostics;
        },
    };

    for (name, attr) in schema.sorted_attributes() {
        validate_attribute(attr, obj.get(name), name, &mut diagnostics);
    }

    diagnostics
}

/// Validate a JSON value against a schema, returning Ok if valid or Err with diagnostics.
///
/// This is a convenience wrapper around [`validate`] that returns a Result.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Vec<Diagnostic>> {
    let diagnostics = validate(schema, value);
    if diagnostics.is_empty() {
        Ok(())
    } else {
        Err(diagnostics)
    }
}

/// Check if a JSON value is valid against a schema.
///
/// Returns `true` if valid, `false` otherwise.
/// Use [`validate`] to get detailed error information.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    validate(schema, value).is_empty()
}

/// Validate and fold all diagnostics into a single [`ProviderError::Validation`].
pub fn ensure_valid(schema: &Schema, value: &Value) -> Result<(), ProviderError> {
    validate_result(schema, value).map_err(|diagnostics| {
        let messages: Vec<String> = diagnostics
            .iter()
            .map(|d| match &d.detail {
                Some(detail) => format!("{}: {}", d.summary, detail),
                None => d.summary.clone(),
            })
            .collect();
        ProviderError::Validation(messages.join("; "))
    })
}

fn validate_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    // Skip computed-only attributes (provider sets these)
    if !attr.flags.is_configurable() {
        return;
    }

    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path),
                );
            }
        },
        Some(v) => {
            validate_attribute_type(attr.attr_type, v, path, diagnostics);
            if let (Some(allowed), Some(s)) = (&attr.allowed_values, v.as_str()) {
                if !allowed.iter().any(|a| a == s) {
                    diagnostics.push(
                        Diagnostic::error(format!("Invalid value for attribute '{}'", path))
                            .with_detail(format!(
                                "Expected one of [{}], got \"{}\"",
                                allowed.join(", "),
                                s
                            ))
                            .with_attribute(path),
                    );
                }
            }
        },
    }
}

fn validate_attribute_type(
    attr_type: AttributeType,
    value: &Value,
    path: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match attr_type {
        AttributeType::String => {
            if !value.is_string() {
                diagnostics.push(type_error(path, "string", value));
            }
        },
        AttributeType::Int64 => {
            if !is_int64(value) {
                diagnostics.push(type_error(path, "int64", value));
            }
        },
        AttributeType::Bool => {
            if !value.is_boolean() {
                diagnostics.push(type_error(path, "bool", value));
            }
        },
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn is_int64(value: &Value) -> bool {
    match value {
        Value::Number(n) => {
            if n.as_i64().is_some() {
                true
            } else if let Some(f) = n.as_f64() {
                f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64
            } else {
                false
            }
        },
        _ => false,
    }
}

fn type_error(path: &str, expected: &str, got: &Value) -> Diagnostic {
    Diagnostic {
        severity: DiagnosticSeverity::Error,
        summary: format!("Invalid type for attribute '{}'", path),
        detail: Some(format!(
            "Expected {}, got {}",
            expected,
            value_type_name(got)
        )),
        attribute: Some(path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;
    use serde_json::json;

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!({"name": "test"}));
        assert!(diagnostics.is_empty());

        // Missing required
        let diagnostics = validate(&schema, &json!({}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, Some("name".to_string()));

        // Null value
        let diagnostics = validate(&schema, &json!({"name": null}));
        assert_eq!(diagnostics.len(), 1);

        // Wrong type
        let diagnostics = validate(&schema, &json!({"name": 123}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid type"));
    }

    #[test]
    fn test_validate_optional_attribute() {
        let schema = Schema::v0().with_attribute("hcl", Attribute::optional_bool());

        assert!(validate(&schema, &json!({"hcl": true})).is_empty());
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"hcl": null})).is_empty());

        let diagnostics = validate(&schema, &json!({"hcl": "true"}));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_validate_computed_attribute_skipped() {
        let schema = Schema::v0().with_attribute("callback_url", Attribute::computed_string());

        assert!(validate(&schema, &json!({})).is_empty());
        // Even with wrong type, we don't validate computed-only attrs
        assert!(validate(&schema, &json!({"callback_url": 123})).is_empty());
    }

    #[test]
    fn test_validate_int64() {
        let schema = Schema::v0().with_attribute("request_timeout", Attribute::optional_int64());

        assert!(validate(&schema, &json!({"request_timeout": 42})).is_empty());
        assert!(validate(&schema, &json!({"request_timeout": 42.0})).is_empty());
        assert_eq!(validate(&schema, &json!({"request_timeout": 42.5})).len(), 1);
        assert_eq!(validate(&schema, &json!({"request_timeout": "42"})).len(), 1);
    }

    #[test]
    fn test_validate_allowed_values() {
        let schema = Schema::v0().with_attribute(
            "access",
            Attribute::required_string().with_allowed_values(["admin", "read", "write"]),
        );

        assert!(validate(&schema, &json!({"access": "write"})).is_empty());

        let diagnostics = validate(&schema, &json!({"access": "owner"}));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Invalid value"));
        assert!(diagnostics[0]
            .detail
            .as_deref()
            .unwrap()
            .contains("admin, read, write"));

        // Allow-lists are case sensitive
        assert_eq!(validate(&schema, &json!({"access": "Admin"})).len(), 1);
    }

    #[test]
    fn test_validate_multiple_errors() {
        let schema = Schema::v0()
            .with_attribute("key", Attribute::required_string())
            .with_attribute("value", Attribute::required_string())
            .with_attribute("hcl", Attribute::optional_bool());

        let diagnostics = validate(&schema, &json!({"key": 1, "hcl": "yes"}));
        assert_eq!(diagnostics.len(), 3);
        // Diagnostics come out in attribute name order
        assert_eq!(diagnostics[0].attribute, Some("hcl".to_string()));
        assert_eq!(diagnostics[1].attribute, Some("key".to_string()));
        assert_eq!(diagnostics[2].attribute, Some("value".to_string()));
    }

    #[test]
    fn test_is_valid_helper() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(is_valid(&schema, &json!({"name": "test"})));
        assert!(!is_valid(&schema, &json!({})));
    }

    #[test]
    fn test_validate_result_helper() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate_result(&schema, &json!({"name": "test"})).is_ok());

        let result = validate_result(&schema, &json!({}));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().len(), 1);
    }

    #[test]
    fn test_ensure_valid_folds_diagnostics() {
        let schema = Schema::v0()
            .with_attribute("key", Attribute::required_string())
            .with_attribute("value", Attribute::required_string());

        let err = ensure_valid(&schema, &json!({})).unwrap_err();
        match err {
            ProviderError::Validation(msg) => {
                assert!(msg.contains("'key'"));
                assert!(msg.contains("'value'"));
            },
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_root_not_object() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        let diagnostics = validate(&schema, &json!("not an object"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Expected object"));
    }
}
