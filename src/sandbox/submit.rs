//! Typed-signature SUBMIT validator (C4).
//!
//! `SUBMIT(outputs)` is a terminal, non-local-exit call: scripts call it at
//! most once to hand back a result, and validation against the registered
//! [`OutputSignature`] happens here rather than inside the scripting engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type a single output field must conform to.
///
/// Tagged exactly as the wire protocol expects: `{"type": "list", "value":
/// {...}}` for a homogeneous list, `{"type": "object", "value": [...]}` for
/// nested fields, `{"type": "enum", "value": ["a", "b"]}` for a closed string
/// set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldType {
    /// A UTF-8 string.
    String,
    /// A signed integer (booleans do not satisfy this).
    Integer,
    /// Any real number, including integers.
    Float,
    /// A boolean.
    Boolean,
    /// A string constrained to a fixed set of values.
    Enum {
        /// Allowed values.
        value: Vec<String>,
    },
    /// A homogeneous list of a single inner type.
    List {
        /// The type every element must satisfy.
        value: Box<FieldType>,
    },
    /// A nested object with its own field specs.
    Object {
        /// Nested field specifications.
        value: Vec<OutputFieldSpec>,
    },
    /// An unvalidated escape hatch; any value is accepted.
    Custom {
        /// Free-form description of the expected shape, not enforced.
        #[serde(default)]
        value: String,
    },
}

/// A single field in a registered output signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFieldSpec {
    /// Field name.
    pub name: String,
    /// Expected type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    #[serde(default = "default_true")]
    pub required: bool,
}

const fn default_true() -> bool {
    true
}

/// The signature registered via `register_signature`, consulted by `SUBMIT`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSignature {
    /// The fields `SUBMIT` must validate outputs against.
    pub output_fields: Vec<OutputFieldSpec>,
}

/// A single field-level failure from SUBMIT output validation.
///
/// Tagged by `error_type` to match the protocol's discriminated error list.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum SubmitFieldError {
    /// The value's runtime type does not match `expected`.
    TypeMismatch {
        /// Dotted/indexed path to the offending field.
        field: String,
        /// The type that was expected.
        expected: FieldType,
        /// The normalized type name of the value actually supplied.
        got: String,
        /// A bounded preview of the offending value.
        value_preview: String,
    },
    /// A required field was absent.
    MissingField {
        /// Dotted/indexed path to the missing field.
        field: String,
        /// The type the field was expected to satisfy.
        expected_type: FieldType,
    },
    /// An enum field's value is not one of the allowed values.
    EnumInvalid {
        /// Dotted/indexed path to the offending field.
        field: String,
        /// The value actually supplied.
        value: String,
        /// The allowed values.
        allowed: Vec<String>,
    },
    /// A structural failure not covered by a more specific variant.
    ValidationFailed {
        /// Dotted/indexed path to the offending field (empty for top-level).
        field: String,
        /// Human-readable explanation.
        reason: String,
    },
    /// `SUBMIT` was called more than once in a single execution.
    MultipleSubmits {
        /// How many times `SUBMIT` has now been called.
        count: u32,
    },
    /// `SUBMIT` was called with no signature registered via
    /// `register_signature`.
    NoSignatureRegistered,
}

/// The outcome of a single `SUBMIT` call.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Outputs matched the registered signature.
    Success {
        /// The validated, JSON-serialized outputs.
        outputs: Value,
    },
    /// Outputs failed validation, or no signature was registered, or
    /// `SUBMIT` was called more than once.
    ValidationError {
        /// Every failure found.
        errors: Vec<SubmitFieldError>,
        /// The JSON-serialized outputs as originally supplied.
        original_outputs: Value,
    },
}

/// Normalized type name used in validation error messages, matching the
/// original's `_type_name`.
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A bounded preview string for validation errors, matching the original's
/// `_preview_value`.
#[must_use]
pub fn preview_value(value: &Value, limit: usize) -> String {
    let text = value.to_string();
    if text.chars().count() <= limit {
        return text;
    }
    let keep = limit.saturating_sub(3);
    let mut preview: String = text.chars().take(keep).collect();
    preview.push_str("...");
    preview
}

const PREVIEW_LIMIT: usize = 100;

fn type_mismatch(field: &str, expected: &FieldType, value: &Value) -> SubmitFieldError {
    SubmitFieldError::TypeMismatch {
        field: field.to_string(),
        expected: expected.clone(),
        got: type_name(value).to_string(),
        value_preview: preview_value(value, PREVIEW_LIMIT),
    }
}

/// Validates a single field's value against its spec, recursing into
/// `list`/`object` field types and appending any failures to `errors`.
fn validate_field_value(field_name: &str, field_type: &FieldType, value: &Value, errors: &mut Vec<SubmitFieldError>) {
    match field_type {
        FieldType::String => {
            if !value.is_string() {
                errors.push(type_mismatch(field_name, field_type, value));
            }
        }
        FieldType::Integer => {
            if !(value.is_i64() || value.is_u64()) || value.is_boolean() {
                errors.push(type_mismatch(field_name, field_type, value));
            }
        }
        FieldType::Float => {
            if !value.is_number() || value.is_boolean() {
                errors.push(type_mismatch(field_name, field_type, value));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                errors.push(type_mismatch(field_name, field_type, value));
            }
        }
        FieldType::Enum { value: allowed } => match value.as_str() {
            None => errors.push(type_mismatch(field_name, field_type, value)),
            Some(s) if !allowed.contains(&s.to_string()) => {
                errors.push(SubmitFieldError::EnumInvalid {
                    field: field_name.to_string(),
                    value: s.to_string(),
                    allowed: allowed.clone(),
                });
            }
            Some(_) => {}
        },
        FieldType::List { value: inner } => {
            let Some(items) = value.as_array() else {
                errors.push(type_mismatch(field_name, field_type, value));
                return;
            };
            for (index, item) in items.iter().enumerate() {
                validate_field_value(&format!("{field_name}[{index}]"), inner, item, errors);
            }
        }
        FieldType::Object { value: nested_fields } => {
            let Some(obj) = value.as_object() else {
                errors.push(type_mismatch(field_name, field_type, value));
                return;
            };
            for nested in nested_fields {
                let nested_path = if nested.name.is_empty() {
                    field_name.to_string()
                } else {
                    format!("{field_name}.{}", nested.name)
                };
                match obj.get(&nested.name) {
                    Some(nested_value) => {
                        validate_field_value(&nested_path, &nested.field_type, nested_value, errors);
                    }
                    None if nested.required => errors.push(SubmitFieldError::MissingField {
                        field: nested_path,
                        expected_type: nested.field_type.clone(),
                    }),
                    None => {}
                }
            }
        }
        FieldType::Custom { .. } => {}
    }
}

/// Validates a SUBMIT payload against a registered signature.
#[must_use]
pub fn validate_submit_outputs(signature: &OutputSignature, outputs: &Value) -> Vec<SubmitFieldError> {
    let Some(obj) = outputs.as_object() else {
        return vec![SubmitFieldError::ValidationFailed {
            field: String::new(),
            reason: "SUBMIT outputs must be an object".to_string(),
        }];
    };

    let mut errors = Vec::new();
    for field_spec in &signature.output_fields {
        match obj.get(&field_spec.name) {
            Some(value) => validate_field_value(&field_spec.name, &field_spec.field_type, value, &mut errors),
            None if field_spec.required => errors.push(SubmitFieldError::MissingField {
                field: field_spec.name.clone(),
                expected_type: field_spec.field_type.clone(),
            }),
            None => {}
        }
    }
    errors
}

/// Tracks how many times `SUBMIT` has been called during one `execute()`.
#[derive(Debug, Default, Clone)]
pub struct SubmitState {
    count: u32,
    outcome: Option<SubmitOutcome>,
}

impl SubmitState {
    /// Resets the per-execution submit count and outcome.
    pub fn reset(&mut self) {
        self.count = 0;
        self.outcome = None;
    }

    /// Takes (and clears) the outcome of the most recent `SUBMIT` call.
    pub fn take_outcome(&mut self) -> Option<SubmitOutcome> {
        self.outcome.take()
    }

    /// Processes a `SUBMIT(outputs)` call, recording the outcome and
    /// returning it.
    ///
    /// `signature` is `None` when no `register_signature` call has happened
    /// yet for this session.
    pub fn submit(&mut self, signature: Option<&OutputSignature>, outputs: Value) -> SubmitOutcome {
        self.count += 1;

        let outcome = if self.count > 1 {
            SubmitOutcome::ValidationError {
                errors: vec![SubmitFieldError::MultipleSubmits { count: self.count }],
                original_outputs: outputs,
            }
        } else if let Some(signature) = signature {
            let errors = validate_submit_outputs(signature, &outputs);
            if errors.is_empty() {
                SubmitOutcome::Success { outputs }
            } else {
                SubmitOutcome::ValidationError {
                    errors,
                    original_outputs: outputs,
                }
            }
        } else {
            SubmitOutcome::ValidationError {
                errors: vec![SubmitFieldError::NoSignatureRegistered],
                original_outputs: outputs,
            }
        };

        self.outcome = Some(outcome.clone());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn string_field(name: &str) -> OutputFieldSpec {
        OutputFieldSpec {
            name: name.to_string(),
            field_type: FieldType::String,
            required: true,
        }
    }

    #[test]
    fn submit_without_signature_errors() {
        let mut state = SubmitState::default();
        let outcome = state.submit(None, json!({"answer": "x"}));
        assert!(matches!(
            outcome,
            SubmitOutcome::ValidationError { errors, .. }
                if matches!(errors.as_slice(), [SubmitFieldError::NoSignatureRegistered])
        ));
    }

    #[test]
    fn submit_type_mismatch_reports_field_and_preview() {
        let signature = OutputSignature {
            output_fields: vec![string_field("answer")],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({"answer": 42}));
        match outcome {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert_eq!(errors.len(), 1);
                assert!(matches!(&errors[0], SubmitFieldError::TypeMismatch { field, got, .. }
                    if field == "answer" && got == "integer"));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn submit_missing_required_field() {
        let signature = OutputSignature {
            output_fields: vec![string_field("answer")],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({}));
        match outcome {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert!(matches!(&errors[0], SubmitFieldError::MissingField { field, .. } if field == "answer"));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn submit_twice_reports_multiple_submits() {
        let signature = OutputSignature {
            output_fields: vec![string_field("answer")],
        };
        let mut state = SubmitState::default();
        let _ = state.submit(Some(&signature), json!({"answer": "a"}));
        let second = state.submit(Some(&signature), json!({"answer": "b"}));
        match second {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert!(matches!(&errors[0], SubmitFieldError::MultipleSubmits { count: 2 }));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn submit_valid_outputs_succeeds() {
        let signature = OutputSignature {
            output_fields: vec![string_field("answer")],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({"answer": "ok"}));
        assert!(matches!(outcome, SubmitOutcome::Success { .. }));
    }

    #[test]
    fn nested_object_field_validates_recursively() {
        let signature = OutputSignature {
            output_fields: vec![OutputFieldSpec {
                name: "result".to_string(),
                field_type: FieldType::Object {
                    value: vec![string_field("label")],
                },
                required: true,
            }],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({"result": {"label": 1}}));
        match outcome {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert!(matches!(&errors[0], SubmitFieldError::TypeMismatch { field, .. } if field == "result.label"));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn enum_field_rejects_value_outside_allowed_set() {
        let signature = OutputSignature {
            output_fields: vec![OutputFieldSpec {
                name: "status".to_string(),
                field_type: FieldType::Enum {
                    value: vec!["ok".to_string(), "fail".to_string()],
                },
                required: true,
            }],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({"status": "maybe"}));
        match outcome {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert!(matches!(&errors[0], SubmitFieldError::EnumInvalid { .. }));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }

    #[test]
    fn list_field_validates_each_element() {
        let signature = OutputSignature {
            output_fields: vec![OutputFieldSpec {
                name: "tags".to_string(),
                field_type: FieldType::List {
                    value: Box::new(FieldType::String),
                },
                required: true,
            }],
        };
        let mut state = SubmitState::default();
        let outcome = state.submit(Some(&signature), json!({"tags": ["a", 2]}));
        match outcome {
            SubmitOutcome::ValidationError { errors, .. } => {
                assert!(matches!(&errors[0], SubmitFieldError::TypeMismatch { field, .. } if field == "tags[1]"));
            }
            SubmitOutcome::Success { .. } => panic!("expected validation error"),
        }
    }
}
