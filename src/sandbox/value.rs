//! JSON ⇄ Rhai `Dynamic` conversion with guard enforcement at the boundary.
//!
//! Rhai's object model has no Python-style attribute/dunder surface, so
//! [`crate::guards::guard_attr`] cannot intercept ordinary field access
//! inside a running script. The mediation point that exists is the JSON
//! boundary: whenever a host-supplied payload (`set_variable`,
//! `resolve_operation`) is converted into script-visible values, every
//! object key passes through [`crate::guards::guard_attr`] first.

use rhai::Dynamic;
use serde_json::Value;

use crate::error::SandboxError;
use crate::guards::{guard_attr, guard_item};

fn validate_keys(value: &Value) -> Result<(), SandboxError> {
    match value {
        Value::Object(map) => {
            for (key, inner) in map {
                guard_attr(key)?;
                validate_keys(inner)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_keys(item)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Converts a JSON value into a script-visible [`Dynamic`], rejecting any
/// object key that [`guard_attr`] would reject.
///
/// # Errors
///
/// Returns [`SandboxError::Violation`] for a disallowed key, or
/// [`SandboxError::Execution`] if the value cannot be represented in Rhai.
pub fn json_to_dynamic(value: &Value) -> Result<Dynamic, SandboxError> {
    validate_keys(value)?;
    rhai::serde::to_dynamic(value).map_err(|err| SandboxError::Execution {
        type_name: "ValueError".to_string(),
        message: err.to_string(),
    })
}

/// Converts a script-visible [`Dynamic`] back into JSON.
///
/// # Errors
///
/// Returns [`SandboxError::Execution`] if the value cannot be represented in
/// JSON (e.g. it still holds a native Rust type with no serde mapping).
pub fn dynamic_to_json(value: &Dynamic) -> Result<Value, SandboxError> {
    rhai::serde::from_dynamic(value).map_err(|err| SandboxError::Execution {
        type_name: "ValueError".to_string(),
        message: err.to_string(),
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

fn normalize_index(idx: i64, len: usize) -> Option<usize> {
    let idx = if idx < 0 { idx + len as i64 } else { idx };
    if idx < 0 || idx as usize >= len { None } else { Some(idx as usize) }
}

/// Indexes into a resolved JSON value the way the original's
/// `_guarded_getitem` does: lists, dicts, and strings support subscript
/// reads, negative indices count from the end the way Python's do, anything
/// else is rejected as not subscriptable.
///
/// # Errors
///
/// Returns [`SandboxError::Execution`] (`TypeError`) if `value` has no index
/// semantics or `key` is the wrong kind, and (`IndexError`/`KeyError`) if the
/// key is out of range or absent.
pub fn guarded_index(value: &Value, key: &Dynamic) -> Result<Value, SandboxError> {
    guard_item(
        matches!(value, Value::Array(_) | Value::Object(_) | Value::String(_)),
        json_type_name(value),
    )?;
    match value {
        Value::Array(items) => {
            let idx = key.as_int().map_err(|_| SandboxError::Execution {
                type_name: "TypeError".to_string(),
                message: "list indices must be integers".to_string(),
            })?;
            let idx = normalize_index(idx, items.len()).ok_or_else(|| SandboxError::Execution {
                type_name: "IndexError".to_string(),
                message: "list index out of range".to_string(),
            })?;
            Ok(items[idx].clone())
        }
        Value::Object(map) => {
            let key_str = key.clone().into_string().map_err(|_| SandboxError::Execution {
                type_name: "TypeError".to_string(),
                message: "dict keys must be strings".to_string(),
            })?;
            map.get(&key_str).cloned().ok_or_else(|| SandboxError::Execution {
                type_name: "KeyError".to_string(),
                message: format!("'{key_str}'"),
            })
        }
        Value::String(s) => {
            let idx = key.as_int().map_err(|_| SandboxError::Execution {
                type_name: "TypeError".to_string(),
                message: "string indices must be integers".to_string(),
            })?;
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(idx, chars.len()).ok_or_else(|| SandboxError::Execution {
                type_name: "IndexError".to_string(),
                message: "string index out of range".to_string(),
            })?;
            Ok(Value::String(chars[idx].to_string()))
        }
        _ => unreachable!("guard_item already rejected non-subscriptable values"),
    }
}

/// Converts a resolved JSON value into a Rhai array for iteration/unpacking,
/// mirroring Python's iteration protocol: lists yield their elements, dicts
/// yield their keys, strings yield one-character strings.
///
/// # Errors
///
/// Returns [`SandboxError::Execution`] (`TypeError`) for a value with no
/// iteration semantics.
pub fn json_iterable_to_array(value: &Value) -> Result<rhai::Array, SandboxError> {
    match value {
        Value::Array(items) => items.iter().map(json_to_dynamic).collect(),
        Value::Object(map) => Ok(map.keys().map(|k| Dynamic::from(k.clone())).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Dynamic::from(c.to_string())).collect()),
        other => Err(SandboxError::Execution {
            type_name: "TypeError".to_string(),
            message: format!("'{}' object is not iterable", json_type_name(other)),
        }),
    }
}
