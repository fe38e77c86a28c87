//! Restricted-compiler policy: attribute/import/write allow-lists (C3).
//!
//! Rhai's `Dynamic` has no reflection into Rust internals, so several of the
//! Python sandbox's escape vectors (type-object escape, frame/code-object
//! escape) simply have no reachable surface here. The guards below cover the
//! mediation points that still exist: which dotted names a script may read,
//! which modules it may import, and which top-level variable names a host
//! (or script) may write into the session namespace.

use std::collections::HashSet;
use std::sync::LazyLock;

use crate::deferred::{DeferredOperation, PendingSignal};
use crate::error::SandboxError;

/// Dunder attribute names that remain readable despite the leading-underscore
/// rule, mirroring the original sandbox's `allowed_dunders` set.
pub static ALLOWED_DUNDERS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "__len__",
        "__iter__",
        "__next__",
        "__getitem__",
        "__contains__",
        "__str__",
        "__repr__",
        "__bool__",
        "__eq__",
        "__ne__",
        "__lt__",
        "__le__",
        "__gt__",
        "__ge__",
        "__hash__",
        "__add__",
        "__sub__",
        "__mul__",
        "__truediv__",
        "__floordiv__",
        "__mod__",
        "__pow__",
        "__neg__",
        "__pos__",
        "__abs__",
        "__class__",
        "__name__",
        "__doc__",
    ]
    .into_iter()
    .collect()
});

/// Modules a script is allowed to `import`, mirroring the original
/// `_guarded_import`'s `allowed_modules` set.
pub static ALLOWED_IMPORTS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "math",
        "re",
        "json",
        "collections",
        "itertools",
        "functools",
        "operator",
        "string",
        "textwrap",
        "datetime",
        "decimal",
        "fractions",
        "statistics",
        "random",
        "copy",
        "pprint",
        "dataclasses",
        "typing",
        "enum",
        "abc",
    ]
    .into_iter()
    .collect()
});

/// Rejects access to a leading-underscore attribute unless it is one of the
/// [`ALLOWED_DUNDERS`].
///
/// # Errors
///
/// Returns [`SandboxError::Violation`] if `name` starts with `_` and is not
/// allow-listed.
pub fn guard_attr(name: &str) -> Result<(), SandboxError> {
    if name.starts_with('_') && !ALLOWED_DUNDERS.contains(name) {
        return Err(SandboxError::Violation(format!(
            "Access to '{name}' is not allowed"
        )));
    }
    Ok(())
}

/// Rejects an import unless the module name is allow-listed.
///
/// # Errors
///
/// Returns [`SandboxError::Violation`] if `name` is not in [`ALLOWED_IMPORTS`].
pub fn guard_import(name: &str) -> Result<(), SandboxError> {
    if !ALLOWED_IMPORTS.contains(name) {
        return Err(SandboxError::Violation(format!(
            "Import of '{name}' is not allowed"
        )));
    }
    Ok(())
}

/// Rejects writes to reserved or leading-underscore top-level names.
///
/// A verbatim port of the original's `set_variable` guard: `_` itself is
/// allowed (the "last expression result" slot), everything else starting
/// with `_` is not.
///
/// # Errors
///
/// Returns [`SandboxError::Violation`] if `name` is reserved.
pub fn guard_write(name: &str) -> Result<(), SandboxError> {
    if name.starts_with('_') && name != "_" {
        return Err(SandboxError::Violation(format!(
            "Cannot set variable with name '{name}'"
        )));
    }
    Ok(())
}

/// Rejects subscript access (`obj[key]`) on a value with no index semantics.
///
/// Mirrors the original's `_guarded_getitem`: lists, dicts, and strings are
/// subscriptable and pass straight through; anything else raises the same
/// `TypeError` the original raises for a non-subscriptable object. Unlike
/// `guard_attr`, this is a permissive type check rather than an allow-list —
/// the original has no restrictive policy here either, it just validates
/// that `obj[key]` is a meaningful operation before performing it.
///
/// # Errors
///
/// Returns [`SandboxError::Execution`] with a `TypeError` label if
/// `subscriptable` is `false`.
pub fn guard_item(subscriptable: bool, type_name: &str) -> Result<(), SandboxError> {
    if subscriptable {
        Ok(())
    } else {
        Err(SandboxError::Execution {
            type_name: "TypeError".to_string(),
            message: format!("'{type_name}' object is not subscriptable"),
        })
    }
}

/// Rejects iteration over a deferred operation that has not settled.
///
/// In the original, `_getiter_` is wired directly to RestrictedPython's own
/// `default_guarded_getiter` with no project-specific policy; the one place
/// this crate's iteration actually needs mediating is the same
/// not-resolved-raises-pending rule [`DeferredOperation::truthy`] and
/// [`DeferredOperation::len`] already enforce, extended to iteration.
///
/// # Errors
///
/// Returns [`PendingSignal`] unless `op` is resolved.
pub fn guard_iter(op: &DeferredOperation) -> Result<(), PendingSignal> {
    if op.is_resolved() {
        Ok(())
    } else {
        Err(PendingSignal(op.id.clone()))
    }
}

/// Rejects iterable unpacking of a deferred operation that has not settled.
///
/// The original wires `_iter_unpack_sequence_` to RestrictedPython's
/// `guarded_iter_unpack_sequence`, again with no custom policy beyond what
/// `_getiter_` already enforces. Rhai has no destructuring-assignment syntax
/// distinct from the iterator protocol, so this enforces the same rule as
/// [`guard_iter`] at the one call site that backs both.
///
/// # Errors
///
/// Returns [`PendingSignal`] unless `op` is resolved.
pub fn guard_iter_unpack(op: &DeferredOperation) -> Result<(), PendingSignal> {
    guard_iter(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::deferred::{DeferredRegistry, OperationKind};

    #[test]
    fn guard_attr_allows_plain_names() {
        assert!(guard_attr("value").is_ok());
    }

    #[test]
    fn guard_attr_allows_listed_dunder() {
        assert!(guard_attr("__len__").is_ok());
    }

    #[test]
    fn guard_attr_blocks_unlisted_dunder() {
        assert!(guard_attr("__globals__").is_err());
    }

    #[test]
    fn guard_attr_blocks_single_underscore_prefix() {
        assert!(guard_attr("_private").is_err());
    }

    #[test]
    fn guard_import_allows_listed_module() {
        assert!(guard_import("math").is_ok());
    }

    #[test]
    fn guard_import_blocks_unlisted_module() {
        let err = guard_import("os").unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn guard_write_allows_underscore_result_slot() {
        assert!(guard_write("_").is_ok());
    }

    #[test]
    fn guard_write_blocks_other_underscore_names() {
        assert!(guard_write("_hidden").is_err());
    }

    #[test]
    fn guard_item_allows_subscriptable_type() {
        assert!(guard_item(true, "list").is_ok());
    }

    #[test]
    fn guard_item_blocks_non_subscriptable_type() {
        let err = guard_item(false, "int").unwrap_err();
        assert!(err.to_string().contains("not subscriptable"));
    }

    #[test]
    fn guard_iter_blocks_pending_operation() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, HashMap::new());
        assert!(guard_iter(&op).is_err());
    }

    #[test]
    fn guard_iter_allows_resolved_operation() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, HashMap::new());
        registry.resolve(&op.id, serde_json::Value::Null).unwrap();
        let resolved = registry.get(&op.id).unwrap();
        assert!(guard_iter(resolved).is_ok());
    }

    #[test]
    fn guard_iter_unpack_blocks_pending_operation() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, HashMap::new());
        assert!(guard_iter_unpack(&op).is_err());
    }
}
