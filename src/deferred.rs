//! Deferred operations for async LLM calls (C1).
//!
//! The sandbox runs synchronously, but the calls it makes into the helper
//! library (`llm`, `summarize`, `map_reduce`, ...) are inherently async: they
//! are serviced by the host process, not by this crate. A [`DeferredOperation`]
//! is the placeholder a helper returns immediately; probing its value before
//! the host resolves it raises [`PendingSignal`], which unwinds script
//! evaluation back to the server loop rather than surfacing as an ordinary
//! script error.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kinds of deferred operations the helper library can mint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// A single LLM completion request.
    LlmCall,
    /// A batch of LLM completion requests.
    LlmBatch,
    /// A summarization request.
    Summarize,
    /// An embedding request.
    Embed,
    /// A map-reduce style fan-out/fan-in request.
    MapReduce,
}

/// Lifecycle state of a [`DeferredOperation`].
///
/// Transitions are monotonic: `Pending -> Resolved` or `Pending -> Failed`.
/// Neither terminal state can transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Awaiting resolution by the host.
    Pending,
    /// Resolved with a result value.
    Resolved,
    /// Failed with an error message.
    Failed,
}

/// Raised when code accesses a deferred operation that has not yet settled.
///
/// This is a control-flow signal, not a reportable script error: the sandbox
/// evaluator catches it, serializes the set of newly-pending operations, and
/// returns them to the host so execution can resume once they are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSignal(pub String);

impl fmt::Display for PendingSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation {} is still pending", self.0)
    }
}

/// Raised by [`DeferredOperation::get`] when the operation failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredOperationError(pub String);

impl fmt::Display for DeferredOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error raised by `get`/`bool`/`len`/`iter` probes on a [`DeferredOperation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The operation has not settled yet.
    Pending(PendingSignal),
    /// The operation settled in the failed state.
    Failed(DeferredOperationError),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending(p) => write!(f, "{p}"),
            Self::Failed(e) => write!(f, "{e}"),
        }
    }
}

/// A placeholder for an async operation result.
///
/// Mirrors the Python original's `DeferredOperation` dataclass, including a
/// deliberate quirk preserved from that implementation: `bool`/`len`/`iter`
/// treat *any* non-resolved state (pending **or** failed) as "still
/// pending" and raise [`PendingSignal`], while [`DeferredOperation::get`]
/// correctly distinguishes pending from failed. Callers that want the
/// failure surfaced must call `get()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredOperation {
    /// Opaque, host-visible identity.
    pub id: String,
    /// What kind of operation this placeholder stands in for.
    pub operation_type: OperationKind,
    /// Parameters the helper was called with, echoed back to the host.
    pub params: HashMap<String, Value>,
    /// Current lifecycle state.
    pub state: OperationState,
    /// The resolved value, once `state == Resolved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The failure message, once `state == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeferredOperation {
    fn new(id: String, operation_type: OperationKind, params: HashMap<String, Value>) -> Self {
        Self {
            id,
            operation_type,
            params,
            state: OperationState::Pending,
            result: None,
            error: None,
        }
    }

    /// A synthetic failed operation used when a live id can no longer be
    /// found in the registry (e.g. after `clear_resolved`). Lets callers
    /// holding a stale handle fail gracefully instead of panicking.
    pub(crate) fn missing(id: String) -> Self {
        Self {
            id: id.clone(),
            operation_type: OperationKind::LlmCall,
            params: HashMap::new(),
            state: OperationState::Failed,
            result: None,
            error: Some(format!("operation {id} no longer exists")),
        }
    }

    /// True while the operation awaits resolution.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == OperationState::Pending
    }

    /// True once the operation has a result.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.state == OperationState::Resolved
    }

    /// True once the operation has failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.state == OperationState::Failed
    }

    /// Resolves the operation with a result.
    ///
    /// # Panics
    ///
    /// Panics if the operation is not pending; the registry is the only
    /// caller and it already checks state before calling this.
    pub(crate) fn resolve(&mut self, result: Value) {
        assert!(
            self.state == OperationState::Pending,
            "cannot resolve operation in state {:?}",
            self.state
        );
        self.result = Some(result);
        self.state = OperationState::Resolved;
    }

    /// Marks the operation as failed.
    ///
    /// # Panics
    ///
    /// Panics if the operation is not pending; see [`Self::resolve`].
    pub(crate) fn fail(&mut self, error: String) {
        assert!(
            self.state == OperationState::Pending,
            "cannot fail operation in state {:?}",
            self.state
        );
        self.error = Some(error);
        self.state = OperationState::Failed;
    }

    /// Returns the resolved value, or an error describing why it is not
    /// available yet.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError::Pending`] while the operation is pending, and
    /// [`ProbeError::Failed`] if it has failed.
    pub fn get(&self) -> Result<Value, ProbeError> {
        match self.state {
            OperationState::Pending => Err(ProbeError::Pending(PendingSignal(self.id.clone()))),
            OperationState::Failed => Err(ProbeError::Failed(DeferredOperationError(
                self.error.clone().unwrap_or_else(|| "operation failed".to_string()),
            ))),
            OperationState::Resolved => Ok(self.result.clone().unwrap_or(Value::Null)),
        }
    }

    /// Boolean coercion. Raises [`PendingSignal`] whenever the operation is
    /// not resolved, including when it has failed — a verbatim port of the
    /// original's `__bool__`.
    ///
    /// # Errors
    ///
    /// Returns [`PendingSignal`] unless the operation is resolved.
    pub fn truthy(&self) -> Result<bool, PendingSignal> {
        if self.is_resolved() {
            Ok(self.result.as_ref().is_some_and(json_truthy))
        } else {
            Err(PendingSignal(self.id.clone()))
        }
    }

    /// Length probe, following the same not-resolved-raises-pending rule as
    /// [`Self::truthy`].
    ///
    /// # Errors
    ///
    /// Returns [`PendingSignal`] unless the operation is resolved, or the
    /// resolved value has no well-defined length.
    pub fn len(&self) -> Result<usize, PendingSignal> {
        if self.is_resolved() {
            Ok(match self.result.as_ref() {
                Some(Value::String(s)) => s.chars().count(),
                Some(Value::Array(a)) => a.len(),
                Some(Value::Object(o)) => o.len(),
                _ => 0,
            })
        } else {
            Err(PendingSignal(self.id.clone()))
        }
    }
}

/// Truthiness of a resolved JSON value, matching Python's `bool()` on the
/// equivalent types.
fn json_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Registry for tracking deferred operations created during a session.
///
/// Mirrors `DeferredRegistry` from the original: insertion order is
/// preserved for deterministic `pending_operations` listings, and an
/// append-only list of creation callbacks is notified as each operation is
/// minted.
#[derive(Default)]
pub struct DeferredRegistry {
    order: Vec<String>,
    operations: HashMap<String, DeferredOperation>,
    next_id: u64,
    on_created: Vec<Box<dyn Fn(&DeferredOperation)>>,
}

impl fmt::Debug for DeferredRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredRegistry")
            .field("order", &self.order)
            .field("operations", &self.operations)
            .field("next_id", &self.next_id)
            .field("on_created", &format_args!("{} callback(s)", self.on_created.len()))
            .finish()
    }
}

impl DeferredRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked with every operation as soon as it is
    /// created, before `create` returns it to its caller.
    ///
    /// Mirrors `DeferredRegistry.on_created` from the original: callbacks
    /// accumulate in an append-only list and every registered callback runs
    /// on every subsequent `create` call, in registration order.
    pub fn on_created(&mut self, callback: impl Fn(&DeferredOperation) + 'static) {
        self.on_created.push(Box::new(callback));
    }

    /// Creates a new deferred operation, invokes every registered
    /// creation-callback with it, and returns it.
    pub fn create(
        &mut self,
        operation_type: OperationKind,
        params: HashMap<String, Value>,
    ) -> DeferredOperation {
        let id = format!("op-{}-{}", self.next_id, uuid::Uuid::new_v4());
        self.next_id += 1;
        let op = DeferredOperation::new(id.clone(), operation_type, params);
        self.order.push(id.clone());
        self.operations.insert(id, op.clone());
        for callback in &self.on_created {
            callback(&op);
        }
        op
    }

    /// Looks up an operation by id.
    #[must_use]
    pub fn get(&self, operation_id: &str) -> Option<&DeferredOperation> {
        self.operations.get(operation_id)
    }

    /// Resolves an operation with a result.
    ///
    /// # Errors
    ///
    /// Returns an error message if the id is unknown.
    pub fn resolve(&mut self, operation_id: &str, result: Value) -> Result<(), String> {
        let op = self
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| format!("unknown operation: {operation_id}"))?;
        op.resolve(result);
        Ok(())
    }

    /// Marks an operation as failed.
    ///
    /// # Errors
    ///
    /// Returns an error message if the id is unknown.
    pub fn fail(&mut self, operation_id: &str, error: String) -> Result<(), String> {
        let op = self
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| format!("unknown operation: {operation_id}"))?;
        op.fail(error);
        Ok(())
    }

    /// IDs of all pending operations, in creation order.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.operations.get(*id).is_some_and(DeferredOperation::is_pending))
            .cloned()
            .collect()
    }

    /// All pending operations, in creation order.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<DeferredOperation> {
        self.order
            .iter()
            .filter_map(|id| self.operations.get(id))
            .filter(|op| op.is_pending())
            .cloned()
            .collect()
    }

    /// Removes resolved and failed operations, returning the count removed.
    pub fn clear_resolved(&mut self) -> usize {
        let to_remove: Vec<String> = self
            .order
            .iter()
            .filter(|id| self.operations.get(*id).is_some_and(|op| !op.is_pending()))
            .cloned()
            .collect();
        for id in &to_remove {
            self.operations.remove(id);
        }
        self.order.retain(|id| self.operations.contains_key(id));
        to_remove.len()
    }

    /// Number of operations tracked (pending, resolved, and failed).
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// True if no operations are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashMap<String, Value> {
        HashMap::new()
    }

    #[test]
    fn new_operation_is_pending() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, params());
        assert!(op.is_pending());
        assert!(matches!(op.get(), Err(ProbeError::Pending(_))));
    }

    #[test]
    fn resolve_then_get_returns_value() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, params());
        registry.resolve(&op.id, Value::String("hi".into())).unwrap();
        let resolved = registry.get(&op.id).unwrap();
        assert!(resolved.is_resolved());
        assert_eq!(resolved.get().unwrap(), Value::String("hi".into()));
    }

    #[test]
    fn fail_then_get_returns_failed_error() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, params());
        registry.fail(&op.id, "boom".to_string()).unwrap();
        let failed = registry.get(&op.id).unwrap();
        match failed.get() {
            Err(ProbeError::Failed(DeferredOperationError(msg))) => assert_eq!(msg, "boom"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn failed_bool_probe_still_raises_pending_signal() {
        // Deliberate port of the original's quirk: bool()/len()/iter() raise
        // PendingSignal for any non-resolved state, including Failed.
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, params());
        registry.fail(&op.id, "boom".to_string()).unwrap();
        let failed = registry.get(&op.id).unwrap().clone();
        assert!(matches!(failed.truthy(), Err(PendingSignal(_))));
        assert!(matches!(failed.len(), Err(PendingSignal(_))));
    }

    #[test]
    fn resolve_twice_panics() {
        let mut registry = DeferredRegistry::new();
        let op = registry.create(OperationKind::LlmCall, params());
        registry.resolve(&op.id, Value::Null).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut again = registry.get(&op.id).unwrap().clone();
            again.resolve(Value::Null);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn pending_ids_preserve_creation_order() {
        let mut registry = DeferredRegistry::new();
        let a = registry.create(OperationKind::LlmCall, params());
        let b = registry.create(OperationKind::Summarize, params());
        registry.resolve(&a.id, Value::Null).unwrap();
        let pending = registry.pending_ids();
        assert_eq!(pending, vec![b.id.clone()]);
    }

    #[test]
    fn clear_resolved_removes_settled_operations() {
        let mut registry = DeferredRegistry::new();
        let a = registry.create(OperationKind::LlmCall, params());
        let b = registry.create(OperationKind::Summarize, params());
        registry.resolve(&a.id, Value::Null).unwrap();
        registry.fail(&b.id, "x".to_string()).unwrap();
        let removed = registry.clear_resolved();
        assert_eq!(removed, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_operation_resolve_errors() {
        let mut registry = DeferredRegistry::new();
        assert!(registry.resolve("missing", Value::Null).is_err());
    }

    #[test]
    fn on_created_callback_runs_for_every_new_operation() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut registry = DeferredRegistry::new();
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        registry.on_created(move |op| seen_clone.borrow_mut().push(op.id.clone()));

        let a = registry.create(OperationKind::LlmCall, params());
        let b = registry.create(OperationKind::Summarize, params());

        assert_eq!(*seen.borrow(), vec![a.id.clone(), b.id.clone()]);
    }

    #[test]
    fn multiple_on_created_callbacks_all_run() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let mut registry = DeferredRegistry::new();
        let count = Rc::new(RefCell::new(0));
        let first = Rc::clone(&count);
        registry.on_created(move |_| *first.borrow_mut() += 1);
        let second = Rc::clone(&count);
        registry.on_created(move |_| *second.borrow_mut() += 1);

        registry.create(OperationKind::LlmCall, params());

        assert_eq!(*count.borrow(), 2);
    }
}
