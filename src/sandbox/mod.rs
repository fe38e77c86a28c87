//! Sandbox evaluator (C4): compiles and runs scripts in a curated Rhai
//! engine, wiring together the restricted-compiler guards (C3), the helper
//! library (C2), the deferred registry (C1), and SUBMIT validation.

pub mod submit;
pub mod value;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rhai::{Dynamic, Engine, EvalAltResult, Position, Scope};
use serde_json::Value;

use crate::deferred::{DeferredRegistry, ProbeError};
use crate::error::SandboxError;
use crate::guards::{guard_iter, guard_iter_unpack, guard_write};
use crate::helpers;
use crate::modules::allowed_module_resolver;
use submit::{OutputSignature, SubmitOutcome, SubmitState};

/// Non-underscore helper/infra names hidden from `list_variables`, matching
/// the original's `skip` set.
const INFRASTRUCTURE_NAMES: &[&str] = &[
    "peek",
    "search",
    "find_relevant",
    "summarize",
    "llm",
    "llm_batch",
    "llm_query_batched",
    "map_reduce",
    "verify_claim",
    "audit_reasoning",
    "count_tokens",
    "truncate",
    "extract_code_blocks",
    "SUBMIT",
];

/// Control-flow marker thrown via `EvalAltResult::ErrorRuntime` when a
/// script probes a pending [`crate::deferred::DeferredOperation`].
#[derive(Debug, Clone)]
struct PendingMarker(String);

/// Control-flow marker thrown via `EvalAltResult::ErrorRuntime` by `SUBMIT`.
/// Carries no payload; the outcome itself lives in [`SubmitState`], which
/// the session consults when it catches this marker.
#[derive(Debug, Clone)]
struct SubmitMarker;

/// A script-visible handle onto a live [`crate::deferred::DeferredOperation`].
///
/// Holds only an id and a shared handle on the registry so it always
/// reflects the operation's current state, even if the script received the
/// handle before the host resolved it.
#[derive(Clone)]
struct ScriptDeferred {
    id: String,
    registry: Rc<RefCell<DeferredRegistry>>,
}

impl ScriptDeferred {
    fn current(&self) -> crate::deferred::DeferredOperation {
        self.registry
            .borrow()
            .get(&self.id)
            .cloned()
            .unwrap_or_else(|| crate::deferred::DeferredOperation::missing(self.id.clone()))
    }
}

fn pending_error(id: String) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(PendingMarker(id)), Position::NONE))
}

fn script_deferred_get(this: &mut ScriptDeferred) -> Result<Dynamic, Box<EvalAltResult>> {
    match this.current().get() {
        Ok(value) => value::json_to_dynamic(&value).map_err(|e| e.to_string().into()),
        Err(ProbeError::Pending(sig)) => Err(pending_error(sig.0)),
        Err(ProbeError::Failed(err)) => Err(err.to_string().into()),
    }
}

fn script_deferred_truthy(this: &mut ScriptDeferred) -> Result<bool, Box<EvalAltResult>> {
    this.current().truthy().map_err(|sig| pending_error(sig.0))
}

fn script_deferred_length(this: &mut ScriptDeferred) -> Result<i64, Box<EvalAltResult>> {
    this.current()
        .len()
        .map(|n| n as i64)
        .map_err(|sig| pending_error(sig.0))
}

/// Backs `op[index]` / `op["key"]`. Subscript reads route through
/// [`crate::guards::guard_item`] (applied inside [`value::guarded_index`]),
/// and reading a not-yet-settled operation routes through [`guard_iter`]
/// first, the same pending-raises rule `.get()` already enforces.
fn script_deferred_index_get(this: &mut ScriptDeferred, index: Dynamic) -> Result<Dynamic, Box<EvalAltResult>> {
    let op = this.current();
    guard_iter(&op).map_err(|sig| pending_error(sig.0))?;
    let value = op.get().map_err(|e| match e {
        ProbeError::Pending(sig) => pending_error(sig.0),
        ProbeError::Failed(err) => err.to_string().into(),
    })?;
    let item = value::guarded_index(&value, &index).map_err(|e| e.to_string().into())?;
    value::json_to_dynamic(&item).map_err(|e| e.to_string().into())
}

/// Backs `op.items()`: iteration over a resolved operation's value, routed
/// through [`guard_iter`] the way `_getiter_` mediates iteration in the
/// original.
fn script_deferred_items(this: &mut ScriptDeferred) -> Result<rhai::Array, Box<EvalAltResult>> {
    let op = this.current();
    guard_iter(&op).map_err(|sig| pending_error(sig.0))?;
    let value = op.get().map_err(|e| match e {
        ProbeError::Pending(sig) => pending_error(sig.0),
        ProbeError::Failed(err) => err.to_string().into(),
    })?;
    value::json_iterable_to_array(&value).map_err(|e| e.to_string().into())
}

/// Backs `op.unpack()`: the explicit accessor standing in for Rhai's lack of
/// Python-style iterable-unpacking syntax, routed through
/// [`guard_iter_unpack`].
fn script_deferred_unpack(this: &mut ScriptDeferred) -> Result<rhai::Array, Box<EvalAltResult>> {
    let op = this.current();
    guard_iter_unpack(&op).map_err(|sig| pending_error(sig.0))?;
    let value = op.get().map_err(|e| match e {
        ProbeError::Pending(sig) => pending_error(sig.0),
        ProbeError::Failed(err) => err.to_string().into(),
    })?;
    value::json_iterable_to_array(&value).map_err(|e| e.to_string().into())
}

fn script_deferred_to_string(this: &mut ScriptDeferred) -> String {
    let op = this.current();
    if op.is_resolved() {
        op.result.map_or_else(String::new, |v| v.to_string())
    } else {
        format!("<Deferred:{}>", &op.id[..op.id.len().min(8)])
    }
}

/// Outcome of a single [`SandboxSession::execute`] call, already shaped for
/// translation into an `ExecuteResponse`.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    /// Whether the script completed without error or a pending trap.
    pub success: bool,
    /// The last expression's value, serialized to JSON.
    pub result: Option<Value>,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Human-readable error message.
    pub error: Option<String>,
    /// Taxonomy error kind.
    pub error_type: Option<String>,
    /// Every currently pending operation id (not just the one that blocked).
    pub pending_operations: Vec<String>,
    /// SUBMIT outcome, if the script called `SUBMIT`.
    pub submit_result: Option<SubmitOutcome>,
}

/// A sandboxed scripting session: one curated Rhai engine plus the
/// persistent namespace (`Scope`), the deferred registry, and SUBMIT state.
pub struct SandboxSession {
    engine: Engine,
    scope: Scope<'static>,
    registry: Rc<RefCell<DeferredRegistry>>,
    signature: Rc<RefCell<Option<OutputSignature>>>,
    submit_state: Rc<RefCell<SubmitState>>,
    stdout_buf: Rc<RefCell<String>>,
    stderr_buf: Rc<RefCell<String>>,
}

impl SandboxSession {
    /// Builds a fresh session: new engine, empty namespace, empty registry,
    /// no signature registered.
    #[must_use]
    pub fn new() -> Self {
        let registry = Rc::new(RefCell::new(DeferredRegistry::new()));
        let signature = Rc::new(RefCell::new(None));
        let submit_state = Rc::new(RefCell::new(SubmitState::default()));
        let stdout_buf = Rc::new(RefCell::new(String::new()));
        let stderr_buf = Rc::new(RefCell::new(String::new()));

        let mut engine = Engine::new();
        engine.set_module_resolver(allowed_module_resolver());
        engine.disable_symbol("eval");

        {
            let out = Rc::clone(&stdout_buf);
            engine.on_print(move |text| {
                let mut buf = out.borrow_mut();
                buf.push_str(text);
                buf.push('\n');
            });
        }
        {
            let err = Rc::clone(&stderr_buf);
            engine.on_debug(move |text, _source, _pos| {
                let mut buf = err.borrow_mut();
                buf.push_str(text);
                buf.push('\n');
            });
        }

        engine.register_type_with_name::<ScriptDeferred>("DeferredOperation");
        engine.register_fn("get", script_deferred_get);
        engine.register_fn("truthy", script_deferred_truthy);
        engine.register_fn("length", script_deferred_length);
        engine.register_fn("is_pending", |this: &mut ScriptDeferred| this.current().is_pending());
        engine.register_fn("is_resolved", |this: &mut ScriptDeferred| this.current().is_resolved());
        engine.register_fn("is_failed", |this: &mut ScriptDeferred| this.current().is_failed());
        engine.register_fn("to_string", script_deferred_to_string);
        engine.register_indexer_get_result(script_deferred_index_get);
        engine.register_fn("items", script_deferred_items);
        engine.register_fn("unpack", script_deferred_unpack);

        engine.register_fn("count_tokens", |text: &str| helpers::count_tokens(text) as i64);
        engine.register_fn("truncate", |text: &str, max_tokens: i64| {
            helpers::truncate(text, max_tokens.max(0) as usize)
        });
        engine.register_fn("extract_code_blocks", |text: &str| -> Dynamic {
            let blocks = helpers::extract_code_blocks(text);
            let value = Value::Array(blocks.into_iter().map(Value::Object).collect());
            value::json_to_dynamic(&value).unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("peek", |data: Dynamic, start: i64, end: i64| -> Dynamic {
            let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
            let end = if end < 0 { None } else { Some(end as usize) };
            Dynamic::from(helpers::peek(&json, start.max(0) as usize, end))
        });

        Self::register_search(&mut engine);
        Self::register_async_helpers(&mut engine, &registry);
        Self::register_submit(&mut engine, &signature, &submit_state);

        Self {
            engine,
            scope: Scope::new(),
            registry,
            signature,
            submit_state,
            stdout_buf,
            stderr_buf,
        }
    }

    fn register_search(engine: &mut Engine) {
        engine.register_fn(
            "search",
            |data: Dynamic, pattern: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
                let matches = helpers::search(&json, pattern, helpers::SearchOptions::default())
                    .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
                let value = serde_json::to_value(matches).unwrap_or(Value::Array(vec![]));
                value::json_to_dynamic(&value).map_err(|e| e.to_string().into())
            },
        );
    }

    fn register_async_helpers(engine: &mut Engine, registry: &Rc<RefCell<DeferredRegistry>>) {
        let wrap = |id: String, registry: Rc<RefCell<DeferredRegistry>>| ScriptDeferred { id, registry };

        let reg = Rc::clone(registry);
        engine.register_fn("llm", move |prompt: &str| -> ScriptDeferred {
            let op = helpers::llm(&mut reg.borrow_mut(), prompt, None, None, 1024, 0.0);
            wrap(op.id, Rc::clone(&reg))
        });

        let reg = Rc::clone(registry);
        engine.register_fn("llm", move |prompt: &str, context: &str| -> ScriptDeferred {
            let op = helpers::llm(&mut reg.borrow_mut(), prompt, Some(context), None, 1024, 0.0);
            wrap(op.id, Rc::clone(&reg))
        });

        let reg = Rc::clone(registry);
        engine.register_fn("summarize", move |data: Dynamic| -> ScriptDeferred {
            let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
            let op = helpers::summarize(&mut reg.borrow_mut(), &json, 500, None);
            wrap(op.id, Rc::clone(&reg))
        });

        let reg = Rc::clone(registry);
        engine.register_fn(
            "summarize",
            move |data: Dynamic, max_tokens: i64| -> ScriptDeferred {
                let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
                let op = helpers::summarize(&mut reg.borrow_mut(), &json, max_tokens.max(0) as u32, None);
                wrap(op.id, Rc::clone(&reg))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "find_relevant",
            move |data: Dynamic, query: &str| -> ScriptDeferred {
                let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
                let op = helpers::find_relevant(&mut reg.borrow_mut(), &json, query, 5);
                wrap(op.id, Rc::clone(&reg))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "find_relevant",
            move |data: Dynamic, query: &str, top_k: i64| -> ScriptDeferred {
                let json = value::dynamic_to_json(&data).unwrap_or(Value::Null);
                let op = helpers::find_relevant(&mut reg.borrow_mut(), &json, query, top_k.max(0) as u32);
                wrap(op.id, Rc::clone(&reg))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "llm_batch",
            move |prompts: rhai::Array| -> Result<ScriptDeferred, Box<EvalAltResult>> {
                let prompts: Vec<String> = prompts.into_iter().map(|d| d.to_string()).collect();
                let op = helpers::llm_batch(&mut reg.borrow_mut(), &prompts, None, 5, None, 1024)
                    .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
                Ok(wrap(op.id, Rc::clone(&reg)))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "llm_query_batched",
            move |prompts: rhai::Array| -> Result<ScriptDeferred, Box<EvalAltResult>> {
                let prompts: Vec<String> = prompts.into_iter().map(|d| d.to_string()).collect();
                let op = helpers::llm_query_batched(&mut reg.borrow_mut(), &prompts, None, 5, None, 1024)
                    .map_err(|e| -> Box<EvalAltResult> { e.into() })?;
                Ok(wrap(op.id, Rc::clone(&reg)))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "map_reduce",
            move |data: rhai::Array, map_prompt: &str, reduce_prompt: &str| -> ScriptDeferred {
                let items: Vec<Value> = data
                    .iter()
                    .map(|d| value::dynamic_to_json(d).unwrap_or(Value::Null))
                    .collect();
                let op = helpers::map_reduce(&mut reg.borrow_mut(), &items, map_prompt, reduce_prompt, 10);
                wrap(op.id, Rc::clone(&reg))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn(
            "verify_claim",
            move |claim: &str, evidence: &str| -> ScriptDeferred {
                let op = helpers::verify_claim(&mut reg.borrow_mut(), claim, evidence, 0.95);
                wrap(op.id, Rc::clone(&reg))
            },
        );

        let reg = Rc::clone(registry);
        engine.register_fn("audit_reasoning", move |steps: rhai::Array| -> ScriptDeferred {
            let steps: Vec<String> = steps.into_iter().map(|d| d.to_string()).collect();
            let op = helpers::audit_reasoning(&mut reg.borrow_mut(), &steps, None);
            wrap(op.id, Rc::clone(&reg))
        });
    }

    fn register_submit(
        engine: &mut Engine,
        signature: &Rc<RefCell<Option<OutputSignature>>>,
        submit_state: &Rc<RefCell<SubmitState>>,
    ) {
        let signature = Rc::clone(signature);
        let submit_state = Rc::clone(submit_state);
        engine.register_fn(
            "SUBMIT",
            move |outputs: Dynamic| -> Result<(), Box<EvalAltResult>> {
                let json = value::dynamic_to_json(&outputs).unwrap_or(Value::Null);
                submit_state.borrow_mut().submit(signature.borrow().as_ref(), json);
                Err(Box::new(EvalAltResult::ErrorRuntime(Dynamic::from(SubmitMarker), Position::NONE)))
            },
        );
    }

    /// Installs (or replaces) the signature `SUBMIT` validates against.
    ///
    /// Returns whether a previously-registered signature was replaced.
    pub fn set_signature(&self, signature: OutputSignature) -> bool {
        let mut slot = self.signature.borrow_mut();
        let replaced = slot.is_some();
        *slot = Some(signature);
        replaced
    }

    /// Clears any registered signature.
    ///
    /// Returns whether a signature had actually been registered.
    pub fn clear_signature(&self) -> bool {
        let mut slot = self.signature.borrow_mut();
        let had_one = slot.is_some();
        *slot = None;
        had_one
    }

    /// True if a SUBMIT signature is currently registered.
    #[must_use]
    pub fn signature_registered(&self) -> bool {
        self.signature.borrow().is_some()
    }

    /// Compiles `code` without evaluating it.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Compilation`] if the script does not parse.
    pub fn compile_check(&self, code: &str) -> Result<(), SandboxError> {
        self.engine
            .compile(code)
            .map(|_| ())
            .map_err(|err| SandboxError::Compilation(err.to_string()))
    }

    /// Executes `code` against the persistent session namespace.
    pub fn execute(&mut self, code: &str, capture_output: bool) -> ExecuteOutcome {
        self.submit_state.borrow_mut().reset();
        self.stdout_buf.borrow_mut().clear();
        self.stderr_buf.borrow_mut().clear();

        let ast = match self.engine.compile(code) {
            Ok(ast) => ast,
            Err(err) => return self.finish_error(SandboxError::Compilation(err.to_string())),
        };

        let eval_result = self.engine.eval_ast_with_scope::<Dynamic>(&mut self.scope, &ast);

        if !capture_output {
            self.stdout_buf.borrow_mut().clear();
            self.stderr_buf.borrow_mut().clear();
        }

        match eval_result {
            Ok(value) => {
                let result = if value.is_unit() {
                    None
                } else {
                    value::dynamic_to_json(&value).ok()
                };
                self.finish_success(result)
            }
            Err(err) => self.classify_error(*err),
        }
    }

    fn classify_error(&mut self, err: EvalAltResult) -> ExecuteOutcome {
        if let EvalAltResult::ErrorRuntime(dyn_val, _) = &err {
            if let Some(PendingMarker(id)) = dyn_val.clone().try_cast::<PendingMarker>() {
                return self.finish_pending(id);
            }
            if dyn_val.clone().try_cast::<SubmitMarker>().is_some() {
                return self.finish_success(None);
            }
        }
        if let EvalAltResult::ErrorModuleNotFound(name, _) = &err {
            return self.finish_error(SandboxError::Violation(format!("Import of '{name}' is not allowed")));
        }
        self.finish_error(SandboxError::Execution {
            type_name: rhai_error_type_name(&err),
            message: err.to_string(),
        })
    }

    fn finish_success(&mut self, result: Option<Value>) -> ExecuteOutcome {
        ExecuteOutcome {
            success: true,
            result,
            stdout: self.stdout_buf.borrow().clone(),
            stderr: self.stderr_buf.borrow().clone(),
            error: None,
            error_type: None,
            pending_operations: self.registry.borrow().pending_ids(),
            submit_result: self.submit_state.borrow_mut().take_outcome(),
        }
    }

    fn finish_pending(&mut self, operation_id: String) -> ExecuteOutcome {
        ExecuteOutcome {
            success: false,
            result: None,
            stdout: String::new(),
            stderr: String::new(),
            error: Some(format!("Pending operation: {operation_id}")),
            error_type: Some("PendingOperationError".to_string()),
            pending_operations: self.registry.borrow().pending_ids(),
            submit_result: None,
        }
    }

    fn finish_error(&mut self, err: SandboxError) -> ExecuteOutcome {
        ExecuteOutcome {
            success: false,
            result: None,
            stdout: String::new(),
            stderr: if matches!(err, SandboxError::Execution { .. }) {
                self.stderr_buf.borrow().clone()
            } else {
                String::new()
            },
            error_type: Some(err.type_name().to_string()),
            error: Some(err.to_string()),
            pending_operations: self.registry.borrow().pending_ids(),
            submit_result: None,
        }
    }

    /// Binds a variable in the session namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Violation`] for a reserved name.
    pub fn set_variable(&mut self, name: &str, value: &Value) -> Result<(), SandboxError> {
        guard_write(name)?;
        let dynamic = value::json_to_dynamic(value)?;
        self.scope.set_or_push(name, dynamic);
        Ok(())
    }

    /// Reads a variable from the session namespace.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Execution`] with an `AttributeError`-style
    /// message if the name is unbound.
    pub fn get_variable(&self, name: &str) -> Result<Value, SandboxError> {
        self.scope
            .get_value::<Dynamic>(name)
            .ok_or_else(|| SandboxError::Execution {
                type_name: "KeyError".to_string(),
                message: format!("Variable '{name}' not found"),
            })
            .and_then(|d| value::dynamic_to_json(&d))
    }

    /// Lists user-visible variables, omitting infrastructure bindings and
    /// anything starting with `_`.
    #[must_use]
    pub fn list_variables(&self) -> HashMap<String, String> {
        self.scope
            .iter()
            .filter(|(name, _, _)| !name.starts_with('_') && !INFRASTRUCTURE_NAMES.contains(name))
            .map(|(name, _, value)| (name.to_string(), rhai_type_label(&value)))
            .collect()
    }

    /// Number of pending deferred operations right now.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.borrow().pending_ids().len()
    }

    /// Access to the shared deferred registry, for RPC handlers that
    /// resolve/fail/enumerate operations directly.
    #[must_use]
    pub fn registry(&self) -> Rc<RefCell<DeferredRegistry>> {
        Rc::clone(&self.registry)
    }
}

impl Default for SandboxSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps a Rhai runtime error onto the curated exception-kind vocabulary the
/// original sandbox exposes.
fn rhai_error_type_name(err: &EvalAltResult) -> String {
    match err {
        EvalAltResult::ErrorVariableNotFound(..) => "NameError",
        EvalAltResult::ErrorIndexingType(..) | EvalAltResult::ErrorArrayBounds(..) => "IndexError",
        EvalAltResult::ErrorDotExpr(..) | EvalAltResult::ErrorPropertyNotFound(..) => "AttributeError",
        EvalAltResult::ErrorMismatchDataType(..) => "TypeError",
        EvalAltResult::ErrorArithmetic(..) => "ArithmeticError",
        EvalAltResult::ErrorFunctionNotFound(..) => "NameError",
        _ => "RuntimeError",
    }
    .to_string()
}

/// Normalized type label for `list_variables`, matching the original's
/// `type(value).__name__` convention as closely as Rhai's type system allows.
fn rhai_type_label(value: &Dynamic) -> String {
    match value.type_name() {
        "i64" | "i32" => "int".to_string(),
        "f64" | "f32" => "float".to_string(),
        "string" | "ImmutableString" => "str".to_string(),
        "bool" => "bool".to_string(),
        "array" => "list".to_string(),
        "map" => "dict".to_string(),
        "DeferredOperation" => "DeferredOperation".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use submit::OutputFieldSpec;

    #[test]
    fn simple_arithmetic_sets_result_and_variable() {
        let mut session = SandboxSession::new();
        let outcome = session.execute("x = 1 + 1;", true);
        assert!(outcome.success);
        assert_eq!(session.get_variable("x").unwrap(), Value::from(2));
    }

    #[test]
    fn disallowed_import_reports_sandbox_error() {
        let mut session = SandboxSession::new();
        let outcome = session.execute(r#"import "os" as os;"#, true);
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("SandboxError"));
        assert!(outcome.error.unwrap().contains("not allowed"));
    }

    #[test]
    fn allowed_import_succeeds() {
        let mut session = SandboxSession::new();
        let outcome = session.execute(r#"import "math" as math; x = math::sqrt(4.0);"#, true);
        assert!(outcome.success, "{:?}", outcome.error);
    }

    #[test]
    fn pending_llm_call_then_probe_raises_pending() {
        let mut session = SandboxSession::new();
        let first = session.execute("op = llm(\"hello\");", true);
        assert!(first.success);
        assert_eq!(first.pending_operations.len(), 1);

        let second = session.execute("x = op.get();", true);
        assert!(!second.success);
        assert_eq!(second.error_type.as_deref(), Some("PendingOperationError"));
        assert!(!second.pending_operations.is_empty());
    }

    #[test]
    fn submit_without_signature_records_validation_error() {
        let mut session = SandboxSession::new();
        let outcome = session.execute(r#"SUBMIT(#{answer: "x"});"#, true);
        assert!(outcome.success);
        match outcome.submit_result {
            Some(SubmitOutcome::ValidationError { .. }) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn submit_with_matching_signature_succeeds() {
        let mut session = SandboxSession::new();
        session.set_signature(OutputSignature {
            output_fields: vec![OutputFieldSpec {
                name: "answer".to_string(),
                field_type: submit::FieldType::String,
                required: true,
            }],
        });
        let outcome = session.execute(r#"SUBMIT(#{answer: "42"});"#, true);
        assert!(outcome.success);
        assert!(matches!(outcome.submit_result, Some(SubmitOutcome::Success { .. })));
    }

    #[test]
    fn set_variable_rejects_underscore_names() {
        let mut session = SandboxSession::new();
        assert!(session.set_variable("_hidden", &Value::from(1)).is_err());
        assert!(session.set_variable("visible", &Value::from(1)).is_ok());
    }

    #[test]
    fn indexing_a_pending_operation_raises_pending() {
        let mut session = SandboxSession::new();
        let first = session.execute("op = llm(\"hello\");", true);
        assert!(first.success);

        let second = session.execute("x = op[0];", true);
        assert!(!second.success);
        assert_eq!(second.error_type.as_deref(), Some("PendingOperationError"));
    }

    #[test]
    fn indexing_a_resolved_list_operation_reads_element() {
        let mut session = SandboxSession::new();
        session.execute("op = llm(\"hello\");", true);
        let pending_id = session.registry().borrow().pending_ids()[0].clone();
        session
            .registry()
            .borrow_mut()
            .resolve(&pending_id, serde_json::json!(["a", "b", "c"]))
            .unwrap();

        let outcome = session.execute("x = op[1];", true);
        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(session.get_variable("x").unwrap(), Value::from("b"));
    }

    #[test]
    fn items_on_pending_operation_raises_pending() {
        let mut session = SandboxSession::new();
        session.execute("op = llm(\"hello\");", true);
        let outcome = session.execute("x = op.items();", true);
        assert!(!outcome.success);
        assert_eq!(outcome.error_type.as_deref(), Some("PendingOperationError"));
    }

    #[test]
    fn unpack_on_resolved_operation_returns_array() {
        let mut session = SandboxSession::new();
        session.execute("op = llm(\"hello\");", true);
        let pending_id = session.registry().borrow().pending_ids()[0].clone();
        session
            .registry()
            .borrow_mut()
            .resolve(&pending_id, serde_json::json!([1, 2]))
            .unwrap();

        let outcome = session.execute("x = op.unpack();", true);
        assert!(outcome.success, "{:?}", outcome.error);
    }

    #[test]
    fn list_variables_omits_helpers_and_underscore_names() {
        let mut session = SandboxSession::new();
        session.set_variable("visible", &Value::from(1)).unwrap();
        let vars = session.list_variables();
        assert!(vars.contains_key("visible"));
        assert!(!vars.contains_key("llm"));
    }
}
