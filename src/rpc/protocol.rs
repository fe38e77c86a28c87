//! JSON-RPC 2.0 wire types for the REPL service (C6).
//!
//! Every request/response type is `#[serde(default)]`-tolerant of missing
//! optional fields and ignores unknown fields by default (serde's normal
//! behavior), matching spec: "Unknown fields are accepted and ignored;
//! required-field violations produce an `invalid_params` error."

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sandbox::submit::OutputFieldSpec;

/// Fixed JSON-RPC error code taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    /// Malformed JSON on the wire.
    ParseError = -32700,
    /// Well-formed JSON that is not a valid JSON-RPC envelope.
    InvalidRequest = -32600,
    /// No handler for the requested method.
    MethodNotFound = -32601,
    /// Parameters present but did not match the method's expected shape.
    InvalidParams = -32602,
    /// Any other internal failure.
    InternalError = -32603,
    /// A script raised outside the taxonomy's more specific categories.
    ExecutionError = -32000,
    /// Reserved for a future in-process timeout enforcer; advisory only today.
    TimeoutError = -32001,
    /// A guard rejected an attribute/subscript/import/write.
    SandboxViolation = -32002,
    /// A host-enforced resource limit was exceeded.
    ResourceLimit = -32003,
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Numeric error code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Builds an error with the given code and message, with no extra data.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    /// `-32700 parse error`.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    /// `-32600 invalid request`.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// `-32601 method not found`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }

    /// `-32602 invalid params`.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    /// `-32603 internal error`, with the originating error's debug text and
    /// a traceback-shaped `data` field for parity with the original's
    /// `{"type": ..., "traceback": ...}` shape.
    #[must_use]
    pub fn internal_error(message: impl Into<String>, type_name: &str, traceback: &str) -> Self {
        Self {
            code: ErrorCode::InternalError as i32,
            message: message.into(),
            data: Some(serde_json::json!({"type": type_name, "traceback": traceback})),
        }
    }
}

/// A JSON-RPC 2.0 request, parsed from one line of input.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version, always `"2.0"`.
    #[serde(default = "default_jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Parameters. The schema permits a list, but every handler assumes
    /// object shape; [`crate::rpc::server`] rejects list-shaped params with
    /// `invalid_params` rather than silently degrading.
    #[serde(default)]
    pub params: Option<Value>,
    /// Request id. Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
}

fn default_jsonrpc_version() -> String {
    "2.0".to_string()
}

impl JsonRpcRequest {
    /// True when this request has no id and therefore expects no reply.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `"2.0"`.
    pub jsonrpc: String,
    /// Successful result payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error payload; mutually exclusive with `result`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Echoed request id.
    pub id: Option<Value>,
}

impl JsonRpcResponse {
    /// Builds a successful response.
    #[must_use]
    pub fn success(result: Value, request_id: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id: request_id,
        }
    }

    /// Builds a failure response.
    #[must_use]
    pub fn failure(error: JsonRpcError, request_id: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id: request_id,
        }
    }
}

/// `execute` request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    /// Script source.
    pub code: String,
    /// Advisory execution budget; see spec §9 Open Questions.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Whether to capture stdout/stderr.
    #[serde(default = "default_true")]
    pub capture_output: bool,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

const fn default_true() -> bool {
    true
}

/// `execute` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    /// Whether the script ran to completion without error or pending trap.
    pub success: bool,
    /// The last expression's value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Captured stdout.
    #[serde(default)]
    pub stdout: String,
    /// Captured stderr.
    #[serde(default)]
    pub stderr: String,
    /// Human-readable error message, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The taxonomy kind of the error, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Wall-clock execution time.
    #[serde(default)]
    pub execution_time_ms: f64,
    /// IDs of every currently pending operation, not just the one that
    /// blocked this call.
    #[serde(default)]
    pub pending_operations: Vec<String>,
    /// SUBMIT outcome, when the script called `SUBMIT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_result: Option<Value>,
}

/// `get_variable` request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct GetVariableRequest {
    /// Variable name to look up.
    pub name: String,
}

/// `set_variable` request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct SetVariableRequest {
    /// Variable name to bind.
    pub name: String,
    /// Value to bind it to.
    pub value: Value,
}

/// `resolve_operation` request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolveOperationRequest {
    /// The operation being resolved.
    pub operation_id: String,
    /// The resolved value. Exactly one of `result`/`error` should be
    /// supplied; supplying `error` fails the operation instead.
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure message, when resolving as a failure instead of a success.
    #[serde(default)]
    pub error: Option<String>,
}

/// `register_signature` request parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterSignatureRequest {
    /// Output field specifications SUBMIT will validate against.
    pub output_fields: Vec<OutputFieldSpec>,
    /// Optional label for diagnostics.
    #[serde(default)]
    pub signature_name: Option<String>,
}

/// `list_variables` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct VariablesResponse {
    /// Variable name to normalized type label.
    pub variables: std::collections::BTreeMap<String, String>,
}

/// `status` response payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always true once the server has started.
    pub ready: bool,
    /// Number of currently pending deferred operations.
    pub pending_operations: usize,
    /// Number of user-visible variables in the session namespace.
    pub variables_count: usize,
    /// Whether a SUBMIT signature is currently registered.
    pub signature_registered: bool,
    /// Process memory usage, when the host platform exposes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_bytes: Option<u64>,
}

/// A pending operation's public shape for `pending_operations()`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingOperationView {
    /// Operation id.
    pub id: String,
    /// Operation kind.
    pub operation_type: crate::deferred::OperationKind,
    /// Parameters captured at creation.
    pub params: std::collections::HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"shutdown"}"#).unwrap();
        assert!(req.is_notification());
    }

    #[test]
    fn request_with_id_is_not_notification() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"status","id":1}"#).unwrap();
        assert!(!req.is_notification());
    }

    #[test]
    fn success_response_omits_error_field() {
        let resp = JsonRpcResponse::success(serde_json::json!({"ok": true}), Some(Value::from(1)));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn execute_request_defaults() {
        let req: ExecuteRequest = serde_json::from_str(r#"{"code":"x = 1"}"#).unwrap();
        assert_eq!(req.timeout_ms, 30_000);
        assert!(req.capture_output);
    }
}
