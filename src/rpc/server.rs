//! JSON-RPC dispatch loop over stdin/stdout (C5).
//!
//! One line in, one line out: each line of input is a single JSON-RPC
//! request or notification; each response is written as a single line to
//! stdout. Protocol-level failures (bad JSON, unknown method, malformed
//! params) become a JSON-RPC `error`; script-level failures are reported
//! inside a successful `result` with `success: false`.

use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};

use crate::config::ServerConfig;
use crate::deferred::OperationState;
use crate::sandbox::SandboxSession;
use crate::sandbox::submit::OutputSignature;

use super::protocol::{
    ErrorCode, ExecuteRequest, ExecuteResponse, GetVariableRequest, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, PendingOperationView, RegisterSignatureRequest, ResolveOperationRequest,
    SetVariableRequest, StatusResponse, VariablesResponse,
};

/// Drives one REPL session over a pair of line-oriented streams.
pub struct ReplServer {
    session: SandboxSession,
    config: ServerConfig,
    shutdown: Arc<AtomicBool>,
}

impl ReplServer {
    /// Builds a server around a fresh sandbox session.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            session: SandboxSession::new(),
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Installs a SIGTERM/SIGINT handler that flips the shutdown flag,
    /// mirroring the original's `signal.signal(SIGTERM, ...)` handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be registered.
    pub fn install_signal_handler(&self) -> Result<(), std::io::Error> {
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&self.shutdown))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&self.shutdown))?;
        Ok(())
    }

    /// Runs the dispatch loop until stdin closes, `shutdown` is called, or a
    /// signal flips the shutdown flag.
    ///
    /// # Errors
    ///
    /// Returns an error if writing a response to `output` fails.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> std::io::Result<()> {
        self.write_notification(&mut output, "ready", json!({"version": env!("CARGO_PKG_VERSION")}))?;

        for line in input.lines() {
            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response = self.handle_line(trimmed);
            if let Some(response) = response {
                let text = serde_json::to_string(&response).unwrap_or_else(|err| {
                    serde_json::to_string(&JsonRpcResponse::failure(
                        JsonRpcError::internal_error(err.to_string(), "SerializationError", ""),
                        response.id.clone(),
                    ))
                    .unwrap_or_default()
                });
                writeln!(output, "{text}")?;
                output.flush()?;
            }

            if self.shutdown.load(Ordering::Relaxed) {
                break;
            }
        }
        Ok(())
    }

    fn write_notification<W: Write>(&self, output: &mut W, method: &str, params: Value) -> std::io::Result<()> {
        let notification = json!({"jsonrpc": "2.0", "method": method, "params": params});
        writeln!(output, "{notification}")?;
        output.flush()
    }

    fn handle_line(&mut self, line: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                return Some(JsonRpcResponse::failure(JsonRpcError::parse_error(err.to_string()), None));
            }
        };

        if let Some(Value::Array(_)) = &request.params {
            let error = JsonRpcError::invalid_params("params must be an object, not an array");
            return if request.is_notification() {
                None
            } else {
                Some(JsonRpcResponse::failure(error, request.id.clone()))
            };
        }

        let id = request.id.clone();
        let is_notification = request.is_notification();
        let outcome = self.dispatch(&request);

        if is_notification {
            return None;
        }
        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(result, id),
            Err(error) => JsonRpcResponse::failure(error, id),
        })
    }

    fn dispatch(&mut self, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
        let params = request.params.clone().unwrap_or(Value::Null);
        match request.method.as_str() {
            "execute" => self.handle_execute(params),
            "get_variable" => self.handle_get_variable(params),
            "set_variable" => self.handle_set_variable(params),
            "resolve_operation" => self.handle_resolve_operation(params),
            "pending_operations" => Ok(self.handle_pending_operations()),
            "list_variables" => Ok(self.handle_list_variables()),
            "status" => Ok(self.handle_status()),
            "reset" => Ok(self.handle_reset()),
            "register_signature" => self.handle_register_signature(params),
            "clear_signature" => Ok(self.handle_clear_signature()),
            "shutdown" => Ok(self.handle_shutdown()),
            other => Err(JsonRpcError::method_not_found(other)),
        }
    }

    fn parse_params<T: serde::de::DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, JsonRpcError> {
        serde_json::from_value(params)
            .map_err(|err| JsonRpcError::invalid_params(format!("{method}: {err}")))
    }

    fn handle_execute(&mut self, params: Value) -> Result<Value, JsonRpcError> {
        let req: ExecuteRequest = self.parse_params("execute", params)?;
        let started = Instant::now();
        let outcome = self.session.execute(&req.code, req.capture_output);
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let submit_result = outcome.submit_result.map(|outcome| {
            serde_json::to_value(outcome).unwrap_or(Value::Null)
        });

        let response = ExecuteResponse {
            success: outcome.success,
            result: outcome.result,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
            error: outcome.error,
            error_type: outcome.error_type,
            execution_time_ms,
            pending_operations: outcome.pending_operations,
            submit_result,
        };
        serde_json::to_value(response).map_err(|err| JsonRpcError::internal_error(err.to_string(), "SerializationError", ""))
    }

    fn handle_get_variable(&mut self, params: Value) -> Result<Value, JsonRpcError> {
        let req: GetVariableRequest = self.parse_params("get_variable", params)?;
        self.session
            .get_variable(&req.name)
            .map_err(|err| JsonRpcError::new(ErrorCode::ExecutionError, err.to_string()))
    }

    fn handle_set_variable(&mut self, params: Value) -> Result<Value, JsonRpcError> {
        let req: SetVariableRequest = self.parse_params("set_variable", params)?;
        self.session
            .set_variable(&req.name, &req.value)
            .map(|()| json!({"success": true}))
            .map_err(|err| JsonRpcError::new(ErrorCode::SandboxViolation, err.to_string()))
    }

    fn handle_resolve_operation(&mut self, params: Value) -> Result<Value, JsonRpcError> {
        let req: ResolveOperationRequest = self.parse_params("resolve_operation", params)?;
        let registry = self.session.registry();
        let mut registry = registry.borrow_mut();

        let outcome = if let Some(error) = req.error {
            registry.fail(&req.operation_id, error)
        } else {
            registry.resolve(&req.operation_id, req.result.unwrap_or(Value::Null))
        };

        outcome
            .map(|()| json!({"success": true}))
            .map_err(|err| JsonRpcError::invalid_params(err))
    }

    fn handle_pending_operations(&mut self) -> Value {
        let registry = self.session.registry();
        let views: Vec<PendingOperationView> = registry
            .borrow()
            .pending_operations()
            .into_iter()
            .filter(|op| op.state == OperationState::Pending)
            .map(|op| PendingOperationView {
                id: op.id,
                operation_type: op.operation_type,
                params: op.params,
            })
            .collect();
        serde_json::to_value(views).unwrap_or(Value::Array(vec![]))
    }

    fn handle_list_variables(&mut self) -> Value {
        let response = VariablesResponse {
            variables: self.session.list_variables().into_iter().collect(),
        };
        serde_json::to_value(response).unwrap_or(Value::Null)
    }

    fn handle_status(&mut self) -> Value {
        let response = StatusResponse {
            ready: true,
            pending_operations: self.session.pending_count(),
            variables_count: self.session.list_variables().len(),
            signature_registered: self.session.signature_registered(),
            memory_usage_bytes: None,
        };
        serde_json::to_value(response).unwrap_or(Value::Null)
    }

    fn handle_reset(&mut self) -> Value {
        self.session = SandboxSession::new();
        json!({"success": true})
    }

    fn handle_register_signature(&mut self, params: Value) -> Result<Value, JsonRpcError> {
        let req: RegisterSignatureRequest = self.parse_params("register_signature", params)?;
        let signature = OutputSignature {
            output_fields: req.output_fields,
        };
        let replaced = self.session.set_signature(signature);
        Ok(json!({"success": true, "signature_registered": true, "replaced": replaced}))
    }

    fn handle_clear_signature(&mut self) -> Value {
        let cleared = self.session.clear_signature();
        json!({"success": true, "cleared": cleared})
    }

    fn handle_shutdown(&mut self) -> Value {
        self.shutdown.store(true, Ordering::Relaxed);
        json!({"success": true})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn run_lines(input: &str) -> Vec<Value> {
        let mut server = ReplServer::new(ServerConfig::new());
        let mut output = Vec::new();
        server.run(Cursor::new(input.as_bytes()), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn startup_emits_ready_notification() {
        let messages = run_lines("");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "ready");
        assert_eq!(messages[0]["params"]["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn execute_request_round_trips() {
        let messages = run_lines(r#"{"jsonrpc":"2.0","method":"execute","params":{"code":"x = 1 + 1"},"id":1}"#);
        let response = &messages[1];
        assert_eq!(response["result"]["success"], true);
    }

    #[test]
    fn unknown_method_reports_method_not_found() {
        let messages = run_lines(r#"{"jsonrpc":"2.0","method":"bogus","id":1}"#);
        let response = &messages[1];
        assert_eq!(response["error"]["code"], ErrorCode::MethodNotFound as i32);
    }

    #[test]
    fn list_shaped_params_are_rejected() {
        let messages = run_lines(r#"{"jsonrpc":"2.0","method":"status","params":[1,2],"id":1}"#);
        let response = &messages[1];
        assert_eq!(response["error"]["code"], ErrorCode::InvalidParams as i32);
    }

    #[test]
    fn notification_produces_no_response() {
        let messages = run_lines(r#"{"jsonrpc":"2.0","method":"status"}"#);
        assert_eq!(messages.len(), 1, "only the ready notification should be emitted");
    }

    #[test]
    fn shutdown_stops_the_loop() {
        let messages = run_lines(
            "{\"jsonrpc\":\"2.0\",\"method\":\"shutdown\",\"id\":1}\n{\"jsonrpc\":\"2.0\",\"method\":\"status\",\"id\":2}\n",
        );
        // ready + shutdown response only; the status line after shutdown is never reached
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn import_violation_reports_sandbox_error_type() {
        let messages =
            run_lines(r#"{"jsonrpc":"2.0","method":"execute","params":{"code":"import \"os\" as os;"},"id":1}"#);
        let response = &messages[1];
        assert_eq!(response["result"]["success"], false);
        assert_eq!(response["result"]["error_type"], "SandboxError");
    }
}
