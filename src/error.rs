//! Error taxonomy for the REPL service.
//!
//! Two families exist, matching the protocol's split between transport-level
//! failures and script-level failures: [`ServerError`] covers everything that
//! prevents a request from being handled at all (and maps onto a JSON-RPC
//! [`crate::rpc::protocol::ErrorCode`]); [`SandboxError`] covers failures
//! produced *while* a script ran and is reported inside a successful
//! JSON-RPC response with `success: false`.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that abort request handling before or after script execution.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The request body was not valid JSON-RPC.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Human-readable description of what was malformed.
        message: String,
    },

    /// The named method has no handler.
    #[error("method not found: {method}")]
    MethodNotFound {
        /// The unrecognized method name.
        method: String,
    },

    /// Parameters were present but did not match the method's expected shape.
    #[error("invalid params for {method}: {message}")]
    InvalidParams {
        /// The method whose parameters failed to parse.
        method: String,
        /// Human-readable description of the mismatch.
        message: String,
    },

    /// The referenced session id is unknown.
    #[error("unknown session: {session_id}")]
    UnknownSession {
        /// The session id that was not found.
        session_id: String,
    },

    /// The referenced variable is unknown.
    #[error("unknown variable: {name}")]
    UnknownVariable {
        /// The variable name that was not found.
        name: String,
    },

    /// The referenced deferred operation is unknown.
    #[error("unknown operation: {operation_id}")]
    UnknownOperation {
        /// The operation id that was not found.
        operation_id: String,
    },

    /// A value could not be serialized across the JSON boundary.
    #[error("serialization failure: {message}")]
    Serialization {
        /// Human-readable description of the failure.
        message: String,
    },

    /// Any other internal failure that does not fit a more specific variant.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable description of the failure.
        message: String,
    },
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Errors produced while a sandboxed script runs.
///
/// These never escape as JSON-RPC errors; the server catches them and
/// reports them in the `result` field of a response with `success: false`.
#[derive(Debug, Error, Clone)]
pub enum SandboxError {
    /// The script failed to parse/compile.
    #[error("compilation error: {0}")]
    Compilation(String),

    /// A guard rejected an attribute, subscript, write, import, or iteration.
    #[error("{0}")]
    Violation(String),

    /// The script raised during evaluation (after compiling successfully).
    #[error("{type_name}: {message}")]
    Execution {
        /// The curated exception kind the script raised or triggered.
        type_name: String,
        /// Human-readable message.
        message: String,
    },
}

impl SandboxError {
    /// The `error_type` reported in an `ExecuteResponse`, mirroring the
    /// original REPL's exception class names (`CompilationError`,
    /// `SandboxError`, or the curated exception kind a script raised).
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Compilation(_) => "CompilationError",
            Self::Violation(_) => "SandboxError",
            Self::Execution { type_name, .. } => type_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_error_type_names() {
        assert_eq!(SandboxError::Compilation("x".into()).type_name(), "CompilationError");
        assert_eq!(
            SandboxError::Violation("not allowed".into()).type_name(),
            "SandboxError"
        );
        let exec = SandboxError::Execution {
            type_name: "ValueError".to_string(),
            message: "bad".to_string(),
        };
        assert_eq!(exec.type_name(), "ValueError");
    }

    #[test]
    fn server_error_from_serde_json() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let server_err: ServerError = err.into();
        assert!(matches!(server_err, ServerError::Serialization { .. }));
    }
}
