//! Server configuration (C9).
//!
//! Mirrors the original's handful of environment-driven knobs
//! (`RLM_REPL_LOG_LEVEL`, `RLM_REPL_DEFAULT_TIMEOUT_MS`) with a small builder,
//! following the same `from_env`/builder shape the teacher crate's agent
//! configuration uses.

use std::env;

/// Default advisory timeout applied to `execute` when a request omits one.
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Runtime configuration for the REPL server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Advisory per-script timeout; see spec's Open Questions (timeout is
    /// not currently enforced in-process, only echoed back to the host).
    pub default_timeout_ms: u64,
    /// `tracing-subscriber` filter directive, e.g. `"info"` or `"debug"`.
    pub log_level: String,
}

impl ServerConfig {
    /// Builds a configuration from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_level: "info".to_string(),
        }
    }

    /// Overrides the advisory timeout.
    #[must_use]
    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Overrides the log level.
    #[must_use]
    pub fn with_log_level(mut self, log_level: impl Into<String>) -> Self {
        self.log_level = log_level.into();
        self
    }

    /// Builds a configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(raw) = env::var("RLM_REPL_DEFAULT_TIMEOUT_MS") {
            if let Ok(timeout_ms) = raw.parse() {
                config.default_timeout_ms = timeout_ms;
            }
        }
        if let Ok(log_level) = env::var("RLM_REPL_LOG_LEVEL") {
            config.log_level = log_level;
        }
        config
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::new();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn builder_overrides_apply() {
        let config = ServerConfig::new().with_default_timeout_ms(5_000).with_log_level("debug");
        assert_eq!(config.default_timeout_ms, 5_000);
        assert_eq!(config.log_level, "debug");
    }
}
