//! Command-line argument parsing (C10).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// rlm-repl: sandboxed REPL service for recursive LLM workflows.
///
/// Speaks line-delimited JSON-RPC 2.0 over stdin/stdout. Run `serve` to start
/// the long-lived service a host process drives; run `check` to compile a
/// script once without starting the RPC loop, for quick local iteration.
#[derive(Parser, Debug)]
#[command(name = "rlm-repl")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, env = "RLM_REPL_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the JSON-RPC server loop on stdin/stdout.
    Serve,

    /// Compile (and optionally run) a script file without starting the
    /// server loop, for local sanity checks.
    Check {
        /// Path to the script file.
        file: PathBuf,

        /// Actually evaluate the script instead of only compiling it.
        #[arg(long)]
        run: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
