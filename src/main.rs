//! Entry point: parses CLI arguments, initializes logging, and either runs
//! the JSON-RPC server loop or compiles/runs a single script file.

use std::io;

use clap::Parser;
use rlm_repl::cli::{Cli, Commands};
use rlm_repl::{ReplServer, SandboxSession, ServerConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Commands::Serve => {
            let config = ServerConfig::from_env().with_log_level(cli.log_level);
            let mut server = ReplServer::new(config);
            server.install_signal_handler()?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            server.run(stdin.lock(), stdout.lock())?;
        }
        Commands::Check { file, run } => {
            let code = std::fs::read_to_string(&file)?;
            let mut session = SandboxSession::new();
            if run {
                let outcome = session.execute(&code, true);
                if outcome.success {
                    tracing::info!(result = ?outcome.result, "script evaluated successfully");
                } else {
                    tracing::error!(error = ?outcome.error, error_type = ?outcome.error_type, "script failed");
                    std::process::exit(1);
                }
            } else if let Err(err) = session.compile_check(&code) {
                tracing::error!(error = %err, "compilation failed");
                std::process::exit(1);
            } else {
                tracing::info!("script compiles");
            }
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
