//! Sandboxed code-execution REPL service for recursive LLM workflows.
//!
//! A host process drives one long-lived session over line-delimited
//! JSON-RPC on stdin/stdout ([`rpc`]). Each `execute` call runs untrusted
//! script code inside a restricted scripting engine ([`sandbox`]) that
//! exposes a curated helper library ([`helpers`]) for search, summarization,
//! and LLM calls. Those LLM-backed calls are serviced asynchronously by the
//! host: a script receives a [`deferred::DeferredOperation`] placeholder
//! immediately and the session surfaces it as pending until the host
//! resolves it. A typed output signature ([`sandbox::submit`]) lets a script
//! hand back a validated result via `SUBMIT`.

pub mod cli;
pub mod config;
pub mod deferred;
pub mod error;
pub mod guards;
pub mod helpers;
pub mod modules;
pub mod rpc;
pub mod sandbox;

pub use config::ServerConfig;
pub use rpc::ReplServer;
pub use sandbox::SandboxSession;
