//! JSON-RPC transport layer (C5/C6).

pub mod protocol;
pub mod server;

pub use server::ReplServer;
