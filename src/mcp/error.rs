//! Error types for the tool host layer

use crate::config::ConfigError;
use crate::io::process::ProcessError;
use crate::mcp::ServerId;
use crate::rpc::protocol::RpcError;

/// Errors surfaced by the public client surface
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("unknown server id: {0}")]
    UnknownServer(ServerId),

    #[error("server '{name}' is not connected")]
    NotConnected { name: String },

    #[error("failed to resolve launch spec for server '{name}': {source}")]
    Config {
        name: String,
        #[source]
        source: ConfigError,
    },

    #[error("failed to spawn '{command}' for server '{name}': {source}")]
    Spawn {
        name: String,
        command: String,
        #[source]
        source: ProcessError,
    },

    #[error("handshake with server '{name}' failed: {source}")]
    Handshake {
        name: String,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Rpc(#[from] RpcError),
}
