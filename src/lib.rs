//! mcp-toolhost - generic client for subprocess tool servers
//!
//! Spawns external tool server processes and speaks a JSON-RPC 2.0
//! protocol with each over its stdio, framed as newline-delimited JSON.
//! Many concurrent, independently-timed requests are multiplexed onto the
//! single byte stream per subprocess; partial messages are reassembled,
//! a capability-negotiation handshake runs on connect, and heterogeneous
//! servers are reachable through one uniform call interface.
//!
//! Layers, leaf-first:
//!
//! - [`io`]: process supervision and raw stream transport
//! - [`rpc`]: NDJSON framing and JSON-RPC request correlation
//! - [`mcp`]: connection lifecycle, handshake, and the [`ToolHost`] registry
//!
//! ```no_run
//! use mcp_toolhost::{ServerConfig, ToolHost};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), mcp_toolhost::HostError> {
//! let host = ToolHost::new();
//! let id = host.register_server(ServerConfig {
//!     name: "echo".to_string(),
//!     description: None,
//!     command: "node".to_string(),
//!     args: vec!["echo-server.js".to_string()],
//!     env: Default::default(),
//! });
//!
//! host.connect(&id).await?;
//! let _content = host.call_tool(&id, "echo_text", json!({"text": "hi"})).await?;
//! host.disconnect(&id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod io;
pub mod logging;
pub mod mcp;
pub mod rpc;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, CredentialSource, EnvCredentials, ResolvedLaunch, ServerConfig};
pub use mcp::{
    CapabilitySnapshot, ConnectionStatus, HostError, PROTOCOL_VERSION, PromptArgument, PromptInfo,
    ResourceInfo, ServerId, ServerSummary, ServerTool, ToolHost, ToolInfo,
};
pub use rpc::{REQUEST_TIMEOUT, RpcError};
