//! MCP layer - connections, handshake and the public client surface
//!
//! Built on the generic I/O layer (`crate::io`) and the protocol layer
//! (`crate::rpc`):
//!
//! - **Capabilities**: descriptors a server advertises during the handshake
//! - **Handshake**: the initialize/initialized/list negotiation sequence
//! - **Connection**: per-server state machine and subprocess ownership
//! - **Client**: the [`ToolHost`] registry an orchestrator talks to

pub mod capabilities;
pub mod client;
pub mod connection;
pub mod error;
pub mod handshake;

#[cfg(test)]
pub mod testing;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use capabilities::{CapabilitySnapshot, PromptArgument, PromptInfo, ResourceInfo, ToolInfo};
pub use client::{ServerSummary, ServerTool, ToolHost};
pub use connection::{ConnectionStatus, ServerConnection};
pub use error::HostError;
pub use handshake::PROTOCOL_VERSION;

/// Opaque identifier for one registered tool server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Rebuild an id from its uuid form, e.g. one echoed back by a caller
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
