//! Tool host - the public client surface
//!
//! A [`ToolHost`] owns the registry of configured tool server connections
//! and exposes the uniform call interface an orchestrator consumes:
//! register, connect, disconnect, call tools, read resources, get prompts
//! and query capability snapshots. It is an explicit value, not a global;
//! tests and embedders can hold several independent hosts.

use crate::config::{CredentialSource, EnvCredentials, ServerConfig};
use crate::mcp::ServerId;
use crate::mcp::capabilities::{CapabilitySnapshot, ToolInfo};
use crate::mcp::connection::{ConnectionStatus, ServerConnection};
use crate::mcp::error::HostError;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::info;

/// Read-only view of one registered server
#[derive(Debug, Clone, Serialize)]
pub struct ServerSummary {
    pub id: ServerId,
    pub name: String,
    pub description: Option<String>,
    pub status: ConnectionStatus,
    pub capabilities: CapabilitySnapshot,
}

/// One advertised tool together with the server offering it
#[derive(Debug, Clone, Serialize)]
pub struct ServerTool {
    pub server_id: ServerId,
    pub server: String,
    pub tool: ToolInfo,
}

/// Client over many tool server connections
pub struct ToolHost {
    connections: Mutex<HashMap<ServerId, Arc<ServerConnection>>>,
    credentials: Arc<dyn CredentialSource>,
}

impl Default for ToolHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolHost {
    /// Create a host resolving `${VAR}` placeholders from the environment
    pub fn new() -> Self {
        Self::with_credentials(Arc::new(EnvCredentials))
    }

    /// Create a host with an explicit credential source
    pub fn with_credentials(credentials: Arc<dyn CredentialSource>) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            credentials,
        }
    }

    /// Register a server configuration; bookkeeping only, no I/O
    ///
    /// The new connection starts out `Disconnected`.
    pub fn register_server(&self, config: ServerConfig) -> ServerId {
        let connection = Arc::new(ServerConnection::new(config));
        let id = connection.id();
        info!("Registered server '{}' as {}", connection.name(), id);

        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        self.connections.lock().unwrap().insert(id, connection);
        id
    }

    fn connection(&self, id: &ServerId) -> Result<Arc<ServerConnection>, HostError> {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        self.connections
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(HostError::UnknownServer(*id))
    }

    /// Spawn the server's subprocess and run the capability handshake
    pub async fn connect(&self, id: &ServerId) -> Result<(), HostError> {
        self.connection(id)?.connect(self.credentials.as_ref()).await
    }

    /// Terminate the server's subprocess, rejecting outstanding calls
    pub async fn disconnect(&self, id: &ServerId) -> Result<(), HostError> {
        self.connection(id)?.disconnect().await;
        Ok(())
    }

    /// Invoke a named tool on a connected server
    pub async fn call_tool(
        &self,
        id: &ServerId,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, HostError> {
        self.connection(id)?
            .call("tools/call", json!({"name": tool_name, "arguments": arguments}))
            .await
    }

    /// Read a resource by uri from a connected server
    pub async fn read_resource(&self, id: &ServerId, uri: &str) -> Result<Value, HostError> {
        self.connection(id)?
            .call("resources/read", json!({"uri": uri}))
            .await
    }

    /// Fetch a rendered prompt from a connected server
    pub async fn get_prompt(
        &self,
        id: &ServerId,
        name: &str,
        arguments: Value,
    ) -> Result<Value, HostError> {
        self.connection(id)?
            .call("prompts/get", json!({"name": name, "arguments": arguments}))
            .await
    }

    /// Summaries of every registered server, sorted by name
    pub fn list_servers(&self) -> Vec<ServerSummary> {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        let mut summaries: Vec<ServerSummary> = self
            .connections
            .lock()
            .unwrap()
            .values()
            .map(|connection| summarize(connection))
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Summary of one registered server
    pub fn get_server(&self, id: &ServerId) -> Option<ServerSummary> {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        self.connections
            .lock()
            .unwrap()
            .get(id)
            .map(|connection| summarize(connection))
    }

    /// Every tool advertised by currently connected servers
    pub fn get_all_tools(&self) -> Vec<ServerTool> {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        let connections: Vec<Arc<ServerConnection>> =
            self.connections.lock().unwrap().values().cloned().collect();

        let mut tools = Vec::new();
        for connection in connections {
            for tool in connection.snapshot().tools {
                tools.push(ServerTool {
                    server_id: connection.id(),
                    server: connection.name().to_string(),
                    tool,
                });
            }
        }
        tools.sort_by(|a, b| (a.server.as_str(), a.tool.name.as_str())
            .cmp(&(b.server.as_str(), b.tool.name.as_str())));
        tools
    }
}

fn summarize(connection: &Arc<ServerConnection>) -> ServerSummary {
    ServerSummary {
        id: connection.id(),
        name: connection.name().to_string(),
        description: connection.description().map(String::from),
        status: connection.status(),
        capabilities: connection.snapshot(),
    }
}

// ============================================================================
// Tests
// ============================================================================
