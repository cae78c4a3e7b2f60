//! Capability negotiation handshake
//!
//! Runs once per successful connect, before the connection is usable:
//!
//! 1. `initialize` request with protocol version, declared client
//!    capabilities and client identity; its failure aborts the connect.
//! 2. `notifications/initialized` notification.
//! 3. `tools/list`, `resources/list` and `prompts/list` issued
//!    concurrently. Not every tool server implements every capability, so
//!    each list is independently fault-tolerant: an error or an
//!    unsupported method yields an empty list, never a failed connect.

use crate::io::transport::Transport;
use crate::mcp::capabilities::{CapabilitySnapshot, PromptInfo, ResourceInfo, ToolInfo};
use crate::rpc::protocol::{RpcClient, RpcError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Protocol revision this client negotiates
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// Handshake Payloads
// ============================================================================

#[derive(Debug, Serialize)]
struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    client_info: ClientInfo,
}

/// Capabilities this client declares; empty objects on the wire
#[derive(Debug, Default, Serialize)]
struct ClientCapabilities {
    tools: CapabilityFlags,
    resources: CapabilityFlags,
    prompts: CapabilityFlags,
}

#[derive(Debug, Default, Serialize)]
struct CapabilityFlags {}

#[derive(Debug, Serialize)]
struct ClientInfo {
    name: String,
    version: String,
}

#[derive(Debug, Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    protocol_version: Option<String>,
    #[serde(rename = "serverInfo", default)]
    server_info: Option<ServerInfo>,
}

#[derive(Debug, Deserialize)]
struct ServerInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

// ============================================================================
// Negotiation
// ============================================================================

/// Run the full handshake and return the server's capability snapshot
pub async fn negotiate<T: Transport + 'static>(
    rpc: &RpcClient<T>,
    server_name: &str,
) -> Result<CapabilitySnapshot, RpcError> {
    let params = InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: ClientCapabilities::default(),
        client_info: ClientInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };

    let raw = rpc.request("initialize", Some(params)).await?;
    if let Ok(init) = serde_json::from_value::<InitializeResult>(raw) {
        debug!(
            "Server '{}' initialized: protocol {:?}, server {:?} {:?}",
            server_name,
            init.protocol_version,
            init.server_info.as_ref().and_then(|s| s.name.as_deref()),
            init.server_info.as_ref().and_then(|s| s.version.as_deref()),
        );
    }

    rpc.notify("notifications/initialized", None::<Value>)
        .await?;

    let (tools, resources, prompts) = tokio::join!(
        fetch_list::<ToolInfo, T>(rpc, server_name, "tools/list", "tools"),
        fetch_list::<ResourceInfo, T>(rpc, server_name, "resources/list", "resources"),
        fetch_list::<PromptInfo, T>(rpc, server_name, "prompts/list", "prompts"),
    );

    info!(
        "Server '{}' advertises {} tools, {} resources, {} prompts",
        server_name,
        tools.len(),
        resources.len(),
        prompts.len()
    );

    Ok(CapabilitySnapshot {
        tools,
        resources,
        prompts,
    })
}

/// Fetch one capability list, absorbing failure into an empty list
async fn fetch_list<D, T>(
    rpc: &RpcClient<T>,
    server_name: &str,
    method: &str,
    field: &str,
) -> Vec<D>
where
    D: DeserializeOwned,
    T: Transport + 'static,
{
    let result = match rpc.request(method, None::<Value>).await {
        Ok(result) => result,
        Err(e) => {
            warn!(
                "Server '{}' does not provide {}: {}",
                server_name, method, e
            );
            return Vec::new();
        }
    };

    match result.get(field) {
        Some(list) => serde_json::from_value(list.clone()).unwrap_or_else(|e| {
            warn!(
                "Server '{}' returned a malformed {} list: {}",
                server_name, method, e
            );
            Vec::new()
        }),
        None => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::{MockRemote, MockTransport};
    use serde_json::json;

    /// Scripted remote: answers each request by method, in wire order
    async fn respond_by_method(remote: &mut MockRemote, replies: &[(&str, Value)]) {
        let mut outstanding = replies.len();
        while outstanding > 0 {
            let Some(line) = remote.next_sent().await else {
                panic!("client hung up before finishing the handshake");
            };
            let sent: Value = serde_json::from_str(line.trim()).unwrap();
            let method = sent["method"].as_str().unwrap().to_string();

            let Some(id) = sent.get("id") else {
                continue; // notification, nothing to answer
            };

            let reply = replies
                .iter()
                .find(|(m, _)| *m == method)
                .unwrap_or_else(|| panic!("unscripted method {method}"));

            let line = match &reply.1 {
                Value::Object(o) if o.contains_key("__error") => json!({
                    "jsonrpc": "2.0", "id": id, "error": o["__error"]
                }),
                result => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            };
            remote.push(line.to_string() + "\n");
            outstanding -= 1;
        }
    }

    fn init_result() -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "serverInfo": {"name": "scripted", "version": "1.0"}
        })
    }

    #[tokio::test]
    async fn test_negotiate_populates_snapshot() {
        let (transport, mut remote) = MockTransport::pair();
        let rpc = RpcClient::new(transport);

        let negotiation = {
            let rpc = rpc.clone();
            tokio::spawn(async move { negotiate(&rpc, "scripted").await })
        };

        respond_by_method(
            &mut remote,
            &[
                ("initialize", init_result()),
                (
                    "tools/list",
                    json!({"tools": [{"name": "echo_text", "inputSchema": {"type": "object"}}]}),
                ),
                ("resources/list", json!({"resources": [{"uri": "file:///x"}]})),
                ("prompts/list", json!({"prompts": []})),
            ],
        )
        .await;

        let snapshot = negotiation.await.unwrap().unwrap();
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].name, "echo_text");
        assert_eq!(snapshot.resources.len(), 1);
        assert!(snapshot.prompts.is_empty());
    }

    #[tokio::test]
    async fn test_failed_list_becomes_empty_not_fatal() {
        let (transport, mut remote) = MockTransport::pair();
        let rpc = RpcClient::new(transport);

        let negotiation = {
            let rpc = rpc.clone();
            tokio::spawn(async move { negotiate(&rpc, "scripted").await })
        };

        respond_by_method(
            &mut remote,
            &[
                ("initialize", init_result()),
                (
                    "tools/list",
                    json!({"tools": [{"name": "only_tool"}]}),
                ),
                (
                    "resources/list",
                    json!({"__error": {"code": -32601, "message": "not supported"}}),
                ),
                ("prompts/list", json!({"prompts": []})),
            ],
        )
        .await;

        let snapshot = negotiation.await.unwrap().unwrap();
        assert_eq!(snapshot.tools.len(), 1);
        assert!(snapshot.resources.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_error_aborts_handshake() {
        let (transport, mut remote) = MockTransport::pair();
        let rpc = RpcClient::new(transport);

        let negotiation = {
            let rpc = rpc.clone();
            tokio::spawn(async move { negotiate(&rpc, "scripted").await })
        };

        respond_by_method(
            &mut remote,
            &[(
                "initialize",
                json!({"__error": {"code": -32603, "message": "unsupported protocol"}}),
            )],
        )
        .await;

        let err = negotiation.await.unwrap().unwrap_err();
        assert!(matches!(err, RpcError::Server { code: -32603, .. }));
    }

    #[tokio::test]
    async fn test_initialized_notification_follows_initialize() {
        let (transport, mut remote) = MockTransport::pair();
        let rpc = RpcClient::new(transport);

        let negotiation = {
            let rpc = rpc.clone();
            tokio::spawn(async move { negotiate(&rpc, "scripted").await })
        };

        // First frame is the initialize request
        let first = remote.next_sent().await.unwrap();
        let sent: Value = serde_json::from_str(first.trim()).unwrap();
        assert_eq!(sent["method"], "initialize");
        assert_eq!(sent["params"]["protocolVersion"], PROTOCOL_VERSION);
        assert!(sent["params"]["capabilities"]["tools"].is_object());
        remote.push(
            json!({"jsonrpc": "2.0", "id": sent["id"], "result": init_result()}).to_string() + "\n",
        );

        // Second frame must be the initialized notification, without an id
        let second = remote.next_sent().await.unwrap();
        let sent: Value = serde_json::from_str(second.trim()).unwrap();
        assert_eq!(sent["method"], "notifications/initialized");
        assert!(sent.get("id").is_none());

        // Absorb the three list calls so negotiate can finish
        respond_by_method(
            &mut remote,
            &[
                ("tools/list", json!({"tools": []})),
                ("resources/list", json!({"resources": []})),
                ("prompts/list", json!({"prompts": []})),
            ],
        )
        .await;
        negotiation.await.unwrap().unwrap();
    }
}
