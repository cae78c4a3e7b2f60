//! JSON-RPC 2.0 protocol layer
//!
//! Implements the request/response correlation that multiplexes many
//! concurrent callers onto one NDJSON stream: string correlation ids from
//! an atomic counter, a pending table of one-shot channels, a fixed
//! per-request deadline, and eager rejection of everything still pending
//! when the stream goes away.
//!
//! Inbound lines are classified at this boundary into a tagged variant
//! (response vs. server-initiated notification) before any business logic
//! sees them; lines that are not valid JSON are dropped without error.

use crate::io::transport::Transport;
use crate::rpc::framing::NdjsonFraming;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, trace};

/// Fixed deadline for every outstanding request
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC version tag carried by every envelope
pub const JSONRPC_VERSION: &str = "2.0";

// ============================================================================
// Envelope Types
// ============================================================================

/// JSON-RPC 2.0 request message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0"
    pub jsonrpc: String,

    /// Correlation id, echoed back by the matching response
    pub id: String,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,

    /// Matches the request id; servers may echo it as a string or a number
    pub id: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

/// JSON-RPC 2.0 notification message (no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,

    pub method: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    #[serde(default)]
    pub code: i32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One inbound message, classified at the codec boundary
///
/// A line carrying an `id` together with a `result` or `error` member is a
/// response; a line carrying a `method` but no `id` is a server-initiated
/// notification. Anything else, including invalid JSON, is unclassifiable
/// and gets dropped by the dispatcher.
#[derive(Debug)]
pub enum InboundMessage {
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl InboundMessage {
    /// Classify one framed line; `None` means the line is not a message
    pub fn classify(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line).ok()?;
        let object = value.as_object()?;

        if object.contains_key("id")
            && (object.contains_key("result") || object.contains_key("error"))
        {
            return serde_json::from_value(value).ok().map(Self::Response);
        }
        if object.contains_key("method") {
            return serde_json::from_value(value).ok().map(Self::Notification);
        }
        None
    }
}

impl JsonRpcResponse {
    /// Canonical pending-table key for this response's id
    ///
    /// String and numeric echoes of the same id map to the same key.
    pub fn id_key(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ============================================================================
// RPC Errors
// ============================================================================

/// Errors surfaced to callers awaiting a request
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server error ({code}): {message}")]
    Server {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// RPC Client
// ============================================================================

/// Pending-request table: correlation id to the caller's one-shot sender
///
/// Exactly one of {matching response, timeout, teardown} resolves any
/// entry, and each entry is removed when it resolves.
type PendingTable = HashMap<String, oneshot::Sender<Result<Value, RpcError>>>;

/// JSON-RPC client with request/response correlation over one stream
///
/// Cheap to clone; clones share the outbound channel, the pending table
/// and the id counter, so a connection can hand out call handles without
/// serializing callers behind a lock.
pub struct RpcClient<T: Transport> {
    /// Hands serialized lines to the dispatch task
    outbound: mpsc::UnboundedSender<String>,

    pending: Arc<Mutex<PendingTable>>,

    /// Correlation id counter, unique within this client's lifetime
    next_id: Arc<AtomicU64>,

    _transport: std::marker::PhantomData<fn() -> T>,
}

impl<T: Transport> Clone for RpcClient<T> {
    fn clone(&self) -> Self {
        Self {
            outbound: self.outbound.clone(),
            pending: Arc::clone(&self.pending),
            next_id: Arc::clone(&self.next_id),
            _transport: std::marker::PhantomData,
        }
    }
}

impl<T: Transport + 'static> RpcClient<T> {
    /// Create a client and spawn its dispatch task over the transport
    pub fn new(transport: T) -> Self {
        let framed = Arc::new(Mutex::new(NdjsonFraming::new(transport)));
        let pending: Arc<Mutex<PendingTable>> = Arc::new(Mutex::new(HashMap::new()));
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();

        let framed_task = Arc::clone(&framed);
        let pending_task = Arc::clone(&pending);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = outbound_rx.recv() => match message {
                        Some(line) => {
                            let mut framed = framed_task.lock().await;
                            if let Err(e) = framed.send(&line).await {
                                error!("Failed to send request line: {}", e);
                                break;
                            }
                        }
                        // Client dropped; nothing can be pending anymore
                        None => break,
                    },
                    inbound = async {
                        framed_task.lock().await.receive().await
                    } => match inbound {
                        Ok(line) => Self::route_inbound(&line, &pending_task).await,
                        Err(e) => {
                            debug!("Inbound stream ended: {}", e);
                            break;
                        }
                    },
                }
            }

            // The stream is gone; no caller may be left waiting on a
            // response that can never arrive
            fail_all_pending(&pending_task).await;
            trace!("RpcClient: dispatch task finished");
        });

        Self {
            outbound,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            _transport: std::marker::PhantomData,
        }
    }

    /// Route one framed line to the pending caller it belongs to
    async fn route_inbound(line: &str, pending: &Arc<Mutex<PendingTable>>) {
        match InboundMessage::classify(line) {
            Some(InboundMessage::Response(response)) => {
                let Some(key) = response.id_key() else {
                    debug!("Dropping response with unusable id: {:?}", response.id);
                    return;
                };
                let sender = pending.lock().await.remove(&key);
                match sender {
                    Some(sender) => {
                        let outcome = match response.error {
                            Some(error) => Err(RpcError::Server {
                                code: error.code,
                                message: error.message,
                                data: error.data,
                            }),
                            None => Ok(response.result.unwrap_or(Value::Null)),
                        };
                        if sender.send(outcome).is_err() {
                            // Caller gave up first (timeout already fired)
                            debug!("Response receiver dropped for request {}", key);
                        }
                    }
                    None => debug!("Dropping response for unknown request {}", key),
                }
            }
            Some(InboundMessage::Notification(notification)) => {
                debug!(
                    "Dropping unsolicited notification: {}",
                    notification.method
                );
            }
            None => {
                debug!("Discarding unparseable line ({} bytes)", line.len());
            }
        }
    }

    /// Send a request and await its response, bounded by [`REQUEST_TIMEOUT`]
    pub async fn request<P>(&self, method: &str, params: Option<P>) -> Result<Value, RpcError>
    where
        P: Serialize,
    {
        self.request_with_deadline(method, params, REQUEST_TIMEOUT)
            .await
    }

    /// Send a request with an explicit deadline
    pub async fn request_with_deadline<P>(
        &self,
        method: &str,
        params: Option<P>,
        deadline: Duration,
    ) -> Result<Value, RpcError>
    where
        P: Serialize,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();

        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.clone(),
            method: method.to_string(),
            params: params.map(serde_json::to_value).transpose()?,
        };
        let line = serde_json::to_string(&request)?;

        // Register before writing; the response must find a pending entry
        // even if it arrives before this task is scheduled again
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), sender);

        debug!("RpcClient: sending request {} ({})", id, method);
        if self.outbound.send(line).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(RpcError::ConnectionClosed);
        }

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without resolving: teardown raced the insert
            Ok(Err(_)) => Err(RpcError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                debug!("RpcClient: request {} timed out", id);
                Err(RpcError::Timeout)
            }
        }
    }

    /// Send a one-way notification; no id, no response expected
    pub async fn notify<P>(&self, method: &str, params: Option<P>) -> Result<(), RpcError>
    where
        P: Serialize,
    {
        let notification = JsonRpcNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params: params.map(serde_json::to_value).transpose()?,
        };
        let line = serde_json::to_string(&notification)?;

        debug!("RpcClient: sending notification {}", notification.method);
        self.outbound
            .send(line)
            .map_err(|_| RpcError::ConnectionClosed)
    }

    /// Reject every outstanding request with a "connection closed" error
    ///
    /// Called on explicit disconnect; the dispatch task does the same when
    /// the stream dies on its own, and the two are idempotent.
    pub async fn fail_all_pending(&self) {
        fail_all_pending(&self.pending).await;
    }

    /// Check whether the dispatch task can still accept traffic
    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    #[cfg(test)]
    pub(crate) async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Drain the pending table, rejecting every entry
async fn fail_all_pending(pending: &Arc<Mutex<PendingTable>>) {
    let mut table = pending.lock().await;
    for (id, sender) in table.drain() {
        debug!("Rejecting pending request {}: connection closed", id);
        let _ = sender.send(Err(RpcError::ConnectionClosed));
    }
}

// ============================================================================
// Tests
// ============================================================================
