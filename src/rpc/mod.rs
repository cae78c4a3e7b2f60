//! Protocol layer - NDJSON framing and JSON-RPC correlation
//!
//! Layered over `crate::io`:
//!
//! - **Framing**: newline-delimited JSON message boundaries
//! - **Protocol**: JSON-RPC 2.0 envelopes, inbound classification, and the
//!   request correlator that multiplexes concurrent callers onto one stream

pub mod framing;
pub mod protocol;

pub use framing::{FramingError, NdjsonFraming};
pub use protocol::{
    InboundMessage, JsonRpcErrorObject, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    REQUEST_TIMEOUT, RpcClient, RpcError,
};
