//! NDJSON message framing layer
//!
//! Tool servers speak newline-delimited JSON: one complete JSON document
//! per line, UTF-8 text. This wrapper turns a chunk-oriented [`Transport`]
//! into a line-oriented one. Outbound messages get a trailing newline;
//! inbound chunks are accumulated and split on newline boundaries, with a
//! trailing incomplete line retained until the next chunk completes it.
//!
//! Whether a line is valid JSON is not this layer's concern; see
//! `crate::rpc::protocol` for message classification.

use crate::io::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use tracing::trace;

/// Error types for NDJSON framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError<T: std::error::Error + Send + Sync + 'static> {
    #[error("transport error: {0}")]
    Transport(T),
}

/// NDJSON framing wrapper around a transport
pub struct NdjsonFraming<T: Transport> {
    transport: T,

    /// Accumulates partial lines across chunk boundaries
    receive_buffer: String,

    /// Complete lines ready to be returned
    line_queue: VecDeque<String>,
}

impl<T: Transport> NdjsonFraming<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            receive_buffer: String::new(),
            line_queue: VecDeque::new(),
        }
    }

    /// Move every complete line from the buffer into the line queue
    ///
    /// Bytes after the last newline stay in the buffer; they are the head
    /// of a message whose tail has not arrived yet. Blank lines are
    /// dropped, carriage returns tolerated.
    fn drain_complete_lines(&mut self) {
        while let Some(newline_at) = self.receive_buffer.find('\n') {
            let line: String = self.receive_buffer.drain(..=newline_at).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() {
                continue;
            }
            trace!("NdjsonFraming: framed line ({} bytes)", line.len());
            self.line_queue.push_back(line.to_string());
        }
    }

    /// Pull one chunk from the transport and reframe
    async fn fill_from_transport(&mut self) -> Result<(), FramingError<T::Error>> {
        let chunk = self
            .transport
            .receive()
            .await
            .map_err(FramingError::Transport)?;

        self.receive_buffer.push_str(&chunk);
        self.drain_complete_lines();
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> Transport for NdjsonFraming<T> {
    type Error = FramingError<T::Error>;

    async fn send(&mut self, message: &str) -> Result<(), Self::Error> {
        let mut framed = String::with_capacity(message.len() + 1);
        framed.push_str(message);
        framed.push('\n');

        self.transport
            .send(&framed)
            .await
            .map_err(FramingError::Transport)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        loop {
            if let Some(line) = self.line_queue.pop_front() {
                return Ok(line);
            }
            self.fill_from_transport().await?;
        }
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.transport
            .close()
            .await
            .map_err(FramingError::Transport)
    }

    fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::transport::MockTransport;

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (transport, mut remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        let message = r#"{"jsonrpc":"2.0","id":"1","method":"initialize"}"#;
        framing.send(message).await.unwrap();

        let sent = remote.next_sent().await.unwrap();
        assert_eq!(sent, format!("{message}\n"));
    }

    #[tokio::test]
    async fn test_message_split_across_chunks_is_one_line() {
        let (transport, remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        remote.push(r#"{"jsonrpc":"2.0","#);
        remote.push("\"id\":\"1\",\"result\":{}}\n");

        let line = framing.receive().await.unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","id":"1","result":{}}"#);
    }

    #[tokio::test]
    async fn test_two_lines_in_one_chunk() {
        let (transport, remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        remote.push("{\"id\":\"1\"}\n{\"id\":\"2\"}\n");

        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"1"}"#);
        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"2"}"#);
    }

    #[tokio::test]
    async fn test_trailing_partial_line_is_retained() {
        let (transport, remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        remote.push("{\"id\":\"1\"}\n{\"id\":");
        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"1"}"#);

        remote.push("\"2\"}\n");
        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"2"}"#);
    }

    #[tokio::test]
    async fn test_blank_and_crlf_lines() {
        let (transport, remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        remote.push("\r\n{\"id\":\"1\"}\r\n\n");
        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"1"}"#);
    }

    #[tokio::test]
    async fn test_receive_fails_when_remote_hangs_up() {
        let (transport, remote) = MockTransport::pair();
        let mut framing = NdjsonFraming::new(transport);

        remote.push("{\"id\":\"1\"}\n");
        remote.hang_up();

        // The buffered line is still delivered before the error surfaces
        assert_eq!(framing.receive().await.unwrap(), r#"{"id":"1"}"#);
        assert!(framing.receive().await.is_err());
    }
}
