//! Transport layer - raw chunk exchange with a child process
//!
//! A `Transport` moves opaque text in both directions without knowing
//! anything about message boundaries or JSON. Framing lives one layer up,
//! in `crate::rpc::framing`.

use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tracing::{error, trace};

/// Size of the read buffer for stdout reads
const READ_BUFFER_SIZE: usize = 4096;

/// Core transport trait for bidirectional chunk exchange
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send a chunk of text
    async fn send(&mut self, chunk: &str) -> Result<(), Self::Error>;

    /// Receive the next chunk of text
    ///
    /// Chunks carry no message boundaries; a single protocol message may
    /// span several chunks and a single chunk may carry several messages.
    async fn receive(&mut self) -> Result<String, Self::Error>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), Self::Error>;

    /// Check if the transport is still active
    fn is_connected(&self) -> bool;
}

// ============================================================================
// Stdio Transport
// ============================================================================

/// Error types for the stdio transport
#[derive(Debug, thiserror::Error)]
pub enum StdioTransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport is disconnected")]
    Disconnected,
}

/// Transport over a child process's stdin/stdout pipes
///
/// Both pipes are serviced by background tasks bridged with unbounded
/// channels, so `send` never blocks on the child and `receive` suspends
/// until output arrives. The stdout reader accumulates raw bytes and only
/// forwards complete UTF-8 sequences; a multi-byte character split across
/// two reads is never surfaced as two broken chunks.
#[derive(Debug)]
pub struct StdioTransport {
    /// Hands outgoing chunks to the stdin writer task
    stdin_tx: Option<mpsc::UnboundedSender<String>>,

    /// Receives chunks from the stdout reader task
    stdout_rx: Option<mpsc::UnboundedReceiver<String>>,

    connected: bool,
}

/// Byte accumulator that releases only complete UTF-8 sequences
struct Utf8Assembler {
    buffer: Vec<u8>,
}

impl Utf8Assembler {
    fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the longest valid UTF-8 prefix out of the buffer
    ///
    /// Returns `None` when the buffer is empty or holds only the head of an
    /// incomplete multi-byte sequence; those bytes stay put until the rest
    /// of the sequence arrives.
    fn take_valid(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }

        let valid_len = match std::str::from_utf8(&self.buffer) {
            Ok(_) => self.buffer.len(),
            Err(e) => e.valid_up_to(),
        };

        if valid_len == 0 {
            return None;
        }

        let valid: Vec<u8> = self.buffer.drain(..valid_len).collect();
        // valid_len came from from_utf8, the conversion cannot fail
        String::from_utf8(valid).ok()
    }
}

impl StdioTransport {
    /// Create a transport from a child process's stdio pipes
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::writer_task(stdin, stdin_rx));
        tokio::spawn(Self::reader_task(stdout, stdout_tx));

        Self {
            stdin_tx: Some(stdin_tx),
            stdout_rx: Some(stdout_rx),
            connected: true,
        }
    }

    /// Drains the outgoing channel into the child's stdin
    async fn writer_task(mut stdin: ChildStdin, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(chunk) = rx.recv().await {
            trace!("StdioTransport: writing {} bytes", chunk.len());

            if let Err(e) = stdin.write_all(chunk.as_bytes()).await {
                error!("Failed to write to child stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush child stdin: {}", e);
                break;
            }
        }

        trace!("StdioTransport: writer task finished");
    }

    /// Reads the child's stdout and forwards complete UTF-8 chunks
    async fn reader_task(stdout: ChildStdout, tx: mpsc::UnboundedSender<String>) {
        let mut reader = BufReader::new(stdout);
        let mut assembler = Utf8Assembler::new();
        let mut read_buffer = [0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut read_buffer).await {
                Ok(0) => {
                    // EOF; flush whatever is still decodable
                    if let Some(tail) = assembler.take_valid() {
                        let _ = tx.send(tail);
                    }
                    if !assembler.buffer.is_empty() {
                        error!(
                            "StdioTransport: {} undecodable bytes at stdout EOF",
                            assembler.buffer.len()
                        );
                    }
                    break;
                }
                Ok(n) => {
                    assembler.push(&read_buffer[..n]);
                    while let Some(chunk) = assembler.take_valid() {
                        if tx.send(chunk).is_err() {
                            trace!("StdioTransport: receiver dropped, stopping reader");
                            return;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to read from child stdout: {}", e);
                    break;
                }
            }
        }

        trace!("StdioTransport: reader task finished");
    }
}

#[async_trait]
impl Transport for StdioTransport {
    type Error = StdioTransportError;

    async fn send(&mut self, chunk: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(StdioTransportError::Disconnected);
        }
        let tx = self
            .stdin_tx
            .as_ref()
            .ok_or(StdioTransportError::Disconnected)?;

        tx.send(chunk.to_string())
            .map_err(|_| StdioTransportError::Disconnected)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(StdioTransportError::Disconnected);
        }
        let rx = self
            .stdout_rx
            .as_mut()
            .ok_or(StdioTransportError::Disconnected)?;

        rx.recv().await.ok_or(StdioTransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        self.stdin_tx.take();
        self.stdout_rx.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Mock Transport
// ============================================================================

/// Error type for the mock transport
#[derive(Debug, thiserror::Error)]
pub enum MockTransportError {
    #[error("transport is disconnected")]
    Disconnected,
}

/// In-memory transport for tests, driven from a paired [`MockRemote`]
///
/// `receive` suspends until the remote pushes a chunk, which matches how a
/// live stdout pipe behaves and lets tests exercise concurrent callers.
pub struct MockTransport {
    sent_tx: mpsc::UnboundedSender<String>,
    inbound_rx: mpsc::UnboundedReceiver<String>,
    connected: bool,
}

/// The far end of a [`MockTransport`]: observes sent chunks, feeds inbound
/// chunks, and can hang up to simulate the peer process dying.
pub struct MockRemote {
    sent_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: Arc<Mutex<Option<mpsc::UnboundedSender<String>>>>,
}

impl MockTransport {
    /// Create a connected transport/remote pair
    pub fn pair() -> (Self, MockRemote) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            sent_tx,
            inbound_rx,
            connected: true,
        };
        let remote = MockRemote {
            sent_rx,
            inbound_tx: Arc::new(Mutex::new(Some(inbound_tx))),
        };
        (transport, remote)
    }
}

impl MockRemote {
    /// Feed a chunk that the transport will yield from `receive`
    pub fn push(&self, chunk: impl Into<String>) {
        let guard = self.inbound_tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(chunk.into());
        }
    }

    /// Await the next chunk sent through the transport
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent_rx.recv().await
    }

    /// Close the inbound direction; pending and future `receive` calls fail
    pub fn hang_up(&self) {
        self.inbound_tx.lock().unwrap().take();
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn send(&mut self, chunk: &str) -> Result<(), Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }
        self.sent_tx
            .send(chunk.to_string())
            .map_err(|_| MockTransportError::Disconnected)
    }

    async fn receive(&mut self) -> Result<String, Self::Error> {
        if !self.connected {
            return Err(MockTransportError::Disconnected);
        }
        self.inbound_rx
            .recv()
            .await
            .ok_or(MockTransportError::Disconnected)
    }

    async fn close(&mut self) -> Result<(), Self::Error> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================
