//! I/O layer - process supervision and stream transport
//!
//! Generic abstractions with no knowledge of the wire protocol:
//!
//! - **Transport**: bidirectional exchange of raw text chunks
//! - **Process**: child process lifecycle with piped stdio
//!
//! The protocol layer (`crate::rpc`) builds message framing and
//! request correlation on top of these.

pub mod process;
pub mod transport;

pub use process::{
    ChildProcessManager, ProcessError, ProcessExitEvent, ProcessExitHandler, ProcessManager,
    ProcessState, StderrMonitor, StopMode,
};
pub use transport::{MockRemote, MockTransport, StdioTransport, Transport};
