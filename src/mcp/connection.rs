//! One configured tool server connection
//!
//! Owns the `disconnected -> connecting -> connected | error` state
//! machine, at most one live subprocess, and that subprocess's RPC client.
//! All I/O for a connection flows through its own session; connections
//! share no locks with each other.

use crate::config::{CredentialSource, ServerConfig, resolve_launch};
use crate::io::process::{
    ChildProcessManager, ProcessExitEvent, ProcessExitHandler, ProcessManager, StderrMonitor,
    StopMode,
};
use crate::io::transport::StdioTransport;
use crate::mcp::ServerId;
use crate::mcp::capabilities::CapabilitySnapshot;
use crate::mcp::error::HostError;
use crate::mcp::handshake;
use crate::rpc::protocol::RpcClient;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Connection lifecycle states
///
/// From `Connected`, an unexpected process exit or an explicit disconnect
/// returns to `Disconnected`; from `Error`, a new connect restarts the
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Connect failed; carries the captured failure message
    Error(String),
}

/// The live half of a connected server: the supervised subprocess and the
/// RPC client multiplexing requests over its stdio
struct Session {
    process: ChildProcessManager,
    rpc: RpcClient<StdioTransport>,
}

/// One registered tool server
pub struct ServerConnection {
    id: ServerId,
    config: ServerConfig,

    status: StdMutex<ConnectionStatus>,

    /// Capability snapshot, rewritten wholesale on each successful connect
    snapshot: RwLock<CapabilitySnapshot>,

    /// Present exactly while the connection is usable; the mutex also
    /// serializes connect/disconnect against each other
    session: Mutex<Option<Session>>,

    /// Bumped on every connect and disconnect so exit events from a
    /// superseded subprocess never disturb a newer session
    epoch: AtomicU64,
}

/// Exit observer installed on each spawned subprocess
struct ExitWatch {
    connection: Weak<ServerConnection>,
    epoch: u64,
}

#[async_trait]
impl ProcessExitHandler for ExitWatch {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        if connection.epoch.load(Ordering::SeqCst) != self.epoch {
            return; // a disconnect or reconnect already superseded us
        }

        warn!(
            "Server '{}' exited unexpectedly (code {:?})",
            connection.config.name, event.code
        );

        let mut session = connection.session.lock().await;
        if connection.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        if let Some(session) = session.take() {
            // Callers must see "connection closed" now, not a timeout later
            session.rpc.fail_all_pending().await;
        }
        connection.set_status(ConnectionStatus::Disconnected);
        connection.clear_snapshot();
    }
}

impl ServerConnection {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            id: ServerId::new(),
            config,
            status: StdMutex::new(ConnectionStatus::Disconnected),
            snapshot: RwLock::new(CapabilitySnapshot::default()),
            session: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> Option<&str> {
        self.config.description.as_deref()
    }

    pub fn status(&self) -> ConnectionStatus {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        self.status.lock().unwrap().clone()
    }

    pub fn snapshot(&self) -> CapabilitySnapshot {
        // Intentional .unwrap() - a poisoned lock indicates a serious bug
        self.snapshot.read().unwrap().clone()
    }

    fn set_status(&self, status: ConnectionStatus) {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        *self.status.lock().unwrap() = status;
    }

    fn clear_snapshot(&self) {
        // Intentional .unwrap() - a poisoned lock indicates a serious bug
        *self.snapshot.write().unwrap() = CapabilitySnapshot::default();
    }

    /// Spawn the subprocess and run the capability handshake
    ///
    /// No-op when already connected. Any failure (unresolvable launch
    /// spec, spawn error, handshake error or timeout) lands the connection
    /// in `Error` with the captured message and propagates to the caller.
    pub async fn connect(
        self: Arc<Self>,
        credentials: &dyn CredentialSource,
    ) -> Result<(), HostError> {
        let mut session_guard = self.session.lock().await;

        if matches!(self.status(), ConnectionStatus::Connected) {
            debug!("Server '{}' is already connected", self.config.name);
            return Ok(());
        }

        info!("Connecting to server '{}'", self.config.name);
        self.set_status(ConnectionStatus::Connecting);
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let launch = match resolve_launch(&self.config, credentials) {
            Ok(launch) => launch,
            Err(e) => {
                return Err(self.fail_connect(HostError::Config {
                    name: self.config.name.clone(),
                    source: e,
                }));
            }
        };

        let mut process =
            ChildProcessManager::new(launch.command.clone(), launch.args, launch.env);

        let stderr_name = self.config.name.clone();
        process.on_stderr_line(move |line| {
            debug!("Server '{}' stderr: {}", stderr_name, line);
        });
        process.on_process_exit(Arc::new(ExitWatch {
            connection: Arc::downgrade(&self),
            epoch,
        }));

        if let Err(e) = process.start().await {
            return Err(self.fail_connect(HostError::Spawn {
                name: self.config.name.clone(),
                command: launch.command,
                source: e,
            }));
        }

        let transport = match process.take_transport() {
            Ok(transport) => transport,
            Err(e) => {
                let _ = process.stop(StopMode::Force).await;
                return Err(self.fail_connect(HostError::Spawn {
                    name: self.config.name.clone(),
                    command: launch.command,
                    source: e,
                }));
            }
        };

        let rpc = RpcClient::new(transport);
        match handshake::negotiate(&rpc, &self.config.name).await {
            Ok(snapshot) => {
                // Intentional .unwrap() - a poisoned lock indicates a serious bug
                *self.snapshot.write().unwrap() = snapshot;
                *session_guard = Some(Session { process, rpc });
                self.set_status(ConnectionStatus::Connected);
                info!("Server '{}' connected", self.config.name);
                Ok(())
            }
            Err(e) => {
                let _ = process.stop(StopMode::Force).await;
                Err(self.fail_connect(HostError::Handshake {
                    name: self.config.name.clone(),
                    source: e,
                }))
            }
        }
    }

    fn fail_connect(&self, error: HostError) -> HostError {
        error!("{}", error);
        // Supersede this attempt's exit watcher so a crashing child cannot
        // overwrite the Error state with Disconnected afterwards
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.set_status(ConnectionStatus::Error(error.to_string()));
        error
    }

    /// Terminate the subprocess and reset to `Disconnected`
    ///
    /// Every outstanding request is rejected with "connection closed"
    /// before the process goes down; nothing is left to ride out its own
    /// timeout.
    pub async fn disconnect(&self) {
        let mut session_guard = self.session.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(mut session) = session_guard.take() {
            session.rpc.fail_all_pending().await;
            let _ = session.process.stop(StopMode::Graceful).await;
            info!("Server '{}' disconnected", self.config.name);
        }

        self.set_status(ConnectionStatus::Disconnected);
        self.clear_snapshot();
    }

    /// Issue one request on this connection
    ///
    /// Fails immediately when the connection is not `Connected`; there is
    /// no implicit connect-on-demand.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, HostError> {
        if !matches!(self.status(), ConnectionStatus::Connected) {
            return Err(HostError::NotConnected {
                name: self.config.name.clone(),
            });
        }

        let rpc = {
            let session = self.session.lock().await;
            match session.as_ref() {
                Some(session) => session.rpc.clone(),
                None => {
                    return Err(HostError::NotConnected {
                        name: self.config.name.clone(),
                    });
                }
            }
        };

        // The session lock is released; a 30s wait here never blocks
        // disconnect or sibling calls
        Ok(rpc.request(method, Some(params)).await?)
    }

    #[cfg(test)]
    pub(crate) fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Tests
// ============================================================================
