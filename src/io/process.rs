//! Process supervision layer
//!
//! Owns the lifecycle of one child process: spawn with resolved
//! command/args/environment, observe exit, terminate on demand. Stderr is
//! drained line by line so the child can never block on a full pipe;
//! stdout/stdin are handed to the transport untouched.

use crate::io::transport::{StdioTransport, Transport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
// warn! is used in the non-unix code paths
#[allow(unused_imports)]
use tracing::{error, info, trace, warn};

// ============================================================================
// Process State
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Graceful shutdown (SIGTERM); the wait task observes the exit
    Graceful,
    /// Force kill immediately (SIGKILL)
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Not spawned yet
    NotStarted,
    /// Currently running
    Running { pid: u32 },
    /// Exited or was killed
    Stopped,
}

impl ProcessState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

// ============================================================================
// Exit Events
// ============================================================================

/// Event fired when the child exits on its own
#[derive(Debug, Clone)]
pub struct ProcessExitEvent {
    /// Exit code, when the platform reports one
    pub code: Option<i32>,
}

/// Trait for observing child exit
#[async_trait]
pub trait ProcessExitHandler: Send + Sync {
    async fn on_process_exit(&self, event: ProcessExitEvent);
}

// ============================================================================
// Stderr Monitoring
// ============================================================================

/// Trait for observing stderr output from the child
pub trait StderrMonitor: Send + Sync {
    /// Install a handler for stderr lines
    ///
    /// Called for each non-empty line the child writes to stderr. Only one
    /// handler can be active; installing a new one replaces the previous.
    /// Without a handler, lines are still drained and logged at trace level.
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static;
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process supervision
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("process not started")]
    NotStarted,

    #[error("process already started")]
    AlreadyStarted,

    #[error("stdin not available")]
    StdinNotAvailable,

    #[error("stdout not available")]
    StdoutNotAvailable,

    #[error("stderr not available")]
    StderrNotAvailable,
}

/// Trait for managing a child process lifecycle
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Spawn the child process
    async fn start(&mut self) -> Result<(), Self::Error>;

    /// Stop the child process
    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    /// Check if the child is currently running
    fn is_running(&self) -> bool;

    /// Take the stdio transport for the running child
    ///
    /// Consumes the child's stdin/stdout; can only succeed once per spawn.
    fn take_transport(&mut self) -> Result<StdioTransport, Self::Error>;

    /// Synchronous force kill for Drop paths
    fn kill_sync(&mut self);
}

/// Supervises one child process spawned via [`Command`]
///
/// The configured environment overrides are merged over the parent
/// process's environment at spawn time.
pub struct ChildProcessManager {
    command: String,
    args: Vec<String>,

    /// Environment overrides applied on top of the inherited environment
    env: HashMap<String, String>,

    /// Thread-safe process state, shared with the wait task
    state: Arc<Mutex<ProcessState>>,

    /// Transport created at spawn, taken by the protocol layer
    transport: Option<StdioTransport>,

    stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,
    stderr_task: Option<JoinHandle<()>>,
    wait_task: Option<JoinHandle<()>>,

    /// Fired by the wait task when the child exits
    exit_handler: Option<Arc<dyn ProcessExitHandler>>,
}

impl ChildProcessManager {
    pub fn new(command: String, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command,
            args,
            env,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            transport: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
            exit_handler: None,
        }
    }

    /// Install an exit handler, fired once when the child exits
    pub fn on_process_exit(&mut self, handler: Arc<dyn ProcessExitHandler>) {
        self.exit_handler = Some(handler);
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        self.state.lock().unwrap().clone()
    }

    /// Drain stderr so the child never blocks on a full pipe
    fn spawn_stderr_monitor(&mut self, stderr: tokio::process::ChildStderr) {
        if self.stderr_task.is_some() {
            return;
        }

        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        trace!("ChildProcessManager: stderr EOF");
                        break;
                    }
                    Ok(_) => {
                        let content = line.trim().to_string();
                        if content.is_empty() {
                            continue;
                        }
                        if let Some(ref handler) = handler {
                            handler(content);
                        } else {
                            trace!("ChildProcessManager: stderr drained: {}", content);
                        }
                    }
                    Err(e) => {
                        error!("Failed to read child stderr: {}", e);
                        break;
                    }
                }
            }
        });

        self.stderr_task = Some(task);
    }

    /// Spawn the wait task that observes child exit
    fn spawn_wait_task(&mut self, mut child: Child) {
        let pid = self.get_state().pid();
        let exit_handler = self.exit_handler.clone();
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    info!("Process PID {:?} exited with status: {}", pid, status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for child process: {}", e);
                    None
                }
            };

            if let Ok(mut process_state) = state.lock() {
                *process_state = ProcessState::Stopped;
            }

            if let Some(handler) = &exit_handler {
                handler.on_process_exit(ProcessExitEvent { code }).await;
            }

            trace!("ChildProcessManager: wait task finished for PID {:?}", pid);
        });

        self.wait_task = Some(task);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut builder = Command::new(&self.command);
        builder
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = builder.spawn()?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("failed to get process ID")))?;
        info!("Process started with PID: {}", pid);

        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        *self.state.lock().unwrap() = ProcessState::Running { pid };

        // Extract the pipes before the child moves into the wait task
        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.transport = Some(StdioTransport::new(stdin, stdout));
        self.spawn_stderr_monitor(stderr);
        self.spawn_wait_task(child);

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return Err(ProcessError::NotStarted),
        };

        match mode {
            StopMode::Graceful => info!("Gracefully stopping process with PID: {}", pid),
            StopMode::Force => info!("Force killing process with PID: {}", pid),
        }

        // Close the transport first; the child sees stdin EOF
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }

        #[cfg(unix)]
        {
            let signal = match mode {
                StopMode::Graceful => libc::SIGTERM,
                StopMode::Force => libc::SIGKILL,
            };
            unsafe {
                if libc::kill(pid as libc::pid_t, signal) == 0 {
                    trace!("Sent signal {} to process {}", signal, pid);
                }
            }
            // The wait task observes the actual exit
        }
        #[cfg(not(unix))]
        {
            warn!("Process termination is only implemented for unix targets");
        }

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // State flips immediately for API consistency; the wait task will
        // confirm the actual exit
        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        *self.state.lock().unwrap() = ProcessState::Stopped;

        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn take_transport(&mut self) -> Result<StdioTransport, Self::Error> {
        self.transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        let pid = match self.get_state().pid() {
            Some(pid) => pid,
            None => return,
        };

        info!("Synchronously force killing process with PID: {}", pid);

        #[cfg(unix)]
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        #[cfg(not(unix))]
        warn!("Synchronous process kill is only implemented for unix targets");

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        // Intentional .unwrap() - a poisoned mutex indicates a serious bug
        *self.state.lock().unwrap() = ProcessState::Stopped;
    }
}

impl StderrMonitor for ChildProcessManager {
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        self.kill_sync();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct FlagExitHandler {
        fired: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ProcessExitHandler for FlagExitHandler {
        async fn on_process_exit(&self, _event: ProcessExitEvent) {
            self.fired.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let mut manager = ChildProcessManager::new(
            "sleep".to_string(),
            vec!["5".to_string()],
            HashMap::new(),
        );

        assert!(!manager.is_running());
        manager.start().await.unwrap();
        assert!(manager.is_running());
        manager.stop(StopMode::Graceful).await.unwrap();
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_env_overrides_reach_the_child() {
        let mut env = HashMap::new();
        env.insert("TOOLHOST_TEST_VALUE".to_string(), "from-parent".to_string());

        let mut manager = ChildProcessManager::new(
            "sh".to_string(),
            vec!["-c".to_string(), "echo $TOOLHOST_TEST_VALUE".to_string()],
            env,
        );
        manager.start().await.unwrap();

        let mut transport = manager.take_transport().unwrap();
        let output = transport.receive().await.unwrap();
        assert_eq!(output.trim(), "from-parent");

        let _ = manager.stop(StopMode::Graceful).await;
    }

    #[tokio::test]
    async fn test_stderr_handler_receives_lines() {
        let mut manager = ChildProcessManager::new(
            "sh".to_string(),
            vec![
                "-c".to_string(),
                "echo 'error message' >&2; sleep 1".to_string(),
            ],
            HashMap::new(),
        );

        let lines = Arc::new(Mutex::new(Vec::<String>::new()));
        let lines_clone = Arc::clone(&lines);
        manager.on_stderr_line(move |line| {
            lines_clone.lock().unwrap().push(line);
        });

        manager.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        manager.stop(StopMode::Graceful).await.unwrap();

        let lines = lines.lock().unwrap();
        assert_eq!(lines.first().map(String::as_str), Some("error message"));
    }

    #[tokio::test]
    async fn test_exit_handler_fires_on_natural_exit() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut manager =
            ChildProcessManager::new("true".to_string(), Vec::new(), HashMap::new());
        manager.on_process_exit(Arc::new(FlagExitHandler {
            fired: Arc::clone(&fired),
        }));

        manager.start().await.unwrap();

        for _ in 0..50 {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(fired.load(Ordering::SeqCst));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_invalid_operations() {
        let mut manager = ChildProcessManager::new(
            "sleep".to_string(),
            vec!["5".to_string()],
            HashMap::new(),
        );

        let result = manager.stop(StopMode::Graceful).await;
        assert!(matches!(result, Err(ProcessError::NotStarted)));

        manager.start().await.unwrap();
        let result = manager.start().await;
        assert!(matches!(result, Err(ProcessError::AlreadyStarted)));

        manager.stop(StopMode::Graceful).await.unwrap();
        let result = manager.stop(StopMode::Graceful).await;
        assert!(matches!(result, Err(ProcessError::NotStarted)));
    }

    #[tokio::test]
    async fn test_transport_taken_once_per_spawn() {
        let mut manager = ChildProcessManager::new(
            "sleep".to_string(),
            vec!["5".to_string()],
            HashMap::new(),
        );

        assert!(matches!(
            manager.take_transport(),
            Err(ProcessError::NotStarted)
        ));

        manager.start().await.unwrap();
        let _transport = manager.take_transport().unwrap();
        assert!(matches!(
            manager.take_transport(),
            Err(ProcessError::NotStarted)
        ));

        let _ = manager.stop(StopMode::Force).await;
    }

    #[test]
    fn test_process_state_accessors() {
        assert!(!ProcessState::NotStarted.is_running());
        assert!(ProcessState::NotStarted.pid().is_none());

        let running = ProcessState::Running { pid: 4242 };
        assert!(running.is_running());
        assert_eq!(running.pid(), Some(4242));

        assert!(!ProcessState::Stopped.is_running());
    }
}
