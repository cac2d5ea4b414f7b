use crate::error::McpShotError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout};
use tracing::{debug, info, warn};

/// Unique identifier for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::From)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process after termination
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Process is currently running
    Running,
    /// Process exited with status information
    Exited(std::process::ExitStatus),
    /// Process was terminated by a signal (Unix) or forcibly terminated (Windows)
    Terminated,
    Unknown,
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    AccessDenied,
    Timeout,
    Failed(String),
}

/// Standard streams of a freshly spawned child. Each is taken at most once.
#[derive(Debug, Default)]
pub struct ChildPipes {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
}

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    fn get_command(&self) -> &str;

    fn get_args(&self) -> &[String];

    /// Check if the process is still running (non-blocking)
    async fn is_running(&mut self) -> bool;

    /// Try to get exit status without blocking
    async fn try_wait(&mut self) -> io::Result<Option<ProcessStatus>>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> io::Result<ProcessStatus>;

    /// Send the platform kill without waiting for exit
    fn start_kill(&mut self) -> io::Result<()>;

    /// Hand out the stdio pipes; later calls return empty pipes
    fn take_pipes(&mut self) -> ChildPipes;
}

/// Core trait for process lifecycle management
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    type Handle: ProcessHandle;

    /// Spawn a new process with piped stdio
    async fn spawn_process(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> io::Result<Self::Handle>;

    /// Wait for a process to exit with optional timeout
    async fn wait_for_exit(
        &self,
        handle: &mut Self::Handle,
        timeout: Option<Duration>,
    ) -> io::Result<ProcessStatus> {
        match timeout {
            Some(bound) => match tokio::time::timeout(bound, handle.wait()).await {
                Ok(status) => status,
                Err(_) => Ok(ProcessStatus::Running),
            },
            None => handle.wait().await,
        }
    }
}

/// Trait for process termination including process trees
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Terminate a single process gracefully (SIGTERM on Unix)
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    /// Force kill a single process (SIGKILL on Unix)
    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult;

    async fn find_child_processes(&self, pid: ProcessId) -> Vec<ProcessId>;

    /// Terminate an entire process tree (parent and all descendants)
    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult;

    /// Terminate a process group (Unix only, returns ProcessNotFound on Windows)
    async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult;

    /// Kill without waiting, for drop paths that cannot await.
    /// Platforms override this to reach the whole process group.
    fn kill_now(&self, handle: &mut dyn ProcessHandle) {
        if let Err(e) = handle.start_kill() {
            debug!(command = %handle.get_command(), error = %e, "Immediate kill failed");
        }
    }

    /// Bounded teardown: graceful stop, wait at most `bound`, then force kill.
    ///
    /// Never blocks longer than `bound` plus the cost of issuing the kill. A
    /// child that outlives the bound is reported as `CleanupTimeout`; reaping
    /// the killed process is left to the runtime.
    async fn shutdown_within(
        &self,
        handle: &mut dyn ProcessHandle,
        bound: Duration,
    ) -> Result<ProcessStatus, McpShotError> {
        if let Some(status) = handle.try_wait().await? {
            debug!(command = %handle.get_command(), "Process already exited");
            return Ok(status);
        }

        // Escalation order: process group, then process tree, then the single process
        let pid = handle.get_pid();
        let mut graceful = TerminationResult::ProcessNotFound;
        if let Some(pid) = pid {
            graceful = self.terminate_process_group(pid).await;
            if graceful != TerminationResult::Success {
                graceful = self.terminate_process_tree(pid).await;
            }
        }
        if graceful != TerminationResult::Success {
            graceful = self.terminate_gracefully(handle).await;
        }
        debug!(?pid, ?graceful, "Sent graceful termination");

        match tokio::time::timeout(bound, handle.wait()).await {
            Ok(status) => {
                let status = status?;
                info!(?pid, ?status, "Process terminated");
                Ok(status)
            }
            Err(_) => {
                warn!(?pid, waited = ?bound, "Process ignored termination, force killing");
                let forced = self.force_kill(handle).await;
                debug!(?pid, ?forced, "Force kill issued");
                Err(McpShotError::CleanupTimeout { pid, waited: bound })
            }
        }
    }
}

/// Lifecycle and termination combined into one platform manager
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    fn new() -> Self
    where
        Self: Sized;

    /// Platform name for logging
    fn platform_name(&self) -> &'static str;
}
