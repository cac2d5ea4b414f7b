use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::process::Stdio;
use sysinfo::System;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use mcpshot_core::{
    ChildPipes, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, TerminationResult,
};

/// CREATE_NO_WINDOW: run tool servers without a console popup
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    command: String,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
        Self {
            child,
            command,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }

    fn get_command(&self) -> &str {
        &self.command
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    async fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn try_wait(&mut self) -> io::Result<Option<ProcessStatus>> {
        Ok(self.child.try_wait()?.map(ProcessStatus::Exited))
    }

    async fn wait(&mut self) -> io::Result<ProcessStatus> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status))
    }

    fn start_kill(&mut self) -> io::Result<()> {
        self.child.start_kill()
    }

    fn take_pipes(&mut self) -> ChildPipes {
        ChildPipes {
            stdin: self.child.stdin.take(),
            stdout: self.child.stdout.take(),
            stderr: self.child.stderr.take(),
        }
    }
}

/// Windows-specific process manager with process tree management
pub struct WindowsProcessManager {
    system: std::sync::Mutex<System>,
}

impl Default for WindowsProcessManager {
    fn default() -> Self {
        <Self as ProcessManager>::new()
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    type Handle = WindowsProcessHandle;

    async fn spawn_process(
        &self,
        command: &str,
        args: &[String],
        working_dir: Option<&Path>,
        env: &HashMap<String, String>,
    ) -> io::Result<WindowsProcessHandle> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(windows)]
        {
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        let child = cmd.spawn()?;

        if let Some(pid) = child.id() {
            info!(
                pid = %pid,
                command = %command,
                args = ?args,
                "Spawned Windows process"
            );
        }

        Ok(WindowsProcessHandle::new(
            child,
            command.to_string(),
            args.to_vec(),
        ))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        let Some(pid) = handle.get_pid() else {
            return TerminationResult::ProcessNotFound;
        };
        match taskkill(pid.0, &[]).await {
            Ok(true) => {
                info!(pid = %pid, "Sent graceful termination to process");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(pid = %pid, error = %e, "Failed to gracefully terminate process");
                TerminationResult::Failed(format!("Graceful termination failed: {e}"))
            }
        }
    }

    async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
        if let Some(pid) = handle.get_pid() {
            match taskkill(pid.0, &["/F", "/T"]).await {
                Ok(true) => info!(pid = %pid, "Force killed process tree"),
                Ok(false) => debug!(pid = %pid, "taskkill found nothing to kill"),
                Err(e) => warn!(pid = %pid, error = %e, "taskkill failed"),
            }
        }

        match handle.start_kill() {
            Ok(()) => TerminationResult::Success,
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => TerminationResult::ProcessNotFound,
            Err(e) => TerminationResult::Failed(format!("Force kill failed: {e}")),
        }
    }

    fn kill_now(&self, handle: &mut dyn ProcessHandle) {
        if let Some(pid) = handle.get_pid() {
            // Not awaited
            if let Err(e) = taskkill_detached(pid.0) {
                debug!(pid = %pid, error = %e, "taskkill spawn failed");
            }
        }
        if let Err(e) = handle.start_kill() {
            debug!(command = %handle.get_command(), error = %e, "Immediate kill failed");
        }
    }

    async fn find_child_processes(&self, parent_pid: ProcessId) -> Vec<ProcessId> {
        let Ok(mut system) = self.system.lock() else {
            warn!("Process table lock poisoned");
            return Vec::new();
        };
        system.refresh_processes_specifics(
            sysinfo::ProcessesToUpdate::All,
            true,
            sysinfo::ProcessRefreshKind::everything(),
        );

        let mut children = Vec::new();
        Self::find_children_recursive(&system, parent_pid.0, &mut children);

        children.into_iter().map(ProcessId::from).collect()
    }

    async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
        match taskkill(root_pid.0, &["/T"]).await {
            Ok(true) => {
                info!(root_pid = %root_pid, "Sent termination to process tree");
                TerminationResult::Success
            }
            Ok(false) => TerminationResult::ProcessNotFound,
            Err(e) => {
                warn!(root_pid = %root_pid, error = %e, "taskkill /T failed, terminating children one by one");

                // Children first
                for child_pid in self.find_child_processes(root_pid).await {
                    if let Err(e) = taskkill(child_pid.0, &[]).await {
                        warn!(pid = %child_pid, error = %e, "Failed to terminate child process");
                    }
                }
                match taskkill(root_pid.0, &[]).await {
                    Ok(true) => TerminationResult::Success,
                    Ok(false) => TerminationResult::ProcessNotFound,
                    Err(e) => TerminationResult::Failed(format!("Tree termination failed: {e}")),
                }
            }
        }
    }

    async fn terminate_process_group(&self, _pid: ProcessId) -> TerminationResult {
        // No Unix-style process groups on Windows
        TerminationResult::ProcessNotFound
    }
}

impl WindowsProcessManager {
    /// Recursively find all child processes
    fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
        for (pid, process) in system.processes() {
            if process.parent().map(|p| p.as_u32()) == Some(parent_pid) {
                let child_pid = pid.as_u32();
                Self::find_children_recursive(system, child_pid, result);
                result.push(child_pid);
            }
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn new() -> Self {
        debug!("Initializing Windows process manager");
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }

    fn platform_name(&self) -> &'static str {
        "Windows"
    }
}

/// Run `taskkill /PID <pid>` with extra flags. `Ok(false)` means no such process.
async fn taskkill(pid: u32, flags: &[&str]) -> io::Result<bool> {
    let output = Command::new("taskkill")
        .args(flags)
        .args(["/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;

    Ok(output.status.success())
}

/// Blocking variant for drop paths
pub(crate) fn taskkill_blocking(pid: u32) -> io::Result<bool> {
    let output = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()?;

    Ok(output.status.success())
}

/// Start `taskkill /F /T` without waiting for it
fn taskkill_detached(pid: u32) -> io::Result<()> {
    std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(drop)
}
