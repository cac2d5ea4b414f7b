use async_trait::async_trait;
use mcpshot_core::{
    ChildPipes, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager, ProcessStatus,
    ProcessTermination, TerminationResult,
};
use std::collections::HashMap;
use std::io;
use std::path::Path;

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid as NixPid;
    use std::process::Stdio;
    use sysinfo::System;
    use tokio::process::{Child, Command};
    use tracing::{debug, info, warn};

    /// Unix-specific process handle implementation
    pub struct UnixProcessHandle {
        child: Child,
        command: String,
        args: Vec<String>,
    }

    impl UnixProcessHandle {
        pub fn new(child: Child, command: String, args: Vec<String>) -> Self {
            Self {
                child,
                command,
                args,
            }
        }
    }

    #[async_trait]
    impl ProcessHandle for UnixProcessHandle {
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

    /// Unix-specific process manager with process group and tree management
    pub struct UnixProcessManager {
        system: std::sync::Mutex<System>,
    }

    impl Default for UnixProcessManager {
        fn default() -> Self {
            <Self as ProcessManager>::new()
        }
    }

    #[async_trait]
    impl ProcessLifecycle for UnixProcessManager {
        type Handle = UnixProcessHandle;

        async fn spawn_process(
            &self,
            command: &str,
            args: &[String],
            working_dir: Option<&Path>,
            env: &HashMap<String, String>,
        ) -> io::Result<UnixProcessHandle> {
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

            // Own process group so termination reaches every descendant
            cmd.process_group(0);

            let child = cmd.spawn()?;

            if let Some(pid) = child.id() {
                info!(pid, command, ?args, "Spawned Unix process");
            }

            Ok(UnixProcessHandle::new(
                child,
                command.to_string(),
                args.to_vec(),
            ))
        }
    }

    #[async_trait]
    impl ProcessTermination for UnixProcessManager {
        async fn terminate_gracefully(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            match handle.get_pid() {
                Some(pid) => send_signal(pid, Signal::SIGTERM),
                None => TerminationResult::ProcessNotFound,
            }
        }

        async fn force_kill(&self, handle: &mut dyn ProcessHandle) -> TerminationResult {
            let Some(pid) = handle.get_pid() else {
                return TerminationResult::ProcessNotFound;
            };

            match signal::killpg(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                Ok(()) => info!(%pid, "Sent SIGKILL to process group"),
                Err(e) => debug!(%pid, error = %e, "SIGKILL to process group failed"),
            }

            match handle.start_kill() {
                Ok(()) => TerminationResult::Success,
                Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                    // already reaped
                    TerminationResult::ProcessNotFound
                }
                Err(e) => {
                    warn!(%pid, error = %e, "Failed to kill process");
                    TerminationResult::Failed(format!("SIGKILL failed: {e}"))
                }
            }
        }

        fn kill_now(&self, handle: &mut dyn ProcessHandle) {
            if let Some(pid) = handle.get_pid() {
                if let Err(e) = signal::killpg(NixPid::from_raw(pid.0 as i32), Signal::SIGKILL) {
                    debug!(%pid, error = %e, "SIGKILL to process group failed");
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
                sysinfo::ProcessRefreshKind::default(),
            );

            let mut children = Vec::new();
            Self::find_children_recursive(&system, parent_pid.0, &mut children);

            children.into_iter().map(ProcessId::from).collect()
        }

        async fn terminate_process_tree(&self, root_pid: ProcessId) -> TerminationResult {
            let children = self.find_child_processes(root_pid).await;
            if !children.is_empty() {
                info!(pid = %root_pid, count = children.len(), "Terminating child processes");
            }

            // Descendants come back deepest first
            for child_pid in children {
                match send_signal(child_pid, Signal::SIGTERM) {
                    TerminationResult::Success | TerminationResult::ProcessNotFound => {}
                    result => warn!(pid = %child_pid, ?result, "Failed to terminate child"),
                }
            }

            send_signal(root_pid, Signal::SIGTERM)
        }

        async fn terminate_process_group(&self, pid: ProcessId) -> TerminationResult {
            let pgid = NixPid::from_raw(pid.0 as i32);

            match signal::killpg(pgid, Signal::SIGTERM) {
                Ok(()) => {
                    info!(%pid, "Sent SIGTERM to process group");
                    TerminationResult::Success
                }
                Err(Errno::ESRCH) => {
                    debug!(%pid, "Process group not found");
                    TerminationResult::ProcessNotFound
                }
                Err(Errno::EPERM) => {
                    warn!(%pid, "Permission denied to terminate process group");
                    TerminationResult::AccessDenied
                }
                Err(e) => {
                    warn!(%pid, error = %e, "Failed to send SIGTERM to process group");
                    TerminationResult::Failed(format!("SIGTERM to process group failed: {e}"))
                }
            }
        }
    }

    impl UnixProcessManager {
        /// Recursively find all child processes
        fn find_children_recursive(system: &System, parent_pid: u32, result: &mut Vec<u32>) {
            for (pid, process) in system.processes() {
                if process.parent().map(|p| p.as_u32()) == Some(parent_pid) {
                    let child_pid = pid.as_u32();
                    // Grandchildren first
                    Self::find_children_recursive(system, child_pid, result);
                    result.push(child_pid);
                }
            }
        }
    }

    fn send_signal(pid: ProcessId, sig: Signal) -> TerminationResult {
        match signal::kill(NixPid::from_raw(pid.0 as i32), sig) {
            Ok(()) => {
                debug!(%pid, signal = %sig, "Signal sent");
                TerminationResult::Success
            }
            Err(Errno::ESRCH) => TerminationResult::ProcessNotFound,
            Err(Errno::EPERM) => {
                warn!(%pid, signal = %sig, "Permission denied");
                TerminationResult::AccessDenied
            }
            Err(e) => TerminationResult::Failed(format!("{sig} failed: {e}")),
        }
    }

    impl ProcessManager for UnixProcessManager {
        fn new() -> Self {
            debug!("Initializing Unix process manager");
            Self {
                system: std::sync::Mutex::new(System::new()),
            }
        }

        fn platform_name(&self) -> &'static str {
            "Unix"
        }
    }
}

#[cfg(unix)]
pub use unix_impl::{UnixProcessHandle, UnixProcessManager};
