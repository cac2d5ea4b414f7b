use crate::unix_process_manager::{UnixProcessHandle, UnixProcessManager};
use async_trait::async_trait;
use mcpshot_core::{
    McpShotError, ProcessHandle, ProcessId, ProcessLauncher, ProcessLauncherFactory,
    ProcessLifecycle, ProcessManager, ProcessStatus, ProcessTermination, RunnerConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Unix implementation of `ProcessLauncher`
///
/// Composes `UnixProcessManager` for the low-level work, tracks every live
/// process it started, and signals leftovers when dropped.
pub struct UnixLauncher {
    platform_manager: Arc<UnixProcessManager>,
    active_processes: Arc<Mutex<HashMap<ProcessId, String>>>,
    spawned: AtomicU64,
    runner_config: RunnerConfig,
}

impl UnixLauncher {
    fn track(&self, pid: ProcessId, label: String) {
        if let Ok(mut active) = self.active_processes.lock() {
            active.insert(pid, label);
        }
    }

    fn untrack(&self, pid: ProcessId) {
        if let Ok(mut active) = self.active_processes.lock() {
            active.remove(&pid);
        }
    }

    fn tracked(&self) -> Vec<ProcessId> {
        self.active_processes
            .lock()
            .map(|active| active.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessLauncher for UnixLauncher {
    type Handle = UnixProcessHandle;

    fn new(config: &RunnerConfig) -> Self {
        Self {
            platform_manager: Arc::new(UnixProcessManager::new()),
            active_processes: Arc::new(Mutex::new(HashMap::new())),
            spawned: AtomicU64::new(0),
            runner_config: config.clone(),
        }
    }

    fn config(&self) -> &RunnerConfig {
        &self.runner_config
    }

    async fn launch(&self) -> Result<Self::Handle, McpShotError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);

        let config = &self.runner_config;
        let handle = self
            .platform_manager
            .spawn_process(
                &config.command,
                &config.args,
                config.working_directory.as_deref(),
                &config.effective_env(),
            )
            .await
            .map_err(|source| McpShotError::Launch {
                command: config.display_command(),
                source,
            })?;

        if let Some(pid) = handle.get_pid() {
            self.track(pid, format!("{}:{}", config.name, config.command));
        }
        Ok(handle)
    }

    async fn release(&self, handle: &mut Self::Handle) -> Result<ProcessStatus, McpShotError> {
        let pid = handle.get_pid();
        let result = self
            .platform_manager
            .shutdown_within(handle, self.runner_config.shutdown_timeout)
            .await;
        if let Some(pid) = pid {
            self.untrack(pid);
        }
        debug!(?pid, ok = result.is_ok(), "Released process");
        result
    }

    fn abandon(&self, mut handle: Self::Handle) {
        let pid = handle.get_pid();
        self.platform_manager.kill_now(&mut handle);
        if let Some(pid) = pid {
            self.untrack(pid);
        }
        debug!(?pid, "Abandoned process");
    }

    fn spawn_count(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }

    fn active_count(&self) -> usize {
        self.tracked().len()
    }
}

impl Drop for UnixLauncher {
    fn drop(&mut self) {
        let active_processes = self.tracked();
        if active_processes.is_empty() {
            return;
        }

        warn!(
            count = active_processes.len(),
            "Emergency cleanup: terminating processes during drop"
        );

        for pid in active_processes {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid as NixPid;

            let nix_pid = NixPid::from_raw(pid.0 as i32);

            if let Err(e) = signal::kill(nix_pid, Signal::SIGTERM) {
                warn!(%pid, error = %e, "Failed to send SIGTERM during drop");

                if let Err(e) = signal::kill(nix_pid, Signal::SIGKILL) {
                    tracing::error!(%pid, error = %e, "Failed to send SIGKILL during drop");
                }
            }
        }
    }
}

/// Factory for creating Unix launchers
pub struct UnixLauncherFactory;

impl ProcessLauncherFactory for UnixLauncherFactory {
    type Launcher = UnixLauncher;

    fn create_launcher(config: &RunnerConfig) -> Self::Launcher {
        UnixLauncher::new(config)
    }
}
