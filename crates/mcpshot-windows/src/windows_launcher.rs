use crate::windows_process_manager::{WindowsProcessHandle, WindowsProcessManager, taskkill_blocking};
use async_trait::async_trait;
use mcpshot_core::{
    McpShotError, ProcessHandle, ProcessId, ProcessLauncher, ProcessLauncherFactory,
    ProcessLifecycle, ProcessManager, ProcessStatus, ProcessTermination, RunnerConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Windows implementation of `ProcessLauncher`
pub struct WindowsLauncher {
    platform_manager: Arc<WindowsProcessManager>,
    active_processes: Arc<Mutex<HashMap<ProcessId, String>>>,
    spawned: AtomicU64,
    runner_config: RunnerConfig,
}

impl WindowsLauncher {
    fn tracked(&self) -> Vec<ProcessId> {
        self.active_processes
            .lock()
            .map(|active| active.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessLauncher for WindowsLauncher {
    type Handle = WindowsProcessHandle;

    fn new(config: &RunnerConfig) -> Self {
        Self {
            platform_manager: Arc::new(WindowsProcessManager::new()),
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

        if let (Some(pid), Ok(mut active)) = (handle.get_pid(), self.active_processes.lock()) {
            active.insert(pid, format!("{}:{}", config.name, config.command));
        }
        Ok(handle)
    }

    async fn release(&self, handle: &mut Self::Handle) -> Result<ProcessStatus, McpShotError> {
        let pid = handle.get_pid();
        let result = self
            .platform_manager
            .shutdown_within(handle, self.runner_config.shutdown_timeout)
            .await;
        if let (Some(pid), Ok(mut active)) = (pid, self.active_processes.lock()) {
            active.remove(&pid);
        }
        debug!(?pid, ok = result.is_ok(), "Released process");
        result
    }

    fn abandon(&self, mut handle: Self::Handle) {
        let pid = handle.get_pid();
        self.platform_manager.kill_now(&mut handle);
        if let (Some(pid), Ok(mut active)) = (pid, self.active_processes.lock()) {
            active.remove(&pid);
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

impl Drop for WindowsLauncher {
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
            if let Err(e) = taskkill_blocking(pid.0) {
                tracing::error!(%pid, error = %e, "taskkill failed during drop");
            }
        }
    }
}

/// Factory for creating Windows launchers
pub struct WindowsLauncherFactory;

impl ProcessLauncherFactory for WindowsLauncherFactory {
    type Launcher = WindowsLauncher;

    fn create_launcher(config: &RunnerConfig) -> Self::Launcher {
        WindowsLauncher::new(config)
    }
}
