use crate::config::RunnerConfig;
use crate::error::McpShotError;
use crate::process::{ProcessHandle, ProcessStatus};
use async_trait::async_trait;

/// Config-aware process launcher used by the one-shot transport.
///
/// Implementations are provided by the platform crates. They compose a
/// low-level `ProcessManager` for the actual spawn and termination work and
/// track every pid they start so nothing outlives the launcher.
///
/// ```rust,no_run
/// use mcpshot_core::{ProcessLauncher, RunnerConfig};
///
/// async fn run<L: ProcessLauncher>() -> Result<(), mcpshot_core::McpShotError> {
///     let config = RunnerConfig::builder()
///         .name("guide")
///         .command("python3")
///         .args(["mcp_server.py"])
///         .build()
///         .map_err(|e| mcpshot_core::McpShotError::Configuration(e.to_string()))?;
///     let launcher = L::new(&config);
///     let mut handle = launcher.launch().await?;
///     launcher.release(&mut handle).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    type Handle: ProcessHandle + 'static;

    fn new(runner_config: &RunnerConfig) -> Self
    where
        Self: Sized;

    fn config(&self) -> &RunnerConfig;

    /// Spawn one fresh process for the configured tool server with piped stdio.
    /// Fails with `McpShotError::Launch` when the executable cannot be started.
    async fn launch(&self) -> Result<Self::Handle, McpShotError>;

    /// Terminate and reap `handle` within `RunnerConfig::shutdown_timeout`,
    /// then stop tracking it.
    ///
    /// The caller keeps ownership until this returns, so a cancelled release
    /// can still fall back to `abandon`.
    async fn release(&self, handle: &mut Self::Handle) -> Result<ProcessStatus, McpShotError>;

    /// Synchronous teardown for a process whose call was dropped before
    /// release: kill it without waiting and stop tracking it.
    fn abandon(&self, handle: Self::Handle);

    /// Number of spawn attempts made so far
    fn spawn_count(&self) -> u64;

    /// Number of processes currently tracked
    fn active_count(&self) -> usize;
}

/// Factory trait for creating platform-specific launchers
pub trait ProcessLauncherFactory {
    type Launcher: ProcessLauncher;

    fn create_launcher(config: &RunnerConfig) -> Self::Launcher;
}
