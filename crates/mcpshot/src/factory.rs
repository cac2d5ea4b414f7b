use mcpshot_core::{OneShotTransport, ProcessLauncherFactory, RunnerConfig};
use std::sync::Arc;

/// Launcher type for the platform this binary was built for
#[cfg(unix)]
pub type PlatformLauncher = mcpshot_unix::UnixLauncher;

#[cfg(windows)]
pub type PlatformLauncher = mcpshot_windows::WindowsLauncher;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformLauncherFactory;

impl ProcessLauncherFactory for PlatformLauncherFactory {
    type Launcher = PlatformLauncher;

    fn create_launcher(config: &RunnerConfig) -> Self::Launcher {
        #[cfg(unix)]
        return mcpshot_unix::UnixLauncherFactory::create_launcher(config);

        #[cfg(windows)]
        return mcpshot_windows::WindowsLauncherFactory::create_launcher(config);
    }
}

impl PlatformLauncherFactory {
    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return "unix";

        #[cfg(windows)]
        return "windows";
    }

    /// One-shot transport over a fresh platform launcher
    pub fn transport(config: &RunnerConfig) -> OneShotTransport<PlatformLauncher> {
        OneShotTransport::new(Arc::new(Self::create_launcher(config)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpshot_core::ProcessLauncher;

    #[test]
    fn test_platform_detection() {
        let config = RunnerConfig::builder()
            .name("guide")
            .command("python3")
            .build()
            .unwrap();
        let launcher = PlatformLauncherFactory::create_launcher(&config);
        assert_eq!(launcher.spawn_count(), 0);
        assert!(["unix", "windows"].contains(&PlatformLauncherFactory::platform_name()));
    }
}
