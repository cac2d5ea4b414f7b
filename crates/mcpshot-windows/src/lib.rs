//! Windows-specific process management implementation

mod windows_launcher;
mod windows_process_manager;

pub use windows_launcher::{WindowsLauncher, WindowsLauncherFactory};
pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};
