//! Unix-specific process management implementation
#![cfg(unix)]

mod unix_launcher;
mod unix_process_manager;

pub use unix_launcher::{UnixLauncher, UnixLauncherFactory};
pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};
