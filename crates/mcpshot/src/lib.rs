//! mcpshot - talk to line-delimited JSON-RPC tool servers one process at a time
//!
//! The platform-specific launcher is picked at compile time. On top of the
//! one-shot transport this crate layers session continuity, the scripted
//! guide flows, an HTTP relay and a deployment artifact generator.

pub mod deploy;
mod factory;
pub mod flows;
pub mod relay;
pub mod session;

pub use factory::*;
pub use flows::{CoachingFlow, CoachingReport, DemoReport, StudentDemo};
pub use relay::{RelayConfig, RelayError, RelayState};
pub use session::{CallRecord, Established, SessionClient, SessionSummary, Unstarted};

// Re-export core functionality
pub use mcpshot_core::*;
