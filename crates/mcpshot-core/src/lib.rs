//! mcpshot core - platform-independent pieces of the one-shot stdio RPC client
//!
//! Wire types, line framing, response collection, process traits and the
//! transport that runs every batch in a fresh process. Platform crates supply
//! the concrete `ProcessLauncher`.

mod codec;
mod collector;
mod config;
mod error;
mod framer;
mod launcher;
mod process;
mod protocol;
mod transport;

pub use codec::*;
pub use collector::*;
pub use config::*;
pub use error::*;
pub use framer::*;
pub use launcher::*;
pub use process::*;
pub use protocol::*;
pub use transport::*;
