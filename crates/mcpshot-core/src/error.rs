use crate::process::ProcessId;
use crate::protocol::RequestId;
use std::time::Duration;
use thiserror::Error;

/// Core error types for one-shot stdio RPC operations
#[derive(Error, Debug)]
pub enum McpShotError {
    #[error("Failed to launch '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write request {index} of batch: {source}{}", stderr_suffix(.stderr))]
    Write {
        index: usize,
        #[source]
        source: std::io::Error,
        stderr: String,
    },

    #[error("Server produced no output{}", stderr_suffix(.stderr))]
    EmptyOutput { stderr: String },

    #[error("Malformed response line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Session could not be established: {reason}")]
    SessionEstablish { reason: String, raw: Option<String> },

    #[error("Server error [{code}]: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    #[error("Tool '{tool}' reported an error: {message}")]
    Tool { tool: String, message: String },

    #[error("Response id {actual} does not match request id {expected}")]
    UnexpectedResponse {
        expected: RequestId,
        actual: RequestId,
    },

    #[error("Timed out after {0:?} waiting for server output")]
    ReadTimeout(Duration),

    #[error("Process {} did not exit within {waited:?}", display_pid(.pid))]
    CleanupTimeout {
        pid: Option<ProcessId>,
        waited: Duration,
    },

    #[error("Line exceeds the {0} byte limit")]
    LineTooLong(usize),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpShotError {
    /// Raw diagnostic text worth showing an operator: captured stderr or the
    /// offending output line.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            McpShotError::Write { stderr, .. } | McpShotError::EmptyOutput { stderr } => {
                Some(stderr.as_str()).filter(|s| !s.trim().is_empty())
            }
            McpShotError::Parse { line, .. } => Some(line.as_str()),
            McpShotError::SessionEstablish { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }

    /// Resource-cleanup failures are distinct from protocol failures
    pub fn is_cleanup_failure(&self) -> bool {
        matches!(self, McpShotError::CleanupTimeout { .. })
    }

    /// Check if the remote side broke the line protocol
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            McpShotError::EmptyOutput { .. }
                | McpShotError::Parse { .. }
                | McpShotError::UnexpectedResponse { .. }
                | McpShotError::LineTooLong(_)
        )
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" | stderr: {trimmed}")
    }
}

fn display_pid(pid: &Option<ProcessId>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "<exited>".to_string())
}
