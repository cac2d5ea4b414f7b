//! HTTP front for a stdio tool server: one inbound request, one fresh process.

use crate::factory::PlatformLauncher;
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use derive_builder::Builder;
use mcpshot_core::{
    DEFAULT_READ_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, McpShotError, ProcessLauncher, RunnerConfig,
    relay_first_line,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Request body ceiling when none is configured
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 1_048_576;

pub const DEFAULT_RELAY_PORT: u16 = 8091;

#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct RelayConfig {
    #[builder(default = "SocketAddr::from(([127, 0, 0, 1], DEFAULT_RELAY_PORT))")]
    pub bind: SocketAddr,
    /// Bearer token; `None` or empty disables the check
    #[builder(default)]
    pub token: Option<String>,
    /// Command line of the tool server, run through `shell -lc`
    pub server_cmd: String,
    #[builder(default)]
    pub server_cwd: Option<PathBuf>,
    #[builder(default = "\"bash\".to_string()")]
    pub shell: String,
    #[builder(default = "DEFAULT_MAX_CONTENT_LENGTH")]
    pub max_content_length: usize,
    #[builder(default = "DEFAULT_READ_TIMEOUT")]
    pub read_timeout: Duration,
    #[builder(default = "DEFAULT_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Duration,
}

impl RelayConfig {
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::default()
    }

    /// Launch configuration for the fronted tool server
    pub fn runner_config(&self) -> Result<RunnerConfig, RelayError> {
        let mut builder = RunnerConfig::builder();
        builder
            .name("relay")
            .shell_command(&self.shell, &self.server_cmd)
            .read_timeout(self.read_timeout)
            .shutdown_timeout(self.shutdown_timeout);
        if let Some(cwd) = &self.server_cwd {
            builder.working_directory(cwd.clone());
        }
        builder
            .build()
            .map_err(|e| RelayError::Configuration(e.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("tool server produced no output")]
    EmptyOutput { stderr: String },

    #[error("tool server failure: {0}")]
    Upstream(McpShotError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<McpShotError> for RelayError {
    fn from(error: McpShotError) -> Self {
        match error {
            McpShotError::EmptyOutput { stderr } => RelayError::EmptyOutput { stderr },
            other => RelayError::Upstream(other),
        }
    }
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::EmptyOutput { .. } | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        // Details stay in the log; clients only see a short reason
        let message = match &self {
            Self::Unauthorized => "unauthorized",
            Self::PayloadTooLarge => "payload too large",
            Self::InvalidJson(_) => "invalid json",
            Self::EmptyOutput { stderr } => {
                warn!(stderr = %stderr.trim(), "Tool server produced no output");
                "empty output"
            }
            Self::Upstream(e) => {
                warn!(error = %e, "Tool server call failed");
                "upstream failure"
            }
            Self::Configuration(_) | Self::Io(_) => {
                error!(error = %self, "Relay internal error");
                "internal error"
            }
        };

        (self.status_code(), Json(json!({ "error": message }))).into_response()
    }
}

/// Shared relay state: the launcher for the fronted server and the token gate
pub struct RelayState<L: ProcessLauncher> {
    launcher: Arc<L>,
    token: Option<String>,
    max_content_length: usize,
}

impl<L: ProcessLauncher> RelayState<L> {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let runner_config = config.runner_config()?;
        Ok(Self {
            launcher: Arc::new(L::new(&runner_config)),
            token: config.token.clone().filter(|t| !t.is_empty()),
            max_content_length: config.max_content_length,
        })
    }

    /// Processes spawned since the relay started
    pub fn spawn_count(&self) -> u64 {
        self.launcher.spawn_count()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.token else {
            return true;
        };
        let expected = format!("Bearer {token}");
        let presented = headers
            .get(header::AUTHORIZATION)
            .map(|v| v.as_bytes())
            .unwrap_or_default();
        presented.ct_eq(expected.as_bytes()).into()
    }
}

pub fn router<L: ProcessLauncher + 'static>(state: Arc<RelayState<L>>) -> Router {
    let limit = state.max_content_length;
    Router::new()
        .route("/call", post(call::<L>))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn call<L: ProcessLauncher + 'static>(
    State(state): State<Arc<RelayState<L>>>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, RelayError> {
    if !state.authorized(&headers) {
        return Err(RelayError::Unauthorized);
    }

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            RelayError::PayloadTooLarge
        } else {
            RelayError::InvalidJson(rejection.body_text())
        }
    })?;
    let payload: Value =
        serde_json::from_slice(&body).map_err(|e| RelayError::InvalidJson(e.to_string()))?;

    debug!(bytes = body.len(), "Relaying request");
    let line = relay_first_line(&state.launcher, &payload).await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], line).into_response())
}

/// Bind and serve until `shutdown` is cancelled
pub async fn serve(config: RelayConfig, shutdown: CancellationToken) -> Result<(), RelayError> {
    let state = Arc::new(RelayState::<PlatformLauncher>::new(&config)?);
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!(
        addr = %listener.local_addr()?,
        server_cmd = %config.server_cmd,
        auth = state.token.is_some(),
        "Relay listening"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Relay shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(RelayError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            RelayError::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            RelayError::InvalidJson("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::from(McpShotError::EmptyOutput {
                stderr: String::new()
            })
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::from(McpShotError::ReadTimeout(Duration::from_secs(1))).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_responses_do_not_leak_details() {
        let response = RelayError::EmptyOutput {
            stderr: "secret traceback".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::builder()
            .server_cmd("python3 mcp_server.py")
            .build()
            .unwrap();
        assert_eq!(config.bind.port(), DEFAULT_RELAY_PORT);
        assert_eq!(config.max_content_length, DEFAULT_MAX_CONTENT_LENGTH);
        assert!(config.token.is_none());

        let runner = config.runner_config().unwrap();
        assert_eq!(runner.command, "bash");
        assert_eq!(runner.args, vec!["-lc", "python3 mcp_server.py"]);
    }

    #[test]
    fn test_empty_token_disables_auth() {
        let config = RelayConfig::builder()
            .server_cmd("true")
            .token("")
            .build()
            .unwrap();
        let state = RelayState::<PlatformLauncher>::new(&config).unwrap();
        assert!(state.authorized(&HeaderMap::new()));
    }

    #[test]
    fn test_token_comparison() {
        let config = RelayConfig::builder()
            .server_cmd("true")
            .token("s3cret")
            .build()
            .unwrap();
        let state = RelayState::<PlatformLauncher>::new(&config).unwrap();

        let mut headers = HeaderMap::new();
        assert!(!state.authorized(&headers));
        headers.insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
        assert!(!state.authorized(&headers));
        headers.insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
        assert!(state.authorized(&headers));
    }
}
