//! Multi-step sessions carried across independent process invocations.
//!
//! Every call runs as its own `[initialize, tools/call]` batch. Continuity
//! comes only from the session identifier the server issues on the first
//! call, which is injected into the arguments of every later call.

use mcpshot_core::{
    Batch, McpShotError, Request, RequestId, ResponseLine, ToolPayload, Transport,
};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Argument key the session identifier travels under
pub const SESSION_ID_KEY: &str = "session_id";

/// First domain request id; id 1 belongs to `initialize`
const FIRST_CALL_ID: u64 = 2;

pub struct Unstarted;

pub struct Established;

/// One domain call as it was sent
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: u64,
    pub tool: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub calls: Vec<CallRecord>,
}

pub struct SessionClient<Status, T: Transport> {
    transport: T,
    next_id: u64,
    session_id: Option<String>,
    calls: Vec<CallRecord>,
    _status: PhantomData<Status>,
}

impl<T: Transport> SessionClient<Unstarted, T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            next_id: FIRST_CALL_ID,
            session_id: None,
            calls: Vec::new(),
            _status: PhantomData,
        }
    }

    /// Run the handshake call and capture the session identifier from its payload.
    ///
    /// Any failure, including a payload without a non-empty `session_id`,
    /// is a `SessionEstablish` error and ends the session.
    pub async fn establish(
        mut self,
        tool: &str,
        arguments: Value,
    ) -> Result<(SessionClient<Established, T>, ToolPayload), McpShotError> {
        let line = self.run_call(tool, arguments).await.map_err(|e| {
            McpShotError::SessionEstablish {
                reason: e.to_string(),
                raw: e.diagnostic().map(str::to_string),
            }
        })?;

        let raw = line.raw.clone();
        let payload = ToolPayload::from_response(tool, &line.raw, line.response).map_err(|e| {
            McpShotError::SessionEstablish {
                reason: e.to_string(),
                raw: Some(raw.clone()),
            }
        })?;

        let session_id = match payload.str_field(SESSION_ID_KEY) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(McpShotError::SessionEstablish {
                    reason: format!("'{tool}' result carries no {SESSION_ID_KEY}"),
                    raw: Some(raw),
                });
            }
        };
        info!(%session_id, tool, "Session established");

        Ok((
            SessionClient {
                transport: self.transport,
                next_id: self.next_id,
                session_id: Some(session_id),
                calls: self.calls,
                _status: PhantomData,
            },
            payload,
        ))
    }
}

impl<T: Transport> SessionClient<Established, T> {
    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or_default()
    }

    /// Run one domain call with the session identifier injected into `arguments`
    pub async fn call(&mut self, tool: &str, arguments: Value) -> Result<ToolPayload, McpShotError> {
        let mut arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(McpShotError::InvalidBatch(format!(
                    "arguments for '{tool}' must be a JSON object, got {other}"
                )));
            }
        };
        arguments.insert(
            SESSION_ID_KEY.to_string(),
            Value::String(self.session_id().to_string()),
        );

        let line = self.run_call(tool, Value::Object(arguments)).await?;
        ToolPayload::from_response(tool, &line.raw, line.response)
    }

    pub fn close(self) -> SessionSummary {
        debug!(calls = self.calls.len(), "Session closed");
        SessionSummary {
            session_id: self.session_id.unwrap_or_default(),
            calls: self.calls,
        }
    }
}

impl<Status, T: Transport> SessionClient<Status, T> {
    /// Calls issued so far, in order
    pub fn calls(&self) -> &[CallRecord] {
        &self.calls
    }

    /// One fresh `[initialize, tools/call]` batch; returns the last response line
    async fn run_call(&mut self, tool: &str, arguments: Value) -> Result<ResponseLine, McpShotError> {
        let id = self.next_id;
        self.next_id += 1;

        let batch = Batch::for_call(Request::tool_call(id, tool, arguments.clone()))?;
        self.calls.push(CallRecord {
            id,
            tool: tool.to_string(),
            arguments,
        });
        debug!(id, tool, "Calling tool");

        let mut collected = self.transport.exchange(&batch).await?;
        if let Some(cleanup) = &collected.cleanup_error {
            warn!(tool, error = %cleanup, "Call succeeded but process cleanup failed");
        }

        let line = collected.lines.pop().ok_or(McpShotError::EmptyOutput {
            stderr: collected.stderr,
        })?;
        let expected = RequestId::Number(id);
        if line.response.id != expected {
            return Err(McpShotError::UnexpectedResponse {
                expected,
                actual: line.response.id,
            });
        }
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mcpshot_core::{Collected, Response};
    use serde_json::json;
    use std::collections::VecDeque;

    /// Replies to each batch with canned output lines and records what was sent
    #[derive(Default)]
    struct ScriptedTransport {
        replies: VecDeque<Vec<String>>,
        sent: Vec<Batch>,
        pending: bool,
    }

    impl ScriptedTransport {
        fn replying(replies: Vec<Vec<String>>) -> Self {
            Self {
                replies: replies.into(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&mut self, batch: &Batch) -> Result<(), McpShotError> {
            self.sent.push(batch.clone());
            self.pending = true;
            Ok(())
        }

        async fn receive(&mut self) -> Result<Collected, McpShotError> {
            assert!(self.pending, "receive without send");
            self.pending = false;
            let raw_lines = self.replies.pop_front().unwrap_or_default();
            if raw_lines.is_empty() {
                return Err(McpShotError::EmptyOutput {
                    stderr: "Traceback: boom".to_string(),
                });
            }
            let lines = raw_lines
                .into_iter()
                .map(|raw| {
                    let response = Response::parse_line(&raw)?;
                    Ok(ResponseLine { raw, response })
                })
                .collect::<Result<Vec<_>, McpShotError>>()?;
            Ok(Collected {
                lines,
                ..Default::default()
            })
        }
    }

    fn init_line() -> String {
        r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05"}}"#.to_string()
    }

    fn text_line(id: u64, data: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {"content": [{"type": "text", "text": data.to_string()}]}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_session_id_is_threaded_through_every_call() {
        let transport = ScriptedTransport::replying(vec![
            vec![init_line(), text_line(2, json!({"session_id": "s-42"}))],
            vec![init_line(), text_line(3, json!({"ok": true}))],
            vec![init_line(), text_line(4, json!({"ok": true}))],
        ]);

        let (mut session, handshake) = SessionClient::new(transport)
            .establish("guide_handshake", json!({"user_key": "dev123", "name": "Lydia"}))
            .await
            .unwrap();
        assert_eq!(session.session_id(), "s-42");
        assert_eq!(handshake.str_field("session_id"), Some("s-42"));

        session
            .call("set_intent", json!({"purpose": "argue"}))
            .await
            .unwrap();
        session.call("export_session", Value::Null).await.unwrap();

        let summary = session.close();
        assert_eq!(summary.session_id, "s-42");
        let ids: Vec<u64> = summary.calls.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        for call in &summary.calls[1..] {
            assert_eq!(call.arguments[SESSION_ID_KEY], "s-42");
        }
        assert!(summary.calls[0].arguments.get(SESSION_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn test_every_batch_starts_with_initialize() {
        let transport = ScriptedTransport::replying(vec![vec![
            init_line(),
            text_line(2, json!({"session_id": "s-1"})),
        ]]);
        let (session, _) = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .unwrap();

        let sent = &session.transport.sent;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].requests()[0].method, "initialize");
        assert_eq!(sent[0].requests()[0].id, RequestId::Number(1));
        assert_eq!(sent[0].last().tool_name(), Some("guide_handshake"));
    }

    #[tokio::test]
    async fn test_missing_session_id_fails_establishment() {
        let transport = ScriptedTransport::replying(vec![vec![
            init_line(),
            text_line(2, json!({"greeting": "hi"})),
        ]]);
        let err = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .err()
            .unwrap();
        match err {
            McpShotError::SessionEstablish { raw, .. } => {
                assert!(raw.unwrap().contains("greeting"));
            }
            other => panic!("expected SessionEstablish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_output_fails_establishment_with_stderr() {
        let transport = ScriptedTransport::replying(vec![vec![]]);
        let err = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpShotError::SessionEstablish { .. }));
        assert_eq!(err.diagnostic(), Some("Traceback: boom"));
    }

    #[tokio::test]
    async fn test_last_line_must_answer_the_call() {
        // server stopped after initialize
        let transport = ScriptedTransport::replying(vec![vec![init_line()]]);
        let err = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .err()
            .unwrap();
        match err {
            McpShotError::SessionEstablish { reason, .. } => {
                assert!(reason.contains("does not match"), "{reason}");
            }
            other => panic!("expected SessionEstablish, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rpc_error_after_establishment() {
        let transport = ScriptedTransport::replying(vec![
            vec![init_line(), text_line(2, json!({"session_id": "s-1"}))],
            vec![
                init_line(),
                r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32602,"message":"unknown session"}}"#
                    .to_string(),
            ],
        ]);
        let (mut session, _) = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .unwrap();

        match session.call("set_intent", json!({})).await.unwrap_err() {
            McpShotError::Rpc { code, message, .. } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown session");
            }
            other => panic!("expected Rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_object_arguments_are_rejected() {
        let transport = ScriptedTransport::replying(vec![vec![
            init_line(),
            text_line(2, json!({"session_id": "s-1"})),
        ]]);
        let (mut session, _) = SessionClient::new(transport)
            .establish("guide_handshake", json!({}))
            .await
            .unwrap();

        let err = session.call("add_excerpt", json!(["text"])).await.unwrap_err();
        assert!(matches!(err, McpShotError::InvalidBatch(_)));
        assert_eq!(session.calls().len(), 1);
        assert_eq!(session.transport.sent.len(), 1);
    }
}
