//! JSON-RPC 2.0 message types for the line protocol spoken by tool servers.

use crate::error::McpShotError;
use derive_more::From;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Protocol version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the mandatory first request of every batch
pub const INITIALIZE_METHOD: &str = "initialize";

/// Method name of a domain tool invocation
pub const TOOLS_CALL_METHOD: &str = "tools/call";

/// Id reserved for the initialization request
pub const INIT_REQUEST_ID: u64 = 1;

/// JSON-RPC request id. Only unique within one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, From)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
    #[from(ignore)]
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "\"{s}\""),
            RequestId::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn initialize(id: u64) -> Self {
        Self::new(RequestId::Number(id), INITIALIZE_METHOD, None)
    }

    /// `tools/call` request; `name` precedes `arguments` on the wire
    pub fn tool_call(id: u64, name: &str, arguments: Value) -> Self {
        let mut params = Map::new();
        params.insert("name".to_string(), Value::String(name.to_string()));
        params.insert("arguments".to_string(), arguments);
        Self::new(
            RequestId::Number(id),
            TOOLS_CALL_METHOD,
            Some(Value::Object(params)),
        )
    }

    /// Tool name of a `tools/call` request
    pub fn tool_name(&self) -> Option<&str> {
        if self.method != TOOLS_CALL_METHOD {
            return None;
        }
        self.params.as_ref()?.get("name")?.as_str()
    }
}

/// JSON-RPC 2.0 response message (success or error)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// Parse one output line. Exactly one of `result`/`error` must be present.
    pub fn parse_line(line: &str) -> Result<Self, McpShotError> {
        let parse_error = |source| McpShotError::Parse {
            line: line.to_string(),
            source,
        };
        let response: Response = serde_json::from_str(line).map_err(parse_error)?;
        if response.result.is_some() == response.error.is_some() {
            return Err(parse_error(<serde_json::Error as serde::de::Error>::custom(
                "response must carry exactly one of result or error",
            )));
        }
        Ok(response)
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extract the result, converting an error object to `McpShotError::Rpc`
    pub fn into_result(self) -> Result<Value, McpShotError> {
        if let Some(err) = self.error {
            return Err(McpShotError::Rpc {
                code: err.code,
                message: err.message,
                data: err.data,
            });
        }

        self.result.ok_or(McpShotError::Rpc {
            code: error_codes::INTERNAL_ERROR,
            message: "response missing both result and error".into(),
            data: None,
        })
    }
}

/// An ordered set of requests written to one process invocation.
///
/// Always starts with the initialization request; ids are unique within the
/// batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    requests: Vec<Request>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    pub fn new() -> Self {
        Self {
            requests: vec![Request::initialize(INIT_REQUEST_ID)],
        }
    }

    /// Initialization plus a single domain request
    pub fn for_call(request: Request) -> Result<Self, McpShotError> {
        let mut batch = Self::new();
        batch.push(request)?;
        Ok(batch)
    }

    pub fn push(&mut self, request: Request) -> Result<(), McpShotError> {
        if self.requests.iter().any(|r| r.id == request.id) {
            return Err(McpShotError::InvalidBatch(format!(
                "duplicate request id {}",
                request.id
            )));
        }
        self.requests.push(request);
        Ok(())
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// The last request of the batch, the one callers read the answer of
    pub fn last(&self) -> &Request {
        // A batch is never empty: construction seeds the initialization request
        &self.requests[self.requests.len() - 1]
    }

    pub fn ids(&self) -> HashSet<&RequestId> {
        self.requests.iter().map(|r| &r.id).collect()
    }
}

/// Outcome of a `tools/call`: the raw response line plus decoded payload data.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPayload {
    pub tool: String,
    pub raw: String,
    pub result: Value,
    pub data: Option<Value>,
}

impl ToolPayload {
    pub fn from_response(tool: &str, raw: &str, response: Response) -> Result<Self, McpShotError> {
        let result = response.into_result()?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let message = first_text(&result).unwrap_or("tool returned an error").to_string();
            return Err(McpShotError::Tool {
                tool: tool.to_string(),
                message,
            });
        }

        let data = first_text(&result)
            .and_then(|text| serde_json::from_str::<Value>(text).ok())
            .or_else(|| result.get("structuredContent").cloned());

        Ok(Self {
            tool: tool.to_string(),
            raw: raw.to_string(),
            result,
            data,
        })
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.as_ref()?.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key)?.as_str()
    }
}

fn first_text(result: &Value) -> Option<&str> {
    result
        .get("content")?
        .as_array()?
        .iter()
        .find_map(|item| item.get("text").and_then(Value::as_str))
}

/// Well-known JSON-RPC error codes
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}
