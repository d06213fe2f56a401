//! JSON-RPC 2.0 Wire Format
//!
//! One JSON value per line on the helper's stdin/stdout. Only requests carry an
//! id; notifications never get a reply.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub const JSONRPC_VERSION: &str = "2.0";

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Best-effort read of a reply's `error` member. Anything that is not a
    /// well-formed error object still answers the call, as an internal error
    /// carrying the raw value.
    fn from_raw(error: &Value) -> Self {
        serde_json::from_value(error.clone()).unwrap_or_else(|_| Self {
            code: INTERNAL_ERROR,
            message: format!("malformed error object: {error}"),
            data: Some(error.clone()),
        })
    }
}

/// Response frame. `id` stays a raw value so replies to server-initiated
/// requests can echo whatever id the helper chose.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl JsonRpcResponse {
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id,
            result: None,
            error: Some(ErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// A parsed line from the helper
#[derive(Clone, Debug, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests
    Response {
        id: u64,
        outcome: Result<Value, ErrorObject>,
    },
    /// Helper-initiated request; we must answer it
    Request { id: Value, method: String },
    Notification { method: String, params: Option<Value> },
}

impl Incoming {
    /// `Ok(None)` is valid JSON that is not a frame we can route (including
    /// responses whose id we could never have issued).
    pub fn parse(line: &str) -> serde_json::Result<Option<Self>> {
        let value: Value = serde_json::from_str(line)?;
        let Some(frame) = value.as_object() else {
            return Ok(None);
        };

        if let Some(method) = frame.get("method").and_then(Value::as_str) {
            let method = method.to_string();
            return Ok(Some(match frame.get("id") {
                Some(id) if !id.is_null() => Self::Request { id: id.clone(), method },
                _ => Self::Notification {
                    method,
                    params: frame.get("params").cloned(),
                },
            }));
        }

        let Some(id) = frame.get("id").and_then(Value::as_u64) else {
            return Ok(None);
        };
        let outcome = match frame.get("error") {
            Some(error) if !error.is_null() => Err(ErrorObject::from_raw(error)),
            _ => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
        };
        Ok(Some(Self::Response { id, outcome }))
    }
}

/// Params of the `initialize` request
pub fn initialize_params(client_name: &str, client_version: &str) -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {"name": client_name, "version": client_version},
    })
}

/// One entry of a `tools/list` result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListToolsPage {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    pub next_cursor: Option<String>,
}

/// Content item of a `tools/call` result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

/// Result of `tools/call`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Text items joined by newlines
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(text.as_str()),
                ContentItem::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
