//! JSON-RPC 2.0 framing for the stdio transport.
//!
//! Outgoing requests and notifications share one envelope; they differ only
//! in whether an `id` is present. Incoming lines are classified before being
//! matched against pending requests.

use serde::{Deserialize, Serialize};

const VERSION: &str = "2.0";

/// An outgoing message. Without an `id` it is a notification.
#[derive(Debug, Clone, Serialize)]
pub struct Outgoing<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

impl<'a> Outgoing<'a> {
    pub fn request(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id: Some(id),
            method,
            params,
        }
    }

    pub fn notification(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: VERSION,
            id: None,
            method,
            params,
        }
    }

    /// Serialize to a single line, without the trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A server's reply to one of our requests.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// A classified line from the server.
#[derive(Debug)]
pub enum Incoming {
    Response(JsonRpcResponse),
    /// A request or notification the server sent on its own initiative.
    ServerMessage { method: String },
}

impl Incoming {
    /// Parse one line. Anything carrying a `method` is server-initiated,
    /// even if its `id` collides with one of ours.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
            return Ok(Self::ServerMessage {
                method: method.to_string(),
            });
        }
        serde_json::from_value(value).map(Self::Response)
    }
}
