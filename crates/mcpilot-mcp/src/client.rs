//! MCP client for a single server connection.
//!
//! Handles the MCP protocol handshake (initialize + initialized notification),
//! capability discovery (tools/resources/prompts listing), and invocation
//! (tools/call, resources/read, prompts/get).

use crate::capability::{
    PromptInfo, PromptResult, ResourceContents, ResourceInfo, ServerCapabilities, ToolInfo,
};
use crate::config::{ServerDescriptor, Timeouts};
use crate::error::{CallError, ConnectionError};
use crate::transport::StdioTransport;
use mcpilot_types::{ToolCallResult, ToolContent};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::time::Duration;

/// MCP protocol version we request.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Protocol versions we can talk to.
const SUPPORTED_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

/// Upper bound on `nextCursor` pages followed per listing.
const MAX_LIST_PAGES: usize = 64;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeResult {
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(default)]
    server_info: Option<ServerInfo>,
}

#[derive(Deserialize)]
struct ServerInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
struct ToolCallResponse {
    #[serde(default)]
    content: Vec<ToolContent>,
    #[serde(default, rename = "isError")]
    is_error: bool,
}

#[derive(Deserialize)]
struct ReadResourceResponse {
    contents: Vec<ResourceContents>,
}

/// Client for a single MCP server.
pub struct ToolServerClient {
    name: String,
    transport: StdioTransport,
    capabilities: ServerCapabilities,
    timeouts: Timeouts,
    tools: Vec<ToolInfo>,
    resources: Vec<ResourceInfo>,
    prompts: Vec<PromptInfo>,
}

impl ToolServerClient {
    /// Launch the server and perform the `initialize` handshake.
    ///
    /// The handshake is bounded by `timeouts.connect`. On failure the
    /// process is shut down before the error is returned.
    pub async fn connect(
        descriptor: &ServerDescriptor,
        timeouts: Timeouts,
    ) -> Result<Self, ConnectionError> {
        let transport = StdioTransport::spawn(descriptor)?;

        match handshake(&descriptor.name, &transport, timeouts.connect).await {
            Ok(capabilities) => Ok(Self {
                name: descriptor.name.clone(),
                transport,
                capabilities,
                timeouts,
                tools: Vec::new(),
                resources: Vec::new(),
                prompts: Vec::new(),
            }),
            Err(e) => {
                transport.shutdown(timeouts.shutdown).await;
                Err(e)
            }
        }
    }

    /// Fetch and cache tools, resources and prompts.
    ///
    /// A failed listing is logged and leaves that kind empty; the connection
    /// stays usable for calls.
    pub async fn discover(&mut self) {
        self.tools = self.list_tools().await.unwrap_or_else(|e| {
            tracing::warn!(server = %self.name, "Tool discovery failed: {e}");
            Vec::new()
        });
        self.resources = self.list_resources().await.unwrap_or_else(|e| {
            tracing::warn!(server = %self.name, "Resource discovery failed: {e}");
            Vec::new()
        });
        self.prompts = self.list_prompts().await.unwrap_or_else(|e| {
            tracing::warn!(server = %self.name, "Prompt discovery failed: {e}");
            Vec::new()
        });

        tracing::info!(
            server = %self.name,
            tools = self.tools.len(),
            resources = self.resources.len(),
            prompts = self.prompts.len(),
            "MCP server capabilities discovered"
        );
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, CallError> {
        if !self.capabilities.tools {
            return Ok(Vec::new());
        }
        self.list_paged("tools/list", "tools").await
    }

    pub async fn list_resources(&self) -> Result<Vec<ResourceInfo>, CallError> {
        if !self.capabilities.resources {
            return Ok(Vec::new());
        }
        self.list_paged("resources/list", "resources").await
    }

    pub async fn list_prompts(&self) -> Result<Vec<PromptInfo>, CallError> {
        if !self.capabilities.prompts {
            return Ok(Vec::new());
        }
        self.list_paged("prompts/list", "prompts").await
    }

    /// Call a tool on this server.
    ///
    /// Never fails: timeouts, transport problems and protocol errors are
    /// returned as an error result describing what went wrong.
    pub async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value) -> ToolCallResult {
        match self.try_call_tool(tool_name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(server = %self.name, tool = tool_name, "Tool call failed: {e}");
                ToolCallResult::error(format!("Error calling tool '{tool_name}': {e}"))
            }
        }
    }

    async fn try_call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<ToolCallResult, CallError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        let result = self
            .request("tools/call", Some(params), self.timeouts.call)
            .await?;
        let response: ToolCallResponse = serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("Failed to parse tools/call result: {e}")))?;

        Ok(ToolCallResult {
            content: response.content,
            is_error: response.is_error,
        })
    }

    /// Read a resource by URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, CallError> {
        let params = serde_json::json!({ "uri": uri });
        let result = self
            .request("resources/read", Some(params), self.timeouts.call)
            .await?;
        let response: ReadResourceResponse = serde_json::from_value(result).map_err(|e| {
            self.protocol_error(format!("Failed to parse resources/read result: {e}"))
        })?;
        Ok(response.contents)
    }

    /// Render a prompt with the given arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<PromptResult, CallError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self
            .request("prompts/get", Some(params), self.timeouts.call)
            .await?;
        serde_json::from_value(result)
            .map_err(|e| self.protocol_error(format!("Failed to parse prompts/get result: {e}")))
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, CallError> {
        let resp = self.transport.send_request(method, params, timeout).await?;

        if let Some(err) = resp.error {
            return Err(CallError::JsonRpc {
                server: self.name.clone(),
                code: err.code,
                message: err.message,
            });
        }

        resp.result
            .ok_or_else(|| self.protocol_error(format!("{method} response has neither result nor error")))
    }

    /// Fetch every page of a listing, following `nextCursor`.
    async fn list_paged<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
    ) -> Result<Vec<T>, CallError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| serde_json::json!({ "cursor": c }));
            let mut result = self.request(method, params, self.timeouts.discovery).await?;

            let page = result.get_mut(field).map(serde_json::Value::take).ok_or_else(|| {
                self.protocol_error(format!("{method} response is missing '{field}'"))
            })?;
            let serde_json::Value::Array(entries) = page else {
                return Err(self.protocol_error(format!("{method} '{field}' is not an array")));
            };
            items.extend(parse_entries(&self.name, method, entries));

            cursor = result
                .get("nextCursor")
                .and_then(|c| c.as_str())
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(
            server = %self.name,
            "{method} returned more than {MAX_LIST_PAGES} pages, keeping the first {}",
            items.len()
        );
        Ok(items)
    }

    fn protocol_error(&self, message: String) -> CallError {
        CallError::Protocol {
            server: self.name.clone(),
            message,
        }
    }

    /// Tools discovered by the last `discover` call.
    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    pub fn resources(&self) -> &[ResourceInfo] {
        &self.resources
    }

    pub fn prompts(&self) -> &[PromptInfo] {
        &self.prompts
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.capabilities
    }

    /// Get the server name.
    pub fn server_name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Shut down the server connection. Best-effort and idempotent.
    pub async fn close(&self) {
        self.transport.shutdown(self.timeouts.shutdown).await;
        tracing::debug!(server = %self.name, "MCP server closed");
    }
}

/// Run `initialize` + `notifications/initialized` and return what the
/// server advertised.
async fn handshake(
    server: &str,
    transport: &StdioTransport,
    timeout: Duration,
) -> Result<ServerCapabilities, ConnectionError> {
    let mismatch = |message: String| ConnectionError::ProtocolMismatch {
        server: server.to_string(),
        message,
    };

    let init_params = serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "mcpilot",
            "version": env!("CARGO_PKG_VERSION")
        }
    });

    let resp = transport
        .send_request("initialize", Some(init_params), timeout)
        .await
        .map_err(|e| match e {
            CallError::Timeout { timeout_ms, .. } => ConnectionError::HandshakeTimeout {
                server: server.to_string(),
                timeout_ms,
            },
            other => mismatch(other.to_string()),
        })?;

    if let Some(err) = resp.error {
        return Err(mismatch(format!(
            "initialize returned error {}: {}",
            err.code, err.message
        )));
    }
    let result = resp
        .result
        .ok_or_else(|| mismatch("initialize response has no result".to_string()))?;
    let init: InitializeResult = serde_json::from_value(result)
        .map_err(|e| mismatch(format!("Failed to parse initialize result: {e}")))?;

    if !SUPPORTED_VERSIONS.contains(&init.protocol_version.as_str()) {
        return Err(mismatch(format!(
            "unsupported protocol version '{}'",
            init.protocol_version
        )));
    }

    transport
        .send_notification("notifications/initialized", None)
        .await
        .map_err(|e| mismatch(e.to_string()))?;

    match &init.server_info {
        Some(info) => tracing::info!(
            server,
            "Connected to MCP server {} {} (protocol {})",
            info.name,
            info.version.as_deref().unwrap_or("?"),
            init.protocol_version
        ),
        None => tracing::info!(server, "Connected to MCP server (protocol {})", init.protocol_version),
    }

    Ok(init.capabilities)
}

/// Parse listing entries one by one; a malformed entry is logged and
/// skipped so the rest of the page survives.
fn parse_entries<T: DeserializeOwned>(
    server: &str,
    method: &str,
    entries: Vec<serde_json::Value>,
) -> Vec<T> {
    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value(entry) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(server = %server, "Skipping malformed {method} entry {index}: {e}");
                None
            }
        })
        .collect()
}
