//! Capability registry: owns every server connection and routes calls.
//!
//! Capabilities from all servers are merged into three namespaces (tools,
//! resources, prompts). Each namespace has a route table from key to owning
//! server. When two servers declare the same key the later registration
//! wins; the override is logged and reported in the [`InitializeSummary`].
//!
//! Route tables are only mutated by `initialize` and `shutdown`. Callers
//! must not run those while sessions are using the registry.

use crate::capability::{
    CapabilityKind, PromptInfo, PromptResult, ResourceContents, ResourceInfo, ToolInfo,
};
use crate::client::ToolServerClient;
use crate::config::{McpConfig, ServerDescriptor, Timeouts};
use crate::error::{CallError, ConnectionError};
use crate::schema;
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream;
use mcpilot_types::{ToolCallResult, ToolDefinition, ToolExecutor};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A route that was overwritten by a later server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOverride {
    pub kind: CapabilityKind,
    pub key: String,
    pub previous: String,
    pub current: String,
}

/// Outcome of [`CapabilityRegistry::initialize`].
#[derive(Debug, Default)]
pub struct InitializeSummary {
    /// Servers that connected, in registration order.
    pub connected: Vec<String>,
    /// Servers that failed to connect, with the reason.
    pub failed: Vec<(String, String)>,
    pub overridden: Vec<RouteOverride>,
}

/// Connection state and capability counts for one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSummary {
    pub name: String,
    pub alive: bool,
    pub tools: usize,
    pub resources: usize,
    pub prompts: usize,
}

#[derive(Default)]
struct RegistryState {
    clients: HashMap<String, Arc<ToolServerClient>>,
    tool_routes: BTreeMap<String, String>,
    resource_routes: BTreeMap<String, String>,
    prompt_routes: BTreeMap<String, String>,
}

impl RegistryState {
    fn routes(&self, kind: CapabilityKind) -> &BTreeMap<String, String> {
        match kind {
            CapabilityKind::Tool => &self.tool_routes,
            CapabilityKind::Resource => &self.resource_routes,
            CapabilityKind::Prompt => &self.prompt_routes,
        }
    }

    fn routes_mut(&mut self, kind: CapabilityKind) -> &mut BTreeMap<String, String> {
        match kind {
            CapabilityKind::Tool => &mut self.tool_routes,
            CapabilityKind::Resource => &mut self.resource_routes,
            CapabilityKind::Prompt => &mut self.prompt_routes,
        }
    }
}

/// Aggregates capabilities from all connected tool servers.
pub struct CapabilityRegistry {
    timeouts: Timeouts,
    max_concurrent_connections: usize,
    state: RwLock<RegistryState>,
}

impl CapabilityRegistry {
    pub fn new(timeouts: Timeouts, max_concurrent_connections: usize) -> Self {
        Self {
            timeouts,
            max_concurrent_connections: max_concurrent_connections.max(1),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn from_config(config: &McpConfig) -> Self {
        Self::new(config.timeouts(), config.max_concurrent_connections)
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connect to every server and discover its capabilities.
    ///
    /// Servers start concurrently; a failing server never blocks or aborts
    /// the others. Successful connections are registered in descriptor
    /// order, which makes the last-write-wins policy deterministic.
    pub async fn initialize(&self, descriptors: &[ServerDescriptor]) -> InitializeSummary {
        let timeouts = self.timeouts;
        let results: Vec<Result<ToolServerClient, ConnectionError>> = stream::iter(descriptors)
            .map(|descriptor| async move {
                let mut client = ToolServerClient::connect(descriptor, timeouts).await?;
                client.discover().await;
                Ok::<_, ConnectionError>(client)
            })
            .buffered(self.max_concurrent_connections)
            .collect()
            .await;

        let mut summary = InitializeSummary::default();
        let mut replaced = Vec::new();

        for (descriptor, result) in descriptors.iter().zip(results) {
            match result {
                Ok(client) => {
                    summary.connected.push(descriptor.name.clone());
                    if let Some(old) = self.register(client, &mut summary.overridden) {
                        replaced.push(old);
                    }
                }
                Err(e) => {
                    tracing::warn!(server = %descriptor.name, "Failed to start MCP server: {e}");
                    summary.failed.push((descriptor.name.clone(), e.to_string()));
                }
            }
        }

        join_all(replaced.iter().map(|client| client.close())).await;

        tracing::info!(
            connected = summary.connected.len(),
            failed = summary.failed.len(),
            tools = self.read().tool_routes.len(),
            "MCP registry initialized"
        );
        summary
    }

    /// Add a connected client and its routes. Returns a client previously
    /// registered under the same name, which the caller must close.
    fn register(
        &self,
        client: ToolServerClient,
        overrides: &mut Vec<RouteOverride>,
    ) -> Option<Arc<ToolServerClient>> {
        let server = client.server_name().to_string();
        let keys = [
            (
                CapabilityKind::Tool,
                client.tools().iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
            ),
            (
                CapabilityKind::Resource,
                client.resources().iter().map(|r| r.uri.clone()).collect(),
            ),
            (
                CapabilityKind::Prompt,
                client.prompts().iter().map(|p| p.name.clone()).collect(),
            ),
        ];

        let mut state = self.write();
        for (kind, names) in keys {
            let routes = state.routes_mut(kind);
            // Drop routes left from an earlier registration of this server.
            routes.retain(|_, owner| *owner != server);
            for key in names {
                if let Some(previous) = routes.insert(key.clone(), server.clone()) {
                    if previous != server {
                        tracing::warn!(
                            "Duplicate {kind} '{key}': '{server}' overrides '{previous}'"
                        );
                        overrides.push(RouteOverride {
                            kind,
                            key,
                            previous,
                            current: server.clone(),
                        });
                    }
                }
            }
        }
        state.clients.insert(server, Arc::new(client))
    }

    /// Every routed capability of one kind, resolved through its live client.
    fn collect_routed<T, S, K>(&self, kind: CapabilityKind, select: S, key_of: K) -> Vec<T>
    where
        T: Clone,
        S: Fn(&ToolServerClient) -> &[T],
        K: Fn(&T) -> &str,
    {
        let state = self.read();
        state
            .routes(kind)
            .iter()
            .filter_map(|(key, server)| {
                let client = state.clients.get(server).filter(|c| c.is_alive())?;
                select(client).iter().find(|item| key_of(item) == key).cloned()
            })
            .collect()
    }

    /// All tools, one per name, ordered by name.
    pub fn all_tools(&self) -> Vec<ToolInfo> {
        self.collect_routed(CapabilityKind::Tool, ToolServerClient::tools, |t| t.name.as_str())
    }

    /// All resources, one per URI, ordered by URI.
    pub fn all_resources(&self) -> Vec<ResourceInfo> {
        self.collect_routed(CapabilityKind::Resource, ToolServerClient::resources, |r| {
            r.uri.as_str()
        })
    }

    /// All prompts, one per name, ordered by name.
    pub fn all_prompts(&self) -> Vec<PromptInfo> {
        self.collect_routed(CapabilityKind::Prompt, ToolServerClient::prompts, |p| p.name.as_str())
    }

    /// Tool definitions for the model API.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.all_tools().iter().map(schema::tool_definition).collect()
    }

    /// The server that owns `key`, if any.
    pub fn route(&self, kind: CapabilityKind, key: &str) -> Option<String> {
        self.read().routes(kind).get(key).cloned()
    }

    fn resolve(&self, kind: CapabilityKind, key: &str) -> Result<Arc<ToolServerClient>, CallError> {
        let state = self.read();
        let not_routed = || CallError::NotRouted {
            key: key.to_string(),
        };
        let server = state.routes(kind).get(key).ok_or_else(not_routed)?;
        let client = state.clients.get(server).ok_or_else(not_routed)?;
        if !client.is_alive() {
            return Err(CallError::ServerUnavailable {
                server: server.clone(),
            });
        }
        Ok(Arc::clone(client))
    }

    /// Call a tool on whichever server owns it.
    ///
    /// Routing failures come back as error results, never as faults.
    pub async fn call_tool(&self, name: &str, arguments: serde_json::Value) -> ToolCallResult {
        match self.resolve(CapabilityKind::Tool, name) {
            Ok(client) => client.call_tool(name, arguments).await,
            Err(CallError::ServerUnavailable { server }) => {
                tracing::warn!(tool = name, "MCP server '{server}' is not connected");
                ToolCallResult::error(format!(
                    "Error: server '{server}' for tool '{name}' is not connected"
                ))
            }
            Err(_) => {
                tracing::warn!(tool = name, "Tool not found or server not mapped");
                ToolCallResult::error(format!(
                    "Error: tool '{name}' not found or server not mapped"
                ))
            }
        }
    }

    /// Read a resource from the server that owns its URI.
    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, CallError> {
        let client = self.resolve(CapabilityKind::Resource, uri)?;
        client.read_resource(uri).await
    }

    /// Render a prompt on the server that owns it.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &BTreeMap<String, String>,
    ) -> Result<PromptResult, CallError> {
        let client = self.resolve(CapabilityKind::Prompt, name)?;
        client.get_prompt(name, arguments).await
    }

    /// Connected servers and their capability counts, ordered by name.
    pub fn server_summary(&self) -> Vec<ServerSummary> {
        let state = self.read();
        let mut summary: Vec<ServerSummary> = state
            .clients
            .values()
            .map(|c| ServerSummary {
                name: c.server_name().to_string(),
                alive: c.is_alive(),
                tools: c.tools().len(),
                resources: c.resources().len(),
                prompts: c.prompts().len(),
            })
            .collect();
        summary.sort_by(|a, b| a.name.cmp(&b.name));
        summary
    }

    /// Number of connected servers.
    pub fn client_count(&self) -> usize {
        self.read().clients.len()
    }

    /// Close every client and clear all routes. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<ToolServerClient>> = {
            let mut state = self.write();
            state.tool_routes.clear();
            state.resource_routes.clear();
            state.prompt_routes.clear();
            state.clients.drain().map(|(_, client)| client).collect()
        };
        if clients.is_empty() {
            return;
        }
        tracing::info!("Shutting down {} MCP server(s)", clients.len());
        join_all(clients.iter().map(|client| client.close())).await;
    }
}

impl ToolExecutor for CapabilityRegistry {
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = ToolCallResult> + Send + 'a>> {
        Box::pin(CapabilityRegistry::call_tool(self, name, arguments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::new(
            Timeouts {
                connect: Duration::from_millis(500),
                shutdown: Duration::from_millis(200),
                ..Timeouts::default()
            },
            4,
        )
    }

    #[tokio::test]
    async fn empty_initialize_connects_nothing() {
        let registry = registry();
        let summary = registry.initialize(&[]).await;
        assert!(summary.connected.is_empty());
        assert!(summary.failed.is_empty());
        assert_eq!(registry.client_count(), 0);
        assert!(registry.all_tools().is_empty());
        assert!(registry.tool_definitions().is_empty());
    }

    #[tokio::test]
    async fn failed_server_is_skipped() {
        let registry = registry();
        let descriptors = [
            ServerDescriptor::new("bad", "nonexistent_command_xyz123", vec![]),
            ServerDescriptor::new("mute", "sleep", vec!["10".to_string()]),
        ];
        let summary = registry.initialize(&descriptors).await;
        assert!(summary.connected.is_empty());
        let failed: Vec<&str> = summary.failed.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(failed, ["bad", "mute"]);
        assert_eq!(registry.client_count(), 0);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = registry();
        let result = registry
            .call_tool("nope", serde_json::json!({}))
            .await;
        assert!(result.is_error);
        assert!(result.output_text().contains("not found or server not mapped"));
    }

    #[tokio::test]
    async fn unknown_resource_and_prompt_are_not_routed() {
        let registry = registry();
        assert!(matches!(
            registry.read_resource("file:///x").await,
            Err(CallError::NotRouted { .. })
        ));
        assert!(matches!(
            registry.get_prompt("p", &BTreeMap::new()).await,
            Err(CallError::NotRouted { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let registry = registry();
        registry.shutdown().await;
        registry.shutdown().await;
        assert!(registry.server_summary().is_empty());
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let registry = CapabilityRegistry::new(Timeouts::default(), 0);
        assert_eq!(registry.max_concurrent_connections, 1);
    }

    #[test]
    fn registry_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CapabilityRegistry>();
    }
}
