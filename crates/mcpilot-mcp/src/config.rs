//! Configuration types for MCP servers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

fn default_connect_timeout() -> u64 {
    30_000
}

fn default_discovery_timeout() -> u64 {
    10_000
}

fn default_call_timeout() -> u64 {
    120_000
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_max_concurrent_connections() -> usize {
    8
}

/// Top-level MCP configuration (the `[mcp]` table).
///
/// Servers are keyed by logical name. The map is ordered, so descriptors
/// are produced (and registered) in name order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: BTreeMap<String, McpServerConfig>,
    /// Timeout for process start + `initialize` handshake.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Timeout for each tools/resources/prompts listing request.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_ms: u64,
    /// Timeout for `tools/call`, `resources/read` and `prompts/get`.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// How long to wait for a server to exit before killing it.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
    /// Maximum number of servers started at the same time.
    #[serde(default = "default_max_concurrent_connections")]
    pub max_concurrent_connections: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            connect_timeout_ms: default_connect_timeout(),
            discovery_timeout_ms: default_discovery_timeout(),
            call_timeout_ms: default_call_timeout(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            max_concurrent_connections: default_max_concurrent_connections(),
        }
    }
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Command to run (e.g., "npx", "python").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables to set for the server process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Identifies one tool server process: logical name plus launch details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ServerDescriptor {
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }
}

/// Per-operation timeouts for tool server communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub discovery: Duration,
    pub call: Duration,
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        McpConfig::default().timeouts()
    }
}

impl McpConfig {
    /// Server descriptors in name order.
    pub fn descriptors(&self) -> Vec<ServerDescriptor> {
        self.servers
            .iter()
            .map(|(name, server)| ServerDescriptor {
                name: name.clone(),
                command: server.command.clone(),
                args: server.args.clone(),
                env: server.env.clone(),
            })
            .collect()
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            discovery: Duration::from_millis(self.discovery_timeout_ms),
            call: Duration::from_millis(self.call_timeout_ms),
            shutdown: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }
}
