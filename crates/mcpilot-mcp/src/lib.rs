//! MCP (Model Context Protocol) client implementation for mcpilot.
//!
//! Supports stdio-based MCP servers that communicate via newline-delimited
//! JSON-RPC 2.0 messages. Each configured server is spawned as a child process,
//! initialized with a handshake, and its tools, resources and prompts are
//! discovered and merged into a single [`CapabilityRegistry`].

pub mod capability;
pub mod client;
pub mod config;
pub mod error;
pub mod jsonrpc;
pub mod registry;
pub mod schema;
mod transport;

pub use capability::{
    CapabilityKind, PromptArgument, PromptInfo, PromptMessage, PromptResult, ResourceContents,
    ResourceInfo, ServerCapabilities, ToolInfo,
};
pub use client::ToolServerClient;
pub use config::{McpConfig, McpServerConfig, ServerDescriptor, Timeouts};
pub use error::{CallError, ConnectionError};
pub use registry::{CapabilityRegistry, InitializeSummary, RouteOverride, ServerSummary};
