//! Error types for MCP operations.

use thiserror::Error;

/// Errors while starting a server and performing the `initialize` handshake.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to launch MCP server '{server}': {source}")]
    LaunchFailed {
        server: String,
        source: std::io::Error,
    },

    #[error("MCP server '{server}' did not complete the handshake within {timeout_ms}ms")]
    HandshakeTimeout { server: String, timeout_ms: u64 },

    #[error("MCP server '{server}' handshake failed: {message}")]
    ProtocolMismatch { server: String, message: String },
}

/// Errors from requests to a connected server.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("MCP server '{server}' timed out on '{method}' after {timeout_ms}ms")]
    Timeout {
        server: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("JSON-RPC error from '{server}' (code {code}): {message}")]
    JsonRpc {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP protocol error from '{server}': {message}")]
    Protocol { server: String, message: String },

    #[error("MCP server '{server}' connection is closed")]
    TransportClosed { server: String },

    #[error("'{key}' not found or server not mapped")]
    NotRouted { key: String },

    #[error("MCP server '{server}' is not connected")]
    ServerUnavailable { server: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
