//! Ollama-compatible chat API client for mcpilot.

mod client;
mod provider;
mod retry;

pub use client::OllamaClient;
pub use provider::OllamaProvider;
pub use retry::RetryConfig;
