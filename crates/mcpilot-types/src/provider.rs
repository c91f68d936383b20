//! Provider trait for chat-completion backends.

use crate::{ApiError, ChatRequest, ChatResponse};
use std::future::Future;
use std::pin::Pin;

/// Trait for language model backends.
///
/// Dyn-compatible so the orchestrator works with `Arc<dyn ModelProvider>`.
pub trait ModelProvider: Send + Sync {
    /// Send a non-streaming chat request and return the model's reply.
    fn chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, ApiError>> + Send + 'a>>;

    /// Provider name for logging/display (e.g., "ollama").
    fn name(&self) -> &str;
}
