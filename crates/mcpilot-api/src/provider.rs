//! Ollama provider implementation.

use crate::client::OllamaClient;
use crate::retry::RetryConfig;
use mcpilot_types::provider::ModelProvider;
use mcpilot_types::{ApiError, ChatRequest, ChatResponse};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Ollama chat provider.
///
/// Wraps `OllamaClient` and implements the `ModelProvider` trait. Retry
/// logic stays in the client.
#[derive(Clone)]
pub struct OllamaProvider {
    client: OllamaClient,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        Ok(Self {
            client: OllamaClient::new(base_url, timeout)?,
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }
}

impl ModelProvider for OllamaProvider {
    fn chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatResponse, ApiError>> + Send + 'a>> {
        Box::pin(self.client.chat(request))
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn ollama_provider_name() {
        let provider = OllamaProvider::new("http://localhost:11434", Duration::from_secs(5)).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn ollama_provider_as_trait_object() {
        let provider = OllamaProvider::new("http://localhost:11434", Duration::from_secs(5))
            .unwrap()
            .with_retry_config(RetryConfig::with_retries(2));
        let shared: Arc<dyn ModelProvider> = Arc::new(provider);
        assert_eq!(shared.name(), "ollama");
    }
}
