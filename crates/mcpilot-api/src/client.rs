//! Ollama `/api/chat` client.

use std::time::Duration;

use mcpilot_types::{ApiError, ChatRequest, ChatResponse};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::retry::{RetryConfig, calculate_delay, is_retryable};

/// Client for an Ollama-compatible chat endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    retry_config: RetryConfig,
}

impl OllamaClient {
    /// Create a client. `timeout` bounds each request end to end.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            retry_config: RetryConfig::default(),
        })
    }

    /// Set the retry configuration for transient errors (429, 5xx, network).
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a non-streaming chat request.
    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ApiError> {
        let url = format!("{}/api/chat", self.base_url);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let max_retries = self.retry_config.max_retries;
        let mut attempt = 0;
        loop {
            tracing::debug!(
                model = %request.model,
                messages = request.messages.len(),
                tools = request.tools.len(),
                "POST {url} (attempt {}/{})",
                attempt + 1,
                max_retries + 1
            );

            let err = match self
                .http
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = parse_retry_after(response.headers());
                    let body_text = response
                        .text()
                        .await
                        .map_err(|e| ApiError::Network(e.to_string()))?;

                    if status.is_success() {
                        return parse_chat_response(&body_text);
                    }
                    classify_error(status.as_u16(), &body_text, &request.model, retry_after)
                }
                Err(e) if e.is_timeout() => ApiError::Timeout,
                Err(e) => ApiError::Network(e.to_string()),
            };

            if !is_retryable(&err) || attempt >= max_retries {
                return Err(err);
            }

            let delay = calculate_delay(&self.retry_config, attempt, &err);
            tracing::warn!(
                "Retryable API error (attempt {}/{}): {err}. Retrying in {}ms...",
                attempt + 1,
                max_retries + 1,
                delay.as_millis(),
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64)
}

/// Ollama reports errors as `{"error": "..."}`, sometimes with a 200 status.
#[derive(serde::Deserialize)]
struct ErrorBody {
    error: String,
}

fn parse_chat_response(body: &str) -> Result<ChatResponse, ApiError> {
    if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(body) {
        return Err(ApiError::Server {
            status: 200,
            message: error,
        });
    }
    serde_json::from_str(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, model: &str, retry_after: Option<u64>) -> ApiError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());

    match status {
        404 if message.contains("not found") => ApiError::ModelNotFound {
            model: model.to_string(),
        },
        400 | 404 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        _ => ApiError::Server { status, message },
    }
}
