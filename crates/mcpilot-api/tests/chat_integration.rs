//! Integration tests for `OllamaClient` against a raw TCP test server.
//!
//! The server answers each incoming connection with the next canned HTTP
//! response and records the request body it received.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcpilot_api::{OllamaClient, RetryConfig};
use mcpilot_types::{ApiError, ChatMessage, ChatRequest, Role, ToolDefinition, TranslatedSchema};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn http_response(status: &str, body: &str, extra_headers: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         {extra_headers}\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len(),
    )
}

fn http_200(body: &str) -> String {
    http_response("200 OK", body, "")
}

fn http_429() -> String {
    http_response("429 Too Many Requests", r#"{"error":"slow down"}"#, "Retry-After: 0.01\r\n")
}

fn http_500() -> String {
    http_response("500 Internal Server Error", r#"{"error":"boom"}"#, "")
}

const TEXT_REPLY: &str = r#"{"model":"test","message":{"role":"assistant","content":"Retried OK"},"done":true,"done_reason":"stop"}"#;

const TOOL_REPLY: &str = r#"{"model":"test","message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"search","arguments":{"q":"rust"}}}]},"done":true}"#;

/// Read one HTTP request (headers plus `Content-Length` body) and return the body.
async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|l| {
                    let (name, value) = l.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return String::from_utf8_lossy(&buf[header_end + 4..]).into_owned();
            }
        }
    }
    String::new()
}

struct TestServer {
    base_url: String,
    requests: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<String>>>,
}

/// Start a test TCP server that returns `responses` in order, one per connection.
async fn start_test_server(responses: Vec<String>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let bodies = Arc::new(Mutex::new(Vec::new()));

    let counter = Arc::clone(&requests);
    let recorded = Arc::clone(&bodies);
    tokio::spawn(async move {
        let responses = Arc::new(responses);
        while let Ok((mut socket, _)) = listener.accept().await {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            let responses = Arc::clone(&responses);
            let recorded = Arc::clone(&recorded);

            tokio::spawn(async move {
                let body = read_request(&mut socket).await;
                recorded.lock().unwrap().push(body);
                if let Some(response) = responses.get(idx) {
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.flush().await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    TestServer {
        base_url: format!("http://{addr}"),
        requests,
        bodies,
    }
}

fn make_client(base_url: &str, max_retries: u32) -> OllamaClient {
    OllamaClient::new(base_url, Duration::from_secs(5))
        .unwrap()
        .with_retry_config(RetryConfig {
            max_retries,
            initial_delay_ms: 10,
            max_delay_ms: 100,
            backoff_factor: 2.0,
            jitter: 0.0,
        })
}

fn test_request() -> ChatRequest {
    ChatRequest {
        model: "test-model".to_string(),
        messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
        stream: false,
        tools: vec![ToolDefinition::function(
            "search",
            "Search the web",
            TranslatedSchema::of_type("object", "no parameters"),
        )],
    }
}

#[tokio::test]
async fn sends_ollama_chat_request() {
    let server = start_test_server(vec![http_200(TEXT_REPLY)]).await;
    let client = make_client(&server.base_url, 0);

    let response = client.chat(&test_request()).await.unwrap();
    assert_eq!(response.message.role, Role::Assistant);
    assert_eq!(response.message.content, "Retried OK");

    let bodies = server.bodies.lock().unwrap();
    let sent: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(sent["model"], "test-model");
    assert_eq!(sent["stream"], false);
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "hello");
    assert_eq!(sent["tools"][0]["type"], "function");
    assert_eq!(sent["tools"][0]["function"]["name"], "search");
}

#[tokio::test]
async fn parses_tool_calls() {
    let server = start_test_server(vec![http_200(TOOL_REPLY)]).await;
    let client = make_client(&server.base_url, 0);

    let response = client.chat(&test_request()).await.unwrap();
    assert!(response.message.has_tool_calls());
    let call = &response.message.tool_calls[0];
    assert_eq!(call.name(), "search");
    assert_eq!(call.arguments(), Some(serde_json::json!({"q": "rust"})));
}

#[tokio::test]
async fn no_retry_by_default() {
    let server = start_test_server(vec![http_500(), http_200(TEXT_REPLY)]).await;
    let client = OllamaClient::new(&server.base_url, Duration::from_secs(5)).unwrap();

    let result = client.chat(&test_request()).await;
    assert!(matches!(result, Err(ApiError::Server { status: 500, .. })));
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_on_429_then_success() {
    let server = start_test_server(vec![http_429(), http_200(TEXT_REPLY)]).await;
    let client = make_client(&server.base_url, 2);

    let response = client.chat(&test_request()).await;
    assert!(response.is_ok(), "should succeed after retry: {response:?}");
    assert_eq!(server.requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_exhausted() {
    let server = start_test_server(vec![http_429(), http_429(), http_429()]).await;
    let client = make_client(&server.base_url, 2);

    let result = client.chat(&test_request()).await;
    match result {
        Err(ApiError::RateLimited { .. }) => {}
        other => panic!("expected RateLimited, got: {other:?}"),
    }
    assert_eq!(server.requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_model_is_not_retried() {
    let not_found = http_response(
        "404 Not Found",
        r#"{"error":"model 'test-model' not found"}"#,
        "",
    );
    let server = start_test_server(vec![not_found, http_200(TEXT_REPLY)]).await;
    let client = make_client(&server.base_url, 2);

    let result = client.chat(&test_request()).await;
    assert!(matches!(result, Err(ApiError::ModelNotFound { model }) if model == "test-model"));
    assert_eq!(server.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_server_is_network_error() {
    // Bind then drop to get a port nothing listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let client = make_client(&format!("http://{addr}"), 0);

    let result = client.chat(&test_request()).await;
    assert!(matches!(result, Err(ApiError::Network(_))));
}
