//! Integration tests for `CapabilityRegistry` against real stdio servers.
//!
//! Uses `tests/fixtures/mock_mcp_server.py`. Tests return early when
//! `python3` is not installed.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use mcpilot_mcp::{
    CallError, CapabilityKind, CapabilityRegistry, ConnectionError, ServerDescriptor, Timeouts,
    ToolServerClient,
};
use mcpilot_types::ToolContent;
use serde_json::json;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn fixture() -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/mock_mcp_server.py")
        .to_string_lossy()
        .into_owned()
}

fn mock(name: &str, extra: &[&str]) -> ServerDescriptor {
    let mut args = vec![fixture(), "--label".to_string(), name.to_string()];
    args.extend(extra.iter().map(|a| a.to_string()));
    ServerDescriptor::new(name, "python3", args)
}

fn timeouts() -> Timeouts {
    Timeouts {
        connect: Duration::from_secs(10),
        discovery: Duration::from_secs(5),
        call: Duration::from_secs(1),
        shutdown: Duration::from_secs(2),
    }
}

fn text_of(result: &mcpilot_types::ToolCallResult) -> String {
    result.output_text()
}

#[tokio::test]
async fn tools_route_to_their_owning_server() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    let summary = registry
        .initialize(&[
            mock("alpha", &["--tools", "echo,upper"]),
            mock("beta", &["--tools", "search"]),
        ])
        .await;
    assert_eq!(summary.connected, ["alpha", "beta"]);
    assert!(summary.failed.is_empty());
    assert!(summary.overridden.is_empty());

    let names: Vec<String> = registry.all_tools().into_iter().map(|t| t.name).collect();
    assert_eq!(names, ["echo", "search", "upper"]);
    assert_eq!(registry.tool_definitions().len(), 3);

    let result = registry.call_tool("search", json!({"value": "rust"})).await;
    assert!(result.is_success());
    assert_eq!(text_of(&result), r#"beta:search:{"value": "rust"}"#);

    let result = registry.call_tool("echo", json!({})).await;
    assert_eq!(text_of(&result), "alpha:echo:{}");

    registry.shutdown().await;
}

#[tokio::test]
async fn later_server_wins_duplicate_tool() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    let summary = registry
        .initialize(&[
            mock("first", &["--tools", "shared,only_first"]),
            mock("second", &["--tools", "shared"]),
        ])
        .await;

    assert_eq!(summary.overridden.len(), 1);
    let ov = &summary.overridden[0];
    assert_eq!(ov.kind, CapabilityKind::Tool);
    assert_eq!(ov.key, "shared");
    assert_eq!(ov.previous, "first");
    assert_eq!(ov.current, "second");

    assert_eq!(
        registry.route(CapabilityKind::Tool, "shared").as_deref(),
        Some("second")
    );
    let tools = registry.all_tools();
    assert_eq!(tools.iter().filter(|t| t.name == "shared").count(), 1);

    let result = registry.call_tool("shared", json!({})).await;
    assert!(text_of(&result).starts_with("second:shared"));

    registry.shutdown().await;
}

#[tokio::test]
async fn failing_server_does_not_block_others() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    let summary = registry
        .initialize(&[
            ServerDescriptor::new("broken", "nonexistent_command_xyz123", vec![]),
            mock("good", &["--tools", "echo"]),
        ])
        .await;
    assert_eq!(summary.connected, ["good"]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, "broken");
    assert_eq!(registry.all_tools().len(), 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn listings_follow_next_cursor() {
    if !python_available() {
        return;
    }
    let mut client = ToolServerClient::connect(
        &mock("paged", &["--tools", "a,b,c,d,e", "--page-size", "2"]),
        timeouts(),
    )
    .await
    .unwrap();
    client.discover().await;
    let names: Vec<&str> = client.tools().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c", "d", "e"]);
    assert!(client.capabilities().tools);
    assert!(!client.capabilities().resources);
    assert!(client.resources().is_empty());
    client.close().await;
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    if !python_available() {
        return;
    }
    let result = ToolServerClient::connect(
        &mock("future", &["--protocol-version", "1999-01-01"]),
        timeouts(),
    )
    .await;
    match result {
        Err(ConnectionError::ProtocolMismatch { server, .. }) => assert_eq!(server, "future"),
        Err(other) => panic!("Expected ProtocolMismatch, got: {other:?}"),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    if !python_available() {
        return;
    }
    let timeouts = Timeouts {
        connect: Duration::from_millis(500),
        ..timeouts()
    };
    let started = Instant::now();
    let result = ToolServerClient::connect(&mock("mute", &["--silent"]), timeouts).await;
    assert!(matches!(
        result,
        Err(ConnectionError::HandshakeTimeout { timeout_ms: 500, .. })
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn slow_tool_times_out_as_error_result() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry
        .initialize(&[mock("slow", &["--tools", "sleep_long,echo"])])
        .await;

    let result = registry
        .call_tool("sleep_long", json!({"seconds": 1.5}))
        .await;
    assert!(result.is_error);
    assert!(text_of(&result).contains("sleep_long"));

    // The connection survives a timed-out call; the late reply is dropped.
    let result = registry.call_tool("echo", json!({"value": "x"})).await;
    assert!(result.is_success());

    registry.shutdown().await;
}

#[tokio::test]
async fn server_reported_error_is_passed_through() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry
        .initialize(&[mock("flaky", &["--tools", "fail_always"])])
        .await;

    let result = registry.call_tool("fail_always", json!({})).await;
    assert!(result.is_error);
    assert_eq!(text_of(&result), "flaky:fail_always:{}");

    registry.shutdown().await;
}

#[tokio::test]
async fn resources_and_prompts_route_by_key() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry
        .initialize(&[
            mock("docs", &["--resources", "file:///docs/readme.md"]),
            mock("writer", &["--prompts", "summarize"]),
        ])
        .await;

    let resources = registry.all_resources();
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "readme.md");

    let contents = registry.read_resource("file:///docs/readme.md").await.unwrap();
    assert_eq!(
        contents[0].text.as_deref(),
        Some("docs:file:///docs/readme.md")
    );

    let prompts = registry.all_prompts();
    assert_eq!(prompts[0].name, "summarize");
    assert!(prompts[0].arguments[0].required);

    let args = BTreeMap::from([("topic".to_string(), "ownership".to_string())]);
    let rendered = registry.get_prompt("summarize", &args).await.unwrap();
    assert_eq!(
        rendered.messages[0].content,
        ToolContent::Text("Tell me about ownership".into())
    );

    assert!(matches!(
        registry.read_resource("file:///missing").await,
        Err(CallError::NotRouted { .. })
    ));

    registry.shutdown().await;
}

#[tokio::test]
async fn calls_after_shutdown_are_not_routed() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry.initialize(&[mock("gone", &["--tools", "echo"])]).await;
    assert_eq!(registry.client_count(), 1);

    registry.shutdown().await;
    assert_eq!(registry.client_count(), 0);
    assert!(registry.all_tools().is_empty());

    let result = registry.call_tool("echo", json!({})).await;
    assert!(result.is_error);
    assert!(text_of(&result).contains("not found or server not mapped"));

    registry.shutdown().await;
}

#[tokio::test]
async fn concurrent_calls_share_one_connection() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry.initialize(&[mock("busy", &["--tools", "echo"])]).await;

    let calls = (0..8).map(|i| registry.call_tool("echo", json!({"value": i.to_string()})));
    let results = futures_util::future::join_all(calls).await;
    for (i, result) in results.iter().enumerate() {
        assert_eq!(text_of(result), format!(r#"busy:echo:{{"value": "{i}"}}"#));
    }

    registry.shutdown().await;
}

#[tokio::test]
async fn reinitialized_server_drops_stale_routes() {
    if !python_available() {
        return;
    }
    let registry = CapabilityRegistry::new(timeouts(), 4);
    registry
        .initialize(&[mock("alpha", &["--tools", "echo,upper"])])
        .await;
    registry
        .initialize(&[mock("alpha", &["--tools", "upper"])])
        .await;

    assert_eq!(registry.client_count(), 1);
    assert_eq!(registry.route(CapabilityKind::Tool, "echo"), None);
    assert_eq!(
        registry.route(CapabilityKind::Tool, "upper").as_deref(),
        Some("alpha")
    );

    let result = registry.call_tool("echo", json!({})).await;
    assert!(!result.is_success());
    assert!(text_of(&result).contains("not found"));

    registry.shutdown().await;
}
