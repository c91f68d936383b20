//! Tool definitions, tool results, and the executor trait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// A parameter schema in the dialect the model API expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Present (possibly empty) for object schemas only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, TranslatedSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<TranslatedSchema>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl TranslatedSchema {
    /// A bare schema of the given type with a description.
    pub fn of_type(schema_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            schema_type: schema_type.into(),
            description: Some(description.into()),
            properties: None,
            items: None,
            required: Vec::new(),
            enum_values: None,
            format: None,
        }
    }
}

/// A tool definition sent to the model API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: TranslatedSchema,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: TranslatedSchema,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// A single item of tool output.
///
/// Tool servers may return text, images, audio or embedded resources; only
/// text is meaningful to the model, everything else is rendered as a string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "serde_json::Value")]
pub enum ToolContent {
    Text(String),
    Other(String),
}

impl From<serde_json::Value> for ToolContent {
    fn from(value: serde_json::Value) -> Self {
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match kind {
            "text" => match value.get("text").and_then(|t| t.as_str()) {
                Some(text) => ToolContent::Text(text.to_string()),
                None => ToolContent::Other(value.to_string()),
            },
            "image" | "audio" => {
                let mime = value
                    .get("mimeType")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown");
                let size = value
                    .get("data")
                    .and_then(|d| d.as_str())
                    .map_or(0, str::len);
                ToolContent::Other(format!("[{kind} content: {mime}, {size} bytes base64]"))
            }
            "resource" => match value.pointer("/resource/text").and_then(|t| t.as_str()) {
                Some(text) => ToolContent::Other(text.to_string()),
                None => ToolContent::Other(value.to_string()),
            },
            _ => ToolContent::Other(value.to_string()),
        }
    }
}

impl ToolContent {
    pub fn as_str(&self) -> &str {
        match self {
            ToolContent::Text(text) | ToolContent::Other(text) => text,
        }
    }
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    pub is_error: bool,
}

impl ToolCallResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: false,
        }
    }

    /// Create a failed text result.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text(text.into())],
            is_error: true,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.is_error
    }

    /// All content parts joined with newlines.
    pub fn output_text(&self) -> String {
        self.content
            .iter()
            .map(ToolContent::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Executes tool calls by name.
///
/// Implementations never fail: routing and execution problems are reported
/// as a `ToolCallResult` with `is_error` set so the conversation can continue.
pub trait ToolExecutor: Send + Sync {
    fn call_tool<'a>(
        &'a self,
        name: &'a str,
        arguments: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = ToolCallResult> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_content_from_value() {
        let content: ToolContent = serde_json::from_value(json!({"type": "text", "text": "hi"})).unwrap();
        assert_eq!(content, ToolContent::Text("hi".into()));
    }

    #[test]
    fn image_content_falls_back_to_summary() {
        let content: ToolContent = serde_json::from_value(json!({
            "type": "image",
            "data": "aGVsbG8=",
            "mimeType": "image/png"
        }))
        .unwrap();
        assert_eq!(
            content,
            ToolContent::Other("[image content: image/png, 8 bytes base64]".into())
        );
    }

    #[test]
    fn embedded_text_resource_uses_its_text() {
        let content = ToolContent::from(json!({
            "type": "resource",
            "resource": {"uri": "file:///a.txt", "text": "contents"}
        }));
        assert_eq!(content.as_str(), "contents");
    }

    #[test]
    fn unknown_content_is_rendered_as_json() {
        let content = ToolContent::from(json!({"type": "chart", "points": [1, 2]}));
        match content {
            ToolContent::Other(text) => assert!(text.contains("\"chart\"")),
            other => panic!("Expected Other, got {other:?}"),
        }
    }

    #[test]
    fn output_text_joins_parts() {
        let result = ToolCallResult {
            content: vec![
                ToolContent::Text("line one".into()),
                ToolContent::Other("line two".into()),
            ],
            is_error: false,
        };
        assert_eq!(result.output_text(), "line one\nline two");
        assert!(result.is_success());
    }

    #[test]
    fn error_result_is_not_success() {
        let result = ToolCallResult::error("boom");
        assert!(!result.is_success());
        assert_eq!(result.output_text(), "boom");
    }

    #[test]
    fn tool_definition_shape() {
        let def = ToolDefinition::function(
            "ping",
            "Ping a host",
            TranslatedSchema::of_type("object", "no parameters"),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "function");
        assert_eq!(json["function"]["name"], "ping");
        assert_eq!(json["function"]["parameters"]["type"], "object");
        assert!(json["function"]["parameters"].get("required").is_none());
    }

    #[test]
    fn tool_executor_is_dyn_compatible() {
        fn _accept(_e: &dyn ToolExecutor) {}
    }
}
