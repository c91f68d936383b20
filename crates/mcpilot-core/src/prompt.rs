//! System prompt assembly from the aggregated capability set.

use mcpilot_mcp::schema;
use mcpilot_mcp::{PromptInfo, ResourceInfo, ToolInfo};
use mcpilot_types::TranslatedSchema;
use std::fmt::Write;

/// Returned when no server offers anything. Callers should log a warning.
pub const NO_CAPABILITIES_PROMPT: &str = "You are a helpful assistant. No tools, resources or \
     prompts are available in this session, so answer from your own knowledge.";

const PREAMBLE: &str = "You are a helpful assistant with access to external capabilities \
     provided by connected tool servers. Call a tool when it helps answer the user's request, \
     passing arguments that match its parameters. After tool results arrive, use them to give \
     a clear, concise answer.";

/// Render the capability listing used as the session's system prompt.
///
/// Sections appear in a fixed order (tools, resources, prompts) and each
/// input is rendered in the order given, so equal inputs produce
/// byte-identical prompts.
pub fn build_system_prompt(
    tools: &[ToolInfo],
    resources: &[ResourceInfo],
    prompts: &[PromptInfo],
) -> String {
    if tools.is_empty() && resources.is_empty() && prompts.is_empty() {
        return NO_CAPABILITIES_PROMPT.to_string();
    }

    let mut out = String::from(PREAMBLE);

    if !tools.is_empty() {
        start_section(&mut out, "Tools");
        for tool in tools {
            render_tool(&mut out, tool);
        }
    }

    if !resources.is_empty() {
        start_section(&mut out, "Resources");
        for resource in resources {
            let _ = write!(out, "\n- {} ({})", resource.uri, resource.name);
            if let Some(description) = non_blank(resource.description.as_deref()) {
                let _ = write!(out, ": {description}");
            }
            if let Some(mime) = non_blank(resource.mime_type.as_deref()) {
                let _ = write!(out, " [{mime}]");
            }
            out.push('\n');
        }
    }

    if !prompts.is_empty() {
        start_section(&mut out, "Prompts");
        for prompt in prompts {
            let _ = write!(out, "\n- {}", prompt.name);
            if let Some(description) = non_blank(prompt.description.as_deref()) {
                let _ = write!(out, ": {description}");
            }
            out.push('\n');
            if !prompt.arguments.is_empty() {
                out.push_str("  Arguments:\n");
                for arg in &prompt.arguments {
                    let _ = write!(out, "  - {} ({})", arg.name, requirement(arg.required));
                    if let Some(description) = non_blank(arg.description.as_deref()) {
                        let _ = write!(out, ": {description}");
                    }
                    out.push('\n');
                }
            }
        }
    }

    out
}

fn start_section(out: &mut String, title: &str) {
    if !out.ends_with('\n') {
        out.push('\n');
    }
    let _ = write!(out, "\n## {title}\n");
}

fn render_tool(out: &mut String, tool: &ToolInfo) {
    let _ = write!(out, "\n- {}", tool.name);
    if let Some(description) = non_blank(Some(tool.description.as_str())) {
        let _ = write!(out, ": {description}");
    }
    out.push('\n');

    let params = schema::translate(tool.input_schema.as_ref());
    match params.properties.as_ref() {
        Some(props) if !props.is_empty() => {
            out.push_str("  Parameters:\n");
            render_properties(out, &params, 1);
        }
        _ => out.push_str("  Parameters: none\n"),
    }
}

/// Render the properties of an object schema, one line each, recursing
/// into nested objects and into object-typed array items.
fn render_properties(out: &mut String, object: &TranslatedSchema, depth: usize) {
    let Some(props) = object.properties.as_ref() else {
        return;
    };
    let indent = "  ".repeat(depth);
    for (name, prop) in props {
        let required = object.required.iter().any(|r| r == name);
        let _ = write!(
            out,
            "{indent}- {name} ({}, {})",
            type_label(prop),
            requirement(required)
        );
        if let Some(description) = non_blank(prop.description.as_deref()) {
            let _ = write!(out, ": {description}");
        }
        if let Some(values) = &prop.enum_values {
            let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            let _ = write!(out, " [one of: {}]", values.join(", "));
        }
        out.push('\n');

        match prop.schema_type.as_str() {
            "object" => render_properties(out, prop, depth + 1),
            "array" => {
                if let Some(items) = prop.items.as_deref().filter(|i| i.schema_type == "object") {
                    render_properties(out, items, depth + 1);
                }
            }
            _ => {}
        }
    }
}

fn type_label(schema: &TranslatedSchema) -> String {
    match (schema.schema_type.as_str(), schema.items.as_deref()) {
        ("array", Some(items)) => format!("array of {}", items.schema_type),
        (t, _) => match schema.format.as_deref() {
            Some(format) => format!("{t}, format {format}"),
            None => t.to_string(),
        },
    }
}

fn requirement(required: bool) -> &'static str {
    if required { "required" } else { "optional" }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
