//! Translation of MCP tool input schemas into model API tool definitions.
//!
//! MCP servers describe arguments with JSON Schema. Chat APIs accept a
//! narrower dialect: type, description, properties, items, required, enum
//! and format. Translation is total: anything unrecognized degrades to a
//! string-typed schema instead of failing, so one sloppy server cannot
//! remove a tool (or every tool) from the model's view.

use crate::capability::ToolInfo;
use mcpilot_types::{ToolDefinition, TranslatedSchema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Nesting depth beyond which sub-schemas are replaced by a string schema.
const MAX_DEPTH: usize = 32;

/// Translate a native input schema. `None` (or JSON null) means the tool
/// takes no arguments.
pub fn translate(native: Option<&Value>) -> TranslatedSchema {
    match native {
        None | Some(Value::Null) => TranslatedSchema {
            properties: Some(BTreeMap::new()),
            ..TranslatedSchema::of_type("object", "no parameters")
        },
        Some(schema) => translate_at(schema, 0),
    }
}

/// Wrap a discovered tool as a function definition for the model API.
pub fn tool_definition(tool: &ToolInfo) -> ToolDefinition {
    ToolDefinition::function(
        tool.name.clone(),
        tool.description.clone(),
        translate(tool.input_schema.as_ref()),
    )
}

fn translate_at(schema: &Value, depth: usize) -> TranslatedSchema {
    let Some(obj) = schema.as_object() else {
        return fallback("unrecognized schema");
    };
    if depth > MAX_DEPTH {
        return fallback("schema nested too deeply");
    }

    let schema_type = schema_type(obj.get("type"));
    let required = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut translated = TranslatedSchema {
        schema_type,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        properties: None,
        items: None,
        required,
        enum_values: obj.get("enum").and_then(Value::as_array).cloned(),
        format: obj.get("format").and_then(Value::as_str).map(str::to_string),
    };

    match translated.schema_type.as_str() {
        "object" => {
            let properties: BTreeMap<String, TranslatedSchema> = obj
                .get("properties")
                .and_then(Value::as_object)
                .map(|props| {
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), translate_property(name, prop, depth)))
                        .collect()
                })
                .unwrap_or_default();
            translated.properties = Some(properties);
        }
        "array" => {
            let items = match obj.get("items") {
                Some(items) if items.is_object() => translate_at(items, depth + 1),
                _ => {
                    tracing::warn!("Array schema has no usable 'items'; assuming string items");
                    TranslatedSchema::of_type("string", "array item")
                }
            };
            translated.items = Some(Box::new(items));
        }
        _ => {}
    }

    translated
}

fn translate_property(name: &str, prop: &Value, depth: usize) -> TranslatedSchema {
    if !prop.is_object() {
        tracing::warn!("Property '{name}' has a malformed schema; treating it as a string");
        return fallback(&format!("{name} (unrecognized schema)"));
    }
    translate_at(prop, depth + 1)
}

/// Resolve the `type` member. A type union picks its first non-null entry.
fn schema_type(value: Option<&Value>) -> String {
    let resolved = match value {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null"),
        _ => None,
    };
    resolved.unwrap_or("string").to_string()
}

fn fallback(description: &str) -> TranslatedSchema {
    TranslatedSchema::of_type("string", description)
}
