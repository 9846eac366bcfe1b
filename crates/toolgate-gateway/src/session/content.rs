//! ToolOutput → MCP content blocks

use base64::Engine;
use rmcp::model::Content;
use serde_json::{json, Map, Value};

use toolgate_core::ToolOutput;

/// Convert a provider result into the content list of a `tools/call` reply
pub fn to_contents(output: ToolOutput) -> Vec<Content> {
    let mut contents = Vec::new();
    push_output(output, &mut contents);
    contents
}

fn push_output(output: ToolOutput, contents: &mut Vec<Content>) {
    match output {
        ToolOutput::Json(Value::String(text)) => contents.push(Content::text(text)),
        ToolOutput::Json(value) => contents.push(Content::text(canonical_json(&value))),
        ToolOutput::Binary { mime_type, data } => contents.push(binary_content(&mime_type, &data)),
        ToolOutput::Multiple(items) => {
            for item in items {
                push_output(item, contents);
            }
        }
    }
}

fn binary_content(mime_type: &str, data: &[u8]) -> Content {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    let kind = if mime_type.starts_with("image/") {
        Some("image")
    } else if mime_type.starts_with("audio/") {
        Some("audio")
    } else {
        None
    };

    let typed = kind.and_then(|kind| {
        serde_json::from_value::<Content>(json!({
            "type": kind,
            "data": encoded,
            "mimeType": mime_type,
        }))
        .ok()
    });

    typed.unwrap_or_else(|| {
        Content::text(canonical_json(&json!({
            "mimeType": mime_type,
            "data": encoded,
        })))
    })
}

/// Compact JSON with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    sorted(value).to_string()
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
