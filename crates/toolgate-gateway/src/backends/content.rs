//! Backend results to [`ToolOutput`]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rmcp::model::CallToolResult;
use serde_json::Value;

use toolgate_core::{ToolError, ToolOutput};

/// Map one backend `tools/call` result
///
/// An error-flagged result becomes [`ToolError::Remote`] carrying the text
/// blocks. Text, image, audio and embedded resources are mapped block by
/// block; anything else is kept as JSON.
pub fn from_call_result(result: CallToolResult) -> Result<ToolOutput, ToolError> {
    let blocks: Vec<Value> = result
        .content
        .iter()
        .filter_map(|content| serde_json::to_value(content).ok())
        .collect();

    if result.is_error.unwrap_or(false) {
        let message: Vec<String> = blocks.iter().filter_map(text_of).collect();
        let message = if message.is_empty() {
            "Backend reported an error".to_string()
        } else {
            message.join("\n")
        };
        return Err(ToolError::Remote(message));
    }

    if blocks.is_empty() {
        return Ok(ToolOutput::Json(result.structured_content.unwrap_or(Value::Null)));
    }

    Ok(ToolOutput::from_items(blocks.into_iter().map(block_to_output).collect()))
}

fn text_of(block: &Value) -> Option<String> {
    block.get("text").and_then(Value::as_str).map(str::to_string)
}

fn block_to_output(block: Value) -> ToolOutput {
    let kind = block.get("type").and_then(Value::as_str).unwrap_or_default();
    match kind {
        "text" => text_of(&block).map(ToolOutput::text).unwrap_or(ToolOutput::Json(block)),
        "image" | "audio" => decode_binary(&block, "mimeType", "data").unwrap_or(ToolOutput::Json(block)),
        "resource" => {
            let Some(resource) = block.get("resource") else {
                return ToolOutput::Json(block);
            };
            if let Some(text) = text_of(resource) {
                return ToolOutput::text(text);
            }
            decode_binary(resource, "mimeType", "blob").unwrap_or(ToolOutput::Json(block))
        }
        _ => ToolOutput::Json(block),
    }
}

fn decode_binary(value: &Value, mime_field: &str, data_field: &str) -> Option<ToolOutput> {
    let data = value.get(data_field)?.as_str()?;
    let bytes = STANDARD.decode(data).ok()?;
    let mime_type = value
        .get(mime_field)
        .and_then(Value::as_str)
        .unwrap_or("application/octet-stream");
    Some(ToolOutput::binary(mime_type, bytes))
}
