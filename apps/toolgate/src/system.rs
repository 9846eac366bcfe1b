//! Built-in `system` provider

use serde_json::{json, Value};
use std::sync::Arc;

use toolgate_core::{BuiltinProvider, ToolArguments, ToolError, ToolHints, ToolOutput, ToolProvider, ToolSpec};

pub fn provider() -> Arc<dyn ToolProvider> {
    Arc::new(
        BuiltinProvider::new("system", "System")
            .with_description("Tools provided by the gateway itself")
            .with_tool(
                ToolSpec::new("echo", "Echo the message back")
                    .with_title("Echo")
                    .with_input_schema(json!({
                        "type": "object",
                        "properties": {"message": {"type": "string"}},
                        "required": ["message"]
                    }))
                    .with_hints(ToolHints::read_only()),
                echo,
            )
            .with_tool(
                ToolSpec::new("current_time", "Current local date and time (RFC 3339)")
                    .with_title("Current time")
                    .with_hints(ToolHints::read_only().with_open_world(false)),
                current_time,
            ),
    )
}

async fn echo(args: ToolArguments) -> Result<ToolOutput, ToolError> {
    match args.get("message") {
        Some(Value::String(message)) => Ok(ToolOutput::text(message.clone())),
        _ => Err(ToolError::InvalidArguments("'message' must be a string".into())),
    }
}

async fn current_time(_args: ToolArguments) -> Result<ToolOutput, ToolError> {
    let now = chrono::Local::now();
    Ok(ToolOutput::Json(json!({
        "iso": now.to_rfc3339(),
        "timezone": now.format("%:z").to_string(),
        "unix": now.timestamp(),
    })))
}
