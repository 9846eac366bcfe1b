//! Minimal MCP server over stdio with `echo` and `add` tools.
//!
//! Used as a real subprocess backend by the integration tests.

use rmcp::model::*;
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, ServiceExt};
use serde_json::{json, Value};

#[derive(Clone, Default)]
struct EchoServer;

fn tools() -> Vec<Tool> {
    [
        json!({
            "name": "echo",
            "description": "Echo the message back",
            "inputSchema": {
                "type": "object",
                "properties": {"message": {"type": "string"}},
                "required": ["message"]
            }
        }),
        json!({
            "name": "add",
            "description": "Add two integers",
            "inputSchema": {
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}}
            }
        }),
    ]
    .into_iter()
    .filter_map(|tool| serde_json::from_value(tool).ok())
    .collect()
}

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "echo-mcp-server".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: None,
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult::with_all_items(tools()))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let arguments = params.arguments.unwrap_or_default();
        match params.name.as_ref() {
            "echo" => match arguments.get("message") {
                Some(Value::String(message)) => {
                    Ok(CallToolResult::success(vec![Content::text(message.clone())]))
                }
                _ => Ok(CallToolResult::error(vec![Content::text("message is required")])),
            },
            "add" => {
                let a = arguments.get("a").and_then(Value::as_i64).unwrap_or_default();
                let b = arguments.get("b").and_then(Value::as_i64).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text((a + b).to_string())]))
            }
            other => Err(McpError::invalid_params(format!("Unknown tool '{}'", other), None)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eprintln!("echo-mcp-server starting");
    let service = EchoServer.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}
