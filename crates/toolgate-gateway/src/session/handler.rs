//! Toolgate session MCP handler
//!
//! Implements the rmcp `ServerHandler` for one connection. Admission happens
//! inside `initialize`: the reply is held back until the approval decision,
//! and a denial answers the request with an error.

use rmcp::{
    model::*,
    service::{NotificationContext, RequestContext},
    ErrorData as McpError, RoleServer, ServerHandler,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use toolgate_core::{ApprovalState, ClientIdentity, SessionPhase};

use super::{to_contents, ConnectionSession};
use crate::server::GatewayInner;

const DENIAL_LINGER: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct SessionHandler {
    session: Arc<ConnectionSession>,
    gateway: Weak<GatewayInner>,
}

impl SessionHandler {
    pub(crate) fn new(session: Arc<ConnectionSession>, gateway: Weak<GatewayInner>) -> Self {
        Self { session, gateway }
    }

    pub fn session(&self) -> &Arc<ConnectionSession> {
        &self.session
    }

    fn gateway(&self) -> Result<Arc<GatewayInner>, McpError> {
        self.gateway
            .upgrade()
            .ok_or_else(|| McpError::internal_error("Gateway is shutting down", None))
    }

    fn require_approved(&self) -> Result<(), McpError> {
        if self.session.approval_state() == ApprovalState::Approved && !self.session.is_stopped() {
            Ok(())
        } else {
            Err(McpError::invalid_request(
                "Connection has not been approved",
                None,
            ))
        }
    }

    /// Negotiate protocol version between client and server.
    /// A client newer than us gets our latest; otherwise we speak theirs.
    fn negotiate_protocol_version(client_version: &str) -> ProtocolVersion {
        let ours = ProtocolVersion::LATEST;
        let ours_str = ours.to_string();

        if client_version > ours_str.as_str() {
            debug!(
                client_version = %client_version,
                our_max = %ours_str,
                "[Session] Client uses newer protocol, negotiating down"
            );
            ours
        } else {
            serde_json::from_value(serde_json::Value::String(client_version.to_string()))
                .unwrap_or(ours)
        }
    }

    /// Remove the connection once the error reply has had time to flush
    fn schedule_removal(&self) {
        let weak = self.gateway.clone();
        let id = self.session.id();
        tokio::spawn(async move {
            tokio::time::sleep(DENIAL_LINGER).await;
            if let Some(gateway) = weak.upgrade() {
                gateway.remove_connection(id);
            }
        });
    }

    fn spawn_health_monitor(&self, gateway: &Arc<GatewayInner>) {
        let session = self.session.clone();
        let weak = Arc::downgrade(gateway);
        let interval = gateway.config.health_check_interval();
        let token = session.cancellation_token();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if session.health().is_failed() {
                            warn!(
                                connection_id = %session.id(),
                                "[Session] Transport failed, removing connection"
                            );
                            if let Some(gateway) = weak.upgrade() {
                                gateway.remove_connection(session.id());
                            }
                            break;
                        }
                    }
                }
            }
        });
    }
}

impl ServerHandler for SessionHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(true),
                })
                .enable_prompts()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "toolgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Toolgate exposes the tools of this machine's enabled providers.".to_string(),
            ),
        }
    }

    async fn initialize(
        &self,
        params: InitializeRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        let gateway = self.gateway()?;
        let connection_id = self.session.id();

        if !self.session.advance(SessionPhase::Handshaking) {
            return Err(McpError::invalid_request("Session already initialized", None));
        }

        let client = ClientIdentity::new(params.client_info.name.clone());
        self.session.set_client(client.clone());
        let protocol_version =
            Self::negotiate_protocol_version(&params.protocol_version.to_string());

        info!(
            connection_id = %connection_id,
            client = %client,
            client_version = %params.client_info.version,
            protocol_version = %protocol_version,
            "[Session] Client initializing"
        );

        self.session.advance(SessionPhase::AwaitingApproval);
        self.session.set_approval_state(ApprovalState::Pending);

        let outcome = gateway
            .approvals
            .request_approval(connection_id, &client)
            .await;

        if !outcome.is_admitted() {
            self.session.set_approval_state(ApprovalState::Denied);
            info!(connection_id = %connection_id, client = %client, "[Session] Connection denied");
            self.schedule_removal();
            return Err(McpError::invalid_request(
                format!("Connection from '{}' was denied", client),
                None,
            ));
        }

        // Removed while waiting (setup timeout, preemption, shutdown)
        if self.session.is_stopped() {
            return Err(McpError::invalid_request("Connection was closed", None));
        }

        self.session.set_approval_state(ApprovalState::Approved);
        gateway.register_client(connection_id, &client);
        gateway.spawn_setup_timeout(self.session.clone(), SessionPhase::setup_complete);

        let info = self.get_info();
        Ok(InitializeResult {
            protocol_version,
            capabilities: info.capabilities,
            server_info: info.server_info,
            instructions: info.instructions,
        })
    }

    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        if self.session.approval_state() != ApprovalState::Approved {
            return;
        }
        let Ok(gateway) = self.gateway() else {
            return;
        };

        self.session.attach_peer(context.peer.clone());
        if self.session.advance(SessionPhase::Active) {
            self.spawn_health_monitor(&gateway);
            info!(
                connection_id = %self.session.id(),
                client = ?self.session.client(),
                "[Session] Client active"
            );
        }
    }

    async fn list_prompts(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        self.require_approved()?;
        Ok(ListPromptsResult::with_all_items(Vec::new()))
    }

    async fn list_resources(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        self.require_approved()?;
        Ok(ListResourcesResult::with_all_items(Vec::new()))
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.require_approved()?;
        let gateway = self.gateway()?;

        let tools: Vec<Tool> = gateway
            .visible_tools()
            .iter()
            .filter_map(|spec| {
                serde_json::to_value(spec)
                    .ok()
                    .and_then(|json| serde_json::from_value(json).ok())
            })
            .collect();

        debug!(
            connection_id = %self.session.id(),
            count = tools.len(),
            "[Session] list_tools"
        );
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        self.require_approved()?;
        let gateway = self.gateway()?;
        let name = params.name.to_string();

        info!(
            connection_id = %self.session.id(),
            tool = %name,
            "[Session] call_tool"
        );

        if !gateway.is_enabled() {
            return Ok(CallToolResult::error(vec![Content::text(
                "Toolgate is turned off. Enable the gateway to call tools.",
            )]));
        }

        let arguments = params.arguments.unwrap_or_default();
        match gateway.call_tool(&name, arguments).await {
            Ok(output) => {
                let content = to_contents(output);
                debug!(tool = %name, blocks = content.len(), "[Session] call_tool result");
                Ok(CallToolResult::success(content))
            }
            Err(e) => {
                debug!(tool = %name, error = %e, "[Session] call_tool failed");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
        }
    }
}
