//! rmcp client handler shared by subprocess and remote backends

use rmcp::model::{
    ClientCapabilities, ClientInfo, Implementation, LoggingLevel, LoggingMessageNotificationParam,
};
use rmcp::service::{NotificationContext, RunningService};
use rmcp::RoleClient;
use std::sync::Arc;
use tracing::{debug, info, warn};

use toolgate_core::{ProviderId, ToolSpec};

use super::ToolCache;

/// Called after a backend's tool list was refreshed on its own initiative
pub type ToolsChangedHook = Arc<dyn Fn(&ProviderId) + Send + Sync>;

pub type BackendClient = RunningService<RoleClient, BackendClientHandler>;

#[derive(Clone)]
pub struct BackendClientHandler {
    info: ClientInfo,
    provider_id: ProviderId,
    tools: ToolCache,
    on_tools_changed: ToolsChangedHook,
}

impl std::fmt::Debug for BackendClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClientHandler")
            .field("provider_id", &self.provider_id)
            .field("cached_tools", &self.tools.len())
            .finish()
    }
}

impl BackendClientHandler {
    pub fn new(provider_id: ProviderId, tools: ToolCache, on_tools_changed: ToolsChangedHook) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("toolgate-{}", provider_id),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("Toolgate".to_string()),
                    ..Default::default()
                },
                meta: None,
            },
            provider_id,
            tools,
            on_tools_changed,
        }
    }
}

/// Convert rmcp tools, skipping any that do not fit the local shape
pub fn convert_tools(tools: &[rmcp::model::Tool]) -> Vec<ToolSpec> {
    tools.iter().filter_map(ToolSpec::from_json).collect()
}

impl rmcp::ClientHandler for BackendClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let provider_id = self.provider_id.clone();
        let tools = self.tools.clone();
        let hook = self.on_tools_changed.clone();
        let peer = context.peer;
        async move {
            info!(provider_id = %provider_id, "[BackendClientHandler] Backend sent tools/list_changed");

            // Refresh off the service loop; it is the one that answers us
            tokio::spawn(async move {
                match peer.list_all_tools().await {
                    Ok(listed) => {
                        let converted = convert_tools(&listed);
                        debug!(
                            provider_id = %provider_id,
                            count = converted.len(),
                            "[BackendClientHandler] Tool list refreshed"
                        );
                        tools.replace(converted).await;
                        hook(&provider_id);
                    }
                    Err(e) => warn!(
                        provider_id = %provider_id,
                        error = %e,
                        "[BackendClientHandler] Failed to refresh tools"
                    ),
                }
            });
        }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let provider_id = self.provider_id.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match params.level {
                LoggingLevel::Debug | LoggingLevel::Info | LoggingLevel::Notice => debug!(
                    provider_id = %provider_id,
                    logger = ?params.logger,
                    "[BackendClientHandler] Server log: {}",
                    message
                ),
                _ => warn!(
                    provider_id = %provider_id,
                    level = ?params.level,
                    logger = ?params.logger,
                    "[BackendClientHandler] Server log: {}",
                    message
                ),
            }
        }
    }
}
