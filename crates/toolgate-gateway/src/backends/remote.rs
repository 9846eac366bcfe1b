//! Remote backend
//!
//! MCP client for one server reached over Streamable HTTP. The last tool
//! list is kept on disk so hosts can show what a server offers before it has
//! been connected in this run.

use async_trait::async_trait;
use parking_lot::RwLock;
use rmcp::model::CallToolRequestParams;
use rmcp::service::Peer;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::{RoleClient, ServiceExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use toolgate_core::{
    ActivationError, ProviderId, ProviderInfo, ProviderKind, ServerEntry, ServerKind,
    ToolArguments, ToolError, ToolOutput, ToolProvider, ToolSpec,
};

use super::client_handler::{convert_tools, BackendClient, BackendClientHandler, ToolsChangedHook};
use super::content::from_call_result;
use super::ToolCache;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub name: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub streaming: Option<bool>,
}

impl RemoteConfig {
    pub fn from_entry(entry: &ServerEntry) -> Option<Self> {
        match &entry.kind {
            ServerKind::Remote {
                url,
                headers,
                streaming,
            } => Some(Self {
                name: entry.name.clone(),
                url: url.clone(),
                headers: headers.clone(),
                streaming: *streaming,
            }),
            ServerKind::Subprocess { .. } => None,
        }
    }
}

/// Endpoints to try, in order
///
/// `Some(true)` uses the URL as configured, `Some(false)` only the plain
/// request endpoint derived from it. Without a flag, a URL whose last path
/// segment is `sse` is tried first and the derived `/mcp` endpoint once after.
pub fn endpoint_candidates(url: &str, streaming: Option<bool>) -> Result<Vec<Url>, ActivationError> {
    let parsed = Url::parse(url).map_err(|e| ActivationError::InvalidConfig(format!("Invalid URL '{}': {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ActivationError::InvalidConfig(format!(
            "Unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }

    let derived = derive_request_endpoint(&parsed);
    let candidates = match (streaming, derived) {
        (Some(true), _) => vec![parsed],
        (Some(false), Some(derived)) => vec![derived],
        (Some(false), None) => vec![parsed],
        (None, Some(derived)) => vec![parsed, derived],
        (None, None) => vec![parsed],
    };
    Ok(candidates)
}

/// `…/sse` or `…/sse/` → `…/mcp`
fn derive_request_endpoint(url: &Url) -> Option<Url> {
    let trimmed = url.path().trim_end_matches('/');
    let parent = trimmed.strip_suffix("/sse")?;
    let mut derived = url.clone();
    derived.set_path(&format!("{}/mcp", parent));
    Some(derived)
}

fn build_default_headers(headers: &BTreeMap<String, String>) -> Result<reqwest::header::HeaderMap, ActivationError> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| ActivationError::InvalidConfig(format!("Invalid header name '{}': {}", key, e)))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| ActivationError::InvalidConfig(format!("Invalid header value for '{}': {}", key, e)))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}

pub struct RemoteBackend {
    id: ProviderId,
    config: RwLock<RemoteConfig>,
    connect_timeout: Duration,
    tools: ToolCache,
    activated: AtomicBool,
    endpoint: RwLock<Option<Url>>,
    peer: RwLock<Option<Peer<RoleClient>>>,
    client: tokio::sync::Mutex<Option<BackendClient>>,
    on_tools_changed: ToolsChangedHook,
}

impl RemoteBackend {
    pub fn new(
        id: ProviderId,
        config: RemoteConfig,
        connect_timeout: Duration,
        tools: ToolCache,
        on_tools_changed: ToolsChangedHook,
    ) -> Self {
        Self {
            id,
            config: RwLock::new(config),
            connect_timeout,
            tools,
            activated: AtomicBool::new(false),
            endpoint: RwLock::new(None),
            peer: RwLock::new(None),
            client: tokio::sync::Mutex::new(None),
            on_tools_changed,
        }
    }

    pub fn config(&self) -> RemoteConfig {
        self.config.read().clone()
    }

    /// Endpoint the current connection uses
    pub fn endpoint(&self) -> Option<Url> {
        self.endpoint.read().clone()
    }

    /// Tools from the last successful listing, even while disconnected
    pub fn cached_tools(&self) -> Vec<ToolSpec> {
        self.tools.get()
    }

    pub async fn reconfigure(&self, config: RemoteConfig) {
        if *self.config.read() == config {
            return;
        }
        self.disconnect().await;
        info!(provider_id = %self.id, url = %config.url, "[RemoteBackend] Reconfigured");
        *self.config.write() = config;
    }

    /// List tools again over the live connection and persist them
    pub async fn refresh_tools(&self) -> Result<usize, ActivationError> {
        let peer = self
            .peer
            .read()
            .clone()
            .ok_or_else(|| ActivationError::Connect("Not connected".to_string()))?;
        let listed = peer
            .list_all_tools()
            .await
            .map_err(|e| ActivationError::ListTools(e.to_string()))?;
        let tools = convert_tools(&listed);
        let count = tools.len();
        self.tools.replace(tools).await;
        debug!(provider_id = %self.id, count, "[RemoteBackend] Tools refreshed");
        Ok(count)
    }

    async fn disconnect(&self) {
        let mut slot = self.client.lock().await;
        self.activated.store(false, Ordering::SeqCst);
        self.peer.write().take();
        self.endpoint.write().take();
        if let Some(client) = slot.take() {
            if let Err(e) = client.cancel().await {
                debug!(provider_id = %self.id, error = %e, "[RemoteBackend] Client task ended with error");
            }
            info!(provider_id = %self.id, "[RemoteBackend] Disconnected");
        }
    }

    async fn connect(&self, endpoint: &Url, http: reqwest::Client) -> Result<BackendClient, ActivationError> {
        let transport = StreamableHttpClientTransport::with_client(
            http,
            StreamableHttpClientTransportConfig::with_uri(endpoint.as_str()),
        );
        let handler = BackendClientHandler::new(
            self.id.clone(),
            self.tools.clone(),
            self.on_tools_changed.clone(),
        );

        match tokio::time::timeout(self.connect_timeout, handler.serve(transport)).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(ActivationError::Connect(format!("{}: {}", endpoint, e))),
            Err(_) => Err(ActivationError::Connect(format!(
                "{}: connection timeout ({:?})",
                endpoint, self.connect_timeout
            ))),
        }
    }
}

#[async_trait]
impl ToolProvider for RemoteBackend {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn info(&self) -> ProviderInfo {
        let config = self.config.read();
        ProviderInfo {
            display_name: config.name.clone(),
            kind: ProviderKind::Remote,
            description: Some(format!("http:{}", config.url)),
        }
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        if self.is_activated() {
            self.tools.get()
        } else {
            Vec::new()
        }
    }

    fn is_activated(&self) -> bool {
        self.activated.load(Ordering::SeqCst)
    }

    async fn activate(&self) -> Result<(), ActivationError> {
        let mut slot = self.client.lock().await;
        if self.is_activated() && slot.is_some() {
            return Ok(());
        }

        let config = self.config();
        let candidates = endpoint_candidates(&config.url, config.streaming)?;
        let http = reqwest::Client::builder()
            .default_headers(build_default_headers(&config.headers)?)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| ActivationError::Connect(format!("Failed to build HTTP client: {}", e)))?;

        let mut last_error = None;
        for endpoint in candidates {
            info!(provider_id = %self.id, endpoint = %endpoint, "[RemoteBackend] Connecting");
            let client = match self.connect(&endpoint, http.clone()).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(provider_id = %self.id, error = %e, "[RemoteBackend] Endpoint failed");
                    last_error = Some(e);
                    continue;
                }
            };

            let listed = match client.peer().list_all_tools().await {
                Ok(listed) => listed,
                Err(e) => {
                    let _ = client.cancel().await;
                    last_error = Some(ActivationError::ListTools(e.to_string()));
                    continue;
                }
            };

            let tools = convert_tools(&listed);
            let count = tools.len();
            self.tools.replace(tools).await;
            *self.peer.write() = Some(client.peer().clone());
            *self.endpoint.write() = Some(endpoint);
            *slot = Some(client);
            self.activated.store(true, Ordering::SeqCst);
            info!(provider_id = %self.id, tools = count, "[RemoteBackend] Activated");
            return Ok(());
        }

        let error = last_error.unwrap_or_else(|| ActivationError::Connect("No endpoint to try".to_string()));
        error!(provider_id = %self.id, error = %error, "[RemoteBackend] Activation failed");
        Err(error)
    }

    async fn deactivate(&self) {
        self.disconnect().await;
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<ToolOutput, ToolError> {
        let peer = self
            .peer
            .read()
            .clone()
            .ok_or_else(|| ToolError::Unavailable(format!("{} is not connected", self.config.read().name)))?;

        debug!(provider_id = %self.id, tool = %name, "[RemoteBackend] call_tool");
        let result = peer
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(arguments),
                task: None,
                meta: None,
            })
            .await
            .map_err(|e| ToolError::Remote(e.to_string()))?;
        from_call_result(result)
    }
}
