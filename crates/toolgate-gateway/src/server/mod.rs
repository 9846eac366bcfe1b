//! Gateway Server
//!
//! Top-level coordinator. Owns the listener, the live connection table, the
//! backend registry and the enabled switch, and fans tool-list changes out
//! to every active session.
//!
//! All external collaborators are injected through [`GatewayDependencies`],
//! so the same server runs in the daemon and in tests.

mod dependencies;
mod state;

pub use dependencies::{DependenciesBuilder, GatewayDependencies};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rmcp::ServiceExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use toolgate_core::{
    tool_key, ActivationError, ClientIdentity, ConnectionId, EnablementStore, EventBus,
    EventReceiver, GatewayConfig, GatewayEvent, ProviderId, ServerEntry, SessionPhase,
    ToolArguments, ToolError, ToolOutput, ToolProvider, ToolSpec,
};

use crate::approval::ApprovalCoordinator;
use crate::backends::{BackendCatalog, ToolsChangedHook};
use crate::discovery::{DiscoveryConfig, DiscoveryError, DiscoveryHandle, NetworkDiscovery, ServiceAdvertiser};
use crate::registry::{BackendRegistry, ProviderEntry};
use crate::session::{ConnectionSession, MonitoredStream, NotifyOutcome, SessionHandler};
use state::ConnectionTable;

/// MCP Gateway Server
///
/// Cheap to clone; every clone drives the same gateway.
#[derive(Clone)]
pub struct GatewayServer {
    inner: Arc<GatewayInner>,
}

pub(crate) struct GatewayInner {
    pub(crate) config: GatewayConfig,
    pub(crate) approvals: ApprovalCoordinator,
    enabled: AtomicBool,
    registry: RwLock<Arc<BackendRegistry>>,
    enablement: Arc<dyn EnablementStore>,
    builtins: Vec<Arc<dyn ToolProvider>>,
    catalog: BackendCatalog,
    events: EventBus,
    connections: Mutex<ConnectionTable>,
    next_id: AtomicU64,
    advertiser: Arc<dyn ServiceAdvertiser>,
    discovery: tokio::sync::Mutex<Option<DiscoveryHandle>>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, dependencies: GatewayDependencies) -> Self {
        info!("[Gateway] Initializing with dependency injection...");

        let inner = Arc::new_cyclic(|weak: &Weak<GatewayInner>| {
            let hook_target = weak.clone();
            let hook: ToolsChangedHook = Arc::new(move |provider_id: &ProviderId| {
                let Some(gateway) = hook_target.upgrade() else {
                    return;
                };
                debug!(provider_id = %provider_id, "[Gateway] Backend tool list changed");
                tokio::spawn(async move {
                    gateway.notify_tools_changed().await;
                });
            });

            let builtin_entries = dependencies
                .builtins
                .iter()
                .cloned()
                .map(ProviderEntry::new)
                .collect();

            GatewayInner {
                approvals: ApprovalCoordinator::new(
                    dependencies.trust_store.clone(),
                    dependencies.approval_prompt.clone(),
                    dependencies.event_bus.sender(),
                ),
                enabled: AtomicBool::new(config.enabled),
                registry: RwLock::new(Arc::new(BackendRegistry::new(builtin_entries))),
                enablement: dependencies.enablement.clone(),
                builtins: dependencies.builtins.clone(),
                catalog: BackendCatalog::new(&config, hook),
                events: dependencies.event_bus.clone(),
                connections: Mutex::new(ConnectionTable::default()),
                next_id: AtomicU64::new(0),
                advertiser: dependencies.advertiser.clone(),
                discovery: tokio::sync::Mutex::new(None),
                config,
            }
        });

        info!(
            builtins = inner.builtins.len(),
            enabled = inner.is_enabled(),
            "[Gateway] Initialized"
        );
        Self { inner }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    pub fn approvals(&self) -> &ApprovalCoordinator {
        &self.inner.approvals
    }

    // ---- Enabled switch ----

    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    /// Toggle the gateway. Connections stay open; clients are only notified
    /// when the value actually changes.
    pub async fn set_enabled(&self, enabled: bool) -> bool {
        let previous = self.inner.enabled.swap(enabled, Ordering::SeqCst);
        if previous == enabled {
            return false;
        }
        info!(enabled, "[Gateway] Enabled state changed");
        self.inner
            .events
            .sender()
            .emit(GatewayEvent::GatewayEnabledChanged { enabled });
        self.inner.notify_tools_changed().await;
        true
    }

    // ---- Backends ----

    /// Current registry snapshot
    pub fn registry(&self) -> Arc<BackendRegistry> {
        self.inner.registry()
    }

    /// Tools a client would see right now
    pub fn visible_tools(&self) -> Vec<ToolSpec> {
        self.inner.visible_tools()
    }

    /// Replace the registry and notify sessions
    ///
    /// Remote providers that are not yet connected are activated in the
    /// background; sessions are notified again if any of them comes up.
    pub async fn set_backends(&self, entries: Vec<ProviderEntry>) {
        let registry = Arc::new(BackendRegistry::new(entries));
        *self.inner.registry.write() = registry.clone();
        info!(providers = registry.len(), "[Gateway] Backend registry replaced");

        self.inner.notify_tools_changed().await;
        let pending = registry.inactive_remotes();
        self.inner.spawn_activation(registry, pending);
    }

    /// Rebuild server-backed providers from `servers`, keeping built-ins first
    ///
    /// Subprocesses that were running when their entry changed are started
    /// again with the new settings in the background.
    pub async fn apply_servers(&self, servers: &[ServerEntry]) {
        let synced = self.inner.catalog.sync(servers).await;
        let entries = self
            .inner
            .builtins
            .iter()
            .cloned()
            .chain(synced.providers)
            .map(ProviderEntry::new)
            .collect();
        self.set_backends(entries).await;

        if !synced.restart.is_empty() {
            let registry = self.registry();
            let restart = synced
                .restart
                .iter()
                .filter_map(|id| registry.get(id).cloned())
                .collect();
            self.inner.spawn_activation(registry, restart);
        }
    }

    /// Activate one provider and push the resulting tool change
    pub async fn activate_provider(&self, provider_id: &ProviderId) -> Result<(), ActivationError> {
        let entry = self
            .registry()
            .get(provider_id)
            .cloned()
            .ok_or_else(|| ActivationError::InvalidConfig(format!("Unknown provider '{}'", provider_id)))?;

        let result = self.inner.activate_entry(&entry).await;
        if result.is_ok() {
            self.inner.notify_tools_changed().await;
        }
        result
    }

    pub async fn deactivate_provider(&self, provider_id: &ProviderId) -> bool {
        let Some(entry) = self.registry().get(provider_id).cloned() else {
            return false;
        };
        entry.provider.deactivate().await;
        info!(provider_id = %provider_id, "[Gateway] Provider deactivated");
        self.inner.notify_tools_changed().await;
        true
    }

    /// Flip a provider's flag in the enablement store
    pub async fn set_provider_enabled(&self, provider_id: &ProviderId, enabled: bool) {
        self.inner.enablement.set(provider_id.as_str(), enabled);
        debug!(provider_id = %provider_id, enabled, "[Gateway] Provider flag set");
        self.inner.notify_tools_changed().await;
    }

    /// Flip one tool's flag in the enablement store
    pub async fn set_tool_enabled(&self, provider_id: &ProviderId, tool_name: &str, enabled: bool) {
        self.inner.enablement.set(&tool_key(provider_id, tool_name), enabled);
        debug!(provider_id = %provider_id, tool = %tool_name, enabled, "[Gateway] Tool flag set");
        self.inner.notify_tools_changed().await;
    }

    /// The host changed flags directly in its store
    pub async fn enablement_changed(&self) -> usize {
        self.inner.notify_tools_changed().await
    }

    // ---- Connections ----

    /// Serve one raw transport as an MCP session
    pub fn accept_connection<T>(&self, transport: T) -> ConnectionId
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        GatewayInner::accept_connection(&self.inner, transport)
    }

    /// Idempotent teardown. Returns whether this call removed the connection.
    pub fn remove_connection(&self, id: ConnectionId) -> bool {
        self.inner.remove_connection(id)
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.connections.lock().ids()
    }

    pub fn session(&self, id: ConnectionId) -> Option<Arc<ConnectionSession>> {
        self.inner
            .connections
            .lock()
            .sessions()
            .into_iter()
            .find(|session| session.id() == id)
    }

    pub fn connection_for(&self, client: &ClientIdentity) -> Option<ConnectionId> {
        self.inner.connections.lock().connection_for(client)
    }

    /// Push `notifications/tools/list_changed` to every active session
    pub async fn notify_tools_changed(&self) -> usize {
        self.inner.notify_tools_changed().await
    }

    // ---- Lifecycle ----

    /// Bind the listener, advertise it and start accepting connections
    pub async fn start(&self) -> Result<u16, DiscoveryError> {
        let mut slot = self.inner.discovery.lock().await;
        if let Some(port) = slot.as_ref().and_then(|handle| handle.port()) {
            return Ok(port);
        }

        let config = DiscoveryConfig::from_gateway(&self.inner.config)?;
        let discovery = NetworkDiscovery::new(
            config,
            self.inner.advertiser.clone(),
            self.inner.events.sender(),
        );
        let (handle, mut accepted) = discovery.start(CancellationToken::new()).await?;
        let port = handle.port().unwrap_or_default();

        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(connection) = accepted.recv().await {
                let Some(gateway) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = connection.stream.set_nodelay(true) {
                    debug!(error = %e, "[Gateway] Failed to set TCP_NODELAY");
                }
                let id = GatewayInner::accept_connection(&gateway, connection.stream);
                debug!(connection_id = %id, peer = %connection.peer, "[Gateway] Connection accepted");
            }
        });

        *slot = Some(handle);
        info!(port, "[Gateway] Started");
        Ok(port)
    }

    /// Port the listener is bound to, `None` when stopped or rebinding
    pub async fn listening_port(&self) -> Option<u16> {
        self.inner
            .discovery
            .lock()
            .await
            .as_ref()
            .and_then(|handle| handle.port())
    }

    /// Stop listening, close every connection and stop every backend
    pub async fn stop(&self) {
        info!("[Gateway] Stopping...");
        let handle = self.inner.discovery.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        let ids = self.connection_ids();
        for id in ids {
            self.inner.remove_connection(id);
        }

        self.inner.catalog.stop_all().await;
        info!("[Gateway] Stopped");
    }
}

impl GatewayInner {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn registry(&self) -> Arc<BackendRegistry> {
        self.registry.read().clone()
    }

    /// Enablement is read fresh on every call
    pub(crate) fn visible_tools(&self) -> Vec<ToolSpec> {
        if !self.is_enabled() {
            return Vec::new();
        }
        self.registry().list_tools(self.enablement.as_ref())
    }

    pub(crate) async fn call_tool(&self, name: &str, arguments: ToolArguments) -> Result<ToolOutput, ToolError> {
        if !self.is_enabled() {
            return Err(ToolError::Unavailable("Toolgate is turned off".to_string()));
        }

        let registry = self.registry();
        let entry = registry
            .find_tool(self.enablement.as_ref(), name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        debug!(provider_id = %entry.id, tool = %name, "[Gateway] Routing tool call");
        entry.provider.call(name, arguments).await
    }

    fn accept_connection<T>(this: &Arc<Self>, transport: T) -> ConnectionId
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConnectionId(this.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (stream, health) = MonitoredStream::new(transport);
        let cancel = CancellationToken::new();
        let session = Arc::new(ConnectionSession::new(id, health, cancel.clone()));

        this.connections.lock().insert(session.clone());
        this.events
            .sender()
            .emit(GatewayEvent::ClientConnected { connection_id: id });
        info!(connection_id = %id, "[Gateway] Connection opened");

        let handler = SessionHandler::new(session.clone(), Arc::downgrade(this));
        let weak = Arc::downgrade(this);
        let task = tokio::spawn(async move {
            let reason = supervise(handler, stream, cancel).await;
            debug!(connection_id = %id, reason = %reason, "[Gateway] Session ended");
            if let Some(gateway) = weak.upgrade() {
                gateway.remove_connection(id);
            }
        });

        // The session may already be gone if it failed instantly
        if !this.connections.lock().set_task(id, task.abort_handle()) {
            task.abort();
        }

        this.spawn_setup_timeout(session, SessionPhase::handshake_complete);
        id
    }

    /// Remove the connection unless `done(phase)` holds once the setup timeout
    /// elapses. Armed on accept for the handshake and again after approval
    /// for `notifications/initialized`; the approval wait in between is not
    /// timed.
    pub(crate) fn spawn_setup_timeout(
        self: &Arc<Self>,
        session: Arc<ConnectionSession>,
        done: fn(SessionPhase) -> bool,
    ) {
        let weak = Arc::downgrade(self);
        let timeout = self.config.setup_timeout();
        let token = session.cancellation_token();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if done(session.phase()) {
                        return;
                    }
                    warn!(
                        connection_id = %session.id(),
                        phase = ?session.phase(),
                        "[Gateway] Connection setup timed out"
                    );
                    if let Some(gateway) = weak.upgrade() {
                        gateway.remove_connection(session.id());
                    }
                }
            }
        });
    }

    pub(crate) fn remove_connection(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().remove(id);
        let Some(entry) = removed else {
            return false;
        };

        entry.session.stop();
        if let Some(task) = entry.task {
            task.abort();
        }

        let client = entry.session.client();
        info!(connection_id = %id, client = ?client, "[Gateway] Connection removed");
        self.events
            .sender()
            .emit(GatewayEvent::ClientDisconnected { connection_id: id, client });
        true
    }

    /// Bind an approved identity to its connection, closing the one it replaces
    pub(crate) fn register_client(&self, id: ConnectionId, client: &ClientIdentity) {
        let previous = self.connections.lock().bind_client(client.clone(), id);
        if let Some(previous) = previous {
            info!(
                client = %client,
                previous = %previous,
                connection_id = %id,
                "[Gateway] Client reconnected, closing previous connection"
            );
            self.remove_connection(previous);
        }
    }

    pub(crate) async fn notify_tools_changed(&self) -> usize {
        let sessions: Vec<_> = self
            .connections
            .lock()
            .sessions()
            .into_iter()
            .filter(|session| session.is_active())
            .collect();

        let outcomes = join_all(sessions.iter().map(|session| session.notify_tool_list_changed())).await;

        let mut notified = 0;
        for (session, outcome) in sessions.iter().zip(outcomes) {
            match outcome {
                NotifyOutcome::Sent => notified += 1,
                NotifyOutcome::Skipped => {}
                NotifyOutcome::TransportFailed(error) => {
                    warn!(
                        connection_id = %session.id(),
                        error = %error,
                        "[Gateway] Notification failed, removing connection"
                    );
                    self.remove_connection(session.id());
                }
            }
        }

        debug!(notified, "[Gateway] tools/list_changed sent");
        self.events
            .sender()
            .emit(GatewayEvent::ToolsChanged { notified });
        notified
    }

    async fn activate_entry(&self, entry: &ProviderEntry) -> Result<(), ActivationError> {
        match entry.provider.activate().await {
            Ok(()) => {
                let tool_count = entry.provider.list_tools().len();
                info!(provider_id = %entry.id, tool_count, "[Gateway] Provider activated");
                self.events.sender().emit(GatewayEvent::BackendActivated {
                    provider_id: entry.id.to_string(),
                    tool_count,
                });
                Ok(())
            }
            Err(e) => {
                warn!(provider_id = %entry.id, error = %e, "[Gateway] Provider activation failed");
                self.events.sender().emit(GatewayEvent::BackendActivationFailed {
                    provider_id: entry.id.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Best-effort background activation of `pending` entries of `registry`
    fn spawn_activation(self: &Arc<Self>, registry: Arc<BackendRegistry>, pending: Vec<ProviderEntry>) {
        if pending.is_empty() {
            return;
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let Some(gateway) = weak.upgrade() else {
                return;
            };
            debug!(count = pending.len(), "[Gateway] Activating providers");

            let results = join_all(pending.iter().map(|entry| gateway.activate_entry(entry))).await;
            let activated = results.iter().filter(|result| result.is_ok()).count();

            // A newer registry already notified for itself
            let current = Arc::ptr_eq(&gateway.registry(), &registry);
            if activated > 0 && current {
                gateway.notify_tools_changed().await;
            }
        });
    }
}

/// Drive one session until the client leaves or the connection is cancelled
async fn supervise<T>(handler: SessionHandler, stream: MonitoredStream<T>, cancel: CancellationToken) -> String
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let running = tokio::select! {
        _ = cancel.cancelled() => return "cancelled during handshake".to_string(),
        result = handler.serve(stream) => match result {
            Ok(running) => running,
            Err(e) => return format!("handshake failed: {}", e),
        },
    };

    tokio::select! {
        _ = cancel.cancelled() => "cancelled".to_string(),
        quit = running.waiting() => match quit {
            Ok(reason) => format!("{:?}", reason),
            Err(e) => format!("service task failed: {}", e),
        },
    }
}
