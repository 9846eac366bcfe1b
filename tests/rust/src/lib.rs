//! Shared test utilities and fixtures for Toolgate integration tests.

pub use toolgate_core::{
    ClientIdentity, ConnectionId, GatewayConfig, GatewayEvent, ProviderId, ServerEntry, ToolSpec,
};
pub use toolgate_gateway::{DependenciesBuilder, GatewayServer};

pub use mocks::{start_remote_mcp_server, RecordingAdvertiser, ScriptedPrompt};

/// Event testing utilities
pub mod events {
    use std::time::Duration;
    use toolgate_core::{EventReceiver, GatewayEvent};

    /// Wait for the first event matching `predicate`
    pub async fn wait_for_event<F>(
        rx: &mut EventReceiver,
        timeout: Duration,
        predicate: F,
    ) -> Option<GatewayEvent>
    where
        F: Fn(&GatewayEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) if predicate(&event) => return Some(event),
                Ok(Some(_)) => continue,
                Ok(None) => return None, // Bus closed
                Err(_) => return None,   // Timeout
            }
        }
    }

    /// Collect everything that arrives within `timeout`
    pub async fn collect_events(rx: &mut EventReceiver, timeout: Duration) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) | Err(_) => break,
            }
        }

        events
    }
}

/// Test fixture utilities
pub mod fixtures {
    use serde_json::Value;
    use std::path::Path;
    use std::sync::Arc;
    use toolgate_core::{
        BuiltinProvider, GatewayConfig, ToolArguments, ToolError, ToolOutput, ToolProvider,
        ToolSpec,
    };

    pub const SYSTEM_PROVIDER: &str = "system";

    /// Built-in provider with `echo` and `add`
    pub fn system_provider() -> Arc<dyn ToolProvider> {
        Arc::new(
            BuiltinProvider::new(SYSTEM_PROVIDER, "System")
                .with_tool(
                    ToolSpec::new("echo", "Echo the message back").with_input_schema(
                        serde_json::json!({
                            "type": "object",
                            "properties": {"message": {"type": "string"}},
                            "required": ["message"]
                        }),
                    ),
                    |args: ToolArguments| async move {
                        match args.get("message") {
                            Some(Value::String(text)) => Ok(ToolOutput::text(text.clone())),
                            _ => Err(ToolError::InvalidArguments("message is required".into())),
                        }
                    },
                )
                .with_tool(
                    ToolSpec::new("add", "Add two integers"),
                    |args: ToolArguments| async move {
                        let a = args.get("a").and_then(Value::as_i64).unwrap_or_default();
                        let b = args.get("b").and_then(Value::as_i64).unwrap_or_default();
                        Ok(ToolOutput::Json(Value::from(a + b)))
                    },
                ),
        )
    }

    /// Loopback-only config with short timeouts and state under `dir`
    pub fn test_config(dir: &Path) -> GatewayConfig {
        GatewayConfig {
            instance_name: "toolgate-test".to_string(),
            bind_address: "127.0.0.1".to_string(),
            port: 0,
            setup_timeout_secs: 2,
            health_check_interval_secs: 1,
            subprocess_handshake_timeout_secs: 10,
            subprocess_grace_period_ms: 100,
            remote_connect_timeout_secs: 2,
            rebind_backoff_min_ms: 10,
            rebind_backoff_max_ms: 100,
            data_dir: dir.join("data"),
            cache_dir: dir.join("cache"),
            ..Default::default()
        }
    }

    /// Tool call arguments from a JSON object literal
    pub fn arguments(value: Value) -> ToolArguments {
        match value {
            Value::Object(map) => map,
            _ => ToolArguments::new(),
        }
    }
}

/// MCP test client
pub mod client {
    use rmcp::model::{
        CallToolRequestParams, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
    };
    use rmcp::service::{NotificationContext, RunningService};
    use rmcp::{RoleClient, ServiceExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;
    use toolgate_core::{ConnectionId, ToolArguments};
    use toolgate_gateway::GatewayServer;

    pub type TestClient = RunningService<RoleClient, CountingClient>;

    /// Client handler that counts `tools/list_changed` notifications
    #[derive(Clone)]
    pub struct CountingClient {
        name: String,
        list_changed: Arc<AtomicUsize>,
        notify: Arc<Notify>,
    }

    impl CountingClient {
        pub fn new(name: impl Into<String>) -> Self {
            Self {
                name: name.into(),
                list_changed: Arc::new(AtomicUsize::new(0)),
                notify: Arc::new(Notify::new()),
            }
        }

        pub fn list_changed_count(&self) -> usize {
            self.list_changed.load(Ordering::SeqCst)
        }

        /// Wait until at least `count` notifications arrived
        pub async fn wait_for_list_changed(&self, count: usize, timeout: Duration) -> bool {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.notify.notified();
                if self.list_changed_count() >= count {
                    return true;
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return self.list_changed_count() >= count;
                }
            }
        }
    }

    impl rmcp::ClientHandler for CountingClient {
        fn get_info(&self) -> ClientInfo {
            ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: self.name.clone(),
                    version: "0.0.0".to_string(),
                    ..Default::default()
                },
                meta: None,
            }
        }

        fn on_tool_list_changed(
            &self,
            _context: NotificationContext<RoleClient>,
        ) -> impl std::future::Future<Output = ()> + Send + '_ {
            self.list_changed.fetch_add(1, Ordering::SeqCst);
            self.notify.notify_waiters();
            std::future::ready(())
        }
    }

    /// Connect `handler` to the gateway over an in-memory pipe
    ///
    /// Returns once the handshake (and therefore approval) has finished.
    pub async fn connect(
        gateway: &GatewayServer,
        handler: CountingClient,
    ) -> (ConnectionId, anyhow::Result<TestClient>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let id = gateway.accept_connection(server_side);
        let client = handler.serve(client_side).await.map_err(anyhow::Error::from);
        (id, client)
    }

    /// Connect and wait until the session is active (approved and initialized)
    pub async fn connect_active(gateway: &GatewayServer, handler: CountingClient) -> (ConnectionId, TestClient) {
        let (id, client) = connect(gateway, handler).await;
        let client = client.expect("Client handshake failed");
        let active = crate::async_helpers::eventually(crate::async_helpers::DEFAULT_TIMEOUT, || {
            gateway.session(id).is_some_and(|session| session.is_active())
        })
        .await;
        assert!(active, "Session {} never became active", id);
        (id, client)
    }

    /// Call a tool and return the result
    pub async fn call(
        client: &TestClient,
        name: &str,
        arguments: ToolArguments,
    ) -> anyhow::Result<CallToolResult> {
        let result = client
            .peer()
            .call_tool(CallToolRequestParams {
                name: name.to_string().into(),
                arguments: Some(arguments),
                task: None,
                meta: None,
            })
            .await?;
        Ok(result)
    }

    /// First text block of a result
    pub fn first_text(result: &CallToolResult) -> Option<String> {
        result
            .content
            .first()
            .and_then(|content| content.as_text())
            .map(|text| text.text.clone())
    }

    /// Names of the tools the client currently sees
    pub async fn tool_names(client: &TestClient) -> anyhow::Result<Vec<String>> {
        let tools = client.peer().list_all_tools().await?;
        Ok(tools.into_iter().map(|tool| tool.name.to_string()).collect())
    }
}

/// Gateway construction helpers
pub mod harness {
    use std::sync::Arc;
    use tempfile::TempDir;
    use toolgate_core::{EnablementStore, MemoryEnablementStore, ToolProvider, TrustStore};
    use toolgate_gateway::{DependenciesBuilder, GatewayServer};

    use crate::fixtures::{system_provider, test_config};
    use crate::mocks::{RecordingAdvertiser, ScriptedPrompt};

    /// Gateway plus handles to all of its mock ports
    pub struct GatewayHarness {
        pub gateway: GatewayServer,
        pub prompt: Arc<ScriptedPrompt>,
        pub trust: Arc<TrustStore>,
        pub enablement: Arc<MemoryEnablementStore>,
        pub advertiser: Arc<RecordingAdvertiser>,
        pub dir: TempDir,
    }

    impl GatewayHarness {
        /// Gateway with the `system` built-in and the given prompt
        pub fn new(prompt: ScriptedPrompt) -> Self {
            Self::build(prompt, TrustStore::in_memory(), vec![system_provider()])
        }

        pub fn with_trust(prompt: ScriptedPrompt, trust: TrustStore) -> Self {
            Self::build(prompt, trust, vec![system_provider()])
        }

        /// Gateway without built-in providers
        pub fn bare(prompt: ScriptedPrompt) -> Self {
            Self::build(prompt, TrustStore::in_memory(), Vec::new())
        }

        fn build(prompt: ScriptedPrompt, trust: TrustStore, builtins: Vec<Arc<dyn ToolProvider>>) -> Self {
            let dir = tempfile::tempdir().expect("Failed to create temp dir");
            let prompt = Arc::new(prompt);
            let trust = Arc::new(trust);
            let enablement = Arc::new(MemoryEnablementStore::new());
            let advertiser = Arc::new(RecordingAdvertiser::default());

            let mut builder = DependenciesBuilder::new()
                .with_approval_prompt(prompt.clone())
                .with_trust_store(trust.clone())
                .with_enablement(enablement.clone() as Arc<dyn EnablementStore>)
                .with_advertiser(advertiser.clone());
            for provider in builtins {
                builder = builder.with_builtin(provider);
            }
            let dependencies = builder.build().expect("Failed to build dependencies");

            let gateway = GatewayServer::new(test_config(dir.path()), dependencies);
            Self {
                gateway,
                prompt,
                trust,
                enablement,
                advertiser,
                dir,
            }
        }
    }
}

/// Async test helpers
pub mod async_helpers {
    use std::time::Duration;
    use tokio::time::timeout;

    /// Run an async operation with a timeout
    pub async fn with_timeout<F, T>(duration: Duration, f: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        timeout(duration, f).await.expect("Operation timed out")
    }

    /// Poll `condition` until it holds or `duration` elapses
    pub async fn eventually<F>(duration: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + duration;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    /// Default test timeout (5 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Route gateway logs to the test writer (`RUST_LOG` controls the level)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
