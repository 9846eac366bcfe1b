//! Tool provider contract
//!
//! Every source of tools (built-in capability, subprocess server, remote
//! server) implements [`ToolProvider`]. The gateway only ever talks to this
//! trait, so adding a backend kind never touches session code.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::{ToolArguments, ToolError, ToolOutput, ToolSpec};

/// Stable provider identifier
///
/// Built-in providers use a fixed name (`system`); server-backed providers use
/// their `ServerEntry` UUID so the id survives registry rebuilds and renames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for ProviderId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Builtin,
    Subprocess,
    Remote,
}

/// Display metadata for a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub display_name: String,
    pub kind: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Why a backend failed to activate
///
/// Activation failures are local to one backend: the backend stays
/// deactivated and `activate()` may be called again.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActivationError {
    #[error("Command not found: {command}")]
    CommandNotFound { command: String },

    #[error("Bundled {runtime} runtime is missing (expected {expected}); reinstall the application")]
    RuntimeMissing { runtime: String, expected: String },

    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("Process exited immediately ({status}){}", format_stderr(.stderr))]
    ExitedImmediately { status: String, stderr: Vec<String> },

    #[error("Handshake timeout ({0}s){}", format_stderr(.1))]
    HandshakeTimeout(u64, Vec<String>),

    #[error("MCP handshake failed: {0}")]
    Handshake(String),

    #[error("Failed to list tools: {0}")]
    ListTools(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection failed: {0}")]
    Connect(String),
}

fn format_stderr(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("\nstderr:\n{}", lines.join("\n"))
    }
}

/// Capability set shared by every provider variant
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn id(&self) -> &ProviderId;

    fn info(&self) -> ProviderInfo;

    /// Tools currently exposed. Only authoritative while activated.
    fn list_tools(&self) -> Vec<ToolSpec>;

    fn is_activated(&self) -> bool {
        true
    }

    async fn activate(&self) -> Result<(), ActivationError> {
        Ok(())
    }

    async fn deactivate(&self) {}

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<ToolOutput, ToolError>;

    fn has_tool(&self, name: &str) -> bool {
        self.list_tools().iter().any(|tool| tool.name == name)
    }
}

type ToolHandler =
    Arc<dyn Fn(ToolArguments) -> BoxFuture<'static, Result<ToolOutput, ToolError>> + Send + Sync>;

/// In-process provider made of closure-backed tools
pub struct BuiltinProvider {
    id: ProviderId,
    info: ProviderInfo,
    tools: Vec<ToolSpec>,
    handlers: HashMap<String, ToolHandler>,
}

impl BuiltinProvider {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: ProviderId::new(id),
            info: ProviderInfo {
                display_name: display_name.into(),
                kind: ProviderKind::Builtin,
                description: None,
            },
            tools: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = Some(description.into());
        self
    }

    /// Register a tool. A later registration with the same name replaces it.
    pub fn with_tool<F, Fut>(mut self, spec: ToolSpec, handler: F) -> Self
    where
        F: Fn(ToolArguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let name = spec.name.clone();
        self.tools.retain(|tool| tool.name != name);
        self.tools.push(spec);
        let boxed: ToolHandler = Arc::new(
            move |args: ToolArguments| -> BoxFuture<'static, Result<ToolOutput, ToolError>> {
                Box::pin(handler(args))
            },
        );
        self.handlers.insert(name, boxed);
        self
    }
}

#[async_trait]
impl ToolProvider for BuiltinProvider {
    fn id(&self) -> &ProviderId {
        &self.id
    }

    fn info(&self) -> ProviderInfo {
        self.info.clone()
    }

    fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.clone()
    }

    async fn call(&self, name: &str, arguments: ToolArguments) -> Result<ToolOutput, ToolError> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        handler(arguments).await
    }
}
