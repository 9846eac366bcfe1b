//! Gateway Events
//!
//! Facts emitted by the gateway runtime and consumed by hosts (terminal UI,
//! logs, tests). Events never drive gateway behaviour themselves.
//!
//! # Serialization
//!
//! Events serialize with a `type` field containing the snake_case variant name:
//! ```json
//! { "type": "client_approved", "connection_id": 3, "client": "cursor" }
//! ```

use serde::{Deserialize, Serialize};

use super::{ClientIdentity, ConnectionId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    // ════════════════════════════════════════════════════════════════════════
    // CONNECTIONS
    // ════════════════════════════════════════════════════════════════════════
    /// A transport was accepted and a session created
    ClientConnected { connection_id: ConnectionId },

    /// A human approved the client
    ClientApproved {
        connection_id: ConnectionId,
        client: ClientIdentity,
        always_trust: bool,
    },

    /// The client was in the trust store and skipped the prompt
    ClientAutoApproved {
        connection_id: ConnectionId,
        client: ClientIdentity,
    },

    ClientDenied {
        connection_id: ConnectionId,
        client: ClientIdentity,
    },

    /// The connection was removed (idempotent removals emit once)
    ClientDisconnected {
        connection_id: ConnectionId,
        #[serde(skip_serializing_if = "Option::is_none")]
        client: Option<ClientIdentity>,
    },

    // ════════════════════════════════════════════════════════════════════════
    // GATEWAY
    // ════════════════════════════════════════════════════════════════════════
    /// The callable tool set changed and sessions were notified
    ToolsChanged { notified: usize },

    GatewayEnabledChanged { enabled: bool },

    /// The listener is bound and advertised
    ListenerReady { port: u16 },

    // ════════════════════════════════════════════════════════════════════════
    // BACKENDS
    // ════════════════════════════════════════════════════════════════════════
    BackendActivated { provider_id: String, tool_count: usize },

    BackendActivationFailed { provider_id: String, error: String },
}

impl GatewayEvent {
    /// Get event type name for logging/debugging
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ClientConnected { .. } => "client_connected",
            Self::ClientApproved { .. } => "client_approved",
            Self::ClientAutoApproved { .. } => "client_auto_approved",
            Self::ClientDenied { .. } => "client_denied",
            Self::ClientDisconnected { .. } => "client_disconnected",
            Self::ToolsChanged { .. } => "tools_changed",
            Self::GatewayEnabledChanged { .. } => "gateway_enabled_changed",
            Self::ListenerReady { .. } => "listener_ready",
            Self::BackendActivated { .. } => "backend_activated",
            Self::BackendActivationFailed { .. } => "backend_activation_failed",
        }
    }

    /// Get the connection id if this event is connection-scoped
    pub fn connection_id(&self) -> Option<ConnectionId> {
        match self {
            Self::ClientConnected { connection_id }
            | Self::ClientApproved { connection_id, .. }
            | Self::ClientAutoApproved { connection_id, .. }
            | Self::ClientDenied { connection_id, .. }
            | Self::ClientDisconnected { connection_id, .. } => Some(*connection_id),
            Self::ToolsChanged { .. }
            | Self::GatewayEnabledChanged { .. }
            | Self::ListenerReady { .. }
            | Self::BackendActivated { .. }
            | Self::BackendActivationFailed { .. } => None,
        }
    }
}
