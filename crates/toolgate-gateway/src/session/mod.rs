//! Connection sessions
//!
//! One [`ConnectionSession`] per accepted transport. The session holds the
//! state the gateway needs to reach the client later (phase, identity, peer,
//! cancellation); the rmcp [`SessionHandler`] drives the protocol itself.

mod content;
mod handler;
mod transport;

pub use content::{canonical_json, to_contents};
pub use handler::SessionHandler;
pub use transport::{MonitoredStream, TransportHealth};

use parking_lot::RwLock;
use rmcp::{service::Peer, RoleServer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use toolgate_core::{ApprovalState, ClientIdentity, ConnectionId, SessionPhase};

/// Result of pushing `notifications/tools/list_changed` to one client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Session is not active yet or already stopped
    Skipped,
    /// The transport is gone; the connection should be removed
    TransportFailed(String),
}

pub struct ConnectionSession {
    id: ConnectionId,
    phase: RwLock<SessionPhase>,
    approval: RwLock<ApprovalState>,
    client: RwLock<Option<ClientIdentity>>,
    peer: RwLock<Option<Peer<RoleServer>>>,
    health: TransportHealth,
    cancel: CancellationToken,
}

impl ConnectionSession {
    pub fn new(id: ConnectionId, health: TransportHealth, cancel: CancellationToken) -> Self {
        Self {
            id,
            phase: RwLock::new(SessionPhase::Created),
            approval: RwLock::new(ApprovalState::Unapproved),
            client: RwLock::new(None),
            peer: RwLock::new(None),
            health,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    /// Move forward in the state machine. Illegal transitions are ignored
    /// and reported as `false`.
    pub fn advance(&self, next: SessionPhase) -> bool {
        let mut phase = self.phase.write();
        if phase.can_advance_to(next) {
            debug!(connection_id = %self.id, from = ?*phase, to = ?next, "[Session] Phase change");
            *phase = next;
            true
        } else {
            false
        }
    }

    pub fn approval_state(&self) -> ApprovalState {
        *self.approval.read()
    }

    pub fn set_approval_state(&self, state: ApprovalState) {
        *self.approval.write() = state;
    }

    pub fn client(&self) -> Option<ClientIdentity> {
        self.client.read().clone()
    }

    pub fn set_client(&self, client: ClientIdentity) {
        *self.client.write() = Some(client);
    }

    pub fn is_active(&self) -> bool {
        self.phase() == SessionPhase::Active
    }

    pub fn attach_peer(&self, peer: Peer<RoleServer>) {
        *self.peer.write() = Some(peer);
    }

    pub fn health(&self) -> &TransportHealth {
        &self.health
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the session. Safe to call any number of times.
    ///
    /// Cancelling the token ends the rmcp service, which drops and closes
    /// the transport.
    pub fn stop(&self) {
        self.advance(SessionPhase::Stopped);
        self.peer.write().take();
        self.cancel.cancel();
    }

    pub async fn notify_tool_list_changed(&self) -> NotifyOutcome {
        if !self.is_active() {
            return NotifyOutcome::Skipped;
        }
        // Clone out of the lock before awaiting
        let Some(peer) = self.peer.read().clone() else {
            return NotifyOutcome::Skipped;
        };

        match peer.notify_tool_list_changed().await {
            Ok(()) => NotifyOutcome::Sent,
            Err(e) => {
                let message = e.to_string();
                if self.health.is_failed() || is_transport_failure(&message) {
                    NotifyOutcome::TransportFailed(message)
                } else {
                    warn!(
                        connection_id = %self.id,
                        error = %message,
                        "[Session] Failed to send tools/list_changed"
                    );
                    NotifyOutcome::Skipped
                }
            }
        }
    }
}

/// Heuristic for send errors that mean the peer is gone
fn is_transport_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["closed", "reset", "cancel", "broken pipe", "eof"]
        .iter()
        .any(|needle| lower.contains(needle))
}
