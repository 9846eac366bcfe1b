//! Connection identity and lifecycle states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway-local connection identifier, allocated on accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identity a client declares during the protocol handshake
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Admission state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    #[default]
    Unapproved,
    Pending,
    Approved,
    Denied,
}

/// ConnectionSession state machine
///
/// `Created → Handshaking → AwaitingApproval → Active → Stopped`. Any state
/// may jump straight to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Created,
    Handshaking,
    AwaitingApproval,
    Active,
    Stopped,
}

impl SessionPhase {
    /// Whether the client has sent `initialize`.
    /// The approval wait that follows is unbounded, so it counts as done.
    pub fn handshake_complete(self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::Active | Self::Stopped)
    }

    /// Whether setup is over: the session serves requests or is gone
    pub fn setup_complete(self) -> bool {
        matches!(self, Self::Active | Self::Stopped)
    }

    /// Legal forward transition check
    pub fn can_advance_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        match (self, next) {
            (Stopped, _) => false,
            (_, Stopped) => true,
            (Created, Handshaking) => true,
            (Handshaking, AwaitingApproval) => true,
            (AwaitingApproval, Active) => true,
            _ => false,
        }
    }
}
