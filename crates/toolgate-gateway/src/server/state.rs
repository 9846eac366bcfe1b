//! Live connection table

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::AbortHandle;

use toolgate_core::{ClientIdentity, ConnectionId};

use crate::session::ConnectionSession;

pub(crate) struct ConnectionEntry {
    pub session: Arc<ConnectionSession>,
    /// Supervising task running the rmcp service
    pub task: Option<AbortHandle>,
}

/// Connections by id, plus the reverse index from approved client identity
#[derive(Default)]
pub(crate) struct ConnectionTable {
    by_id: HashMap<ConnectionId, ConnectionEntry>,
    by_client: HashMap<ClientIdentity, ConnectionId>,
}

impl ConnectionTable {
    pub fn insert(&mut self, session: Arc<ConnectionSession>) {
        self.by_id.insert(
            session.id(),
            ConnectionEntry {
                session,
                task: None,
            },
        );
    }

    /// Attach the supervising task. Returns false if the connection is gone.
    pub fn set_task(&mut self, id: ConnectionId, task: AbortHandle) -> bool {
        match self.by_id.get_mut(&id) {
            Some(entry) => {
                entry.task = Some(task);
                true
            }
            None => false,
        }
    }

    /// Record `client` as owned by `id`; returns the connection it replaced
    pub fn bind_client(&mut self, client: ClientIdentity, id: ConnectionId) -> Option<ConnectionId> {
        self.by_client
            .insert(client, id)
            .filter(|previous| *previous != id)
    }

    pub fn connection_for(&self, client: &ClientIdentity) -> Option<ConnectionId> {
        self.by_client.get(client).copied()
    }

    /// Remove `id` and any identity index entry still pointing at it
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.by_id.remove(&id)?;
        self.by_client.retain(|_, owner| *owner != id);
        Some(entry)
    }

    pub fn sessions(&self) -> Vec<Arc<ConnectionSession>> {
        self.by_id.values().map(|entry| entry.session.clone()).collect()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }
}
