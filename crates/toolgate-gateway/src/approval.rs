//! Connection approval
//!
//! New client identities are admitted by a human. The coordinator makes sure
//! only one prompt is open per identity: connections that arrive while a
//! prompt is outstanding wait on the same decision instead of raising their
//! own dialog.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use toolgate_core::{ClientIdentity, ConnectionId, EventSender, GatewayEvent, TrustStore};

/// What the approval UI is asked about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub connection_id: ConnectionId,
    pub client: ClientIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApprovalDecision {
    pub approved: bool,
    /// Add the identity to the trust store before admitting it
    pub always_trust: bool,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self {
            approved: true,
            always_trust: false,
        }
    }

    pub fn approve_always() -> Self {
        Self {
            approved: true,
            always_trust: true,
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }
}

/// Human-facing approval port
///
/// `request` suspends until someone decides. It may take arbitrarily long.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    async fn request(&self, request: ApprovalRequest) -> ApprovalDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    /// Identity was already in the trust store
    Trusted,
    Approved { always_trust: bool },
    Denied,
}

impl ApprovalOutcome {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Self::Denied)
    }
}

type Waiters = HashMap<ClientIdentity, Vec<oneshot::Sender<ApprovalDecision>>>;

#[derive(Clone)]
pub struct ApprovalCoordinator {
    trust: Arc<TrustStore>,
    prompt: Arc<dyn ApprovalPrompt>,
    pending: Arc<Mutex<Waiters>>,
    events: EventSender,
}

impl ApprovalCoordinator {
    pub fn new(trust: Arc<TrustStore>, prompt: Arc<dyn ApprovalPrompt>, events: EventSender) -> Self {
        Self {
            trust,
            prompt,
            pending: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    pub fn trust_store(&self) -> &Arc<TrustStore> {
        &self.trust
    }

    /// Whether a prompt is currently open for `client`
    pub fn is_pending(&self, client: &ClientIdentity) -> bool {
        self.pending.lock().contains_key(client)
    }

    /// Connections waiting on the open prompt for `client`
    pub fn waiter_count(&self, client: &ClientIdentity) -> usize {
        self.pending.lock().get(client).map_or(0, Vec::len)
    }

    /// Decide whether `client` may use connection `connection_id`
    pub async fn request_approval(
        &self,
        connection_id: ConnectionId,
        client: &ClientIdentity,
    ) -> ApprovalOutcome {
        let (tx, rx) = oneshot::channel();
        let opens_prompt = {
            let mut pending = self.pending.lock();
            // Checked under the lock: a decision that adds trust lands in the
            // store before its waiters are drained.
            if self.trust.contains(client) {
                None
            } else {
                let waiters = pending.entry(client.clone()).or_default();
                waiters.push(tx);
                Some(waiters.len() == 1)
            }
        };

        let Some(opens_prompt) = opens_prompt else {
            info!(
                connection_id = %connection_id,
                client = %client,
                "[Approval] Trusted client, skipping prompt"
            );
            self.events.emit(GatewayEvent::ClientAutoApproved {
                connection_id,
                client: client.clone(),
            });
            return ApprovalOutcome::Trusted;
        };

        if opens_prompt {
            self.spawn_prompt(connection_id, client.clone());
        } else {
            debug!(
                connection_id = %connection_id,
                client = %client,
                "[Approval] Prompt already open, waiting on it"
            );
        }

        // Unanswered prompts resolve to deny through `OpenPrompt`
        let decision = rx.await.unwrap_or_default();

        if decision.approved {
            self.events.emit(GatewayEvent::ClientApproved {
                connection_id,
                client: client.clone(),
                always_trust: decision.always_trust,
            });
            ApprovalOutcome::Approved {
                always_trust: decision.always_trust,
            }
        } else {
            self.events.emit(GatewayEvent::ClientDenied {
                connection_id,
                client: client.clone(),
            });
            ApprovalOutcome::Denied
        }
    }

    /// Ask the UI in a detached task so the decision still reaches other
    /// waiters if the first connection goes away.
    fn spawn_prompt(&self, connection_id: ConnectionId, client: ClientIdentity) {
        let prompt = self.prompt.clone();
        let trust = self.trust.clone();
        let open = OpenPrompt::new(self.pending.clone(), client);

        tokio::spawn(async move {
            let client = open.client.clone();
            info!(
                connection_id = %connection_id,
                client = %client,
                "[Approval] Asking for approval"
            );
            let decision = prompt
                .request(ApprovalRequest {
                    connection_id,
                    client: client.clone(),
                })
                .await;

            if decision.approved && decision.always_trust {
                if let Err(e) = trust.insert(&client).await {
                    warn!(client = %client, error = %e, "[Approval] Failed to persist trust");
                }
            }

            let waiters = open.resolve(decision);
            info!(
                client = %client,
                approved = decision.approved,
                always_trust = decision.always_trust,
                waiters,
                "[Approval] Decision made"
            );
        });
    }
}

/// The pending entry of one open prompt
///
/// Dropping it without a decision (the prompt panicked or its task was
/// aborted) denies every waiter and frees the identity for a new prompt.
struct OpenPrompt {
    pending: Arc<Mutex<Waiters>>,
    client: ClientIdentity,
    settled: bool,
}

impl OpenPrompt {
    fn new(pending: Arc<Mutex<Waiters>>, client: ClientIdentity) -> Self {
        Self {
            pending,
            client,
            settled: false,
        }
    }

    /// Answer every waiter. Returns how many there were.
    fn resolve(mut self, decision: ApprovalDecision) -> usize {
        self.settled = true;
        self.drain(decision)
    }

    fn drain(&self, decision: ApprovalDecision) -> usize {
        let waiters = self.pending.lock().remove(&self.client).unwrap_or_default();
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(decision);
        }
        count
    }
}

impl Drop for OpenPrompt {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let abandoned = self.drain(ApprovalDecision::deny());
        warn!(
            client = %self.client,
            waiters = abandoned,
            "[Approval] Prompt ended without a decision, denying"
        );
    }
}
