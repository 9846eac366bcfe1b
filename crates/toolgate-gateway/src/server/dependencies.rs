//! Dependency Injection Container
//!
//! Everything the gateway talks to that a host may want to replace (approval
//! UI, flag store, trust store, service advertisement) is injected here, so
//! tests can run the full gateway without a network or a human.

use std::sync::Arc;

use toolgate_core::{EnablementStore, EventBus, MemoryEnablementStore, ToolProvider, TrustStore};

use crate::approval::ApprovalPrompt;
use crate::discovery::{NoopAdvertiser, ServiceAdvertiser};

#[derive(Clone)]
pub struct GatewayDependencies {
    pub approval_prompt: Arc<dyn ApprovalPrompt>,
    pub trust_store: Arc<TrustStore>,
    pub enablement: Arc<dyn EnablementStore>,
    pub advertiser: Arc<dyn ServiceAdvertiser>,
    pub event_bus: EventBus,
    /// In-process providers, listed before server-backed ones
    pub builtins: Vec<Arc<dyn ToolProvider>>,
}

/// Builder for GatewayDependencies
pub struct DependenciesBuilder {
    approval_prompt: Option<Arc<dyn ApprovalPrompt>>,
    trust_store: Option<Arc<TrustStore>>,
    enablement: Option<Arc<dyn EnablementStore>>,
    advertiser: Option<Arc<dyn ServiceAdvertiser>>,
    event_bus: Option<EventBus>,
    builtins: Vec<Arc<dyn ToolProvider>>,
}

impl DependenciesBuilder {
    pub fn new() -> Self {
        Self {
            approval_prompt: None,
            trust_store: None,
            enablement: None,
            advertiser: None,
            event_bus: None,
            builtins: Vec::new(),
        }
    }

    pub fn with_approval_prompt(mut self, prompt: Arc<dyn ApprovalPrompt>) -> Self {
        self.approval_prompt = Some(prompt);
        self
    }

    pub fn with_trust_store(mut self, store: Arc<TrustStore>) -> Self {
        self.trust_store = Some(store);
        self
    }

    pub fn with_enablement(mut self, store: Arc<dyn EnablementStore>) -> Self {
        self.enablement = Some(store);
        self
    }

    pub fn with_advertiser(mut self, advertiser: Arc<dyn ServiceAdvertiser>) -> Self {
        self.advertiser = Some(advertiser);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_builtin(mut self, provider: Arc<dyn ToolProvider>) -> Self {
        self.builtins.push(provider);
        self
    }

    pub fn build(self) -> Result<GatewayDependencies, String> {
        let approval_prompt = self
            .approval_prompt
            .ok_or("approval_prompt is required")?;

        Ok(GatewayDependencies {
            approval_prompt,
            trust_store: self
                .trust_store
                .unwrap_or_else(|| Arc::new(TrustStore::in_memory())),
            enablement: self
                .enablement
                .unwrap_or_else(|| Arc::new(MemoryEnablementStore::new())),
            advertiser: self.advertiser.unwrap_or_else(|| Arc::new(NoopAdvertiser)),
            event_bus: self.event_bus.unwrap_or_default(),
            builtins: self.builtins,
        })
    }
}

impl Default for DependenciesBuilder {
    fn default() -> Self {
        Self::new()
    }
}
