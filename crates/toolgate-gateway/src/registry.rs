//! Backend registry
//!
//! Immutable snapshot of every tool provider the gateway serves. The gateway
//! swaps whole registries (`Arc<BackendRegistry>`) instead of mutating one, so
//! a session always routes against a consistent set of providers.

use std::collections::BTreeSet;
use std::sync::Arc;

use toolgate_core::{EnablementStore, ProviderId, ProviderInfo, ProviderKind, ToolProvider, ToolSpec};

/// One provider plus its display metadata
#[derive(Clone)]
pub struct ProviderEntry {
    pub id: ProviderId,
    pub info: ProviderInfo,
    pub provider: Arc<dyn ToolProvider>,
    /// Static switch from the host. The enablement store is consulted on top.
    pub enabled: bool,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn ToolProvider>) -> Self {
        Self {
            id: provider.id().clone(),
            info: provider.info(),
            provider,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.info.kind
    }

    fn is_enabled(&self, flags: &dyn EnablementStore) -> bool {
        self.enabled && flags.is_provider_enabled(&self.id)
    }

    /// Tools this entry exposes right now, after per-tool flags
    fn visible_tools(&self, flags: &dyn EnablementStore) -> Vec<ToolSpec> {
        if !self.is_enabled(flags) || !self.provider.is_activated() {
            return Vec::new();
        }
        self.provider
            .list_tools()
            .into_iter()
            .filter(|tool| flags.is_tool_enabled(&self.id, &tool.name))
            .collect()
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("id", &self.id)
            .field("kind", &self.info.kind)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Default, Debug)]
pub struct BackendRegistry {
    entries: Vec<ProviderEntry>,
}

impl BackendRegistry {
    /// Build a registry. Later duplicates of a provider id are dropped.
    pub fn new(entries: Vec<ProviderEntry>) -> Self {
        let mut seen = BTreeSet::new();
        let entries = entries
            .into_iter()
            .filter(|entry| seen.insert(entry.id.clone()))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn get(&self, id: &ProviderId) -> Option<&ProviderEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concatenated tools of every enabled provider, in registration order
    pub fn list_tools(&self, flags: &dyn EnablementStore) -> Vec<ToolSpec> {
        self.entries
            .iter()
            .flat_map(|entry| entry.visible_tools(flags))
            .collect()
    }

    /// First enabled provider that exposes an enabled tool named `name`
    pub fn find_tool(&self, flags: &dyn EnablementStore, name: &str) -> Option<&ProviderEntry> {
        self.entries.iter().find(|entry| {
            entry
                .visible_tools(flags)
                .iter()
                .any(|tool| tool.name == name)
        })
    }

    /// Remote providers that still need a connection
    pub fn inactive_remotes(&self) -> Vec<ProviderEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.kind() == ProviderKind::Remote && !entry.provider.is_activated())
            .cloned()
            .collect()
    }
}
