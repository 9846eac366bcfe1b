//! Per-provider and per-tool enablement flags
//!
//! Flags are owned by the host (settings UI, config file) and read through on
//! every `tools/list` and `tools/call`. The gateway never caches them.
//!
//! Keys:
//! - `providerId` → provider enabled
//! - `providerId.toolName` → tool enabled
//!
//! Missing keys mean enabled.

use dashmap::DashMap;

use crate::ProviderId;

/// Build the per-tool flag key
pub fn tool_key(provider_id: &ProviderId, tool_name: &str) -> String {
    format!("{}.{}", provider_id, tool_name)
}

/// Read-through key/value accessor for enablement flags
pub trait EnablementStore: Send + Sync {
    fn get(&self, key: &str) -> Option<bool>;

    fn set(&self, key: &str, enabled: bool);

    fn is_provider_enabled(&self, provider_id: &ProviderId) -> bool {
        self.get(provider_id.as_str()).unwrap_or(true)
    }

    fn is_tool_enabled(&self, provider_id: &ProviderId, tool_name: &str) -> bool {
        self.get(&tool_key(provider_id, tool_name)).unwrap_or(true)
    }
}

/// In-memory flag store
#[derive(Debug, Default)]
pub struct MemoryEnablementStore {
    flags: DashMap<String, bool>,
}

impl MemoryEnablementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl EnablementStore for MemoryEnablementStore {
    fn get(&self, key: &str) -> Option<bool> {
        self.flags.get(key).map(|entry| *entry.value())
    }

    fn set(&self, key: &str, enabled: bool) {
        self.flags.insert(key.to_string(), enabled);
    }
}
