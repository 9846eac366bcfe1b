//! # Toolgate Core Library
//!
//! Domain types and contracts shared by the gateway runtime and its hosts.
//!
//! ## Modules
//!
//! - `domain` - Core entities (ToolSpec, ServerEntry, connection identity, events)
//! - `provider` - The `ToolProvider` contract and the closure-backed built-in provider
//! - `enablement` - Read-through per-provider / per-tool enablement flags
//! - `trust` - Persisted allowlist of client identities that skip approval
//! - `config` - Gateway configuration file
//! - `event_bus` - Central event distribution system

pub mod config;
pub mod domain;
pub mod enablement;
pub mod event_bus;
pub mod provider;
pub mod trust;

pub use config::{ConfigError, GatewayConfig, ManagedRuntime};
pub use domain::*;
pub use enablement::{tool_key, EnablementStore, MemoryEnablementStore};
pub use event_bus::{EventBus, EventReceiver, EventSender};
pub use provider::{
    ActivationError, BuiltinProvider, ProviderId, ProviderInfo, ProviderKind, ToolProvider,
};
pub use trust::{TrustStore, TrustStoreError};
