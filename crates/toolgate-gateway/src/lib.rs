//! Toolgate Gateway
//!
//! Local-network MCP gateway that provides:
//! - DNS-SD advertised TCP listener with automatic rebind
//! - Per-connection MCP sessions gated by human approval
//! - Approval deduplication and a persisted trust list
//! - Aggregation of built-in, subprocess and remote tool providers
//! - tools/list_changed fan-out when providers or flags change

pub mod approval;
pub mod backends;
pub mod discovery;
pub mod registry;
pub mod server;
pub mod session;

pub use approval::{ApprovalCoordinator, ApprovalDecision, ApprovalOutcome, ApprovalPrompt, ApprovalRequest};
pub use backends::{BackendCatalog, CatalogSync, RemoteBackend, SubprocessBackend, ToolCache};
pub use discovery::{
    browse, DiscoveredGateway, DiscoveryError, Listener, ListenerSource, MdnsAdvertiser,
    NetworkDiscovery, NoopAdvertiser, ServiceAdvertiser, ServiceRegistration, TcpListenerSource,
};
pub use registry::{BackendRegistry, ProviderEntry};
pub use server::{DependenciesBuilder, GatewayDependencies, GatewayServer};
pub use session::{ConnectionSession, NotifyOutcome};
