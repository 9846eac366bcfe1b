//! Core domain entities

mod connection;
mod event;
mod server_entry;
mod tool;

pub use connection::{ApprovalState, ClientIdentity, ConnectionId, SessionPhase};
pub use event::GatewayEvent;
pub use server_entry::{ServerEntry, ServerKind, TransportType};
pub use tool::{ToolArguments, ToolError, ToolHints, ToolOutput, ToolSpec};
