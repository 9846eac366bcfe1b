//! User-declared backend servers
//!
//! A `ServerEntry` is the configuration record behind one subprocess or
//! remote provider. Its UUID stays stable across edits and is the key used to
//! find the backend again whenever the registry is rebuilt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Http,
}

/// Type-specific server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerKind {
    /// Server reached over HTTP
    Remote {
        url: String,
        /// Extra headers attached to every request
        #[serde(default)]
        headers: BTreeMap<String, String>,
        /// `Some(true)`: use `url` as-is. `Some(false)`: use the plain request
        /// endpoint derived from `url`. `None`: try `url`, then the derived
        /// endpoint once.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        streaming: Option<bool>,
    },
    /// Child process speaking MCP over stdin/stdout
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub kind: ServerKind,
}

impl ServerEntry {
    /// New remote entry with a fresh id
    pub fn remote(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: ServerKind::Remote {
                url: url.into(),
                headers: BTreeMap::new(),
                streaming: None,
            },
        }
    }

    /// New subprocess entry with a fresh id
    pub fn subprocess(
        name: impl Into<String>,
        command: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind: ServerKind::Subprocess {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                env: BTreeMap::new(),
                working_directory: None,
            },
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Add a header (remote) or environment variable (subprocess)
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        match &mut self.kind {
            ServerKind::Remote { headers, .. } => {
                headers.insert(key.into(), value.into());
            }
            ServerKind::Subprocess { env, .. } => {
                env.insert(key.into(), value.into());
            }
        }
        self
    }

    pub fn with_streaming(mut self, flag: bool) -> Self {
        if let ServerKind::Remote { streaming, .. } = &mut self.kind {
            *streaming = Some(flag);
        }
        self
    }

    pub fn transport_type(&self) -> TransportType {
        match self.kind {
            ServerKind::Remote { .. } => TransportType::Http,
            ServerKind::Subprocess { .. } => TransportType::Stdio,
        }
    }

    /// Short description for logs, e.g. `stdio:npx` or `http:https://…`
    pub fn description(&self) -> String {
        match &self.kind {
            ServerKind::Remote { url, .. } => format!("http:{}", url),
            ServerKind::Subprocess { command, .. } => format!("stdio:{}", command),
        }
    }
}
