//! Gateway configuration file
//!
//! Every field has a default so an empty `{}` file is a valid configuration.
//!
//! ```json
//! {
//!   "instance_name": "Studio Mac",
//!   "managed_runtimes": [
//!     { "name": "node", "version": "22.11.0", "commands": ["node", "npx", "npm"],
//!       "bin_dir": "/Applications/Toolgate.app/Contents/Resources/node/bin" }
//!   ],
//!   "servers": [
//!     { "id": "…", "name": "Files", "type": "subprocess", "command": "npx",
//!       "args": ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"] }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ServerEntry;

pub const DEFAULT_SERVICE_TYPE: &str = "_mcp._tcp";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Interpreter bundled with the application at a pinned version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedRuntime {
    pub name: String,
    pub version: String,
    /// Command names owned by this runtime (e.g. `node`, `npx`)
    pub commands: Vec<String>,
    pub bin_dir: PathBuf,
}

impl ManagedRuntime {
    pub fn owns(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// DNS-SD service type advertised on the local network
    pub service_type: String,
    pub instance_name: String,
    pub bind_address: String,
    /// 0 picks an ephemeral port
    pub port: u16,
    pub setup_timeout_secs: u64,
    pub health_check_interval_secs: u64,
    pub subprocess_handshake_timeout_secs: u64,
    pub subprocess_grace_period_ms: u64,
    pub remote_connect_timeout_secs: u64,
    pub rebind_backoff_min_ms: u64,
    pub rebind_backoff_max_ms: u64,
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub managed_runtimes: Vec<ManagedRuntime>,
    pub servers: Vec<ServerEntry>,
    pub enabled: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            service_type: DEFAULT_SERVICE_TYPE.to_string(),
            instance_name: default_instance_name(),
            bind_address: "0.0.0.0".to_string(),
            port: 0,
            setup_timeout_secs: 10,
            health_check_interval_secs: 30,
            subprocess_handshake_timeout_secs: 30,
            subprocess_grace_period_ms: 250,
            remote_connect_timeout_secs: 30,
            rebind_backoff_min_ms: 500,
            rebind_backoff_max_ms: 30_000,
            data_dir: dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("toolgate"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("toolgate"),
            managed_runtimes: Vec::new(),
            servers: Vec::new(),
            enabled: true,
        }
    }
}

fn default_instance_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .map(|host| format!("Toolgate on {}", host))
        .unwrap_or_else(|_| "Toolgate".to_string())
}

impl GatewayConfig {
    /// Load and validate a config file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.service_type.starts_with('_') || !self.service_type.contains("._tcp") {
            return Err(ConfigError::Invalid(format!(
                "service_type must look like '_name._tcp', got '{}'",
                self.service_type
            )));
        }
        if self.rebind_backoff_min_ms == 0 || self.rebind_backoff_min_ms > self.rebind_backoff_max_ms
        {
            return Err(ConfigError::Invalid(
                "rebind backoff must satisfy 0 < min <= max".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server id {}",
                    server.id
                )));
            }
        }
        Ok(())
    }

    pub fn trust_store_path(&self) -> PathBuf {
        self.data_dir.join("trusted-clients.json")
    }

    pub fn remote_tool_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("remote-tools")
    }

    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn subprocess_handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_handshake_timeout_secs)
    }

    pub fn subprocess_grace_period(&self) -> Duration {
        Duration::from_millis(self.subprocess_grace_period_ms)
    }

    pub fn remote_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_connect_timeout_secs)
    }

    pub fn rebind_backoff(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.rebind_backoff_min_ms),
            Duration::from_millis(self.rebind_backoff_max_ms),
        )
    }
}
