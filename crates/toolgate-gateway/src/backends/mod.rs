//! Server-backed tool providers
//!
//! [`BackendCatalog`] keeps one backend instance per `ServerEntry` UUID.
//! Re-applying the server list reuses instances whose UUID survived, so
//! unchanged servers are never respawned or reconnected. A running
//! subprocess whose entry changed is stopped and reported for restart.

mod cache;
mod client_handler;
mod content;
mod remote;
mod runtime;
mod shell_env;
mod subprocess;

pub use cache::ToolCache;
pub use client_handler::{BackendClientHandler, ToolsChangedHook};
pub use content::from_call_result;
pub use remote::{endpoint_candidates, RemoteBackend, RemoteConfig};
pub use runtime::{plan_launch, split_command, LaunchPlan};
pub use shell_env::shell_path;
pub use subprocess::{SubprocessBackend, SubprocessConfig, SubprocessSettings};

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use toolgate_core::{GatewayConfig, ProviderId, ServerEntry, ServerKind, ToolProvider};

#[derive(Clone)]
enum Backend {
    Subprocess(Arc<SubprocessBackend>),
    Remote(Arc<RemoteBackend>),
}

impl Backend {
    fn provider(&self) -> Arc<dyn ToolProvider> {
        match self {
            Backend::Subprocess(backend) => backend.clone(),
            Backend::Remote(backend) => backend.clone(),
        }
    }

    async fn stop(&self) {
        self.provider().deactivate().await;
    }
}

/// Result of [`BackendCatalog::sync`]
pub struct CatalogSync {
    /// Providers in server-list order
    pub providers: Vec<Arc<dyn ToolProvider>>,
    /// Subprocesses that were running before their entry changed
    pub restart: Vec<ProviderId>,
}

pub struct BackendCatalog {
    subprocess: SubprocessSettings,
    remote_timeout: Duration,
    remote_cache_dir: PathBuf,
    on_tools_changed: ToolsChangedHook,
    backends: tokio::sync::Mutex<HashMap<Uuid, Backend>>,
}

impl BackendCatalog {
    pub fn new(config: &GatewayConfig, on_tools_changed: ToolsChangedHook) -> Self {
        Self {
            subprocess: SubprocessSettings::from(config),
            remote_timeout: config.remote_connect_timeout(),
            remote_cache_dir: config.remote_tool_cache_dir(),
            on_tools_changed,
            backends: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Bring the catalog in line with `servers` and return their providers
    /// in the same order
    pub async fn sync(&self, servers: &[ServerEntry]) -> CatalogSync {
        let mut backends = self.backends.lock().await;

        let wanted: HashSet<Uuid> = servers.iter().map(|entry| entry.id).collect();
        let removed: Vec<Uuid> = backends.keys().filter(|id| !wanted.contains(id)).copied().collect();
        for id in removed {
            if let Some(backend) = backends.remove(&id) {
                info!(server_id = %id, "[BackendCatalog] Server removed, stopping backend");
                backend.stop().await;
            }
        }

        let mut providers = Vec::with_capacity(servers.len());
        let mut restart = Vec::new();
        let mut seen = HashSet::new();
        for entry in servers {
            if !seen.insert(entry.id) {
                debug!(server_id = %entry.id, "[BackendCatalog] Duplicate server id skipped");
                continue;
            }

            let existing = backends.get(&entry.id).cloned();
            let backend = match existing {
                Some(backend) => self.update(backend, entry, &mut restart).await,
                None => None,
            };
            let backend = match backend {
                Some(backend) => backend,
                None => {
                    if let Some(stale) = backends.remove(&entry.id) {
                        stale.stop().await;
                    }
                    let backend = self.create(entry).await;
                    debug!(server_id = %entry.id, name = %entry.name, "[BackendCatalog] Backend created");
                    backends.insert(entry.id, backend.clone());
                    backend
                }
            };
            providers.push(backend.provider());
        }

        CatalogSync { providers, restart }
    }

    /// Reuse `backend` for `entry` if the kind still matches
    async fn update(&self, backend: Backend, entry: &ServerEntry, restart: &mut Vec<ProviderId>) -> Option<Backend> {
        match (&backend, &entry.kind) {
            (Backend::Subprocess(subprocess), ServerKind::Subprocess { .. }) => {
                if subprocess.reconfigure(SubprocessConfig::from_entry(entry)?).await {
                    restart.push(ProviderId::from(entry.id));
                }
                Some(backend)
            }
            (Backend::Remote(remote), ServerKind::Remote { .. }) => {
                remote.reconfigure(RemoteConfig::from_entry(entry)?).await;
                Some(backend)
            }
            _ => None,
        }
    }

    async fn create(&self, entry: &ServerEntry) -> Backend {
        let id = ProviderId::from(entry.id);
        match &entry.kind {
            ServerKind::Subprocess {
                command,
                args,
                env,
                working_directory,
            } => Backend::Subprocess(Arc::new(SubprocessBackend::new(
                id,
                SubprocessConfig {
                    name: entry.name.clone(),
                    command: command.clone(),
                    args: args.clone(),
                    env: env.clone(),
                    working_directory: working_directory.clone(),
                },
                self.subprocess.clone(),
                self.on_tools_changed.clone(),
            ))),
            ServerKind::Remote {
                url,
                headers,
                streaming,
            } => {
                let cache = ToolCache::persisted(self.remote_cache_dir.join(format!("{}.json", entry.id))).await;
                Backend::Remote(Arc::new(RemoteBackend::new(
                    id,
                    RemoteConfig {
                        name: entry.name.clone(),
                        url: url.clone(),
                        headers: headers.clone(),
                        streaming: *streaming,
                    },
                    self.remote_timeout,
                    cache,
                    self.on_tools_changed.clone(),
                )))
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.backends.lock().await.len()
    }

    /// Stop every backend; instances stay cached for a later `sync`
    pub async fn stop_all(&self) {
        let backends: Vec<Backend> = self.backends.lock().await.values().cloned().collect();
        for backend in backends {
            backend.stop().await;
        }
    }
}
