//! Backend tool cache

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use toolgate_core::ToolSpec;

/// Last tool list seen from a backend, optionally mirrored to disk
#[derive(Clone, Default)]
pub struct ToolCache {
    tools: Arc<RwLock<Vec<ToolSpec>>>,
    path: Option<PathBuf>,
}

impl ToolCache {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Cache backed by `path`, seeded from it when the file exists
    pub async fn persisted(path: PathBuf) -> Self {
        let tools = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "[ToolCache] Ignoring unreadable cache");
                Vec::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[ToolCache] Failed to read cache");
                Vec::new()
            }
        };
        debug!(path = %path.display(), count = tools.len(), "[ToolCache] Loaded");

        Self {
            tools: Arc::new(RwLock::new(tools)),
            path: Some(path),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self) -> Vec<ToolSpec> {
        self.tools.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().iter().any(|tool| tool.name == name)
    }

    /// Replace the list and write it through. A failed write keeps the
    /// in-memory copy.
    pub async fn replace(&self, tools: Vec<ToolSpec>) {
        *self.tools.write() = tools.clone();

        let Some(path) = &self.path else {
            return;
        };
        if let Err(e) = write_atomic(path, &tools).await {
            warn!(path = %path.display(), error = %e, "[ToolCache] Failed to persist");
        }
    }

    /// Forget the in-memory list; the file is left alone
    pub fn clear(&self) {
        self.tools.write().clear();
    }
}

async fn write_atomic(path: &Path, tools: &[ToolSpec]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(tools)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await
}
