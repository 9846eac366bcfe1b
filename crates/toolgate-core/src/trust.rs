//! Trusted client identities
//!
//! Identities in the store skip the approval prompt. Readers take a cheap
//! snapshot (`Arc<BTreeSet>`); writers build a new set, persist it, then swap
//! it in. The file is written to a sibling temp path and renamed so a crash
//! never leaves a truncated list behind.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::ClientIdentity;

#[derive(Debug, thiserror::Error)]
pub enum TrustStoreError {
    #[error("Failed to read trust store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write trust store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Trust store {path} is corrupt: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub struct TrustStore {
    path: Option<PathBuf>,
    identities: RwLock<Arc<BTreeSet<String>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl TrustStore {
    /// Store that lives only for this process
    pub fn in_memory() -> Self {
        Self {
            path: None,
            identities: RwLock::new(Arc::new(BTreeSet::new())),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Load from `path`. A missing file is an empty store.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, TrustStoreError> {
        let path = path.into();
        let identities = match tokio::fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str::<BTreeSet<String>>(&content).map_err(|source| {
                TrustStoreError::Parse {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeSet::new(),
            Err(source) => return Err(TrustStoreError::Read { path, source }),
        };

        debug!(
            path = %path.display(),
            count = identities.len(),
            "[TrustStore] Loaded trusted clients"
        );

        Ok(Self {
            path: Some(path),
            identities: RwLock::new(Arc::new(identities)),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn contains(&self, client: &ClientIdentity) -> bool {
        self.identities.read().contains(client.as_str())
    }

    /// Current contents
    pub fn snapshot(&self) -> Arc<BTreeSet<String>> {
        self.identities.read().clone()
    }

    /// Trust `client`. Returns false if it was already trusted.
    pub async fn insert(&self, client: &ClientIdentity) -> Result<bool, TrustStoreError> {
        let added = self
            .update(|set| set.insert(client.as_str().to_string()))
            .await?;
        if added {
            info!(client = %client, "[TrustStore] Client trusted");
        }
        Ok(added)
    }

    /// Stop trusting `client`. Returns false if it was not trusted.
    pub async fn remove(&self, client: &ClientIdentity) -> Result<bool, TrustStoreError> {
        self.update(|set| set.remove(client.as_str())).await
    }

    async fn update(
        &self,
        change: impl FnOnce(&mut BTreeSet<String>) -> bool,
    ) -> Result<bool, TrustStoreError> {
        // Serializes writers so the file always matches the last swap
        let _guard = self.write_lock.lock().await;

        let mut next = (*self.snapshot()).clone();
        if !change(&mut next) {
            return Ok(false);
        }

        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        *self.identities.write() = Arc::new(next);
        Ok(true)
    }
}

async fn persist(path: &Path, identities: &BTreeSet<String>) -> Result<(), TrustStoreError> {
    let write_err = |source: std::io::Error| TrustStoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let json = serde_json::to_string_pretty(identities).map_err(|e| TrustStoreError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}
