// ============================
// crates/sync-lib/src/storage.rs
// ============================
//! Local key-value storage with a flat-file implementation.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{fs as tokio_fs, sync::Mutex};

use crate::error::SyncError;

/// Key holding the bearer credential
pub const CREDENTIAL_KEY: &str = "userToken";
/// Key holding the sidebar collapsed preference
pub const SIDEBAR_COLLAPSED_KEY: &str = "sidebarCollapsed";

const STORE_FILE: &str = "local-store.json";

/// Trait for local persistent storage backends
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: &str) -> Result<(), SyncError>;

    /// Remove a value; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// Flat-file implementation of the Storage trait
///
/// All keys live in one JSON object that is rewritten on every change.
#[derive(Clone)]
pub struct FlatFileStorage {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl FlatFileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, SyncError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            path: root.join(STORE_FILE),
            lock: Arc::new(Mutex::new(())),
        })
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>, SyncError> {
        match tokio_fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), SyncError> {
        let json = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio_fs::write(&tmp, json).await?;
        tokio_fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FlatFileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, SyncError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), SyncError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries).await
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

/// Read the sidebar collapsed preference, defaulting to expanded
pub async fn sidebar_collapsed(storage: &dyn Storage) -> Result<bool, SyncError> {
    Ok(storage
        .get(SIDEBAR_COLLAPSED_KEY)
        .await?
        .is_some_and(|v| v == "true"))
}

/// Persist the sidebar collapsed preference
pub async fn set_sidebar_collapsed(storage: &dyn Storage, collapsed: bool) -> Result<(), SyncError> {
    storage
        .set(SIDEBAR_COLLAPSED_KEY, if collapsed { "true" } else { "false" })
        .await
}
