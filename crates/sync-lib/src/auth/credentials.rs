// ============================
// crates/sync-lib/src/auth/credentials.rs
// ============================
//! Bearer credential persisted in local storage.
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

use crate::error::SyncError;
use crate::storage::{Storage, CREDENTIAL_KEY};

/// Cached view of the stored credential
///
/// Reads are synchronous so the HTTP client can inject the token without awaiting.
pub struct CredentialStore {
    storage: Arc<dyn Storage>,
    token: RwLock<Option<String>>,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            token: RwLock::new(None),
        }
    }

    /// Read the persisted credential into the cache
    pub async fn load(&self) -> Result<Option<String>, SyncError> {
        let stored = self
            .storage
            .get(CREDENTIAL_KEY)
            .await?
            .filter(|t| !t.trim().is_empty());
        *self.token.write() = stored.clone();
        Ok(stored)
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    pub fn is_present(&self) -> bool {
        self.token.read().is_some()
    }

    pub async fn set(&self, token: &str) -> Result<(), SyncError> {
        self.storage.set(CREDENTIAL_KEY, token).await?;
        *self.token.write() = Some(token.to_string());
        Ok(())
    }

    /// Forget the credential; the cache is cleared even if storage fails
    pub async fn clear(&self) -> Result<(), SyncError> {
        debug!("Clearing stored credential");
        self.token.write().take();
        self.storage.remove(CREDENTIAL_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FlatFileStorage;
    use tempfile::TempDir;

    fn setup() -> (CredentialStore, Arc<FlatFileStorage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(FlatFileStorage::new(temp_dir.path()).unwrap());
        (CredentialStore::new(storage.clone()), storage, temp_dir)
    }

    #[tokio::test]
    async fn test_set_persists_and_caches() {
        let (store, storage, _dir) = setup();
        assert!(!store.is_present());

        store.set("abc").await.unwrap();
        assert_eq!(store.token().as_deref(), Some("abc"));
        assert_eq!(storage.get(CREDENTIAL_KEY).await.unwrap().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_load_ignores_blank_token() {
        let (store, storage, _dir) = setup();
        storage.set(CREDENTIAL_KEY, "  ").await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        assert!(!store.is_present());
    }

    #[tokio::test]
    async fn test_clear_removes_only_credential() {
        let (store, storage, _dir) = setup();
        crate::storage::set_sidebar_collapsed(storage.as_ref(), true)
            .await
            .unwrap();
        store.set("abc").await.unwrap();

        store.clear().await.unwrap();
        assert!(store.token().is_none());
        assert_eq!(storage.get(CREDENTIAL_KEY).await.unwrap(), None);
        assert!(crate::storage::sidebar_collapsed(storage.as_ref()).await.unwrap());
    }
}
