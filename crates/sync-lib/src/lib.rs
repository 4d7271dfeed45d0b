// ============================
// crates/sync-lib/src/lib.rs
// ============================
//! Live conversation and notification sync for the Vaquerama client.

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod conversations;
pub mod error;
pub mod metrics;
pub mod notifications;
pub mod session;
pub mod storage;
pub mod stream;
pub mod sync_actor;
pub mod transport;
pub mod validation;
pub mod view;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use crate::api::{ApiClient, HttpApiClient};
use crate::auth::{AuthService, CredentialStore, DefaultAuth};
use crate::config::Settings;
use crate::error::SyncError;
use crate::storage::{FlatFileStorage, Storage};
use crate::transport::{Transport, WsTransport};

pub use crate::session::LiveSession;
pub use crate::sync_actor::{SyncHandle, SyncSnapshot};

/// Services shared by every session of the process
#[derive(Clone)]
pub struct Services {
    /// Settings manager
    pub settings: Arc<Settings>,
    /// Local key-value storage
    pub storage: Arc<dyn Storage>,
    /// Cached bearer credential
    pub credentials: Arc<CredentialStore>,
    /// REST client
    pub api: Arc<dyn ApiClient>,
    /// Authentication service
    pub auth: Arc<dyn AuthService>,
    /// Live channel factory
    pub transport: Arc<dyn Transport>,
}

impl Services {
    /// Wire the production services from settings
    pub fn new(settings: Settings) -> Result<Self, SyncError> {
        let storage: Arc<dyn Storage> = Arc::new(FlatFileStorage::new(&settings.data_dir)?);
        let credentials = Arc::new(CredentialStore::new(storage.clone()));
        let api = Arc::new(HttpApiClient::new(&settings, credentials.clone())?);
        let transport = Arc::new(WsTransport::from_settings(&settings));
        Ok(Self::from_parts(settings, storage, credentials, api, transport))
    }

    /// Assemble services from explicit parts
    pub fn from_parts(
        settings: Settings,
        storage: Arc<dyn Storage>,
        credentials: Arc<CredentialStore>,
        api: Arc<dyn ApiClient>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let auth = Arc::new(DefaultAuth::new(api.clone(), credentials.clone()));
        Self {
            settings: Arc::new(settings),
            storage,
            credentials,
            api,
            auth,
            transport,
        }
    }
}
