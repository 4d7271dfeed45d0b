// ============================
// crates/sync-lib/src/session.rs
// ============================
//! Lifecycle of one signed-in session.
use std::sync::Arc;
use tracing::{info, warn};
use vaquerama_common::User;

use crate::connection::ConnectionManager;
use crate::error::SyncError;
use crate::sync_actor::{spawn_sync_actor, SyncHandle};
use crate::Services;

/// The live channel and sync actor of a signed-in user
pub struct LiveSession {
    user: User,
    connection: Arc<ConnectionManager>,
    handle: SyncHandle,
}

impl LiveSession {
    /// Open the live channel for `user` and load the initial state
    ///
    /// Initial loads are best effort; their failures show up in the snapshot.
    pub async fn start(services: &Services, user: User) -> Result<Self, SyncError> {
        let connection = Arc::new(ConnectionManager::new(
            services.transport.clone(),
            services.settings.event_buffer,
        ));
        // Subscribe before connecting so the first link-up is seen
        let handle = spawn_sync_actor(services.api.clone(), connection.clone(), user.id);
        connection.connect(user.id).await?;
        info!("Live session started for {} ({})", user.username, user.id);

        if let Err(e) = handle.load_conversations().await {
            warn!("Initial conversation load failed: {}", e);
        }
        if let Err(e) = handle.fetch_notifications().await {
            warn!("Initial notification load failed: {}", e);
        }

        Ok(Self {
            user,
            connection,
            handle,
        })
    }

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn handle(&self) -> &SyncHandle {
        &self.handle
    }

    /// Stop syncing and close the live channel
    pub async fn shutdown(self) -> Result<(), SyncError> {
        let stopped = self.handle.shutdown().await;
        self.connection.disconnect().await;
        info!("Live session of user {} closed", self.user.id);
        match stopped {
            Ok(()) | Err(SyncError::SessionClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Shut down and forget the stored credential
    pub async fn logout(self, services: &Services) -> Result<(), SyncError> {
        self.shutdown().await?;
        services.auth.logout().await
    }
}
