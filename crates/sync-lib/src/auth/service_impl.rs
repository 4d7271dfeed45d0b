use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};
use vaquerama_common::User;

use crate::api::ApiClient;
use crate::auth::{AuthService, CredentialStore};
use crate::error::{ErrorKind, SyncError};
use crate::validation::validate_credentials;

pub struct DefaultAuth {
    api: Arc<dyn ApiClient>,
    credentials: Arc<CredentialStore>,
    user: RwLock<Option<User>>,
}

impl DefaultAuth {
    pub fn new(api: Arc<dyn ApiClient>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            api,
            credentials,
            user: RwLock::new(None),
        }
    }
}

#[async_trait]
impl AuthService for DefaultAuth {
    async fn login(&self, email: &str, password: &str) -> Result<User, SyncError> {
        validate_credentials(email, password)?;

        let token = self.api.login(email, password).await?;
        self.credentials.set(&token).await?;

        let user = self.api.current_user().await?;
        info!("Signed in as {} ({})", user.username, user.id);
        *self.user.write() = Some(user.clone());
        Ok(user)
    }

    async fn restore(&self) -> Result<Option<User>, SyncError> {
        if self.credentials.load().await?.is_none() {
            return Ok(None);
        }

        match self.api.current_user().await {
            Ok(user) => {
                info!("Restored session of {} ({})", user.username, user.id);
                *self.user.write() = Some(user.clone());
                Ok(Some(user))
            },
            Err(e) if e.kind() == ErrorKind::Auth => {
                warn!("Stored credential rejected: {}", e);
                self.credentials.clear().await?;
                Ok(None)
            },
            // Offline is not a reason to sign out
            Err(e) => Err(e),
        }
    }

    async fn logout(&self) -> Result<(), SyncError> {
        self.user.write().take();
        self.credentials.clear().await
    }

    fn current_user(&self) -> Option<User> {
        self.user.read().clone()
    }
}
