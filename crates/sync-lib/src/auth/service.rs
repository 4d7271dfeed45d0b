use async_trait::async_trait;
use vaquerama_common::User;

use crate::error::SyncError;

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Exchange credentials for a token, persist it and fetch the user
    async fn login(&self, email: &str, password: &str) -> Result<User, SyncError>;
    /// Resume a stored session; `None` when there is no valid credential
    async fn restore(&self) -> Result<Option<User>, SyncError>;
    async fn logout(&self) -> Result<(), SyncError>;
    fn current_user(&self) -> Option<User>;
}
