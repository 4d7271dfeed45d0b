// ============================
// crates/sync-lib/src/api/mod.rs
// ============================
//! HTTP API consumed by the sync layer.
mod http;

use async_trait::async_trait;
use serde::Deserialize;
use vaquerama_common::{Conversation, ConversationId, Message, MessageId, Notification, User};

use crate::error::SyncError;

pub use http::HttpApiClient;

/// A file attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// The REST calls the sync layer relies on
///
/// Every method maps one request; implementations report HTTP 401 as
/// [`SyncError::Unauthorized`].
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Exchange credentials for a bearer token
    async fn login(&self, email: &str, password: &str) -> Result<String, SyncError>;

    /// The user the current credential belongs to
    async fn current_user(&self) -> Result<User, SyncError>;

    /// Full conversation snapshot
    async fn conversations(&self) -> Result<Vec<Conversation>, SyncError>;

    /// Message history of one conversation, oldest first
    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, SyncError>;

    /// Durable write of a message; returns the server-assigned ID
    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: Option<&str>,
        media: Option<&MediaUpload>,
    ) -> Result<MessageId, SyncError>;

    /// All notifications, newest first
    async fn notifications(&self) -> Result<Vec<Notification>, SyncError>;

    /// Mark every notification read
    async fn mark_all_notifications_read(&self) -> Result<(), SyncError>;
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: User,
}

#[derive(Debug, Deserialize)]
struct ConversationsEnvelope {
    #[serde(default)]
    conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct MessagesEnvelope {
    #[serde(default)]
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct NotificationsEnvelope {
    #[serde(default)]
    notifications: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(rename = "messageId")]
    message_id: MessageId,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}
