// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! shared between the Vaquerama sync library and its consumers.
//! This module defines the data model returned by the HTTP API and the
//! live-channel protocol events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identifier assigned by the server
pub type ConversationId = i64;
/// User identifier assigned by the server
pub type UserId = i64;
/// Message identifier assigned by the server
pub type MessageId = i64;
/// Notification identifier assigned by the server
pub type NotificationId = i64;

/// A direct-message conversation as listed for the session user
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// Unique conversation ID
    pub conversation_id: ConversationId,
    /// The other participant
    pub participant_id: UserId,
    /// Display name of the other participant
    pub participant_name: String,
    /// Relative filename of the participant's photo
    #[serde(default)]
    pub participant_photo: Option<String>,
    /// Preview text of the latest message
    #[serde(default)]
    pub last_message: Option<String>,
    /// When the latest message was created
    #[serde(default)]
    pub last_message_timestamp: Option<DateTime<Utc>>,
    /// Messages not yet seen by the session user
    #[serde(default)]
    pub unread_count: u32,
}

/// A single chat message
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server ID, absent on locally constructed messages
    #[serde(default)]
    pub id: Option<MessageId>,
    /// Conversation the message belongs to
    pub conversation_id: ConversationId,
    /// Author of the message
    pub sender_id: UserId,
    /// Text content, absent for media-only messages
    #[serde(default)]
    pub content: Option<String>,
    /// Relative filename of an attached media file
    #[serde(default)]
    pub media_url: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Text used as the conversation preview
    pub fn preview(&self) -> Option<String> {
        match (&self.content, &self.media_url) {
            (Some(text), _) if !text.trim().is_empty() => Some(text.clone()),
            (_, Some(_)) => Some("[media]".to_string()),
            _ => None,
        }
    }
}

/// Closed set of notification kinds
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Message,
}

/// A notification about social activity
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    /// Referenced post, for likes and comments
    #[serde(default)]
    pub post_id: Option<i64>,
    /// Relative filename of the referenced post's media
    #[serde(default, rename = "post_media_url")]
    pub post_media: Option<String>,
}

/// The authenticated user as returned by `/users/me`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
}

/// Events emitted by the client on the live channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Announce the session identity so the server can route pushes
    /// # Fields
    /// * `user_id` - The authenticated user
    RegisterUser { user_id: UserId },
    /// Subscribe to live events scoped to a conversation
    JoinConversation { conversation_id: ConversationId },
    /// Drop the subscription to a conversation
    LeaveConversation { conversation_id: ConversationId },
    /// Relay a message to the other participants
    /// # Fields
    /// * `conversation_id` - Target conversation
    /// * `message` - The message as appended locally
    SendMessage {
        conversation_id: ConversationId,
        message: Message,
    },
}

/// Events pushed by the server on the live channel
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was posted to one of the user's conversations
    ReceiveMessage(Message),
    /// A like, comment or message notification for the user
    NewNotification(Notification),
    /// The conversation list changed server-side and should be refetched
    UpdateConversationList,
}

impl ServerEvent {
    /// Stable event name, used for subscription filters and logging
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ReceiveMessage(_) => "receive_message",
            ServerEvent::NewNotification(_) => "new_notification",
            ServerEvent::UpdateConversationList => "update_conversation_list",
        }
    }
}

impl ClientEvent {
    /// Stable event name, used for logging
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterUser { .. } => "register_user",
            ClientEvent::JoinConversation { .. } => "join_conversation",
            ClientEvent::LeaveConversation { .. } => "leave_conversation",
            ClientEvent::SendMessage { .. } => "send_message",
        }
    }
}
