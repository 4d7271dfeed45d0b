// crates/sync-lib/src/error.rs

//! Central error type for the sync layer.
use thiserror::Error;
use uuid::Uuid;
use vaquerama_common::ConversationId;

use crate::validation::ValidationError;

/// How a failure should be handled by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network or server failure; re-invoking the triggering action may succeed
    Transport,
    /// Credential missing, expired or rejected; the user must sign in again
    Auth,
    /// Rejected locally before any request was issued
    Validation,
    /// Internal inconsistency or background failure that is only logged
    Silent,
}

/// Sync error types with error codes and context
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Server returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Live channel is not connected")]
    NotConnected,

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conversation {0} not found")]
    UnknownConversation(ConversationId),

    #[error("Conversation {0} is not open")]
    ConversationNotOpen(ConversationId),

    #[error("Room {joined} must be left before joining room {requested}")]
    RoomAlreadyJoined {
        joined: ConversationId,
        requested: ConversationId,
    },

    #[error("Message {0} not found")]
    MessageNotFound(String),

    #[error("Message {0} is already being sent")]
    AlreadySending(Uuid),

    #[error("Message {local_id} was not delivered: {source}")]
    SendFailed {
        local_id: Uuid,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sync session stopped")]
    SessionClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Classify the error for propagation
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::SendFailed { source, .. } => source.kind(),
            SyncError::Transport(_) | SyncError::NotConnected => ErrorKind::Transport,
            SyncError::Http { status, .. } if *status >= 500 || *status == 408 || *status == 429 => {
                ErrorKind::Transport
            },
            SyncError::Http { .. } => ErrorKind::Silent,
            SyncError::Unauthorized(_) | SyncError::NotAuthenticated => ErrorKind::Auth,
            SyncError::Validation(_) => ErrorKind::Validation,
            _ => ErrorKind::Silent,
        }
    }

    /// Whether re-invoking the same action may succeed
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            SyncError::Transport(_) => "NET_001",
            SyncError::Http { .. } => "NET_002",
            SyncError::NotConnected => "NET_003",
            SyncError::Unauthorized(_) => "AUTH_001",
            SyncError::NotAuthenticated => "AUTH_002",
            SyncError::Validation(_) => "VAL_001",
            SyncError::UnknownConversation(_) => "CONV_003",
            SyncError::ConversationNotOpen(_) => "CONV_001",
            SyncError::RoomAlreadyJoined { .. } => "CONV_002",
            SyncError::MessageNotFound(_) => "MSG_001",
            SyncError::SendFailed { .. } => "MSG_002",
            SyncError::AlreadySending(_) => "MSG_003",
            SyncError::Config(_) => "CFG_001",
            SyncError::Io(_) => "IO_001",
            SyncError::Json(_) => "JSON_001",
            SyncError::SessionClosed => "SYNC_001",
            SyncError::Internal(_) => "INT_001",
        }
    }

    /// Get a message suitable for showing to the user
    pub fn sanitized_message(&self) -> String {
        match self.kind() {
            ErrorKind::Transport => "Connection problem, please try again".to_string(),
            ErrorKind::Auth => "Your session has expired, please sign in again".to_string(),
            ErrorKind::Validation => self.to_string(),
            ErrorKind::Silent => "Something went wrong".to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status == reqwest::StatusCode::UNAUTHORIZED => {
                SyncError::Unauthorized(err.to_string())
            },
            Some(status) => SyncError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None if err.is_decode() => SyncError::Internal(format!("Invalid response body: {err}")),
            None => SyncError::Transport(err.to_string()),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

impl From<figment::Error> for SyncError {
    fn from(err: figment::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SyncError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SyncError::SessionClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SyncError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SyncError::SessionClosed
    }
}

impl From<String> for SyncError {
    fn from(msg: String) -> Self {
        SyncError::Internal(msg)
    }
}

impl From<&str> for SyncError {
    fn from(msg: &str) -> Self {
        SyncError::Internal(msg.to_string())
    }
}
