// ============================
// crates/sync-lib/src/stream.rs
// ============================
//! Message log of the open conversation.
//!
//! The stream tracks which conversation is displayed, which live room is joined
//! and the ordered log of messages. Entries are appended in the order their
//! events are processed and never resorted.
use std::collections::HashSet;
use tracing::{debug, warn};
use uuid::Uuid;
use vaquerama_common::{ClientEvent, ConversationId, Message, MessageId, UserId};

use crate::error::SyncError;

/// Delivery state of a log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Persisted by the server
    Confirmed,
    /// Optimistic entry waiting for the durable write
    Pending,
    /// The durable write failed; the entry can be retried
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Set on entries created locally by a send
    pub local_id: Option<Uuid>,
    pub message: Message,
    pub delivery: Delivery,
}

impl LogEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            local_id: None,
            message,
            delivery: Delivery::Confirmed,
        }
    }
}

/// Where an incoming message went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    /// Appended to the open log
    Appended,
    /// Already in the log
    Duplicate,
    /// Not for the open conversation
    NotActive,
}

#[derive(Debug, Default)]
pub struct MessageStream {
    active: Option<ConversationId>,
    joined: Option<ConversationId>,
    loading: bool,
    generation: u64,
    log: Vec<LogEntry>,
}

impl MessageStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Display `conversation_id` and start loading its history
    ///
    /// Returns the generation the history response must carry.
    pub fn open(&mut self, conversation_id: ConversationId) -> u64 {
        self.generation += 1;
        self.active = Some(conversation_id);
        self.loading = true;
        self.log.clear();
        self.generation
    }

    /// Stop displaying any conversation; in-flight history becomes stale
    pub fn close(&mut self) {
        self.generation += 1;
        self.active = None;
        self.loading = false;
        self.log.clear();
    }

    /// Replace the log with fetched history
    ///
    /// Returns false and changes nothing when the response is stale. Entries
    /// that arrived while loading and are missing from the history are kept
    /// after it.
    pub fn finish_history(
        &mut self,
        conversation_id: ConversationId,
        generation: u64,
        history: Vec<Message>,
    ) -> bool {
        if !self.is_current(conversation_id, generation) {
            debug!(
                "Discarding stale history for conversation {} (generation {})",
                conversation_id, generation
            );
            return false;
        }

        let known: HashSet<MessageId> = history.iter().filter_map(|m| m.id).collect();
        let arrived = std::mem::take(&mut self.log);
        self.log = history.into_iter().map(LogEntry::confirmed).collect();
        self.log.extend(
            arrived
                .into_iter()
                .filter(|e| e.message.id.map_or(true, |id| !known.contains(&id))),
        );
        self.loading = false;
        true
    }

    /// History failed; returns false when the failure is stale
    pub fn fail_history(&mut self, conversation_id: ConversationId, generation: u64) -> bool {
        if !self.is_current(conversation_id, generation) {
            return false;
        }
        self.loading = false;
        true
    }

    /// Join the live room of a conversation
    ///
    /// Joining the room already joined produces no signal. Another room must be
    /// left first.
    pub fn join_room(&mut self, conversation_id: ConversationId) -> Result<Option<ClientEvent>, SyncError> {
        match self.joined {
            Some(joined) if joined == conversation_id => Ok(None),
            Some(joined) => Err(SyncError::RoomAlreadyJoined {
                joined,
                requested: conversation_id,
            }),
            None => {
                self.joined = Some(conversation_id);
                Ok(Some(ClientEvent::JoinConversation { conversation_id }))
            },
        }
    }

    /// Leave the joined room, if any
    pub fn leave_room(&mut self) -> Option<ClientEvent> {
        self.joined
            .take()
            .map(|conversation_id| ClientEvent::LeaveConversation { conversation_id })
    }

    /// Join signal for the current room; the server forgets rooms on reconnect
    pub fn rejoin(&self) -> Option<ClientEvent> {
        self.joined
            .map(|conversation_id| ClientEvent::JoinConversation { conversation_id })
    }

    /// Route a message pushed by the server
    ///
    /// An echo of our own pending send adopts the server ID instead of being
    /// appended again.
    pub fn append_incoming(&mut self, msg: &Message, session_user: Option<UserId>) -> Routing {
        if self.active != Some(msg.conversation_id) {
            return Routing::NotActive;
        }
        if let Some(id) = msg.id {
            if self.log.iter().any(|e| e.message.id == Some(id)) {
                return Routing::Duplicate;
            }
        }
        if session_user == Some(msg.sender_id) {
            if let Some(entry) = self.log.iter_mut().find(|e| is_echo_of(e, msg)) {
                if entry.message.id.is_none() {
                    entry.message.id = msg.id;
                }
                return Routing::Duplicate;
            }
        }

        self.log.push(LogEntry::confirmed(msg.clone()));
        Routing::Appended
    }

    /// Append a locally constructed message ahead of its durable write
    pub fn push_optimistic(&mut self, message: Message) -> Result<Uuid, SyncError> {
        if self.active != Some(message.conversation_id) {
            return Err(SyncError::ConversationNotOpen(message.conversation_id));
        }
        let local_id = Uuid::new_v4();
        self.log.push(LogEntry {
            local_id: Some(local_id),
            message,
            delivery: Delivery::Pending,
        });
        Ok(local_id)
    }

    /// The durable write succeeded
    pub fn confirm(&mut self, local_id: Uuid, message_id: MessageId) -> bool {
        // The echo may have landed first and already be in the log
        if self.log.iter().any(|e| e.message.id == Some(message_id) && e.local_id != Some(local_id)) {
            self.log.retain(|e| e.local_id != Some(local_id));
            return true;
        }
        match self.entry_mut(local_id) {
            Some(entry) => {
                entry.message.id = Some(message_id);
                entry.delivery = Delivery::Confirmed;
                true
            },
            None => false,
        }
    }

    /// The durable write failed; the entry stays in the log
    pub fn mark_failed(&mut self, local_id: Uuid, reason: impl Into<String>) -> bool {
        match self.entry_mut(local_id) {
            Some(entry) => {
                entry.delivery = Delivery::Failed(reason.into());
                true
            },
            None => false,
        }
    }

    /// Move a failed entry back to pending and return the message to resend
    ///
    /// `Ok(None)` means the entry is not in a failed state and nothing should
    /// be resent.
    pub fn retry(&mut self, local_id: Uuid) -> Result<Option<Message>, SyncError> {
        let entry = self
            .entry_mut(local_id)
            .ok_or_else(|| SyncError::MessageNotFound(local_id.to_string()))?;
        if !matches!(entry.delivery, Delivery::Failed(_)) {
            warn!("Ignoring retry of message {} that has not failed", local_id);
            return Ok(None);
        }
        entry.delivery = Delivery::Pending;
        Ok(Some(entry.message.clone()))
    }

    pub fn entry(&self, local_id: Uuid) -> Option<&LogEntry> {
        self.log.iter().find(|e| e.local_id == Some(local_id))
    }

    pub fn active(&self) -> Option<ConversationId> {
        self.active
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    fn is_current(&self, conversation_id: ConversationId, generation: u64) -> bool {
        self.generation == generation && self.active == Some(conversation_id)
    }

    fn entry_mut(&mut self, local_id: Uuid) -> Option<&mut LogEntry> {
        self.log.iter_mut().find(|e| e.local_id == Some(local_id))
    }
}

fn is_echo_of(entry: &LogEntry, msg: &Message) -> bool {
    entry.local_id.is_some()
        && entry.message.sender_id == msg.sender_id
        && entry.message.content == msg.content
        && entry.message.media_url.is_some() == msg.media_url.is_some()
        && (entry.message.id.is_none() || msg.id.is_none() || entry.message.id == msg.id)
}
