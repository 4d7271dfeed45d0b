// ============================
// crates/sync-lib/src/notifications.rs
// ============================
//! Notification list and the two unread counters behind the badge.
use serde::Serialize;
use vaquerama_common::{ConversationId, Message, Notification, UserId};

/// Combined unread indicator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Badge {
    /// Unread likes, comments and message notifications
    pub generic: u32,
    /// Live messages received outside the open conversation
    pub messages: u32,
}

impl Badge {
    pub fn total(&self) -> u32 {
        self.generic.saturating_add(self.messages)
    }

    /// Number shown on the badge, hidden at zero
    pub fn label(&self) -> Option<String> {
        match self.total() {
            0 => None,
            n => Some(n.to_string()),
        }
    }

    /// Window title prefixed with the unread total, e.g. `(5) Vaquerama`
    pub fn title(&self, base: &str) -> String {
        match self.label() {
            Some(n) => format!("({n}) {base}"),
            None => base.to_string(),
        }
    }
}

#[derive(Debug, Default)]
pub struct NotificationAggregator {
    items: Vec<Notification>,
    generic_unread: u32,
    message_unread: u32,
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a fetched snapshot; the generic counter is recomputed
    pub fn replace_all(&mut self, items: Vec<Notification>) {
        self.generic_unread = items.iter().filter(|n| !n.is_read).count() as u32;
        self.items = items;
    }

    /// A notification pushed live; newest first
    pub fn add_incoming(&mut self, notification: Notification) {
        self.items.insert(0, notification);
        self.generic_unread = self.generic_unread.saturating_add(1);
    }

    /// The server accepted "mark all read"
    pub fn mark_all_read_applied(&mut self) {
        for n in &mut self.items {
            n.is_read = true;
        }
        self.generic_unread = 0;
    }

    /// Count a live message toward the message counter
    ///
    /// Our own messages and messages for the open conversation are not counted.
    pub fn count_incoming_message(
        &mut self,
        msg: &Message,
        session_user: Option<UserId>,
        active: Option<ConversationId>,
    ) -> bool {
        if session_user == Some(msg.sender_id) || active == Some(msg.conversation_id) {
            return false;
        }
        self.message_unread = self.message_unread.saturating_add(1);
        true
    }

    pub fn clear_message_unread(&mut self) {
        self.message_unread = 0;
    }

    pub fn badge(&self) -> Badge {
        Badge {
            generic: self.generic_unread,
            messages: self.message_unread,
        }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }
}
