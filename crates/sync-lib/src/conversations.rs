// ============================
// crates/sync-lib/src/conversations.rs
// ============================
//! Ordered conversation list with unread counters.
//!
//! The list is kept sorted by latest activity, newest first, with
//! conversations that never had a message at the end.
use chrono::{DateTime, Utc};
use tracing::debug;
use vaquerama_common::{Conversation, ConversationId, Message, UserId};

/// Outcome of applying a live message to the list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The conversation was updated and moved into place
    Updated { unread_count: u32 },
    /// No such conversation locally
    Unknown,
}

#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    items: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole list with a fresh snapshot
    pub fn load_all(&mut self, snapshot: Vec<Conversation>) {
        let mut items = snapshot;
        // Stable sort keeps the server order among equal timestamps
        items.sort_by(|a, b| rank(b.last_message_timestamp).cmp(&rank(a.last_message_timestamp)));
        self.items = items;
        debug!("Loaded {} conversations", self.items.len());
    }

    /// Apply a message pushed by the server
    ///
    /// The active conversation stays at zero unread, others gain one.
    pub fn apply_incoming_message(&mut self, msg: &Message, active: Option<ConversationId>) -> Applied {
        let is_active = active == Some(msg.conversation_id);
        self.touch(msg, |convo| {
            if is_active {
                convo.unread_count = 0;
            } else {
                convo.unread_count = convo.unread_count.saturating_add(1);
            }
        })
    }

    /// Apply a message the session user sent; unread is left alone
    pub fn record_outgoing(&mut self, msg: &Message) -> Applied {
        self.touch(msg, |_| {})
    }

    /// Zero the unread counter of one conversation
    pub fn mark_read(&mut self, conversation_id: ConversationId) -> bool {
        match self.items.iter_mut().find(|c| c.conversation_id == conversation_id) {
            Some(convo) => {
                convo.unread_count = 0;
                true
            },
            None => false,
        }
    }

    pub fn get(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.conversation_id == conversation_id)
    }

    pub fn find_by_participant(&self, participant_id: UserId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.participant_id == participant_id)
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    fn touch(&mut self, msg: &Message, update_unread: impl FnOnce(&mut Conversation)) -> Applied {
        let Some(pos) = self
            .items
            .iter()
            .position(|c| c.conversation_id == msg.conversation_id)
        else {
            debug!("Message for unknown conversation {}", msg.conversation_id);
            return Applied::Unknown;
        };

        let mut convo = self.items.remove(pos);
        // Late deliveries must not roll the preview back
        let newer = convo
            .last_message_timestamp
            .map_or(true, |current| msg.created_at >= current);
        if newer {
            convo.last_message = msg.preview();
            convo.last_message_timestamp = Some(msg.created_at);
        }
        update_unread(&mut convo);
        let unread_count = convo.unread_count;

        let key = rank(convo.last_message_timestamp);
        let at = self
            .items
            .partition_point(|c| rank(c.last_message_timestamp) > key);
        self.items.insert(at, convo);
        Applied::Updated { unread_count }
    }
}

/// Sort key where a missing timestamp ranks below every real one
fn rank(ts: Option<DateTime<Utc>>) -> (bool, Option<DateTime<Utc>>) {
    (ts.is_some(), ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, message};

    fn ids(store: &ConversationStore) -> Vec<ConversationId> {
        store.items().iter().map(|c| c.conversation_id).collect()
    }

    #[test]
    fn test_load_all_sorts_newest_first() {
        let mut store = ConversationStore::new();
        let mut quiet = conversation(3, 30, None);
        quiet.last_message = None;
        store.load_all(vec![conversation(1, 10, Some(100)), quiet, conversation(2, 20, Some(200))]);

        assert_eq!(ids(&store), vec![2, 1, 3]);
    }

    #[test]
    fn test_incoming_moves_to_front_and_counts_unread() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(200)), conversation(2, 20, Some(100))]);

        let applied = store.apply_incoming_message(&message(Some(9), 2, 20, 300, "oi"), Some(1));

        assert_eq!(applied, Applied::Updated { unread_count: 1 });
        assert_eq!(ids(&store), vec![2, 1]);
        let convo = store.get(2).unwrap();
        assert_eq!(convo.last_message.as_deref(), Some("oi"));
        assert_eq!(convo.last_message_timestamp.map(|t| t.timestamp()), Some(300));
    }

    #[test]
    fn test_incoming_for_active_keeps_zero_unread() {
        let mut store = ConversationStore::new();
        let mut active = conversation(1, 10, Some(100));
        active.unread_count = 2;
        store.load_all(vec![active]);

        store.apply_incoming_message(&message(Some(1), 1, 10, 200, "hey"), Some(1));
        assert_eq!(store.get(1).unwrap().unread_count, 0);
    }

    #[test]
    fn test_newest_conversation_already_in_front_stays() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(200)), conversation(2, 20, Some(100))]);

        store.apply_incoming_message(&message(Some(5), 1, 10, 300, "again"), None);
        assert_eq!(ids(&store), vec![1, 2]);
        assert_eq!(store.get(1).unwrap().unread_count, 1);
    }

    #[test]
    fn test_equal_timestamp_moves_ahead_of_peers() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(300)), conversation(2, 20, Some(100))]);

        store.apply_incoming_message(&message(Some(5), 2, 20, 300, "tie"), None);
        assert_eq!(ids(&store), vec![2, 1]);
    }

    #[test]
    fn test_late_message_keeps_newer_preview() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(500))]);
        let before = store.get(1).unwrap().last_message.clone();

        store.apply_incoming_message(&message(Some(5), 1, 10, 100, "old"), None);
        let convo = store.get(1).unwrap();
        assert_eq!(convo.last_message, before);
        assert_eq!(convo.last_message_timestamp.map(|t| t.timestamp()), Some(500));
        assert_eq!(convo.unread_count, 1);
    }

    #[test]
    fn test_unknown_conversation_is_not_applied() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(100))]);

        let applied = store.apply_incoming_message(&message(Some(5), 99, 10, 200, "?"), None);
        assert_eq!(applied, Applied::Unknown);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_mark_read_zeroes_only_target() {
        let mut store = ConversationStore::new();
        let mut a = conversation(1, 10, Some(200));
        a.unread_count = 4;
        let mut b = conversation(2, 20, Some(100));
        b.unread_count = 1;
        store.load_all(vec![a, b]);

        assert!(store.mark_read(1));
        assert_eq!(store.get(1).unwrap().unread_count, 0);
        assert_eq!(store.get(2).unwrap().unread_count, 1);
        assert!(!store.mark_read(42));
        assert_eq!(store.total_unread(), 1);
    }

    #[test]
    fn test_outgoing_updates_preview_without_unread() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(200)), conversation(2, 20, Some(100))]);

        store.record_outgoing(&message(None, 2, 1, 300, "mine"));
        assert_eq!(ids(&store), vec![2, 1]);
        assert_eq!(store.get(2).unwrap().unread_count, 0);
        assert_eq!(store.get(2).unwrap().last_message.as_deref(), Some("mine"));
    }

    #[test]
    fn test_media_only_preview() {
        let mut store = ConversationStore::new();
        store.load_all(vec![conversation(1, 10, Some(100))]);

        let mut msg = message(Some(2), 1, 10, 200, "");
        msg.content = None;
        msg.media_url = Some("photo.jpg".to_string());
        store.apply_incoming_message(&msg, None);
        assert_eq!(store.get(1).unwrap().last_message.as_deref(), Some("[media]"));
    }
}
