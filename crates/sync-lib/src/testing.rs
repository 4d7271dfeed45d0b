// ============================
// crates/sync-lib/src/testing.rs
// ============================
//! Test doubles and fixtures shared by the unit tests.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vaquerama_common::{
    ClientEvent, Conversation, ConversationId, Message, MessageId, Notification, NotificationKind,
    ServerEvent, User, UserId,
};

use crate::api::{ApiClient, MediaUpload};
use crate::error::SyncError;
use crate::transport::{Link, LinkEvent, Transport};

pub fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

pub fn conversation(id: ConversationId, participant: UserId, last_ts: Option<i64>) -> Conversation {
    Conversation {
        conversation_id: id,
        participant_id: participant,
        participant_name: format!("user{participant}"),
        participant_photo: None,
        last_message: last_ts.map(|_| format!("hello from {participant}")),
        last_message_timestamp: last_ts.map(ts),
        unread_count: 0,
    }
}

pub fn message(
    id: Option<MessageId>,
    conversation_id: ConversationId,
    sender_id: UserId,
    at: i64,
    content: &str,
) -> Message {
    Message {
        id,
        conversation_id,
        sender_id,
        content: Some(content.to_string()),
        media_url: None,
        created_at: ts(at),
    }
}

pub fn notification(id: i64, is_read: bool) -> Notification {
    Notification {
        id,
        kind: NotificationKind::Like,
        sender_id: 50 + id,
        sender_name: format!("fan{id}"),
        sender_avatar: None,
        created_at: ts(1_000 + id),
        is_read,
        post_id: Some(7),
        post_media: Some("post.jpg".to_string()),
    }
}

#[derive(Default)]
struct TransportState {
    opens: AtomicUsize,
    inbound: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    outbound: Mutex<Option<mpsc::Receiver<ClientEvent>>>,
    hello: Mutex<Option<ClientEvent>>,
    sent: Mutex<Vec<ClientEvent>>,
}

/// In-memory transport driven by the test
///
/// Clones share state, so a test keeps one clone and hands another to the
/// code under test.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Bring the link up: whatever was queued goes out on the old connection,
    /// then the hello, then subscribers hear about it
    pub async fn link_up(&self, reconnect: bool) {
        self.drain();
        if let Some(hello) = self.state.hello.lock().clone() {
            self.state.sent.lock().push(hello);
        }
        self.deliver(LinkEvent::Up { reconnect }).await;
    }

    pub async fn link_down(&self, reason: &str) {
        self.deliver(LinkEvent::Down {
            reason: reason.to_string(),
        })
        .await;
    }

    pub async fn push(&self, event: ServerEvent) {
        self.deliver(LinkEvent::Frame(event)).await;
    }

    /// Everything emitted so far, across every link
    pub fn sent(&self) -> Vec<ClientEvent> {
        self.drain();
        self.state.sent.lock().clone()
    }

    async fn deliver(&self, event: LinkEvent) {
        let tx = self.state.inbound.lock().clone().expect("no link open");
        tx.send(event).await.expect("link receiver dropped");
    }

    fn drain(&self) {
        let mut outbound = self.state.outbound.lock();
        if let Some(rx) = outbound.as_mut() {
            let mut sent = self.state.sent.lock();
            while let Ok(event) = rx.try_recv() {
                sent.push(event);
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, hello: ClientEvent) -> Result<Link, SyncError> {
        self.drain();
        *self.state.hello.lock() = Some(hello);
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        *self.state.inbound.lock() = Some(inbound_tx);
        *self.state.outbound.lock() = Some(outbound_rx);
        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            closer: None,
        })
    }
}

/// Scripted REST backend
#[derive(Default)]
pub struct MockApi {
    conversations: Mutex<Vec<Conversation>>,
    histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
    history_delays: Mutex<HashMap<ConversationId, Duration>>,
    notifications: Mutex<Vec<Notification>>,
    fail_conversations: AtomicBool,
    fail_sends: AtomicBool,
    fail_mark_read: AtomicBool,
    reject_token: AtomicBool,
    next_message_id: AtomicI64,
    login_calls: AtomicUsize,
    conversation_calls: AtomicUsize,
    notification_calls: AtomicUsize,
    history_calls: Mutex<Vec<ConversationId>>,
    send_calls: Mutex<Vec<(ConversationId, Option<String>, Option<String>)>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(100),
            ..Self::default()
        }
    }

    pub fn with_conversations(self, items: Vec<Conversation>) -> Self {
        *self.conversations.lock() = items;
        self
    }

    pub fn with_history(self, conversation_id: ConversationId, items: Vec<Message>) -> Self {
        self.histories.lock().insert(conversation_id, items);
        self
    }

    pub fn with_notifications(self, items: Vec<Notification>) -> Self {
        *self.notifications.lock() = items;
        self
    }

    pub fn delay_history(&self, conversation_id: ConversationId, delay: Duration) {
        self.history_delays.lock().insert(conversation_id, delay);
    }

    pub fn set_conversations(&self, items: Vec<Conversation>) {
        *self.conversations.lock() = items;
    }

    pub fn fail_conversations(&self, fail: bool) {
        self.fail_conversations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_read(&self, fail: bool) {
        self.fail_mark_read.store(fail, Ordering::SeqCst);
    }

    pub fn reject_token(&self) {
        self.reject_token.store(true, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn conversation_calls(&self) -> usize {
        self.conversation_calls.load(Ordering::SeqCst)
    }

    pub fn notification_calls(&self) -> usize {
        self.notification_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> Vec<ConversationId> {
        self.history_calls.lock().clone()
    }

    /// `(conversation, content, media filename)` of every write
    pub fn send_calls(&self) -> Vec<(ConversationId, Option<String>, Option<String>)> {
        self.send_calls.lock().clone()
    }

    fn offline() -> SyncError {
        SyncError::Transport("connection refused".to_string())
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn login(&self, _email: &str, _password: &str) -> Result<String, SyncError> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }

    async fn current_user(&self) -> Result<User, SyncError> {
        if self.reject_token.load(Ordering::SeqCst) {
            return Err(SyncError::Unauthorized("invalid token".to_string()));
        }
        Ok(User {
            id: 1,
            username: "ana".to_string(),
            name: Some("Ana".to_string()),
            profile_picture_url: None,
        })
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, SyncError> {
        self.conversation_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_conversations.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        Ok(self.conversations.lock().clone())
    }

    async fn messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, SyncError> {
        self.history_calls.lock().push(conversation_id);
        let delay = self.history_delays.lock().get(&conversation_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .histories
            .lock()
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: Option<&str>,
        media: Option<&MediaUpload>,
    ) -> Result<MessageId, SyncError> {
        self.send_calls.lock().push((
            conversation_id,
            content.map(str::to_string),
            media.map(|m| m.filename.clone()),
        ));
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Self::offline());
        }
        Ok(self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn notifications(&self) -> Result<Vec<Notification>, SyncError> {
        self.notification_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.notifications.lock().clone())
    }

    async fn mark_all_notifications_read(&self) -> Result<(), SyncError> {
        if self.fail_mark_read.load(Ordering::SeqCst) {
            return Err(SyncError::Http {
                status: 500,
                message: "boom".to_string(),
            });
        }
        for n in self.notifications.lock().iter_mut() {
            n.is_read = true;
        }
        Ok(())
    }
}
