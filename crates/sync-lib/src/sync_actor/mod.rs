// ============================
// crates/sync-lib/src/sync_actor/mod.rs
// ============================
//! The sync actor: one task owning every piece of client state.
//!
//! Commands from the view and events from the live channel are processed one
//! at a time. Network calls run in spawned tasks and report back as completion
//! messages, so a slow request never holds up event processing. The view
//! observes state through a [`watch`] snapshot published after every message.
use chrono::Utc;
use metrics::{counter, gauge};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vaquerama_common::{
    ClientEvent, Conversation, ConversationId, Message, MessageId, Notification, ServerEvent, UserId,
};

use crate::api::{ApiClient, MediaUpload};
use crate::connection::{ChannelEvent, ConnectionManager, Subscription};
use crate::conversations::{Applied, ConversationStore};
use crate::error::{ErrorKind, SyncError};
use crate::metrics::{
    BADGE_TOTAL, HISTORY_DISCARDED, MESSAGE_RECEIVED, MESSAGE_SENT, MESSAGE_SEND_FAILED,
    NOTIFICATION_RECEIVED,
};
use crate::notifications::{Badge, NotificationAggregator};
use crate::stream::{Delivery, LogEntry, MessageStream, Routing};
use crate::validation::validate_outgoing;
use crate::view::{Route, Selection, ViewSelector};


type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// Message sent *into* the actor
#[derive(Debug)]
pub enum ActorMsg {
    LoadConversations {
        resp_tx: Reply<()>,
    },
    Navigate {
        route: Route,
        resp_tx: Reply<()>,
    },
    OpenConversation {
        conversation_id: ConversationId,
        resp_tx: Reply<()>,
    },
    CloseConversation {
        resp_tx: Reply<()>,
    },
    SendMessage {
        conversation_id: ConversationId,
        content: Option<String>,
        media: Option<MediaUpload>,
        resp_tx: Reply<MessageId>,
    },
    RetrySend {
        local_id: Uuid,
        resp_tx: Reply<MessageId>,
    },
    FetchNotifications {
        resp_tx: Reply<()>,
    },
    MarkAllRead {
        resp_tx: Reply<()>,
    },
    ClearMessageBadge,
    Shutdown {
        resp_tx: oneshot::Sender<()>,
    },

    // Completions from spawned I/O
    ConversationsLoaded {
        result: Result<Vec<Conversation>, SyncError>,
        resp_tx: Option<Reply<()>>,
    },
    HistoryLoaded {
        conversation_id: ConversationId,
        generation: u64,
        result: Result<Vec<Message>, SyncError>,
    },
    SendFinished {
        local_id: Uuid,
        conversation_id: ConversationId,
        result: Result<MessageId, SyncError>,
        resp_tx: Reply<MessageId>,
    },
    NotificationsLoaded {
        result: Result<Vec<Notification>, SyncError>,
        resp_tx: Option<Reply<()>>,
    },
    MarkAllReadFinished {
        result: Result<(), SyncError>,
        resp_tx: Option<Reply<()>>,
    },
}

/// Everything the view renders
#[derive(Debug, Clone, Default)]
pub struct SyncSnapshot {
    /// Live channel is up
    pub connected: bool,
    /// A request was rejected for lack of a valid credential
    pub auth_required: bool,
    pub route: Route,
    pub conversations: Vec<Conversation>,
    /// Last conversation list failure, cleared by the next success
    pub conversations_error: Option<String>,
    pub active: Option<ConversationId>,
    pub loading_history: bool,
    pub history_error: Option<String>,
    pub log: Vec<LogEntry>,
    pub notifications: Vec<Notification>,
    pub badge: Badge,
}

/// Handle that other components keep: command channel + state snapshot
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: mpsc::UnboundedSender<ActorMsg>,
    snapshot_rx: watch::Receiver<SyncSnapshot>,
}

impl SyncHandle {
    /// Fetch the conversation list, replacing local state
    pub async fn load_conversations(&self) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::LoadConversations { resp_tx }).await
    }

    /// Change route; opens or closes the conversation accordingly
    pub async fn navigate(&self, route: Route) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::Navigate { route, resp_tx }).await
    }

    pub async fn open_conversation(&self, conversation_id: ConversationId) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::OpenConversation {
            conversation_id,
            resp_tx,
        })
        .await
    }

    pub async fn close_conversation(&self) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::CloseConversation { resp_tx }).await
    }

    /// Send a message to the open conversation
    ///
    /// Resolves once the durable write finishes. A failed write leaves the
    /// entry in the log as failed and returns [`SyncError::SendFailed`] with
    /// the ID to pass to [`SyncHandle::retry_send`].
    pub async fn send_message(
        &self,
        conversation_id: ConversationId,
        content: Option<String>,
        media: Option<MediaUpload>,
    ) -> Result<MessageId, SyncError> {
        self.request(|resp_tx| ActorMsg::SendMessage {
            conversation_id,
            content,
            media,
            resp_tx,
        })
        .await
    }

    pub async fn retry_send(&self, local_id: Uuid) -> Result<MessageId, SyncError> {
        self.request(|resp_tx| ActorMsg::RetrySend { local_id, resp_tx }).await
    }

    pub async fn fetch_notifications(&self) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::FetchNotifications { resp_tx }).await
    }

    pub async fn mark_all_read(&self) -> Result<(), SyncError> {
        self.request(|resp_tx| ActorMsg::MarkAllRead { resp_tx }).await
    }

    pub fn clear_message_badge(&self) -> Result<(), SyncError> {
        self.cmd_tx.send(ActorMsg::ClearMessageBadge)?;
        Ok(())
    }

    /// Leave the joined room and stop the actor
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(ActorMsg::Shutdown { resp_tx })?;
        resp_rx.await?;
        Ok(())
    }

    /// Latest published state
    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot_rx.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> ActorMsg) -> Result<T, SyncError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.cmd_tx.send(make(resp_tx))?;
        resp_rx.await?
    }
}

/// Start the actor for `session_user`
///
/// The live subscription is taken before the task starts so no event emitted
/// after this call is missed.
pub fn spawn_sync_actor(
    api: Arc<dyn ApiClient>,
    connection: Arc<ConnectionManager>,
    session_user: UserId,
) -> SyncHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(SyncSnapshot::default());
    let live = connection.subscribe(&[]);

    let actor = SyncActor {
        api,
        connection,
        session_user,
        completions: cmd_tx.downgrade(),
        snapshot_tx,
        connected: false,
        auth_required: false,
        conversations: ConversationStore::new(),
        conversations_error: None,
        stream: MessageStream::new(),
        history_error: None,
        notifications: NotificationAggregator::new(),
        view: ViewSelector::new(),
        outgoing: HashMap::new(),
    };
    tokio::spawn(actor.run(cmd_rx, live));

    SyncHandle {
        cmd_tx,
        snapshot_rx,
    }
}

/// What a retry needs that the log entry does not carry
struct Outgoing {
    media: Option<MediaUpload>,
    /// The live event reached the channel
    relayed: bool,
}

pub struct SyncActor {
    api: Arc<dyn ApiClient>,
    connection: Arc<ConnectionManager>,
    session_user: UserId,
    /// Weak so the actor stops once every handle is dropped
    completions: mpsc::WeakUnboundedSender<ActorMsg>,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    connected: bool,
    auth_required: bool,
    conversations: ConversationStore,
    conversations_error: Option<String>,
    stream: MessageStream,
    history_error: Option<String>,
    notifications: NotificationAggregator,
    view: ViewSelector,
    outgoing: HashMap<Uuid, Outgoing>,
}

impl SyncActor {
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ActorMsg>, mut live: Subscription) {
        info!("Sync actor started for user {}", self.session_user);
        let mut live_open = true;

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(ActorMsg::Shutdown { resp_tx }) => {
                        self.close_current().await;
                        self.publish();
                        let _ = resp_tx.send(());
                        break;
                    },
                    Some(msg) => self.handle(msg).await,
                    None => break,
                },
                event = live.recv(), if live_open => match event {
                    Some(event) => self.handle_channel_event(event).await,
                    None => {
                        debug!("Live channel subscription closed");
                        live_open = false;
                    },
                },
            }
            self.publish();
        }
        info!("Sync actor for user {} stopped", self.session_user);
    }

    async fn handle(&mut self, msg: ActorMsg) {
        match msg {
            ActorMsg::LoadConversations { resp_tx } => self.refresh_conversations(Some(resp_tx)),
            ActorMsg::Navigate { route, resp_tx } => {
                let result = self.navigate(route).await;
                self.reply(resp_tx, result);
            },
            ActorMsg::OpenConversation {
                conversation_id,
                resp_tx,
            } => {
                let result = match self.conversations.get(conversation_id) {
                    Some(_) => {
                        self.switch_to(conversation_id).await;
                        Ok(())
                    },
                    None => Err(SyncError::UnknownConversation(conversation_id)),
                };
                self.reply(resp_tx, result);
            },
            ActorMsg::CloseConversation { resp_tx } => {
                self.close_current().await;
                self.reply(resp_tx, Ok(()));
            },
            ActorMsg::SendMessage {
                conversation_id,
                content,
                media,
                resp_tx,
            } => self.send_message(conversation_id, content, media, resp_tx).await,
            ActorMsg::RetrySend { local_id, resp_tx } => self.retry_send(local_id, resp_tx).await,
            ActorMsg::FetchNotifications { resp_tx } => self.refresh_notifications(Some(resp_tx)),
            ActorMsg::MarkAllRead { resp_tx } => self.mark_all_read(Some(resp_tx)),
            ActorMsg::ClearMessageBadge => self.notifications.clear_message_unread(),
            ActorMsg::Shutdown { resp_tx } => {
                let _ = resp_tx.send(());
            },

            ActorMsg::ConversationsLoaded { result, resp_tx } => {
                self.conversations_loaded(result, resp_tx).await
            },
            ActorMsg::HistoryLoaded {
                conversation_id,
                generation,
                result,
            } => self.history_loaded(conversation_id, generation, result),
            ActorMsg::SendFinished {
                local_id,
                conversation_id,
                result,
                resp_tx,
            } => self.send_finished(local_id, conversation_id, result, resp_tx),
            ActorMsg::NotificationsLoaded { result, resp_tx } => {
                let result = result.map(|items| self.notifications.replace_all(items));
                self.finish_background("notifications", result, resp_tx);
            },
            ActorMsg::MarkAllReadFinished { result, resp_tx } => {
                let result = result.map(|()| self.notifications.mark_all_read_applied());
                self.finish_background("mark all read", result, resp_tx);
            },
        }
    }

    async fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.connected = true;
                self.rejoin().await;
            },
            ChannelEvent::Reconnected | ChannelEvent::Lagged { .. } => {
                // Pushes may have been missed; fetch what they would have told us
                self.connected = true;
                self.rejoin().await;
                self.refresh_conversations(None);
                self.refresh_notifications(None);
            },
            ChannelEvent::Disconnected { reason } => {
                debug!("Live channel down: {}", reason);
                self.connected = false;
            },
            ChannelEvent::Server(ServerEvent::ReceiveMessage(msg)) => self.receive_message(msg),
            ChannelEvent::Server(ServerEvent::NewNotification(notification)) => {
                counter!(NOTIFICATION_RECEIVED).increment(1);
                debug!("Notification {} ({:?})", notification.id, notification.kind);
                self.notifications.add_incoming(notification);
            },
            ChannelEvent::Server(ServerEvent::UpdateConversationList) => {
                self.refresh_conversations(None)
            },
        }
    }

    fn receive_message(&mut self, msg: Message) {
        counter!(MESSAGE_RECEIVED).increment(1);
        let active = self.stream.active();
        let own = msg.sender_id == self.session_user;

        if self.stream.append_incoming(&msg, Some(self.session_user)) == Routing::Duplicate {
            debug!("Ignoring duplicate message {:?}", msg.id);
            return;
        }

        let applied = if own {
            self.conversations.record_outgoing(&msg)
        } else {
            self.conversations.apply_incoming_message(&msg, active)
        };
        if applied == Applied::Unknown {
            // A conversation we have not seen yet
            self.refresh_conversations(None);
        }
        self.notifications
            .count_incoming_message(&msg, Some(self.session_user), active);
    }

    async fn navigate(&mut self, route: Route) -> Result<(), SyncError> {
        debug!("Navigating to {:?}", route);
        let nav = self
            .view
            .navigate(route, &self.conversations, self.stream.active());

        self.apply_selection(nav.selection).await;
        if nav.entered_messages {
            self.notifications.clear_message_unread();
        }
        if nav.entered_notifications {
            self.mark_all_read(None);
        }
        Ok(())
    }

    async fn apply_selection(&mut self, selection: Selection) {
        match selection {
            Selection::Keep => {},
            Selection::Open(conversation_id) => self.switch_to(conversation_id).await,
            Selection::Close => self.close_current().await,
        }
    }

    /// Leave the previous room, load history, join the new room, mark it read
    async fn switch_to(&mut self, conversation_id: ConversationId) {
        if self.stream.active() == Some(conversation_id) {
            self.conversations.mark_read(conversation_id);
            return;
        }
        info!("Opening conversation {}", conversation_id);

        if let Some(leave) = self.stream.leave_room() {
            self.emit(leave).await;
        }
        self.outgoing.clear();
        self.history_error = None;

        let generation = self.stream.open(conversation_id);
        let api = self.api.clone();
        self.spawn_io(async move {
            let result = api.messages(conversation_id).await;
            ActorMsg::HistoryLoaded {
                conversation_id,
                generation,
                result,
            }
        });

        match self.stream.join_room(conversation_id) {
            Ok(Some(join)) => {
                self.emit(join).await;
            },
            Ok(None) => {},
            Err(e) => warn!("Room bookkeeping out of step: {}", e),
        }
        self.conversations.mark_read(conversation_id);
    }

    async fn close_current(&mut self) {
        if let Some(leave) = self.stream.leave_room() {
            self.emit(leave).await;
        }
        if self.stream.active().is_some() {
            debug!("Closing conversation {:?}", self.stream.active());
        }
        self.stream.close();
        self.outgoing.clear();
        self.history_error = None;
    }

    async fn rejoin(&mut self) {
        if let Some(join) = self.stream.rejoin() {
            self.emit(join).await;
        }
    }

    async fn send_message(
        &mut self,
        conversation_id: ConversationId,
        content: Option<String>,
        media: Option<MediaUpload>,
        resp_tx: Reply<MessageId>,
    ) {
        let content = match validate_outgoing(content.as_deref(), media.is_some()) {
            Ok(content) => content,
            Err(e) => {
                self.reply(resp_tx, Err(e.into()));
                return;
            },
        };

        let message = Message {
            id: None,
            conversation_id,
            sender_id: self.session_user,
            content,
            media_url: media.as_ref().map(|m| m.filename.clone()),
            created_at: Utc::now(),
        };
        let local_id = match self.stream.push_optimistic(message.clone()) {
            Ok(local_id) => local_id,
            Err(e) => {
                self.reply(resp_tx, Err(e));
                return;
            },
        };
        self.conversations.record_outgoing(&message);

        let relayed = self
            .emit(ClientEvent::SendMessage {
                conversation_id,
                message: message.clone(),
            })
            .await;
        self.outgoing.insert(
            local_id,
            Outgoing {
                media: media.clone(),
                relayed,
            },
        );
        self.spawn_write(local_id, message, media, resp_tx);
    }

    async fn retry_send(&mut self, local_id: Uuid, resp_tx: Reply<MessageId>) {
        let message = match self.stream.retry(local_id) {
            Ok(Some(message)) => message,
            Ok(None) => {
                let result = match self.stream.entry(local_id) {
                    Some(LogEntry {
                        delivery: Delivery::Confirmed,
                        message,
                        ..
                    }) => message.id.ok_or(SyncError::AlreadySending(local_id)),
                    _ => Err(SyncError::AlreadySending(local_id)),
                };
                self.reply(resp_tx, result);
                return;
            },
            Err(e) => {
                self.reply(resp_tx, Err(e));
                return;
            },
        };
        info!("Retrying message {}", local_id);

        let needs_relay = self.outgoing.get(&local_id).is_some_and(|o| !o.relayed);
        if needs_relay {
            let relayed = self
                .emit(ClientEvent::SendMessage {
                    conversation_id: message.conversation_id,
                    message: message.clone(),
                })
                .await;
            if let Some(outgoing) = self.outgoing.get_mut(&local_id) {
                outgoing.relayed = relayed;
            }
        }
        let media = self.outgoing.get(&local_id).and_then(|o| o.media.clone());
        self.spawn_write(local_id, message, media, resp_tx);
    }

    fn spawn_write(
        &self,
        local_id: Uuid,
        message: Message,
        media: Option<MediaUpload>,
        resp_tx: Reply<MessageId>,
    ) {
        let api = self.api.clone();
        self.spawn_io(async move {
            let result = api
                .send_message(message.conversation_id, message.content.as_deref(), media.as_ref())
                .await;
            ActorMsg::SendFinished {
                local_id,
                conversation_id: message.conversation_id,
                result,
                resp_tx,
            }
        });
    }

    fn send_finished(
        &mut self,
        local_id: Uuid,
        conversation_id: ConversationId,
        result: Result<MessageId, SyncError>,
        resp_tx: Reply<MessageId>,
    ) {
        let result = match result {
            Ok(message_id) => {
                counter!(MESSAGE_SENT).increment(1);
                debug!("Message {} stored as {}", local_id, message_id);
                self.stream.confirm(local_id, message_id);
                self.outgoing.remove(&local_id);
                Ok(message_id)
            },
            Err(e) => {
                counter!(MESSAGE_SEND_FAILED).increment(1);
                warn!(
                    "Failed to send message {} to conversation {}: {}",
                    local_id, conversation_id, e
                );
                self.note_auth_failure(&e);
                self.stream.mark_failed(local_id, e.sanitized_message());
                Err(SyncError::SendFailed {
                    local_id,
                    source: Box::new(e),
                })
            },
        };
        self.reply(resp_tx, result);
    }

    fn refresh_conversations(&self, resp_tx: Option<Reply<()>>) {
        let api = self.api.clone();
        self.spawn_io(async move {
            ActorMsg::ConversationsLoaded {
                result: api.conversations().await,
                resp_tx,
            }
        });
    }

    async fn conversations_loaded(
        &mut self,
        result: Result<Vec<Conversation>, SyncError>,
        resp_tx: Option<Reply<()>>,
    ) {
        let result = match result {
            Ok(items) => {
                self.conversations.load_all(items);
                self.conversations_error = None;
                // The open conversation has been read whatever the server says
                if let Some(active) = self.stream.active() {
                    self.conversations.mark_read(active);
                }
                let selection = self.view.resolve_pending(&self.conversations);
                self.apply_selection(selection).await;
                Ok(())
            },
            Err(e) => {
                self.conversations_error = Some(e.sanitized_message());
                Err(e)
            },
        };
        self.finish_background("conversation list", result, resp_tx);
    }

    fn history_loaded(
        &mut self,
        conversation_id: ConversationId,
        generation: u64,
        result: Result<Vec<Message>, SyncError>,
    ) {
        match result {
            Ok(history) => {
                if self.stream.finish_history(conversation_id, generation, history) {
                    self.history_error = None;
                } else {
                    counter!(HISTORY_DISCARDED).increment(1);
                }
            },
            Err(e) => {
                if self.stream.fail_history(conversation_id, generation) {
                    warn!("Failed to load history of conversation {}: {}", conversation_id, e);
                    self.note_auth_failure(&e);
                    self.history_error = Some(e.sanitized_message());
                }
            },
        }
    }

    fn refresh_notifications(&self, resp_tx: Option<Reply<()>>) {
        let api = self.api.clone();
        self.spawn_io(async move {
            ActorMsg::NotificationsLoaded {
                result: api.notifications().await,
                resp_tx,
            }
        });
    }

    fn mark_all_read(&self, resp_tx: Option<Reply<()>>) {
        let api = self.api.clone();
        self.spawn_io(async move {
            ActorMsg::MarkAllReadFinished {
                result: api.mark_all_notifications_read().await,
                resp_tx,
            }
        });
    }

    /// Log a failure and hand the result to the caller, if there is one
    fn finish_background(&mut self, what: &str, result: Result<(), SyncError>, resp_tx: Option<Reply<()>>) {
        if let Err(e) = &result {
            warn!("Failed to refresh {}: {}", what, e);
            self.note_auth_failure(e);
        }
        if let Some(resp_tx) = resp_tx {
            self.reply(resp_tx, result);
        }
    }

    fn note_auth_failure(&mut self, e: &SyncError) {
        if e.kind() == ErrorKind::Auth {
            self.auth_required = true;
        }
    }

    /// Emit on the live channel; failure is logged, not fatal
    async fn emit(&self, event: ClientEvent) -> bool {
        let name = event.name();
        match self.connection.emit(event).await {
            Ok(()) => true,
            // The reconnect handler rejoins and refetches
            Err(SyncError::NotConnected) => {
                debug!("Live channel down, not emitting {}", name);
                false
            },
            Err(e) => {
                warn!("Could not emit {}: {}", name, e);
                false
            },
        }
    }

    /// Run `io` off the actor and feed its result back in
    fn spawn_io<F>(&self, io: F)
    where
        F: Future<Output = ActorMsg> + Send + 'static,
    {
        let Some(tx) = self.completions.upgrade() else {
            debug!("Sync actor is stopping; dropping request");
            return;
        };
        tokio::spawn(async move {
            let _ = tx.send(io.await);
        });
    }

    /// Publish state before answering so the caller never sees an older snapshot
    fn reply<T>(&self, resp_tx: Reply<T>, result: Result<T, SyncError>) {
        self.publish();
        let _ = resp_tx.send(result);
    }

    fn publish(&self) {
        let badge = self.notifications.badge();
        gauge!(BADGE_TOTAL).set(badge.total() as f64);

        self.snapshot_tx.send_replace(SyncSnapshot {
            connected: self.connected,
            auth_required: self.auth_required,
            route: self.view.route().clone(),
            conversations: self.conversations.items().to_vec(),
            conversations_error: self.conversations_error.clone(),
            active: self.stream.active(),
            loading_history: self.stream.is_loading(),
            history_error: self.history_error.clone(),
            log: self.stream.log().to_vec(),
            notifications: self.notifications.items().to_vec(),
            badge,
        });
    }
}
