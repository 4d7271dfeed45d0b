// ============================
// crates/sync-lib/src/connection.rs
// ============================
//! Connection manager: owns the single live channel of a session.
//!
//! Other components never open or close the channel. They attach named
//! listeners with [`ConnectionManager::subscribe`] and release them by dropping
//! the returned [`Subscription`].
//!
//! Events are only accepted while the link is up. Anything emitted during an
//! outage is refused with [`SyncError::NotConnected`]; the reconnect handlers
//! rejoin and refetch instead of replaying.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vaquerama_common::{ClientEvent, ServerEvent, UserId};

use crate::error::SyncError;
use crate::metrics::{WS_CONNECTED, WS_DISCONNECTED, WS_RECONNECTED};
use crate::transport::{LinkCloser, LinkEvent, Transport};

/// Event name delivered when the channel first comes up
pub const CONNECTED: &str = "connect";
/// Event name delivered when the channel comes back after an outage
pub const RECONNECTED: &str = "reconnect";
/// Event name delivered when the channel drops
pub const DISCONNECTED: &str = "disconnect";

/// What subscribers receive
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected,
    Reconnected,
    Disconnected { reason: String },
    Server(ServerEvent),
    /// The subscriber fell behind and `missed` events were dropped
    Lagged { missed: u64 },
}

impl ChannelEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelEvent::Connected => CONNECTED,
            ChannelEvent::Reconnected => RECONNECTED,
            ChannelEvent::Disconnected { .. } => DISCONNECTED,
            ChannelEvent::Server(event) => event.name(),
            ChannelEvent::Lagged { .. } => "lagged",
        }
    }
}

/// A listener attached to the live channel
///
/// Dropping the subscription detaches the listener.
pub struct Subscription {
    rx: broadcast::Receiver<ChannelEvent>,
    names: Vec<&'static str>,
}

impl Subscription {
    /// Next event matching this subscription's names; `None` once the manager is gone
    ///
    /// Lag notifications are always delivered.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Subscriber lagged behind by {} events", missed);
                    return Some(ChannelEvent::Lagged { missed });
                },
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn wants(&self, event: &ChannelEvent) -> bool {
        self.names.is_empty() || self.names.contains(&event.name())
    }
}

struct ActiveChannel {
    user_id: UserId,
    outbound: mpsc::Sender<ClientEvent>,
    link_up: Arc<AtomicBool>,
    pump: JoinHandle<()>,
    closer: Option<LinkCloser>,
}

/// Owns the live channel for one authenticated session
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    active: Mutex<Option<ActiveChannel>>,
    events: broadcast::Sender<ChannelEvent>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            transport,
            active: Mutex::new(None),
            events,
        }
    }

    /// Open the channel for `user_id`
    ///
    /// Calling it again for the same user is a no-op. A different user replaces
    /// the current channel.
    pub async fn connect(&self, user_id: UserId) -> Result<(), SyncError> {
        let mut active = self.active.lock().await;

        if let Some(current) = active.as_ref() {
            if current.user_id == user_id {
                debug!("Live channel already open for user {}", user_id);
                return Ok(());
            }
        }
        if let Some(previous) = active.take() {
            info!("Replacing live channel of user {}", previous.user_id);
            Self::teardown(previous).await;
        }

        // The server forgets identities across connections
        let link = self
            .transport
            .open(ClientEvent::RegisterUser { user_id })
            .await?;
        let link_up = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(Self::pump(
            user_id,
            link.inbound,
            link_up.clone(),
            self.events.clone(),
        ));

        *active = Some(ActiveChannel {
            user_id,
            outbound: link.outbound,
            link_up,
            pump,
            closer: link.closer,
        });
        info!("Live channel opened for user {}", user_id);
        Ok(())
    }

    /// Close the channel; safe to call when not connected
    pub async fn disconnect(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            info!("Closing live channel of user {}", previous.user_id);
            Self::teardown(previous).await;
            let _ = self.events.send(ChannelEvent::Disconnected {
                reason: "closed".to_string(),
            });
        }
    }

    /// Queue an event for the server without waiting
    ///
    /// Fails with [`SyncError::NotConnected`] while the link is down and with
    /// [`SyncError::Transport`] when the outbound queue is full.
    pub async fn emit(&self, event: ClientEvent) -> Result<(), SyncError> {
        let outbound = self
            .active
            .lock()
            .await
            .as_ref()
            .filter(|a| a.link_up.load(Ordering::SeqCst))
            .map(|a| a.outbound.clone())
            .ok_or(SyncError::NotConnected)?;

        debug!("Emitting {}", event.name());
        outbound.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                warn!("Outbound queue full, dropping {}", event.name());
                SyncError::Transport("outbound queue full".to_string())
            },
            TrySendError::Closed(_) => SyncError::NotConnected,
        })
    }

    /// Attach a listener for the given event names; an empty slice receives everything
    pub fn subscribe(&self, names: &[&'static str]) -> Subscription {
        Subscription {
            rx: self.events.subscribe(),
            names: names.to_vec(),
        }
    }

    /// Whether a channel is currently open, up or reconnecting
    pub async fn is_connected(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Whether the open channel can carry events right now
    pub async fn is_link_up(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|a| a.link_up.load(Ordering::SeqCst))
    }

    /// User the channel was opened for
    pub async fn user_id(&self) -> Option<UserId> {
        self.active.lock().await.as_ref().map(|a| a.user_id)
    }

    /// Number of attached listeners
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    async fn teardown(channel: ActiveChannel) {
        channel.pump.abort();
        drop(channel.outbound);
        if let Some(closer) = channel.closer {
            closer.close().await;
        }
    }

    async fn pump(
        user_id: UserId,
        mut inbound: mpsc::Receiver<LinkEvent>,
        link_up: Arc<AtomicBool>,
        events: broadcast::Sender<ChannelEvent>,
    ) {
        while let Some(event) = inbound.recv().await {
            let forwarded = match event {
                LinkEvent::Up { reconnect } => {
                    // Subscribers may emit as soon as they hear about it
                    link_up.store(true, Ordering::SeqCst);
                    if reconnect {
                        counter!(WS_RECONNECTED).increment(1);
                        ChannelEvent::Reconnected
                    } else {
                        counter!(WS_CONNECTED).increment(1);
                        ChannelEvent::Connected
                    }
                },
                LinkEvent::Down { reason } => {
                    link_up.store(false, Ordering::SeqCst);
                    counter!(WS_DISCONNECTED).increment(1);
                    ChannelEvent::Disconnected { reason }
                },
                LinkEvent::Frame(event) => {
                    debug!("Received {}", event.name());
                    ChannelEvent::Server(event)
                },
                LinkEvent::Closed => {
                    link_up.store(false, Ordering::SeqCst);
                    let _ = events.send(ChannelEvent::Disconnected {
                        reason: "gave up reconnecting".to_string(),
                    });
                    break;
                },
            };
            // No subscribers is fine
            let _ = events.send(forwarded);
        }
        debug!("Live channel pump for user {} finished", user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::time::Duration;
    use tokio::time;

    async fn next(sub: &mut Subscription) -> ChannelEvent {
        time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timed out")
            .expect("manager gone")
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);

        manager.connect(1).await.unwrap();
        manager.connect(1).await.unwrap();

        assert_eq!(transport.open_count(), 1);
        assert!(manager.is_connected().await);
        assert_eq!(manager.user_id().await, Some(1));
    }

    #[tokio::test]
    async fn test_disconnect_when_not_connected_is_safe() {
        let manager = ConnectionManager::new(Arc::new(MockTransport::new()), 16);
        manager.disconnect().await;
        assert!(!manager.is_connected().await);
        assert!(matches!(
            manager.emit(ClientEvent::JoinConversation { conversation_id: 1 }).await,
            Err(SyncError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_registers_on_every_link_up() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);
        let mut sub = manager.subscribe(&[CONNECTED, RECONNECTED]);

        manager.connect(42).await.unwrap();
        transport.link_up(false).await;
        assert_eq!(next(&mut sub).await, ChannelEvent::Connected);

        transport.link_down("network").await;
        transport.link_up(true).await;
        assert_eq!(next(&mut sub).await, ChannelEvent::Reconnected);

        assert_eq!(
            transport.sent(),
            vec![
                ClientEvent::RegisterUser { user_id: 42 },
                ClientEvent::RegisterUser { user_id: 42 },
            ]
        );
    }

    #[tokio::test]
    async fn test_emit_is_refused_while_link_is_down() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);
        let mut sub = manager.subscribe(&[CONNECTED, RECONNECTED, DISCONNECTED]);
        let join = ClientEvent::JoinConversation { conversation_id: 7 };

        // Open but never up
        manager.connect(42).await.unwrap();
        assert!(manager.is_connected().await);
        assert!(!manager.is_link_up().await);
        assert!(matches!(manager.emit(join.clone()).await, Err(SyncError::NotConnected)));

        transport.link_up(false).await;
        assert_eq!(next(&mut sub).await, ChannelEvent::Connected);
        manager.emit(join.clone()).await.unwrap();

        transport.link_down("network").await;
        assert!(matches!(next(&mut sub).await, ChannelEvent::Disconnected { .. }));
        for _ in 0..100 {
            assert!(matches!(manager.emit(join.clone()).await, Err(SyncError::NotConnected)));
        }

        transport.link_up(true).await;
        assert_eq!(next(&mut sub).await, ChannelEvent::Reconnected);
        assert_eq!(
            transport.sent(),
            vec![
                ClientEvent::RegisterUser { user_id: 42 },
                join,
                ClientEvent::RegisterUser { user_id: 42 },
            ]
        );
    }

    #[tokio::test]
    async fn test_emit_never_waits_on_a_full_queue() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);
        let mut sub = manager.subscribe(&[CONNECTED]);

        manager.connect(1).await.unwrap();
        transport.link_up(false).await;
        assert_eq!(next(&mut sub).await, ChannelEvent::Connected);

        // Nothing drains the queue, so it fills up and further events are refused
        let outcomes = time::timeout(Duration::from_secs(2), async {
            let mut outcomes = Vec::new();
            for id in 0..200 {
                outcomes.push(
                    manager
                        .emit(ClientEvent::JoinConversation { conversation_id: id })
                        .await,
                );
            }
            outcomes
        })
        .await
        .expect("emit blocked");
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(SyncError::Transport(_)))));
    }

    #[tokio::test]
    async fn test_subscription_filters_by_name() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);
        let mut sub = manager.subscribe(&["new_notification"]);

        manager.connect(1).await.unwrap();
        transport.link_up(false).await;
        transport.push(ServerEvent::UpdateConversationList).await;
        transport
            .push(ServerEvent::NewNotification(crate::testing::notification(1, false)))
            .await;

        match next(&mut sub).await {
            ChannelEvent::Server(ServerEvent::NewNotification(n)) => assert_eq!(n.id, 1),
            other => panic!("Unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_listener() {
        let manager = ConnectionManager::new(Arc::new(MockTransport::new()), 16);
        assert_eq!(manager.listener_count(), 0);

        let sub = manager.subscribe(&[]);
        let other = manager.subscribe(&[CONNECTED]);
        assert_eq!(manager.listener_count(), 2);

        drop(sub);
        assert_eq!(manager.listener_count(), 1);
        drop(other);
        assert_eq!(manager.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect_opens_new_link() {
        let transport = MockTransport::new();
        let manager = ConnectionManager::new(Arc::new(transport.clone()), 16);

        manager.connect(1).await.unwrap();
        manager.disconnect().await;
        manager.disconnect().await;
        manager.connect(1).await.unwrap();

        assert_eq!(transport.open_count(), 2);
    }
}
