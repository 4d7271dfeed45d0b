// ==================
// crates/sync-lib/src/transport.rs
// ==================
//! Live-channel transports.
//!
//! A [`Transport`] opens a [`Link`]: an outbound queue of [`ClientEvent`]s and an
//! inbound stream of [`LinkEvent`]s. The WebSocket implementation keeps the link
//! alive across network drops, reconnecting with exponential backoff. Every
//! successful (re)connect writes the hello event before anything else, drops
//! whatever was queued while the link was down and only then reports
//! [`LinkEvent::Up`].

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, error, info, warn};
use vaquerama_common::{ClientEvent, ServerEvent};

use crate::config::{ReconnectSettings, Settings};
use crate::error::SyncError;

/// How long a closing link may take to send its close frame
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Status changes and inbound traffic reported by a link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// The link is usable; `reconnect` is true after an outage
    Up { reconnect: bool },
    /// The link dropped and may come back
    Down { reason: String },
    /// A decoded server event
    Frame(ServerEvent),
    /// The link gave up and will not come back
    Closed,
}

/// Shuts down a link's background task
pub struct LinkCloser {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl LinkCloser {
    pub fn new(shutdown: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self { shutdown, task }
    }

    /// Ask the task to close gracefully, aborting it after a grace period
    pub async fn close(self) {
        let _ = self.shutdown.send(());
        let abort = self.task.abort_handle();
        if time::timeout(CLOSE_GRACE, self.task).await.is_err() {
            abort.abort();
        }
    }
}

/// An open live channel
pub struct Link {
    /// Events to send to the server
    pub outbound: mpsc::Sender<ClientEvent>,
    /// Status changes and server events
    pub inbound: mpsc::Receiver<LinkEvent>,
    /// Background task owning the connection, if any
    pub closer: Option<LinkCloser>,
}

/// Opens live channels
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a link that sends `hello` first on every connect
    async fn open(&self, hello: ClientEvent) -> Result<Link, SyncError>;
}

/// WebSocket transport built on tokio-tungstenite
#[derive(Debug, Clone)]
pub struct WsTransport {
    url: String,
    reconnect: ReconnectSettings,
    buffer: usize,
}

enum PumpEnd {
    /// Closed on our side; do not reconnect
    Local,
    /// Lost; reconnect
    Lost(String),
}

impl WsTransport {
    pub fn new(url: impl Into<String>, reconnect: ReconnectSettings, buffer: usize) -> Self {
        Self {
            url: url.into(),
            reconnect,
            buffer,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.socket_url.clone(),
            settings.reconnect.clone(),
            settings.event_buffer,
        )
    }

    async fn run(
        self,
        hello: ClientEvent,
        mut outbound_rx: mpsc::Receiver<ClientEvent>,
        inbound_tx: mpsc::Sender<LinkEvent>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut attempt: u32 = 0;
        let mut was_up = false;

        loop {
            let connected = tokio::select! {
                res = connect_async(self.url.as_str()) => res,
                _ = &mut shutdown_rx => return,
            };

            match connected {
                Ok((mut ws, _)) => {
                    info!("Live channel connected to {}", self.url);
                    attempt = 0;

                    // Anything queued before this connect belongs to the old session
                    let mut stale = 0;
                    while outbound_rx.try_recv().is_ok() {
                        stale += 1;
                    }
                    if stale > 0 {
                        debug!("Dropped {} events queued while offline", stale);
                    }

                    let greeted = match encode(&hello) {
                        Some(msg) => ws.send(msg).await.map_err(|e| e.to_string()),
                        None => Err(format!("{} could not be encoded", hello.name())),
                    };
                    match greeted {
                        Err(reason) => warn!("Live channel lost before hello: {}", reason),
                        Ok(()) => {
                            if inbound_tx.send(LinkEvent::Up { reconnect: was_up }).await.is_err() {
                                return;
                            }
                            was_up = true;

                            match Self::pump(ws, &mut outbound_rx, &inbound_tx, &mut shutdown_rx)
                                .await
                            {
                                PumpEnd::Local => {
                                    debug!("Live channel closed locally");
                                    return;
                                },
                                PumpEnd::Lost(reason) => {
                                    warn!("Live channel lost: {}", reason);
                                    if inbound_tx.send(LinkEvent::Down { reason }).await.is_err() {
                                        return;
                                    }
                                },
                            }
                        },
                    }
                },
                Err(e) => {
                    warn!("Failed to connect live channel to {}: {}", self.url, e);
                },
            }

            attempt += 1;
            if self.reconnect.max_attempts != 0 && attempt > self.reconnect.max_attempts {
                error!(
                    "Giving up on live channel after {} attempts",
                    self.reconnect.max_attempts
                );
                let _ = inbound_tx.send(LinkEvent::Closed).await;
                return;
            }

            let delay = self.reconnect.delay_for(attempt) + jitter(self.reconnect.base_delay_ms);
            debug!("Reconnecting live channel in {:?} (attempt {})", delay, attempt);
            tokio::select! {
                _ = time::sleep(delay) => {},
                _ = &mut shutdown_rx => return,
            }
        }
    }

    async fn pump<S>(
        ws: tokio_tungstenite::WebSocketStream<S>,
        outbound_rx: &mut mpsc::Receiver<ClientEvent>,
        inbound_tx: &mpsc::Sender<LinkEvent>,
        shutdown_rx: &mut oneshot::Receiver<()>,
    ) -> PumpEnd
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut sink, mut stream) = ws.split();

        loop {
            // Queued events go out before a requested shutdown
            tokio::select! {
                biased;
                out = outbound_rx.recv() => {
                    let Some(event) = out else {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        return PumpEnd::Local;
                    };
                    let Some(msg) = encode(&event) else {
                        continue;
                    };
                    if let Err(e) = sink.send(msg).await {
                        return PumpEnd::Lost(e.to_string());
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(text.as_str()) {
                            Ok(event) => {
                                if inbound_tx.send(LinkEvent::Frame(event)).await.is_err() {
                                    let _ = sink.send(WsMessage::Close(None)).await;
                                    return PumpEnd::Local;
                                }
                            },
                            Err(e) => warn!("Ignoring unrecognised frame ({}): {}", e, text.as_str()),
                        }
                    },
                    Some(Ok(WsMessage::Close(_))) | None => {
                        return PumpEnd::Lost("closed by server".to_string());
                    },
                    Some(Ok(_)) => {},
                    Some(Err(e)) => return PumpEnd::Lost(e.to_string()),
                },
                _ = &mut *shutdown_rx => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return PumpEnd::Local;
                },
            }
        }
    }
}

fn encode(event: &ClientEvent) -> Option<WsMessage> {
    match serde_json::to_string(event) {
        Ok(json) => {
            debug!("Sending {}", json);
            Some(WsMessage::Text(json.into()))
        },
        Err(e) => {
            error!("Failed to serialize {}: {}", event.name(), e);
            None
        },
    }
}

fn jitter(base_delay_ms: u64) -> Duration {
    let spread = base_delay_ms / 4;
    if spread == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=spread))
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, hello: ClientEvent) -> Result<Link, SyncError> {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(self.clone().run(hello, outbound_rx, inbound_tx, shutdown_rx));

        Ok(Link {
            outbound: outbound_tx,
            inbound: inbound_rx,
            closer: Some(LinkCloser::new(shutdown_tx, task)),
        })
    }
}
