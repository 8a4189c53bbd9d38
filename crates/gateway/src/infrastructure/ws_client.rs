use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::domain::{WsEvent, WsTransport};
use crate::error::TransportError;

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Not connected")]
    NotConnected,
}

impl From<WsError> for TransportError {
    fn from(err: WsError) -> Self {
        match err {
            WsError::Connection(e) => TransportError::Connection(e.to_string()),
            WsError::ChannelClosed => TransportError::ChannelClosed,
            WsError::NotConnected => TransportError::NotConnected,
        }
    }
}

/// When and how often to reconnect
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delay: Duration,
    /// Consecutive failed connects before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Ping interval on an idle connection
    pub heartbeat: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            delay: Duration::from_secs(5),
            max_attempts: Some(10),
            heartbeat: Duration::from_secs(30),
        }
    }
}

enum Outbound {
    Text(String),
    Close,
}

enum PumpExit {
    /// Closed on request; do not reconnect
    Closed,
    /// Lost the connection
    Dropped,
}

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnecting WebSocket client for one exchange endpoint
/// Infrastructure component - handles WebSocket communication
pub struct WsClient {
    url: String,
    policy: ReconnectPolicy,
}

impl WsClient {
    pub fn new(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        WsClient {
            url: url.into(),
            policy,
        }
    }

    /// Start the connection task.
    ///
    /// Returns the send handle and the event stream. Every (re)connect is
    /// announced with [`WsEvent::Connected`] and every loss with
    /// [`WsEvent::Disconnected`].
    pub fn spawn(self) -> (WsHandle, mpsc::Receiver<WsEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(1024);
        let open = Arc::new(AtomicBool::new(false));

        let task_open = Arc::clone(&open);
        tokio::spawn(async move {
            run_connection(self.url, self.policy, outbound_rx, event_tx, task_open).await;
        });

        (
            WsHandle {
                outbound: outbound_tx,
                open,
            },
            event_rx,
        )
    }
}

async fn run_connection(
    url: String,
    policy: ReconnectPolicy,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<WsEvent>,
    open: Arc<AtomicBool>,
) {
    let mut failures = 0u32;

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _)) => {
                failures = 0;
                // Frames queued while down are stale; subscriptions are replayed on Connected
                while let Ok(frame) = outbound.try_recv() {
                    if matches!(frame, Outbound::Close) {
                        return;
                    }
                }
                open.store(true, Ordering::SeqCst);
                tracing::info!(url = %url, "WebSocket connected");
                if events.send(WsEvent::Connected).await.is_err() {
                    return;
                }

                let exit = pump(socket, &mut outbound, &events, policy.heartbeat).await;
                open.store(false, Ordering::SeqCst);
                tracing::info!(url = %url, "WebSocket disconnected");
                let _ = events.send(WsEvent::Disconnected).await;
                if matches!(exit, PumpExit::Closed) {
                    return;
                }
            }
            Err(e) => {
                failures += 1;
                tracing::error!(url = %url, error = %e, attempt = failures, "WebSocket connect failed");
                if events.send(WsEvent::Error(e.to_string())).await.is_err() {
                    return;
                }
                if policy.max_attempts.is_some_and(|max| failures >= max) {
                    tracing::error!(url = %url, "Giving up on WebSocket after {} attempts", failures);
                    return;
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.delay) => {}
            _ = wait_for_close(&mut outbound) => return,
        }
    }
}

/// Resolves once a close is requested or every handle is gone.
/// Text frames are dropped while disconnected.
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(Outbound::Text(_)) = outbound.recv().await {}
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::Sender<WsEvent>,
    heartbeat: Duration,
) -> PumpExit {
    let (mut write, mut read) = socket.split();
    let mut ping = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if events.send(WsEvent::Message(text.to_string())).await.is_err() {
                        return PumpExit::Closed;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    tracing::trace!("Received ping: {:?}", data);
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("Close frame received: {:?}", frame);
                    return PumpExit::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!(error = %e, "WebSocket read failed");
                    let _ = events.send(WsEvent::Error(e.to_string())).await;
                    return PumpExit::Dropped;
                }
                None => return PumpExit::Dropped,
            },
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::error!(error = %e, "WebSocket write failed");
                        let _ = events.send(WsEvent::Error(e.to_string())).await;
                        return PumpExit::Dropped;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Closed;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                    tracing::warn!(error = %e, "Heartbeat failed");
                    return PumpExit::Dropped;
                }
            }
        }
    }
}

/// Handle for writing frames to the connection task
#[derive(Clone)]
pub struct WsHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
}

impl WsHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the connection and stop reconnecting
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

impl WsTransport for WsHandle {
    fn send(&self, text: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(WsError::NotConnected.into());
        }
        self.outbound
            .send(Outbound::Text(text))
            .map_err(|_| WsError::ChannelClosed.into())
    }
}
