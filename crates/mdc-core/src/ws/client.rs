//! Single WebSocket session with auto-reconnect and write replay.
//!
//! Each [`WsSession`] runs as a tokio task that:
//! 1. Connects to the exchange WebSocket endpoint (TLS).
//! 2. Publishes received text frames and control-frame notifications to an
//!    event channel.
//! 3. Drains the outbound queue — messages sent while the socket is down are
//!    kept and replayed FIFO after the next successful handshake.
//! 4. Automatically reconnects on disconnection with exponential backoff.
//!
//! A [`SessionHandle`] is the cheap, cloneable write side used by protocol
//! state machines; the session owner keeps the [`WsSession`] for restart and
//! shutdown control.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Events delivered to the session consumer.
#[derive(Debug)]
pub enum WsEvent {
    /// The handshake completed and queued writes were replayed.
    Connected,
    /// A text frame arrived.
    Text(String),
    /// A ping or pong control frame arrived (liveness signal).
    Control,
    /// A transport error; reconnection is handled by the session.
    Error(String),
    /// The connection dropped; the session will reconnect on its own.
    Disconnected,
}

/// Outbound frame kinds accepted by the write queue.
enum Outbound {
    Text(String),
    Ping,
}

/// Configuration for a single WebSocket session.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Full WebSocket URL (e.g. `wss://ws-feed.exchange.coinbase.com/`).
    pub url: String,
    /// Log label (e.g. `"coinbase"`).
    pub label: String,
}

/// Cheap cloneable write handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    label: Arc<str>,
    outbound_tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
}

impl SessionHandle {
    /// Enqueue a text frame.
    ///
    /// While the socket is down the frame stays queued and is written after
    /// the next successful handshake. A full queue drops the frame with a
    /// warning; the subscribe cycle re-sends on the next watchdog tick.
    pub fn send(&self, text: String) {
        if self.outbound_tx.try_send(Outbound::Text(text)).is_err() {
            warn!("[{}] outbound queue full, frame dropped", self.label);
        }
    }

    /// Enqueue a WebSocket ping frame.
    pub fn ping(&self) {
        let _ = self.outbound_tx.try_send(Outbound::Ping);
    }

    /// Whether the socket is currently connected.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// A WebSocket session managed by a background tokio task.
pub struct WsSession {
    handle: SessionHandle,
    restart_tx: watch::Sender<u64>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WsSession {
    /// Spawn the session task and return the session plus its event stream.
    pub fn connect(config: WsConfig) -> (Self, mpsc::Receiver<WsEvent>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (restart_tx, restart_rx) = watch::channel(0u64);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(64);
        let (events_tx, events_rx) = mpsc::channel::<WsEvent>(1024);
        let open = Arc::new(AtomicBool::new(false));

        let handle = SessionHandle {
            label: Arc::from(config.label.as_str()),
            outbound_tx,
            open: open.clone(),
        };

        let task = tokio::spawn(async move {
            session_loop(config, events_tx, outbound_rx, open, restart_rx, shutdown_rx).await;
        });

        let session = Self { handle, restart_tx, shutdown_tx, task: Some(task) };
        (session, events_rx)
    }

    /// Write handle for protocol state machines.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// See [`SessionHandle::is_open`].
    pub fn is_open(&self) -> bool {
        self.handle.is_open()
    }

    /// Drop the current connection and re-establish it. A restart requested
    /// while disconnected is moot — the next handshake already delivers a
    /// fresh connection — and is ignored.
    pub fn restart(&self) {
        self.restart_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Stop the session and wait for the task to finish. A graceful close
    /// frame is attempted if the socket is still open.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Deliver an event without ever blocking the IO loop: a full channel drops
/// the event with a warning. Returns `false` when the consumer is gone.
fn emit(events_tx: &mpsc::Sender<WsEvent>, label: &str, event: WsEvent) -> bool {
    match events_tx.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(event)) => {
            warn!("[{label}] event channel full, {event:?} dropped");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// Main session loop — connects, replays queued writes, reads, reconnects.
async fn session_loop(
    config: WsConfig,
    events_tx: mpsc::Sender<WsEvent>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    open: Arc<AtomicBool>,
    mut restart_rx: watch::Receiver<u64>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = Duration::from_millis(100);
    let max_backoff = Duration::from_secs(30);
    let label = config.label.as_str();

    loop {
        if *shutdown_rx.borrow() {
            info!("[{label}] shutdown requested");
            return;
        }

        info!("[{label}] connecting to {}", config.url);

        let ws_stream = match tokio_tungstenite::connect_async(config.url.as_str()).await {
            Ok((stream, _response)) => {
                backoff = Duration::from_millis(100); // reset backoff on success
                info!("[{label}] connected");
                stream
            }
            Err(e) => {
                warn!("[{label}] connection failed: {e}, retrying in {backoff:?}");
                if !emit(&events_tx, label, WsEvent::Error(format!("connect failed: {e}"))) {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown_rx.changed() => return,
                }
                backoff = (backoff * 2).min(max_backoff);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Restarts requested before this handshake are satisfied by it.
        let _ = restart_rx.borrow_and_update();

        open.store(true, Ordering::Release);
        if !emit(&events_tx, label, WsEvent::Connected) {
            return; // consumer gone
        }

        // Read/write loop for this connection.
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    info!("[{label}] shutdown signal received");
                    let _ = ws_write.close().await;
                    open.store(false, Ordering::Release);
                    return;
                }

                _ = restart_rx.changed() => {
                    info!("[{label}] restart requested, dropping connection");
                    let _ = ws_write.close().await;
                    break;
                }

                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !emit(&events_tx, label, WsEvent::Text(text.to_string())) {
                                return;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = ws_write.send(Message::Pong(data)).await;
                            if !emit(&events_tx, label, WsEvent::Control) {
                                return;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            if !emit(&events_tx, label, WsEvent::Control) {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("[{label}] received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            if !emit(&events_tx, label, WsEvent::Error(format!("read failed: {e}"))) {
                                return;
                            }
                            break;
                        }
                        None => {
                            warn!("[{label}] stream ended");
                            break;
                        }
                        _ => {} // Binary, Frame — ignore
                    }
                }

                Some(out) = outbound_rx.recv() => {
                    let frame = match out {
                        Outbound::Text(text) => {
                            debug!("[{label}] sending: {text}");
                            Message::Text(text.into())
                        }
                        Outbound::Ping => Message::Ping(vec![].into()),
                    };
                    if let Err(e) = ws_write.send(frame).await {
                        if !emit(&events_tx, label, WsEvent::Error(format!("send failed: {e}"))) {
                            return;
                        }
                        break;
                    }
                }
            }
        }

        // Disconnected — will reconnect at the top of the outer loop.
        open.store(false, Ordering::Release);
        if !emit(&events_tx, label, WsEvent::Disconnected) {
            return;
        }
        warn!("[{label}] disconnected, reconnecting in {backoff:?}");
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.changed() => return,
        }
        backoff = (backoff * 2).min(max_backoff);
    }
}
