//! Shared WebSocket feed runner.
//!
//! Exchange subscribers implement [`WsProtocol`] — a state machine that
//! translates one exchange's message grammar into book updates and trades,
//! and produces the outbound frames (subscribe, authenticate) the exchange
//! expects. [`run_ws_feed`] drives one protocol over one session: it routes
//! incoming frames, keeps a liveness watchdog, re-subscribes after
//! reconnects, and coalesces restart requests.

use std::time::{Duration, Instant};

use mdc_core::error::MdcError;
use mdc_core::types::Exchange;
use mdc_core::ws::{WsEvent, WsSession};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::SharedHandlers;

/// Watchdog wake-up period.
pub const WATCH_PERIOD: Duration = Duration::from_secs(3);

/// Consecutive restarts that proceed without delay; further attempts wait
/// one watch period first.
pub const MAX_RESTART_ATTEMPTS_NO_DELAY: u32 = 3;

/// Outcome of handling one inbound frame.
#[derive(Debug)]
pub enum FeedAction {
    /// Keep going.
    Continue,
    /// The protocol state is unusable (inconsistent book, wrong product);
    /// drop the connection and start over.
    Restart,
    /// The feed cannot make progress at all (e.g. unsupported API version).
    Fatal(String),
}

/// Protocol state machine for one exchange WebSocket feed.
pub trait WsProtocol: Send {
    /// Exchange this protocol speaks for.
    fn exchange(&self) -> Exchange;

    /// Whether the server hello (where the exchange has one) has arrived and
    /// subscriptions may be sent.
    fn init_received(&self) -> bool;

    /// Consume one inbound text frame.
    ///
    /// `Err` signals a protocol-level parse failure: it is reported through
    /// the error handler and, if the session has dropped meanwhile, a
    /// restart is requested.
    fn handle_message(&mut self, text: &str) -> anyhow::Result<FeedAction>;

    /// Authentication frame to send once per connection, if any.
    fn authenticate(&mut self) -> Option<String> {
        None
    }

    /// Subscription frames for requested channels not yet acknowledged.
    /// Must be idempotent: returns nothing once every channel is active.
    fn subscribe(&mut self) -> Vec<String>;

    /// Forget init/acknowledgement state so the next cycle re-subscribes.
    fn reset(&mut self);
}

/// Drive one exchange feed until shutdown (or a fatal protocol error).
pub async fn run_ws_feed<P: WsProtocol>(
    mut session: WsSession,
    mut events: mpsc::Receiver<WsEvent>,
    mut protocol: P,
    handlers: SharedHandlers,
    mut shutdown: watch::Receiver<bool>,
) {
    let exchange = protocol.exchange();
    let handle = session.handle();
    let mut tick = tokio::time::interval(WATCH_PERIOD);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut last_message = Instant::now();
    let mut authenticated = false;
    let mut restart_requested = false;
    let mut restart_attempt: u32 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            event = events.recv() => match event {
                Some(WsEvent::Text(text)) => {
                    last_message = Instant::now();
                    match protocol.handle_message(&text) {
                        Ok(FeedAction::Continue) => {}
                        Ok(FeedAction::Restart) => {
                            restart_requested = true;
                            tick.reset_immediately(); // wake the watchdog now
                        }
                        Ok(FeedAction::Fatal(reason)) => {
                            (handlers.on_error)(exchange, &anyhow::anyhow!(reason));
                            break;
                        }
                        Err(e) => {
                            (handlers.on_error)(exchange, &e);
                            if !handle.is_open() {
                                restart_requested = true;
                                tick.reset_immediately();
                            }
                        }
                    }
                }
                Some(WsEvent::Connected) | Some(WsEvent::Control) => {
                    last_message = Instant::now();
                }
                Some(WsEvent::Error(message)) => {
                    let err = anyhow::Error::from(MdcError::WebSocket(message));
                    (handlers.on_error)(exchange, &err);
                }
                Some(WsEvent::Disconnected) => {
                    // The session reconnects on its own; acknowledged channels
                    // are gone with the old socket, so re-subscribe from scratch.
                    debug!("[{exchange}] session dropped, clearing channel state");
                    protocol.reset();
                    authenticated = false;
                }
                None => break, // session task ended
            },

            _ = tick.tick() => {
                if restart_requested {
                    restart_requested = false;
                    if restart_attempt >= MAX_RESTART_ATTEMPTS_NO_DELAY {
                        tokio::select! {
                            _ = tokio::time::sleep(WATCH_PERIOD) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                    restart_attempt += 1;
                    info!("[{exchange}] restarting session (attempt {restart_attempt})");
                    session.restart();
                    protocol.reset();
                    authenticated = false;
                    last_message = Instant::now();
                    continue;
                }

                if handle.is_open() && protocol.init_received() {
                    if !authenticated {
                        if let Some(frame) = protocol.authenticate() {
                            handle.send(frame);
                        }
                        authenticated = true;
                        restart_attempt = 0;
                    }
                    for frame in protocol.subscribe() {
                        handle.send(frame);
                    }
                    handle.ping();
                }

                if last_message.elapsed() > 2 * WATCH_PERIOD {
                    warn!("[{exchange}] no messages for {:?}, requesting restart", last_message.elapsed());
                    restart_requested = true;
                    tick.reset_immediately();
                }
            }
        }
    }

    session.stop().await;
    info!("[{exchange}] feed stopped");
}
