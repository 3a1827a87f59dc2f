//! # mdc-feed
//!
//! Market data feeds for the collector.
//!
//! ## Architecture
//!
//! Each WebSocket exchange implements the [`ws_feed::WsProtocol`] trait — a
//! protocol state machine translating the exchange's message grammar into
//! order-book updates and trades. The shared [`ws_feed::run_ws_feed`] loop
//! drives one session per exchange: it routes frames into the protocol,
//! watches liveness, re-subscribes after reconnects, and coalesces restart
//! requests. Kraken has no public WebSocket book in this system and is
//! emulated by REST pollers with the same emission contract.
//!
//! [`provider::MarketDataProvider`] owns all feeds for one symbol, fans the
//! callbacks in, and hands records to the CSV dump pipeline.
//!
//! ## Shared infrastructure
//!
//! - [`order_book`] — sorted two-sided book with the consistency gate
//! - [`ws_feed`] — protocol trait + watchdog loop
//! - [`dump_worker`] — CSV writer loops over bounded queues
//! - [`json_util`] — JSON parsing helpers

pub mod bitfinex;
pub mod bitmex;
pub mod coinbase;
pub mod dump_worker;
pub mod json_util;
pub mod kraken;
pub mod order_book;
pub mod provider;
pub mod ws_feed;

use std::sync::Arc;

use mdc_core::types::{Exchange, TradeEvent};

use crate::order_book::OrderBook;

/// Fan-in callbacks shared by every feed of one provider.
///
/// Handlers are invoked on the feed task that produced the event; they must
/// not block. Books are passed by reference and copied by the consumer if it
/// needs to retain them.
pub struct FeedHandlers {
    /// Called with every *consistent* order book after an update.
    pub on_book: Box<dyn Fn(Exchange, &str, &OrderBook) + Send + Sync>,
    /// Called with every normalized trade.
    pub on_trade: Box<dyn Fn(TradeEvent) + Send + Sync>,
    /// Called with transport, protocol, and exchange errors.
    pub on_error: Box<dyn Fn(Exchange, &anyhow::Error) + Send + Sync>,
}

/// Shared handle to the fan-in callbacks.
pub type SharedHandlers = Arc<FeedHandlers>;
