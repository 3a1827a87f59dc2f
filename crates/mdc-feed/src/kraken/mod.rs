//! Kraken market data feed.
//!
//! Kraken is polled over REST instead of a WebSocket: two tasks (order book
//! and trades) request `Depth` and `Trades` every poll period and emulate
//! the same emission contract as the WebSocket feeds. There is no restart
//! channel — a poll that produces an inconsistent book is dropped and the
//! next poll replaces the book wholesale.

pub mod rest;

use std::time::Duration;

use mdc_core::types::{Exchange, TradeEvent};
use tokio::sync::watch;
use tracing::info;

use crate::order_book::OrderBook;
use crate::SharedHandlers;

use rest::{KrakenApi, KrakenTrade, TradesResponse};

/// Default period between REST polls.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Poll the order book until shutdown.
pub async fn run_book_poller(
    symbol: String,
    depth: u32,
    period: Duration,
    handlers: SharedHandlers,
    mut shutdown: watch::Receiver<bool>,
) {
    let api = KrakenApi::new();
    let mut book = OrderBook::new();
    info!("[kraken] book poller started for {symbol}");

    loop {
        match api.order_book(&symbol, depth).await {
            Ok(response) => {
                if !response.bids.is_empty() && !response.asks.is_empty() {
                    book.clear();
                    for level in &response.bids {
                        book.set_bid(level.price, level.volume);
                    }
                    for level in &response.asks {
                        book.set_ask(level.price, level.volume);
                    }
                    book.publish_if_consistent(Exchange::Kraken, &symbol, &handlers);
                }
            }
            Err(e) => (handlers.on_error)(Exchange::Kraken, &e),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("[kraken] book poller stopped");
}

/// Poll public trades until shutdown, deduplicating with the `last` cursor.
pub async fn run_trades_poller(
    symbol: String,
    period: Duration,
    handlers: SharedHandlers,
    mut shutdown: watch::Receiver<bool>,
) {
    let api = KrakenApi::new();
    let mut since: u64 = 0;
    info!("[kraken] trades poller started for {symbol}");

    loop {
        match api.trades(&symbol, since).await {
            Ok(response) => {
                let (next, emittable) = collect_emittable(since, &response);
                since = next;
                for record in emittable {
                    (handlers.on_trade)(trade_event(&symbol, record));
                }
            }
            Err(e) => (handlers.on_error)(Exchange::Kraken, &e),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("[kraken] trades poller stopped");
}

/// Advance the cursor and select the records to emit.
///
/// The bootstrap poll (`since == 0`) only latches the cursor — trades that
/// predate the collector are skipped. Later polls emit market trades only.
fn collect_emittable(since: u64, response: &TradesResponse) -> (u64, Vec<&KrakenTrade>) {
    if since == 0 {
        return (response.last, Vec::new());
    }
    (response.last, response.records.iter().filter(|r| r.is_market).collect())
}

fn trade_event(symbol: &str, record: &KrakenTrade) -> TradeEvent {
    TradeEvent {
        exchange: Exchange::Kraken,
        symbol: symbol.to_string(),
        price: record.price,
        volume: record.volume,
        timestamp_us: record.timestamp_us,
        side: record.side,
    }
}
