//! Coinbase market data feed.
//!
//! Subscribes to `level2_batch` (book snapshots + deltas) and `matches`
//! (public trades) for one product. Coinbase sends no hello message, so the
//! feed is ready to subscribe as soon as the socket is up; the server
//! acknowledges with a `subscriptions` message listing the active channels.

pub mod json_parser;

use std::collections::BTreeSet;

use anyhow::Context;
use mdc_core::types::Exchange;

use crate::json_util::str_field;
use crate::order_book::OrderBook;
use crate::ws_feed::{FeedAction, WsProtocol};
use crate::SharedHandlers;

/// Coinbase WebSocket endpoint.
pub const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com/";

/// Level-2 batched book channel.
pub const BOOK_CHANNEL: &str = "level2_batch";
/// Public trades channel.
pub const MATCHES_CHANNEL: &str = "matches";

/// Protocol state machine for one Coinbase product.
pub struct CoinbaseFeed {
    symbol: String,
    handlers: SharedHandlers,
    book: OrderBook,
    /// `(channel, product_id)` pairs we want subscribed.
    requested: Vec<(String, String)>,
    /// `(channel, product_id)` pairs acknowledged by the server.
    active: BTreeSet<(String, String)>,
}

impl CoinbaseFeed {
    pub fn new(symbol: String, handlers: SharedHandlers) -> Self {
        let requested = vec![
            (BOOK_CHANNEL.to_string(), symbol.clone()),
            (MATCHES_CHANNEL.to_string(), symbol.clone()),
        ];
        Self { symbol, handlers, book: OrderBook::new(), requested, active: BTreeSet::new() }
    }

    /// `type=subscriptions` ack: remember every `(channel, product)` pair.
    fn register_subscriptions(&mut self, object: &serde_json::Value) {
        let Some(channels) = object.get("channels").and_then(|c| c.as_array()) else {
            return;
        };
        for channel in channels {
            let Some(name) = str_field(channel, "name") else { continue };
            let Some(products) = channel.get("product_ids").and_then(|p| p.as_array()) else {
                continue;
            };
            for product in products.iter().filter_map(|p| p.as_str()) {
                if !product.is_empty() {
                    self.active.insert((name.to_string(), product.to_string()));
                }
            }
        }
    }

    fn on_level2(&mut self, msg_type: &str, object: &serde_json::Value) -> FeedAction {
        if str_field(object, "product_id") != Some(self.symbol.as_str()) {
            return FeedAction::Restart;
        }

        match msg_type {
            "snapshot" => json_parser::apply_snapshot(&mut self.book, object),
            "l2update" => json_parser::apply_l2_update(&mut self.book, object),
            _ => {}
        }

        if self.book.publish_if_consistent(Exchange::Coinbase, &self.symbol, &self.handlers) {
            FeedAction::Continue
        } else {
            FeedAction::Restart
        }
    }

    fn on_match(&mut self, object: &serde_json::Value) -> anyhow::Result<FeedAction> {
        if str_field(object, "product_id") != Some(self.symbol.as_str()) {
            return Ok(FeedAction::Restart);
        }

        let trade = json_parser::parse_match(object)?;
        (self.handlers.on_trade)(trade);
        Ok(FeedAction::Continue)
    }
}

impl WsProtocol for CoinbaseFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    /// Coinbase sends no hello; the feed is always ready.
    fn init_received(&self) -> bool {
        true
    }

    fn handle_message(&mut self, text: &str) -> anyhow::Result<FeedAction> {
        let object: serde_json::Value =
            serde_json::from_str(text).context("coinbase: invalid JSON frame")?;

        let Some(msg_type) = str_field(&object, "type") else {
            return Ok(FeedAction::Continue);
        };

        match msg_type {
            "subscriptions" => {
                self.register_subscriptions(&object);
                Ok(FeedAction::Continue)
            }
            "snapshot" | "l2update" => Ok(self.on_level2(msg_type, &object)),
            "match" => self.on_match(&object),
            "error" => {
                let message = str_field(&object, "message").unwrap_or("unknown error");
                anyhow::bail!("coinbase: server error: {message}");
            }
            _ => Ok(FeedAction::Continue), // heartbeats, last_match, ...
        }
    }

    fn subscribe(&mut self) -> Vec<String> {
        let pending: Vec<_> =
            self.requested.iter().filter(|key| !self.active.contains(*key)).cloned().collect();
        json_parser::build_subscribe(&pending).into_iter().collect()
    }

    fn reset(&mut self) {
        self.active.clear();
    }
}
