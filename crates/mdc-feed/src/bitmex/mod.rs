//! BitMEX market data feed.
//!
//! Subscribes to `orderBook10` (top-10 book snapshots) and `trade` for one
//! instrument. The first message carrying an `info` key is the hello; acks
//! arrive as `{"success":true,"subscribe":"<channel>:<symbol>"}` and data
//! frames route by their `table` field, gated on acknowledged channels.

pub mod auth;
pub mod json_parser;

use std::collections::BTreeSet;

use anyhow::Context;
use mdc_core::types::Exchange;

use crate::json_util::str_field;
use crate::order_book::OrderBook;
use crate::ws_feed::{FeedAction, WsProtocol};
use crate::SharedHandlers;

/// BitMEX realtime WebSocket endpoint.
pub const BITMEX_WS_URL: &str = "wss://ws.bitmex.com/realtime";

/// Handshake target, also the path signed during authentication.
const WS_TARGET: &str = "/realtime";

/// Top-10 order book channel.
pub const BOOK_CHANNEL: &str = "orderBook10";
/// Public trades channel.
pub const TRADE_CHANNEL: &str = "trade";

/// API credentials for the optional `authKeyExpires` handshake.
#[derive(Debug, Clone)]
pub struct BitmexCredentials {
    pub key: String,
    pub secret: String,
}

/// Protocol state machine for one BitMEX instrument.
pub struct BitmexFeed {
    symbol: String,
    handlers: SharedHandlers,
    book: OrderBook,
    init: bool,
    requested: Vec<String>,
    active: BTreeSet<String>,
    /// Channels to unsubscribe on the next watchdog cycle.
    to_unsubscribe: BTreeSet<String>,
    credentials: Option<BitmexCredentials>,
}

impl BitmexFeed {
    pub fn new(
        symbol: String,
        handlers: SharedHandlers,
        credentials: Option<BitmexCredentials>,
    ) -> Self {
        Self {
            symbol,
            handlers,
            book: OrderBook::new(),
            init: false,
            requested: vec![BOOK_CHANNEL.to_string(), TRADE_CHANNEL.to_string()],
            active: BTreeSet::new(),
            to_unsubscribe: BTreeSet::new(),
            credentials,
        }
    }

    /// Stop resubscribing to `channel`; if it is currently active, an
    /// unsubscribe frame goes out on the next watchdog cycle.
    pub fn unsubscribe(&mut self, channel: &str) {
        self.requested.retain(|name| name != channel);
        if self.active.contains(channel) {
            self.to_unsubscribe.insert(channel.to_string());
        }
    }

    fn on_order_book(&mut self, object: &serde_json::Value) -> FeedAction {
        // orderBook10 is snapshot-only: partial/insert/delete actions carry
        // no usable top-10 state.
        if str_field(object, "action") != Some("update") {
            return FeedAction::Continue;
        }

        self.book.clear();
        if let Some(data) = object.get("data").and_then(|d| d.as_array()) {
            for record in data {
                if str_field(record, "symbol") == Some(self.symbol.as_str()) {
                    json_parser::apply_order_book10(&mut self.book, record);
                }
            }
        }

        if self.book.publish_if_consistent(Exchange::Bitmex, &self.symbol, &self.handlers) {
            FeedAction::Continue
        } else {
            FeedAction::Restart
        }
    }

    fn on_trades(&mut self, object: &serde_json::Value) {
        if str_field(object, "action") != Some("insert") {
            return;
        }
        let Some(data) = object.get("data").and_then(|d| d.as_array()) else { return };
        for record in data {
            if str_field(record, "symbol") != Some(self.symbol.as_str()) {
                continue;
            }
            if let Some(trade) = json_parser::parse_trade(record, &self.symbol) {
                (self.handlers.on_trade)(trade);
            }
        }
    }
}

impl WsProtocol for BitmexFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Bitmex
    }

    fn init_received(&self) -> bool {
        self.init
    }

    fn handle_message(&mut self, text: &str) -> anyhow::Result<FeedAction> {
        let object: serde_json::Value =
            serde_json::from_str(text).context("bitmex: invalid JSON frame")?;

        if !self.init {
            if object.get("info").is_some() {
                self.init = true;
            }
            return Ok(FeedAction::Continue);
        }

        if let Some(table) = str_field(&object, "table") {
            if !self.active.contains(table) {
                return Ok(FeedAction::Continue);
            }
            return Ok(match table {
                BOOK_CHANNEL => self.on_order_book(&object),
                TRADE_CHANNEL => {
                    self.on_trades(&object);
                    FeedAction::Continue
                }
                _ => FeedAction::Continue,
            });
        }

        if object.get("success").and_then(|s| s.as_bool()) == Some(true) {
            if let Some(subscription) = str_field(&object, "subscribe") {
                self.active.insert(json_parser::channel_of_subscription(subscription).to_string());
            } else if let Some(subscription) = str_field(&object, "unsubscribe") {
                let channel = json_parser::channel_of_subscription(subscription);
                self.active.remove(channel);
                self.to_unsubscribe.remove(channel);
            }
        } else if let Some(error) = str_field(&object, "error") {
            anyhow::bail!("bitmex: server error: {error}");
        }

        Ok(FeedAction::Continue)
    }

    fn authenticate(&mut self) -> Option<String> {
        let credentials = self.credentials.as_ref()?;
        let expires = auth::expires();
        let signature = auth::request_signature(&credentials.secret, "GET", WS_TARGET, expires);
        Some(json_parser::build_auth(&credentials.key, expires, &signature))
    }

    fn subscribe(&mut self) -> Vec<String> {
        let mut frames: Vec<String> = self
            .requested
            .iter()
            .filter(|channel| !self.active.contains(*channel))
            .map(|channel| json_parser::build_subscribe(channel, &self.symbol))
            .collect();

        for channel in std::mem::take(&mut self.to_unsubscribe) {
            if self.active.contains(&channel) {
                frames.push(json_parser::build_unsubscribe(&channel));
            }
        }

        frames
    }

    fn reset(&mut self) {
        self.init = false;
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::collecting_handlers;
    use mdc_core::types::TakerSide;

    const HELLO: &str = r#"{"info": "Welcome to the BitMEX Realtime API.", "version": "2.0"}"#;

    fn feed() -> (BitmexFeed, crate::test_util::Collected) {
        let (handlers, collected) = collecting_handlers();
        (BitmexFeed::new("XBTUSD".to_string(), handlers, None), collected)
    }

    fn ready_feed() -> (BitmexFeed, crate::test_util::Collected) {
        let (mut feed, collected) = feed();
        feed.handle_message(HELLO).unwrap();
        feed.handle_message(r#"{"success": true, "subscribe": "orderBook10:XBTUSD"}"#).unwrap();
        feed.handle_message(r#"{"success": true, "subscribe": "trade:XBTUSD"}"#).unwrap();
        (feed, collected)
    }

    #[test]
    fn any_info_message_sets_init() {
        let (mut feed, _) = feed();
        assert!(!feed.init_received());
        feed.handle_message(HELLO).unwrap();
        assert!(feed.init_received());
    }

    #[test]
    fn order_book_update_converts_notional_sizes() {
        let (mut feed, collected) = ready_feed();
        let frame = r#"{
            "table": "orderBook10",
            "action": "update",
            "data": [{"symbol": "XBTUSD", "asks": [[100, 500]], "bids": [[99, 495]]}]
        }"#;
        assert!(matches!(feed.handle_message(frame).unwrap(), FeedAction::Continue));

        let books = collected.books.lock().unwrap();
        let (_, _, bids, asks) = books.last().unwrap();
        assert_eq!(bids, &vec![(99.0, 5.0)]);
        assert_eq!(asks, &vec![(100.0, 5.0)]);
    }

    #[test]
    fn partial_action_and_foreign_symbols_are_ignored() {
        let (mut feed, collected) = ready_feed();

        let partial = r#"{
            "table": "orderBook10",
            "action": "partial",
            "data": [{"symbol": "XBTUSD", "asks": [[100, 500]], "bids": [[99, 495]]}]
        }"#;
        feed.handle_message(partial).unwrap();
        assert!(collected.books.lock().unwrap().is_empty());

        // A matching update whose data is all foreign leaves the book empty
        // and requests a restart.
        let foreign = r#"{
            "table": "orderBook10",
            "action": "update",
            "data": [{"symbol": "ETHUSD", "asks": [[100, 500]], "bids": [[99, 495]]}]
        }"#;
        assert!(matches!(feed.handle_message(foreign).unwrap(), FeedAction::Restart));
    }

    #[test]
    fn unacknowledged_tables_are_dropped() {
        let (mut feed, collected) = feed();
        feed.handle_message(HELLO).unwrap();

        let frame = r#"{
            "table": "orderBook10",
            "action": "update",
            "data": [{"symbol": "XBTUSD", "asks": [[100, 500]], "bids": [[99, 495]]}]
        }"#;
        feed.handle_message(frame).unwrap();
        assert!(collected.books.lock().unwrap().is_empty());
    }

    #[test]
    fn insert_action_emits_trades() {
        let (mut feed, collected) = ready_feed();
        let frame = r#"{
            "table": "trade",
            "action": "insert",
            "data": [
                {"symbol": "XBTUSD", "side": "Buy", "price": 100.5,
                 "homeNotional": 0.5, "timestamp": "2022-01-02T03:04:05.678Z"},
                {"symbol": "ETHUSD", "side": "Buy", "price": 10.0,
                 "homeNotional": 1.0, "timestamp": "2022-01-02T03:04:05.678Z"}
            ]
        }"#;
        feed.handle_message(frame).unwrap();

        let trades = collected.trades.lock().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "XBTUSD");
        assert_eq!(trades[0].side, TakerSide::Buy);
        assert_eq!(trades[0].timestamp_us, 1_641_092_645_678_000);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let (mut feed, _) = feed();
        feed.handle_message(HELLO).unwrap();

        let frames = feed.subscribe();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("orderBook10:XBTUSD"));

        feed.handle_message(r#"{"success": true, "subscribe": "orderBook10:XBTUSD"}"#).unwrap();
        let frames = feed.subscribe();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("trade:XBTUSD"));
    }

    #[test]
    fn unsubscribed_ack_drops_the_channel() {
        let (mut feed, collected) = ready_feed();

        feed.unsubscribe("trade");
        let frames = feed.subscribe();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("unsubscribe"));
        assert!(frames[0].contains("trade"));

        feed.handle_message(r#"{"success": true, "unsubscribe": "trade:XBTUSD"}"#).unwrap();
        assert!(feed.subscribe().is_empty());

        // Data frames for the dropped channel are no longer routed.
        let frame = r#"{
            "table": "trade",
            "action": "insert",
            "data": [{"symbol": "XBTUSD", "side": "Buy", "price": 100.5,
                      "homeNotional": 0.5, "timestamp": "2022-01-02T03:04:05.678Z"}]
        }"#;
        feed.handle_message(frame).unwrap();
        assert!(collected.trades.lock().unwrap().is_empty());
    }

    #[test]
    fn authenticate_only_with_credentials() {
        let (mut feed, _) = feed();
        assert!(feed.authenticate().is_none());

        let (handlers, _) = collecting_handlers();
        let mut authed = BitmexFeed::new(
            "XBTUSD".to_string(),
            handlers,
            Some(BitmexCredentials { key: "k".into(), secret: "s".into() }),
        );
        let frame = authed.authenticate().unwrap();
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["op"], "authKeyExpires");
        assert_eq!(v["args"][0], "k");
        assert!(v["args"][1].as_u64().unwrap() > 0);
        assert_eq!(v["args"][2].as_str().unwrap().len(), 64);
    }
}
