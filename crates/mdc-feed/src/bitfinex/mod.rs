//! Bitfinex market data feed.
//!
//! Speaks version 2 of the public WebSocket API. The server's `info` hello
//! carries the API version and gates all subscriptions; `subscribed` acks
//! assign a numeric `chanId` that later data frames are routed by.

pub mod json_parser;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::Context;
use mdc_core::types::Exchange;

use crate::json_util::str_field;
use crate::order_book::OrderBook;
use crate::ws_feed::{FeedAction, WsProtocol};
use crate::SharedHandlers;

/// Bitfinex public WebSocket endpoint (API version 2).
pub const BITFINEX_WS_URL: &str = "wss://api-pub.bitfinex.com/ws/2";

/// The only API version this feed understands.
const REQUIRED_API_VERSION: u64 = 2;

/// Order book channel.
pub const BOOK_CHANNEL: &str = "book";
/// Public trades channel.
pub const TRADES_CHANNEL: &str = "trades";

/// Protocol state machine for one Bitfinex symbol.
pub struct BitfinexFeed {
    symbol: String,
    handlers: SharedHandlers,
    book: OrderBook,
    init: bool,
    /// Channel name to subscription parameters.
    requested: BTreeMap<String, serde_json::Value>,
    /// Server-assigned id to channel name.
    chan_names: HashMap<u64, String>,
    /// Channel name to server-assigned id.
    active: HashMap<String, u64>,
    /// Channels to unsubscribe on the next watchdog cycle.
    to_unsubscribe: BTreeSet<String>,
}

impl BitfinexFeed {
    pub fn new(symbol: String, depth: u32, handlers: SharedHandlers) -> Self {
        let mut requested = BTreeMap::new();
        requested.insert(BOOK_CHANNEL.to_string(), json_parser::book_params(&symbol, depth));
        requested.insert(TRADES_CHANNEL.to_string(), json_parser::trades_params(&symbol));

        Self {
            symbol,
            handlers,
            book: OrderBook::new(),
            init: false,
            requested,
            chan_names: HashMap::new(),
            active: HashMap::new(),
            to_unsubscribe: BTreeSet::new(),
        }
    }

    /// Stop resubscribing to `channel`; if it is currently active, an
    /// unsubscribe frame goes out on the next watchdog cycle.
    pub fn unsubscribe(&mut self, channel: &str) {
        self.requested.remove(channel);
        if self.active.contains_key(channel) {
            self.to_unsubscribe.insert(channel.to_string());
        }
    }

    fn on_hello(&mut self, object: &serde_json::Value) -> FeedAction {
        if str_field(object, "event") != Some("info") {
            return FeedAction::Continue;
        }
        match object.get("version").and_then(|v| v.as_u64()) {
            Some(REQUIRED_API_VERSION) => {
                self.init = true;
                FeedAction::Continue
            }
            version => FeedAction::Fatal(format!(
                "bitfinex: unexpected websocket api version {version:?}, expected {REQUIRED_API_VERSION}"
            )),
        }
    }

    fn register_subscription(&mut self, object: &serde_json::Value) {
        let Some(channel) = str_field(object, "channel") else { return };
        let Some(chan_id) = object.get("chanId").and_then(|v| v.as_u64()) else { return };
        if channel.is_empty() || chan_id == 0 {
            return;
        }
        self.chan_names.insert(chan_id, channel.to_string());
        self.active.insert(channel.to_string(), chan_id);
    }

    fn unregister_subscription(&mut self, object: &serde_json::Value) {
        if str_field(object, "status") != Some("OK") {
            return;
        }
        let Some(chan_id) = object.get("chanId").and_then(|v| v.as_u64()) else { return };
        if let Some(channel) = self.chan_names.remove(&chan_id) {
            self.active.remove(&channel);
            self.to_unsubscribe.remove(&channel);
        }
    }

    /// Route a data frame `[chanId, ...payload]` by its channel id.
    fn on_data_frame(&mut self, items: &[serde_json::Value]) -> anyhow::Result<FeedAction> {
        let chan_id = items[0].as_u64().context("bitfinex: non-numeric channel id")?;
        let Some(channel) = self.chan_names.get(&chan_id) else {
            // Frames for ids we never registered mean our registry and the
            // server disagree; start the session over.
            return Ok(FeedAction::Restart);
        };

        match channel.as_str() {
            BOOK_CHANNEL => {
                json_parser::apply_book_payload(&mut self.book, &items[1]);
                if self.book.publish_if_consistent(Exchange::Bitfinex, &self.symbol, &self.handlers)
                {
                    Ok(FeedAction::Continue)
                } else {
                    Ok(FeedAction::Restart)
                }
            }
            TRADES_CHANNEL => {
                // Only "te" (trade executed) emits; "tu", "hb" and trade
                // snapshots are ignored.
                if items[1].as_str() == Some("te") {
                    if let Some(content) = items.get(2) {
                        if let Some(trade) = json_parser::parse_trade(content, &self.symbol) {
                            (self.handlers.on_trade)(trade);
                        }
                    }
                }
                Ok(FeedAction::Continue)
            }
            _ => Ok(FeedAction::Continue),
        }
    }
}

impl WsProtocol for BitfinexFeed {
    fn exchange(&self) -> Exchange {
        Exchange::Bitfinex
    }

    fn init_received(&self) -> bool {
        self.init
    }

    fn handle_message(&mut self, text: &str) -> anyhow::Result<FeedAction> {
        let object: serde_json::Value =
            serde_json::from_str(text).context("bitfinex: invalid JSON frame")?;

        if !self.init {
            return Ok(self.on_hello(&object));
        }

        if let Some(items) = object.as_array() {
            if items.len() < 2 {
                return Ok(FeedAction::Continue);
            }
            return self.on_data_frame(items);
        }

        match str_field(&object, "event") {
            Some("subscribed") => self.register_subscription(&object),
            Some("unsubscribed") => self.unregister_subscription(&object),
            Some("error") => {
                let message = str_field(&object, "msg").unwrap_or("unknown error");
                anyhow::bail!("bitfinex: server error: {message}");
            }
            _ => {}
        }
        Ok(FeedAction::Continue)
    }

    fn subscribe(&mut self) -> Vec<String> {
        let mut frames: Vec<String> = self
            .requested
            .iter()
            .filter(|(name, _)| !self.active.contains_key(*name))
            .map(|(name, params)| json_parser::build_subscribe(name, params))
            .collect();

        for channel in std::mem::take(&mut self.to_unsubscribe) {
            if let Some(chan_id) = self.active.get(&channel) {
                frames.push(json_parser::build_unsubscribe(*chan_id));
            }
        }

        frames
    }

    fn reset(&mut self) {
        self.init = false;
        self.chan_names.clear();
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::collecting_handlers;
    use mdc_core::types::TakerSide;

    const HELLO: &str = r#"{"event": "info", "version": 2, "platform": {"status": 1}}"#;
    const BOOK_ACK: &str =
        r#"{"event": "subscribed", "channel": "book", "chanId": 17, "symbol": "tBTCUSD"}"#;
    const TRADES_ACK: &str =
        r#"{"event": "subscribed", "channel": "trades", "chanId": 18, "symbol": "tBTCUSD"}"#;

    fn feed() -> (BitfinexFeed, crate::test_util::Collected) {
        let (handlers, collected) = collecting_handlers();
        (BitfinexFeed::new("tBTCUSD".to_string(), 10, handlers), collected)
    }

    fn ready_feed() -> (BitfinexFeed, crate::test_util::Collected) {
        let (mut feed, collected) = feed();
        feed.handle_message(HELLO).unwrap();
        feed.handle_message(BOOK_ACK).unwrap();
        feed.handle_message(TRADES_ACK).unwrap();
        (feed, collected)
    }

    #[test]
    fn hello_with_expected_version_enables_init() {
        let (mut feed, _) = feed();
        assert!(!feed.init_received());
        feed.handle_message(HELLO).unwrap();
        assert!(feed.init_received());
    }

    #[test]
    fn hello_with_wrong_version_is_fatal() {
        let (mut feed, _) = feed();
        let action = feed.handle_message(r#"{"event": "info", "version": 3}"#).unwrap();
        assert!(matches!(action, FeedAction::Fatal(_)));
    }

    #[test]
    fn data_frames_are_gated_on_init() {
        let (mut feed, collected) = feed();
        let action = feed.handle_message("[17, [100.0, 1, 1.0]]").unwrap();
        assert!(matches!(action, FeedAction::Continue));
        assert!(collected.books.lock().unwrap().is_empty());
    }

    #[test]
    fn snapshot_then_delete_via_chan_id_routing() {
        let (mut feed, collected) = ready_feed();

        let snapshot = "[17, [[100.0, 1, 1.0], [99.0, 2, 2.0], [101.0, 1, -3.0]]]";
        assert!(matches!(feed.handle_message(snapshot).unwrap(), FeedAction::Continue));

        // Delete the bid at 99; the ask at 101 stays.
        assert!(matches!(
            feed.handle_message("[17, [99.0, 0, 1]]").unwrap(),
            FeedAction::Continue
        ));

        let books = collected.books.lock().unwrap();
        let (_, _, bids, asks) = books.last().unwrap();
        assert_eq!(bids, &vec![(100.0, 1.0)]);
        assert_eq!(asks, &vec![(101.0, 3.0)]);
    }

    #[test]
    fn unknown_chan_id_requests_restart() {
        let (mut feed, _) = ready_feed();
        assert!(matches!(
            feed.handle_message("[99, [100.0, 1, 1.0]]").unwrap(),
            FeedAction::Restart
        ));
    }

    #[test]
    fn te_message_emits_trade() {
        let (mut feed, collected) = ready_feed();
        feed.handle_message(r#"[18, "te", [42, 1641092645678, -0.5, 99.5]]"#).unwrap();

        let trades = collected.trades.lock().unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].price, 99.5);
        assert_eq!(trades[0].volume, 0.5);
        assert_eq!(trades[0].timestamp_us, 1_641_092_645_678_000);
        assert_eq!(trades[0].side, TakerSide::Sell);
    }

    #[test]
    fn tu_and_heartbeat_messages_are_ignored() {
        let (mut feed, collected) = ready_feed();
        feed.handle_message(r#"[18, "tu", [42, 1641092645678, -0.5, 99.5]]"#).unwrap();
        feed.handle_message(r#"[18, "hb"]"#).unwrap();
        assert!(collected.trades.lock().unwrap().is_empty());
    }

    #[test]
    fn subscribe_is_idempotent_and_reset_resubscribes() {
        let (mut feed, _) = feed();
        feed.handle_message(HELLO).unwrap();

        assert_eq!(feed.subscribe().len(), 2);

        feed.handle_message(BOOK_ACK).unwrap();
        let frames = feed.subscribe();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("trades"));

        feed.handle_message(TRADES_ACK).unwrap();
        assert!(feed.subscribe().is_empty());

        feed.reset();
        assert!(!feed.init_received());
        assert_eq!(feed.subscribe().len(), 2);
    }

    #[test]
    fn unsubscribed_ack_drops_registry_entries() {
        let (mut feed, _) = ready_feed();

        feed.unsubscribe("trades");
        let frames = feed.subscribe();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("unsubscribe"));
        assert!(frames[0].contains("18"));

        feed.handle_message(r#"{"event": "unsubscribed", "status": "OK", "chanId": 18}"#).unwrap();
        assert!(feed.subscribe().is_empty());

        // Frames for the dropped channel are now unroutable.
        assert!(matches!(
            feed.handle_message(r#"[18, "te", [1, 1, 1.0, 1.0]]"#).unwrap(),
            FeedAction::Restart
        ));
    }
}
