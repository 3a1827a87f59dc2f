//! Bitfinex JSON message parsing and frame building.
//!
//! Bitfinex data frames are arrays `[chanId, ...payload]`; book payloads use
//! the `[price, count, amount]` triplet encoding where the sign of `amount`
//! selects the side and `count == 0` encodes a delete.

use mdc_core::types::{Exchange, TakerSide, TradeEvent};

use crate::order_book::OrderBook;

/// Subscription parameters for the `book` channel: raw precision, realtime
/// frequency, and the smallest server-side length covering the depth.
pub fn book_params(symbol: &str, depth: u32) -> serde_json::Value {
    let len = if depth <= 25 { "25" } else { "100" };
    serde_json::json!({"symbol": symbol, "prec": "P0", "freq": "F0", "len": len})
}

/// Subscription parameters for the `trades` channel.
pub fn trades_params(symbol: &str) -> serde_json::Value {
    serde_json::json!({"symbol": symbol})
}

/// `{"event":"subscribe","channel":C, ...params}`
pub fn build_subscribe(channel: &str, params: &serde_json::Value) -> String {
    let mut object = serde_json::json!({"event": "subscribe", "channel": channel});
    if let (Some(target), Some(source)) = (object.as_object_mut(), params.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    object.to_string()
}

/// `{"event":"unsubscribe","chanId":N}`
pub fn build_unsubscribe(chan_id: u64) -> String {
    serde_json::json!({"event": "unsubscribe", "chanId": chan_id}).to_string()
}

/// Apply a `book` channel payload (the element following the chanId).
///
/// A single `[price, count, amount]` triplet is an incremental update; an
/// array of triplets is the initial snapshot and clears both sides first.
/// Non-array payloads (e.g. `"hb"` heartbeats) are ignored.
pub fn apply_book_payload(book: &mut OrderBook, payload: &serde_json::Value) {
    let Some(items) = payload.as_array() else { return };
    if items.is_empty() {
        return;
    }

    if let Some(triplet) = parse_triplet(payload) {
        apply_triplet(book, triplet);
    } else {
        book.clear();
        for item in items {
            if let Some(triplet) = parse_triplet(item) {
                apply_triplet(book, triplet);
            }
        }
    }
}

/// `[price, count, amount]` — all three must be JSON numbers.
fn parse_triplet(value: &serde_json::Value) -> Option<(f64, u64, f64)> {
    let items = value.as_array()?;
    if items.len() != 3 {
        return None;
    }
    let price = items[0].as_f64()?;
    let count = items[1].as_u64()?;
    let amount = items[2].as_f64()?;
    Some((price, count, amount))
}

fn apply_triplet(book: &mut OrderBook, (price, count, amount): (f64, u64, f64)) {
    if count > 0 {
        if amount > 0.0 {
            book.set_bid(price, amount);
        } else if amount < 0.0 {
            book.set_ask(price, -amount);
        }
    } else if amount == 1.0 {
        book.remove_bid(price);
    } else if amount == -1.0 {
        book.remove_ask(price);
    }
}

/// Parse a `"te"` (trade executed) payload `[id, ts_ms, amount, price]`.
///
/// The sign of `amount` is the taker direction; the magnitude is the volume.
pub fn parse_trade(content: &serde_json::Value, symbol: &str) -> Option<TradeEvent> {
    let items = content.as_array()?;
    if items.len() < 4 {
        return None;
    }

    let timestamp_us = items[1].as_u64()? * 1_000;
    let amount = items[2].as_f64()?;
    let price = items[3].as_f64()?;
    let side = if amount < 0.0 { TakerSide::Sell } else { TakerSide::Buy };

    Some(TradeEvent {
        exchange: Exchange::Bitfinex,
        symbol: symbol.to_string(),
        price,
        volume: amount.abs(),
        timestamp_us,
        side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_len_follows_depth() {
        assert_eq!(book_params("tBTCUSD", 10)["len"], "25");
        assert_eq!(book_params("tBTCUSD", 25)["len"], "25");
        assert_eq!(book_params("tBTCUSD", 26)["len"], "100");
    }

    #[test]
    fn subscribe_frame_merges_params() {
        let frame = build_subscribe("book", &book_params("tBTCUSD", 10));
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["channel"], "book");
        assert_eq!(v["symbol"], "tBTCUSD");
        assert_eq!(v["prec"], "P0");
        assert_eq!(v["freq"], "F0");
    }

    #[test]
    fn snapshot_clears_then_fills_both_sides() {
        let mut book = OrderBook::new();
        book.set_bid(1.0, 1.0);

        let payload = serde_json::json!([[100.0, 2, 1.5], [99.0, 1, 2.0], [101.0, 3, -0.5]]);
        apply_book_payload(&mut book, &payload);

        assert_eq!(book.bids(), &[(100.0, 1.5), (99.0, 2.0)]);
        assert_eq!(book.asks(), &[(101.0, 0.5)]);
    }

    #[test]
    fn count_zero_removes_by_side() {
        let mut book = OrderBook::new();
        book.set_bid(100.0, 1.0);
        book.set_ask(100.0, 2.0);

        // amount 1 deletes the bid at that price...
        apply_book_payload(&mut book, &serde_json::json!([100.0, 0, 1.0]));
        assert!(book.bids().is_empty());
        assert_eq!(book.asks(), &[(100.0, 2.0)]);

        // ...amount -1 deletes the ask.
        apply_book_payload(&mut book, &serde_json::json!([100.0, 0, -1.0]));
        assert!(book.asks().is_empty());
    }

    #[test]
    fn heartbeat_payload_is_ignored() {
        let mut book = OrderBook::new();
        book.set_bid(100.0, 1.0);
        apply_book_payload(&mut book, &serde_json::json!("hb"));
        assert_eq!(book.bids(), &[(100.0, 1.0)]);
    }

    #[test]
    fn trade_sign_selects_taker_side() {
        let content = serde_json::json!([42, 1_641_092_645_678u64, -0.5, 99.5]);
        let trade = parse_trade(&content, "tBTCUSD").unwrap();

        assert_eq!(trade.exchange, Exchange::Bitfinex);
        assert_eq!(trade.price, 99.5);
        assert_eq!(trade.volume, 0.5);
        assert_eq!(trade.timestamp_us, 1_641_092_645_678_000);
        assert_eq!(trade.side, TakerSide::Sell);

        let content = serde_json::json!([43, 1_641_092_645_678u64, 0.25, 99.6]);
        assert_eq!(parse_trade(&content, "tBTCUSD").unwrap().side, TakerSide::Buy);
    }

    #[test]
    fn short_trade_payload_is_rejected() {
        assert!(parse_trade(&serde_json::json!([42, 123]), "tBTCUSD").is_none());
    }
}
