//! BitMEX JSON message parsing and frame building.

use mdc_core::time_util;
use mdc_core::types::{Exchange, TakerSide, TradeEvent};

use crate::json_util::{parse_f64_field, str_field};
use crate::order_book::OrderBook;

/// `{"op":"subscribe","args":["<channel>:<symbol>"]}`
pub fn build_subscribe(channel: &str, symbol: &str) -> String {
    serde_json::json!({"op": "subscribe", "args": [format!("{channel}:{symbol}")]}).to_string()
}

/// `{"op":"unsubscribe","args":["<channel>"]}` — the bare channel name
/// drops every instrument subscribed on it.
pub fn build_unsubscribe(channel: &str) -> String {
    serde_json::json!({"op": "unsubscribe", "args": [channel]}).to_string()
}

/// `{"op":"authKeyExpires","args":[key, expires, signature]}`
pub fn build_auth(key: &str, expires: u64, signature: &str) -> String {
    serde_json::json!({"op": "authKeyExpires", "args": [key, expires, signature]}).to_string()
}

/// The channel-name prefix of a `"<channel>:<symbol>"` subscription ack.
pub fn channel_of_subscription(subscription: &str) -> &str {
    subscription.split(':').next().unwrap_or(subscription)
}

/// Rebuild the book from one `orderBook10` record.
///
/// `orderBook10` sizes are notional (quote currency) for inverse contracts,
/// so the base volume is `size / price`.
pub fn apply_order_book10(book: &mut OrderBook, record: &serde_json::Value) {
    apply_book_side(record.get("bids"), |price, volume| book.set_bid(price, volume));
    apply_book_side(record.get("asks"), |price, volume| book.set_ask(price, volume));
}

fn apply_book_side(levels: Option<&serde_json::Value>, mut apply: impl FnMut(f64, f64)) {
    let Some(levels) = levels.and_then(|l| l.as_array()) else { return };
    for level in levels {
        let Some(entry) = level.as_array() else { continue };
        if entry.len() != 2 {
            continue;
        }
        let (Some(price), Some(size)) = (entry[0].as_f64(), entry[1].as_f64()) else {
            continue;
        };
        if price != 0.0 {
            apply(price, size / price);
        }
    }
}

/// Parse one `trade` record from an `action=insert` frame.
///
/// `side` is the taker direction, decoded from the first character;
/// `homeNotional` is the base-currency volume. Records with missing or
/// non-positive fields are skipped.
pub fn parse_trade(record: &serde_json::Value, symbol: &str) -> Option<TradeEvent> {
    let side = match str_field(record, "side")?.chars().next()? {
        'B' | 'b' => TakerSide::Buy,
        'S' | 's' => TakerSide::Sell,
        _ => return None,
    };

    let volume = parse_f64_field(record, "homeNotional")?;
    let price = parse_f64_field(record, "price")?;
    if volume <= 0.0 || price <= 0.0 {
        return None;
    }

    let timestamp_us = time_util::parse_iso_ms(str_field(record, "timestamp")?).ok()?;

    Some(TradeEvent {
        exchange: Exchange::Bitmex,
        symbol: symbol.to_string(),
        price,
        volume,
        timestamp_us,
        side,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_ack_prefix() {
        assert_eq!(channel_of_subscription("orderBook10:XBTUSD"), "orderBook10");
        assert_eq!(channel_of_subscription("trade"), "trade");
    }

    #[test]
    fn unsubscribe_frame_names_the_bare_channel() {
        let v: serde_json::Value = serde_json::from_str(&build_unsubscribe("trade")).unwrap();
        assert_eq!(v["op"], "unsubscribe");
        assert_eq!(v["args"], serde_json::json!(["trade"]));
    }

    #[test]
    fn book_volume_is_notional_over_price() {
        let mut book = OrderBook::new();
        let record: serde_json::Value =
            serde_json::from_str(r#"{"symbol": "XBTUSD", "asks": [[100, 500]], "bids": [[99, 495]]}"#)
                .unwrap();
        apply_order_book10(&mut book, &record);

        assert_eq!(book.bids(), &[(99.0, 5.0)]);
        assert_eq!(book.asks(), &[(100.0, 5.0)]);
    }

    #[test]
    fn zero_price_levels_are_skipped() {
        let mut book = OrderBook::new();
        let record: serde_json::Value =
            serde_json::from_str(r#"{"bids": [[0, 500], [99, 99]], "asks": []}"#).unwrap();
        apply_order_book10(&mut book, &record);
        assert_eq!(book.bids(), &[(99.0, 1.0)]);
    }

    #[test]
    fn trade_record_parses_side_and_millisecond_timestamp() {
        let record: serde_json::Value = serde_json::from_str(
            r#"{
                "symbol": "XBTUSD",
                "side": "Sell",
                "size": 100,
                "price": 100.5,
                "homeNotional": 0.995,
                "timestamp": "2022-01-02T03:04:05.678Z"
            }"#,
        )
        .unwrap();
        let trade = parse_trade(&record, "XBTUSD").unwrap();

        assert_eq!(trade.side, TakerSide::Sell);
        assert_eq!(trade.price, 100.5);
        assert_eq!(trade.volume, 0.995);
        assert_eq!(trade.timestamp_us, 1_641_092_645_678_000);
    }

    #[test]
    fn invalid_trade_records_are_skipped() {
        let no_side: serde_json::Value =
            serde_json::from_str(r#"{"price": 1, "homeNotional": 1, "timestamp": "2022-01-02T00:00:00Z"}"#)
                .unwrap();
        assert!(parse_trade(&no_side, "XBTUSD").is_none());

        let zero_volume: serde_json::Value = serde_json::from_str(
            r#"{"side": "Buy", "price": 1, "homeNotional": 0, "timestamp": "2022-01-02T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(parse_trade(&zero_volume, "XBTUSD").is_none());
    }
}
