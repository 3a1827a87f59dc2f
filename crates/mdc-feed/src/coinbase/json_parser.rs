//! Coinbase JSON message parsing and frame building.

use anyhow::Context;
use mdc_core::time_util;
use mdc_core::types::{Exchange, TakerSide, TradeEvent};

use crate::json_util::{parse_f64_field, parse_str_f64, str_field};
use crate::order_book::OrderBook;

/// Build one subscribe frame covering every pending `(channel, product)`
/// pair, grouped per channel:
///
/// `{"type":"subscribe","channels":[{"name":C,"product_ids":[P,...]},...]}`
///
/// Returns `None` when nothing is pending.
pub fn build_subscribe(pending: &[(String, String)]) -> Option<String> {
    if pending.is_empty() {
        return None;
    }

    let mut channels: Vec<(String, Vec<String>)> = Vec::new();
    for (channel, product) in pending {
        match channels.iter_mut().find(|(name, _)| name == channel) {
            Some((_, products)) => {
                if !products.contains(product) {
                    products.push(product.clone());
                }
            }
            None => channels.push((channel.clone(), vec![product.clone()])),
        }
    }

    let channels: Vec<serde_json::Value> = channels
        .into_iter()
        .map(|(name, product_ids)| {
            serde_json::json!({"name": name, "product_ids": product_ids})
        })
        .collect();

    Some(serde_json::json!({"type": "subscribe", "channels": channels}).to_string())
}

/// `type=snapshot`: replace both sides from `bids`/`asks` price-volume pairs.
pub fn apply_snapshot(book: &mut OrderBook, object: &serde_json::Value) {
    book.clear();
    apply_side_levels(object.get("bids"), |price, volume| book.set_bid(price, volume));
    apply_side_levels(object.get("asks"), |price, volume| book.set_ask(price, volume));
}

fn apply_side_levels(levels: Option<&serde_json::Value>, mut apply: impl FnMut(f64, f64)) {
    let Some(levels) = levels.and_then(|l| l.as_array()) else { return };
    for level in levels {
        let Some(entry) = level.as_array() else { continue };
        if entry.len() < 2 {
            continue;
        }
        let (Some(price), Some(volume)) =
            (parse_str_f64(entry.first()), parse_str_f64(entry.get(1)))
        else {
            continue;
        };
        if price >= 0.0 && volume >= 0.0 {
            apply(price, volume);
        }
    }
}

/// `type=l2update`: apply `changes = [[side, price, volume], ...]`.
/// A non-positive volume removes the level.
pub fn apply_l2_update(book: &mut OrderBook, object: &serde_json::Value) {
    let Some(changes) = object.get("changes").and_then(|c| c.as_array()) else { return };
    for change in changes {
        let Some(entry) = change.as_array() else { continue };
        if entry.len() < 3 {
            continue;
        }
        let Some(side) = entry[0].as_str() else { continue };
        let (Some(price), Some(volume)) =
            (parse_str_f64(entry.get(1)), parse_str_f64(entry.get(2)))
        else {
            continue;
        };
        if price < 0.0 {
            continue;
        }

        // `set_*` removes the level when volume <= 0.
        match side {
            "buy" => book.set_bid(price, volume),
            "sell" => book.set_ask(price, volume),
            _ => {}
        }
    }
}

/// `type=match`: Coinbase reports the *resting* side, so the taker side is
/// the opposite of the `side` field.
pub fn parse_match(object: &serde_json::Value) -> anyhow::Result<TradeEvent> {
    let side = match str_field(object, "side") {
        Some("buy") => TakerSide::Sell,
        Some("sell") => TakerSide::Buy,
        other => anyhow::bail!("coinbase: could not parse deal side: {other:?}"),
    };

    let symbol = str_field(object, "product_id").unwrap_or_default().to_string();
    let price = parse_f64_field(object, "price").context("coinbase: match without price")?;
    let volume = parse_f64_field(object, "size").context("coinbase: match without size")?;
    let iso_time = str_field(object, "time").context("coinbase: match without time")?;
    let timestamp_us = time_util::parse_iso_us(iso_time)?;

    Ok(TradeEvent { exchange: Exchange::Coinbase, symbol, price, volume, timestamp_us, side })
}
