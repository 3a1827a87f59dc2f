//! Kraken public REST API client.
//!
//! Requests are form-encoded POSTs against `https://api.kraken.com/0/public/`.
//! Every response carries an `{"error": [...], "result": {...}}` envelope;
//! entries starting with `E` are errors (`W`-prefixed warnings pass through).

use anyhow::Result;
use mdc_core::error::MdcError;
use mdc_core::types::TakerSide;

use crate::json_util::{parse_str_f64, parse_str_u64};

/// Kraken REST base URL.
pub const KRAKEN_URL: &str = "https://api.kraken.com";

/// REST API version path segment.
const API_VERSION: &str = "0";

/// One order book level from a `Depth` response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BookLevel {
    pub price: f64,
    pub volume: f64,
}

/// Parsed `Depth` response for one pair.
#[derive(Debug, Clone, Default)]
pub struct OrderBookResponse {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

/// One validated trade record from a `Trades` response.
#[derive(Debug, Clone, PartialEq)]
pub struct KrakenTrade {
    pub price: f64,
    pub volume: f64,
    pub timestamp_us: u64,
    pub side: TakerSide,
    /// `ord == "m"` — only market trades are forwarded downstream.
    pub is_market: bool,
}

/// Parsed `Trades` response: validated records plus the continuation cursor.
#[derive(Debug, Clone, Default)]
pub struct TradesResponse {
    pub records: Vec<KrakenTrade>,
    pub last: u64,
}

/// Thin client over the public endpoints the collector needs.
pub struct KrakenApi {
    client: reqwest::Client,
    base_url: String,
}

impl KrakenApi {
    pub fn new() -> Self {
        Self::with_base_url(KRAKEN_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("mdc-collector")
            .build()
            .unwrap_or_default();
        Self { client, base_url: base_url.trim_end_matches('/').to_string() }
    }

    /// `POST /0/public/Depth` — order book snapshot for one pair.
    pub async fn order_book(&self, pair: &str, count: u32) -> Result<OrderBookResponse> {
        let params = [("pair", pair.to_string()), ("count", count.to_string())];
        let result = self.public_method("Depth", &params).await?;
        Ok(parse_order_book(&result, pair)?)
    }

    /// `POST /0/public/Trades` — recent trades, optionally from a cursor.
    pub async fn trades(&self, pair: &str, since: u64) -> Result<TradesResponse> {
        let mut params = vec![("pair", pair.to_string())];
        if since != 0 {
            params.push(("since", since.to_string()));
        }
        let result = self.public_method("Trades", &params).await?;
        Ok(parse_trades(&result, pair)?)
    }

    async fn public_method(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let url = format!("{}/{}/public/{}", self.base_url, API_VERSION, method);
        let response = self
            .client
            .post(&url)
            .form(params)
            .send()
            .await
            .map_err(|e| MdcError::Http(format!("{method} request failed: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| MdcError::Http(format!("{method} response read failed: {e}")))?;
        Ok(parse_response(&body)?)
    }
}

impl Default for KrakenApi {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwrap the `{"error": [...], "result": ...}` envelope.
pub fn parse_response(body: &str) -> Result<serde_json::Value, MdcError> {
    let object: serde_json::Value =
        serde_json::from_str(body).map_err(|e| MdcError::Parse(format!("bad response: {e}")))?;

    if let Some(errors) = object.get("error").and_then(|e| e.as_array()) {
        let message: Vec<&str> = errors
            .iter()
            .filter_map(|e| e.as_str())
            .filter(|e| e.starts_with('E') || e.starts_with('e'))
            .collect();
        if !message.is_empty() {
            return Err(MdcError::Exchange(message.join(", ")));
        }
    }

    object
        .get("result")
        .cloned()
        .ok_or_else(|| MdcError::Parse("response without result".into()))
}

/// Parse `result[pair].{asks,bids}` keeping records with positive price and
/// volume.
pub fn parse_order_book(
    result: &serde_json::Value,
    pair: &str,
) -> Result<OrderBookResponse, MdcError> {
    let pair_item = result
        .get(pair)
        .ok_or_else(|| MdcError::Parse(format!("depth response without pair {pair}")))?;

    Ok(OrderBookResponse {
        bids: parse_book_levels(pair_item.get("bids")),
        asks: parse_book_levels(pair_item.get("asks")),
    })
}

fn parse_book_levels(levels: Option<&serde_json::Value>) -> Vec<BookLevel> {
    let Some(levels) = levels.and_then(|l| l.as_array()) else { return Vec::new() };
    levels
        .iter()
        .filter_map(|level| {
            let entry = level.as_array()?;
            let price = parse_str_f64(entry.first())?;
            let volume = parse_str_f64(entry.get(1))?;
            (price > 0.0 && volume > 0.0).then_some(BookLevel { price, volume })
        })
        .collect()
}

/// Parse `result[pair]` trade records `[price, volume, ts_s, dir, ord, misc]`
/// and the `result.last` cursor.
///
/// Records with non-positive price/volume, a zero timestamp, or an unknown
/// direction or order type are dropped.
pub fn parse_trades(result: &serde_json::Value, pair: &str) -> Result<TradesResponse, MdcError> {
    let records = result
        .get(pair)
        .and_then(|t| t.as_array())
        .ok_or_else(|| MdcError::Parse(format!("trades response without pair {pair}")))?;

    let records = records.iter().filter_map(|item| parse_trade_record(item)).collect();
    let last = parse_str_u64(result.get("last")).unwrap_or(0);

    Ok(TradesResponse { records, last })
}

fn parse_trade_record(item: &serde_json::Value) -> Option<KrakenTrade> {
    let entry = item.as_array()?;
    if entry.len() < 5 {
        return None;
    }

    let price = parse_str_f64(entry.first())?;
    let volume = parse_str_f64(entry.get(1))?;
    // Seconds (fractional) -> microseconds.
    let timestamp_us = (entry[2].as_f64()? * 1_000.0) as u64 * 1_000;

    let side = match entry[3].as_str()? {
        "b" => TakerSide::Buy,
        "s" => TakerSide::Sell,
        _ => return None,
    };
    let is_market = match entry[4].as_str()? {
        "m" => true,
        "l" => false,
        _ => return None,
    };

    (price > 0.0 && volume > 0.0 && timestamp_us != 0).then_some(KrakenTrade {
        price,
        volume,
        timestamp_us,
        side,
        is_market,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_errors_are_raised() {
        let body = r#"{"error": ["EQuery:Unknown asset pair"], "result": {}}"#;
        let err = parse_response(body).unwrap_err();
        assert!(matches!(err, MdcError::Exchange(_)));
        assert!(err.to_string().contains("EQuery"));
    }

    #[test]
    fn warnings_pass_through() {
        let body = r#"{"error": ["WGeneral:Deprecated"], "result": {"ok": true}}"#;
        let result = parse_response(body).unwrap();
        assert_eq!(result["ok"], true);
    }

    #[test]
    fn multiple_errors_are_concatenated() {
        let body = r#"{"error": ["EGeneral:Invalid", "EService:Busy"], "result": {}}"#;
        let err = parse_response(body).unwrap_err();
        assert!(err.to_string().contains("EGeneral:Invalid, EService:Busy"));
    }

    #[test]
    fn depth_filters_non_positive_records() {
        let result: serde_json::Value = serde_json::from_str(
            r#"{
                "XBTUSD": {
                    "asks": [["101.0", "3.0", 1640000000], ["0", "1.0", 1640000000]],
                    "bids": [["100.0", "1.0", 1640000000], ["99.0", "0", 1640000000]]
                }
            }"#,
        )
        .unwrap();
        let book = parse_order_book(&result, "XBTUSD").unwrap();

        assert_eq!(book.asks, vec![BookLevel { price: 101.0, volume: 3.0 }]);
        assert_eq!(book.bids, vec![BookLevel { price: 100.0, volume: 1.0 }]);
    }

    #[test]
    fn depth_without_pair_is_a_parse_error() {
        let result = serde_json::json!({});
        assert!(parse_order_book(&result, "XBTUSD").is_err());
    }

    #[test]
    fn trades_parse_records_and_cursor() {
        let result: serde_json::Value = serde_json::from_str(
            r#"{
                "XBTUSD": [
                    ["100.0", "0.5", 1641092645.6789, "b", "m", ""],
                    ["101.0", "0.4", 1641092646.0, "s", "l", ""],
                    ["102.0", "0.3", 1641092647.0, "x", "m", ""]
                ],
                "last": "1641092647000000000"
            }"#,
        )
        .unwrap();
        let trades = parse_trades(&result, "XBTUSD").unwrap();

        assert_eq!(trades.last, 1_641_092_647_000_000_000);
        assert_eq!(trades.records.len(), 2);

        assert_eq!(trades.records[0].side, TakerSide::Buy);
        assert!(trades.records[0].is_market);
        assert_eq!(trades.records[0].timestamp_us, 1_641_092_645_678_000);

        assert_eq!(trades.records[1].side, TakerSide::Sell);
        assert!(!trades.records[1].is_market);
    }
}
