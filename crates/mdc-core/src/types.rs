//! Common types flowing through the collector.
//!
//! One collector instance tracks a single logical symbol (e.g. `BTCUSD`)
//! whose per-exchange source names come from the symbol-mapping config.
//! All timestamps are **microseconds since Unix epoch**.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::MdcError;

// ---------------------------------------------------------------------------
// Exchange identifiers
// ---------------------------------------------------------------------------

/// Supported cryptocurrency exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Coinbase,
    Bitfinex,
    Kraken,
    Bitmex,
}

impl Exchange {
    /// All supported exchanges.
    pub fn all() -> [Exchange; 4] {
        [Self::Coinbase, Self::Bitfinex, Self::Kraken, Self::Bitmex]
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coinbase => write!(f, "coinbase"),
            Self::Bitfinex => write!(f, "bitfinex"),
            Self::Kraken => write!(f, "kraken"),
            Self::Bitmex => write!(f, "bitmex"),
        }
    }
}

impl FromStr for Exchange {
    type Err = MdcError;

    /// Case-insensitive exchange name lookup.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coinbase" => Ok(Self::Coinbase),
            "bitfinex" => Ok(Self::Bitfinex),
            "kraken" => Ok(Self::Kraken),
            "bitmex" => Ok(Self::Bitmex),
            other => Err(MdcError::Config(format!("unsupported exchange: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

/// Taker direction of a trade: a taker buy lifts an offer, a taker sell
/// hits a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakerSide {
    Buy,
    Sell,
}

/// A normalized public trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub exchange: Exchange,
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub timestamp_us: u64,
    pub side: TakerSide,
}

impl std::fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = if self.side == TakerSide::Buy { "BUY" } else { "SELL" };
        write!(
            f,
            "Trade({} {} {side} {:.2}x{:.8} ts={})",
            self.exchange, self.symbol, self.price, self.volume, self.timestamp_us
        )
    }
}

// ---------------------------------------------------------------------------
// Symbol descriptions
// ---------------------------------------------------------------------------

/// Per-exchange source symbol, e.g. `BTC-USD` on Coinbase for logical `BTCUSD`.
#[derive(Debug, Clone)]
pub struct SourceSymbol {
    /// Exchange-native symbol name.
    pub name: String,
    /// Order book depth to request where the exchange supports it.
    pub depth: u32,
}

/// One logical symbol and the exchanges that source it.
#[derive(Debug, Clone)]
pub struct SymbolDescription {
    /// Display name used for output files (e.g. `BTCUSD`).
    pub name: String,
    /// Source exchanges and their native symbol names.
    pub sources: BTreeMap<Exchange, SourceSymbol>,
    /// Number of (bid, ask) level pairs written per price record.
    pub price_levels: u32,
}
