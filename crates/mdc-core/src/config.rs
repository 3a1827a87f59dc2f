//! Symbol-mapping configuration.
//!
//! The collector reads one JSON file describing the logical symbol and its
//! per-exchange source names:
//!
//! ```json
//! {
//!   "symbol": "BTCUSD",
//!   "mapping": {
//!     "coinbase": "BTC-USD",
//!     "bitfinex": "tBTCUSD",
//!     "kraken": "XBTUSD",
//!     "bitmex": "XBTUSD"
//!   }
//! }
//! ```
//!
//! Exchange keys are case-insensitive. The mapping is filtered by the set of
//! exchanges requested on the command line; at least one entry must survive.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::MdcError;
use crate::types::{Exchange, SourceSymbol, SymbolDescription};

/// On-disk shape of the symbol-mapping file.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolMappingFile {
    /// Logical symbol display name.
    pub symbol: String,
    /// Exchange name (case-insensitive) to exchange-native symbol.
    pub mapping: HashMap<String, String>,
}

/// Load the symbol-mapping file and resolve it against the requested
/// exchange set and order book depth.
pub fn load_symbol_description(
    path: &Path,
    exchanges: &BTreeSet<Exchange>,
    depth: u32,
) -> anyhow::Result<SymbolDescription> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MdcError::Config(format!("could not open symbol config {}: {e}", path.display()))
    })?;
    let file: SymbolMappingFile = serde_json::from_str(&content)
        .map_err(|e| MdcError::Config(format!("invalid symbol config: {e}")))?;

    resolve_symbol_description(&file, exchanges, depth).map_err(Into::into)
}

/// Filter the raw mapping by the requested exchange set.
pub fn resolve_symbol_description(
    file: &SymbolMappingFile,
    exchanges: &BTreeSet<Exchange>,
    depth: u32,
) -> Result<SymbolDescription, MdcError> {
    if depth == 0 {
        return Err(MdcError::Config("order book depth must be positive".into()));
    }

    let mut sources = BTreeMap::new();
    for (name, source_symbol) in &file.mapping {
        let exchange = Exchange::from_str(name)?;
        if exchanges.contains(&exchange) {
            sources.insert(exchange, SourceSymbol { name: source_symbol.clone(), depth });
        }
    }

    if sources.is_empty() {
        return Err(MdcError::Config(
            "symbol mapping matches none of the requested exchanges".into(),
        ));
    }

    Ok(SymbolDescription { name: file.symbol.clone(), sources, price_levels: depth })
}
