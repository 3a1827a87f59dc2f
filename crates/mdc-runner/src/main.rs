//! # mdc-runner
//!
//! Main entry point for the market data collector.
//!
//! Loads the symbol-mapping config, starts one market data provider with a
//! feed per selected exchange, dumps normalized quotes and trades to
//! time-sharded CSV files, and shuts down after the configured collection
//! window (or on Ctrl+C).
//!
//! # Usage
//!
//! ```bash
//! mdc-runner --dump-path ./data --symbol-config btcusd.json --depth 10
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use mdc_core::types::Exchange;
use mdc_feed::provider::{MarketDataProvider, MarketDataSubscriber};
use tracing::info;

/// Multi-exchange market data collector.
#[derive(Parser)]
#[command(name = "mdc-runner", about = "Multi-exchange market data collector")]
struct Cli {
    /// Dump path for market data CSV files.
    #[arg(long)]
    dump_path: PathBuf,

    /// Config file for symbol name mapping (JSON).
    #[arg(long)]
    symbol_config: PathBuf,

    /// Duration of one block in minutes.
    #[arg(long, default_value_t = 480)]
    duration: u32,

    /// Number of market data blocks to collect.
    #[arg(long, default_value_t = 1)]
    blocks: u32,

    /// Depth of the order book.
    #[arg(long, default_value_t = 10)]
    depth: u32,

    /// Collect from selected exchanges only (comma-separated subset of
    /// bitfinex, bitmex, kraken, coinbase). Default: all.
    #[arg(long)]
    exchanges: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,
}

fn parse_exchanges(input: &str) -> Result<BTreeSet<Exchange>> {
    let mut exchanges = BTreeSet::new();
    for name in input.split(',') {
        let name = name.trim();
        if !name.is_empty() {
            exchanges.insert(Exchange::from_str(name)?);
        }
    }
    if exchanges.is_empty() {
        bail!("an empty list of exchanges was passed");
    }
    Ok(exchanges)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    mdc_core::logging::init_logging(&cli.log_level, cli.log_dir.as_deref(), "mdc-runner");

    if cli.duration == 0 {
        bail!("invalid block duration");
    }
    if cli.blocks == 0 {
        bail!("invalid number of blocks");
    }
    if cli.depth == 0 {
        bail!("invalid order book depth");
    }

    let exchanges = match &cli.exchanges {
        Some(input) => parse_exchanges(input)?,
        None => Exchange::all().into_iter().collect(),
    };

    let symbol =
        mdc_core::config::load_symbol_description(&cli.symbol_config, &exchanges, cli.depth)?;

    info!("collecting market data for symbol '{}'", symbol.name);
    for (exchange, source) in &symbol.sources {
        info!("{exchange}: {}", source.name);
    }
    info!(
        "dump path={}, block duration={} minute(s), blocks={}, depth={}",
        cli.dump_path.display(),
        cli.duration,
        cli.blocks,
        cli.depth,
    );

    let mut provider = MarketDataProvider::new(symbol, MarketDataSubscriber::default());
    provider.enable_dump(&cli.dump_path, cli.duration)?;

    let window = Duration::from_secs(u64::from(cli.duration) * 60 * u64::from(cli.blocks));
    info!("collecting for {} minute(s) — press Ctrl+C to stop", window.as_secs() / 60);

    tokio::select! {
        _ = tokio::time::sleep(window) => info!("collection window elapsed"),
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
    }

    provider.stop().await;
    info!("all feeds stopped — goodbye");
    Ok(())
}
