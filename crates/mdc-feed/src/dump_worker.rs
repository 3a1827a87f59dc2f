//! CSV dump workers.
//!
//! Two dedicated blocking threads drain the bounded price and trade queues
//! and append to time-sharded CSV files. The output stream is partitioned
//! into blocks of the configured duration, counted from the moment dumping
//! was enabled: records land in `<dir>/<symbol>_<block>.csv`, and the open
//! file is switched exactly when the block index of consecutive records
//! differs. Every line is flushed so a crash loses at most one record.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use crossbeam_channel::Receiver;
use mdc_core::types::{Exchange, TakerSide};
use tracing::{error, info, warn};

/// Capacity of each dump queue. A full queue drops the record.
pub const DUMP_QUEUE_CAPACITY: usize = 8192;

/// One order book observation bound for the prices file.
#[derive(Debug, Clone)]
pub struct PriceRecord {
    pub exchange: Exchange,
    pub timestamp_us: u64,
    /// Top-of-book levels interleaved `(bid, ask, bid, ask, ...)` from the
    /// best, as `(price, volume)` pairs.
    pub levels: Vec<(f64, f64)>,
}

/// One trade bound for the trades file.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub exchange: Exchange,
    pub price: f64,
    pub volume: f64,
    pub timestamp_us: u64,
    pub side: TakerSide,
}

/// Block index of a record relative to the dump start.
pub fn block_index(timestamp_us: u64, start_us: u64, block_us: u64) -> u64 {
    if timestamp_us > start_us && block_us != 0 {
        (timestamp_us - start_us) / block_us
    } else {
        0
    }
}

/// `exchange,ts_us,bid1,bidv1,ask1,askv1,...` — prices at 2 decimals,
/// volumes at 8.
fn format_price_line(record: &PriceRecord) -> String {
    use std::fmt::Write as _;

    let mut line = format!("{},{}", record.exchange, record.timestamp_us);
    for (price, volume) in &record.levels {
        let _ = write!(line, ",{price:.2},{volume:.8}");
    }
    line.push('\n');
    line
}

/// `exchange,price,signed_volume,ts_us` — the volume is negated for taker
/// sells.
fn format_trade_line(record: &TradeRecord) -> String {
    let signed_volume = match record.side {
        TakerSide::Buy => record.volume,
        TakerSide::Sell => -record.volume,
    };
    format!(
        "{},{:.2},{:.8},{}\n",
        record.exchange, record.price, signed_volume, record.timestamp_us
    )
}

/// Drain the price queue until every sender is dropped.
pub fn run_price_dump_loop(
    dir: PathBuf,
    symbol: String,
    start_us: u64,
    block_us: u64,
    rx: Receiver<PriceRecord>,
) {
    run_dump_loop("prices", dir, symbol, start_us, block_us, rx, |r| r.timestamp_us, format_price_line);
}

/// Drain the trade queue until every sender is dropped.
pub fn run_trade_dump_loop(
    dir: PathBuf,
    symbol: String,
    start_us: u64,
    block_us: u64,
    rx: Receiver<TradeRecord>,
) {
    run_dump_loop("trades", dir, symbol, start_us, block_us, rx, |r| r.timestamp_us, format_trade_line);
}

fn run_dump_loop<T>(
    label: &str,
    dir: PathBuf,
    symbol: String,
    start_us: u64,
    block_us: u64,
    rx: Receiver<T>,
    timestamp_of: impl Fn(&T) -> u64,
    format_line: impl Fn(&T) -> String,
) {
    if let Err(e) = std::fs::create_dir_all(&dir) {
        error!("[{label}] could not create {}: {e}", dir.display());
        return;
    }

    let mut file: Option<File> = None;
    let mut current_block = 0u64;
    info!("[{label}] dump loop started in {}", dir.display());

    while let Ok(record) = rx.recv() {
        let block = block_index(timestamp_of(&record), start_us, block_us);

        if file.is_none() || block != current_block {
            file = None;
            let path = dir.join(format!("{symbol}_{block}.csv"));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(f) => {
                    file = Some(f);
                    current_block = block;
                }
                Err(e) => {
                    warn!("[{label}] could not open {}: {e}, record dropped", path.display());
                    continue;
                }
            }
        }

        if let Some(f) = file.as_mut() {
            let line = format_line(&record);
            if let Err(e) = f.write_all(line.as_bytes()).and_then(|_| f.flush()) {
                error!("[{label}] write failed, record dropped: {e}");
            }
        }
    }

    info!("[{label}] dump loop exited");
}
