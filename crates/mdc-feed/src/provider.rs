//! Market data provider — one instance per logical symbol.
//!
//! Spawns one feed per configured exchange (three WebSocket feeds, two
//! Kraken pollers), fans their book and trade callbacks in, optionally
//! forwards them to a user subscriber, and hands records to the CSV dump
//! pipeline. Errors from one feed never tear down its peers.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use mdc_core::error::MdcError;
use mdc_core::time_util;
use mdc_core::types::{Exchange, SymbolDescription, TradeEvent};
use mdc_core::ws::{WsConfig, WsSession};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::bitfinex::{BitfinexFeed, BITFINEX_WS_URL};
use crate::bitmex::{BitmexFeed, BITMEX_WS_URL};
use crate::coinbase::{CoinbaseFeed, COINBASE_WS_URL};
use crate::dump_worker::{self, PriceRecord, TradeRecord, DUMP_QUEUE_CAPACITY};
use crate::order_book::OrderBook;
use crate::ws_feed::run_ws_feed;
use crate::{kraken, FeedHandlers, SharedHandlers};

/// Optional user-facing fan-out callbacks.
#[derive(Default)]
pub struct MarketDataSubscriber {
    /// Invoked with every consistent book: `(exchange, source_symbol, book,
    /// observation timestamp in us)`.
    pub on_book: Option<Box<dyn Fn(Exchange, &str, &OrderBook, u64) + Send + Sync>>,
    /// Invoked with every normalized trade.
    pub on_trade: Option<Box<dyn Fn(&TradeEvent) + Send + Sync>>,
}

/// Senders of the two dump queues; dropping them stops the writers.
struct DumpQueues {
    prices_tx: crossbeam_channel::Sender<PriceRecord>,
    trades_tx: crossbeam_channel::Sender<TradeRecord>,
}

/// State shared between the provider and its feed callbacks.
struct ProviderShared {
    symbol: SymbolDescription,
    user: MarketDataSubscriber,
    dump: Mutex<Option<DumpQueues>>,
}

impl ProviderShared {
    fn handle_book(&self, exchange: Exchange, symbol: &str, book: &OrderBook) {
        let timestamp_us = time_util::now_us();

        if let Some(on_book) = &self.user.on_book {
            on_book(exchange, symbol, book, timestamp_us);
        }

        if let Some(dump) = self.dump.lock().unwrap().as_ref() {
            let record = PriceRecord {
                exchange,
                timestamp_us,
                levels: interleave_top_levels(book, self.symbol.price_levels as usize),
            };
            if dump.prices_tx.try_send(record).is_err() {
                warn!("[{exchange}] prices dump queue full, record dropped");
            }
        }
    }

    fn handle_trade(&self, trade: TradeEvent) {
        if let Some(on_trade) = &self.user.on_trade {
            on_trade(&trade);
        }

        if let Some(dump) = self.dump.lock().unwrap().as_ref() {
            let record = TradeRecord {
                exchange: trade.exchange,
                price: trade.price,
                volume: trade.volume,
                timestamp_us: trade.timestamp_us,
                side: trade.side,
            };
            if dump.trades_tx.try_send(record).is_err() {
                warn!("[{}] trades dump queue full, record dropped", trade.exchange);
            }
        }
    }
}

/// Top `depth` levels of both sides interleaved `(bid, ask)` from the best,
/// stopping when either side runs out.
fn interleave_top_levels(book: &OrderBook, depth: usize) -> Vec<(f64, f64)> {
    let mut levels = Vec::with_capacity(depth * 2);
    for (bid, ask) in book.bids().iter().zip(book.asks()).take(depth) {
        levels.push(*bid);
        levels.push(*ask);
    }
    levels
}

/// Owns every feed task and the dump pipeline for one symbol.
pub struct MarketDataProvider {
    shared: Arc<ProviderShared>,
    shutdown_tx: watch::Sender<bool>,
    feed_tasks: Vec<tokio::task::JoinHandle<()>>,
    dump_workers: Vec<tokio::task::JoinHandle<()>>,
}

impl MarketDataProvider {
    /// Create the provider and start one feed per configured exchange.
    pub fn new(symbol: SymbolDescription, user: MarketDataSubscriber) -> Self {
        info!("adding market data feeds for symbol: {}", symbol.name);

        let sources = symbol.sources.clone();
        let shared = Arc::new(ProviderShared { symbol, user, dump: Mutex::new(None) });
        let handlers = Self::feed_handlers(&shared);
        let (shutdown_tx, _) = watch::channel(false);

        let mut provider =
            Self { shared, shutdown_tx, feed_tasks: Vec::new(), dump_workers: Vec::new() };

        for (exchange, source) in &sources {
            provider.spawn_feed(*exchange, &source.name, source.depth, handlers.clone());
            info!(
                "{exchange} added as a market data feed: source symbol={}, depth={}",
                source.name, source.depth
            );
        }

        provider
    }

    fn feed_handlers(shared: &Arc<ProviderShared>) -> SharedHandlers {
        let book_shared = shared.clone();
        let trade_shared = shared.clone();
        Arc::new(FeedHandlers {
            on_book: Box::new(move |exchange, symbol, book| {
                book_shared.handle_book(exchange, symbol, book);
            }),
            on_trade: Box::new(move |trade| trade_shared.handle_trade(trade)),
            on_error: Box::new(|exchange, err| error!("{exchange}: {err:#}")),
        })
    }

    fn spawn_feed(&mut self, exchange: Exchange, symbol: &str, depth: u32, handlers: SharedHandlers) {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let symbol = symbol.to_string();

        match exchange {
            Exchange::Coinbase => {
                let (session, events) = WsSession::connect(WsConfig {
                    url: COINBASE_WS_URL.to_string(),
                    label: exchange.to_string(),
                });
                let protocol = CoinbaseFeed::new(symbol, handlers.clone());
                self.feed_tasks.push(tokio::spawn(run_ws_feed(
                    session, events, protocol, handlers, shutdown_rx,
                )));
            }
            Exchange::Bitfinex => {
                let (session, events) = WsSession::connect(WsConfig {
                    url: BITFINEX_WS_URL.to_string(),
                    label: exchange.to_string(),
                });
                let protocol = BitfinexFeed::new(symbol, depth, handlers.clone());
                self.feed_tasks.push(tokio::spawn(run_ws_feed(
                    session, events, protocol, handlers, shutdown_rx,
                )));
            }
            Exchange::Bitmex => {
                let (session, events) = WsSession::connect(WsConfig {
                    url: BITMEX_WS_URL.to_string(),
                    label: exchange.to_string(),
                });
                // Public channels only; credentials stay unset in data-only mode.
                let protocol = BitmexFeed::new(symbol, handlers.clone(), None);
                self.feed_tasks.push(tokio::spawn(run_ws_feed(
                    session, events, protocol, handlers, shutdown_rx,
                )));
            }
            Exchange::Kraken => {
                self.feed_tasks.push(tokio::spawn(kraken::run_book_poller(
                    symbol.clone(),
                    depth,
                    kraken::DEFAULT_POLL_PERIOD,
                    handlers.clone(),
                    shutdown_rx.clone(),
                )));
                self.feed_tasks.push(tokio::spawn(kraken::run_trades_poller(
                    symbol,
                    kraken::DEFAULT_POLL_PERIOD,
                    handlers,
                    shutdown_rx,
                )));
            }
        }
    }

    /// Start dumping CSV records under `<path>/prices` and `<path>/trades`,
    /// partitioned into blocks of `block_minutes` counted from now.
    pub fn enable_dump(&mut self, path: &Path, block_minutes: u32) -> Result<()> {
        if block_minutes == 0 {
            return Err(MdcError::Config("block duration must be positive".into()).into());
        }

        info!(
            "market data dumping enabled: path={}, block duration(minutes)={block_minutes}",
            path.display()
        );

        let start_us = time_util::now_us();
        let block_us = u64::from(block_minutes) * 60 * 1_000_000;
        let symbol = self.shared.symbol.name.clone();

        let (prices_tx, prices_rx) = crossbeam_channel::bounded::<PriceRecord>(DUMP_QUEUE_CAPACITY);
        let (trades_tx, trades_rx) = crossbeam_channel::bounded::<TradeRecord>(DUMP_QUEUE_CAPACITY);

        let prices_dir = path.join("prices");
        let prices_symbol = symbol.clone();
        self.dump_workers.push(tokio::task::spawn_blocking(move || {
            dump_worker::run_price_dump_loop(prices_dir, prices_symbol, start_us, block_us, prices_rx);
        }));

        let trades_dir = path.join("trades");
        self.dump_workers.push(tokio::task::spawn_blocking(move || {
            dump_worker::run_trade_dump_loop(trades_dir, symbol, start_us, block_us, trades_rx);
        }));

        *self.shared.dump.lock().unwrap() = Some(DumpQueues { prices_tx, trades_tx });
        Ok(())
    }

    /// Stop every feed, then the dump writers, and wait for all of them.
    pub async fn stop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.feed_tasks.drain(..) {
            let _ = task.await;
        }

        // Dropping the senders lets the writers drain and exit.
        self.shared.dump.lock().unwrap().take();
        for worker in self.dump_workers.drain(..) {
            let _ = worker.await;
        }

        info!("market data provider for {} stopped", self.shared.symbol.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdc_core::types::{SourceSymbol, TakerSide};
    use std::collections::BTreeMap;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.set_bid(100.0, 1.0);
        book.set_bid(99.0, 2.0);
        book.set_bid(98.0, 3.0);
        book.set_ask(101.0, 4.0);
        book.set_ask(102.0, 5.0);
        book
    }

    fn shared(price_levels: u32, user: MarketDataSubscriber) -> ProviderShared {
        let mut sources = BTreeMap::new();
        sources.insert(
            Exchange::Coinbase,
            SourceSymbol { name: "BTC-USD".to_string(), depth: price_levels },
        );
        ProviderShared {
            symbol: SymbolDescription { name: "BTCUSD".to_string(), sources, price_levels },
            user,
            dump: Mutex::new(None),
        }
    }

    #[test]
    fn interleave_stops_at_the_shorter_side() {
        let levels = interleave_top_levels(&sample_book(), 10);
        assert_eq!(
            levels,
            vec![(100.0, 1.0), (101.0, 4.0), (99.0, 2.0), (102.0, 5.0)]
        );

        let top1 = interleave_top_levels(&sample_book(), 1);
        assert_eq!(top1, vec![(100.0, 1.0), (101.0, 4.0)]);
    }

    #[test]
    fn book_fan_in_enqueues_interleaved_record() {
        let shared = shared(2, MarketDataSubscriber::default());
        let (prices_tx, prices_rx) = crossbeam_channel::bounded(4);
        let (trades_tx, _trades_rx) = crossbeam_channel::bounded(4);
        *shared.dump.lock().unwrap() = Some(DumpQueues { prices_tx, trades_tx });

        shared.handle_book(Exchange::Coinbase, "BTC-USD", &sample_book());

        let record = prices_rx.try_recv().unwrap();
        assert_eq!(record.exchange, Exchange::Coinbase);
        assert!(record.timestamp_us > 0);
        assert_eq!(record.levels, vec![(100.0, 1.0), (101.0, 4.0), (99.0, 2.0), (102.0, 5.0)]);
    }

    #[test]
    fn trade_fan_in_forwards_to_user_and_queue() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let user = MarketDataSubscriber {
            on_book: None,
            on_trade: Some(Box::new(move |trade| {
                seen_clone.lock().unwrap().push(trade.clone());
            })),
        };

        let shared = shared(2, user);
        let (prices_tx, _prices_rx) = crossbeam_channel::bounded(4);
        let (trades_tx, trades_rx) = crossbeam_channel::bounded(4);
        *shared.dump.lock().unwrap() = Some(DumpQueues { prices_tx, trades_tx });

        let trade = TradeEvent {
            exchange: Exchange::Kraken,
            symbol: "XBTUSD".to_string(),
            price: 100.0,
            volume: 0.5,
            timestamp_us: 1_641_092_645_000_000,
            side: TakerSide::Sell,
        };
        shared.handle_trade(trade.clone());

        assert_eq!(seen.lock().unwrap().as_slice(), &[trade]);
        let record = trades_rx.try_recv().unwrap();
        assert_eq!(record.price, 100.0);
        assert_eq!(record.side, TakerSide::Sell);
    }

    #[test]
    fn full_dump_queue_drops_without_blocking() {
        let shared = shared(2, MarketDataSubscriber::default());
        let (prices_tx, prices_rx) = crossbeam_channel::bounded(1);
        let (trades_tx, _trades_rx) = crossbeam_channel::bounded(1);
        *shared.dump.lock().unwrap() = Some(DumpQueues { prices_tx, trades_tx });

        shared.handle_book(Exchange::Coinbase, "BTC-USD", &sample_book());
        shared.handle_book(Exchange::Coinbase, "BTC-USD", &sample_book());

        // Only the first record fits; the second was dropped, not blocked on.
        assert!(prices_rx.try_recv().is_ok());
        assert!(prices_rx.try_recv().is_err());
    }
}
