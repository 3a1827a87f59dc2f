//! Two-sided order book shared by all exchange feeds.
//!
//! Levels are `(price, volume)` pairs kept sorted — bids **descending** by
//! price (best bid first), asks **ascending** by price (best ask first). A
//! zero-volume update removes the level. Books are only published downstream
//! when they pass the consistency gate: both sides non-empty, both best
//! prices positive, and the book not crossed.

use mdc_core::types::Exchange;

use crate::FeedHandlers;

/// Tolerance for floating-point price comparison.
const PRICE_EPS: f64 = 1e-10;

/// Sorted two-sided price ladder.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    /// Bid levels, sorted descending by price.
    bids: Vec<(f64, f64)>,
    /// Ask levels, sorted ascending by price.
    asks: Vec<(f64, f64)>,
}

impl OrderBook {
    /// Create a new empty order book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all levels from both sides.
    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Insert or update a bid level. `volume <= 0` removes the level.
    pub fn set_bid(&mut self, price: f64, volume: f64) {
        update_side(&mut self.bids, price, volume, SideOrder::Descending);
    }

    /// Insert or update an ask level. `volume <= 0` removes the level.
    pub fn set_ask(&mut self, price: f64, volume: f64) {
        update_side(&mut self.asks, price, volume, SideOrder::Ascending);
    }

    /// Remove the bid level at `price`, if present.
    pub fn remove_bid(&mut self, price: f64) {
        remove_level(&mut self.bids, price);
    }

    /// Remove the ask level at `price`, if present.
    pub fn remove_ask(&mut self, price: f64) {
        remove_level(&mut self.asks, price);
    }

    /// Best (highest) bid.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        self.bids.first().copied()
    }

    /// Best (lowest) ask.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        self.asks.first().copied()
    }

    /// Bid levels, best first.
    pub fn bids(&self) -> &[(f64, f64)] {
        &self.bids
    }

    /// Ask levels, best first.
    pub fn asks(&self) -> &[(f64, f64)] {
        &self.asks
    }

    /// Returns `true` if the book has no levels on either side.
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Consistency gate: both best prices present and positive, and the
    /// best bid not above the best ask.
    pub fn is_consistent(&self) -> bool {
        let best_bid = self.best_bid().map(|(p, _)| p).unwrap_or(0.0);
        let best_ask = self.best_ask().map(|(p, _)| p).unwrap_or(0.0);
        best_bid > 0.0 && best_ask > 0.0 && best_bid <= best_ask
    }

    /// Invoke the book handler if the book is consistent.
    ///
    /// Returns `false` for an inconsistent book so the caller can request a
    /// session restart where one exists.
    pub fn publish_if_consistent(
        &self,
        exchange: Exchange,
        symbol: &str,
        handlers: &FeedHandlers,
    ) -> bool {
        if self.is_consistent() {
            (handlers.on_book)(exchange, symbol, self);
            true
        } else {
            false
        }
    }
}

enum SideOrder {
    /// Bids: higher prices first.
    Descending,
    /// Asks: lower prices first.
    Ascending,
}

fn update_side(levels: &mut Vec<(f64, f64)>, price: f64, volume: f64, order: SideOrder) {
    if let Some(idx) = levels.iter().position(|(p, _)| (p - price).abs() < PRICE_EPS) {
        if volume <= 0.0 {
            levels.remove(idx);
        } else {
            levels[idx].1 = volume;
        }
    } else if volume > 0.0 {
        let pos = levels
            .iter()
            .position(|(p, _)| match order {
                SideOrder::Descending => *p < price,
                SideOrder::Ascending => *p > price,
            })
            .unwrap_or(levels.len());
        levels.insert(pos, (price, volume));
    }
}

fn remove_level(levels: &mut Vec<(f64, f64)>, price: f64) {
    if let Some(idx) = levels.iter().position(|(p, _)| (p - price).abs() < PRICE_EPS) {
        levels.remove(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_book() -> OrderBook {
        let mut book = OrderBook::new();
        book.set_bid(100.0, 1.0);
        book.set_bid(99.0, 2.0);
        book.set_ask(101.0, 3.0);
        book.set_ask(102.0, 4.0);
        book
    }

    #[test]
    fn sides_stay_sorted_from_best() {
        let mut book = sample_book();
        book.set_bid(99.5, 5.0);
        book.set_ask(100.5, 6.0);

        assert_eq!(book.bids(), &[(100.0, 1.0), (99.5, 5.0), (99.0, 2.0)]);
        assert_eq!(book.asks(), &[(100.5, 6.0), (101.0, 3.0), (102.0, 4.0)]);
        assert_eq!(book.best_bid(), Some((100.0, 1.0)));
        assert_eq!(book.best_ask(), Some((100.5, 6.0)));
    }

    #[test]
    fn zero_volume_removes_level() {
        let mut book = sample_book();
        book.set_bid(99.0, 0.0);
        assert_eq!(book.bids(), &[(100.0, 1.0)]);

        // Removing an absent level is a no-op.
        book.set_ask(150.0, 0.0);
        assert_eq!(book.asks().len(), 2);

        book.remove_ask(101.0);
        assert_eq!(book.asks(), &[(102.0, 4.0)]);
    }

    #[test]
    fn update_replaces_volume_in_place() {
        let mut book = sample_book();
        book.set_bid(100.0, 7.5);
        assert_eq!(book.best_bid(), Some((100.0, 7.5)));
        assert_eq!(book.bids().len(), 2);
    }

    #[test]
    fn consistency_requires_both_sides() {
        let mut book = OrderBook::new();
        assert!(!book.is_consistent());

        book.set_bid(100.0, 1.0);
        assert!(!book.is_consistent());

        book.set_ask(101.0, 1.0);
        assert!(book.is_consistent());
    }

    #[test]
    fn crossed_book_is_inconsistent() {
        let mut book = OrderBook::new();
        book.set_bid(102.0, 1.0);
        book.set_ask(101.0, 1.0);
        assert!(!book.is_consistent());
    }

    #[test]
    fn touching_book_is_consistent() {
        let mut book = OrderBook::new();
        book.set_bid(101.0, 1.0);
        book.set_ask(101.0, 1.0);
        assert!(book.is_consistent());
    }
}
