//! Bounded per-symbol price history.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Recent price samples per symbol, oldest first.
///
/// Each series is a ring buffer: appending beyond capacity evicts the oldest
/// sample, so memory is bounded by `symbols * capacity`.
pub struct PriceHistoryStore {
    series: DashMap<String, VecDeque<f64>>,
    capacity: AtomicUsize,
}

impl PriceHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: DashMap::new(),
            capacity: AtomicUsize::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Change the capacity. Longer series are trimmed on their next append.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity.max(1), Ordering::Relaxed);
    }

    /// Append a sample, evicting the oldest ones beyond capacity.
    ///
    /// Non-finite and non-positive samples are dropped.
    pub fn append(&self, symbol: &str, price: f64) {
        if !price.is_finite() || price <= 0.0 {
            debug!(symbol = symbol, price = price, "Ignoring invalid price sample");
            return;
        }
        let capacity = self.capacity();
        let mut series = self
            .series
            .entry(symbol.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        series.push_back(price);
        while series.len() > capacity {
            series.pop_front();
        }
    }

    /// Append several samples in order.
    pub fn extend(&self, symbol: &str, prices: &[f64]) {
        for &price in prices {
            self.append(symbol, price);
        }
    }

    /// Ordered samples for a symbol, empty if the symbol was never seen.
    pub fn prices(&self, symbol: &str) -> Vec<f64> {
        self.series
            .get(symbol)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, symbol: &str) -> Option<f64> {
        self.series.get(symbol).and_then(|s| s.back().copied())
    }

    pub fn len(&self, symbol: &str) -> usize {
        self.series.get(symbol).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, symbol: &str) -> bool {
        self.len(symbol) == 0
    }

    /// Drop the series for a symbol.
    pub fn clear(&self, symbol: &str) {
        self.series.remove(symbol);
    }
}
