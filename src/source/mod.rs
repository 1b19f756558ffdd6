//! Upstream market data.

pub mod binance;

pub use binance::BinanceKlineSource;

use crate::error::Result;
use crate::model::bar::RawBar;

/// Identifies one upstream query. Two requests share a cached series iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub symbol: String,
    pub period: String,
    pub interval: String,
}

impl PriceKey {
    pub fn new(symbol: &str, period: &str, interval: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            period: period.to_string(),
            interval: interval.to_string(),
        }
    }
}

/// Blocking fetch of date-indexed rows, ascending by date. May be slow and may fail; callers run
/// it on the worker pool.
pub trait PriceSource: Send + Sync {
    fn fetch(&self, key: &PriceKey) -> Result<Vec<RawBar>>;
}
