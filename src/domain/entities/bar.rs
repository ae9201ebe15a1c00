use serde::{Deserialize, Serialize};

use crate::domain::value_objects::time::MicroSec;

/// OHLCV aggregate over one fixed window
///
/// Derived data: bars are recomputed from trades, never edited. The last bar
/// of a query may be cut short by the query end, in which case it is
/// `provisional` and `window_end < window_start + window`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub window_start: MicroSec,
    pub window_end: MicroSec,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub trade_count: u64,
    pub provisional: bool,
}

/// Volume traded at one price bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeAtPrice {
    pub price: f64,
    pub buy_size: f64,
    pub sell_size: f64,
    pub trade_count: u64,
}

impl VolumeAtPrice {
    pub fn total_size(&self) -> f64 {
        self.buy_size + self.sell_size
    }
}
