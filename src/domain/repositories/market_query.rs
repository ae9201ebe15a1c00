use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::entities::bar::{Bar, VolumeAtPrice};
use crate::domain::entities::trade::Trade;
use crate::domain::errors::EngineError;
use crate::domain::value_objects::time::{time_string, MicroSec};

/// Half-open time range `[start, end)` covered by a store; `0..0` is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRange {
    pub start: MicroSec,
    pub end: MicroSec,
}

impl TradeRange {
    pub fn new(start: MicroSec, end: MicroSec) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl std::fmt::Display for TradeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "[empty]")
        } else {
            write!(f, "[{} - {})", time_string(self.start), time_string(self.end))
        }
    }
}

/// Read surface of a market, for agents and external consumers
#[async_trait]
pub trait MarketQuery: Send + Sync {
    /// Merged trades in `[start, end)`; zero means open-ended.
    async fn select_trades(&self, start: MicroSec, end: MicroSec) -> Result<Vec<Trade>, EngineError>;

    /// Memoized bars; see the bar cache for staleness rules.
    async fn ohlcv(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Result<Arc<Vec<Bar>>, EngineError>;

    async fn vap(&self, start: MicroSec, end: MicroSec, price_unit: f64) -> Result<Vec<VolumeAtPrice>, EngineError>;

    async fn archive_info(&self) -> Result<TradeRange, EngineError>;

    async fn db_info(&self) -> Result<TradeRange, EngineError>;

    async fn start_time(&self) -> Result<MicroSec, EngineError>;

    async fn end_time(&self) -> Result<MicroSec, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_display_and_emptiness() {
        assert!(TradeRange::default().is_empty());
        assert_eq!(TradeRange::default().to_string(), "[empty]");

        let range = TradeRange::new(0, 1_000_000);
        assert!(!range.is_empty());
        assert_eq!(
            range.to_string(),
            "[1970-01-01T00:00:00.000000Z - 1970-01-01T00:00:01.000000Z)"
        );
    }
}
