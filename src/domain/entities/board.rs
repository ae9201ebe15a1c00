use serde::{Deserialize, Serialize};

use crate::domain::value_objects::time::MicroSec;

/// One side level: (price, size)
pub type BoardLevel = (f64, f64);

/// Order book snapshot as published by a venue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub time: MicroSec,
    /// Sorted best (highest) first
    pub bids: Vec<BoardLevel>,
    /// Sorted best (lowest) first
    pub asks: Vec<BoardLevel>,
}

impl BoardSnapshot {
    pub fn new(time: MicroSec, mut bids: Vec<BoardLevel>, mut asks: Vec<BoardLevel>) -> Self {
        bids.retain(|(_, size)| *size > 0.0);
        asks.retain(|(_, size)| *size > 0.0);
        bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        asks.sort_by(|a, b| a.0.total_cmp(&b.0));

        Self { time, bids, asks }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(price, _)| *price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(price, _)| *price)
    }

    pub fn truncate(&mut self, depth: usize) {
        self.bids.truncate(depth);
        self.asks.truncate(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_sorts_and_drops_empty_levels() {
        let board = BoardSnapshot::new(
            1,
            vec![(99.0, 1.0), (100.0, 2.0), (98.0, 0.0)],
            vec![(102.0, 1.0), (101.0, 3.0)],
        );
        assert_eq!(board.best_bid(), Some(100.0));
        assert_eq!(board.best_ask(), Some(101.0));
        assert_eq!(board.bids.len(), 2);
    }

    #[test]
    fn test_empty_board_has_no_edges() {
        let board = BoardSnapshot::default();
        assert_eq!(board.best_bid(), None);
        assert_eq!(board.best_ask(), None);
    }
}
