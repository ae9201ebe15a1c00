use serde::{Deserialize, Serialize};

use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::value_objects::time::MicroSec;

/// Where the current best bid/ask came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeSource {
    /// Nothing seen yet
    Unset,
    /// Inferred from trade prints. Backtests only have trades, so the book
    /// edge is approximated: a buy print is taken as the ask, a sell print
    /// as the bid, and the opposite edge is pushed one tick away if the two
    /// would cross.
    TradeApproximation,
    /// Read from a venue order book snapshot
    BoardSnapshot,
}

/// Best bid/ask for one market
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookState {
    bid_edge: f64,
    ask_edge: f64,
    source: EdgeSource,
    updated_at: MicroSec,
}

impl Default for BookState {
    fn default() -> Self {
        Self {
            bid_edge: 0.0,
            ask_edge: 0.0,
            source: EdgeSource::Unset,
            updated_at: 0,
        }
    }
}

impl BookState {
    pub fn bid_edge(&self) -> f64 {
        self.bid_edge
    }

    pub fn ask_edge(&self) -> f64 {
        self.ask_edge
    }

    pub fn source(&self) -> EdgeSource {
        self.source
    }

    pub fn updated_at(&self) -> MicroSec {
        self.updated_at
    }

    /// Both edges known.
    pub fn is_ready(&self) -> bool {
        self.bid_edge > 0.0 && self.ask_edge > 0.0
    }

    pub fn mid(&self) -> Option<f64> {
        if self.is_ready() {
            Some((self.bid_edge + self.ask_edge) / 2.0)
        } else {
            None
        }
    }

    pub fn apply_trade(&mut self, trade: &Trade, price_unit: f64) {
        match trade.side {
            OrderSide::Buy => {
                self.ask_edge = trade.price;
                if self.ask_edge <= self.bid_edge {
                    self.bid_edge = self.ask_edge - price_unit;
                }
            }
            OrderSide::Sell => {
                self.bid_edge = trade.price;
                if self.ask_edge <= self.bid_edge {
                    self.ask_edge = self.bid_edge + price_unit;
                }
            }
            OrderSide::Unknown => return,
        }
        // a snapshot stays authoritative until the next snapshot
        if self.source != EdgeSource::BoardSnapshot {
            self.source = EdgeSource::TradeApproximation;
        }
        self.updated_at = trade.time;
    }

    pub fn apply_board(&mut self, board: &BoardSnapshot) {
        if let Some(bid) = board.best_bid() {
            self.bid_edge = bid;
        }
        if let Some(ask) = board.best_ask() {
            self.ask_edge = ask;
        }
        self.source = EdgeSource::BoardSnapshot;
        self.updated_at = board.time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trade_prints_set_edges() {
        let mut book = BookState::default();
        assert!(!book.is_ready());

        book.apply_trade(&Trade::new(1, OrderSide::Buy, 101.0, 1.0, ""), 0.5);
        assert_eq!(book.ask_edge(), 101.0);
        assert!(!book.is_ready());

        book.apply_trade(&Trade::new(2, OrderSide::Sell, 100.0, 1.0, ""), 0.5);
        assert_eq!(book.bid_edge(), 100.0);
        assert!(book.is_ready());
        assert_eq!(book.source(), EdgeSource::TradeApproximation);
    }

    #[test]
    fn test_crossing_print_pushes_other_edge() {
        let mut book = BookState::default();
        book.apply_trade(&Trade::new(1, OrderSide::Buy, 101.0, 1.0, ""), 0.5);
        book.apply_trade(&Trade::new(2, OrderSide::Sell, 102.0, 1.0, ""), 0.5);
        assert_eq!(book.bid_edge(), 102.0);
        assert_eq!(book.ask_edge(), 102.5);

        book.apply_trade(&Trade::new(3, OrderSide::Buy, 101.0, 1.0, ""), 0.5);
        assert_eq!(book.ask_edge(), 101.0);
        assert_eq!(book.bid_edge(), 100.5);
    }

    #[test]
    fn test_board_snapshot_overrides() {
        let mut book = BookState::default();
        book.apply_board(&BoardSnapshot::new(5, vec![(99.0, 1.0)], vec![(99.5, 1.0)]));
        assert_eq!(book.source(), EdgeSource::BoardSnapshot);
        assert_eq!(book.mid(), Some(99.25));
    }
}
