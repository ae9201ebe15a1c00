use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::value_objects::time::MicroSec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
    /// Placeholder for cleared or unparseable sides
    Unknown,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
            OrderSide::Unknown => OrderSide::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "Buy",
            OrderSide::Sell => "Sell",
            OrderSide::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "b" => Ok(OrderSide::Buy),
            "sell" | "s" => Ok(OrderSide::Sell),
            other => Err(format!("Unknown order side: {}", other)),
        }
    }
}

/// Which side of the book the recorded trade took liquidity from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Liquidity {
    Taker,
    Maker,
    Unknown,
}

impl Liquidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Taker => "Taker",
            Liquidity::Maker => "Maker",
            Liquidity::Unknown => "Unknown",
        }
    }
}

impl FromStr for Liquidity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Taker" => Ok(Liquidity::Taker),
            "Maker" => Ok(Liquidity::Maker),
            "Unknown" => Ok(Liquidity::Unknown),
            other => Err(format!("Unknown liquidity flag: {}", other)),
        }
    }
}

/// A single executed trade print. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub time: MicroSec,
    pub side: OrderSide,
    pub price: f64,
    pub size: f64,
    pub liquidity: Liquidity,
    pub id: String,
}

/// Dedup identity of a trade: (time, price bits, size bits, side)
pub type TradeIdentity = (MicroSec, u64, u64, OrderSide);

impl Trade {
    pub fn new(time: MicroSec, side: OrderSide, price: f64, size: f64, id: &str) -> Self {
        Self {
            time,
            side,
            price,
            size,
            liquidity: Liquidity::Taker,
            id: id.to_string(),
        }
    }

    pub fn identity(&self) -> TradeIdentity {
        (self.time, self.price.to_bits(), self.size.to_bits(), self.side)
    }

    pub fn is_valid(&self) -> bool {
        self.side != OrderSide::Unknown
            && self.price.is_finite()
            && self.price > 0.0
            && self.size.is_finite()
            && self.size > 0.0
    }
}
