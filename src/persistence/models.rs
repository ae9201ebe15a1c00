//! Database Models
//!
//! Row types for the trade archive and recent store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::DatabaseError;
use crate::domain::entities::trade::{Liquidity, OrderSide, Trade};

/// Trade row, shared by `archive_trades` and `recent_trades`
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub seq: i64,
    pub time: i64,
    pub side: String, // "Buy" or "Sell"
    pub price: f64,
    pub size: f64,
    pub liquidity: String,
    pub trade_id: String,
}

impl TradeRecord {
    pub fn to_trade(&self) -> Result<Trade, DatabaseError> {
        let side = self
            .side
            .parse::<OrderSide>()
            .map_err(|e| DatabaseError::QueryError(format!("row {}: {}", self.seq, e)))?;
        let liquidity = self.liquidity.parse::<Liquidity>().unwrap_or(Liquidity::Unknown);

        Ok(Trade {
            time: self.time,
            side,
            price: self.price,
            size: self.size,
            liquidity,
            id: self.trade_id.clone(),
        })
    }
}

/// Committed archive day
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArchiveDayRecord {
    pub market_key: String,
    pub day: i64,
    pub trade_count: i64,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub committed_at: DateTime<Utc>,
}
