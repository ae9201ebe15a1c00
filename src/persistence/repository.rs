//! Database Repository
//!
//! Data access for the per-market trade archive and recent store.
//! Every multi-row write runs in one transaction, so a reader sees a day
//! or a gap-fill batch either entirely or not at all.

use super::models::*;
use super::{DatabaseError, DbPool};
use chrono::Utc;
use tracing::{debug, error};

use crate::domain::entities::trade::Trade;
use crate::domain::value_objects::time::MicroSec;

const ARCHIVE_TABLE: &str = "archive_trades";
const RECENT_TABLE: &str = "recent_trades";

/// Converts an open-ended `end` (0) into an inclusive-safe upper bound.
fn upper_bound(end: MicroSec) -> MicroSec {
    if end <= 0 {
        MicroSec::MAX
    } else {
        end
    }
}

async fn select_from(
    pool: &DbPool,
    table: &'static str,
    market_key: &str,
    start: MicroSec,
    end: MicroSec,
) -> Result<Vec<Trade>, DatabaseError> {
    let sql = format!(
        "SELECT seq, time, side, price, size, liquidity, trade_id FROM {} \
         WHERE market_key = ?1 AND time >= ?2 AND time < ?3 ORDER BY time, seq",
        table
    );
    let records = sqlx::query_as::<_, TradeRecord>(&sql)
        .bind(market_key)
        .bind(start)
        .bind(upper_bound(end))
        .fetch_all(pool)
        .await
        .map_err(|e| {
            error!("Failed to select trades from {}: {}", table, e);
            DatabaseError::QueryError(format!("Failed to select trades: {}", e))
        })?;

    records.iter().map(|r| r.to_trade()).collect()
}

async fn count_from(
    pool: &DbPool,
    table: &'static str,
    market_key: &str,
    start: MicroSec,
    end: MicroSec,
) -> Result<i64, DatabaseError> {
    let sql = format!(
        "SELECT COUNT(*) FROM {} WHERE market_key = ?1 AND time >= ?2 AND time < ?3",
        table
    );
    let count: (i64,) = sqlx::query_as(&sql)
        .bind(market_key)
        .bind(start)
        .bind(upper_bound(end))
        .fetch_one(pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to count trades: {}", e)))?;

    Ok(count.0)
}

/// `(first trade time, last trade time + 1)`; `None` when the table holds
/// nothing for the market.
async fn bounds_of(
    pool: &DbPool,
    table: &'static str,
    market_key: &str,
) -> Result<Option<(MicroSec, MicroSec)>, DatabaseError> {
    let sql = format!(
        "SELECT MIN(time), MAX(time) FROM {} WHERE market_key = ?1",
        table
    );
    let (min, max): (Option<i64>, Option<i64>) = sqlx::query_as(&sql)
        .bind(market_key)
        .fetch_one(pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to read bounds: {}", e)))?;

    Ok(match (min, max) {
        (Some(min), Some(max)) => Some((min, max + 1)),
        _ => None,
    })
}

/// Immutable per-day archive segments
#[derive(Clone)]
pub struct ArchiveRepository {
    pool: DbPool,
}

impl ArchiveRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Commit one day segment. Trades already present are ignored; with
    /// `force` the day is deleted first and rewritten. Returns the number of
    /// rows inserted.
    pub async fn write_day(
        &self,
        market_key: &str,
        day: MicroSec,
        trades: &[Trade],
        force: bool,
    ) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        if force {
            sqlx::query("DELETE FROM archive_trades WHERE market_key = ?1 AND day = ?2")
                .bind(market_key)
                .bind(day)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    DatabaseError::QueryError(format!("Failed to clear archive day: {}", e))
                })?;
        }

        let mut inserted = 0;
        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO archive_trades (
                    market_key, day, time, side, price, size, liquidity, trade_id
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(market_key)
            .bind(day)
            .bind(trade.time)
            .bind(trade.side.as_str())
            .bind(trade.price)
            .bind(trade.size)
            .bind(trade.liquidity.as_str())
            .bind(&trade.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to archive trade at {}: {}", trade.time, e);
                DatabaseError::QueryError(format!("Failed to archive trade: {}", e))
            })?;
            inserted += result.rows_affected();
        }

        let (count, start_time, end_time): (i64, Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT COUNT(*), MIN(time), MAX(time) FROM archive_trades WHERE market_key = ?1 AND day = ?2",
        )
        .bind(market_key)
        .bind(day)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to summarize day: {}", e)))?;

        sqlx::query(
            r#"
            INSERT INTO archive_days (market_key, day, trade_count, start_time, end_time, committed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(market_key, day) DO UPDATE SET
                trade_count = excluded.trade_count,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                committed_at = excluded.committed_at
            "#,
        )
        .bind(market_key)
        .bind(day)
        .bind(count)
        .bind(start_time)
        .bind(end_time)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to record archive day: {}", e)))?;

        tx.commit().await?;

        debug!(
            "Archived {} trades ({} new) for {} day {}",
            count, inserted, market_key, day
        );
        Ok(inserted)
    }

    pub async fn has_day(&self, market_key: &str, day: MicroSec) -> Result<bool, DatabaseError> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT day FROM archive_days WHERE market_key = ?1 AND day = ?2")
                .bind(market_key)
                .bind(day)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| DatabaseError::QueryError(format!("Failed to look up day: {}", e)))?;

        Ok(found.is_some())
    }

    pub async fn days(&self, market_key: &str) -> Result<Vec<ArchiveDayRecord>, DatabaseError> {
        sqlx::query_as::<_, ArchiveDayRecord>(
            "SELECT * FROM archive_days WHERE market_key = ?1 ORDER BY day",
        )
        .bind(market_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::QueryError(format!("Failed to list archive days: {}", e)))
    }

    pub async fn bounds(&self, market_key: &str) -> Result<Option<(MicroSec, MicroSec)>, DatabaseError> {
        bounds_of(&self.pool, ARCHIVE_TABLE, market_key).await
    }

    pub async fn select(
        &self,
        market_key: &str,
        start: MicroSec,
        end: MicroSec,
    ) -> Result<Vec<Trade>, DatabaseError> {
        select_from(&self.pool, ARCHIVE_TABLE, market_key, start, end).await
    }

    pub async fn count(&self, market_key: &str, start: MicroSec, end: MicroSec) -> Result<i64, DatabaseError> {
        count_from(&self.pool, ARCHIVE_TABLE, market_key, start, end).await
    }
}

/// Append-only store for the not-yet-archived period
#[derive(Clone)]
pub struct RecentRepository {
    pool: DbPool,
}

impl RecentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a batch in one transaction; duplicates are ignored. Returns
    /// the number of rows inserted.
    pub async fn insert_batch(&self, market_key: &str, trades: &[Trade]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let mut inserted = 0;
        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO recent_trades (
                    market_key, time, side, price, size, liquidity, trade_id
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(market_key)
            .bind(trade.time)
            .bind(trade.side.as_str())
            .bind(trade.price)
            .bind(trade.size)
            .bind(trade.liquidity.as_str())
            .bind(&trade.id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to insert recent trade at {}: {}", trade.time, e);
                DatabaseError::QueryError(format!("Failed to insert recent trade: {}", e))
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;

        debug!("Inserted {} of {} recent trades for {}", inserted, trades.len(), market_key);
        Ok(inserted)
    }

    /// Drop rows strictly older than `time`.
    pub async fn expire_before(&self, market_key: &str, time: MicroSec) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM recent_trades WHERE market_key = ?1 AND time < ?2")
            .bind(market_key)
            .bind(time)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::QueryError(format!("Failed to expire recent trades: {}", e)))?;

        Ok(result.rows_affected())
    }

    pub async fn bounds(&self, market_key: &str) -> Result<Option<(MicroSec, MicroSec)>, DatabaseError> {
        bounds_of(&self.pool, RECENT_TABLE, market_key).await
    }

    pub async fn select(
        &self,
        market_key: &str,
        start: MicroSec,
        end: MicroSec,
    ) -> Result<Vec<Trade>, DatabaseError> {
        select_from(&self.pool, RECENT_TABLE, market_key, start, end).await
    }

    pub async fn count(&self, market_key: &str, start: MicroSec, end: MicroSec) -> Result<i64, DatabaseError> {
        count_from(&self.pool, RECENT_TABLE, market_key, start, end).await
    }
}
