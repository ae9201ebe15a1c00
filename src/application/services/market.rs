use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::domain::entities::bar::{Bar, VolumeAtPrice};
use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::trade::Trade;
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_client::MarketDataSource;
use crate::domain::repositories::market_query::{MarketQuery, TradeRange};
use crate::domain::services::bar_aggregator;
use crate::domain::services::bar_cache::{BarCache, BarKey};
use crate::domain::value_objects::time::{self, MicroSec};
use crate::persistence::DbPool;

use super::trade_store::{Coverage, DownloadReport, TradeStore};

/// One opened market: its trade store, bar cache and venue data source
///
/// Bars are memoized per `(start, end, window)` and stay as computed until
/// [`Market::ohlcv_fresh`] replaces them; downloads only flag overlapping
/// entries as stale.
pub struct Market {
    config: MarketConfig,
    source: Arc<dyn MarketDataSource>,
    store: TradeStore,
    cache: Mutex<BarCache>,
}

impl Market {
    pub fn new(
        config: MarketConfig,
        pool: DbPool,
        source: Arc<dyn MarketDataSource>,
        store_config: StoreConfig,
    ) -> Self {
        let cache = BarCache::new(store_config.bar_cache_capacity);
        Self {
            store: TradeStore::new(config.clone(), pool, source.clone(), store_config),
            config,
            source,
            cache: Mutex::new(cache),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn store(&self) -> &TradeStore {
        &self.store
    }

    /// Archive `n_days` and close the gap to now, flagging affected bars.
    pub async fn download(&self, n_days: i64, force: bool) -> Result<DownloadReport, EngineError> {
        info!(
            "Downloading {} days of {} from {} (force={})",
            n_days,
            self.config.key(),
            self.source.name(),
            force
        );
        let report = self.store.ensure_coverage(n_days, force).await?;
        self.invalidate(&report.extended).await;
        Ok(report)
    }

    /// Extend the recent store to now, flagging affected bars.
    pub async fn fill_gap(&self) -> Result<TradeRange, EngineError> {
        let range = self.store.fill_gap().await?;
        if !range.is_empty() {
            self.invalidate(&[range]).await;
        }
        Ok(range)
    }

    /// Persist live trades.
    pub async fn ingest(&self, trades: &[Trade]) -> Result<(), EngineError> {
        if let Some(range) = self.store.ingest(trades).await? {
            self.invalidate(&[range]).await;
        }
        Ok(())
    }

    pub async fn check_coverage(&self) -> Result<Coverage, EngineError> {
        self.store.check_coverage().await
    }

    async fn invalidate(&self, ranges: &[TradeRange]) {
        let mut cache = self.cache.lock().await;
        for range in ranges {
            let flagged = cache.mark_stale(range.start, range.end);
            if flagged > 0 {
                debug!("{} cached bar sets overlap {} and are now stale", flagged, range);
            }
        }
    }

    async fn compute_bars(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Result<Vec<Bar>, EngineError> {
        if window_sec <= 0 {
            return Err(EngineError::InvalidArgument(format!(
                "bar window must be positive, got {}",
                window_sec
            )));
        }
        let trades = self.store.query_range(start, end).await?;
        Ok(bar_aggregator::aggregate(&trades, window_sec, end))
    }

    /// Recompute bars and replace the memoized entry.
    pub async fn ohlcv_fresh(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Result<Arc<Vec<Bar>>, EngineError> {
        let bars = self.compute_bars(start, end, window_sec).await?;
        let key = BarKey { start, end, window_sec };
        let covered = (start, if end > 0 { end } else { MicroSec::MAX });
        let mut cache = self.cache.lock().await;
        Ok(cache.insert(key, bars, covered, time::now()))
    }

    /// Compute bars without touching the memo, for queries whose end moves
    /// with every print.
    pub async fn ohlcv_uncached(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Result<Arc<Vec<Bar>>, EngineError> {
        Ok(Arc::new(self.compute_bars(start, end, window_sec).await?))
    }

    /// `None` when the query has not been memoized.
    pub async fn is_stale(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Option<bool> {
        let cache = self.cache.lock().await;
        cache.is_stale(&BarKey { start, end, window_sec })
    }

    pub async fn cached_bar_sets(&self) -> usize {
        self.cache.lock().await.len()
    }

    pub async fn board_snapshot(&self) -> Result<BoardSnapshot, EngineError> {
        let mut board = self.source.board_snapshot(&self.config).await?;
        board.truncate(self.config.board_depth);
        Ok(board)
    }
}

#[async_trait]
impl MarketQuery for Market {
    async fn select_trades(&self, start: MicroSec, end: MicroSec) -> Result<Vec<Trade>, EngineError> {
        self.store.query_range(start, end).await
    }

    async fn ohlcv(&self, start: MicroSec, end: MicroSec, window_sec: i64) -> Result<Arc<Vec<Bar>>, EngineError> {
        let key = BarKey { start, end, window_sec };
        if let Some(bars) = self.cache.lock().await.get(&key) {
            return Ok(bars);
        }
        self.ohlcv_fresh(start, end, window_sec).await
    }

    async fn vap(&self, start: MicroSec, end: MicroSec, price_unit: f64) -> Result<Vec<VolumeAtPrice>, EngineError> {
        if price_unit <= 0.0 {
            return Err(EngineError::InvalidArgument(format!(
                "price unit must be positive, got {}",
                price_unit
            )));
        }
        let trades = self.store.query_range(start, end).await?;
        Ok(bar_aggregator::volume_at_price(&trades, price_unit))
    }

    async fn archive_info(&self) -> Result<TradeRange, EngineError> {
        self.store.archive_bounds().await
    }

    async fn db_info(&self) -> Result<TradeRange, EngineError> {
        self.store.recent_bounds().await
    }

    async fn start_time(&self) -> Result<MicroSec, EngineError> {
        self.store.start_time().await
    }

    async fn end_time(&self) -> Result<MicroSec, EngineError> {
        self.store.end_time().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::trade_store::tests::{test_store_config, MinuteSource};
    use crate::domain::entities::trade::OrderSide;
    use crate::persistence::{init_database, DatabaseConfig};

    async fn market() -> Market {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        Market::new(
            MarketConfig::binance_spot("BTC", "USDT"),
            pool,
            Arc::new(MinuteSource::new()),
            test_store_config(),
        )
    }

    #[tokio::test]
    async fn test_bars_stay_memoized_until_fresh_request() {
        let market = market().await;
        let base = time::floor_day(time::now()) - time::days(1);
        let first: Vec<Trade> = (0..5)
            .map(|i| Trade::new(base + time::minutes(i), OrderSide::Buy, 100.0, 1.0, "a"))
            .collect();
        market.ingest(&first).await.unwrap();

        let end = base + time::minutes(20);
        let before = market.ohlcv(base, end, 300).await.unwrap();
        assert_eq!(before.len(), 1);

        // new trades land inside the memoized range
        let late = vec![Trade::new(base + time::minutes(12), OrderSide::Sell, 101.0, 2.0, "b")];
        market.ingest(&late).await.unwrap();

        assert_eq!(market.is_stale(base, end, 300).await, Some(true));
        let still = market.ohlcv(base, end, 300).await.unwrap();
        assert_eq!(still.len(), before.len());

        let fresh = market.ohlcv_fresh(base, end, 300).await.unwrap();
        assert_eq!(fresh.len(), 2);
        assert_eq!(market.is_stale(base, end, 300).await, Some(false));
        assert_eq!(market.ohlcv(base, end, 300).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_gap_fill_inside_memoized_range_leaves_bars_unchanged() {
        let market = market().await;
        let base = time::floor_sec(time::now() - time::minutes(30), 60);
        market
            .ingest(&[Trade::new(base, OrderSide::Buy, 100.0, 1.0, "seed")])
            .await
            .unwrap();

        let end = base + time::minutes(90);
        let before = market.ohlcv(base, end, 60).await.unwrap();
        assert_eq!(before.len(), 1);

        // the venue's minute prints since `base` land inside the cached range
        let filled = market.fill_gap().await.unwrap();
        assert!(!filled.is_empty());
        assert_eq!(market.is_stale(base, end, 60).await, Some(true));

        let still = market.ohlcv(base, end, 60).await.unwrap();
        assert!(Arc::ptr_eq(&before, &still));

        let fresh = market.ohlcv_fresh(base, end, 60).await.unwrap();
        assert!(fresh.len() > before.len());
        assert_eq!(market.is_stale(base, end, 60).await, Some(false));
    }

    #[tokio::test]
    async fn test_invalid_query_arguments() {
        let market = market().await;
        assert!(matches!(
            market.ohlcv(0, 0, 0).await,
            Err(EngineError::InvalidArgument(_))
        ));
        assert!(market.vap(0, 0, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_query_surface_reports_bounds() {
        let market = market().await;
        assert!(market.archive_info().await.unwrap().is_empty());

        market.fill_gap().await.unwrap();
        let db = market.db_info().await.unwrap();
        assert!(!db.is_empty());
        assert_eq!(market.start_time().await.unwrap(), db.start);
        assert_eq!(market.end_time().await.unwrap(), db.end);
        assert!(market.board_snapshot().await.is_err());
    }
}
