//! Per-market trade history
//!
//! Two logical stores back every market: an archive of immutable day
//! segments and an append-only recent store for the period the archive does
//! not cover yet. Queries merge both, split at the archive end, so the
//! result is ordered and free of duplicates.
//!
//! Writers are serialized by one mutex and download outside of any lock;
//! only the commit of a finished batch takes the write side of the commit
//! lock. Readers hold its read side for the duration of a query, so they
//! see a range either before or after a commit, never half of it.

use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::trade::Trade;
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_client::{MarketDataSource, TradePage};
use crate::domain::repositories::market_query::TradeRange;
use crate::domain::value_objects::time::{self, date_string, floor_day, MicroSec};
use crate::persistence::repository::{ArchiveRepository, RecentRepository};
use crate::persistence::DbPool;
use crate::task_runner::retry_with_backoff;

/// Coverage of both stores at one instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coverage {
    pub archive: TradeRange,
    pub recent: TradeRange,
}

/// Outcome of [`TradeStore::ensure_coverage`]
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// Day starts written to the archive
    pub days_fetched: Vec<MicroSec>,
    /// Day starts already archived and left alone
    pub days_skipped: Vec<MicroSec>,
    /// Rows that were new to the store
    pub trades_inserted: u64,
    /// Range appended to the recent store, if any
    pub recent: Option<TradeRange>,
    /// Ranges whose content may have changed
    pub extended: Vec<TradeRange>,
    /// `DownloadFailed` per day or page that could not be fetched
    pub failures: Vec<EngineError>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct TradeStore {
    config: MarketConfig,
    market_key: String,
    store_config: StoreConfig,
    source: Arc<dyn MarketDataSource>,
    archive: ArchiveRepository,
    recent: RecentRepository,
    writer: Mutex<()>,
    commit: RwLock<()>,
}

impl TradeStore {
    pub fn new(
        config: MarketConfig,
        pool: DbPool,
        source: Arc<dyn MarketDataSource>,
        store_config: StoreConfig,
    ) -> Self {
        Self {
            market_key: config.key().to_string(),
            config,
            store_config,
            source,
            archive: ArchiveRepository::new(pool.clone()),
            recent: RecentRepository::new(pool),
            writer: Mutex::new(()),
            commit: RwLock::new(()),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Merged trades in `[start, end)`; `0` leaves that side open.
    pub async fn query_range(&self, start: MicroSec, end: MicroSec) -> Result<Vec<Trade>, EngineError> {
        if end > 0 && end <= start {
            return Ok(Vec::new());
        }
        let _read = self.commit.read().await;

        let archive_end = match self.archive.bounds(&self.market_key).await? {
            Some((_, archive_end)) => archive_end,
            None => return Ok(self.recent.select(&self.market_key, start, end).await?),
        };

        let mut trades = if start < archive_end {
            let split = if end > 0 { end.min(archive_end) } else { archive_end };
            self.archive.select(&self.market_key, start, split).await?
        } else {
            Vec::new()
        };

        if end <= 0 || end > archive_end {
            let recent = self
                .recent
                .select(&self.market_key, start.max(archive_end), end)
                .await?;
            trades.extend(recent);
        }

        Ok(trades)
    }

    pub async fn archive_bounds(&self) -> Result<TradeRange, EngineError> {
        let bounds = self.archive.bounds(&self.market_key).await?;
        Ok(bounds.map(|(s, e)| TradeRange::new(s, e)).unwrap_or_default())
    }

    pub async fn recent_bounds(&self) -> Result<TradeRange, EngineError> {
        let bounds = self.recent.bounds(&self.market_key).await?;
        Ok(bounds.map(|(s, e)| TradeRange::new(s, e)).unwrap_or_default())
    }

    /// Both bounds, or `CoverageGap` when the recent store starts more than
    /// `gap_tolerance_sec` after the archive ends.
    pub async fn check_coverage(&self) -> Result<Coverage, EngineError> {
        let _read = self.commit.read().await;
        let coverage = Coverage {
            archive: self.archive_bounds().await?,
            recent: self.recent_bounds().await?,
        };

        if !coverage.archive.is_empty()
            && !coverage.recent.is_empty()
            && coverage.recent.start > coverage.archive.end + time::sec(self.store_config.gap_tolerance_sec)
        {
            warn!(
                "Coverage gap in {}: archive {} recent {}",
                self.market_key, coverage.archive, coverage.recent
            );
            return Err(EngineError::CoverageGap {
                archive_end: coverage.archive.end,
                recent_start: coverage.recent.start,
            });
        }

        Ok(coverage)
    }

    /// Archive start if an archive exists, else the recent start; 0 when empty.
    pub async fn start_time(&self) -> Result<MicroSec, EngineError> {
        let archive = self.archive_bounds().await?;
        if !archive.is_empty() {
            return Ok(archive.start);
        }
        Ok(self.recent_bounds().await?.start)
    }

    pub async fn end_time(&self) -> Result<MicroSec, EngineError> {
        let archive = self.archive_bounds().await?;
        let recent = self.recent_bounds().await?;
        Ok(archive.end.max(recent.end))
    }

    pub async fn count_archive(&self, start: MicroSec, end: MicroSec) -> Result<i64, EngineError> {
        Ok(self.archive.count(&self.market_key, start, end).await?)
    }

    pub async fn count_recent(&self, start: MicroSec, end: MicroSec) -> Result<i64, EngineError> {
        Ok(self.recent.count(&self.market_key, start, end).await?)
    }

    /// Make sure the last `n_days` complete days are archived and the recent
    /// store reaches to now.
    ///
    /// Days already archived are skipped unless `force` is set, in which case
    /// they are re-fetched and rewritten. A day or page that cannot be
    /// fetched is recorded in the report and the rest proceeds.
    pub async fn ensure_coverage(&self, n_days: i64, force: bool) -> Result<DownloadReport, EngineError> {
        if n_days < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "n_days must not be negative, got {}",
                n_days
            )));
        }
        let _writer = self.writer.lock().await;
        let mut report = DownloadReport::default();

        if n_days > 0 {
            self.archive_days(n_days, force, &mut report).await?;
        }

        match self.fill_gap_locked().await {
            Ok(range) => {
                if !range.is_empty() {
                    report.extended.push(range);
                    report.recent = Some(range);
                }
            }
            Err(e) if e.is_recoverable() => report.failures.push(e),
            Err(e) => return Err(e),
        }

        info!(
            "Coverage for {}: {} days fetched, {} skipped, {} new trades, {} failures",
            self.market_key,
            report.days_fetched.len(),
            report.days_skipped.len(),
            report.trades_inserted,
            report.failures.len()
        );
        Ok(report)
    }

    async fn archive_days(&self, n_days: i64, force: bool, report: &mut DownloadReport) -> Result<(), EngineError> {
        let policy = &self.store_config.retry;
        let latest = match retry_with_backoff("latest_archive_day", policy, || {
            self.source.latest_archive_day(&self.config)
        })
        .await
        {
            Ok(day) => day,
            Err((attempts, e)) => {
                report.failures.push(EngineError::DownloadFailed {
                    what: format!("{} latest archive day", self.market_key),
                    attempts,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        // today is still being written by the venue
        let yesterday = floor_day(time::now()) - time::days(1);
        let latest = floor_day(latest).min(yesterday);
        let first = latest - time::days(n_days - 1);

        let mut day = first;
        while day <= latest {
            if !force && self.archive.has_day(&self.market_key, day).await? {
                debug!("Archive day {} already present for {}", date_string(day), self.market_key);
                report.days_skipped.push(day);
                day += time::days(1);
                continue;
            }

            let fetched = retry_with_backoff("fetch_archive_day", policy, || {
                self.source.fetch_archive_day(&self.config, day)
            })
            .await;

            match fetched {
                Ok(trades) => {
                    let trades: Vec<Trade> = trades
                        .into_iter()
                        .filter(|t| t.is_valid() && floor_day(t.time) == day)
                        .collect();
                    let inserted = {
                        let _commit = self.commit.write().await;
                        self.archive.write_day(&self.market_key, day, &trades, force).await?
                    };
                    info!(
                        "Archived {} {}: {} trades ({} new)",
                        self.market_key,
                        date_string(day),
                        trades.len(),
                        inserted
                    );
                    report.trades_inserted += inserted;
                    report.days_fetched.push(day);
                    report.extended.push(TradeRange::new(day, day + time::days(1)));
                }
                Err((attempts, e)) => {
                    warn!("Giving up on {} {}: {}", self.market_key, date_string(day), e);
                    report.failures.push(EngineError::DownloadFailed {
                        what: format!("{} {}", self.market_key, date_string(day)),
                        attempts,
                        reason: e.to_string(),
                    });
                }
            }
            day += time::days(1);
        }

        if !report.days_fetched.is_empty() {
            self.expire_recent().await?;
        }
        Ok(())
    }

    /// Recent rows now covered by the archive are dropped.
    async fn expire_recent(&self) -> Result<(), EngineError> {
        if let Some((_, archive_end)) = self.archive.bounds(&self.market_key).await? {
            let _commit = self.commit.write().await;
            let expired = self.recent.expire_before(&self.market_key, archive_end).await?;
            if expired > 0 {
                debug!("Expired {} recent trades of {} now archived", expired, self.market_key);
            }
        }
        Ok(())
    }

    /// Extend the recent store forward to now.
    ///
    /// Pages are followed until the venue reports the range exhausted; empty
    /// pages only move the cursor. Returns the range that was appended,
    /// `[start, last new trade + 1)`, empty when the venue had nothing new.
    /// When `max_fill_pages` runs out first, only the contiguous paged prefix
    /// is committed.
    pub async fn fill_gap(&self) -> Result<TradeRange, EngineError> {
        let _writer = self.writer.lock().await;
        self.fill_gap_locked().await
    }

    async fn fill_gap_locked(&self) -> Result<TradeRange, EngineError> {
        let now = time::now();
        let archive = self.archive_bounds().await?;
        let recent = self.recent_bounds().await?;
        let start = match archive.end.max(recent.end) {
            0 => now - time::sec(self.store_config.initial_lookback_sec),
            end => end,
        };
        if start >= now {
            return Ok(TradeRange::new(start, start));
        }

        let policy = &self.store_config.retry;
        let mut batch: Vec<Trade> = Vec::new();
        let mut page = TradePage::New;
        let mut pages = 0;

        while page != TradePage::Done && pages < self.store_config.max_fill_pages {
            let current = page.clone();
            let (trades, next) = retry_with_backoff("fetch_trades", policy, || {
                self.source.fetch_trades(&self.config, start, now, &current)
            })
            .await
            .map_err(|(attempts, e)| EngineError::DownloadFailed {
                what: format!("{} trades from {}", self.market_key, time::time_string(start)),
                attempts,
                reason: e.to_string(),
            })?;

            pages += 1;
            // a quiet window still advances the cursor
            batch.extend(trades);
            page = next;
        }

        let exhausted = page == TradePage::Done;
        if exhausted {
            match retry_with_backoff("fetch_recent_trades", policy, || {
                self.source.fetch_recent_trades(&self.config)
            })
            .await
            {
                Ok(latest) => batch.extend(latest),
                Err((_, e)) => warn!("Recent trades of {} unavailable: {}", self.market_key, e),
            }
        } else {
            // keep only the contiguous paged prefix; the next gap-fill resumes there
            warn!(
                "Gap-fill for {} stopped after {} pages, committing the paged prefix only",
                self.market_key, pages
            );
        }

        batch.retain(|t| t.is_valid() && t.time >= start);
        batch.sort_by_key(|t| t.time);
        if !exhausted {
            // prints sharing the last timestamp may continue on the next page
            if let Some(cut) = batch.last().map(|t| t.time) {
                if batch.first().map_or(false, |t| t.time < cut) {
                    batch.retain(|t| t.time < cut);
                }
            }
        }
        let last = match batch.last() {
            Some(t) => t.time,
            None => return Ok(TradeRange::new(start, start)),
        };

        let inserted = {
            let _commit = self.commit.write().await;
            self.recent.insert_batch(&self.market_key, &batch).await?
        };

        info!(
            "Gap-fill {}: {} trades ({} new) in {}",
            self.market_key,
            batch.len(),
            inserted,
            TradeRange::new(start, last + 1)
        );
        Ok(TradeRange::new(start, last + 1))
    }

    /// Append live trades to the recent store. Returns the range written.
    pub async fn ingest(&self, trades: &[Trade]) -> Result<Option<TradeRange>, EngineError> {
        let valid: Vec<Trade> = trades.iter().filter(|t| t.is_valid()).cloned().collect();
        let (first, last) = match (valid.iter().map(|t| t.time).min(), valid.iter().map(|t| t.time).max()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(None),
        };

        let _writer = self.writer.lock().await;
        let _commit = self.commit.write().await;
        self.recent.insert_batch(&self.market_key, &valid).await?;
        Ok(Some(TradeRange::new(first, last + 1)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::entities::trade::OrderSide;
    use crate::domain::errors::ExchangeError;
    use crate::domain::repositories::exchange_client::ExchangeResult;
    use crate::persistence::{init_database, DatabaseConfig};
    use crate::task_runner::RetryPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Venue with one trade per minute on every day
    pub(crate) struct MinuteSource {
        pub fail_day: Option<MicroSec>,
        pub archive_calls: AtomicU32,
    }

    impl MinuteSource {
        pub(crate) fn new() -> Self {
            Self {
                fail_day: None,
                archive_calls: AtomicU32::new(0),
            }
        }
    }

    fn minute_trades(start: MicroSec, end: MicroSec) -> Vec<Trade> {
        let first = time::floor_sec(start + time::minutes(1) - 1, 60);
        (0..)
            .map(|i| first + time::minutes(i))
            .take_while(|t| *t < end)
            .map(|t| Trade::new(t, OrderSide::Buy, 100.0, 1.0, &t.to_string()))
            .collect()
    }

    #[async_trait]
    impl MarketDataSource for MinuteSource {
        fn name(&self) -> &str {
            "minutes"
        }

        async fn latest_archive_day(&self, _config: &MarketConfig) -> ExchangeResult<MicroSec> {
            Ok(floor_day(time::now()) - time::days(1))
        }

        async fn fetch_archive_day(&self, _config: &MarketConfig, day: MicroSec) -> ExchangeResult<Vec<Trade>> {
            self.archive_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_day == Some(day) {
                return Err(ExchangeError::Network("connection reset".to_string()));
            }
            Ok(minute_trades(day, day + time::days(1)))
        }

        async fn fetch_recent_trades(&self, _config: &MarketConfig) -> ExchangeResult<Vec<Trade>> {
            Ok(vec![])
        }

        async fn fetch_trades(
            &self,
            _config: &MarketConfig,
            start: MicroSec,
            end: MicroSec,
            page: &TradePage,
        ) -> ExchangeResult<(Vec<Trade>, TradePage)> {
            let from = match page {
                TradePage::Time(t) => *t,
                _ => start,
            };
            let to = (from + time::minutes(60)).min(end);
            let next = if to >= end { TradePage::Done } else { TradePage::Time(to) };
            Ok((minute_trades(from, to), next))
        }
    }

    pub(crate) fn test_store_config() -> StoreConfig {
        StoreConfig {
            retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..StoreConfig::default()
        }
    }

    async fn store_with(source: Arc<dyn MarketDataSource>) -> TradeStore {
        store_with_config(source, test_store_config()).await
    }

    async fn store_with_config(source: Arc<dyn MarketDataSource>, store_config: StoreConfig) -> TradeStore {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        TradeStore::new(MarketConfig::binance_spot("BTC", "USDT"), pool, source, store_config)
    }

    /// Minute prints that only begin at `quiet_until`; earlier pages are empty.
    struct QuietStartSource {
        quiet_until: MicroSec,
    }

    #[async_trait]
    impl MarketDataSource for QuietStartSource {
        fn name(&self) -> &str {
            "quiet-start"
        }

        async fn latest_archive_day(&self, _config: &MarketConfig) -> ExchangeResult<MicroSec> {
            Ok(floor_day(time::now()) - time::days(1))
        }

        async fn fetch_archive_day(&self, _config: &MarketConfig, _day: MicroSec) -> ExchangeResult<Vec<Trade>> {
            Ok(vec![])
        }

        async fn fetch_recent_trades(&self, _config: &MarketConfig) -> ExchangeResult<Vec<Trade>> {
            Ok(vec![])
        }

        async fn fetch_trades(
            &self,
            _config: &MarketConfig,
            start: MicroSec,
            end: MicroSec,
            page: &TradePage,
        ) -> ExchangeResult<(Vec<Trade>, TradePage)> {
            let from = match page {
                TradePage::Time(t) => *t,
                _ => start,
            };
            let to = (from + time::minutes(60)).min(end);
            let next = if to >= end { TradePage::Done } else { TradePage::Time(to) };
            Ok((minute_trades(from.max(self.quiet_until), to), next))
        }
    }

    fn lookback_config(hours: i64, max_fill_pages: usize) -> StoreConfig {
        StoreConfig {
            initial_lookback_sec: hours * 3600,
            max_fill_pages,
            ..test_store_config()
        }
    }

    #[tokio::test]
    async fn test_ensure_coverage_archives_days_and_fills_recent() {
        let store = store_with(Arc::new(MinuteSource::new())).await;

        let report = store.ensure_coverage(2, false).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.days_fetched.len(), 2);
        assert!(report.recent.is_some());

        let coverage = store.check_coverage().await.unwrap();
        assert_eq!(coverage.archive.start, floor_day(time::now()) - time::days(2));
        assert!(coverage.recent.start >= coverage.archive.end);

        // merged count equals the sum of both stores
        let merged = store.query_range(0, 0).await.unwrap();
        let archive = store.count_archive(0, 0).await.unwrap();
        let recent = store.count_recent(0, 0).await.unwrap();
        assert_eq!(merged.len() as i64, archive + recent);
        assert!(merged.windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[tokio::test]
    async fn test_second_pass_skips_archived_days() {
        let source = Arc::new(MinuteSource::new());
        let store = store_with(source.clone()).await;

        store.ensure_coverage(2, false).await.unwrap();
        let report = store.ensure_coverage(2, false).await.unwrap();
        assert_eq!(report.days_skipped.len(), 2);
        assert_eq!(source.archive_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_forced_coverage_is_idempotent() {
        let store = store_with(Arc::new(MinuteSource::new())).await;
        let day = floor_day(time::now()) - time::days(1);

        store.ensure_coverage(1, true).await.unwrap();
        let first = store.query_range(day, day + time::days(1)).await.unwrap();
        store.ensure_coverage(1, true).await.unwrap();
        let second = store.query_range(day, day + time::days(1)).await.unwrap();
        assert_eq!(first.len(), 24 * 60);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failed_day_is_reported_not_fatal() {
        let yesterday = floor_day(time::now()) - time::days(1);
        let source = Arc::new(MinuteSource {
            fail_day: Some(yesterday),
            archive_calls: AtomicU32::new(0),
        });
        let store = store_with(source.clone()).await;

        let report = store.ensure_coverage(2, false).await.unwrap();
        assert_eq!(report.days_fetched, vec![yesterday - time::days(1)]);
        assert!(matches!(
            report.failures[0],
            EngineError::DownloadFailed { attempts: 2, .. }
        ));
        // the failing day was retried
        assert_eq!(source.archive_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_query_range_resolves_open_bounds() {
        let store = store_with(Arc::new(MinuteSource::new())).await;
        store.fill_gap().await.unwrap();

        let all = store.query_range(0, 0).await.unwrap();
        assert!(!all.is_empty());
        let start = all[0].time;
        let end = all[all.len() - 1].time + 1;
        assert_eq!(store.start_time().await.unwrap(), start);
        assert_eq!(store.end_time().await.unwrap(), end);
        assert_eq!(store.query_range(start, end).await.unwrap().len(), all.len());
        assert!(store.query_range(end, start).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fill_gap_is_repeatable() {
        let store = store_with(Arc::new(MinuteSource::new())).await;

        let first = store.fill_gap().await.unwrap();
        assert!(!first.is_empty());
        let count = store.count_recent(0, 0).await.unwrap();

        let second = store.fill_gap().await.unwrap();
        assert!(second.start >= first.start);
        assert!(store.count_recent(0, 0).await.unwrap() >= count);
    }

    #[tokio::test]
    async fn test_gap_between_stores_is_surfaced() {
        let store = store_with(Arc::new(MinuteSource::new())).await;
        let day = floor_day(time::now()) - time::days(3);
        let trades = minute_trades(day, day + time::days(1));
        store.archive.write_day(&store.market_key, day, &trades, false).await.unwrap();
        store
            .ingest(&[Trade::new(time::now(), OrderSide::Sell, 100.0, 1.0, "live")])
            .await
            .unwrap();

        let result = store.check_coverage().await;
        assert!(matches!(result, Err(EngineError::CoverageGap { .. })));
    }

    #[tokio::test]
    async fn test_fill_gap_pages_past_a_quiet_window() {
        let quiet_until = time::now() - time::minutes(120);
        let store = store_with_config(
            Arc::new(QuietStartSource { quiet_until }),
            lookback_config(3, 10_000),
        )
        .await;

        let range = store.fill_gap().await.unwrap();
        let stored = store.query_range(0, 0).await.unwrap();
        // two hours of minute prints after the empty first page
        assert!(stored.len() >= 119, "only {} trades stored", stored.len());
        assert!(stored[0].time >= quiet_until);
        assert!(stored[0].time < quiet_until + time::minutes(1));
        assert_eq!(range.end, stored[stored.len() - 1].time + 1);
    }

    #[tokio::test]
    async fn test_fill_gap_page_budget_commits_contiguous_prefix() {
        let store = store_with_config(Arc::new(MinuteSource::new()), lookback_config(3, 1)).await;

        let first = store.fill_gap().await.unwrap();
        let prefix = store.query_range(0, 0).await.unwrap();
        // one hour page, minus the print at the cut
        assert!(!prefix.is_empty());
        assert!(prefix.len() <= 59, "{} trades committed", prefix.len());
        assert!(first.end <= first.start + time::minutes(60));
        assert!(prefix.windows(2).all(|w| w[1].time - w[0].time == time::minutes(1)));

        // later passes resume at the committed end without holes
        for _ in 0..4 {
            store.fill_gap().await.unwrap();
        }
        let all = store.query_range(0, 0).await.unwrap();
        assert!(all.len() >= 3 * 60 - 2, "{} trades after resuming", all.len());
        assert!(all.windows(2).all(|w| w[1].time - w[0].time == time::minutes(1)));
    }

    #[tokio::test]
    async fn test_readers_see_whole_commits_during_fill_gap() {
        let store = Arc::new(store_with(Arc::new(MinuteSource::new())).await);
        let day = floor_day(time::now()) - time::days(1);
        store
            .archive
            .write_day(&store.market_key, day, &minute_trades(day, day + time::days(1)), false)
            .await
            .unwrap();
        let before = store.query_range(0, 0).await.unwrap().len();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move { store.fill_gap().await })
        };
        let mut seen = Vec::new();
        while !writer.is_finished() {
            let snapshot = store.query_range(0, 0).await.unwrap();
            assert!(snapshot.windows(2).all(|w| w[0].time < w[1].time));
            seen.push(snapshot.len());
            tokio::task::yield_now().await;
        }
        writer.await.unwrap().unwrap();
        let after = store.query_range(0, 0).await.unwrap().len();

        assert!(seen.iter().all(|n| *n == before || *n == after), "partial view in {:?}", seen);
    }

    #[tokio::test]
    async fn test_adjacent_ranges_concatenate_across_the_split() {
        let store = store_with(Arc::new(MinuteSource::new())).await;
        store.ensure_coverage(1, false).await.unwrap();
        let split = store.archive_bounds().await.unwrap().end;
        let start = split - time::minutes(30);
        let end = split + time::minutes(30);

        for middle in [split, split - time::minutes(7) - 3, split + time::minutes(11)] {
            let mut joined = store.query_range(start, middle).await.unwrap();
            joined.extend(store.query_range(middle, end).await.unwrap());
            assert_eq!(store.query_range(start, end).await.unwrap(), joined);
        }
    }
}
