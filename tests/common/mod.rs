//! Shared fixtures for the integration tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tickloom::application::services::MarketRegistry;
use tickloom::config::StoreConfig;
use tickloom::domain::entities::market_config::MarketConfig;
use tickloom::domain::entities::trade::{OrderSide, Trade};
use tickloom::domain::errors::ExchangeError;
use tickloom::domain::repositories::exchange_client::{ExchangeResult, MarketDataSource, TradePage};
use tickloom::domain::value_objects::time::{self, floor_day, MicroSec};
use tickloom::persistence::{init_database, DatabaseConfig};
use tickloom::task_runner::RetryPolicy;

pub const STEP_SEC: i64 = 60;

/// One print per minute; price is a triangle wave between 100 and 110 and
/// sides alternate, so both edges are known after two prints.
pub fn synthetic_trade(t: MicroSec) -> Trade {
    let index = t / time::sec(STEP_SEC);
    let phase = (index % 40) as f64;
    let price = 100.0 + (20.0 - (phase - 20.0).abs()) * 0.5;
    let side = if index % 2 == 0 { OrderSide::Sell } else { OrderSide::Buy };
    Trade::new(t, side, price, 0.5, &index.to_string())
}

pub fn synthetic_trades(start: MicroSec, end: MicroSec) -> Vec<Trade> {
    let step = time::sec(STEP_SEC);
    let first = (start + step - 1).div_euclid(step) * step;
    (0..)
        .map(|i| first + i * step)
        .take_while(|t| *t < end)
        .map(synthetic_trade)
        .collect()
}

/// Venue serving the synthetic history
#[derive(Default)]
pub struct SyntheticSource {
    pub fail_live_pages: AtomicBool,
    pub archive_calls: AtomicU32,
}

#[async_trait]
impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn latest_archive_day(&self, _config: &MarketConfig) -> ExchangeResult<MicroSec> {
        Ok(floor_day(time::now()) - time::days(1))
    }

    async fn fetch_archive_day(&self, _config: &MarketConfig, day: MicroSec) -> ExchangeResult<Vec<Trade>> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        Ok(synthetic_trades(day, day + time::days(1)))
    }

    async fn fetch_recent_trades(&self, _config: &MarketConfig) -> ExchangeResult<Vec<Trade>> {
        Ok(Vec::new())
    }

    async fn fetch_trades(
        &self,
        _config: &MarketConfig,
        start: MicroSec,
        end: MicroSec,
        page: &TradePage,
    ) -> ExchangeResult<(Vec<Trade>, TradePage)> {
        if self.fail_live_pages.load(Ordering::SeqCst) {
            return Err(ExchangeError::Network("connection refused".to_string()));
        }
        let from = match page {
            TradePage::Time(t) => *t,
            _ => start,
        };
        let to = (from + time::minutes(60)).min(end);
        let next = if to >= end { TradePage::Done } else { TradePage::Time(to) };
        Ok((synthetic_trades(from, to), next))
    }
}

pub fn store_config() -> StoreConfig {
    StoreConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
        ..StoreConfig::default()
    }
}

pub async fn registry() -> Arc<MarketRegistry> {
    let pool = init_database(&DatabaseConfig::in_memory())
        .await
        .expect("in-memory database");
    Arc::new(MarketRegistry::new(pool, store_config()))
}

pub fn btc_usdt() -> MarketConfig {
    MarketConfig::binance_spot("BTC", "USDT")
}
