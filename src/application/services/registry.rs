use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::config::StoreConfig;
use crate::domain::entities::market_config::{MarketConfig, MarketKey};
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_client::MarketDataSource;
use crate::persistence::DbPool;

use super::market::Market;

/// Caller-owned set of opened markets
///
/// A key can be opened many times with an identical configuration and
/// always yields the same [`Market`]; opening it with a different one fails.
pub struct MarketRegistry {
    pool: DbPool,
    store_config: StoreConfig,
    markets: RwLock<HashMap<MarketKey, Arc<Market>>>,
}

impl MarketRegistry {
    pub fn new(pool: DbPool, store_config: StoreConfig) -> Self {
        Self {
            pool,
            store_config,
            markets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn open(
        &self,
        config: MarketConfig,
        source: Arc<dyn MarketDataSource>,
    ) -> Result<Arc<Market>, EngineError> {
        let key = config.key();
        let mut markets = self.markets.write().await;

        if let Some(existing) = markets.get(&key) {
            let changed = existing.config().diff(&config);
            if !changed.is_empty() {
                error!("Market {} reopened with different {:?}", key, changed);
                return Err(EngineError::ConfigMismatch {
                    key: key.to_string(),
                    reason: format!("fields differ: {}", changed.join(", ")),
                });
            }
            return Ok(existing.clone());
        }

        info!("Opening market {} via {}", key, source.name());
        let market = Arc::new(Market::new(
            config,
            self.pool.clone(),
            source,
            self.store_config.clone(),
        ));
        markets.insert(key, market.clone());
        Ok(market)
    }

    pub async fn get(&self, key: &MarketKey) -> Result<Arc<Market>, EngineError> {
        self.markets
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| EngineError::MarketNotOpened(key.to_string()))
    }

    pub async fn keys(&self) -> Vec<MarketKey> {
        let mut keys: Vec<MarketKey> = self.markets.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Forget a market; handles already given out stay usable.
    pub async fn close(&self, key: &MarketKey) -> bool {
        self.markets.write().await.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::trade_store::tests::{test_store_config, MinuteSource};
    use crate::persistence::{init_database, DatabaseConfig};

    async fn registry() -> MarketRegistry {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        MarketRegistry::new(pool, test_store_config())
    }

    #[tokio::test]
    async fn test_reopen_with_same_config_returns_same_market() {
        let registry = registry().await;
        let source = Arc::new(MinuteSource::new());
        let config = MarketConfig::binance_spot("BTC", "USDT");

        let a = registry.open(config.clone(), source.clone()).await.unwrap();
        let b = registry.open(config.clone(), source).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.keys().await, vec![config.key()]);
    }

    #[tokio::test]
    async fn test_reopen_with_different_config_fails_fast() {
        let registry = registry().await;
        let source = Arc::new(MinuteSource::new());
        let config = MarketConfig::binance_spot("BTC", "USDT");
        registry.open(config.clone(), source.clone()).await.unwrap();

        let mut changed = config.clone();
        changed.maker_fee = 0.0;
        let result = registry.open(changed, source).await;
        match result {
            Err(EngineError::ConfigMismatch { reason, .. }) => assert!(reason.contains("maker_fee")),
            other => panic!("expected ConfigMismatch, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_get_unknown_market() {
        let registry = registry().await;
        let key = MarketConfig::binance_spot("ETH", "USDT").key();
        assert!(matches!(
            registry.get(&key).await,
            Err(EngineError::MarketNotOpened(_))
        ));
        assert!(!registry.close(&key).await);
    }
}
