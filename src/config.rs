use std::str::FromStr;
use std::time::Duration;
use zeroize::Zeroizing;

use crate::domain::entities::market_config::MarketConfig;
use crate::domain::errors::EngineError;
use crate::domain::services::bar_cache::DEFAULT_BAR_CACHE_CAPACITY;
use crate::task_runner::RetryPolicy;

/// Parse `name` from the environment, keeping `default` when unset, and
/// warning when the value does not parse or fails `valid`.
fn env_or<T, V>(name: &str, default: T, valid: V) -> T
where
    T: FromStr + std::fmt::Display,
    V: Fn(&T) -> bool,
{
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) if valid(&value) => value,
            Ok(value) => {
                tracing::warn!("Invalid {} value: {}, using default: {}", name, value, default);
                default
            }
            Err(_) => {
                tracing::warn!("Failed to parse {} '{}', using default: {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.to_lowercase() == "true" || value == "1",
        Err(_) => default,
    }
}

/// Trade store behaviour
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Largest tolerated distance between archive end and recent start
    pub gap_tolerance_sec: i64,
    /// How far back the first gap-fill of an empty store reaches
    pub initial_lookback_sec: i64,
    /// Upper bound on history pages fetched by a single gap-fill
    pub max_fill_pages: usize,
    pub bar_cache_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            gap_tolerance_sec: 300,
            initial_lookback_sec: 3600,
            max_fill_pages: 10_000,
            bar_cache_capacity: DEFAULT_BAR_CACHE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gap_tolerance_sec: env_or("STORE_GAP_TOLERANCE_SEC", defaults.gap_tolerance_sec, |v| *v >= 0),
            initial_lookback_sec: env_or("STORE_INITIAL_LOOKBACK_SEC", defaults.initial_lookback_sec, |v| {
                *v > 0
            }),
            max_fill_pages: env_or("STORE_MAX_FILL_PAGES", defaults.max_fill_pages, |v| *v > 0),
            bar_cache_capacity: env_or("STORE_BAR_CACHE_CAPACITY", defaults.bar_cache_capacity, |v| *v > 0),
            retry: RetryPolicy {
                max_attempts: env_or("DOWNLOAD_MAX_ATTEMPTS", defaults.retry.max_attempts, |v| *v > 0),
                ..defaults.retry
            },
        }
    }
}

/// Scheduler behaviour shared by every run mode
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wall/simulated duration limit; 0 or -1 means unlimited
    pub execute_time_sec: i64,
    /// Default `on_clock` cadence when the session does not set one
    pub clock_interval_sec: i64,
    /// Maximum events consumed before `on_init` while edges are unknown
    pub warmup_steps: usize,
    /// Size of the slices a backtest reads from the trade store
    pub backtest_chunk_sec: i64,
    /// History downloaded before a live run starts
    pub prepare_days: i64,
    /// Cancel venue orders left open when a real run ends
    pub cancel_real_orders_on_exit: bool,
    pub initial_home_balance: f64,
    pub initial_foreign_balance: f64,
    pub stream_queue_size: usize,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            execute_time_sec: 0,
            clock_interval_sec: 60,
            warmup_steps: 500,
            backtest_chunk_sec: 6 * 3600,
            prepare_days: 2,
            cancel_real_orders_on_exit: false,
            initial_home_balance: 10_000.0,
            initial_foreign_balance: 0.0,
            stream_queue_size: 4096,
            reconnect_initial_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            execute_time_sec: env_or("RUN_EXECUTE_TIME_SEC", defaults.execute_time_sec, |v| *v >= -1),
            clock_interval_sec: env_or("RUN_CLOCK_INTERVAL_SEC", defaults.clock_interval_sec, |v| *v > 0),
            warmup_steps: env_or("RUN_WARMUP_STEPS", defaults.warmup_steps, |_| true),
            backtest_chunk_sec: env_or("RUN_BACKTEST_CHUNK_SEC", defaults.backtest_chunk_sec, |v| *v > 0),
            prepare_days: env_or("RUN_PREPARE_DAYS", defaults.prepare_days, |v| *v >= 0),
            cancel_real_orders_on_exit: env_flag(
                "RUN_CANCEL_REAL_ORDERS_ON_EXIT",
                defaults.cancel_real_orders_on_exit,
            ),
            initial_home_balance: env_or("RUN_INITIAL_HOME_BALANCE", defaults.initial_home_balance, |v| {
                *v >= 0.0
            }),
            initial_foreign_balance: env_or(
                "RUN_INITIAL_FOREIGN_BALANCE",
                defaults.initial_foreign_balance,
                |v| *v >= 0.0,
            ),
            stream_queue_size: env_or("RUN_STREAM_QUEUE_SIZE", defaults.stream_queue_size, |v| *v > 0),
            ..defaults
        }
    }

    /// `None` when the run has no duration limit.
    pub fn execute_limit_sec(&self) -> Option<i64> {
        if self.execute_time_sec <= 0 {
            None
        } else {
            Some(self.execute_time_sec)
        }
    }
}

/// Binance spot endpoints and credentials
#[derive(Clone)]
pub struct BinanceConfig {
    pub rest_endpoint: String,
    pub public_ws_endpoint: String,
    pub user_ws_endpoint: String,
    pub api_key: String,
    pub api_secret: Zeroizing<String>,
    pub recv_window_ms: u64,
    pub requests_per_minute: u32,
    /// Trades requested per history page (venue maximum is 1000)
    pub page_limit: u32,
}

impl std::fmt::Debug for BinanceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceConfig")
            .field("rest_endpoint", &self.rest_endpoint)
            .field("public_ws_endpoint", &self.public_ws_endpoint)
            .field("user_ws_endpoint", &self.user_ws_endpoint)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("api_secret", &"<redacted>")
            .field("recv_window_ms", &self.recv_window_ms)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("page_limit", &self.page_limit)
            .finish()
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            rest_endpoint: "https://api.binance.com".to_string(),
            public_ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            user_ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            api_key: String::new(),
            api_secret: Zeroizing::new(String::new()),
            recv_window_ms: 5000,
            requests_per_minute: 1200,
            page_limit: 1000,
        }
    }
}

impl BinanceConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rest_endpoint: std::env::var("BINANCE_REST_ENDPOINT").unwrap_or(defaults.rest_endpoint),
            public_ws_endpoint: std::env::var("BINANCE_WS_ENDPOINT").unwrap_or(defaults.public_ws_endpoint),
            user_ws_endpoint: std::env::var("BINANCE_USER_WS_ENDPOINT").unwrap_or(defaults.user_ws_endpoint),
            api_key: std::env::var("BINANCE_API_KEY").unwrap_or_default(),
            api_secret: Zeroizing::new(std::env::var("BINANCE_API_SECRET").unwrap_or_default()),
            recv_window_ms: env_or("BINANCE_RECV_WINDOW_MS", defaults.recv_window_ms, |v| {
                *v > 0 && *v <= 60_000
            }),
            requests_per_minute: env_or("BINANCE_REQUESTS_PER_MINUTE", defaults.requests_per_minute, |v| {
                *v > 0
            }),
            page_limit: env_or("BINANCE_PAGE_LIMIT", defaults.page_limit, |v| *v > 0 && *v <= 1000),
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Check that every endpoint is a well-formed URL of the expected scheme.
    pub fn validate(&self) -> Result<(), EngineError> {
        let checks = [
            ("rest_endpoint", &self.rest_endpoint, ["https", "http"]),
            ("public_ws_endpoint", &self.public_ws_endpoint, ["wss", "ws"]),
            ("user_ws_endpoint", &self.user_ws_endpoint, ["wss", "ws"]),
        ];

        for (name, endpoint, schemes) in checks.iter() {
            let parsed = url::Url::parse(endpoint)
                .map_err(|e| EngineError::InvalidArgument(format!("{} '{}': {}", name, endpoint, e)))?;
            if !schemes.contains(&parsed.scheme()) {
                return Err(EngineError::InvalidArgument(format!(
                    "{} '{}' must use one of {:?}",
                    name, endpoint, schemes
                )));
            }
        }

        Ok(())
    }
}

impl MarketConfig {
    /// Binance spot market from `MARKET_FOREIGN` / `MARKET_HOME`, with
    /// optional unit and fee overrides.
    pub fn from_env() -> Self {
        let foreign = std::env::var("MARKET_FOREIGN").unwrap_or_else(|_| "BTC".to_string());
        let home = std::env::var("MARKET_HOME").unwrap_or_else(|_| "USDT".to_string());
        let defaults = MarketConfig::binance_spot(&foreign.to_uppercase(), &home.to_uppercase());

        Self {
            price_unit: env_or("MARKET_PRICE_UNIT", defaults.price_unit, |v| *v > 0.0),
            size_unit: env_or("MARKET_SIZE_UNIT", defaults.size_unit, |v| *v > 0.0),
            min_size: env_or("MARKET_MIN_SIZE", defaults.min_size, |v| *v > 0.0),
            maker_fee: env_or("MARKET_MAKER_FEE", defaults.maker_fee, |v| (0.0..0.1).contains(v)),
            taker_fee: env_or("MARKET_TAKER_FEE", defaults.taker_fee, |v| (0.0..0.1).contains(v)),
            market_order_price_slip: env_or("MARKET_PRICE_SLIP", defaults.market_order_price_slip, |v| {
                *v >= 0.0
            }),
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configs() {
        let store = StoreConfig::default();
        assert_eq!(store.gap_tolerance_sec, 300);
        assert_eq!(store.retry.max_attempts, 3);

        let runner = RunnerConfig::default();
        assert_eq!(runner.clock_interval_sec, 60);
        assert_eq!(runner.warmup_steps, 500);
        assert_eq!(runner.reconnect_max_delay, Duration::from_secs(60));
    }

    #[test]
    fn test_execute_limit() {
        let mut runner = RunnerConfig::default();
        assert_eq!(runner.execute_limit_sec(), None);
        runner.execute_time_sec = -1;
        assert_eq!(runner.execute_limit_sec(), None);
        runner.execute_time_sec = 30;
        assert_eq!(runner.execute_limit_sec(), Some(30));
    }

    #[test]
    fn test_binance_validation() {
        let config = BinanceConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_credentials());

        let bad = BinanceConfig {
            rest_endpoint: "wss://api.binance.com".to_string(),
            ..BinanceConfig::default()
        };
        assert!(bad.validate().is_err());

        let garbage = BinanceConfig {
            public_ws_endpoint: "not a url".to_string(),
            ..BinanceConfig::default()
        };
        assert!(garbage.validate().is_err());
    }

    #[test]
    fn test_binance_debug_redacts_secret() {
        let config = BinanceConfig {
            api_key: "key".to_string(),
            api_secret: Zeroizing::new("hunter2".to_string()),
            ..BinanceConfig::default()
        };
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("\"key\""));
        assert!(config.has_credentials());
    }
}
