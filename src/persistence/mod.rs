//! Persistence Layer
//!
//! SQLite storage for trade history, via sqlx.
//!
//! # Database Schema
//!
//! ## archive_days
//! One row per committed, immutable day segment of a market.
//! - market_key: "exchange/category/symbol"
//! - day: start of the UTC day (µs)
//! - trade_count, start_time, end_time
//! - committed_at
//!
//! ## archive_trades / recent_trades
//! - seq: ingestion order, breaks ties between equal timestamps
//! - market_key, time (µs), side, price, size, liquidity, trade_id
//! - archive_trades also records the `day` segment it belongs to
//!
//! Both trade tables carry a UNIQUE index on (market_key, time, price,
//! size, side): re-ingesting a range is a no-op for rows already present.

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error("Query error: {0}")]
    QueryError(String),
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/tickloom.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Enable query logging
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/tickloom.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    /// In-memory database, for tests and throwaway runs
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            log_queries: false,
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(value) => match value.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    tracing::warn!(
                        "Invalid DATABASE_MAX_CONNECTIONS '{}', using default: {}",
                        value,
                        defaults.max_connections
                    );
                    defaults.max_connections
                }
            },
            Err(_) => defaults.max_connections,
        };

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }

    fn is_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

/// Initialize the database connection pool
///
/// Creates the database file (and its directory) if missing and runs the
/// migrations. An in-memory database lives in a single pinned connection,
/// since every SQLite connection to `:memory:` is its own database.
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let level = if config.log_queries {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Trace
    };
    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .log_statements(level);

    let pool_options = if config.is_memory() {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        SqlitePoolOptions::new().max_connections(config.max_connections)
    };
    let pool = pool_options.connect_with(options).await?;

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archive_days (
            market_key TEXT NOT NULL,
            day INTEGER NOT NULL,
            trade_count INTEGER NOT NULL,
            start_time INTEGER,
            end_time INTEGER,
            committed_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (market_key, day)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create archive_days table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS archive_trades (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            market_key TEXT NOT NULL,
            day INTEGER NOT NULL,
            time INTEGER NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('Buy', 'Sell')),
            price REAL NOT NULL,
            size REAL NOT NULL,
            liquidity TEXT NOT NULL DEFAULT 'Taker',
            trade_id TEXT NOT NULL DEFAULT '',
            UNIQUE (market_key, time, price, size, side)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create archive_trades table: {}", e))
    })?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recent_trades (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            market_key TEXT NOT NULL,
            time INTEGER NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('Buy', 'Sell')),
            price REAL NOT NULL,
            size REAL NOT NULL,
            liquidity TEXT NOT NULL DEFAULT 'Taker',
            trade_id TEXT NOT NULL DEFAULT '',
            UNIQUE (market_key, time, price, size, side)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create recent_trades table: {}", e))
    })?;

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_archive_trades_time ON archive_trades(market_key, time)",
        "CREATE INDEX IF NOT EXISTS idx_archive_trades_day ON archive_trades(market_key, day)",
        "CREATE INDEX IF NOT EXISTS idx_recent_trades_time ON recent_trades(market_key, time)",
    ];

    for index_sql in indexes.iter() {
        sqlx::query(index_sql)
            .execute(pool)
            .await
            .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;
    }

    info!("✓ Database migrations completed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_init() {
        let pool = init_database(&DatabaseConfig::in_memory()).await;
        assert!(pool.is_ok());
    }

    #[tokio::test]
    async fn test_migrations() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('archive_days', 'archive_trades', 'recent_trades')"
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert_eq!(result.0, 3);
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
        assert!(run_migrations(&pool).await.is_ok());
    }

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.url, "sqlite://data/tickloom.db");
        assert_eq!(config.max_connections, 5);
        assert!(DatabaseConfig::in_memory().is_memory());
        assert!(!config.is_memory());
    }
}
