//! Venue capability traits
//!
//! Each venue adapter implements the narrow interfaces it can serve:
//! [`MarketDataSource`] for public trade history, [`OrderGateway`] for
//! authenticated order routing. The engine never depends on a concrete
//! venue type.

use async_trait::async_trait;

use crate::domain::entities::account::AccountCoins;
use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::order::{Order, OrderType};
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::errors::ExchangeError;
use crate::domain::value_objects::time::MicroSec;

/// Common result type for venue operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Cursor for paged trade history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradePage {
    /// First request of a range
    New,
    /// Continue after this venue trade id
    FromId(i64),
    /// Continue from this time
    Time(MicroSec),
    /// Range exhausted
    Done,
}

/// Public market data of one venue
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Venue name, for logs
    fn name(&self) -> &str;

    /// Start of the most recent day whose full history can be fetched.
    async fn latest_archive_day(&self, config: &MarketConfig) -> ExchangeResult<MicroSec>;

    /// Every trade of the UTC day starting at `day`.
    async fn fetch_archive_day(&self, config: &MarketConfig, day: MicroSec) -> ExchangeResult<Vec<Trade>>;

    /// The venue's most recent trades.
    async fn fetch_recent_trades(&self, config: &MarketConfig) -> ExchangeResult<Vec<Trade>>;

    /// One page of trades in `[start, end)` and the cursor for the next page.
    async fn fetch_trades(
        &self,
        config: &MarketConfig,
        start: MicroSec,
        end: MicroSec,
        page: &TradePage,
    ) -> ExchangeResult<(Vec<Trade>, TradePage)>;

    async fn board_snapshot(&self, config: &MarketConfig) -> ExchangeResult<BoardSnapshot> {
        Err(ExchangeError::NotSupported(format!(
            "board snapshot for {}",
            config.trade_symbol
        )))
    }
}

/// Authenticated order routing on one venue
#[async_trait]
pub trait OrderGateway: Send + Sync {
    fn name(&self) -> &str;

    /// Submit an order. `price` is ignored for market orders. Venues may
    /// answer with several snapshots (acknowledgement plus immediate fills).
    async fn new_order(
        &self,
        config: &MarketConfig,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
        client_order_id: Option<&str>,
    ) -> ExchangeResult<Vec<Order>>;

    async fn cancel_order(&self, config: &MarketConfig, order_id: &str) -> ExchangeResult<Order>;

    async fn open_orders(&self, config: &MarketConfig) -> ExchangeResult<Vec<Order>>;

    async fn get_account(&self) -> ExchangeResult<AccountCoins>;

    async fn is_healthy(&self) -> bool {
        true
    }
}
