//! Per-run context handed to the agent
//!
//! A session bundles the market view, the best bid/ask, the open orders and
//! the account of one run. Backtests and dry runs route orders into the
//! local [`OrderEngine`]; real runs forward them to an [`OrderGateway`] and
//! mirror the venue's confirmations.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::entities::account::{Account, AccountCoins, Currency};
use crate::domain::entities::bar::Bar;
use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::order::{Order, OrderStatus, OrderType};
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::errors::EngineError;
use crate::domain::repositories::exchange_client::OrderGateway;
use crate::domain::services::book::BookState;
use crate::domain::services::order_engine::{OrderEngine, OrderStats};
use crate::domain::services::order_list::OrderList;
use crate::domain::value_objects::time::{self, calc_ohlcv_start, MicroSec};

use super::market::Market;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExecuteMode {
    Backtest,
    DryRun,
    RealRun,
}

impl std::fmt::Display for ExecuteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecuteMode::Backtest => write!(f, "Backtest"),
            ExecuteMode::DryRun => write!(f, "DryRun"),
            ExecuteMode::RealRun => write!(f, "RealRun"),
        }
    }
}

/// Mirror of the orders and balances a venue reported
struct VenueBook {
    gateway: Arc<dyn OrderGateway>,
    buy_orders: OrderList,
    sell_orders: OrderList,
    /// Final status of orders that left the book
    closed: HashMap<String, OrderStatus>,
    coins: AccountCoins,
    account: Account,
    stats: OrderStats,
}

impl VenueBook {
    fn list_mut(&mut self, side: OrderSide) -> Option<&mut OrderList> {
        match side {
            OrderSide::Buy => Some(&mut self.buy_orders),
            OrderSide::Sell => Some(&mut self.sell_orders),
            OrderSide::Unknown => None,
        }
    }

    fn find_side(&self, order_id: &str) -> Option<OrderSide> {
        if self.buy_orders.contains(order_id) {
            Some(OrderSide::Buy)
        } else if self.sell_orders.contains(order_id) {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    fn open_orders(&self) -> Vec<Order> {
        self.buy_orders
            .orders()
            .iter()
            .chain(self.sell_orders.orders())
            .cloned()
            .collect()
    }

    /// Fold one venue snapshot into the mirror.
    fn apply(&mut self, mut order: Order) -> Result<Order, EngineError> {
        if let Some(status) = self.closed.get(&order.order_id) {
            return Err(EngineError::OrderAlreadyTerminal {
                order_id: order.order_id.clone(),
                status: *status,
            });
        }

        let side = self.find_side(&order.order_id).unwrap_or(order.side);
        if order.status.is_terminal() {
            if let Some(list) = self.list_mut(side) {
                list.remove(&order.order_id);
            }
            self.closed.insert(order.order_id.clone(), order.status);
            if matches!(order.status, OrderStatus::Canceled | OrderStatus::Expired) {
                order.clear_terms();
            }
        } else if let Some(list) = self.list_mut(side) {
            if !list.update(order.clone()) {
                list.push(order.clone());
            }
        }
        Ok(order)
    }
}

enum Backend {
    Local(OrderEngine),
    Venue(VenueBook),
}

pub struct Session {
    name: String,
    mode: ExecuteMode,
    market: Arc<Market>,
    config: MarketConfig,
    book: BookState,
    current_time: MicroSec,
    clock_interval_sec: i64,
    backend: Backend,
}

impl Session {
    /// Paper-trading session for backtests and dry runs.
    pub fn local(
        mode: ExecuteMode,
        name: &str,
        market: Arc<Market>,
        account: Account,
        clock_interval_sec: i64,
    ) -> Self {
        let config = market.config().clone();
        Self {
            name: name.to_string(),
            mode,
            market,
            book: BookState::default(),
            current_time: 0,
            clock_interval_sec,
            backend: Backend::Local(OrderEngine::new(config.clone(), name, account)),
            config,
        }
    }

    /// Session whose orders go to a real venue.
    pub fn venue(name: &str, market: Arc<Market>, gateway: Arc<dyn OrderGateway>, clock_interval_sec: i64) -> Self {
        let config = market.config().clone();
        Self {
            name: name.to_string(),
            mode: ExecuteMode::RealRun,
            market,
            book: BookState::default(),
            current_time: 0,
            clock_interval_sec,
            backend: Backend::Venue(VenueBook {
                gateway,
                buy_orders: OrderList::new(OrderSide::Buy),
                sell_orders: OrderList::new(OrderSide::Sell),
                closed: HashMap::new(),
                coins: AccountCoins::default(),
                account: Account::new(0.0, 0.0),
                stats: OrderStats::default(),
            }),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ExecuteMode {
        self.mode
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Query surface of the market this session trades.
    pub fn market(&self) -> &Arc<Market> {
        &self.market
    }

    pub fn current_time(&self) -> MicroSec {
        self.current_time
    }

    pub fn book(&self) -> &BookState {
        &self.book
    }

    pub fn bid_edge(&self) -> f64 {
        self.book.bid_edge()
    }

    pub fn ask_edge(&self) -> f64 {
        self.book.ask_edge()
    }

    pub fn clock_interval_sec(&self) -> i64 {
        self.clock_interval_sec
    }

    pub fn set_clock_interval_sec(&mut self, interval_sec: i64) -> Result<(), EngineError> {
        if interval_sec <= 0 {
            return Err(EngineError::InvalidArgument(format!(
                "clock interval must be positive, got {}",
                interval_sec
            )));
        }
        self.clock_interval_sec = interval_sec;
        Ok(())
    }

    pub fn account(&self) -> &Account {
        match &self.backend {
            Backend::Local(engine) => engine.account(),
            Backend::Venue(venue) => &venue.account,
        }
    }

    pub fn stats(&self) -> OrderStats {
        match &self.backend {
            Backend::Local(engine) => engine.stats(),
            Backend::Venue(venue) => venue.stats,
        }
    }

    pub fn open_orders(&self, side: Option<OrderSide>) -> Vec<Order> {
        match &self.backend {
            Backend::Local(engine) => engine.open_orders(side),
            Backend::Venue(venue) => venue
                .open_orders()
                .into_iter()
                .filter(|o| side.map_or(true, |s| o.side == s))
                .collect(),
        }
    }

    pub async fn limit_order(&mut self, side: OrderSide, price: f64, size: f64) -> Result<Order, EngineError> {
        self.limit_order_with(side, price, size, None, None).await
    }

    /// Limit order with an optional client id and lifetime in seconds.
    pub async fn limit_order_with(
        &mut self,
        side: OrderSide,
        price: f64,
        size: f64,
        client_order_id: Option<&str>,
        lifetime_sec: Option<i64>,
    ) -> Result<Order, EngineError> {
        let now = self.current_time;
        let lifetime = lifetime_sec.filter(|l| *l > 0).map(time::sec);

        match &mut self.backend {
            Backend::Local(engine) => engine.limit_order(now, side, price, size, client_order_id, lifetime),
            Backend::Venue(venue) => {
                let price = self.config.round_price(price)?;
                let size = self.config.round_size(size)?;
                let (currency, amount, name) = if self.config.is_spot() && side == OrderSide::Sell {
                    (Currency::Foreign, size, &self.config.foreign_currency)
                } else {
                    (Currency::Home, price * size, &self.config.home_currency)
                };
                venue.account.ensure_free(currency, amount, name)?;

                let orders = venue
                    .gateway
                    .new_order(&self.config, side, price, size, OrderType::Limit, client_order_id)
                    .await?;
                venue.stats.record(OrderType::Limit, side);
                let mut first = None;
                for mut order in orders {
                    order.expire_at = lifetime.map(|l| now + l);
                    let order = venue.apply(order)?;
                    first.get_or_insert(order);
                }
                let order = first.ok_or_else(|| EngineError::Exchange("venue returned no order".to_string()))?;
                info!("Limit order sent: {}", order);
                Ok(order)
            }
        }
    }

    pub async fn market_order(&mut self, side: OrderSide, size: f64) -> Result<Order, EngineError> {
        let now = self.current_time;
        match &mut self.backend {
            Backend::Local(engine) => engine.market_order(now, side, size, &self.book, None),
            Backend::Venue(venue) => {
                let size = self.config.round_size(size)?;
                let orders = venue
                    .gateway
                    .new_order(&self.config, side, 0.0, size, OrderType::Market, None)
                    .await?;
                venue.stats.record(OrderType::Market, side);
                let mut first = None;
                for order in orders {
                    let order = venue.apply(order)?;
                    first.get_or_insert(order);
                }
                let order = first.ok_or_else(|| EngineError::Exchange("venue returned no order".to_string()))?;
                info!("Market order sent: {}", order);
                Ok(order)
            }
        }
    }

    pub async fn cancel_order(&mut self, order_id: &str) -> Result<Order, EngineError> {
        let now = self.current_time;
        match &mut self.backend {
            Backend::Local(engine) => engine.cancel_order(now, order_id),
            Backend::Venue(venue) => {
                if venue.find_side(order_id).is_none() {
                    return Err(EngineError::OrderNotFound(order_id.to_string()));
                }
                let order = venue.gateway.cancel_order(&self.config, order_id).await?;
                venue.apply(order)
            }
        }
    }

    /// Expire every open order older than `ttl_sec`.
    pub async fn expire_order(&mut self, ttl_sec: i64) -> Result<Vec<Order>, EngineError> {
        if ttl_sec < 0 {
            return Err(EngineError::InvalidArgument(format!(
                "ttl must not be negative, got {}",
                ttl_sec
            )));
        }
        let now = self.current_time;
        match &mut self.backend {
            Backend::Local(engine) => Ok(engine.expire_older_than(now, time::sec(ttl_sec))),
            Backend::Venue(venue) => {
                let cutoff = now - time::sec(ttl_sec);
                let ids: Vec<String> = venue
                    .open_orders()
                    .into_iter()
                    .filter(|o| o.create_time < cutoff)
                    .map(|o| o.order_id)
                    .collect();
                cancel_on_venue(venue, &self.config, &ids).await
            }
        }
    }

    /// The last `num_bars` bars of `window_sec` up to the current time.
    ///
    /// Computed on every call: the end follows the session clock, so a
    /// memoized entry would never be hit again.
    pub async fn ohlcv(&self, window_sec: i64, num_bars: i64) -> Result<Arc<Vec<Bar>>, EngineError> {
        if self.current_time <= 0 {
            return Err(EngineError::InvalidArgument(
                "session has no current time yet".to_string(),
            ));
        }
        let start = calc_ohlcv_start(self.current_time, window_sec, num_bars)?;
        self.market.ohlcv_uncached(start, self.current_time, window_sec).await
    }

    pub(crate) fn set_time(&mut self, t: MicroSec) {
        if t > self.current_time {
            self.current_time = t;
        }
    }

    /// Advance the session by one trade print; returns the order updates
    /// due at this boundary.
    pub(crate) async fn on_trade(&mut self, trade: &Trade) -> Result<Vec<Order>, EngineError> {
        self.set_time(trade.time);
        self.book.apply_trade(trade, self.config.price_unit);

        match &mut self.backend {
            Backend::Local(engine) => Ok(engine.on_trade(trade)),
            Backend::Venue(venue) => {
                // lifetimes of venue orders are enforced by cancelling them
                let due: Vec<String> = venue
                    .open_orders()
                    .into_iter()
                    .filter(|o| o.is_expired_at(trade.time))
                    .map(|o| o.order_id)
                    .collect();
                if !due.is_empty() {
                    cancel_on_venue(venue, &self.config, &due).await?;
                }
                Ok(Vec::new())
            }
        }
    }

    pub(crate) fn on_board(&mut self, board: &BoardSnapshot) {
        self.set_time(board.time);
        self.book.apply_board(board);
    }

    /// Fold a venue order report into the mirror.
    pub(crate) fn apply_order_update(&mut self, order: Order) -> Result<Order, EngineError> {
        self.set_time(order.update_time);
        match &mut self.backend {
            Backend::Venue(venue) => venue.apply(order),
            Backend::Local(_) => Err(EngineError::InvalidArgument(
                "order reports only apply to venue sessions".to_string(),
            )),
        }
    }

    /// Fold a venue balance report into the account; returns the new account.
    pub(crate) fn apply_account_update(&mut self, coins: &AccountCoins) -> Result<Account, EngineError> {
        match &mut self.backend {
            Backend::Venue(venue) => {
                venue.coins.merge(coins);
                venue.account.sync_coins(&venue.coins, &self.config);
                Ok(venue.account.clone())
            }
            Backend::Local(_) => Err(EngineError::InvalidArgument(
                "balance reports only apply to venue sessions".to_string(),
            )),
        }
    }

    /// Load the venue's balances and open orders at run start.
    pub(crate) async fn load_venue_state(&mut self) -> Result<(), EngineError> {
        if let Backend::Venue(venue) = &mut self.backend {
            let coins = venue.gateway.get_account().await?;
            venue.account = Account::from_coins(&coins, &self.config);
            venue.coins = coins;
            for order in venue.gateway.open_orders(&self.config).await? {
                venue.apply(order)?;
            }
            info!(
                "Loaded venue state: {} open orders, {} {} free",
                venue.open_orders().len(),
                venue.account.home_free(),
                self.config.home_currency
            );
        }
        Ok(())
    }

    /// Cancel every local order; venue orders are left alone.
    pub(crate) fn flush_local(&mut self) -> Vec<Order> {
        let now = self.current_time;
        match &mut self.backend {
            Backend::Local(engine) => engine.flush(now),
            Backend::Venue(_) => Vec::new(),
        }
    }

    /// Cancel every order still open on the venue.
    pub(crate) async fn cancel_venue_orders(&mut self) -> Result<Vec<Order>, EngineError> {
        match &mut self.backend {
            Backend::Venue(venue) => {
                let ids: Vec<String> = venue.open_orders().into_iter().map(|o| o.order_id).collect();
                cancel_on_venue(venue, &self.config, &ids).await
            }
            Backend::Local(_) => Ok(Vec::new()),
        }
    }
}

async fn cancel_on_venue(
    venue: &mut VenueBook,
    config: &MarketConfig,
    ids: &[String],
) -> Result<Vec<Order>, EngineError> {
    let mut canceled = Vec::with_capacity(ids.len());
    for id in ids {
        match venue.gateway.cancel_order(config, id).await {
            Ok(order) => match venue.apply(order) {
                Ok(order) => canceled.push(order),
                Err(e) => debug!("Cancel of {} raced a venue report: {}", id, e),
            },
            Err(e) => warn!("Failed to cancel {} on {}: {}", id, venue.gateway.name(), e),
        }
    }
    Ok(canceled)
}
