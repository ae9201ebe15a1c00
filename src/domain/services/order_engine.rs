//! Local order lifecycle
//!
//! Paper-trading engine used by backtests and dry runs: it validates and
//! places orders, matches resting limits against the trade stream, fills
//! market orders at the current edge, and keeps the account and position in
//! step with every transition.
//!
//! Account effects are applied synchronously when a transition happens so
//! that balance checks for the next order see them. Notifications are queued
//! and handed out one batch per event boundary by [`OrderEngine::on_trade`],
//! which also models the one-tick latency of a venue acknowledgement.

use std::collections::VecDeque;
use tracing::{debug, info};

use crate::domain::entities::account::{Account, Currency};
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::order::{Order, OrderStatus, OrderType};
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::errors::EngineError;
use crate::domain::services::book::BookState;
use crate::domain::services::order_list::OrderList;
use crate::domain::services::position::PositionTracker;
use crate::domain::value_objects::time::MicroSec;

const SIZE_EPSILON: f64 = 1e-12;

/// Placement counters
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OrderStats {
    pub limit_buy: u64,
    pub limit_sell: u64,
    pub market_buy: u64,
    pub market_sell: u64,
}

impl OrderStats {
    pub(crate) fn record(&mut self, order_type: OrderType, side: OrderSide) {
        match (order_type, side) {
            (OrderType::Limit, OrderSide::Buy) => self.limit_buy += 1,
            (OrderType::Limit, OrderSide::Sell) => self.limit_sell += 1,
            (OrderType::Market, OrderSide::Buy) => self.market_buy += 1,
            (OrderType::Market, OrderSide::Sell) => self.market_sell += 1,
            _ => {}
        }
    }
}

pub struct OrderEngine {
    config: MarketConfig,
    session_name: String,
    next_seq: u64,
    buy_orders: OrderList,
    sell_orders: OrderList,
    pending: VecDeque<Vec<Order>>,
    account: Account,
    position: PositionTracker,
    stats: OrderStats,
}

impl OrderEngine {
    pub fn new(config: MarketConfig, session_name: &str, account: Account) -> Self {
        Self {
            config,
            session_name: session_name.to_string(),
            next_seq: 1,
            buy_orders: OrderList::new(OrderSide::Buy),
            sell_orders: OrderList::new(OrderSide::Sell),
            pending: VecDeque::new(),
            account,
            position: PositionTracker::new(),
            stats: OrderStats::default(),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn stats(&self) -> OrderStats {
        self.stats
    }

    pub fn buy_orders(&self) -> &OrderList {
        &self.buy_orders
    }

    pub fn sell_orders(&self) -> &OrderList {
        &self.sell_orders
    }

    /// Open orders, optionally for one side only.
    pub fn open_orders(&self, side: Option<OrderSide>) -> Vec<Order> {
        match side {
            Some(OrderSide::Buy) => self.buy_orders.orders().to_vec(),
            Some(OrderSide::Sell) => self.sell_orders.orders().to_vec(),
            Some(OrderSide::Unknown) => Vec::new(),
            None => self
                .buy_orders
                .orders()
                .iter()
                .chain(self.sell_orders.orders())
                .cloned()
                .collect(),
        }
    }

    pub fn get_order(&self, order_id: &str) -> Option<&Order> {
        self.buy_orders
            .get(order_id)
            .or_else(|| self.sell_orders.get(order_id))
    }

    /// Batches waiting for delivery
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    fn next_order_id(&mut self) -> String {
        let id = format!("{}-{:04}", self.session_name, self.next_seq);
        self.next_seq += 1;
        id
    }

    fn list_mut(&mut self, side: OrderSide) -> Option<&mut OrderList> {
        match side {
            OrderSide::Buy => Some(&mut self.buy_orders),
            OrderSide::Sell => Some(&mut self.sell_orders),
            OrderSide::Unknown => None,
        }
    }

    /// Place a resting limit order and reserve its funds.
    pub fn limit_order(
        &mut self,
        now: MicroSec,
        side: OrderSide,
        price: f64,
        size: f64,
        client_order_id: Option<&str>,
        lifetime: Option<MicroSec>,
    ) -> Result<Order, EngineError> {
        if side == OrderSide::Unknown {
            return Err(EngineError::InvalidOrder("order side must be Buy or Sell".to_string()));
        }
        let price = self.config.round_price(price)?;
        let size = self.config.round_size(size)?;

        let (currency, amount) = self.reservation(side, price, size);
        let currency_name = self.currency_name(currency).to_string();
        self.account.reserve(currency, amount, &currency_name)?;

        let order_id = self.next_order_id();
        let mut order = Order::new(
            &self.config.trade_symbol,
            &self.config.trade_category,
            &order_id,
            client_order_id,
            now,
            side,
            OrderType::Limit,
            price,
            size,
        );
        order.expire_at = lifetime.map(|l| now + l);
        match currency {
            Currency::Home => {
                order.free_home_change = -amount;
                order.lock_home_change = amount;
            }
            Currency::Foreign => {
                order.free_foreign_change = -amount;
                order.lock_foreign_change = amount;
            }
        }

        info!("Limit order placed: {}", order);
        self.stats.record(OrderType::Limit, side);
        if let Some(list) = self.list_mut(side) {
            list.push(order.clone());
        }
        self.pending.push_back(vec![order.clone()]);

        Ok(order)
    }

    /// Fill a market order at the current edge plus the configured slip.
    pub fn market_order(
        &mut self,
        now: MicroSec,
        side: OrderSide,
        size: f64,
        book: &BookState,
        client_order_id: Option<&str>,
    ) -> Result<Order, EngineError> {
        if !book.is_ready() {
            return Err(EngineError::InvalidOrder(
                "no bid/ask edge yet for a market order".to_string(),
            ));
        }
        let size = self.config.round_size(size)?;
        let price = match side {
            OrderSide::Buy => book.ask_edge() + self.config.market_order_price_slip,
            OrderSide::Sell => book.bid_edge() - self.config.market_order_price_slip,
            OrderSide::Unknown => {
                return Err(EngineError::InvalidOrder(
                    "order side must be Buy or Sell".to_string(),
                ))
            }
        };

        let fee = price * size * self.config.taker_fee;
        match (self.config.is_spot(), side) {
            (true, OrderSide::Sell) => {
                let name = self.config.foreign_currency.clone();
                self.account.ensure_free(Currency::Foreign, size, &name)?;
            }
            (true, _) => {
                let name = self.config.home_currency.clone();
                self.account.ensure_free(Currency::Home, price * size + fee, &name)?;
            }
            (false, _) => {
                let name = self.config.home_currency.clone();
                self.account.ensure_free(Currency::Home, price * size, &name)?;
            }
        }

        let order_id = self.next_order_id();
        let mut order = Order::new(
            &self.config.trade_symbol,
            &self.config.trade_category,
            &order_id,
            client_order_id,
            now,
            side,
            OrderType::Market,
            price,
            size,
        );
        self.apply_fill(now, &mut order, price, size, false);

        info!("Market order filled: {}", order);
        self.stats.record(OrderType::Market, side);
        self.pending.push_back(vec![order.clone()]);

        Ok(order)
    }

    /// Cancel an open order and release its reservation.
    pub fn cancel_order(&mut self, now: MicroSec, order_id: &str) -> Result<Order, EngineError> {
        match self.release(now, order_id, OrderStatus::Canceled) {
            Some(order) => {
                info!("Order canceled: {}", order.order_id);
                self.pending.push_back(vec![order.clone()]);
                Ok(order)
            }
            None => Err(EngineError::OrderNotFound(order_id.to_string())),
        }
    }

    /// Expire every open order whose lifetime has elapsed.
    pub fn expire_due(&mut self, now: MicroSec) -> Vec<Order> {
        let mut ids = self.buy_orders.expired_at(now);
        ids.extend(self.sell_orders.expired_at(now));
        self.expire_ids(now, ids)
    }

    /// Expire every open order created more than `ttl` ago.
    pub fn expire_older_than(&mut self, now: MicroSec, ttl: MicroSec) -> Vec<Order> {
        let cutoff = now - ttl;
        let ids: Vec<String> = self
            .buy_orders
            .older_than(cutoff)
            .into_iter()
            .chain(self.sell_orders.older_than(cutoff))
            .map(|o| o.order_id)
            .collect();
        self.expire_ids(now, ids)
    }

    fn expire_ids(&mut self, now: MicroSec, ids: Vec<String>) -> Vec<Order> {
        let expired: Vec<Order> = ids
            .iter()
            .filter_map(|id| self.release(now, id, OrderStatus::Expired))
            .collect();
        if !expired.is_empty() {
            debug!("Expired {} orders", expired.len());
            self.pending.push_back(expired.clone());
        }
        expired
    }

    /// Cancel every open order and drop undelivered notifications.
    ///
    /// Used at run teardown; returns the orders that were still open.
    pub fn flush(&mut self, now: MicroSec) -> Vec<Order> {
        let ids: Vec<String> = self
            .open_orders(None)
            .into_iter()
            .map(|o| o.order_id)
            .collect();
        let flushed: Vec<Order> = ids
            .iter()
            .filter_map(|id| self.release(now, id, OrderStatus::Canceled))
            .collect();
        self.pending.clear();
        if !flushed.is_empty() {
            info!("Flushed {} open local orders", flushed.len());
        }
        flushed
    }

    /// Advance the engine by one trade print.
    ///
    /// Lifetimes are enforced first. If notifications are queued, the oldest
    /// batch is returned and the print is not matched; otherwise the print
    /// is matched against the opposite resting side and the resulting fills
    /// are returned.
    pub fn on_trade(&mut self, trade: &Trade) -> Vec<Order> {
        self.expire_due(trade.time);

        if let Some(batch) = self.pending.pop_front() {
            return batch;
        }

        let fills = match trade.side {
            OrderSide::Buy => self.sell_orders.match_trade(trade),
            OrderSide::Sell => self.buy_orders.match_trade(trade),
            OrderSide::Unknown => Vec::new(),
        };

        let mut updates = Vec::with_capacity(fills.len());
        for (order_id, size) in fills {
            if let Some(order) = self.fill_resting(trade.time, &order_id, size) {
                updates.push(order);
            }
        }
        updates
    }

    fn fill_resting(&mut self, now: MicroSec, order_id: &str, size: f64) -> Option<Order> {
        let side = self.get_order(order_id)?.side;
        let mut order = self.list_mut(side)?.get(order_id)?.clone();
        let price = order.order_price;
        self.apply_fill(now, &mut order, price, size, true);

        debug!(
            "Resting order {} {}: {}@{}",
            order.order_id, order.status, size, price
        );

        let list = self.list_mut(side)?;
        if order.status == OrderStatus::Filled {
            list.remove(order_id);
        } else {
            list.update(order.clone());
        }
        Some(order)
    }

    /// Currency and amount a resting order locks.
    fn reservation(&self, side: OrderSide, price: f64, size: f64) -> (Currency, f64) {
        if self.config.is_spot() && side == OrderSide::Sell {
            (Currency::Foreign, size)
        } else {
            (Currency::Home, price * size)
        }
    }

    fn currency_name(&self, currency: Currency) -> &str {
        match currency {
            Currency::Home => &self.config.home_currency,
            Currency::Foreign => &self.config.foreign_currency,
        }
    }

    fn apply_fill(&mut self, now: MicroSec, order: &mut Order, price: f64, size: f64, is_maker: bool) {
        let fee = price * size * self.config.fee_rate(is_maker);
        let change = self.position.apply(order.side, price, size);
        let resting = order.order_type == OrderType::Limit;

        if self.config.is_spot() {
            match order.side {
                OrderSide::Buy => {
                    let cost = price * size;
                    if resting {
                        self.account.consume_locked(Currency::Home, cost);
                        order.lock_home_change -= cost;
                    } else {
                        self.account.adjust_free(Currency::Home, -cost);
                        order.free_home_change -= cost;
                    }
                    self.account.adjust_free(Currency::Foreign, size);
                    order.free_foreign_change += size;
                    self.account.adjust_free(Currency::Home, -fee);
                    order.free_home_change -= fee;
                }
                OrderSide::Sell => {
                    if resting {
                        self.account.consume_locked(Currency::Foreign, size);
                        order.lock_foreign_change -= size;
                    } else {
                        self.account.adjust_free(Currency::Foreign, -size);
                        order.free_foreign_change -= size;
                    }
                    let proceeds = price * size - fee;
                    self.account.adjust_free(Currency::Home, proceeds);
                    order.free_home_change += proceeds;
                }
                OrderSide::Unknown => return,
            }
        } else {
            if resting {
                let margin = order.order_price * size;
                self.account.release(Currency::Home, margin);
                order.lock_home_change -= margin;
                order.free_home_change += margin;
            }
            let realised = change.profit - fee;
            self.account.adjust_free(Currency::Home, realised);
            order.free_home_change += realised;

            let signed = if order.side == OrderSide::Buy { size } else { -size };
            self.account.adjust_free(Currency::Foreign, signed);
            order.free_foreign_change += signed;
        }

        self.account
            .set_position(self.position.size(), self.position.avg_price());
        self.account.record_profit(change.profit, fee);

        order.execute_price = price;
        order.execute_size = size;
        order.filled_size += size;
        order.remain_size -= size;
        if order.remain_size < SIZE_EPSILON {
            order.remain_size = 0.0;
        }
        order.quote_vol += price * size;
        order.is_maker = is_maker;
        order.fee += fee;
        order.profit += change.profit;
        order.total_profit += change.profit - fee;
        order.update_time = now;
        order.status = if order.remain_size == 0.0 {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    /// Take an open order out of the book, release what it still reserves
    /// and stamp it with a terminal status.
    fn release(&mut self, now: MicroSec, order_id: &str, status: OrderStatus) -> Option<Order> {
        let side = self.get_order(order_id)?.side;
        let mut order = self.list_mut(side)?.remove(order_id)?;

        let (currency, amount) = self.reservation(order.side, order.order_price, order.remain_size);
        self.account.release(currency, amount);
        match currency {
            Currency::Home => {
                order.lock_home_change -= amount;
                order.free_home_change += amount;
            }
            Currency::Foreign => {
                order.lock_foreign_change -= amount;
                order.free_foreign_change += amount;
            }
        }
        // float dust from partial fills
        if order.lock_home_change.abs() < SIZE_EPSILON {
            order.lock_home_change = 0.0;
        }
        if order.filled_size == 0.0 && order.free_home_change.abs() < 1e-9 {
            order.free_home_change = 0.0;
        }

        order.status = status;
        order.update_time = now;
        order.clear_terms();
        Some(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::time::sec;

    fn spot_config() -> MarketConfig {
        let mut config = MarketConfig::binance_spot("BTC", "USDT");
        config.price_unit = 0.5;
        config.size_unit = 0.001;
        config.min_size = 0.001;
        config.maker_fee = 0.0;
        config.taker_fee = 0.001;
        config
    }

    fn engine(home: f64, foreign: f64) -> OrderEngine {
        OrderEngine::new(spot_config(), "bt", Account::new(home, foreign))
    }

    fn ready_book() -> BookState {
        let mut book = BookState::default();
        book.apply_trade(&Trade::new(1, OrderSide::Sell, 100.0, 1.0, ""), 0.5);
        book.apply_trade(&Trade::new(2, OrderSide::Buy, 100.5, 1.0, ""), 0.5);
        book
    }

    #[test]
    fn test_limit_order_reserves_home() {
        let mut engine = engine(150.0, 0.0);
        let order = engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap();

        assert_eq!(order.order_id, "bt-0001");
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.remain_size, 1.0);
        assert_eq!(order.free_home_change, -100.0);
        assert_eq!(engine.account().home_free(), 50.0);
        assert_eq!(engine.account().home_locked(), 100.0);
    }

    #[test]
    fn test_limit_order_insufficient_balance_leaves_account() {
        let mut engine = engine(50.0, 0.0);
        let before = engine.account().clone();
        let err = engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap_err();

        assert!(matches!(err, EngineError::InsufficientBalance { .. }));
        assert_eq!(engine.account(), &before);
        assert!(engine.open_orders(None).is_empty());
        assert_eq!(engine.pending_batches(), 0);
    }

    #[test]
    fn test_cancel_releases_reservation() {
        let mut engine = engine(150.0, 0.0);
        let order = engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap();
        let canceled = engine.cancel_order(1, &order.order_id).unwrap();

        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(canceled.free_home_change, 0.0);
        assert_eq!(canceled.side, OrderSide::Unknown);
        assert_eq!(canceled.order_price, 0.0);
        assert_eq!(engine.account().home_free(), 150.0);
        assert_eq!(engine.account().home_locked(), 0.0);

        assert!(matches!(
            engine.cancel_order(2, &order.order_id),
            Err(EngineError::OrderNotFound(_))
        ));
    }

    #[test]
    fn test_market_order_has_no_reservation() {
        let mut engine = engine(1000.0, 0.0);
        let book = ready_book();
        let order = engine
            .market_order(3, OrderSide::Buy, 1.0, &book, None)
            .unwrap();

        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.execute_price, 100.5);
        assert_eq!(order.lock_home_change, 0.0);
        assert!(!order.is_maker);
        let fee = 100.5 * 0.001;
        assert!((order.free_home_change + 100.5 + fee).abs() < 1e-9);
        assert!((engine.account().home_free() - (1000.0 - 100.5 - fee)).abs() < 1e-9);
        assert_eq!(engine.account().foreign_free(), 1.0);
        assert_eq!(engine.account().position_size(), 1.0);
    }

    #[test]
    fn test_market_order_requires_edges() {
        let mut engine = engine(1000.0, 0.0);
        assert!(matches!(
            engine.market_order(0, OrderSide::Buy, 1.0, &BookState::default(), None),
            Err(EngineError::InvalidOrder(_))
        ));
    }

    #[test]
    fn test_acknowledgement_delivered_before_matching() {
        let mut engine = engine(1000.0, 0.0);
        engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap();

        // first print delivers the acknowledgement only
        let ack = engine.on_trade(&Trade::new(10, OrderSide::Sell, 99.0, 5.0, ""));
        assert_eq!(ack.len(), 1);
        assert_eq!(ack[0].status, OrderStatus::New);

        // second print matches
        let fills = engine.on_trade(&Trade::new(20, OrderSide::Sell, 99.0, 5.0, ""));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].status, OrderStatus::Filled);
        assert_eq!(fills[0].execute_price, 100.0);
        assert!(fills[0].is_maker);
        assert!(engine.open_orders(None).is_empty());
        assert_eq!(engine.account().foreign_free(), 1.0);
        assert_eq!(engine.account().home_locked(), 0.0);
        assert_eq!(engine.account().home_free(), 900.0);
    }

    #[test]
    fn test_partial_fill_then_cancel() {
        let mut engine = engine(1000.0, 0.0);
        let order = engine
            .limit_order(0, OrderSide::Buy, 100.0, 2.0, None, None)
            .unwrap();
        engine.on_trade(&Trade::new(1, OrderSide::Sell, 99.0, 0.1, ""));

        let fills = engine.on_trade(&Trade::new(2, OrderSide::Sell, 99.0, 0.5, ""));
        assert_eq!(fills[0].status, OrderStatus::PartiallyFilled);
        assert!((fills[0].remain_size - 1.5).abs() < 1e-9);

        let canceled = engine.cancel_order(3, &order.order_id).unwrap();
        assert!((canceled.free_home_change + 50.0).abs() < 1e-9);
        assert!((engine.account().home_free() - 950.0).abs() < 1e-9);
        assert!(engine.account().home_locked().abs() < 1e-9);
    }

    #[test]
    fn test_sell_limit_reserves_foreign_on_spot() {
        let mut engine = engine(0.0, 2.0);
        let order = engine
            .limit_order(0, OrderSide::Sell, 101.0, 1.5, None, None)
            .unwrap();
        assert_eq!(order.free_foreign_change, -1.5);
        assert_eq!(engine.account().foreign_free(), 0.5);

        assert!(matches!(
            engine.limit_order(0, OrderSide::Sell, 101.0, 1.0, None, None),
            Err(EngineError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_lifetime_expiry_releases_like_cancel() {
        let mut engine = engine(150.0, 0.0);
        engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, Some(sec(10)))
            .unwrap();
        // ack
        engine.on_trade(&Trade::new(sec(1), OrderSide::Buy, 101.0, 1.0, ""));

        let updates = engine.on_trade(&Trade::new(sec(11), OrderSide::Buy, 101.0, 1.0, ""));
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, OrderStatus::Expired);
        assert_eq!(updates[0].free_home_change, 0.0);
        assert_eq!(engine.account().home_free(), 150.0);
    }

    #[test]
    fn test_expire_older_than() {
        let mut engine = engine(1000.0, 0.0);
        engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap();
        engine
            .limit_order(sec(50), OrderSide::Buy, 99.0, 1.0, None, None)
            .unwrap();

        let expired = engine.expire_older_than(sec(60), sec(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].order_id, "bt-0001");
        assert_eq!(engine.open_orders(Some(OrderSide::Buy)).len(), 1);
    }

    #[test]
    fn test_flush_cancels_everything() {
        let mut engine = engine(1000.0, 1.0);
        engine
            .limit_order(0, OrderSide::Buy, 100.0, 1.0, None, None)
            .unwrap();
        engine
            .limit_order(0, OrderSide::Sell, 110.0, 1.0, None, None)
            .unwrap();

        let flushed = engine.flush(5);
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|o| o.status == OrderStatus::Canceled));
        assert_eq!(engine.pending_batches(), 0);
        assert_eq!(engine.account().home_free(), 1000.0);
        assert_eq!(engine.account().foreign_free(), 1.0);
    }

    #[test]
    fn test_margin_market_records_profit() {
        let mut config = spot_config();
        config.trade_category = "linear".to_string();
        config.taker_fee = 0.0;
        let mut engine = OrderEngine::new(config, "bt", Account::new(1000.0, 0.0));

        let mut book = ready_book();
        engine
            .market_order(3, OrderSide::Sell, 1.0, &book, None)
            .unwrap();
        assert_eq!(engine.account().position_size(), -1.0);

        book.apply_trade(&Trade::new(4, OrderSide::Sell, 90.0, 1.0, ""), 0.5);
        book.apply_trade(&Trade::new(5, OrderSide::Buy, 90.5, 1.0, ""), 0.5);
        let close = engine
            .market_order(6, OrderSide::Buy, 1.0, &book, None)
            .unwrap();

        assert!((close.profit - 9.5).abs() < 1e-9);
        assert_eq!(engine.account().position_size(), 0.0);
        assert!((engine.account().home_free() - 1009.5).abs() < 1e-9);
        assert_eq!(engine.stats().market_buy, 1);
        assert_eq!(engine.stats().market_sell, 1);
    }
}
