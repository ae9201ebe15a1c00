use serde::{Deserialize, Serialize};

use crate::domain::entities::trade::OrderSide;
use crate::domain::value_objects::time::MicroSec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "Limit"),
            OrderType::Market => write!(f, "Market"),
        }
    }
}

/// Order lifecycle: `New -> {PartiallyFilled -> Filled | Filled | Canceled | Expired}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Expired | OrderStatus::Rejected
        )
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "New",
            OrderStatus::PartiallyFilled => "PartiallyFilled",
            OrderStatus::Filled => "Filled",
            OrderStatus::Canceled => "Canceled",
            OrderStatus::Expired => "Expired",
            OrderStatus::Rejected => "Rejected",
        };
        write!(f, "{}", s)
    }
}

/// One order as seen at one point of its lifecycle
///
/// Every state transition produces a fresh snapshot of this struct; the
/// engine owns the live copy and hands clones to sessions and agents.
///
/// The `*_change` fields are the cumulative net effect the order has had on
/// the account so far. A resting buy limit carries `free_home_change ==
/// -price * size` until it fills or is released; after a cancel with no
/// fills they are back to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub symbol: String,
    pub category: String,
    pub order_id: String,
    /// Caller-chosen id (the sub id), if any
    pub client_order_id: Option<String>,
    pub create_time: MicroSec,
    pub update_time: MicroSec,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub order_price: f64,
    pub order_size: f64,
    pub remain_size: f64,
    /// Price and size of the most recent execution
    pub execute_price: f64,
    pub execute_size: f64,
    /// Cumulative filled size
    pub filled_size: f64,
    pub quote_vol: f64,
    pub is_maker: bool,
    pub fee: f64,
    pub profit: f64,
    pub total_profit: f64,
    /// Absolute expiry time, if the order has a lifetime
    pub expire_at: Option<MicroSec>,
    pub free_home_change: f64,
    pub lock_home_change: f64,
    pub free_foreign_change: f64,
    pub lock_foreign_change: f64,
    pub message: String,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        category: &str,
        order_id: &str,
        client_order_id: Option<&str>,
        create_time: MicroSec,
        side: OrderSide,
        order_type: OrderType,
        price: f64,
        size: f64,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            category: category.to_string(),
            order_id: order_id.to_string(),
            client_order_id: client_order_id.map(|s| s.to_string()),
            create_time,
            update_time: create_time,
            side,
            order_type,
            status: OrderStatus::New,
            order_price: price,
            order_size: size,
            remain_size: size,
            execute_price: 0.0,
            execute_size: 0.0,
            filled_size: 0.0,
            quote_vol: 0.0,
            is_maker: order_type == OrderType::Limit,
            fee: 0.0,
            profit: 0.0,
            total_profit: 0.0,
            expire_at: None,
            free_home_change: 0.0,
            lock_home_change: 0.0,
            free_foreign_change: 0.0,
            lock_foreign_change: 0.0,
            message: String::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_expired_at(&self, now: MicroSec) -> bool {
        self.is_open() && self.expire_at.map_or(false, |t| t <= now)
    }

    /// Reset side, price and sizes to sentinels once an order is released.
    pub fn clear_terms(&mut self) {
        self.side = OrderSide::Unknown;
        self.order_price = 0.0;
        self.order_size = 0.0;
        self.remain_size = 0.0;
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {}@{} remain={} status={}",
            self.order_id,
            self.symbol,
            self.order_type,
            self.side,
            self.order_size,
            self.order_price,
            self.remain_size,
            self.status
        )
    }
}
