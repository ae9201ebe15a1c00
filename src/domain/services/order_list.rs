use crate::domain::entities::order::Order;
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::value_objects::time::MicroSec;

/// Resting orders of one side, in matching priority
///
/// Sells are kept ascending by price, buys descending; equal prices keep
/// creation order.
#[derive(Debug, Clone)]
pub struct OrderList {
    side: OrderSide,
    orders: Vec<Order>,
}

impl OrderList {
    pub fn new(side: OrderSide) -> Self {
        Self {
            side,
            orders: Vec::new(),
        }
    }

    pub fn side(&self) -> OrderSide {
        self.side
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn get(&self, order_id: &str) -> Option<&Order> {
        self.orders.iter().find(|o| o.order_id == order_id)
    }

    pub fn get_mut(&mut self, order_id: &str) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.order_id == order_id)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.get(order_id).is_some()
    }

    pub fn push(&mut self, order: Order) {
        self.orders.push(order);
        self.sort();
    }

    /// Replace the stored copy of an order; false if it is not here.
    pub fn update(&mut self, order: Order) -> bool {
        match self.orders.iter_mut().find(|o| o.order_id == order.order_id) {
            Some(existing) => {
                *existing = order;
                self.sort();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, order_id: &str) -> Option<Order> {
        let index = self.orders.iter().position(|o| o.order_id == order_id)?;
        Some(self.orders.remove(index))
    }

    pub fn clear(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.orders)
    }

    /// Orders created strictly before `time`.
    pub fn older_than(&self, time: MicroSec) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|o| o.create_time < time)
            .cloned()
            .collect()
    }

    pub fn expired_at(&self, now: MicroSec) -> Vec<String> {
        self.orders
            .iter()
            .filter(|o| o.is_expired_at(now))
            .map(|o| o.order_id.clone())
            .collect()
    }

    pub fn remain_size(&self) -> f64 {
        self.orders.iter().fold(0.0, |acc, o| acc + o.remain_size)
    }

    /// Plan the fills a trade print causes against this list.
    ///
    /// A resting buy is only hit by a print strictly below its price, a
    /// resting sell by a print strictly above it: a print at the order price
    /// says nothing about queue position. Returns `(order_id, fill_size)`
    /// in priority order; the list itself is not modified.
    pub fn match_trade(&self, trade: &Trade) -> Vec<(String, f64)> {
        let mut fills = Vec::new();
        if trade.side == self.side {
            return fills;
        }

        let mut remaining = trade.size;
        for order in &self.orders {
            if remaining <= 0.0 {
                break;
            }
            let crosses = match order.side {
                OrderSide::Buy => trade.price < order.order_price,
                OrderSide::Sell => trade.price > order.order_price,
                OrderSide::Unknown => false,
            };
            if !crosses {
                break;
            }

            let size = order.remain_size.min(remaining);
            remaining -= size;
            fills.push((order.order_id.clone(), size));
        }

        fills
    }

    fn sort(&mut self) {
        let ascending = self.side == OrderSide::Sell;
        self.orders.sort_by(|a, b| {
            let by_price = if ascending {
                a.order_price.total_cmp(&b.order_price)
            } else {
                b.order_price.total_cmp(&a.order_price)
            };
            by_price.then(a.create_time.cmp(&b.create_time))
        });
    }
}
