use crate::domain::entities::trade::OrderSide;

/// Result of applying one execution to the position
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionChange {
    /// Signed size that was opened (added to the position)
    pub opened: f64,
    /// Signed size that was closed (removed from the position)
    pub closed: f64,
    /// Realised profit of the closed part, before fees
    pub profit: f64,
}

/// Signed position with a weighted-average entry price
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionTracker {
    size: f64,
    avg_price: f64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn avg_price(&self) -> f64 {
        self.avg_price
    }

    /// Apply an execution of `size` at `price` on `side`.
    ///
    /// An execution against the position closes it first; whatever is left
    /// opens a position on the other side at the execution price.
    pub fn apply(&mut self, side: OrderSide, price: f64, size: f64) -> PositionChange {
        let signed = match side {
            OrderSide::Buy => size,
            OrderSide::Sell => -size,
            OrderSide::Unknown => return PositionChange::default(),
        };

        if self.size == 0.0 || self.size.signum() == signed.signum() {
            self.open(price, signed);
            return PositionChange {
                opened: signed,
                ..Default::default()
            };
        }

        if signed.abs() <= self.size.abs() {
            // partial or exact close
            let closed = -signed;
            let profit = (price - self.avg_price) * closed;
            self.size -= closed;
            if self.size.abs() < 1e-12 {
                self.size = 0.0;
                self.avg_price = 0.0;
            }
            PositionChange {
                opened: 0.0,
                closed,
                profit,
            }
        } else {
            // doten: close everything, open the remainder on the other side
            let closed = self.size;
            let profit = (price - self.avg_price) * closed;
            let remainder = signed + closed;
            self.size = 0.0;
            self.avg_price = 0.0;
            self.open(price, remainder);
            PositionChange {
                opened: remainder,
                closed,
                profit,
            }
        }
    }

    fn open(&mut self, price: f64, signed: f64) {
        let total_size = self.size + signed;
        if total_size == 0.0 {
            self.size = 0.0;
            self.avg_price = 0.0;
            return;
        }
        let total_cost = self.avg_price * self.size + price * signed;
        self.avg_price = total_cost / total_size;
        self.size = total_size;
    }
}
