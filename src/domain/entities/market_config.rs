use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::errors::EngineError;

/// Registry identity of a market
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketKey {
    pub exchange_name: String,
    pub trade_category: String,
    pub trade_symbol: String,
}

impl std::fmt::Display for MarketKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.exchange_name, self.trade_category, self.trade_symbol
        )
    }
}

/// Static description of one tradable market on one venue
///
/// Equality is value-based over every field; the registry relies on that to
/// detect a market being reopened with different parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub exchange_name: String,
    pub trade_category: String,
    pub trade_symbol: String,
    pub home_currency: String,
    pub foreign_currency: String,
    pub settle_currency: String,
    pub price_unit: f64,
    pub size_unit: f64,
    pub min_size: f64,
    pub maker_fee: f64,
    pub taker_fee: f64,
    pub market_order_price_slip: f64,
    pub board_depth: usize,
}

impl MarketConfig {
    /// Binance spot pair, e.g. `binance_spot("BTC", "USDT")`
    pub fn binance_spot(foreign: &str, home: &str) -> Self {
        Self {
            exchange_name: "binance".to_string(),
            trade_category: "spot".to_string(),
            trade_symbol: format!("{}{}", foreign, home),
            home_currency: home.to_string(),
            foreign_currency: foreign.to_string(),
            settle_currency: home.to_string(),
            price_unit: 0.01,
            size_unit: 0.00001,
            min_size: 0.00001,
            maker_fee: 0.001,
            taker_fee: 0.001,
            market_order_price_slip: 0.0,
            board_depth: 1000,
        }
    }

    pub fn key(&self) -> MarketKey {
        MarketKey {
            exchange_name: self.exchange_name.clone(),
            trade_category: self.trade_category.clone(),
            trade_symbol: self.trade_symbol.clone(),
        }
    }

    pub fn is_spot(&self) -> bool {
        self.trade_category.eq_ignore_ascii_case("spot")
    }

    pub fn fee_rate(&self, is_maker: bool) -> f64 {
        if is_maker {
            self.maker_fee
        } else {
            self.taker_fee
        }
    }

    /// Floor `price` to the tick size.
    pub fn round_price(&self, price: f64) -> Result<f64, EngineError> {
        round_down(price, self.price_unit)
            .map_err(|e| EngineError::InvalidOrder(format!("price {}: {}", price, e)))
    }

    /// Floor `size` to the lot size and check the venue minimum.
    pub fn round_size(&self, size: f64) -> Result<f64, EngineError> {
        let rounded = round_down(size, self.size_unit)
            .map_err(|e| EngineError::InvalidOrder(format!("size {}: {}", size, e)))?;

        if rounded < self.min_size {
            return Err(EngineError::InvalidOrder(format!(
                "size {} below minimum {}",
                rounded, self.min_size
            )));
        }

        Ok(rounded)
    }

    /// Names of the fields that differ from `other`, empty when equal.
    pub fn diff(&self, other: &MarketConfig) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.exchange_name != other.exchange_name {
            fields.push("exchange_name");
        }
        if self.trade_category != other.trade_category {
            fields.push("trade_category");
        }
        if self.trade_symbol != other.trade_symbol {
            fields.push("trade_symbol");
        }
        if self.home_currency != other.home_currency {
            fields.push("home_currency");
        }
        if self.foreign_currency != other.foreign_currency {
            fields.push("foreign_currency");
        }
        if self.settle_currency != other.settle_currency {
            fields.push("settle_currency");
        }
        if self.price_unit != other.price_unit {
            fields.push("price_unit");
        }
        if self.size_unit != other.size_unit {
            fields.push("size_unit");
        }
        if self.min_size != other.min_size {
            fields.push("min_size");
        }
        if self.maker_fee != other.maker_fee {
            fields.push("maker_fee");
        }
        if self.taker_fee != other.taker_fee {
            fields.push("taker_fee");
        }
        if self.market_order_price_slip != other.market_order_price_slip {
            fields.push("market_order_price_slip");
        }
        if self.board_depth != other.board_depth {
            fields.push("board_depth");
        }
        fields
    }
}

fn to_decimal(value: f64) -> Result<BigDecimal, String> {
    if !value.is_finite() {
        return Err("value must be finite".to_string());
    }
    BigDecimal::from_str(&value.to_string()).map_err(|e| e.to_string())
}

/// Floor `value` to a multiple of `unit` in decimal arithmetic, so that
/// e.g. 0.3 / 0.1 does not collapse to 0.2.
fn round_down(value: f64, unit: f64) -> Result<f64, String> {
    if value <= 0.0 {
        return Err("value must be positive".to_string());
    }
    if unit <= 0.0 {
        return Ok(value);
    }

    let value = to_decimal(value)?;
    let unit = to_decimal(unit)?;
    let steps = (&value / &unit).with_scale(0);
    let rounded = (steps * &unit)
        .to_string()
        .parse::<f64>()
        .map_err(|e| e.to_string())?;

    if rounded <= 0.0 {
        return Err(format!("rounds to zero with unit {}", unit));
    }

    Ok(rounded)
}
