use serde::{Deserialize, Serialize};

use crate::domain::entities::market_config::MarketConfig;
use crate::domain::errors::EngineError;

/// Balance of one currency as reported by a venue
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub volume: f64,
    pub free: f64,
    pub locked: f64,
}

impl Coin {
    pub fn new(symbol: &str, free: f64, locked: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            volume: free + locked,
            free,
            locked,
        }
    }
}

/// Venue balances, one entry per currency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountCoins {
    pub coins: Vec<Coin>,
}

impl AccountCoins {
    pub fn new(coins: Vec<Coin>) -> Self {
        Self { coins }
    }

    pub fn get(&self, symbol: &str) -> Option<&Coin> {
        self.coins
            .iter()
            .find(|c| c.symbol.eq_ignore_ascii_case(symbol))
    }

    /// Replace or insert one currency.
    pub fn update(&mut self, coin: Coin) {
        match self
            .coins
            .iter_mut()
            .find(|c| c.symbol.eq_ignore_ascii_case(&coin.symbol))
        {
            Some(existing) => *existing = coin,
            None => self.coins.push(coin),
        }
    }

    /// Apply a partial update: only the currencies present in `diff` change.
    pub fn merge(&mut self, diff: &AccountCoins) {
        for coin in &diff.coins {
            self.update(coin.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Home,
    Foreign,
}

/// Balances and position for one market
///
/// Read-only outside the crate: balances move only through order fills,
/// cancels and expiries applied by the order engine, or through venue
/// account snapshots in live runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    home_free: f64,
    home_locked: f64,
    foreign_free: f64,
    foreign_locked: f64,
    position_size: f64,
    position_avg_price: f64,
    cumulative_profit: f64,
    cumulative_fee: f64,
}

impl Account {
    pub fn new(home_free: f64, foreign_free: f64) -> Self {
        Self {
            home_free,
            foreign_free,
            ..Default::default()
        }
    }

    pub fn from_coins(coins: &AccountCoins, config: &MarketConfig) -> Self {
        let mut account = Account::default();
        account.sync_coins(coins, config);
        account
    }

    pub fn home_free(&self) -> f64 {
        self.home_free
    }

    pub fn home_locked(&self) -> f64 {
        self.home_locked
    }

    pub fn home_balance(&self) -> f64 {
        self.home_free + self.home_locked
    }

    pub fn foreign_free(&self) -> f64 {
        self.foreign_free
    }

    pub fn foreign_locked(&self) -> f64 {
        self.foreign_locked
    }

    pub fn foreign_balance(&self) -> f64 {
        self.foreign_free + self.foreign_locked
    }

    /// Signed: positive long, negative short
    pub fn position_size(&self) -> f64 {
        self.position_size
    }

    pub fn position_avg_price(&self) -> f64 {
        self.position_avg_price
    }

    /// Realised profit net of fees
    pub fn cumulative_profit(&self) -> f64 {
        self.cumulative_profit
    }

    pub fn cumulative_fee(&self) -> f64 {
        self.cumulative_fee
    }

    pub fn free(&self, currency: Currency) -> f64 {
        match currency {
            Currency::Home => self.home_free,
            Currency::Foreign => self.foreign_free,
        }
    }

    /// Move `amount` from free to locked, or fail without touching anything.
    pub(crate) fn reserve(
        &mut self,
        currency: Currency,
        amount: f64,
        currency_name: &str,
    ) -> Result<(), EngineError> {
        self.ensure_free(currency, amount, currency_name)?;
        match currency {
            Currency::Home => {
                self.home_free -= amount;
                self.home_locked += amount;
            }
            Currency::Foreign => {
                self.foreign_free -= amount;
                self.foreign_locked += amount;
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_free(
        &self,
        currency: Currency,
        amount: f64,
        currency_name: &str,
    ) -> Result<(), EngineError> {
        let available = self.free(currency);
        // tolerate float dust on exact-balance orders
        if amount > available + 1e-12 {
            return Err(EngineError::InsufficientBalance {
                currency: currency_name.to_string(),
                required: amount,
                available,
            });
        }
        Ok(())
    }

    /// Locked back to free.
    pub(crate) fn release(&mut self, currency: Currency, amount: f64) {
        match currency {
            Currency::Home => {
                self.home_locked -= amount;
                self.home_free += amount;
            }
            Currency::Foreign => {
                self.foreign_locked -= amount;
                self.foreign_free += amount;
            }
        }
    }

    /// Locked funds leave the account (spent on a fill).
    pub(crate) fn consume_locked(&mut self, currency: Currency, amount: f64) {
        match currency {
            Currency::Home => self.home_locked -= amount,
            Currency::Foreign => self.foreign_locked -= amount,
        }
    }

    /// Signed change to free funds.
    pub(crate) fn adjust_free(&mut self, currency: Currency, amount: f64) {
        match currency {
            Currency::Home => self.home_free += amount,
            Currency::Foreign => self.foreign_free += amount,
        }
    }

    pub(crate) fn set_position(&mut self, size: f64, avg_price: f64) {
        self.position_size = size;
        self.position_avg_price = avg_price;
    }

    pub(crate) fn record_profit(&mut self, profit: f64, fee: f64) {
        self.cumulative_profit += profit - fee;
        self.cumulative_fee += fee;
    }

    /// Replace balances with a venue snapshot, keeping position bookkeeping.
    pub(crate) fn sync_coins(&mut self, coins: &AccountCoins, config: &MarketConfig) {
        if let Some(home) = coins.get(&config.home_currency) {
            self.home_free = home.free;
            self.home_locked = home.locked;
        }
        if let Some(foreign) = coins.get(&config.foreign_currency) {
            self.foreign_free = foreign.free;
            self.foreign_locked = foreign.locked;
        }
    }
}
