use async_trait::async_trait;

use crate::domain::entities::account::AccountCoins;
use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::order::Order;
use crate::domain::entities::trade::Trade;
use crate::domain::repositories::exchange_client::ExchangeResult;

/// One decoded message from a live feed
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Trade(Trade),
    Board(BoardSnapshot),
    Order(Order),
    Account(AccountCoins),
}

/// A reconnectable live feed
///
/// `connect` may be called again after `next_batch` failed or returned
/// `None`; implementations re-subscribe on every connect.
#[async_trait]
pub trait EventStream: Send {
    fn name(&self) -> &str;

    async fn connect(&mut self) -> ExchangeResult<()>;

    /// Next decoded batch; `Ok(None)` when the venue closed the stream.
    async fn next_batch(&mut self) -> ExchangeResult<Option<Vec<StreamMessage>>>;

    async fn close(&mut self) {}
}
