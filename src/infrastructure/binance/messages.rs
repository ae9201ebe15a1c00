//! Binance spot wire formats
//!
//! Numbers arrive as decimal strings; conversion into domain types happens
//! here and fails with `MessageParseError` instead of defaulting to zero.

use serde::Deserialize;

use crate::domain::entities::account::{AccountCoins, Coin};
use crate::domain::entities::board::{BoardLevel, BoardSnapshot};
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::order::{Order, OrderStatus, OrderType};
use crate::domain::entities::trade::{Liquidity, OrderSide, Trade};
use crate::domain::errors::ExchangeError;
use crate::domain::repositories::event_stream::StreamMessage;
use crate::domain::repositories::exchange_client::ExchangeResult;
use crate::domain::value_objects::time::{ms_to_micro, MicroSec};

fn number(field: &str, value: &str) -> ExchangeResult<f64> {
    value
        .parse::<f64>()
        .map_err(|e| ExchangeError::MessageParseError(format!("{} '{}': {}", field, value, e)))
}

/// `m` / `isBuyerMaker` true means the seller was the taker.
fn taker_side(buyer_is_maker: bool) -> OrderSide {
    if buyer_is_maker {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

pub fn side_param(side: OrderSide) -> ExchangeResult<&'static str> {
    match side {
        OrderSide::Buy => Ok("BUY"),
        OrderSide::Sell => Ok("SELL"),
        OrderSide::Unknown => Err(ExchangeError::OrderRejected(
            "order side must be Buy or Sell".to_string(),
        )),
    }
}

fn parse_side(value: &str) -> ExchangeResult<OrderSide> {
    match value {
        "BUY" => Ok(OrderSide::Buy),
        "SELL" => Ok(OrderSide::Sell),
        other => Err(ExchangeError::MessageParseError(format!("side '{}'", other))),
    }
}

fn parse_order_type(value: &str) -> ExchangeResult<OrderType> {
    match value {
        "LIMIT" | "LIMIT_MAKER" => Ok(OrderType::Limit),
        "MARKET" => Ok(OrderType::Market),
        other => Err(ExchangeError::MessageParseError(format!("order type '{}'", other))),
    }
}

pub fn parse_status(value: &str) -> ExchangeResult<OrderStatus> {
    match value {
        "NEW" | "PENDING_NEW" => Ok(OrderStatus::New),
        "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
        "FILLED" => Ok(OrderStatus::Filled),
        "CANCELED" | "PENDING_CANCEL" => Ok(OrderStatus::Canceled),
        "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
        "REJECTED" => Ok(OrderStatus::Rejected),
        other => Err(ExchangeError::MessageParseError(format!("order status '{}'", other))),
    }
}

/// Decimal string with as many places as `unit` has
pub fn format_decimal(value: f64, unit: f64) -> String {
    let places = if unit > 0.0 && unit < 1.0 {
        (-unit.log10()).round() as usize
    } else {
        0
    };
    format!("{:.*}", places, value)
}

/// `GET /api/v3/trades`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestTrade {
    pub id: i64,
    pub price: String,
    pub qty: String,
    pub time: i64,
    pub is_buyer_maker: bool,
}

impl RestTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade::new(
            ms_to_micro(self.time),
            taker_side(self.is_buyer_maker),
            number("price", &self.price)?,
            number("qty", &self.qty)?,
            &self.id.to_string(),
        ))
    }
}

/// `GET /api/v3/aggTrades`
#[derive(Debug, Clone, Deserialize)]
pub struct AggTrade {
    #[serde(rename = "a")]
    pub id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "f")]
    pub first_trade_id: i64,
    #[serde(rename = "l")]
    pub last_trade_id: i64,
    #[serde(rename = "T")]
    pub time: i64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl AggTrade {
    pub fn to_trade(&self) -> ExchangeResult<Trade> {
        Ok(Trade::new(
            ms_to_micro(self.time),
            taker_side(self.buyer_is_maker),
            number("p", &self.price)?,
            number("q", &self.qty)?,
            &self.id.to_string(),
        ))
    }
}

/// `GET /api/v3/depth`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthSnapshot {
    pub last_update_id: i64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl DepthSnapshot {
    pub fn to_board(&self, time: MicroSec) -> ExchangeResult<BoardSnapshot> {
        let levels = |side: &[[String; 2]]| -> ExchangeResult<Vec<BoardLevel>> {
            side.iter()
                .map(|[price, size]| Ok((number("price", price)?, number("size", size)?)))
                .collect()
        };
        Ok(BoardSnapshot::new(time, levels(&self.bids)?, levels(&self.asks)?))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: String,
    pub qty: String,
    pub commission: String,
    pub commission_asset: String,
}

/// Order answer of `POST`/`DELETE /api/v3/order` and `GET /api/v3/openOrders`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: String,
    #[serde(default)]
    pub orig_client_order_id: Option<String>,
    #[serde(default)]
    pub transact_time: Option<i64>,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub update_time: Option<i64>,
    pub price: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub cummulative_quote_qty: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

impl OrderResponse {
    pub fn to_order(&self, config: &MarketConfig, now: MicroSec) -> ExchangeResult<Order> {
        let created = self.time.or(self.transact_time).map(ms_to_micro).unwrap_or(now);
        let updated = self
            .update_time
            .or(self.transact_time)
            .map(ms_to_micro)
            .unwrap_or(created);
        let client_id = self
            .orig_client_order_id
            .as_deref()
            .unwrap_or(&self.client_order_id);

        let size = number("origQty", &self.orig_qty)?;
        let mut order = Order::new(
            &self.symbol,
            &config.trade_category,
            &self.order_id.to_string(),
            Some(client_id),
            created,
            parse_side(&self.side)?,
            parse_order_type(&self.order_type)?,
            number("price", &self.price)?,
            size,
        );
        order.update_time = updated;
        order.status = parse_status(&self.status)?;
        order.filled_size = number("executedQty", &self.executed_qty)?;
        order.remain_size = (size - order.filled_size).max(0.0);
        order.quote_vol = number("cummulativeQuoteQty", &self.cummulative_quote_qty)?;

        if !self.fills.is_empty() {
            let mut filled = 0.0;
            let mut quote = 0.0;
            for fill in &self.fills {
                let qty = number("qty", &fill.qty)?;
                filled += qty;
                quote += qty * number("price", &fill.price)?;
                order.fee += number("commission", &fill.commission)?;
            }
            order.execute_size = filled;
            order.execute_price = if filled > 0.0 { quote / filled } else { 0.0 };
            order.is_maker = false;
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

/// `GET /api/v3/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

impl AccountResponse {
    /// Currencies with a zero balance are left out.
    pub fn to_coins(&self) -> ExchangeResult<AccountCoins> {
        let mut coins = Vec::new();
        for entry in &self.balances {
            let free = number("free", &entry.free)?;
            let locked = number("locked", &entry.locked)?;
            if free > 0.0 || locked > 0.0 {
                coins.push(Coin::new(&entry.asset, free, locked));
            }
        }
        Ok(AccountCoins::new(coins))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKey {
    pub listen_key: String,
}

/// `<symbol>@trade` payload
#[derive(Debug, Clone, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "t")]
    pub trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// Parse one public stream frame; non-trade frames yield `None`.
pub fn parse_trade_message(text: &str) -> ExchangeResult<Option<Trade>> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    if value.get("e").and_then(|e| e.as_str()) != Some("trade") {
        return Ok(None);
    }
    let trade: WsTrade = serde_json::from_value(value)?;
    Ok(Some(Trade::new(
        ms_to_micro(trade.trade_time),
        taker_side(trade.buyer_is_maker),
        number("p", &trade.price)?,
        number("q", &trade.qty)?,
        &trade.trade_id.to_string(),
    )))
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionReport {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "l")]
    pub last_qty: String,
    #[serde(rename = "z")]
    pub cumulative_qty: String,
    #[serde(rename = "L")]
    pub last_price: String,
    #[serde(rename = "n")]
    pub commission: String,
    #[serde(rename = "T")]
    pub transaction_time: i64,
    #[serde(rename = "O")]
    pub creation_time: i64,
    #[serde(rename = "m")]
    pub is_maker: bool,
    #[serde(rename = "Z", default)]
    pub cumulative_quote: Option<String>,
}

impl ExecutionReport {
    pub fn to_order(&self, config: &MarketConfig) -> ExchangeResult<Order> {
        let size = number("q", &self.qty)?;
        let mut order = Order::new(
            &self.symbol,
            &config.trade_category,
            &self.order_id.to_string(),
            Some(self.client_order_id.as_str()),
            ms_to_micro(self.creation_time),
            parse_side(&self.side)?,
            parse_order_type(&self.order_type)?,
            number("p", &self.price)?,
            size,
        );
        order.update_time = ms_to_micro(self.transaction_time);
        order.status = parse_status(&self.status)?;
        order.execute_size = number("l", &self.last_qty)?;
        order.execute_price = number("L", &self.last_price)?;
        order.filled_size = number("z", &self.cumulative_qty)?;
        order.remain_size = (size - order.filled_size).max(0.0);
        order.fee = number("n", &self.commission)?;
        order.is_maker = self.is_maker;
        if let Some(quote) = &self.cumulative_quote {
            order.quote_vol = number("Z", quote)?;
        }
        if order.execute_size > 0.0 {
            order.message = format!(
                "{} fill",
                if self.is_maker { Liquidity::Maker.as_str() } else { Liquidity::Taker.as_str() }
            );
        }
        Ok(order)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsBalance {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "f")]
    pub free: String,
    #[serde(rename = "l")]
    pub locked: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountPosition {
    #[serde(rename = "B")]
    pub balances: Vec<WsBalance>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
enum UserEvent {
    #[serde(rename = "executionReport")]
    ExecutionReport(ExecutionReport),
    #[serde(rename = "outboundAccountPosition")]
    AccountPosition(AccountPosition),
    #[serde(other)]
    Other,
}

/// Parse one user-data frame. Reports for other symbols and unknown events
/// yield `None`.
pub fn parse_user_message(text: &str, config: &MarketConfig) -> ExchangeResult<Option<StreamMessage>> {
    match serde_json::from_str::<UserEvent>(text)? {
        UserEvent::ExecutionReport(report) => {
            if !report.symbol.eq_ignore_ascii_case(&config.trade_symbol) {
                return Ok(None);
            }
            Ok(Some(StreamMessage::Order(report.to_order(config)?)))
        }
        UserEvent::AccountPosition(position) => {
            let mut coins = Vec::with_capacity(position.balances.len());
            for balance in &position.balances {
                coins.push(Coin::new(
                    &balance.asset,
                    number("f", &balance.free)?,
                    number("l", &balance.locked)?,
                ));
            }
            Ok(Some(StreamMessage::Account(AccountCoins::new(coins))))
        }
        UserEvent::Other => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::time;

    #[test]
    fn test_public_trade_side_follows_taker() {
        let text = r#"{"e":"trade","E":1700000000001,"s":"BTCUSDT","t":42,"p":"37000.10","q":"0.015","T":1700000000000,"m":true,"M":true}"#;
        let trade = parse_trade_message(text).unwrap().unwrap();
        assert_eq!(trade.side, OrderSide::Sell);
        assert_eq!(trade.price, 37000.10);
        assert_eq!(trade.size, 0.015);
        assert_eq!(trade.time, time::ms_to_micro(1_700_000_000_000));
        assert_eq!(trade.id, "42");

        let buy = text.replace(r#""m":true"#, r#""m":false"#);
        assert_eq!(parse_trade_message(&buy).unwrap().unwrap().side, OrderSide::Buy);
    }

    #[test]
    fn test_non_trade_frames_are_skipped() {
        assert!(parse_trade_message(r#"{"result":null,"id":1}"#).unwrap().is_none());
        assert!(parse_trade_message("not json").is_err());
    }

    #[test]
    fn test_bad_number_is_a_parse_error() {
        let text = r#"{"e":"trade","E":1,"s":"BTCUSDT","t":1,"p":"abc","q":"1","T":1,"m":false}"#;
        assert!(matches!(
            parse_trade_message(text),
            Err(ExchangeError::MessageParseError(_))
        ));
    }

    #[test]
    fn test_agg_trades_page() {
        let text = r#"[{"a":26129,"p":"0.01633102","q":"4.70443515","f":27781,"l":27781,"T":1498793709153,"m":true,"M":true}]"#;
        let page: Vec<AggTrade> = serde_json::from_str(text).unwrap();
        let trade = page[0].to_trade().unwrap();
        assert_eq!(trade.id, "26129");
        assert_eq!(trade.side, OrderSide::Sell);
        assert_eq!(trade.time, 1_498_793_709_153_000);
    }

    #[test]
    fn test_execution_report() {
        let config = MarketConfig::binance_spot("ETH", "BTC");
        let text = r#"{"e":"executionReport","E":1499405658658,"s":"ETHBTC","c":"mUvoqJxFIILMdfAW5iGSOW","S":"BUY","o":"LIMIT","f":"GTC","q":"1.00000000","p":"0.10264410","P":"0.00000000","F":"0.00000000","g":-1,"C":"","x":"TRADE","X":"PARTIALLY_FILLED","r":"NONE","i":4293153,"l":"0.25000000","z":"0.25000000","L":"0.10264410","n":"0.00002566","N":"BTC","T":1499405658657,"t":77,"I":8641984,"w":true,"m":true,"M":false,"O":1499405658650,"Z":"0.02566102"}"#;
        let message = parse_user_message(text, &config).unwrap().unwrap();
        let order = match message {
            StreamMessage::Order(order) => order,
            other => panic!("expected an order, got {:?}", other),
        };
        assert_eq!(order.order_id, "4293153");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.remain_size, 0.75);
        assert_eq!(order.execute_price, 0.10264410);
        assert!(order.is_maker);

        let other = MarketConfig::binance_spot("BTC", "USDT");
        assert!(parse_user_message(text, &other).unwrap().is_none());
    }

    #[test]
    fn test_account_position_and_unknown_events() {
        let config = MarketConfig::binance_spot("BTC", "USDT");
        let text = r#"{"e":"outboundAccountPosition","E":1564034571105,"u":1564034571073,"B":[{"a":"USDT","f":"100.5","l":"20"}]}"#;
        match parse_user_message(text, &config).unwrap() {
            Some(StreamMessage::Account(coins)) => {
                let usdt = coins.get("USDT").unwrap();
                assert_eq!(usdt.free, 100.5);
                assert_eq!(usdt.locked, 20.0);
            }
            other => panic!("expected balances, got {:?}", other),
        }

        let text = r#"{"e":"balanceUpdate","E":1,"a":"BTC","d":"1.0","T":1}"#;
        assert!(parse_user_message(text, &config).unwrap().is_none());
    }

    #[test]
    fn test_order_response_with_fills() {
        let config = MarketConfig::binance_spot("BTC", "USDT");
        let text = r#"{"symbol":"BTCUSDT","orderId":28,"orderListId":-1,"clientOrderId":"abc","transactTime":1507725176595,"price":"0.00000000","origQty":"2.00000000","executedQty":"2.00000000","cummulativeQuoteQty":"201.00000000","status":"FILLED","timeInForce":"GTC","type":"MARKET","side":"SELL","fills":[{"price":"100.00","qty":"1.00","commission":"0.1","commissionAsset":"USDT","tradeId":56},{"price":"101.00","qty":"1.00","commission":"0.1","commissionAsset":"USDT","tradeId":57}]}"#;
        let response: OrderResponse = serde_json::from_str(text).unwrap();
        let order = response.to_order(&config, 0).unwrap();
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.execute_price, 100.5);
        assert_eq!(order.remain_size, 0.0);
        assert!((order.fee - 0.2).abs() < 1e-12);
        assert_eq!(order.create_time, time::ms_to_micro(1_507_725_176_595));
    }

    #[test]
    fn test_account_response_skips_empty_balances() {
        let text = r#"{"makerCommission":15,"balances":[{"asset":"BTC","free":"0.5","locked":"0.0"},{"asset":"LTC","free":"0.0","locked":"0.0"}]}"#;
        let response: AccountResponse = serde_json::from_str(text).unwrap();
        let coins = response.to_coins().unwrap();
        assert_eq!(coins.coins.len(), 1);
        assert_eq!(coins.get("btc").unwrap().free, 0.5);
    }

    #[test]
    fn test_depth_to_board() {
        let text = r#"{"lastUpdateId":1027024,"bids":[["4.00000000","431.00000000"]],"asks":[["4.00000200","12.00000000"]]}"#;
        let depth: DepthSnapshot = serde_json::from_str(text).unwrap();
        let board = depth.to_board(5).unwrap();
        assert_eq!(board.best_bid(), Some(4.0));
        assert_eq!(board.best_ask(), Some(4.000002));
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0.1 + 0.2, 0.01), "0.30");
        assert_eq!(format_decimal(0.00012, 0.00001), "0.00012");
        assert_eq!(format_decimal(42.0, 1.0), "42");
    }
}
