use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BinanceConfig;
use crate::domain::entities::account::AccountCoins;
use crate::domain::entities::board::BoardSnapshot;
use crate::domain::entities::market_config::MarketConfig;
use crate::domain::entities::order::{Order, OrderType};
use crate::domain::entities::trade::{OrderSide, Trade};
use crate::domain::errors::{EngineError, ExchangeError};
use crate::domain::repositories::exchange_client::{ExchangeResult, MarketDataSource, OrderGateway, TradePage};
use crate::domain::value_objects::time::{self, floor_day, micro_to_ms, MicroSec};
use crate::rate_limit::{self, RateLimiterConfig, RestRateLimiter};

use super::messages::{
    format_decimal, side_param, AccountResponse, AggTrade, DepthSnapshot, ListenKey, OrderResponse, RestTrade,
};

type HmacSha256 = Hmac<Sha256>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const USER_AGENT: &str = concat!("tickloom/", env!("CARGO_PKG_VERSION"));

/// Binance rejects `aggTrades` windows of one hour or more
const AGG_WINDOW: MicroSec = time::minutes(60) - 1_000;

/// Binance spot REST adapter
///
/// Serves public history as a [`MarketDataSource`] and signed order routing
/// as an [`OrderGateway`]. Every request waits on the shared rate limiter.
pub struct BinanceClient {
    http: Client,
    config: BinanceConfig,
    limiter: RestRateLimiter,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EngineError::Exchange(format!("failed to build HTTP client: {}", e)))?;
        let limiter = rate_limit::create_rate_limiter(RateLimiterConfig {
            requests_per_minute: config.requests_per_minute,
        });

        info!(
            "Binance client for {} ({})",
            config.rest_endpoint,
            if config.has_credentials() { "signed" } else { "public only" }
        );
        Ok(Self { http, config, limiter })
    }

    pub fn config(&self) -> &BinanceConfig {
        &self.config
    }

    /// Hex HMAC-SHA256 of `payload` under the API secret
    pub(crate) fn sign(&self, payload: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExchangeError::AuthenticationError(format!("HMAC error: {}", e)))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Query string with `recvWindow`, `timestamp` and the trailing signature.
    pub(crate) fn signed_query(&self, params: &[(&str, String)], timestamp_ms: i64) -> ExchangeResult<String> {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in params {
            query.append_pair(key, value);
        }
        query.append_pair("recvWindow", &self.config.recv_window_ms.to_string());
        query.append_pair("timestamp", &timestamp_ms.to_string());
        let query = query.finish();

        let signature = self.sign(&query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    fn require_credentials(&self) -> ExchangeResult<()> {
        if self.config.has_credentials() {
            Ok(())
        } else {
            Err(ExchangeError::AuthenticationError(
                "BINANCE_API_KEY and BINANCE_API_SECRET are not set".to_string(),
            ))
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder, what: &str) -> ExchangeResult<T> {
        rate_limit::acquire(&self.limiter, what).await;
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Binance {} failed: {} {}", what, status, body);
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn public<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> ExchangeResult<T> {
        let url = format!("{}{}", self.config.rest_endpoint, path);
        self.send(self.http.get(&url).query(params), path).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        self.require_credentials()?;
        let query = self.signed_query(params, micro_to_ms(time::now()))?;
        let url = format!("{}{}?{}", self.config.rest_endpoint, path, query);
        let request = self
            .http
            .request(method, &url)
            .header("X-MBX-APIKEY", self.config.api_key.as_str());
        self.send(request, path).await
    }

    /// Calls that need the API key but no signature (listen keys)
    async fn keyed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        self.require_credentials()?;
        let url = format!("{}{}", self.config.rest_endpoint, path);
        let request = self
            .http
            .request(method, &url)
            .query(params)
            .header("X-MBX-APIKEY", self.config.api_key.as_str());
        self.send(request, path).await
    }

    pub async fn create_listen_key(&self) -> ExchangeResult<String> {
        let key: ListenKey = self.keyed(Method::POST, "/api/v3/userDataStream", &[]).await?;
        debug!("Created user-data listen key");
        Ok(key.listen_key)
    }

    pub async fn keep_alive_listen_key(&self, listen_key: &str) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .keyed(
                Method::PUT,
                "/api/v3/userDataStream",
                &[("listenKey", listen_key.to_string())],
            )
            .await?;
        debug!("Listen key kept alive");
        Ok(())
    }

    async fn agg_trades(&self, config: &MarketConfig, params: Vec<(&str, String)>) -> ExchangeResult<Vec<AggTrade>> {
        let mut query = vec![
            ("symbol", config.trade_symbol.clone()),
            ("limit", self.config.page_limit.to_string()),
        ];
        query.extend(params);
        self.public("/api/v3/aggTrades", &query).await
    }
}

fn to_trades(page: &[AggTrade], start: MicroSec, end: MicroSec) -> ExchangeResult<Vec<Trade>> {
    let mut trades = Vec::with_capacity(page.len());
    for agg in page {
        let trade = agg.to_trade()?;
        if trade.time >= start && trade.time < end {
            trades.push(trade);
        }
    }
    Ok(trades)
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn latest_archive_day(&self, _config: &MarketConfig) -> ExchangeResult<MicroSec> {
        Ok(floor_day(time::now()) - time::days(1))
    }

    async fn fetch_archive_day(&self, config: &MarketConfig, day: MicroSec) -> ExchangeResult<Vec<Trade>> {
        let day = floor_day(day);
        let end = day + time::days(1);
        let mut trades = Vec::new();
        let mut page = TradePage::New;

        while page != TradePage::Done {
            let (batch, next) = self.fetch_trades(config, day, end, &page).await?;
            trades.extend(batch);
            page = next;
        }
        info!(
            "Fetched {} trades of {} for {}",
            trades.len(),
            time::date_string(day),
            config.trade_symbol
        );
        Ok(trades)
    }

    async fn fetch_recent_trades(&self, config: &MarketConfig) -> ExchangeResult<Vec<Trade>> {
        let page: Vec<RestTrade> = self
            .public(
                "/api/v3/trades",
                &[
                    ("symbol", config.trade_symbol.clone()),
                    ("limit", self.config.page_limit.to_string()),
                ],
            )
            .await?;
        page.iter().map(RestTrade::to_trade).collect()
    }

    /// Time windows until the first trade is found, then trade ids.
    async fn fetch_trades(
        &self,
        config: &MarketConfig,
        start: MicroSec,
        end: MicroSec,
        page: &TradePage,
    ) -> ExchangeResult<(Vec<Trade>, TradePage)> {
        let limit = self.config.page_limit as usize;

        match page {
            TradePage::Done => Ok((Vec::new(), TradePage::Done)),
            TradePage::FromId(id) => {
                let raw = self.agg_trades(config, vec![("fromId", id.to_string())]).await?;
                let trades = to_trades(&raw, start, end)?;
                let past_end = raw.last().map_or(true, |t| time::ms_to_micro(t.time) >= end);
                let next = match raw.last() {
                    Some(last) if !past_end && raw.len() >= limit => TradePage::FromId(last.id + 1),
                    _ => TradePage::Done,
                };
                Ok((trades, next))
            }
            TradePage::New | TradePage::Time(_) => {
                let from = match page {
                    TradePage::Time(t) => *t,
                    _ => start,
                };
                if from >= end {
                    return Ok((Vec::new(), TradePage::Done));
                }
                let window_end = (from + AGG_WINDOW).min(end);
                let raw = self
                    .agg_trades(
                        config,
                        vec![
                            ("startTime", micro_to_ms(from).to_string()),
                            ("endTime", (micro_to_ms(window_end) - 1).max(micro_to_ms(from)).to_string()),
                        ],
                    )
                    .await?;
                let trades = to_trades(&raw, start, end)?;
                let next = match raw.last() {
                    Some(last) if raw.len() >= limit => TradePage::FromId(last.id + 1),
                    _ if window_end >= end => TradePage::Done,
                    _ => TradePage::Time(window_end),
                };
                Ok((trades, next))
            }
        }
    }

    async fn board_snapshot(&self, config: &MarketConfig) -> ExchangeResult<BoardSnapshot> {
        let depth: DepthSnapshot = self
            .public(
                "/api/v3/depth",
                &[
                    ("symbol", config.trade_symbol.clone()),
                    ("limit", config.board_depth.clamp(1, 5000).to_string()),
                ],
            )
            .await?;
        depth.to_board(time::now())
    }
}

#[async_trait]
impl OrderGateway for BinanceClient {
    fn name(&self) -> &str {
        "binance"
    }

    async fn new_order(
        &self,
        config: &MarketConfig,
        side: OrderSide,
        price: f64,
        size: f64,
        order_type: OrderType,
        client_order_id: Option<&str>,
    ) -> ExchangeResult<Vec<Order>> {
        let mut params = vec![
            ("symbol", config.trade_symbol.clone()),
            ("side", side_param(side)?.to_string()),
            ("quantity", format_decimal(size, config.size_unit)),
            ("newOrderRespType", "FULL".to_string()),
        ];
        match order_type {
            OrderType::Limit => {
                params.push(("type", "LIMIT".to_string()));
                params.push(("timeInForce", "GTC".to_string()));
                params.push(("price", format_decimal(price, config.price_unit)));
            }
            OrderType::Market => params.push(("type", "MARKET".to_string())),
        }
        if let Some(id) = client_order_id {
            params.push(("newClientOrderId", id.to_string()));
        }

        let response: OrderResponse = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let order = response.to_order(config, time::now())?;
        info!("Binance accepted {} {} order {}", order.side, order.order_type, order.order_id);
        Ok(vec![order])
    }

    async fn cancel_order(&self, config: &MarketConfig, order_id: &str) -> ExchangeResult<Order> {
        let mut params = vec![("symbol", config.trade_symbol.clone())];
        // engine ids are the venue's numeric ids; anything else is a client id
        match order_id.parse::<i64>() {
            Ok(id) => params.push(("orderId", id.to_string())),
            Err(_) => params.push(("origClientOrderId", order_id.to_string())),
        }
        let response: OrderResponse = self.signed(Method::DELETE, "/api/v3/order", &params).await?;
        response.to_order(config, time::now())
    }

    async fn open_orders(&self, config: &MarketConfig) -> ExchangeResult<Vec<Order>> {
        let responses: Vec<OrderResponse> = self
            .signed(
                Method::GET,
                "/api/v3/openOrders",
                &[("symbol", config.trade_symbol.clone())],
            )
            .await?;
        let now = time::now();
        responses.iter().map(|r| r.to_order(config, now)).collect()
    }

    async fn get_account(&self) -> ExchangeResult<AccountCoins> {
        let account: AccountResponse = self
            .signed(Method::GET, "/api/v3/account", &[("omitZeroBalances", "true".to_string())])
            .await?;
        account.to_coins()
    }

    async fn is_healthy(&self) -> bool {
        let url = format!("{}/api/v3/ping", self.config.rest_endpoint);
        match self.http.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!("Binance health check failed: {}", e);
                false
            }
        }
    }
}
