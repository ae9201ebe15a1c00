use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::domain::entities::market_config::MarketConfig;
use crate::domain::errors::ExchangeError;
use crate::domain::repositories::event_stream::{EventStream, StreamMessage};
use crate::domain::repositories::exchange_client::ExchangeResult;

use super::messages::{parse_trade_message, parse_user_message};
use super::rest::BinanceClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Binance drops listen keys after 60 minutes without a keepalive
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

async fn open(url: &str) -> ExchangeResult<WsStream> {
    match tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await {
        Ok(Ok((socket, _))) => Ok(socket),
        Ok(Err(e)) => Err(ExchangeError::WebSocketError(format!("connect failed: {}", e))),
        Err(_) => Err(ExchangeError::WebSocketError(format!(
            "connect timed out after {:?}",
            CONNECT_TIMEOUT
        ))),
    }
}

/// Next text frame. Pings are answered; `None` when the socket closed.
async fn next_text(socket: &mut WsStream) -> ExchangeResult<Option<String>> {
    while let Some(frame) = socket.next().await {
        match frame {
            Ok(Message::Text(text)) => return Ok(Some(text)),
            Ok(Message::Ping(data)) => {
                socket
                    .send(Message::Pong(data))
                    .await
                    .map_err(|e| ExchangeError::WebSocketError(e.to_string()))?;
            }
            Ok(Message::Close(frame)) => {
                debug!("Server closed the socket: {:?}", frame);
                return Ok(None);
            }
            Ok(_) => {}
            Err(e) => return Err(ExchangeError::WebSocketError(e.to_string())),
        }
    }
    Ok(None)
}

async fn close_socket(socket: &mut Option<WsStream>, name: &str) {
    if let Some(mut socket) = socket.take() {
        if let Err(e) = socket.close(None).await {
            debug!("Closing {} failed: {}", name, e);
        }
    }
}

/// Public `<symbol>@trade` feed
pub struct BinanceTradeStream {
    name: String,
    url: String,
    socket: Option<WsStream>,
}

impl BinanceTradeStream {
    pub fn new(endpoint: &str, config: &MarketConfig) -> Self {
        let symbol = config.trade_symbol.to_lowercase();
        Self {
            name: format!("binance:{}@trade", symbol),
            url: format!("{}/{}@trade", endpoint.trim_end_matches('/'), symbol),
            socket: None,
        }
    }
}

#[async_trait]
impl EventStream for BinanceTradeStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> ExchangeResult<()> {
        close_socket(&mut self.socket, &self.name).await;
        self.socket = Some(open(&self.url).await?);
        info!("Connected to {}", self.url);
        Ok(())
    }

    async fn next_batch(&mut self) -> ExchangeResult<Option<Vec<StreamMessage>>> {
        let socket = self.socket.as_mut().ok_or(ExchangeError::NotConnected)?;
        loop {
            let text = match next_text(socket).await? {
                Some(text) => text,
                None => {
                    self.socket = None;
                    return Ok(None);
                }
            };
            match parse_trade_message(&text) {
                Ok(Some(trade)) => return Ok(Some(vec![StreamMessage::Trade(trade)])),
                Ok(None) => debug!("Skipping frame on {}: {}", self.name, text),
                Err(e) => warn!("Bad frame on {}: {}", self.name, e),
            }
        }
    }

    async fn close(&mut self) {
        close_socket(&mut self.socket, &self.name).await;
    }
}

/// Private order and balance reports over a listen key
pub struct BinanceUserStream {
    name: String,
    endpoint: String,
    client: Arc<BinanceClient>,
    config: MarketConfig,
    socket: Option<WsStream>,
    listen_key: Option<String>,
    next_keepalive: Instant,
}

impl BinanceUserStream {
    pub fn new(endpoint: &str, client: Arc<BinanceClient>, config: MarketConfig) -> Self {
        Self {
            name: format!("binance:user:{}", config.trade_symbol),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
            config,
            socket: None,
            listen_key: None,
            next_keepalive: Instant::now() + LISTEN_KEY_KEEPALIVE,
        }
    }

    async fn keep_alive(&mut self) {
        if let Some(key) = &self.listen_key {
            if let Err(e) = self.client.keep_alive_listen_key(key).await {
                // a dead key surfaces as a closed socket and a reconnect
                warn!("Listen key keepalive failed: {}", e);
            }
        }
        self.next_keepalive = Instant::now() + LISTEN_KEY_KEEPALIVE;
    }
}

#[async_trait]
impl EventStream for BinanceUserStream {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&mut self) -> ExchangeResult<()> {
        close_socket(&mut self.socket, &self.name).await;
        let key = self.client.create_listen_key().await?;
        self.socket = Some(open(&format!("{}/{}", self.endpoint, key)).await?);
        self.listen_key = Some(key);
        self.next_keepalive = Instant::now() + LISTEN_KEY_KEEPALIVE;
        info!("Connected user-data stream for {}", self.config.trade_symbol);
        Ok(())
    }

    async fn next_batch(&mut self) -> ExchangeResult<Option<Vec<StreamMessage>>> {
        loop {
            let socket = self.socket.as_mut().ok_or(ExchangeError::NotConnected)?;
            let text = match tokio::time::timeout_at(self.next_keepalive, next_text(socket)).await {
                Err(_) => {
                    self.keep_alive().await;
                    continue;
                }
                Ok(frame) => match frame? {
                    Some(text) => text,
                    None => {
                        self.socket = None;
                        return Ok(None);
                    }
                },
            };
            match parse_user_message(&text, &self.config) {
                Ok(Some(message)) => return Ok(Some(vec![message])),
                Ok(None) => debug!("Skipping user event: {}", text),
                Err(e) => warn!("Bad user event: {}", e),
            }
        }
    }

    async fn close(&mut self) {
        close_socket(&mut self.socket, &self.name).await;
        self.listen_key = None;
    }
}
