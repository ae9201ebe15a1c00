use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::entities::order::OrderStatus;
use crate::persistence::DatabaseError;

/// Engine-level failure taxonomy
///
/// Trade store, order engine and scheduler all surface these to their
/// callers. Whether a run continues after one depends on
/// [`EngineError::is_recoverable`] and on the run mode.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "detail")]
pub enum EngineError {
    #[error("Download failed for {what} after {attempts} attempts: {reason}")]
    DownloadFailed {
        what: String,
        attempts: u32,
        reason: String,
    },

    #[error("Coverage gap: archive ends at {archive_end}, recent store starts at {recent_start}")]
    CoverageGap {
        archive_end: i64,
        recent_start: i64,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {order_id} is already {status}")]
    OrderAlreadyTerminal {
        order_id: String,
        status: OrderStatus,
    },

    #[error("Insufficient {currency} balance: required {required:.8}, available {available:.8}")]
    InsufficientBalance {
        currency: String,
        required: f64,
        available: f64,
    },

    #[error("Stream {stream} disconnected: {reason}")]
    StreamDisconnected { stream: String, reason: String },

    #[error("Configuration mismatch for {key}: {reason}")]
    ConfigMismatch { key: String, reason: String },

    #[error("Market not opened: {0}")]
    MarketNotOpened(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Agent rejected: {0}")]
    AgentRejected(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Exchange error: {0}")]
    Exchange(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl EngineError {
    /// Recoverable errors may be logged and skipped by live runs; everything
    /// else stops the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::DownloadFailed { .. }
                | EngineError::CoverageGap { .. }
                | EngineError::StreamDisconnected { .. }
                | EngineError::OrderNotFound(_)
                | EngineError::OrderAlreadyTerminal { .. }
                | EngineError::InsufficientBalance { .. }
                | EngineError::InvalidOrder(_)
                | EngineError::Exchange(_)
        )
    }
}

impl From<DatabaseError> for EngineError {
    fn from(e: DatabaseError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<ExchangeError> for EngineError {
    fn from(e: ExchangeError) -> Self {
        EngineError::Exchange(e.to_string())
    }
}

impl<T> From<mpsc::error::SendError<T>> for EngineError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        EngineError::ChannelClosed(e.to_string())
    }
}

/// Venue and transport failures reported by adapters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExchangeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Failed to parse message: {0}")]
    MessageParseError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Not connected")]
    NotConnected,

    #[error("{0} is not supported by this venue")]
    NotSupported(String),
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        ExchangeError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::MessageParseError(e.to_string())
    }
}
