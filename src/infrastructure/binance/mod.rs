//! Binance spot venue adapter

pub mod messages;
pub mod rest;
pub mod ws;

pub use rest::BinanceClient;
pub use ws::{BinanceTradeStream, BinanceUserStream};
