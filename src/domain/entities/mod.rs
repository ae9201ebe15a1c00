pub mod account;
pub mod bar;
pub mod board;
pub mod market_config;
pub mod order;
pub mod trade;
