pub mod bar_aggregator;
pub mod bar_cache;
pub mod book;
pub mod order_engine;
pub mod order_list;
pub mod position;
