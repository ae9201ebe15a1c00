pub mod event_stream;
pub mod exchange_client;
pub mod market_query;
