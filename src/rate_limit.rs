use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter configuration
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum requests per minute
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 1200, // Binance spot REST weight budget
        }
    }
}

/// Shared limiter for outgoing REST calls
pub type RestRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Create a new rate limiter; a zero budget is treated as one request per minute.
pub fn create_rate_limiter(config: RateLimiterConfig) -> RestRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Wait for a permit, logging when the budget is exhausted.
pub async fn acquire(limiter: &RestRateLimiter, what: &str) {
    if limiter.check().is_err() {
        tracing::debug!("Rate limit reached, delaying {}", what);
        limiter.until_ready().await;
    }
}
