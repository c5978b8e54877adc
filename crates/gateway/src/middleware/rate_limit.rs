//! Service-wide rate limiting using the token bucket algorithm
//!
//! This guards the process as a whole; per-caller admission happens inside
//! the control loop.

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use petrorag_common::errors::{AppError, Result};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a new rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Result<Arc<GlobalRateLimiter>> {
    let rps = NonZeroU32::new(requests_per_second).ok_or_else(|| {
        AppError::configuration("global requests per second must be at least 1")
    })?;
    let burst = NonZeroU32::new(burst)
        .ok_or_else(|| AppError::configuration("global burst must be at least 1"))?;

    Ok(Arc::new(RateLimiter::direct(Quota::per_second(rps).allow_burst(burst))))
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    request: Request,
    next: Next,
    limiter: Arc<GlobalRateLimiter>,
) -> Response {
    match limiter.check() {
        Ok(_) => next.run(request).await,
        Err(not_until) => {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            tracing::warn!(wait_ms = wait.as_millis() as u64, "Global rate limit exceeded");
            AppError::rate_limited("global", wait.as_secs_f64()).into_response()
        }
    }
}

/// Bound the number of requests in flight; excess requests wait for a permit
pub async fn concurrency_middleware(
    request: Request,
    next: Next,
    permits: Arc<Semaphore>,
) -> Response {
    match permits.acquire_owned().await {
        Ok(_permit) => next.run(request).await,
        Err(_) => AppError::internal("Request limiter is closed").into_response(),
    }
}
