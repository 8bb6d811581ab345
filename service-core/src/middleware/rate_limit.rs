use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

use crate::error::AppError;
use crate::utils::client_ip::{FORWARDED_FOR_HEADER, resolve_client_ip};

/// Rate limiter keyed by resolved client address.
pub type ClientIpRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

/// Allow `attempts` requests per client address in each `window_seconds`,
/// replenished evenly across the window.
pub fn create_client_ip_rate_limiter(attempts: u32, window_seconds: u64) -> ClientIpRateLimiter {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period_ms = (window_seconds.saturating_mul(1000) / u64::from(burst.get())).max(1);
    let quota = Quota::with_period(Duration::from_millis(period_ms))
        .map(|quota| quota.allow_burst(burst))
        .unwrap_or_else(|| Quota::per_second(burst));

    Arc::new(RateLimiter::dashmap(quota))
}

/// Rejects with 429 once the caller's address has used its quota.
///
/// The key follows the same precedence as every other client-address consumer,
/// minus the request body, which is not read here.
pub async fn client_ip_rate_limit_middleware(
    State(limiter): State<ClientIpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let forwarded_for = request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok());
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = resolve_client_ip(None, forwarded_for, peer);

    match limiter.check_key(&key) {
        Ok(_) => Ok(next.run(request).await),
        Err(negative) => {
            let wait = negative.wait_time_from(DefaultClock::default().now());
            tracing::warn!(client_ip = %key, retry_after_secs = wait.as_secs(), "Rate limit exceeded");
            Err(AppError::TooManyRequests(
                "Too many requests from this address. Please try again later.".to_string(),
                Some(wait.as_secs().max(1)),
            ))
        }
    }
}
