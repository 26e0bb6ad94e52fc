//! Rate limiting middleware
//!
//! Per-client-IP limiting with a keyed map of governor limiters. Two
//! instances run: a strict one in front of login and password-reset
//! endpoints and a looser one for the rest of the API.

use std::{
    collections::HashMap,
    convert::Infallible,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::RateLimitConfig;
use crate::utils::AppError;
use crate::AppState;

/// Per-IP rate limiter using governor
pub type IpRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

const MAX_TRACKED_IPS: usize = 10_000;

/// Key shared by requests whose client address cannot be determined
const UNKNOWN_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Thread-safe map of IP addresses to their rate limiters
#[derive(Clone)]
pub struct RateLimitState {
    limiters: Arc<RwLock<HashMap<IpAddr, Arc<IpRateLimiter>>>>,
    quota: Quota,
    enabled: bool,
    trust_proxy: bool,
}

impl RateLimitState {
    pub fn new(quota: Quota, enabled: bool, trust_proxy: bool) -> Self {
        Self {
            limiters: Arc::new(RwLock::new(HashMap::new())),
            quota,
            enabled,
            trust_proxy,
        }
    }

    /// `auth_max_attempts` per `auth_window_secs`, replenished evenly across the window
    pub fn for_auth(config: &RateLimitConfig, trust_proxy: bool) -> Self {
        let attempts = NonZeroU32::new(config.auth_max_attempts).unwrap_or(NonZeroU32::MIN);
        let period = Duration::from_secs(config.auth_window_secs.max(1)) / attempts.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(attempts);
        Self::new(quota, config.enabled, trust_proxy)
    }

    pub fn for_api(config: &RateLimitConfig, trust_proxy: bool) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(config.api_requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.api_burst).unwrap_or(NonZeroU32::MIN));
        Self::new(quota, config.enabled, trust_proxy)
    }

    /// Get or create a rate limiter for the given IP address
    async fn get_limiter(&self, ip: IpAddr) -> Arc<IpRateLimiter> {
        {
            let limiters = self.limiters.read().await;
            if let Some(limiter) = limiters.get(&ip) {
                return limiter.clone();
            }
        }

        let mut limiters = self.limiters.write().await;

        // Double-check after acquiring write lock
        if let Some(limiter) = limiters.get(&ip) {
            return limiter.clone();
        }

        let limiter = Arc::new(RateLimiter::direct(self.quota));
        limiters.insert(ip, limiter.clone());
        limiter
    }

    /// Take one cell for `ip`; on refusal, the seconds until the next one frees up
    pub async fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let limiter = self.get_limiter(ip).await;
        limiter.check().map_err(|not_until| {
            let wait = not_until.wait_time_from(DefaultClock::default().now());
            wait.as_secs().max(1)
        })
    }

    /// Bound the number of tracked clients
    pub async fn cleanup(&self) {
        let mut limiters = self.limiters.write().await;
        let initial_count = limiters.len();

        if limiters.len() > MAX_TRACKED_IPS {
            let to_remove: Vec<_> = limiters
                .keys()
                .take(limiters.len() / 2)
                .cloned()
                .collect();

            for ip in to_remove {
                limiters.remove(&ip);
            }

            debug!(
                "Rate limiter cleanup: {} -> {} entries",
                initial_count,
                limiters.len()
            );
        }
    }
}

/// Client address, preferring the first `X-Forwarded-For` hop when the proxy is trusted
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Client address extractor for handlers that audit or rate-limit by IP
#[derive(Debug, Clone, Copy)]
pub struct ClientIp(pub Option<IpAddr>);

impl ClientIp {
    pub fn for_audit(&self) -> Option<String> {
        self.0.map(|ip| ip.to_string())
    }
}

impl FromRequestParts<AppState> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(client_ip(
            &parts.headers,
            &parts.extensions,
            state.config.server.trust_proxy_headers,
        )))
    }
}

/// Rate limiting middleware for Axum
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !rate_limit.enabled {
        return Ok(next.run(request).await);
    }

    let ip = client_ip(request.headers(), request.extensions(), rate_limit.trust_proxy)
        .unwrap_or(UNKNOWN_CLIENT);

    match rate_limit.check(ip).await {
        Ok(()) => {
            debug!(ip = %ip, "Rate limit check passed");
            Ok(next.run(request).await)
        }
        Err(retry_after_secs) => {
            warn!(ip = %ip, path = %request.uri().path(), retry_after_secs, "Rate limit exceeded");
            Err(AppError::RateLimited { retry_after_secs })
        }
    }
}

/// Spawn a background task to periodically clean up rate limiters
pub fn spawn_rate_limit_cleanup(state: RateLimitState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            state.cleanup().await;
        }
    });
}
