//! Download rate limiting
//!
//! A token bucket per client IP. The client is identified by the `X-Real-IP`
//! header set by the reverse proxy, falling back to the peer address.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Header carrying the client address behind a reverse proxy
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Buckets are pruned once the map grows past this many clients
const PRUNE_THRESHOLD: usize = 10_000;

/// The `rate_limit` config section; defaults to one download per client every five seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity
    pub max_requests: u32,

    /// Seconds for an empty bucket to refill completely
    pub window_secs: u64,

    pub enabled: bool,

    /// Identify clients by the `X-Real-IP` header when present
    pub trust_real_ip_header: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 1,
            window_secs: 5,
            enabled: true,
            trust_real_ip_header: true,
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Trust or ignore the `X-Real-IP` header
    pub fn with_real_ip_header(mut self, trust: bool) -> Self {
        self.trust_real_ip_header = trust;
        self
    }
}

/// Shared bucket map, cloned into the middleware state
#[derive(Clone)]
pub struct RateLimiterState {
    config: Arc<RateLimitConfig>,
    buckets: Arc<Mutex<HashMap<String, TokenBucket>>>,
}

impl RateLimiterState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config: Arc::new(config),
            buckets: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Take a token for `client`, or return the seconds until one is available
    pub async fn check(&self, client: &str) -> Result<(), u64> {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;

        if buckets.len() > PRUNE_THRESHOLD {
            buckets.retain(|_, bucket| !bucket.is_full(now));
        }

        let bucket = buckets.entry(client.to_string()).or_insert_with(|| {
            TokenBucket::new(self.config.max_requests, self.config.window_secs, now)
        });

        if bucket.try_consume(now) {
            Ok(())
        } else {
            Err(bucket.secs_until_available())
        }
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("config", &self.config)
            .finish()
    }
}

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    capacity: f64,
    /// Tokens per second
    refill_rate: f64,
}

impl TokenBucket {
    fn new(capacity: u32, window_secs: u64, now: Instant) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            tokens: capacity,
            last_refill: now,
            capacity,
            refill_rate: capacity / window_secs.max(1) as f64,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn is_full(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * self.refill_rate >= self.capacity
    }

    fn secs_until_available(&self) -> u64 {
        let needed = (1.0 - self.tokens).max(0.0);
        ((needed / self.refill_rate).ceil() as u64).max(1)
    }
}

/// Identify the client for rate limiting
pub fn client_identifier(request: &Request, config: &RateLimitConfig) -> String {
    if config.trust_real_ip_header {
        if let Some(value) = request
            .headers()
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return value.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Download rate limiting middleware
///
/// # Example
///
/// ```rust,no_run
/// use axum::{Router, routing::get, middleware};
/// use update_butler_api::rate_limit::{download_rate_limit, RateLimiterState, RateLimitConfig};
///
/// let limiter = RateLimiterState::new(RateLimitConfig::default());
/// let app: Router = Router::new()
///     .route("/download", get(|| async { "bytes" }))
///     .layer(middleware::from_fn_with_state(limiter, download_rate_limit));
/// ```
pub async fn download_rate_limit(
    State(limiter): State<RateLimiterState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !limiter.config.enabled {
        return Ok(next.run(request).await);
    }

    let client = client_identifier(&request, &limiter.config);
    debug!(client = %client, "Checking download rate limit");

    if let Err(retry_after) = limiter.check(&client).await {
        warn!(client = %client, retry_after, "Download rate limit exceeded");
        return Err(ApiError::rate_limited(retry_after));
    }

    Ok(next.run(request).await)
}
