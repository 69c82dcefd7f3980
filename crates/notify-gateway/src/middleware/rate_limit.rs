//! Rate limiting middleware using token buckets.
//!
//! Per-IP limits in two tiers. Lifecycle routes share the general tier and
//! send routes use their own, so a burst of notifications never locks an
//! operator out of `reset`.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::domain::config::RateLimitConfig;
use crate::domain::error::ApiError;
use crate::middleware::metrics::GatewayMetrics;

/// Which bucket a route draws from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateTier {
    /// request-qr and reset
    General,
    /// send-product-info
    Send,
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Token bucket entry for an IP address
struct TokenBucket {
    general: DirectLimiter,
    send: DirectLimiter,
    /// Last access time (for cleanup)
    last_access: Instant,
}

fn per_minute(n: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN))
}

impl TokenBucket {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            general: RateLimiter::direct(per_minute(config.general_per_minute)),
            send: RateLimiter::direct(per_minute(config.send_per_minute)),
            last_access: Instant::now(),
        }
    }

    fn check(&mut self, tier: RateTier) -> Result<(), Duration> {
        self.last_access = Instant::now();
        let limiter = match tier {
            RateTier::General => &self.general,
            RateTier::Send => &self.send,
        };
        limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now()))
    }
}

/// Rate limiter state shared across requests
pub struct RateLimitState {
    /// Per-IP token buckets
    buckets: DashMap<IpAddr, TokenBucket>,
    config: RateLimitConfig,
}

impl RateLimitState {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    /// Check if a request should be allowed, returning the wait otherwise
    pub fn check(&self, ip: IpAddr, tier: RateTier) -> Result<(), Duration> {
        if !self.config.enabled || self.config.whitelist.contains(&ip) {
            return Ok(());
        }

        let mut bucket = self.buckets.entry(ip).or_insert_with(|| {
            debug!(ip = %ip, "Creating new rate limit bucket");
            TokenBucket::new(&self.config)
        });
        bucket.check(tier)
    }

    /// Clean up old buckets (call periodically)
    pub fn cleanup(&self, max_age: Duration) {
        let now = Instant::now();
        self.buckets.retain(|ip, bucket| {
            let age = now.duration_since(bucket.last_access);
            if age > max_age {
                debug!(ip = %ip, age_secs = age.as_secs(), "Removing stale rate limit bucket");
                false
            } else {
                true
            }
        });
    }

    /// Get number of tracked IPs
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Rate limit layer for one tier
#[derive(Clone)]
pub struct RateLimitLayer {
    state: Arc<RateLimitState>,
    tier: RateTier,
    metrics: Arc<GatewayMetrics>,
}

impl RateLimitLayer {
    pub fn new(state: Arc<RateLimitState>, tier: RateTier, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            state,
            tier,
            metrics,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            layer: self.clone(),
        }
    }
}

/// Rate limit service
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let layer = self.layer.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let ip = extract_client_ip(&req);

            match layer.state.check(ip, layer.tier) {
                Ok(()) => inner.call(req).await,
                Err(retry_after) => {
                    let retry_ms = retry_after.as_millis() as u64;
                    warn!(
                        ip = %ip,
                        tier = ?layer.tier,
                        retry_after_ms = retry_ms,
                        "Rate limit exceeded"
                    );
                    layer.metrics.record_rate_limit_rejection();
                    Ok(rate_limit_response(retry_ms))
                }
            }
        })
    }
}

/// Extract client IP from request
pub fn extract_client_ip<B>(req: &Request<B>) -> IpAddr {
    // Try X-Forwarded-For header first (for proxied requests)
    if let Some(first_ip) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
            return ip;
        }
    }

    if let Some(ip) = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ip;
    }

    // Fall back to connection info
    if let Some(connect_info) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return connect_info.0.ip();
    }

    // Default to localhost if we can't determine IP
    IpAddr::from([127, 0, 0, 1])
}

/// Create rate limit exceeded response
fn rate_limit_response(retry_after_ms: u64) -> Response {
    let mut response = ApiError::rate_limited().into_response();
    let seconds = retry_after_ms.div_ceil(1000).max(1);
    if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

/// Background task to clean up stale rate limit buckets
pub async fn cleanup_task(state: Arc<RateLimitState>, interval: Duration, max_age: Duration) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        state.cleanup(max_age);
    }
}
