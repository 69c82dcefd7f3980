//! Middleware stack for the notification gateway.
//!
//! Layer order on a mutating route:
//! Request → Tracing → CORS → BodyLimit → RateLimit(tier) → Auth → Handler

pub mod auth;
pub mod cors;
pub mod metrics;
pub mod rate_limit;
pub mod tracing;

pub use auth::{constant_time_compare, AuthConfig, AuthLayer};
pub use cors::create_cors_layer;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use rate_limit::{cleanup_task, RateLimitLayer, RateLimitState, RateTier};
pub use tracing::TracingLayer;

use std::sync::Arc;

use crate::domain::config::GatewayConfig;

/// Middleware stack builder
pub struct MiddlewareStack {
    pub general_rate_limit: RateLimitLayer,
    pub send_rate_limit: RateLimitLayer,
    pub auth: AuthLayer,
    /// Auth for the realtime upgrade, which also accepts a query token
    pub realtime_auth: AuthLayer,
    pub tracing: TracingLayer,
    pub metrics: Arc<GatewayMetrics>,
    rate_limit_state: Arc<RateLimitState>,
}

impl MiddlewareStack {
    /// Create middleware stack from gateway config
    pub fn from_config(config: &GatewayConfig, metrics: Arc<GatewayMetrics>) -> Self {
        let rate_limit_state = Arc::new(RateLimitState::new(config.rate_limit.clone()));
        Self {
            general_rate_limit: RateLimitLayer::new(
                Arc::clone(&rate_limit_state),
                RateTier::General,
                Arc::clone(&metrics),
            ),
            send_rate_limit: RateLimitLayer::new(
                Arc::clone(&rate_limit_state),
                RateTier::Send,
                Arc::clone(&metrics),
            ),
            auth: AuthLayer::new(AuthConfig {
                api_key: config.security.api_key.clone(),
                accept_query_token: false,
            }),
            realtime_auth: AuthLayer::new(AuthConfig {
                api_key: config.security.api_key.clone(),
                accept_query_token: true,
            }),
            tracing: TracingLayer::new(Arc::clone(&metrics)),
            metrics,
            rate_limit_state,
        }
    }

    /// Get shared metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Get rate limit state for cleanup task
    pub fn rate_limit_state(&self) -> Arc<RateLimitState> {
        Arc::clone(&self.rate_limit_state)
    }
}
