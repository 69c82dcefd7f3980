//! Gateway counters, exported as JSON on `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Gateway metrics
#[derive(Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,

    // Rate limit counters
    pub rate_limit_rejected: AtomicU64,

    // Outbound sends
    pub sends_delivered: AtomicU64,
    pub sends_failed: AtomicU64,

    // Realtime counters
    pub websocket_connections: AtomicU64,
    pub websocket_rejected: AtomicU64,
    pub websocket_messages_sent: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Record rate limit rejection
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a send
    pub fn record_send(&self, delivered: bool) {
        if delivered {
            self.sends_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sends_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record WebSocket connection
    pub fn record_ws_connect(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record WebSocket disconnection
    pub fn record_ws_disconnect(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a connection turned away at the subscriber ceiling
    pub fn record_ws_rejected(&self) {
        self.websocket_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record WebSocket message sent
    pub fn record_ws_message(&self) {
        self.websocket_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.requests_total.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Point-in-time copy for the metrics endpoint
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_error: self.requests_error.load(Ordering::Relaxed),
            rate_limit_rejected: self.rate_limit_rejected.load(Ordering::Relaxed),
            sends_delivered: self.sends_delivered.load(Ordering::Relaxed),
            sends_failed: self.sends_failed.load(Ordering::Relaxed),
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
            websocket_rejected: self.websocket_rejected.load(Ordering::Relaxed),
            websocket_messages_sent: self.websocket_messages_sent.load(Ordering::Relaxed),
            average_latency_ms: self.average_latency_ms(),
        }
    }
}

/// Serializable metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_error: u64,
    pub rate_limit_rejected: u64,
    pub sends_delivered: u64,
    pub sends_failed: u64,
    pub websocket_connections: u64,
    pub websocket_rejected: u64,
    pub websocket_messages_sent: u64,
    pub average_latency_ms: f64,
}
