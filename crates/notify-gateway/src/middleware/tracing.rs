//! Request tracing middleware.
//!
//! Wraps every request in an `http_request` span, records the status class
//! and latency, and feeds the request counters.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::{body::Body, http::Request, response::Response};
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};

use crate::middleware::metrics::GatewayMetrics;

/// Tracing layer that creates spans for each request
#[derive(Clone)]
pub struct TracingLayer {
    metrics: Arc<GatewayMetrics>,
}

impl TracingLayer {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService {
            inner,
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
    metrics: Arc<GatewayMetrics>,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let metrics = Arc::clone(&self.metrics);

        let span = info_span!(
            "http_request",
            method = %req.method(),
            path = %req.uri().path(),
            status = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;
                let latency_ms = started.elapsed().as_millis() as u64;

                match &result {
                    Ok(response) => {
                        let status = response.status();
                        Span::current().record("status", status.as_u16());
                        metrics.record_request(!status.is_server_error(), latency_ms);
                        debug!(status = status.as_u16(), latency_ms = latency_ms, "Request completed");
                    }
                    Err(_) => {
                        Span::current().record("status", "error");
                        metrics.record_request(false, latency_ms);
                    }
                }

                result
            }
            .instrument(span),
        )
    }
}
