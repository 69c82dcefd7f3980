//! API key middleware for the mutating routes and the realtime channel.
//!
//! When no key is configured every request passes. Otherwise the key must
//! arrive as `Authorization: Bearer <key>` or `X-API-Key: <key>`. Browsers
//! cannot set headers on a WebSocket handshake, so the realtime layer also
//! reads a `token` query parameter.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::Query,
    http::{header, HeaderValue, Request},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tower::{Layer, Service};
use tracing::warn;

use crate::domain::error::ApiError;

/// Authentication configuration
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// API key (None = no key required)
    pub api_key: Option<String>,
    /// Also accept the key as `?token=<key>`
    pub accept_query_token: bool,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Authentication layer
#[derive(Clone)]
pub struct AuthLayer {
    config: Arc<AuthConfig>,
}

impl AuthLayer {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            config: Arc::clone(&self.config),
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    config: Arc<AuthConfig>,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let config = Arc::clone(&self.config);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            if !check_api_key(&req, &config) {
                warn!(path = %req.uri().path(), "Request rejected, missing or invalid API key");
                return Ok(unauthorized_response());
            }
            inner.call(req).await
        })
    }
}

/// Check API key from request
fn check_api_key<B>(req: &Request<B>, config: &AuthConfig) -> bool {
    let expected_key = match &config.api_key {
        Some(key) => key,
        None => return true, // No key configured = always valid
    };

    // Check Authorization header (Bearer token)
    if let Some(token) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return constant_time_compare(token.trim(), expected_key);
    }

    // Check X-API-Key header
    if let Some(key) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        return constant_time_compare(key.trim(), expected_key);
    }

    if config.accept_query_token {
        if let Ok(Query(TokenQuery { token: Some(token) })) =
            Query::<TokenQuery>::try_from_uri(req.uri())
        {
            return constant_time_compare(token.trim(), expected_key);
        }
    }

    false
}

/// Constant-time string comparison to prevent timing attacks.
///
/// Both inputs are padded to the longer length with different bytes, so a
/// length mismatch never short-circuits.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;

    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];

    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}

/// Create unauthorized response
fn unauthorized_response() -> Response {
    let mut response = ApiError::unauthorized().into_response();
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}
