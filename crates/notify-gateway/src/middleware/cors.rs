//! CORS middleware.
//!
//! Wrapper around tower-http CORS with gateway configuration.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, Any, CorsLayer as TowerCorsLayer};

use crate::domain::config::CorsConfig;

/// Create CORS layer from gateway config
pub fn create_cors_layer(config: &CorsConfig) -> TowerCorsLayer {
    if !config.enabled {
        // Return permissive CORS that effectively disables it
        return TowerCorsLayer::very_permissive();
    }

    let wildcard_origin = config.allowed_origins.iter().any(|o| o == "*");
    let wildcard_headers = config.allowed_headers.iter().any(|h| h == "*");

    let origins = if wildcard_origin {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();

    let mut cors = TowerCorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods);

    if wildcard_headers {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Vec<HeaderName> = config
            .allowed_headers
            .iter()
            .filter_map(|h| h.parse().ok())
            .collect();
        cors = cors.allow_headers(headers);
    }

    // tower-http refuses credentials together with wildcards
    if config.allow_credentials && !wildcard_origin && !wildcard_headers {
        cors = cors.allow_credentials(true);
    }

    cors
}
