//! HTTP and WebSocket routes.
//!
//! | Method | Path                              | Rate tier | Auth |
//! |--------|-----------------------------------|-----------|------|
//! | GET    | `/`                               | -         | no   |
//! | GET    | `/api/whatsapp/status`            | -         | no   |
//! | POST   | `/api/whatsapp/request-qr`        | general   | yes  |
//! | POST   | `/api/whatsapp/send-product-info` | send      | yes  |
//! | POST   | `/api/whatsapp/reset`             | general   | yes  |
//! | GET    | `/api/whatsapp/events`            | -         | yes* |
//! | GET    | `/metrics`                        | -         | no   |
//!
//! *The realtime upgrade also accepts the key as `?token=<key>` and is
//! refused with 401 before any snapshot is sent.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{ws::WebSocketUpgrade, DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use crate::delivery::SendOrchestrator;
use crate::domain::config::{GatewayConfig, WebSocketConfig};
use crate::domain::{
    ActionResponse, ApiError, ApiResult, LifecycleError, ProductInfoRequest, SendResponse,
    SessionSnapshot,
};
use crate::lifecycle::SessionManager;
use crate::middleware::{create_cors_layer, GatewayMetrics, MiddlewareStack};
use crate::ws::StatusSocketHandler;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub orchestrator: Arc<SendOrchestrator>,
    pub metrics: Arc<GatewayMetrics>,
    pub websocket: WebSocketConfig,
}

/// Assemble the full router with its middleware
pub fn build_router(state: AppState, config: &GatewayConfig, stack: &MiddlewareStack) -> Router {
    let lifecycle = Router::new()
        .route("/api/whatsapp/request-qr", post(request_qr))
        .route("/api/whatsapp/reset", post(reset))
        .layer(stack.auth.clone())
        .layer(stack.general_rate_limit.clone());

    let send = Router::new()
        .route("/api/whatsapp/send-product-info", post(send_product_info))
        .layer(stack.auth.clone())
        .layer(stack.send_rate_limit.clone());

    let realtime = Router::new()
        .route("/api/whatsapp/events", get(events))
        .layer(stack.realtime_auth.clone());

    Router::new()
        .route("/", get(root))
        .route("/api/whatsapp/status", get(status))
        .route("/metrics", get(metrics))
        .merge(lifecycle)
        .merge(send)
        .merge(realtime)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.http.max_body_size))
        .layer(create_cors_layer(&config.cors))
        .layer(stack.tracing.clone())
        .with_state(state)
}

/// Liveness probe
async fn root() -> &'static str {
    "Notification gateway is running"
}

async fn status(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.sessions.status())
}

async fn request_qr(State(state): State<AppState>) -> ApiResult<Json<ActionResponse>> {
    match state.sessions.request_qr().await {
        Ok(()) => {
            info!(operation = "request_qr", "QR generation started");
            Ok(Json(ActionResponse::ok(
                "QR generation started, watch the status channel for the code",
            )))
        }
        Err(e) => {
            log_lifecycle_error("request_qr", &e);
            Err(e.into())
        }
    }
}

async fn send_product_info(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<SendResponse>> {
    let request: ProductInfoRequest = serde_json::from_slice(&body)?;

    match state.orchestrator.send_product_info(&request).await {
        Ok(receipt) => {
            state.metrics.record_send(true);
            Ok(Json(SendResponse::from(receipt)))
        }
        Err(e) => {
            state.metrics.record_send(false);
            let api_error = ApiError::from(e);
            if api_error.status >= 500 {
                error!(operation = "send_product_info", error = %api_error, "Send failed");
            } else {
                info!(operation = "send_product_info", error = %api_error, "Send rejected");
            }
            Err(api_error)
        }
    }
}

async fn reset(State(state): State<AppState>) -> ApiResult<Json<ActionResponse>> {
    match state.sessions.reset_session().await {
        Ok(()) => Ok(Json(ActionResponse::ok(
            "Session reset, request a new QR code to pair again",
        ))),
        Err(LifecycleError::OperationInProgress) => Err(LifecycleError::OperationInProgress.into()),
        Err(e) if state.sessions.has_session() => {
            warn!(operation = "reset", error = %e, "Reset failed but the session restarted");
            Ok(Json(ActionResponse::ok("Session restarted with warnings")))
        }
        Err(e) => {
            log_lifecycle_error("reset", &e);
            Err(ApiError::internal("Session reset failed"))
        }
    }
}

async fn events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let broadcaster = Arc::clone(state.sessions.broadcaster());
    let metrics = Arc::clone(&state.metrics);
    let config = state.websocket.clone();
    ws.on_upgrade(move |socket| async move {
        StatusSocketHandler::new(broadcaster, metrics, &config)
            .handle(socket)
            .await;
    })
    .into_response()
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let broadcaster = state.sessions.broadcaster();
    Json(json!({
        "gateway": state.metrics.snapshot(),
        "session": {
            "connectionStatus": state.sessions.connection_status(),
            "operationInProgress": state.sessions.is_busy(),
        },
        "realtime": {
            "subscribers": broadcaster.subscriber_count(),
            "maxSubscribers": broadcaster.max_subscribers(),
            "broadcasts": broadcaster.broadcast_count(),
        },
        "version": crate::VERSION,
    }))
}

fn log_lifecycle_error(operation: &str, err: &LifecycleError) {
    match err {
        LifecycleError::Protocol(_) | LifecycleError::Credentials(_) => {
            error!(operation = operation, error = %err, "Session operation failed")
        }
        _ => info!(operation = operation, error = %err, "Session operation rejected"),
    }
}
