//! Gateway service - main entry point.
//!
//! Wires the lifecycle manager, broadcaster and send orchestrator to the
//! outbound adapters and serves the router.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::delivery::{DeliverySettings, SendOrchestrator};
use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::lifecycle::{LifecycleSettings, SessionManager};
use crate::middleware::{cleanup_task, GatewayMetrics, MiddlewareStack};
use crate::ports::{Clock, CredentialStore, MediaFetcher, ProtocolConnector, TemplateStore};
use crate::router::{build_router, AppState};
use crate::ws::StatusBroadcaster;

/// How often stale rate limit buckets are dropped
const BUCKET_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Buckets untouched this long are dropped
const BUCKET_MAX_AGE: Duration = Duration::from_secs(600);

/// Outbound adapters the gateway runs on
#[derive(Clone)]
pub struct GatewayPorts {
    pub connector: Arc<dyn ProtocolConnector>,
    pub credentials: Arc<dyn CredentialStore>,
    pub templates: Arc<dyn TemplateStore>,
    pub fetcher: Arc<dyn MediaFetcher>,
    pub clock: Arc<dyn Clock>,
}

/// Gateway service state
pub struct GatewayService {
    config: GatewayConfig,
    sessions: SessionManager,
    orchestrator: Arc<SendOrchestrator>,
    middleware: MiddlewareStack,
    started: AtomicBool,
}

impl GatewayService {
    /// Create a new gateway service
    pub fn new(config: GatewayConfig, ports: GatewayPorts) -> Result<Self, GatewayError> {
        config.validate()?;

        let broadcaster = StatusBroadcaster::new(
            config.websocket.max_subscribers,
            config.websocket.message_buffer_size,
        );

        let sessions = SessionManager::new(
            LifecycleSettings::from(&config.session),
            ports.connector,
            ports.credentials,
            broadcaster,
            Arc::clone(&ports.clock),
        );

        let orchestrator = Arc::new(SendOrchestrator::new(
            sessions.clone(),
            ports.templates,
            ports.fetcher,
            ports.clock,
            DeliverySettings::from(&config),
        ));

        let middleware = MiddlewareStack::from_config(&config, Arc::new(GatewayMetrics::new()));

        Ok(Self {
            config,
            sessions,
            orchestrator,
            middleware,
            started: AtomicBool::new(false),
        })
    }

    /// Handle to the lifecycle manager
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        self.middleware.metrics()
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let state = AppState {
            sessions: self.sessions.clone(),
            orchestrator: Arc::clone(&self.orchestrator),
            metrics: self.middleware.metrics(),
            websocket: self.config.websocket.clone(),
        };
        build_router(state, &self.config, &self.middleware)
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn start<F>(&self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.http_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// The session is closed without logging out afterwards, so the stored
    /// pairing survives a restart.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyStarted);
        }

        let addr = listener
            .local_addr()
            .map_err(|e| GatewayError::Bind(e.to_string()))?;
        info!(addr = %addr, "Starting notification gateway");

        let cleanup = tokio::spawn(cleanup_task(
            self.middleware.rate_limit_state(),
            BUCKET_CLEANUP_INTERVAL,
            BUCKET_MAX_AGE,
        ));

        // Resume a stored pairing; the gateway stays up when this fails
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            if let Err(e) = sessions.initialize().await {
                warn!(operation = "initialize", error = %e, "Startup session initialize failed");
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                info!("Received shutdown signal");
            })
            .await;

        cleanup.abort();
        self.sessions.shutdown().await;

        match result {
            Ok(()) => {
                info!("Notification gateway stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "HTTP server error");
                Err(GatewayError::Internal(e.to_string()))
            }
        }
    }
}
