#![allow(missing_docs)]

//! Notification gateway - HTTP and WebSocket front for a messaging-network
//! session.
//!
//! Pairs a single session by QR code, streams its status to realtime
//! subscribers and sends product notifications (an image plus a templated
//! caption) to phone numbers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        NOTIFICATION GATEWAY                           │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   ┌──────────────┐                         ┌──────────────────┐      │
//! │   │  HTTP routes │                         │ /api/whatsapp/   │      │
//! │   │  (axum)      │                         │ events (ws)      │      │
//! │   └──────┬───────┘                         └────────┬─────────┘      │
//! │          │                                          │                │
//! │   ┌──────┴──────────────────────────────┐           │                │
//! │   │ Tracing → CORS → BodyLimit →        │           │                │
//! │   │ RateLimit(tier) → Auth              │           │                │
//! │   └──────┬───────────────────┬──────────┘           │                │
//! │          │                   │                      │                │
//! │   ┌──────┴───────┐   ┌───────┴─────────┐   ┌────────┴─────────┐      │
//! │   │   Session    │◄──┤ Send            │   │ Status           │      │
//! │   │   Manager    │   │ Orchestrator    │   │ Broadcaster      │      │
//! │   └──────┬───────┘   └───────┬─────────┘   └────────▲─────────┘      │
//! │          │   snapshots       │                      │                │
//! │          └───────────────────┼──────────────────────┘                │
//! └──────────┼───────────────────┼───────────────────────────────────────┘
//!            ▼                   ▼
//!   ProtocolConnector     TemplateStore, MediaFetcher
//!   CredentialStore       Clock
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use notify_gateway::{GatewayConfig, GatewayPorts, GatewayService};
//!
//! let service = GatewayService::new(GatewayConfig::default(), ports)?;
//! service.start(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod delivery;
pub mod domain;
pub mod lifecycle;
pub mod middleware;
pub mod ports;
pub mod router;
pub mod service;
pub mod ws;

// Re-exports for public API
pub use adapters::{
    BridgeConnector, BridgeSession, FsCredentialStore, HttpMediaFetcher, MapTemplateStore,
};
pub use delivery::{DeliverySettings, SendOrchestrator};
pub use domain::config::GatewayConfig;
pub use domain::error::{ApiError, ApiResult, GatewayError, LifecycleError, SendError};
pub use domain::state::{ConnectionStatus, SessionSnapshot};
pub use domain::types::*;
pub use lifecycle::{LifecycleSettings, SessionManager};
pub use middleware::GatewayMetrics;
pub use ports::SystemClock;
pub use service::{GatewayPorts, GatewayService};
pub use ws::StatusBroadcaster;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
