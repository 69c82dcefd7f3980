//! # Notification Gateway Runtime
//!
//! Startup sequence:
//!
//! 1. Load configuration (file named by `NOTIFY_CONFIG`, then env overrides)
//! 2. Install the tracing subscriber
//! 3. Wire the production adapters (bridge, filesystem credentials,
//!    template file, HTTP media fetcher, system clock)
//! 4. Serve until Ctrl+C, then close the session without logging out

pub mod config;
pub mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use notify_gateway::{
    BridgeConnector, FsCredentialStore, GatewayConfig, GatewayPorts, GatewayService,
    HttpMediaFetcher, MapTemplateStore, SystemClock,
};
use tracing::{info, warn};

/// Build the production adapters for `config`.
pub async fn production_ports(config: &GatewayConfig) -> Result<GatewayPorts> {
    let templates = match &config.template.templates_file {
        Some(path) => match MapTemplateStore::from_json_file(path).await {
            Ok(store) => {
                info!(path = %path.display(), count = store.len(), "Loaded caption templates");
                store
            }
            Err(e) => {
                // Sends fall back to the built-in caption
                warn!(error = %e, "Template file unavailable, using the default caption only");
                MapTemplateStore::default()
            }
        },
        None => MapTemplateStore::default(),
    };

    let fetcher = HttpMediaFetcher::new(config.media.fetch_timeout)
        .context("Failed to build media HTTP client")?;

    Ok(GatewayPorts {
        connector: Arc::new(BridgeConnector::new(
            &config.bridge,
            config.session.session_name.clone(),
        )),
        credentials: Arc::new(FsCredentialStore::new(config.session.auth_dir.clone())),
        templates: Arc::new(templates),
        fetcher: Arc::new(fetcher),
        clock: Arc::new(SystemClock),
    })
}

/// Run the gateway until Ctrl+C.
pub async fn run(config: GatewayConfig) -> Result<()> {
    info!("===========================================");
    info!("  Notification Gateway v{}", notify_gateway::VERSION);
    info!("===========================================");
    info!(
        addr = %config.http_addr(),
        bridge = %config.bridge.url,
        auth_dir = %config.session.auth_dir.display(),
        "Configuration loaded"
    );

    let ports = production_ports(&config).await?;
    let service = GatewayService::new(config, ports).context("Invalid configuration")?;

    service
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Gateway stopped with an error")?;

    info!("Shutdown complete");
    Ok(())
}
