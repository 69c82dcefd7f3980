//! Notification gateway executable.

use anyhow::Result;
use gateway_runtime::config::load_config;
use gateway_runtime::telemetry::{init_tracing, LogConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(&LogConfig::from_env())?;
    let config = load_config()?;
    gateway_runtime::run(config).await
}
