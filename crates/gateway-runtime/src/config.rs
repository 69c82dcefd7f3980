//! # Runtime Configuration
//!
//! The gateway reads an optional JSON file named by `NOTIFY_CONFIG`, then
//! applies environment overrides on top:
//!
//! | Variable                 | Field                          |
//! |--------------------------|--------------------------------|
//! | `NOTIFY_HOST`            | `http.host`                    |
//! | `NOTIFY_PORT` / `PORT`   | `http.port`                    |
//! | `NOTIFY_AUTH_DIR`        | `session.auth_dir`             |
//! | `NOTIFY_BRIDGE_URL`      | `bridge.url`                   |
//! | `NOTIFY_ALLOWED_ORIGINS` | `cors.allowed_origins` (comma) |
//! | `NOTIFY_API_KEY`         | `security.api_key`             |
//! | `NOTIFY_TEMPLATES_FILE`  | `template.templates_file`      |
//! | `NOTIFY_MAX_SUBSCRIBERS` | `websocket.max_subscribers`    |

use std::path::{Path, PathBuf};

use notify_gateway::GatewayConfig;
use thiserror::Error;
use tracing::{info, warn};

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<GatewayConfig, LoadError> {
    load_config_with(|key| std::env::var(key).ok())
}

/// Load configuration with a custom variable lookup.
pub fn load_config_with<F>(var: F) -> Result<GatewayConfig, LoadError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match var("NOTIFY_CONFIG") {
        Some(path) => read_file(Path::new(&path))?,
        None => GatewayConfig::default(),
    };
    apply_overrides(&mut config, var);
    Ok(config)
}

fn read_file(path: &Path) -> Result<GatewayConfig, LoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = serde_json::from_str(&raw).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

fn apply_overrides<F>(config: &mut GatewayConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = var("NOTIFY_HOST") {
        match host.parse() {
            Ok(h) => config.http.host = h,
            Err(_) => warn!(value = %host, "Ignoring NOTIFY_HOST, not an IP address"),
        }
    }

    if let Some(port) = var("NOTIFY_PORT").or_else(|| var("PORT")) {
        match port.parse() {
            Ok(p) => config.http.port = p,
            Err(_) => warn!(value = %port, "Ignoring port override, not a port number"),
        }
    }

    if let Some(dir) = var("NOTIFY_AUTH_DIR") {
        config.session.auth_dir = PathBuf::from(dir);
    }

    if let Some(url) = var("NOTIFY_BRIDGE_URL") {
        config.bridge.url = url;
    }

    if let Some(origins) = var("NOTIFY_ALLOWED_ORIGINS") {
        config.cors.allowed_origins = origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some(key) = var("NOTIFY_API_KEY").filter(|k| !k.trim().is_empty()) {
        config.security.api_key = Some(key);
    }

    if let Some(file) = var("NOTIFY_TEMPLATES_FILE") {
        config.template.templates_file = Some(PathBuf::from(file));
    }

    if let Some(max) = var("NOTIFY_MAX_SUBSCRIBERS") {
        match max.parse() {
            Ok(m) => config.websocket.max_subscribers = m,
            Err(_) => warn!(value = %max, "Ignoring NOTIFY_MAX_SUBSCRIBERS, not a number"),
        }
    }
}
