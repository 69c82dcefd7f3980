//! Logging setup.
//!
//! Filter directives come from `NOTIFY_LOG_LEVEL`, then `RUST_LOG`, then
//! default to `info`. Set `NOTIFY_JSON_LOGS` for one JSON object per line.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging options
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` directives
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".into(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Read options from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            filter: var("NOTIFY_LOG_LEVEL")
                .or_else(|| var("RUST_LOG"))
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(defaults.filter),
            json: var("NOTIFY_JSON_LOGS")
                .map(|v| !matches!(v.trim(), "" | "0" | "false"))
                .unwrap_or(defaults.json),
        }
    }
}

/// Install the global subscriber
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_new(&config.filter)?;

    if config.json {
        // JSON output for containers
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }
    Ok(())
}
