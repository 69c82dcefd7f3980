//! Gateway configuration with validation.
//!
//! Every section deserializes with defaults so a partial JSON file (or none at
//! all) yields a runnable gateway. Durations accept `"120s"`, `"500ms"` and
//! `"2m"`.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Realtime status channel configuration
    pub websocket: WebSocketConfig,
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// CORS configuration
    pub cors: CorsConfig,
    /// API key protection for mutating routes
    pub security: SecurityConfig,
    /// Messaging session lifecycle configuration
    pub session: SessionConfig,
    /// Media resolution limits
    pub media: MediaConfig,
    /// Caption template configuration
    pub template: TemplateConfig,
    /// Protocol bridge connection
    pub bridge: BridgeConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.general_per_minute == 0 || self.rate_limit.send_per_minute == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "requests per minute cannot be 0".into(),
            ));
        }

        if self.websocket.max_subscribers == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_subscribers cannot be 0".into(),
            ));
        }

        if self.websocket.message_buffer_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "message_buffer_size cannot be 0".into(),
            ));
        }

        if self.media.max_image_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_image_bytes cannot be 0".into(),
            ));
        }

        if self.media.allowed_types.is_empty() {
            return Err(ConfigError::InvalidLimit(
                "at least one image type must be allowed".into(),
            ));
        }

        if self.session.qr_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "qr_timeout cannot be 0".into(),
            ));
        }

        if self.bridge.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "bridge request_timeout cannot be 0".into(),
            ));
        }

        // 18h is the widest offset chrono accepts
        if self.template.utc_offset_minutes.abs() >= 18 * 60 {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_minutes out of range: {}",
                self.template.utc_offset_minutes
            )));
        }

        if self.session.recipient_domain.trim().is_empty() {
            return Err(ConfigError::Invalid("recipient_domain cannot be empty".into()));
        }

        if matches!(&self.security.api_key, Some(key) if key.is_empty()) {
            return Err(ConfigError::Invalid("api_key cannot be empty".into()));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 3001)
    pub port: u16,
    /// Max request body size in bytes; base64 images travel in the body
    pub max_body_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 3001,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Realtime status channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Concurrent subscriber ceiling
    pub max_subscribers: usize,
    /// Per-subscriber outbound queue
    pub message_buffer_size: usize,
    /// Inbound messages per second per connection
    pub messages_per_second: u32,
    /// Max inbound message size in bytes
    pub max_message_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 10,
            message_buffer_size: 32,
            messages_per_second: 10,
            max_message_size: 4 * 1024,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Requests per minute per IP for lifecycle routes
    pub general_per_minute: u32,
    /// Requests per minute per IP for send routes
    pub send_per_minute: u32,
    /// IPs to whitelist from rate limiting
    pub whitelist: Vec<IpAddr>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            general_per_minute: 60,
            send_per_minute: 60,
            whitelist: Vec::new(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins (`*` for any)
    pub allowed_origins: Vec<String>,
    /// Allowed methods
    pub allowed_methods: Vec<String>,
    /// Allowed headers
    pub allowed_headers: Vec<String>,
    /// Send `Access-Control-Allow-Credentials`
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec![
                "http://localhost:8000".into(),
                "http://localhost:4321".into(),
            ],
            allowed_methods: vec!["GET".into(), "POST".into(), "OPTIONS".into()],
            allowed_headers: vec![
                "content-type".into(),
                "authorization".into(),
                "x-api-key".into(),
            ],
            allow_credentials: true,
        }
    }
}

/// API key protection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Required API key for mutating routes (None = open)
    pub api_key: Option<String>,
}

/// Messaging session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Directory holding the credential files
    pub auth_dir: PathBuf,
    /// Name announced to the bridge when opening a session
    pub session_name: String,
    /// How long an issued QR stays valid
    #[serde(with = "humantime_serde")]
    pub qr_timeout: Duration,
    /// Delay before reopening after a transient close
    #[serde(with = "humantime_serde")]
    pub reconnect_delay: Duration,
    /// Pause between teardown and credential deletion during reset
    #[serde(with = "humantime_serde")]
    pub reset_settle_delay: Duration,
    /// Pause before the single credential-deletion retry
    #[serde(with = "humantime_serde")]
    pub cleanup_retry_delay: Duration,
    /// Suffix appended to digits to form a network identifier
    pub recipient_domain: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auth_dir: PathBuf::from("./auth_info"),
            session_name: "notify-gateway".into(),
            qr_timeout: Duration::from_secs(120),
            reconnect_delay: Duration::from_secs(3),
            reset_settle_delay: Duration::from_secs(1),
            cleanup_retry_delay: Duration::from_secs(1),
            recipient_domain: "s.whatsapp.net".into(),
        }
    }
}

/// Media resolution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Decoded size ceiling in bytes (default: 2MB)
    pub max_image_bytes: usize,
    /// Subtypes accepted in `data:image/<type>;base64,` prefixes
    pub allowed_types: Vec<String>,
    /// Timeout for remote image downloads
    #[serde(with = "humantime_serde")]
    pub fetch_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 2 * 1024 * 1024,
            allowed_types: ["jpeg", "jpg", "png", "gif", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
            fetch_timeout: Duration::from_secs(15),
        }
    }
}

/// Caption template configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Template looked up when the caller gives no context
    pub default_context: String,
    /// JSON file mapping template names to text
    pub templates_file: Option<PathBuf>,
    /// Caption used when the lookup misses or fails
    pub default_text: String,
    /// Offset applied to the `date` and `time` placeholders
    pub utc_offset_minutes: i32,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_context: "product_details".into(),
            templates_file: None,
            default_text: DEFAULT_TEMPLATE_TEXT.into(),
            utc_offset_minutes: -5 * 60,
        }
    }
}

/// Built-in product caption
pub const DEFAULT_TEMPLATE_TEXT: &str = "📢 Bienvenido a Tami Maquinarias 📢

Gracias por su interés en nuestros productos. A continuación, le proporcionamos \
los detalles del producto que ha consultado:

📝 Producto Consultado:
    • Nombre del Producto: {{productName}}
    • Descripción: {{description}}

📅 Fecha y Hora de Consulta:
    • Fecha: {{fecha}}
    • Hora: {{hora}}

📧 Información Adicional:
Le informamos que en breve recibirá un correo electrónico a {{email}} con más \
detalles sobre el producto consultado. Le recomendamos revisar su bandeja de entrada.

Si tiene alguna otra consulta o desea más información, no dude en contactarnos.

¡Gracias por elegirnos!

Atentamente,
Yuntas Publicidad
";

/// Protocol bridge connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket endpoint of the bridge process
    pub url: String,
    /// Timeout for a single bridge request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3002/session".into(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be tried before the bare "s" and "m" suffixes
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}
