//! Gateway error types.
//!
//! Each layer has its own error enum. Everything that reaches an HTTP caller
//! is first folded into [`ApiError`], which carries a status, a stable class
//! tag and a message that is safe to show (no protocol or IO detail).

use serde::Serialize;

/// Stable error class tags rendered in HTTP bodies
pub mod tags {
    pub const ALREADY_ACTIVE: &str = "already_active";
    pub const ALREADY_CONNECTED: &str = "already_connected";
    pub const OPERATION_IN_PROGRESS: &str = "operation_in_progress";
    pub const NOT_CONNECTED: &str = "not_connected";
    pub const NOT_READY: &str = "not_ready";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const INVALID_RECIPIENT: &str = "invalid_recipient";
    pub const UNREGISTERED_RECIPIENT: &str = "unregistered_recipient";
    pub const INVALID_IMAGE_FORMAT: &str = "invalid_image_format";
    pub const IMAGE_TOO_LARGE: &str = "image_too_large";
    pub const IMAGE_FETCH_FAILED: &str = "image_fetch_failed";
    pub const DELIVERY_FAILED: &str = "delivery_failed";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INTERNAL: &str = "internal";
}

/// Error as seen by an HTTP caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// Error class tag
    pub tag: &'static str,
    /// Caller-facing message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(status: u16, tag: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            tag,
            message: message.into(),
        }
    }

    /// 400 with a caller-facing validation message
    pub fn bad_request(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(400, tag, message)
    }

    /// 404
    pub fn not_found(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(404, tag, message)
    }

    /// 409
    pub fn conflict(tag: &'static str, message: impl Into<String>) -> Self {
        Self::new(409, tag, message)
    }

    /// 401
    pub fn unauthorized() -> Self {
        Self::new(401, tags::UNAUTHORIZED, "Missing or invalid API key")
    }

    /// 429
    pub fn rate_limited() -> Self {
        Self::new(429, tags::RATE_LIMITED, "Too many requests, try again later")
    }

    /// 500 with a generic message; details belong in the log, not here
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(500, tags::INTERNAL, message)
    }

    /// Body rendered to the caller
    pub fn body(&self) -> ErrorBody<'_> {
        ErrorBody {
            success: false,
            error: self.tag,
            message: &self.message,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} {}] {}", self.status, self.tag, self.message)
    }
}

impl std::error::Error for ApiError {}

/// JSON body of an error response
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub success: bool,
    pub error: &'static str,
    pub message: &'a str,
}

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// Failures of the protocol session handle
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProtocolError {
    /// Could not reach the protocol endpoint
    #[error("connect failed: {0}")]
    Connect(String),
    /// The endpoint answered with an error
    #[error("request rejected: {0}")]
    Rejected(String),
    /// No answer within the request timeout
    #[error("request timed out")]
    Timeout,
    /// The handle is closed
    #[error("session closed")]
    Closed,
    /// Malformed frame or payload
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// Failures of the credential store
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Filesystem failure
    #[error("credential io error: {0}")]
    Io(#[from] std::io::Error),
    /// Entry name that would escape the credential directory
    #[error("invalid credential entry name: {0}")]
    InvalidName(String),
}

/// Lifecycle operation failures
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// A session handle already exists
    #[error("session already active")]
    AlreadyActive,
    /// The session is already connected
    #[error("session already connected")]
    AlreadyConnected,
    /// Another lifecycle operation holds the lock
    #[error("another session operation is in progress")]
    OperationInProgress,
    /// The operation needs a connected session
    #[error("session not connected")]
    NotConnected,
    /// Protocol handle failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Credential store failure
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

/// Template store failures
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    /// The backing store could not be read
    #[error("template store unavailable: {0}")]
    Unavailable(String),
}

/// Remote media download failures
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Non-success HTTP status
    #[error("remote answered with status {0}")]
    Status(u16),
    /// Network or protocol failure
    #[error("transport error: {0}")]
    Transport(String),
    /// Body exceeded the media ceiling
    #[error("remote image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Outbound send failures, in pipeline order
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Session not connected
    #[error("session not ready")]
    NotReady,
    /// Phone number did not normalize to 10-15 digits
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    /// Number lookup found no account
    #[error("recipient not registered: {0}")]
    UnregisteredRecipient(String),
    /// Media payload is not a URL, data URI or base64
    #[error("invalid image format: {0}")]
    InvalidImageFormat(String),
    /// Media above the size ceiling
    #[error("image is {size} bytes, limit is {limit}")]
    ImageTooLarge { size: usize, limit: usize },
    /// Remote media download failed
    #[error("image fetch failed: {0}")]
    ImageFetchFailed(String),
    /// The handle refused or lost the message
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

fn megabytes(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::AlreadyConnected => {
                ApiError::bad_request(tags::ALREADY_CONNECTED, "Session is already connected")
            }
            LifecycleError::AlreadyActive => {
                ApiError::conflict(tags::ALREADY_ACTIVE, "Session is already starting")
            }
            LifecycleError::OperationInProgress => ApiError::conflict(
                tags::OPERATION_IN_PROGRESS,
                "Another session operation is in progress",
            ),
            LifecycleError::NotConnected => {
                ApiError::bad_request(tags::NOT_CONNECTED, "Session is not connected")
            }
            LifecycleError::Protocol(_) | LifecycleError::Credentials(_) => {
                ApiError::internal("Session operation failed")
            }
        }
    }
}

impl From<SendError> for ApiError {
    fn from(err: SendError) -> Self {
        match err {
            SendError::NotReady => {
                ApiError::bad_request(tags::NOT_READY, "Session is not connected")
            }
            SendError::InvalidRecipient(_) => ApiError::bad_request(
                tags::INVALID_RECIPIENT,
                "Phone number must contain between 10 and 15 digits",
            ),
            SendError::UnregisteredRecipient(_) => ApiError::not_found(
                tags::UNREGISTERED_RECIPIENT,
                "Number is not registered on the network",
            ),
            SendError::InvalidImageFormat(reason) => {
                ApiError::bad_request(tags::INVALID_IMAGE_FORMAT, reason)
            }
            SendError::ImageTooLarge { size, limit } => ApiError::bad_request(
                tags::IMAGE_TOO_LARGE,
                format!(
                    "Image is too large ({:.2}MB), maximum is {:.2}MB",
                    megabytes(size),
                    megabytes(limit)
                ),
            ),
            SendError::ImageFetchFailed(_) => ApiError::bad_request(
                tags::IMAGE_FETCH_FAILED,
                "Could not download the image from the given URL",
            ),
            SendError::DeliveryFailed(_) => ApiError::new(
                500,
                tags::DELIVERY_FAILED,
                "Unknown error while sending the image",
            ),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        ApiError::bad_request(tags::INVALID_REQUEST, format!("Invalid JSON: {}", e))
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Service already running
    #[error("service already started")]
    AlreadyStarted,

    /// Shutdown in progress
    #[error("shutdown in progress")]
    ShuttingDown,

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<crate::domain::config::ConfigError> for GatewayError {
    fn from(e: crate::domain::config::ConfigError) -> Self {
        GatewayError::Config(e.to_string())
    }
}
