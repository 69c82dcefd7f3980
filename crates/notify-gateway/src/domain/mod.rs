//! Domain types for the notification gateway.
//!
//! Pure data and rules: configuration, errors, session state, recipient,
//! media and template handling. Nothing here performs IO.

pub mod config;
pub mod error;
pub mod media;
pub mod recipient;
pub mod state;
pub mod subscriber;
pub mod template;
pub mod types;

// Re-exports for convenience
pub use config::GatewayConfig;
pub use error::{
    ApiError, ApiResult, CredentialError, FetchError, GatewayError, LifecycleError,
    ProtocolError, SendError, TemplateError,
};
pub use media::{ImagePayload, MediaInput, MediaPolicy};
pub use recipient::PhoneDigits;
pub use state::{ActiveQr, ConnectionStatus, SessionSnapshot, SessionState, Transition};
pub use subscriber::SubscriberId;
pub use template::{render, render_filled, TemplateVars};
pub use types::{ActionResponse, DeliveryReceipt, ProductInfoRequest, SendResponse};
