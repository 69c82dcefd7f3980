//! Outbound ports for the notification gateway.
//!
//! The messaging protocol, credential persistence, template storage and
//! remote media download are all external. The core only sees these traits.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::domain::{
    CredentialError, FetchError, ImagePayload, ProtocolError, TemplateError,
};

/// Session authentication material: named opaque blobs, one per file.
pub type Credentials = BTreeMap<String, Vec<u8>>;

/// Why a protocol handle closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The account unlinked this device; reconnecting would be pointless
    LoggedOut,
    /// Transport dropped
    ConnectionLost,
    /// Any other close reported by the protocol
    Other(String),
}

impl CloseReason {
    /// Only an explicit logout suppresses the automatic reconnect
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, CloseReason::LoggedOut)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::LoggedOut => f.write_str("logged out"),
            CloseReason::ConnectionLost => f.write_str("connection lost"),
            CloseReason::Other(reason) => f.write_str(reason),
        }
    }
}

/// Lifecycle events emitted by an open handle, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// A pairing QR, as an opaque displayable payload
    Qr(String),
    /// Handshake complete
    Open,
    /// Handle closed
    Close(CloseReason),
    /// Rotated credential entries to persist
    CredentialsUpdated(Credentials),
}

/// A freshly opened handle plus its event stream
pub struct SessionConnection {
    pub session: Arc<dyn ProtocolSession>,
    pub events: mpsc::Receiver<ProtocolEvent>,
}

/// Opens protocol sessions.
#[async_trait]
pub trait ProtocolConnector: Send + Sync {
    /// Start a handshake with the given credentials. Returns once the handle
    /// exists; pairing progress arrives as events.
    async fn open(&self, credentials: Credentials) -> Result<SessionConnection, ProtocolError>;
}

/// One live protocol connection.
#[async_trait]
pub trait ProtocolSession: Send + Sync {
    /// Resolve an identifier to its canonical form, `None` when unregistered
    async fn lookup_number(&self, identifier: &str) -> Result<Option<String>, ProtocolError>;

    /// Send an image with caption. Returns the message id.
    async fn send_image(
        &self,
        recipient: &str,
        image: &ImagePayload,
        caption: &str,
    ) -> Result<String, ProtocolError>;

    /// Unlink this device from the account
    async fn logout(&self) -> Result<(), ProtocolError>;

    /// Drop the connection without unlinking
    async fn close(&self);
}

/// Persists session credentials across restarts.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All stored entries; empty when never paired
    async fn load(&self) -> Result<Credentials, CredentialError>;

    /// Write the given entries, leaving others untouched
    async fn save(&self, entries: &Credentials) -> Result<(), CredentialError>;

    /// Delete every entry
    async fn clear(&self) -> Result<(), CredentialError>;
}

/// Caption template lookup.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn lookup(&self, name: &str) -> Result<Option<String>, TemplateError>;
}

/// Downloads remote images.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `url`, failing with [`FetchError::TooLarge`] past `max_bytes`
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<ImagePayload, FetchError>;
}

/// Time source trait for testability
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System time implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
