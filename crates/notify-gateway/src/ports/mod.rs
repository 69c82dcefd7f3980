//! Ports (hexagonal boundaries) of the notification gateway.

pub mod outbound;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use outbound::{
    Clock, CloseReason, CredentialStore, Credentials, MediaFetcher, ProtocolConnector,
    ProtocolEvent, ProtocolSession, SessionConnection, SystemClock, TemplateStore,
};
