//! Adapters for the notification gateway.
//!
//! Infrastructure implementations of the outbound ports.

pub mod bridge;
pub mod credentials;
mod error_conversions;
pub mod fetcher;
pub mod templates;

pub use bridge::{BridgeConnector, BridgeSession};
pub use credentials::FsCredentialStore;
pub use fetcher::HttpMediaFetcher;
pub use templates::MapTemplateStore;
