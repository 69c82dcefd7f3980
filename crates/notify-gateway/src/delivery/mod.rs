//! Outbound product notifications.

pub mod orchestrator;

pub use orchestrator::{DeliverySettings, SendOrchestrator};
