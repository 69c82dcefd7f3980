//! Realtime status channel.
//!
//! - [`StatusBroadcaster`] retains the latest snapshot and fans it out
//! - [`StatusSocketHandler`] drives one WebSocket subscriber

pub mod broadcaster;
pub mod handler;

pub use broadcaster::{StatusBroadcaster, SubscribeError, Subscription};
pub use handler::{ClientMessage, ServerMessage, StatusSocketHandler};
