//! Session lifecycle: the state machine driver and its timers.

pub mod manager;
pub mod timers;

pub use manager::{LifecycleSettings, SessionManager};
pub use timers::ScheduledTask;
