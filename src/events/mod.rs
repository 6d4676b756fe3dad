//! Notification hub: scoped broadcast of task lifecycle and progress events.

pub mod hub;
pub mod sinks;
pub mod types;

pub use hub::NotificationHub;
pub use sinks::{ChannelSink, DeliveryError, EventSink};
pub use types::{EngineEvent, EventKind, SubscriptionScope};
