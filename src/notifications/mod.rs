//! Broker event notifications
//!
//! Queue lifecycle, subscription and delivery events are fanned out to
//! in-process subscribers (audit logging, tests, embedding applications).

mod event;
mod manager;

pub use event::{BrokerEvent, EventFilter, EventKind, Notification};
pub use manager::{EventReceiver, NotificationManager};
