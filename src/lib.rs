//! Topic fanout message broker
//!
//! Messages published to a [`topic`] are copied into every subscribed
//! [`queue`]. Consumers receive them under a visibility lease and either
//! acknowledge, extend, or release; leases that lapse make the message
//! visible again, and messages that keep failing are redriven to a
//! dead-letter queue.

pub mod app;
pub mod broker;
pub mod core;
pub mod notifications;
pub mod queue;
pub mod server;
pub mod session;
pub mod topic;
