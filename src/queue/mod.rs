//! Queues: message storage and visibility leases
//!
//! A queue is a [`MessageStore`] holding messages in one of three delivery
//! states. Consumers lease available messages for a visibility timeout and
//! either acknowledge them (permanent delete) or let the lease lapse or
//! release it, after which the message is delivered again.
//!
//! ```text
//!               enqueue
//!                  │
//!                  ▼
//!           ┌────────────┐   mark_in_flight   ┌────────────┐
//!           │ Available  │ ─────────────────▶ │  InFlight  │
//!           │            │ ◀───────────────── │  (lease)   │
//!           └────────────┘ release / expiry   └─────┬──────┘
//!                  │                                │ acknowledge
//!                  │ receive budget used            ▼
//!                  ▼                          ┌────────────┐
//!          dead-letter queue                  │  Deleted   │
//!                                             └────────────┘
//! ```
//!
//! Expiry is lazy: nothing runs in the background. Every operation that
//! looks at a message first settles its lease against the clock.
//!
//! # Example
//!
//! ```rust
//! use fanout::core::time::system_clock;
//! use fanout::queue::{MessageStore, QueueConfig};
//!
//! # fn example() -> Result<(), fanout::queue::QueueError> {
//! let store = MessageStore::new("orders", QueueConfig::default(), system_clock())?;
//! store.enqueue(b"order-42".to_vec())?;
//!
//! let message = store.peek_available(1)?.remove(0);
//! let (_, lease) = store.claim(message.id)?;
//! store.acknowledge(message.id, lease.lease_id)?;
//! assert!(store.is_empty());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod config;
mod error;
mod message;
mod store;
mod visibility;

pub use config::{validate_visibility_timeout, QueueConfig};
pub use error::{QueueError, QueueResult};
pub use message::{Message, MessageId};
pub use store::{MessageStore, QueueStats};
pub use visibility::{DeliveryState, Lease, LeaseId, Settlement, VisibilityTracker};

#[cfg(test)]
mod tests;
