//! Message Types
//!
//! A `Message` is exclusively owned by the store of the queue it sits in.
//! Fanning a publish out to N queues creates N messages with N distinct ids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;
use uuid::Uuid;

/// Opaque unique message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A message held by a queue
///
/// # Example
///
/// ```rust
/// use fanout::queue::Message;
///
/// let message = Message::new(b"order-42".to_vec(), Some("orders".to_string()));
/// assert_eq!(message.receive_count, 0);
/// assert_eq!(message.topic_origin.as_deref(), Some("orders"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    /// Opaque payload, never inspected by the broker
    pub body: Vec<u8>,
    pub enqueue_time: SystemTime,
    /// Number of times a lease on this message lapsed or was released
    pub receive_count: u32,
    /// Topic the message was published through, if any
    pub topic_origin: Option<String>,
}

impl Message {
    pub fn new(body: Vec<u8>, topic_origin: Option<String>) -> Self {
        Self::at(body, topic_origin, SystemTime::now())
    }

    /// Create a message with an explicit enqueue timestamp
    pub fn at(body: Vec<u8>, topic_origin: Option<String>, enqueue_time: SystemTime) -> Self {
        Self {
            id: MessageId::new(),
            body,
            enqueue_time,
            receive_count: 0,
            topic_origin,
        }
    }

    /// Copy of this message for another queue: fresh identity, counter reset
    pub fn redriven(&self, enqueue_time: SystemTime) -> Self {
        Self {
            id: MessageId::new(),
            body: self.body.clone(),
            enqueue_time,
            receive_count: 0,
            topic_origin: self.topic_origin.clone(),
        }
    }
}
