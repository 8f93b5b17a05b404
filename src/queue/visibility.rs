//! Visibility Tracker
//!
//! Leases are checked lazily: whoever next touches a message first asks the
//! tracker to settle it, and an in-flight message whose lease has passed
//! `expires_at` is returned to `Available` (with its receive count bumped)
//! before the caller's own operation runs. No timer thread is involved; the
//! decision is a pure comparison against the clock.

use crate::queue::error::{QueueError, QueueResult};
use crate::queue::message::{Message, MessageId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Identifier of one grant of visibility; a redelivered message gets a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(Uuid);

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LeaseId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Time-bounded exclusive claim on a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub message_id: MessageId,
    pub lease_id: LeaseId,
    pub granted_at: Instant,
    pub expires_at: Instant,
}

impl Lease {
    fn grant(message_id: MessageId, now: Instant, timeout: Duration) -> Self {
        Self {
            message_id,
            lease_id: LeaseId::new(),
            granted_at: now,
            expires_at: now + timeout,
        }
    }

    /// A lease is valid strictly before its expiry instant
    pub fn is_valid_at(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Where a stored message is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Available,
    InFlight(Lease),
    /// Terminal; the record is being removed from its store
    Deleted,
}

impl DeliveryState {
    pub fn is_available(&self) -> bool {
        matches!(self, DeliveryState::Available)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, DeliveryState::InFlight(_))
    }
}

/// Outcome of settling a message against the clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Nothing changed
    Current,
    /// An in-flight message went back to `Available`
    Returned,
    /// The message went back to `Available` but has used up its delivery
    /// budget and must be moved to the dead-letter queue
    RedriveDue,
}

/// Lease policy for one queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibilityTracker {
    max_receive_count: Option<u32>,
}

impl VisibilityTracker {
    pub fn new(max_receive_count: Option<u32>) -> Self {
        Self { max_receive_count }
    }

    /// Lazily expire the lease on `state`, if it has one that lapsed
    pub fn settle(
        &self,
        state: &mut DeliveryState,
        message: &mut Message,
        now: Instant,
    ) -> Settlement {
        match state {
            DeliveryState::InFlight(lease) if !lease.is_valid_at(now) => {
                self.return_to_available(state, message)
            }
            _ => Settlement::Current,
        }
    }

    /// Put an in-flight message back into circulation, counting the attempt
    ///
    /// A message whose count reaches `max_receive_count` has had that many
    /// deliveries and is due for redrive instead of another one.
    pub fn return_to_available(
        &self,
        state: &mut DeliveryState,
        message: &mut Message,
    ) -> Settlement {
        message.receive_count = message.receive_count.saturating_add(1);
        *state = DeliveryState::Available;

        if self.is_exhausted(message) {
            Settlement::RedriveDue
        } else {
            Settlement::Returned
        }
    }

    /// Whether a message has used up its delivery budget
    pub fn is_exhausted(&self, message: &Message) -> bool {
        self.max_receive_count
            .is_some_and(|max| message.receive_count >= max)
    }

    /// Claim an available message
    pub fn grant(
        &self,
        state: &mut DeliveryState,
        message_id: MessageId,
        now: Instant,
        timeout: Duration,
    ) -> QueueResult<Lease> {
        match state {
            DeliveryState::Available => {
                let lease = Lease::grant(message_id, now, timeout);
                *state = DeliveryState::InFlight(lease.clone());
                Ok(lease)
            }
            DeliveryState::InFlight(_) => Err(QueueError::AlreadyInFlight {
                message_id: message_id.to_string(),
            }),
            DeliveryState::Deleted => Err(QueueError::NotFound {
                message_id: message_id.to_string(),
            }),
        }
    }

    /// Return the caller's lease if it is still the authoritative one
    ///
    /// Callers settle first, so an expired lease has already been replaced
    /// by `Available` and fails the match here.
    pub fn authorize<'a>(
        &self,
        state: &'a mut DeliveryState,
        message_id: MessageId,
        lease_id: LeaseId,
        now: Instant,
    ) -> QueueResult<&'a mut Lease> {
        match state {
            DeliveryState::InFlight(lease) if lease.lease_id == lease_id && lease.is_valid_at(now) => {
                Ok(lease)
            }
            _ => Err(QueueError::LeaseExpired {
                message_id: message_id.to_string(),
                lease_id: lease_id.to_string(),
            }),
        }
    }
}
