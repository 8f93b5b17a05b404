//! Event types for the notification system

use serde::Serialize;
use std::time::SystemTime;

/// Coarse category used for filtering
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Queue and topic creation, update and deletion
    Lifecycle,
    /// Subscription changes on topics
    Subscription,
    /// Per-message delivery transitions (lease expiry, dead-lettering)
    Delivery,
}

/// Something that happened inside the broker
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BrokerEvent {
    QueueCreated {
        queue: String,
    },
    QueueUpdated {
        queue: String,
    },
    QueueDeleted {
        queue: String,
    },
    QueuePurged {
        queue: String,
        removed: usize,
    },
    TopicCreated {
        topic: String,
    },
    TopicDeleted {
        topic: String,
    },
    Subscribed {
        topic: String,
        queue: String,
        subscription_id: String,
    },
    Unsubscribed {
        topic: String,
        subscription_id: String,
    },
    LeaseExpired {
        queue: String,
        message_id: String,
        receive_count: u32,
    },
    DeadLettered {
        from: String,
        to: String,
        message_id: String,
        redriven_id: String,
    },
}

impl BrokerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BrokerEvent::QueueCreated { .. }
            | BrokerEvent::QueueUpdated { .. }
            | BrokerEvent::QueueDeleted { .. }
            | BrokerEvent::QueuePurged { .. }
            | BrokerEvent::TopicCreated { .. }
            | BrokerEvent::TopicDeleted { .. } => EventKind::Lifecycle,
            BrokerEvent::Subscribed { .. } | BrokerEvent::Unsubscribed { .. } => {
                EventKind::Subscription
            }
            BrokerEvent::LeaseExpired { .. } | BrokerEvent::DeadLettered { .. } => {
                EventKind::Delivery
            }
        }
    }

    /// Queues this event concerns; a redrive touches two
    pub fn queues(&self) -> Vec<&str> {
        match self {
            BrokerEvent::QueueCreated { queue }
            | BrokerEvent::QueueUpdated { queue }
            | BrokerEvent::QueueDeleted { queue }
            | BrokerEvent::QueuePurged { queue, .. }
            | BrokerEvent::Subscribed { queue, .. }
            | BrokerEvent::LeaseExpired { queue, .. } => vec![queue.as_str()],
            BrokerEvent::DeadLettered { from, to, .. } => vec![from.as_str(), to.as_str()],
            BrokerEvent::TopicCreated { .. }
            | BrokerEvent::TopicDeleted { .. }
            | BrokerEvent::Unsubscribed { .. } => Vec::new(),
        }
    }
}

/// Event with its publication timestamp
#[derive(Clone, Debug)]
pub struct Notification {
    pub timestamp: SystemTime,
    pub event: BrokerEvent,
}

/// Subscriber-side selection of events
#[derive(Clone, Debug, PartialEq)]
pub enum EventFilter {
    All,
    Kinds(Vec<EventKind>),
    Queue(String),
}

impl EventFilter {
    pub fn accepts(&self, event: &BrokerEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Kinds(kinds) => kinds.contains(&event.kind()),
            EventFilter::Queue(name) => event.queues().iter().any(|q| q == name),
        }
    }
}
