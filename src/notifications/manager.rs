//! NotificationManager implementation

use crate::core::sync::{recover_read, recover_write};
use crate::notifications::event::{BrokerEvent, EventFilter, Notification};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::SystemTime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Receiving end handed to a subscriber
pub type EventReceiver = UnboundedReceiver<Notification>;

struct SubscriberInfo {
    filter: EventFilter,
    source: String,
    sender: UnboundedSender<Notification>,
    delivered: AtomicUsize,
}

/// Fans broker events out to in-process subscribers
///
/// Publishing is synchronous and never blocks: each subscriber owns an
/// unbounded channel. Subscribers whose receiver was dropped are pruned on
/// the next publish.
#[derive(Default)]
pub struct NotificationManager {
    subscribers: RwLock<HashMap<String, SubscriberInfo>>,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, replacing any existing one with the same id
    pub fn subscribe(
        &self,
        subscriber_id: impl Into<String>,
        filter: EventFilter,
        source: impl Into<String>,
    ) -> EventReceiver {
        let subscriber_id = subscriber_id.into();
        let source = source.into();
        let (sender, receiver) = unbounded_channel();

        let info = SubscriberInfo {
            filter,
            source: source.clone(),
            sender,
            delivered: AtomicUsize::new(0),
        };

        let mut subscribers = recover_write(self.subscribers.write());
        if let Some(existing) = subscribers.insert(subscriber_id.clone(), info) {
            log::warn!(
                "Subscriber '{}' replaced existing subscription (source: {} -> {})",
                subscriber_id,
                existing.source,
                source
            );
        }

        receiver
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        recover_write(self.subscribers.write())
            .remove(subscriber_id)
            .is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        recover_read(self.subscribers.read()).len()
    }

    pub fn has_subscriber(&self, subscriber_id: &str) -> bool {
        recover_read(self.subscribers.read()).contains_key(subscriber_id)
    }

    /// Number of events delivered to a subscriber so far
    pub fn delivered_count(&self, subscriber_id: &str) -> Option<usize> {
        recover_read(self.subscribers.read())
            .get(subscriber_id)
            .map(|info| info.delivered.load(Ordering::Relaxed))
    }

    /// Deliver an event to every matching subscriber
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, event: BrokerEvent) -> usize {
        let notification = Notification {
            timestamp: SystemTime::now(),
            event,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let subscribers = recover_read(self.subscribers.read());
            for (subscriber_id, info) in subscribers.iter() {
                if !info.filter.accepts(&notification.event) {
                    continue;
                }
                if info.sender.send(notification.clone()).is_ok() {
                    info.delivered.fetch_add(1, Ordering::Relaxed);
                    delivered += 1;
                } else {
                    closed.push(subscriber_id.clone());
                }
            }
        }

        if !closed.is_empty() {
            let mut subscribers = recover_write(self.subscribers.write());
            for subscriber_id in &closed {
                subscribers.remove(subscriber_id);
                log::debug!("Pruned closed event subscriber '{}'", subscriber_id);
            }
        }

        log::trace!(
            "Published {:?} event to {} subscribers",
            notification.event.kind(),
            delivered
        );
        delivered
    }
}
