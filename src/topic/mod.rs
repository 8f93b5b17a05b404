//! Topics and fanout
//!
//! A [`Topic`] maps subscription ids to target queues. Publishing copies the
//! body into every subscribed queue independently: one full or deleted queue
//! never stops delivery to the others, and the caller gets one
//! [`FanoutOutcome`] per subscription instead of a single result.
//!
//! Subscriptions hold weak references, so a topic never keeps a deleted
//! queue alive.

mod router;

pub use router::TopicRouter;

use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use crate::queue::{MessageId, MessageStore, QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock, Weak};
use uuid::Uuid;

/// Identifier of one topic-to-queue subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubscriptionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    queue_name: String,
    queue: Weak<MessageStore>,
}

/// Result of delivering one publish to one subscription
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutOutcome {
    pub subscription_id: SubscriptionId,
    pub queue: String,
    /// Id of the copy stored in `queue`, or why it could not be stored
    pub result: QueueResult<MessageId>,
}

impl FanoutOutcome {
    pub fn is_delivered(&self) -> bool {
        self.result.is_ok()
    }
}

/// Subscription as reported to administrators
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionInfo {
    pub subscription_id: SubscriptionId,
    pub queue: String,
}

/// Named fanout point
#[derive(Debug)]
pub struct Topic {
    name: String,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe `queue`, or return the existing subscription for it
    ///
    /// Subscriptions are keyed by queue name. Re-subscribing a queue that was
    /// deleted and recreated under the same name rebinds the existing
    /// subscription to the new store. The flag is `true` when a new
    /// subscription was created.
    pub fn subscribe(&self, queue: &Arc<MessageStore>) -> QueueResult<(SubscriptionId, bool)> {
        let mut subscriptions =
            handle_rwlock_write(self.subscriptions.write(), QueueError::internal)?;

        if let Some(existing) = subscriptions
            .iter_mut()
            .find(|s| s.queue_name == queue.name())
        {
            existing.queue = Arc::downgrade(queue);
            return Ok((existing.id, false));
        }

        let id = SubscriptionId::new();
        subscriptions.push(Subscription {
            id,
            queue_name: queue.name().to_string(),
            queue: Arc::downgrade(queue),
        });
        Ok((id, true))
    }

    /// Remove a subscription; returns the queue it pointed at
    pub fn unsubscribe(&self, subscription_id: SubscriptionId) -> QueueResult<Option<String>> {
        let mut subscriptions =
            handle_rwlock_write(self.subscriptions.write(), QueueError::internal)?;
        let position = subscriptions.iter().position(|s| s.id == subscription_id);
        Ok(position.map(|index| subscriptions.remove(index).queue_name))
    }

    pub fn subscriptions(&self) -> QueueResult<Vec<SubscriptionInfo>> {
        let subscriptions = handle_rwlock_read(self.subscriptions.read(), QueueError::internal)?;
        Ok(subscriptions
            .iter()
            .map(|s| SubscriptionInfo {
                subscription_id: s.id,
                queue: s.queue_name.clone(),
            })
            .collect())
    }

    /// Copy `body` into every subscribed queue
    ///
    /// The subscription list is snapshotted first, so concurrent
    /// administrative changes apply to the next publish.
    pub fn publish(&self, body: &[u8]) -> QueueResult<Vec<FanoutOutcome>> {
        let targets = handle_rwlock_read(self.subscriptions.read(), QueueError::internal)?.clone();

        let outcomes = targets
            .into_iter()
            .map(|subscription| {
                let result = match subscription.queue.upgrade() {
                    Some(store) => store
                        .enqueue_from_topic(body.to_vec(), &self.name)
                        .map(|message| message.id),
                    None => Err(QueueError::QueueNotFound {
                        queue: subscription.queue_name.clone(),
                    }),
                };

                if let Err(e) = &result {
                    log::warn!(
                        "Topic '{}': fanout to queue '{}' failed: {}",
                        self.name,
                        subscription.queue_name,
                        e
                    );
                }

                FanoutOutcome {
                    subscription_id: subscription.id,
                    queue: subscription.queue_name,
                    result,
                }
            })
            .collect();

        Ok(outcomes)
    }
}
