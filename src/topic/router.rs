//! TopicRouter - registry of topics and entry point for publishing

use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use crate::queue::{MessageStore, QueueError, QueueResult};
use crate::topic::{FanoutOutcome, SubscriptionId, Topic};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Named topics and their subscriptions
///
/// The topic map is only written by administrative calls; publishing takes
/// a read lock just long enough to find the topic.
#[derive(Debug, Default)]
pub struct TopicRouter {
    topics: RwLock<BTreeMap<String, Arc<Topic>>>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_topic(&self, name: &str) -> QueueResult<Arc<Topic>> {
        let mut topics = handle_rwlock_write(self.topics.write(), QueueError::internal)?;
        if topics.contains_key(name) {
            return Err(QueueError::AlreadyExists {
                kind: "topic".to_string(),
                name: name.to_string(),
            });
        }
        let topic = Arc::new(Topic::new(name));
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    pub fn delete_topic(&self, name: &str) -> QueueResult<()> {
        let mut topics = handle_rwlock_write(self.topics.write(), QueueError::internal)?;
        topics
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| QueueError::TopicNotFound {
                topic: name.to_string(),
            })
    }

    pub fn topic(&self, name: &str) -> QueueResult<Arc<Topic>> {
        let topics = handle_rwlock_read(self.topics.read(), QueueError::internal)?;
        topics
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::TopicNotFound {
                topic: name.to_string(),
            })
    }

    /// Topic names in sorted order
    pub fn topic_names(&self) -> QueueResult<Vec<String>> {
        let topics = handle_rwlock_read(self.topics.read(), QueueError::internal)?;
        Ok(topics.keys().cloned().collect())
    }

    /// Idempotently route `topic` to `queue`
    pub fn subscribe(
        &self,
        topic: &str,
        queue: &Arc<MessageStore>,
    ) -> QueueResult<(SubscriptionId, bool)> {
        self.topic(topic)?.subscribe(queue)
    }

    pub fn unsubscribe(
        &self,
        topic: &str,
        subscription_id: SubscriptionId,
    ) -> QueueResult<Option<String>> {
        self.topic(topic)?.unsubscribe(subscription_id)
    }

    /// Fan `body` out to every subscription of `topic`
    ///
    /// Fails only when the topic itself is unknown; per-queue failures are
    /// reported in the returned outcomes.
    pub fn publish(&self, topic: &str, body: &[u8]) -> QueueResult<Vec<FanoutOutcome>> {
        let outcomes = self.topic(topic)?.publish(body)?;
        log::trace!(
            "Topic '{}': published to {} of {} subscriptions",
            topic,
            outcomes.iter().filter(|o| o.is_delivered()).count(),
            outcomes.len()
        );
        Ok(outcomes)
    }
}
