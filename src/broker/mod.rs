//! Broker - registry of queues and topics
//!
//! The broker owns every [`MessageStore`] and the [`TopicRouter`], resolves
//! names to stores for clients, wires dead-letter targets and publishes
//! lifecycle events. Administrative operations (create, update, delete,
//! subscribe) live here; message traffic goes straight to the stores once a
//! name has been resolved.
//!
//! # Example
//!
//! ```rust
//! use fanout::broker::Broker;
//! use fanout::queue::QueueConfig;
//!
//! # fn example() -> Result<(), fanout::queue::QueueError> {
//! let broker = Broker::new();
//! broker.create_queue("orders", QueueConfig::default())?;
//! broker.create_topic("order-events")?;
//! broker.subscribe("order-events", "orders")?;
//!
//! let outcomes = broker.publish("order-events", b"order-42")?;
//! assert!(outcomes.iter().all(|o| o.is_delivered()));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod provision;

pub use provision::{BrokerConfig, QueueDeclaration, TopicDeclaration};

use crate::core::sync::{handle_rwlock_read, handle_rwlock_write};
use crate::core::time::{system_clock, SharedClock};
use crate::core::validation::validate_resource_name;
use crate::notifications::{BrokerEvent, NotificationManager};
use crate::queue::{Message, MessageStore, QueueConfig, QueueError, QueueResult, QueueStats};
use crate::topic::{FanoutOutcome, SubscriptionId, SubscriptionInfo, TopicRouter};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Queue as reported by `list_queues` and `fanout check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub name: String,
    pub visibility_timeout_seconds: u64,
    pub max_receive_count: Option<u32>,
    pub redrive_target: Option<String>,
    pub max_depth: Option<usize>,
    pub stats: QueueStats,
}

/// Topic as reported by `list_topics` and `fanout check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub subscriptions: Vec<SubscriptionInfo>,
}

/// Central registry of queues and topics
pub struct Broker {
    clock: SharedClock,
    events: Arc<NotificationManager>,
    queues: RwLock<BTreeMap<String, Arc<MessageStore>>>,
    router: TopicRouter,
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker {
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    /// Broker whose stores read time from `clock`
    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            clock,
            events: Arc::new(NotificationManager::new()),
            queues: RwLock::new(BTreeMap::new()),
            router: TopicRouter::new(),
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Lifecycle and delivery events for in-process observers
    pub fn events(&self) -> &Arc<NotificationManager> {
        &self.events
    }

    // ----- queues -----

    /// Create a queue; its redrive target, if any, must already exist
    pub fn create_queue(&self, name: &str, config: QueueConfig) -> QueueResult<Arc<MessageStore>> {
        let store = {
            let mut queues = handle_rwlock_write(self.queues.write(), QueueError::internal)?;
            let dead_letter = Self::resolve_dead_letter(&queues, name, &config)?;
            let store = self.insert_queue(&mut queues, name, config)?;
            store.set_dead_letter(dead_letter.as_ref())?;
            Self::rewire_dead_letters(&queues, &store)?;
            store
        };

        self.announce_queue(&store)?;
        Ok(store)
    }

    /// Replace a queue's configuration
    ///
    /// New leases use the new visibility timeout; leases already granted
    /// keep their expiry.
    pub fn update_queue(&self, name: &str, config: QueueConfig) -> QueueResult<()> {
        {
            let queues = handle_rwlock_read(self.queues.read(), QueueError::internal)?;
            let store = queues.get(name).ok_or_else(|| QueueError::QueueNotFound {
                queue: name.to_string(),
            })?;
            let dead_letter = Self::resolve_dead_letter(&queues, name, &config)?;
            store.reconfigure(config, dead_letter.as_ref())?;
        }

        log::info!("Queue '{}' updated", name);
        self.events.publish(BrokerEvent::QueueUpdated {
            queue: name.to_string(),
        });
        Ok(())
    }

    /// Remove a queue from the registry
    ///
    /// Topic subscriptions to it stay in place and report `QueueNotFound` on
    /// publish until the queue is recreated or they are unsubscribed. Queues
    /// redriving into it keep their undeliverable messages available.
    pub fn delete_queue(&self, name: &str) -> QueueResult<()> {
        let removed = handle_rwlock_write(self.queues.write(), QueueError::internal)?.remove(name);
        if removed.is_none() {
            return Err(QueueError::QueueNotFound {
                queue: name.to_string(),
            });
        }

        log::info!("Queue '{}' deleted", name);
        self.events.publish(BrokerEvent::QueueDeleted {
            queue: name.to_string(),
        });
        Ok(())
    }

    pub fn purge_queue(&self, name: &str) -> QueueResult<usize> {
        let removed = self.queue(name)?.purge()?;
        self.events.publish(BrokerEvent::QueuePurged {
            queue: name.to_string(),
            removed,
        });
        Ok(removed)
    }

    pub fn queue(&self, name: &str) -> QueueResult<Arc<MessageStore>> {
        let queues = handle_rwlock_read(self.queues.read(), QueueError::internal)?;
        queues
            .get(name)
            .cloned()
            .ok_or_else(|| QueueError::QueueNotFound {
                queue: name.to_string(),
            })
    }

    pub fn queue_names(&self) -> QueueResult<Vec<String>> {
        let queues = handle_rwlock_read(self.queues.read(), QueueError::internal)?;
        Ok(queues.keys().cloned().collect())
    }

    pub fn queue_stats(&self, name: &str) -> QueueResult<QueueStats> {
        self.queue(name)?.stats()
    }

    pub fn queue_summaries(&self) -> QueueResult<Vec<QueueSummary>> {
        let stores: Vec<_> = handle_rwlock_read(self.queues.read(), QueueError::internal)?
            .values()
            .cloned()
            .collect();

        stores
            .iter()
            .map(|store| {
                let config = store.config()?;
                Ok(QueueSummary {
                    name: store.name().to_string(),
                    visibility_timeout_seconds: config.visibility_timeout.as_secs(),
                    max_receive_count: config.max_receive_count,
                    redrive_target: config.redrive_target,
                    max_depth: config.max_depth,
                    stats: store.stats()?,
                })
            })
            .collect()
    }

    /// Enqueue directly into a queue, bypassing topics
    pub fn send(&self, queue: &str, body: Vec<u8>) -> QueueResult<Message> {
        self.queue(queue)?.enqueue(body)
    }

    // ----- topics -----

    pub fn create_topic(&self, name: &str) -> QueueResult<()> {
        validate_resource_name("topic", name).map_err(QueueError::invalid_configuration)?;
        self.router.create_topic(name)?;

        log::info!("Topic '{}' created", name);
        self.events.publish(BrokerEvent::TopicCreated {
            topic: name.to_string(),
        });
        Ok(())
    }

    pub fn delete_topic(&self, name: &str) -> QueueResult<()> {
        self.router.delete_topic(name)?;

        log::info!("Topic '{}' deleted", name);
        self.events.publish(BrokerEvent::TopicDeleted {
            topic: name.to_string(),
        });
        Ok(())
    }

    pub fn topic_names(&self) -> QueueResult<Vec<String>> {
        self.router.topic_names()
    }

    pub fn topic_summaries(&self) -> QueueResult<Vec<TopicSummary>> {
        self.router
            .topic_names()?
            .into_iter()
            .map(|name| {
                let subscriptions = self.router.topic(&name)?.subscriptions()?;
                Ok(TopicSummary {
                    name,
                    subscriptions,
                })
            })
            .collect()
    }

    /// Route `topic` to `queue`; subscribing an existing pair returns its id
    pub fn subscribe(&self, topic: &str, queue: &str) -> QueueResult<SubscriptionId> {
        let store = self.queue(queue)?;
        let (subscription_id, created) = self.router.subscribe(topic, &store)?;

        if created {
            log::info!(
                "Topic '{}' subscribed by queue '{}' ({})",
                topic,
                queue,
                subscription_id
            );
            self.events.publish(BrokerEvent::Subscribed {
                topic: topic.to_string(),
                queue: queue.to_string(),
                subscription_id: subscription_id.to_string(),
            });
        }
        Ok(subscription_id)
    }

    /// Remove a subscription; `false` when the topic has no such subscription
    pub fn unsubscribe(&self, topic: &str, subscription_id: SubscriptionId) -> QueueResult<bool> {
        let Some(queue) = self.router.unsubscribe(topic, subscription_id)? else {
            return Ok(false);
        };

        log::info!(
            "Topic '{}' unsubscribed queue '{}' ({})",
            topic,
            queue,
            subscription_id
        );
        self.events.publish(BrokerEvent::Unsubscribed {
            topic: topic.to_string(),
            subscription_id: subscription_id.to_string(),
        });
        Ok(true)
    }

    /// Fan `body` out to every queue subscribed to `topic`
    pub fn publish(&self, topic: &str, body: &[u8]) -> QueueResult<Vec<FanoutOutcome>> {
        self.router.publish(topic, body)
    }

    // ----- helpers -----

    fn insert_queue(
        &self,
        queues: &mut BTreeMap<String, Arc<MessageStore>>,
        name: &str,
        config: QueueConfig,
    ) -> QueueResult<Arc<MessageStore>> {
        validate_resource_name("queue", name).map_err(QueueError::invalid_configuration)?;
        if queues.contains_key(name) {
            return Err(QueueError::AlreadyExists {
                kind: "queue".to_string(),
                name: name.to_string(),
            });
        }

        let store = Arc::new(
            MessageStore::new(name, config, Arc::clone(&self.clock))?
                .with_events(Arc::clone(&self.events)),
        );
        queues.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    fn announce_queue(&self, store: &MessageStore) -> QueueResult<()> {
        let config = store.config()?;
        log::info!(
            "Queue '{}' created (visibility timeout {}s{})",
            store.name(),
            config.visibility_timeout.as_secs(),
            config
                .redrive_target
                .as_deref()
                .map(|target| format!(
                    ", dead-letter '{}' after {} receives",
                    target,
                    config.max_receive_count.unwrap_or_default()
                ))
                .unwrap_or_default()
        );
        self.events.publish(BrokerEvent::QueueCreated {
            queue: store.name().to_string(),
        });
        Ok(())
    }

    /// Look up the store named as `config`'s redrive target
    fn resolve_dead_letter(
        queues: &BTreeMap<String, Arc<MessageStore>>,
        name: &str,
        config: &QueueConfig,
    ) -> QueueResult<Option<Arc<MessageStore>>> {
        let Some(target) = config.redrive_target.as_deref() else {
            return Ok(None);
        };
        if target == name {
            return Err(QueueError::invalid_configuration(format!(
                "queue '{}' cannot be its own redrive target",
                name
            )));
        }
        queues.get(target).cloned().map(Some).ok_or_else(|| {
            QueueError::invalid_configuration(format!(
                "redrive target '{}' of queue '{}' does not exist",
                target, name
            ))
        })
    }

    /// Reconnect queues that redrive into a recreated `target`
    fn rewire_dead_letters(
        queues: &BTreeMap<String, Arc<MessageStore>>,
        target: &Arc<MessageStore>,
    ) -> QueueResult<()> {
        for store in queues.values() {
            if store.config()?.redrive_target.as_deref() == Some(target.name()) {
                store.set_dead_letter(Some(target))?;
            }
        }
        Ok(())
    }
}
