//! Declarative provisioning of queues, topics and subscriptions

use crate::broker::Broker;
use crate::core::sync::handle_rwlock_write;
use crate::queue::{QueueConfig, QueueError, QueueResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Topology declared in the `[[queue]]` and `[[topic]]` tables of the
/// configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    #[serde(rename = "queue")]
    pub queues: Vec<QueueDeclaration>,
    #[serde(rename = "topic")]
    pub topics: Vec<TopicDeclaration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueDeclaration {
    pub name: String,
    #[serde(default = "QueueDeclaration::default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
    #[serde(default)]
    pub max_receive_count: Option<u32>,
    #[serde(default)]
    pub redrive_target: Option<String>,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

impl QueueDeclaration {
    fn default_visibility_timeout_seconds() -> u64 {
        QueueConfig::DEFAULT_VISIBILITY_TIMEOUT.as_secs()
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            visibility_timeout_seconds: Self::default_visibility_timeout_seconds(),
            max_receive_count: None,
            redrive_target: None,
            max_depth: None,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            visibility_timeout: Duration::from_secs(self.visibility_timeout_seconds),
            max_receive_count: self.max_receive_count,
            redrive_target: self.redrive_target.clone(),
            max_depth: self.max_depth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TopicDeclaration {
    pub name: String,
    /// Names of the queues this topic fans out to
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

impl Broker {
    /// Create everything `config` declares
    ///
    /// Queues are created first and dead-letter targets resolved once all of
    /// them exist, so declaration order does not matter. Provisioning stops
    /// at the first error and leaves whatever was already created in place.
    pub fn provision(&self, config: &BrokerConfig) -> QueueResult<()> {
        let created = {
            let mut queues = handle_rwlock_write(self.queues.write(), QueueError::internal)?;

            let mut created = Vec::with_capacity(config.queues.len());
            for declaration in &config.queues {
                created.push(self.insert_queue(
                    &mut queues,
                    &declaration.name,
                    declaration.queue_config(),
                )?);
            }

            for store in &created {
                let dead_letter =
                    Self::resolve_dead_letter(&queues, store.name(), &store.config()?)?;
                store.set_dead_letter(dead_letter.as_ref())?;
            }
            created
        };

        for store in &created {
            self.announce_queue(store)?;
        }

        for topic in &config.topics {
            self.create_topic(&topic.name)?;
            for queue in &topic.subscriptions {
                self.subscribe(&topic.name, queue).map_err(|e| match e {
                    QueueError::QueueNotFound { queue } => QueueError::invalid_configuration(
                        format!("topic '{}' subscribes unknown queue '{}'", topic.name, queue),
                    ),
                    other => other,
                })?;
            }
        }

        log::info!(
            "Provisioned {} queues and {} topics",
            config.queues.len(),
            config.topics.len()
        );
        Ok(())
    }
}
