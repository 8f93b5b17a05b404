//! Per-queue delivery configuration

use crate::queue::error::{QueueError, QueueResult};
use std::time::Duration;

/// Delivery configuration fixed at queue creation and changed only through
/// an administrative update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How long a received message stays invisible to other consumers
    pub visibility_timeout: Duration,
    /// Delivery-attempt budget before a message is moved to `redrive_target`
    pub max_receive_count: Option<u32>,
    /// Name of the dead-letter queue
    pub redrive_target: Option<String>,
    /// Maximum number of stored messages; `None` is unbounded
    pub max_depth: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Self::DEFAULT_VISIBILITY_TIMEOUT,
            max_receive_count: None,
            redrive_target: None,
            max_depth: None,
        }
    }
}

impl QueueConfig {
    pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

    /// Upper bound on any visibility timeout or extension: 12 hours
    pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Configure dead-letter redrive after `max_receive_count` deliveries
    pub fn with_redrive(mut self, max_receive_count: u32, target: impl Into<String>) -> Self {
        self.max_receive_count = Some(max_receive_count);
        self.redrive_target = Some(target.into());
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }

    /// Check internal consistency; references to other queues are resolved
    /// by the broker
    pub fn validate(&self) -> QueueResult<()> {
        validate_visibility_timeout(self.visibility_timeout)?;

        match (self.max_receive_count, &self.redrive_target) {
            (Some(0), _) => Err(QueueError::invalid_configuration(
                "max_receive_count must be at least 1",
            )),
            (Some(_), None) => Err(QueueError::invalid_configuration(
                "max_receive_count requires a redrive_target",
            )),
            (None, Some(target)) => Err(QueueError::invalid_configuration(format!(
                "redrive_target '{}' requires max_receive_count",
                target
            ))),
            _ => Ok(()),
        }?;

        if self.max_depth == Some(0) {
            return Err(QueueError::invalid_configuration(
                "max_depth must be greater than zero",
            ));
        }

        Ok(())
    }
}

/// Validate a visibility timeout or extension
pub fn validate_visibility_timeout(timeout: Duration) -> QueueResult<()> {
    if timeout.is_zero() {
        return Err(QueueError::invalid_configuration(
            "visibility timeout must be greater than zero",
        ));
    }
    if timeout > QueueConfig::MAX_VISIBILITY_TIMEOUT {
        return Err(QueueError::invalid_configuration(format!(
            "visibility timeout {:?} exceeds the maximum of {:?}",
            timeout,
            QueueConfig::MAX_VISIBILITY_TIMEOUT
        )));
    }
    Ok(())
}
