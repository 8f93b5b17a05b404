//! Queue Error Types

use crate::core::error_handling::ContextualError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Message not found: {message_id}")]
    NotFound { message_id: String },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Topic not found: {topic}")]
    TopicNotFound { topic: String },

    #[error("Message {message_id} is already in flight")]
    AlreadyInFlight { message_id: String },

    #[error("Message {message_id} is waiting to move to its dead-letter queue")]
    RedrivePending { message_id: String },

    #[error("Lease {lease_id} on message {message_id} is no longer valid")]
    LeaseExpired {
        message_id: String,
        lease_id: String,
    },

    #[error("Queue {queue} is at capacity (max depth: {max_depth})")]
    CapacityExceeded { queue: String, max_depth: usize },

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: String, name: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl QueueError {
    /// Constructor for lock-poisoning and other internal failures
    pub fn internal(message: String) -> Self {
        QueueError::Internal { message }
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        QueueError::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Stable machine-readable error code used on the wire
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::NotFound { .. } => "not_found",
            QueueError::QueueNotFound { .. } => "queue_not_found",
            QueueError::TopicNotFound { .. } => "topic_not_found",
            QueueError::AlreadyInFlight { .. } => "already_in_flight",
            QueueError::RedrivePending { .. } => "redrive_pending",
            QueueError::LeaseExpired { .. } => "lease_expired",
            QueueError::CapacityExceeded { .. } => "capacity_exceeded",
            QueueError::InvalidConfiguration { .. } => "invalid_configuration",
            QueueError::AlreadyExists { .. } => "already_exists",
            QueueError::Internal { .. } => "internal",
        }
    }

    /// Whether a caller may succeed by retrying the same call after backing off
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::CapacityExceeded { .. })
    }
}

impl ContextualError for QueueError {
    fn is_user_actionable(&self) -> bool {
        !matches!(self, QueueError::Internal { .. })
    }

    fn user_message(&self) -> Option<&str> {
        match self {
            QueueError::InvalidConfiguration { message } => Some(message),
            QueueError::Internal { .. } => None,
            QueueError::NotFound { .. } => Some("message does not exist"),
            QueueError::QueueNotFound { .. } => Some("queue does not exist"),
            QueueError::TopicNotFound { .. } => Some("topic does not exist"),
            QueueError::AlreadyInFlight { .. } => Some("message is held by another consumer"),
            QueueError::RedrivePending { .. } => {
                Some("message used up its deliveries and cannot be received")
            }
            QueueError::LeaseExpired { .. } => {
                Some("lease is stale; the message was already handled or redelivered")
            }
            QueueError::CapacityExceeded { .. } => Some("queue is full; back off and retry"),
            QueueError::AlreadyExists { .. } => Some("resource already exists"),
        }
    }
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;
