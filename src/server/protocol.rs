//! Wire format: one JSON object per line in each direction
//!
//! Requests carry an `op` tag and an optional `id` echoed back in the
//! response. Message bodies are base64 (standard alphabet, padded).
//!
//! ```text
//! → {"id":1,"op":"publish","topic":"order-events","body":"aGVsbG8="}
//! ← {"id":1,"ok":true,"result":{"outcomes":[...]}}
//! → {"id":2,"op":"acknowledge","queue":"orders","message_id":"...","lease_id":"..."}
//! ← {"id":2,"ok":false,"error":{"code":"lease_expired","message":"..."}}
//! ```

use crate::broker::QueueDeclaration;
use crate::queue::{Message, QueueError};
use crate::session::Delivery;
use crate::topic::FanoutOutcome;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// Errors raised by the transport itself rather than the broker
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Malformed request: {0}")]
    BadRequest(String),

    #[error("Request line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::BadRequest(_) => "bad_request",
            ServerError::LineTooLong { .. } => "line_too_long",
            ServerError::Queue(e) => e.code(),
        }
    }
}

fn default_max_messages() -> usize {
    1
}

/// Request line: an optional correlation id plus the operation
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Publish {
        topic: String,
        body: String,
    },
    Send {
        queue: String,
        body: String,
    },
    Receive {
        queue: String,
        #[serde(default = "default_max_messages")]
        max_messages: usize,
        #[serde(default)]
        wait_seconds: u64,
    },
    Acknowledge {
        queue: String,
        message_id: String,
        lease_id: String,
    },
    ExtendVisibility {
        queue: String,
        message_id: String,
        lease_id: String,
        timeout_seconds: u64,
    },
    Release {
        queue: String,
        message_id: String,
        lease_id: String,
    },
    CreateQueue(QueueDeclaration),
    UpdateQueue(QueueDeclaration),
    DeleteQueue {
        queue: String,
    },
    PurgeQueue {
        queue: String,
    },
    CreateTopic {
        topic: String,
    },
    DeleteTopic {
        topic: String,
    },
    Subscribe {
        topic: String,
        queue: String,
    },
    Unsubscribe {
        topic: String,
        subscription_id: String,
    },
    QueueStats {
        queue: String,
    },
    ListQueues,
    ListTopics,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<&ServerError> for ErrorBody {
    fn from(error: &ServerError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: &ServerError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageView {
    pub message_id: String,
    pub body: String,
    pub enqueue_time: String,
    pub receive_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_origin: Option<String>,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            message_id: message.id.to_string(),
            body: encode_body(&message.body),
            enqueue_time: DateTime::<Utc>::from(message.enqueue_time).to_rfc3339(),
            receive_count: message.receive_count,
            topic_origin: message.topic_origin.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeliveryView {
    #[serde(flatten)]
    pub message: MessageView,
    pub lease_id: String,
    pub visibility_remaining_ms: u64,
}

impl DeliveryView {
    pub fn new(delivery: &Delivery, now: Instant) -> Self {
        Self {
            message: MessageView::from(&delivery.message),
            lease_id: delivery.lease.lease_id.to_string(),
            visibility_remaining_ms: millis(delivery.lease.remaining(now)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OutcomeView {
    pub subscription_id: String,
    pub queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl From<FanoutOutcome> for OutcomeView {
    fn from(outcome: FanoutOutcome) -> Self {
        let (message_id, error) = match outcome.result {
            Ok(id) => (Some(id.to_string()), None),
            Err(e) => (None, Some(ErrorBody::from(&ServerError::Queue(e)))),
        };
        Self {
            subscription_id: outcome.subscription_id.to_string(),
            queue: outcome.queue,
            message_id,
            error,
        }
    }
}

pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

pub fn decode_body(body: &str) -> Result<Vec<u8>, ServerError> {
    STANDARD
        .decode(body)
        .map_err(|e| ServerError::BadRequest(format!("body is not valid base64: {}", e)))
}

/// Parse an id field into one of the typed identifiers
pub fn parse_id<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ServerError> {
    value
        .parse()
        .map_err(|_| ServerError::BadRequest(format!("{} '{}' is not a valid id", field, value)))
}

pub fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
