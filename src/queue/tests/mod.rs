//! Test suites for the message store and visibility tracker
//!
//! Tests are organized by functional area; shared fixtures live here.


use crate::core::time::{MockClock, SharedClock};
use crate::queue::{MessageStore, QueueConfig};
use std::sync::Arc;

/// Store driven by a manually advanced clock
pub(super) fn mock_store(name: &str, config: QueueConfig) -> (Arc<MessageStore>, MockClock) {
    let clock = MockClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let store = MessageStore::new(name, config, shared).unwrap();
    (Arc::new(store), clock)
}

/// Origin queue with redrive after `max_receive_count` into a wired DLQ
pub(super) fn store_with_dlq(
    max_receive_count: u32,
) -> (Arc<MessageStore>, Arc<MessageStore>, MockClock) {
    let clock = MockClock::new();
    let shared: SharedClock = Arc::new(clock.clone());
    let dlq = Arc::new(MessageStore::new("orders-dlq", QueueConfig::default(), shared.clone()).unwrap());
    let origin = Arc::new(
        MessageStore::new(
            "orders",
            QueueConfig::default().with_redrive(max_receive_count, "orders-dlq"),
            shared,
        )
        .unwrap(),
    );
    origin.set_dead_letter(Some(&dlq)).unwrap();
    (origin, dlq, clock)
}
