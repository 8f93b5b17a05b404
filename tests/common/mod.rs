//! Shared fixtures for the integration suites

#![allow(dead_code)]

use fanout::broker::Broker;
use fanout::core::time::MockClock;
use fanout::queue::QueueConfig;
use fanout::session::ConsumerSession;
use std::sync::Arc;

/// Broker driven by a clock the test advances by hand
pub fn mock_broker() -> (Arc<Broker>, MockClock) {
    let clock = MockClock::new();
    (Arc::new(Broker::with_clock(Arc::new(clock.clone()))), clock)
}

/// `order-events` fanning out to `orders` and `audit`, with `orders`
/// redriving to `orders-dlq` after three failed receives
pub fn order_topology(broker: &Broker) {
    broker
        .create_queue("orders-dlq", QueueConfig::default())
        .unwrap();
    broker
        .create_queue("orders", QueueConfig::default().with_redrive(3, "orders-dlq"))
        .unwrap();
    broker.create_queue("audit", QueueConfig::default()).unwrap();
    broker.create_topic("order-events").unwrap();
    broker.subscribe("order-events", "orders").unwrap();
    broker.subscribe("order-events", "audit").unwrap();
}

pub fn session(broker: &Arc<Broker>, name: &str) -> ConsumerSession {
    ConsumerSession::new(name, Arc::downgrade(broker))
}
