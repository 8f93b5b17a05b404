//! Publishing through topics

use crate::common::{mock_broker, order_topology, session};
use fanout::queue::{QueueConfig, QueueError};
use std::time::Duration;

#[tokio::test]
async fn test_publish_copies_to_every_subscription() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "reader");

    let body = vec![0u8, 159, 146, 150, 255];
    let outcomes = broker.publish("order-events", &body).unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_delivered()));

    let orders = consumer.receive("orders", 1, Duration::ZERO).await.unwrap();
    let audit = consumer.receive("audit", 1, Duration::ZERO).await.unwrap();
    assert_eq!(orders[0].message.body, body);
    assert_eq!(audit[0].message.body, body);
    assert_ne!(orders[0].message.id, audit[0].message.id);
}

#[test]
fn test_full_queue_does_not_block_other_subscriptions() {
    let (broker, _clock) = mock_broker();
    broker
        .create_queue("small", QueueConfig::default().with_max_depth(1))
        .unwrap();
    broker.create_queue("large", QueueConfig::default()).unwrap();
    broker.create_topic("events").unwrap();
    broker.subscribe("events", "small").unwrap();
    broker.subscribe("events", "large").unwrap();

    broker.publish("events", b"first").unwrap();
    let outcomes = broker.publish("events", b"second").unwrap();

    let small = outcomes.iter().find(|o| o.queue == "small").unwrap();
    let large = outcomes.iter().find(|o| o.queue == "large").unwrap();
    assert!(matches!(
        small.result,
        Err(QueueError::CapacityExceeded { max_depth: 1, .. })
    ));
    assert!(large.is_delivered());
    assert_eq!(broker.queue_stats("large").unwrap().total, 2);
    assert_eq!(broker.queue_stats("small").unwrap().total, 1);
}

#[test]
fn test_repeated_subscribe_delivers_once() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);

    let existing = broker.subscribe("order-events", "orders").unwrap();
    let again = broker.subscribe("order-events", "orders").unwrap();
    assert_eq!(existing, again);

    broker.publish("order-events", b"once").unwrap();
    assert_eq!(broker.queue_stats("orders").unwrap().total, 1);
}

#[test]
fn test_publish_to_unknown_topic() {
    let (broker, _clock) = mock_broker();
    assert!(matches!(
        broker.publish("nowhere", b"body"),
        Err(QueueError::TopicNotFound { .. })
    ));
}

#[test]
fn test_topic_without_subscriptions_reports_no_outcomes() {
    let (broker, _clock) = mock_broker();
    broker.create_topic("quiet").unwrap();
    assert!(broker.publish("quiet", b"body").unwrap().is_empty());
}
