//! Lease timing through consumer sessions

use crate::common::{mock_broker, order_topology, session};
use fanout::queue::QueueError;
use fanout::session::SessionState;
use std::time::Duration;

const NO_WAIT: Duration = Duration::ZERO;

#[tokio::test]
async fn test_message_hidden_for_visibility_timeout_then_redelivered() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut first = session(&broker, "first");
    let mut second = session(&broker, "second");

    broker.publish("order-events", b"order-1").unwrap();
    let delivered = first.receive("orders", 1, NO_WAIT).await.unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message.receive_count, 0);

    assert!(second.receive("orders", 1, NO_WAIT).await.unwrap().is_empty());
    clock.advance(Duration::from_secs(299));
    assert!(second.receive("orders", 1, NO_WAIT).await.unwrap().is_empty());

    clock.advance(Duration::from_secs(1));
    let redelivered = second.receive("orders", 1, NO_WAIT).await.unwrap();
    assert_eq!(redelivered.len(), 1);
    assert_eq!(redelivered[0].message.id, delivered[0].message.id);
    assert_eq!(redelivered[0].message.receive_count, 1);
    assert_ne!(redelivered[0].lease_id(), delivered[0].lease_id());

    let stale = first.acknowledge("orders", delivered[0].message.id, delivered[0].lease_id());
    assert!(matches!(stale, Err(QueueError::LeaseExpired { .. })));

    second
        .acknowledge("orders", redelivered[0].message.id, redelivered[0].lease_id())
        .unwrap();
    assert_eq!(broker.queue_stats("orders").unwrap().total, 0);
}

#[tokio::test]
async fn test_extend_visibility_postpones_redelivery() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "slow");
    let mut other = session(&broker, "other");

    broker.send("orders", b"long job".to_vec()).unwrap();
    let delivery = consumer.receive("orders", 1, NO_WAIT).await.unwrap().remove(0);

    clock.advance(Duration::from_secs(200));
    let lease = consumer
        .extend_visibility(
            "orders",
            delivery.message.id,
            delivery.lease_id(),
            Duration::from_secs(300),
        )
        .unwrap();
    assert_eq!(lease.lease_id, delivery.lease_id());

    clock.advance(Duration::from_secs(200));
    assert!(other.receive("orders", 1, NO_WAIT).await.unwrap().is_empty());

    consumer
        .acknowledge("orders", delivery.message.id, delivery.lease_id())
        .unwrap();
}

#[tokio::test]
async fn test_extend_after_lapse_fails() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "late");

    broker.send("orders", b"body".to_vec()).unwrap();
    let delivery = consumer.receive("orders", 1, NO_WAIT).await.unwrap().remove(0);
    clock.advance(Duration::from_secs(300));

    let result = consumer.extend_visibility(
        "orders",
        delivery.message.id,
        delivery.lease_id(),
        Duration::from_secs(60),
    );
    assert!(matches!(result, Err(QueueError::LeaseExpired { .. })));
    assert!(consumer.held().is_empty());
}

#[tokio::test]
async fn test_release_makes_message_visible_at_once() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "nack");
    assert_eq!(consumer.state(), SessionState::Idle);

    broker.send("orders", b"retry me".to_vec()).unwrap();
    let delivery = consumer.receive("orders", 1, NO_WAIT).await.unwrap().remove(0);
    assert_eq!(consumer.state(), SessionState::Holding);
    assert_eq!(consumer.held().len(), 1);

    consumer
        .release("orders", delivery.message.id, delivery.lease_id())
        .unwrap();
    assert_eq!(consumer.state(), SessionState::Idle);

    let again = consumer.receive("orders", 1, NO_WAIT).await.unwrap();
    assert_eq!(again[0].message.id, delivery.message.id);
    assert_eq!(again[0].message.receive_count, 1);
}

#[tokio::test]
async fn test_lapsed_lease_leaves_holding_state() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "idle");

    broker.send("audit", b"body".to_vec()).unwrap();
    consumer.receive("audit", 1, NO_WAIT).await.unwrap();
    assert_eq!(consumer.state(), SessionState::Holding);

    clock.advance(Duration::from_secs(300));
    assert_eq!(consumer.state(), SessionState::Idle);
}
