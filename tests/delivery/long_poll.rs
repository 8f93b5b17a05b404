//! Waiting receives

use crate::common::{mock_broker, order_topology, session};
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_zero_wait_returns_immediately_when_empty() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "impatient");

    let started = Instant::now();
    let delivered = consumer.receive("orders", 10, Duration::ZERO).await.unwrap();
    assert!(delivered.is_empty());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_wait_elapses_with_empty_result() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "patient");

    let started = Instant::now();
    let delivered = consumer
        .receive("orders", 1, Duration::from_millis(200))
        .await
        .unwrap();
    let waited = started.elapsed();

    assert!(delivered.is_empty());
    assert!(waited >= Duration::from_millis(190), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(3), "waited {:?}", waited);
}

#[tokio::test]
async fn test_wait_ends_when_message_is_published() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "waiting");

    let started = Instant::now();
    let waiting = tokio::spawn(async move {
        consumer
            .receive("orders", 5, Duration::from_secs(10))
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    broker.publish("order-events", b"arrived").unwrap();

    let delivered = waiting.await.unwrap().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].message.body, b"arrived");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_wait_picks_up_lapsed_lease() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut holder = session(&broker, "holder");
    let mut waiter =
        session(&broker, "waiter").with_poll_interval(Duration::from_millis(20));

    broker.send("orders", b"body".to_vec()).unwrap();
    let held = holder.receive("orders", 1, Duration::ZERO).await.unwrap();
    assert_eq!(held.len(), 1);

    let waiting = tokio::spawn(async move {
        waiter
            .receive("orders", 1, Duration::from_secs(10))
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    clock.advance(Duration::from_secs(300));

    let redelivered = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .expect("waiter woke up")
        .unwrap()
        .unwrap();
    assert_eq!(redelivered[0].message.id, held[0].message.id);
    assert_eq!(redelivered[0].message.receive_count, 1);
}

#[tokio::test]
async fn test_cancelled_wait_returns_empty_and_claims_nothing() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "cancelled");

    let started = Instant::now();
    let delivered = consumer
        .receive_until(
            "orders",
            1,
            Duration::from_secs(10),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .unwrap();

    assert!(delivered.is_empty());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(broker.queue_stats("orders").unwrap().in_flight, 0);
}

#[tokio::test]
async fn test_dropped_receive_leaves_messages_available() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "dropped");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        consumer.receive("orders", 1, Duration::from_secs(10)),
    )
    .await;
    assert!(abandoned.is_err());

    broker.send("orders", b"later".to_vec()).unwrap();
    assert_eq!(broker.queue_stats("orders").unwrap().available, 1);

    let delivered = consumer.receive("orders", 1, Duration::ZERO).await.unwrap();
    assert_eq!(delivered.len(), 1);
}

#[tokio::test]
async fn test_zero_max_messages_claims_nothing() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "none");

    broker.send("orders", b"body".to_vec()).unwrap();
    assert!(consumer
        .receive("orders", 0, Duration::from_secs(1))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(broker.queue_stats("orders").unwrap().available, 1);
}
