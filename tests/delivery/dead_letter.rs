//! Redrive to dead-letter queues

use crate::common::{mock_broker, order_topology, session};
use fanout::notifications::{BrokerEvent, EventFilter, EventKind};
use fanout::queue::QueueConfig;
use std::time::Duration;

const VISIBILITY: Duration = Duration::from_secs(300);

#[tokio::test]
async fn test_third_expiry_moves_message_to_dead_letter_queue() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "flaky");

    broker.publish("order-events", b"poison").unwrap();

    for attempt in 0..3 {
        let delivered = consumer.receive("orders", 1, Duration::ZERO).await.unwrap();
        assert_eq!(delivered.len(), 1, "attempt {}", attempt);
        assert_eq!(delivered[0].message.receive_count, attempt);
        clock.advance(VISIBILITY);
    }

    assert!(consumer
        .receive("orders", 1, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(broker.queue_stats("orders").unwrap().total, 0);

    let dead = consumer
        .receive("orders-dlq", 1, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].message.body, b"poison");
    assert_eq!(dead[0].message.receive_count, 0);
    assert_eq!(dead[0].message.topic_origin.as_deref(), Some("order-events"));

    // The other subscriber's copy is unaffected
    assert_eq!(broker.queue_stats("audit").unwrap().available, 1);
}

#[tokio::test]
async fn test_releases_count_toward_redrive() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let mut consumer = session(&broker, "rejecting");

    broker.send("orders", b"rejected".to_vec()).unwrap();
    for _ in 0..3 {
        let delivery = consumer
            .receive("orders", 1, Duration::ZERO)
            .await
            .unwrap()
            .remove(0);
        consumer
            .release("orders", delivery.message.id, delivery.lease_id())
            .unwrap();
    }

    assert_eq!(broker.queue_stats("orders").unwrap().total, 0);
    assert_eq!(broker.queue_stats("orders-dlq").unwrap().available, 1);
}

#[tokio::test]
async fn test_dead_letter_event_names_both_queues() {
    let (broker, clock) = mock_broker();
    order_topology(&broker);
    let mut events = broker.events().subscribe(
        "dlq-watch",
        EventFilter::Kinds(vec![EventKind::Delivery]),
        "test",
    );
    let mut consumer = session(&broker, "flaky");

    let message = broker.send("orders", b"body".to_vec()).unwrap();
    for _ in 0..3 {
        consumer.receive("orders", 1, Duration::ZERO).await.unwrap();
        clock.advance(VISIBILITY);
    }
    broker.queue_stats("orders").unwrap();

    let mut dead_lettered = Vec::new();
    while let Ok(notification) = events.try_recv() {
        if let BrokerEvent::DeadLettered {
            from, to, message_id, ..
        } = notification.event
        {
            dead_lettered.push((from, to, message_id));
        }
    }
    assert_eq!(
        dead_lettered,
        vec![(
            "orders".to_string(),
            "orders-dlq".to_string(),
            message.id.to_string()
        )]
    );
}

#[tokio::test]
async fn test_exhausted_message_not_redelivered_while_dead_letter_queue_full() {
    let (broker, clock) = mock_broker();
    broker
        .create_queue("parked", QueueConfig::default().with_max_depth(1))
        .unwrap();
    broker
        .create_queue("jobs", QueueConfig::default().with_redrive(3, "parked"))
        .unwrap();
    let filler = broker.send("parked", b"filler".to_vec()).unwrap();
    let mut consumer = session(&broker, "flaky");

    broker.send("jobs", b"poison".to_vec()).unwrap();
    for attempt in 0..3 {
        let delivered = consumer.receive("jobs", 1, Duration::ZERO).await.unwrap();
        assert_eq!(delivered.len(), 1, "attempt {}", attempt);
        clock.advance(VISIBILITY);
    }

    // Budget used up and the target has no room
    assert!(consumer
        .receive("jobs", 1, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
    let stats = broker.queue_stats("jobs").unwrap();
    assert_eq!((stats.available, stats.total), (0, 1));

    let parked = consumer.receive("parked", 1, Duration::ZERO).await.unwrap();
    assert_eq!(parked[0].message.id, filler.id);
    consumer
        .acknowledge("parked", filler.id, parked[0].lease_id())
        .unwrap();

    assert!(consumer
        .receive("jobs", 1, Duration::ZERO)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(broker.queue_stats("jobs").unwrap().total, 0);
    let dead = consumer.receive("parked", 1, Duration::ZERO).await.unwrap();
    assert_eq!(dead[0].message.body, b"poison");
}
