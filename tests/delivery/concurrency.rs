//! Competing consumers

use crate::common::{mock_broker, order_topology, session};
use fanout::queue::QueueError;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_racing_claims_have_exactly_one_winner() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    let message = broker.send("orders", b"contested".to_vec()).unwrap();
    let store = broker.queue("orders").unwrap();

    let barrier = Arc::new(Barrier::new(16));
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store.mark_in_flight(message.id, Duration::from_secs(30))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, QueueError::AlreadyInFlight { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_competing_sessions_never_share_a_message() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);
    for i in 0..100 {
        broker.send("orders", format!("job-{}", i).into_bytes()).unwrap();
    }

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let mut consumer = session(&broker, &format!("worker-{}", n));
            tokio::spawn(async move {
                let mut seen = Vec::new();
                loop {
                    let batch = consumer.receive("orders", 5, Duration::ZERO).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    for delivery in batch {
                        consumer
                            .acknowledge("orders", delivery.message.id, delivery.lease_id())
                            .unwrap();
                        seen.push(delivery.message.id);
                    }
                }
                seen
            })
        })
        .collect();

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.unwrap());
    }
    let distinct: HashSet<_> = all.iter().collect();
    assert_eq!(all.len(), 100);
    assert_eq!(distinct.len(), 100);
    assert_eq!(broker.queue_stats("orders").unwrap().total, 0);
}

#[test]
fn test_concurrent_publishers() {
    let (broker, _clock) = mock_broker();
    order_topology(&broker);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let broker = Arc::clone(&broker);
            thread::spawn(move || {
                for _ in 0..25 {
                    broker.publish("order-events", b"event").unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(broker.queue_stats("orders").unwrap().total, 200);
    assert_eq!(broker.queue_stats("audit").unwrap().total, 200);
}
