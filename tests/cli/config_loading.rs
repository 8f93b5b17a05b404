//! Configuration files provisioned into a live broker

use super::{config_file, TOPOLOGY};
use fanout::app::cli::FanoutConfig;
use fanout::broker::Broker;
use fanout::queue::QueueError;
use std::time::Duration;

#[tokio::test]
async fn test_declared_topology_is_provisioned() {
    let file = config_file(TOPOLOGY);
    let config = FanoutConfig::load(Some(file.path())).await.unwrap();
    let broker = Broker::new();

    broker.provision(&config.broker).unwrap();

    assert_eq!(
        broker.queue_names().unwrap(),
        vec!["audit", "orders", "orders-dlq"]
    );
    let orders = broker.queue("orders").unwrap().config().unwrap();
    assert_eq!(orders.visibility_timeout, Duration::from_secs(30));
    assert_eq!(orders.redrive_target.as_deref(), Some("orders-dlq"));

    let outcomes = broker.publish("order-events", b"hello").unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_delivered()));
}

#[tokio::test]
async fn test_unknown_redrive_target_is_rejected() {
    let file = config_file(
        r#"
[[queue]]
name = "orders"
max_receive_count = 3
redrive_target = "missing"
"#,
    );
    let config = FanoutConfig::load(Some(file.path())).await.unwrap();

    let result = Broker::new().provision(&config.broker);
    assert!(matches!(
        result,
        Err(QueueError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn test_subscription_to_undeclared_queue_is_rejected() {
    let file = config_file(
        r#"
[[topic]]
name = "events"
subscriptions = ["ghost"]
"#,
    );
    let config = FanoutConfig::load(Some(file.path())).await.unwrap();

    assert!(matches!(
        Broker::new().provision(&config.broker),
        Err(QueueError::InvalidConfiguration { .. })
    ));
}

#[tokio::test]
async fn test_server_settings_follow_file() {
    let file = config_file(TOPOLOGY);
    let config = FanoutConfig::load(Some(file.path())).await.unwrap();

    let settings = config.server_settings();
    assert_eq!(settings.listen_addr, "127.0.0.1:0");
    assert_eq!(settings.max_wait, Duration::from_secs(20));
    assert_eq!(settings.poll_interval, Duration::from_millis(100));
}
