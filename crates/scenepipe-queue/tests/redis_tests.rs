//! Redis Streams integration tests.
//!
//! These need a running Redis (BROKER_HOST / BROKER_PORT, default
//! localhost:6379):
//!   cargo test -p scenepipe-queue --test redis_tests -- --ignored

use std::time::Duration;

use scenepipe_models::JobId;
use scenepipe_queue::{connect_with_deadline, Broker, BrokerConfig, RedisConnector};

fn test_config(group: &str) -> BrokerConfig {
    dotenvy::dotenv().ok();
    BrokerConfig {
        consumer_group: group.to_string(),
        claim_min_idle: Duration::from_millis(200),
        ..BrokerConfig::from_env()
    }
}

fn unique_queue(prefix: &str) -> String {
    format!("{}-{}", prefix, JobId::new())
}

/// Test connection and queue declaration.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let config = test_config("it-connect");
    let connector = RedisConnector::new(config).expect("Failed to create connector");
    let queue = unique_queue("it-connect");

    let mut broker = connect_with_deadline(&connector, &[queue.as_str()], Duration::from_secs(5))
        .await
        .expect("Failed to connect");

    // Declaring twice is fine
    broker.declare_queue(&queue).await.expect("Failed to redeclare");
    broker.close().await.expect("Failed to close");
}

/// Test publish, receive and acknowledge.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_publish_receive_ack() {
    let config = test_config("it-ack");
    let connector = RedisConnector::new(config).expect("Failed to create connector");
    let queue = unique_queue("it-ack");

    let mut broker = connect_with_deadline(&connector, &[queue.as_str()], Duration::from_secs(5))
        .await
        .expect("Failed to connect");

    let tag = broker.publish(&queue, "{\"hello\":1}").await.expect("Failed to publish");

    let delivery = broker
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No message");
    assert_eq!(delivery.tag, tag);
    assert_eq!(delivery.delivery_count, 1);

    broker.ack(&delivery).await.expect("Failed to ack");

    let next = broker
        .receive(&queue, Duration::from_millis(100))
        .await
        .expect("Failed to receive");
    assert!(next.is_none());
}

/// Test that an unacknowledged message is reclaimed by another consumer.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_unacked_message_is_redelivered() {
    let config = test_config("it-redeliver");
    let connector = RedisConnector::new(config).expect("Failed to create connector");
    let queue = unique_queue("it-redeliver");

    let mut first = connect_with_deadline(&connector, &[queue.as_str()], Duration::from_secs(5))
        .await
        .expect("Failed to connect");
    first.publish(&queue, "payload").await.expect("Failed to publish");

    let taken = first
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No message");
    drop(first);

    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut second = connect_with_deadline(&connector, &[queue.as_str()], Duration::from_secs(5))
        .await
        .expect("Failed to connect");
    let redelivered = second
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No redelivery");

    assert_eq!(redelivered.tag, taken.tag);
    assert_eq!(redelivered.delivery_count, 2);
    second.ack(&redelivered).await.expect("Failed to ack");
}

/// Test dead-lettering moves the message aside and acknowledges it.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_dead_letter() {
    let config = test_config("it-dlq");
    let connector = RedisConnector::new(config).expect("Failed to create connector");
    let queue = unique_queue("it-dlq");
    let dlq = scenepipe_queue::queues::dead_letter(&queue);

    let mut broker = connect_with_deadline(
        &connector,
        &[queue.as_str(), dlq.as_str()],
        Duration::from_secs(5),
    )
    .await
    .expect("Failed to connect");

    broker.publish(&queue, "not json").await.expect("Failed to publish");
    let delivery = broker
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No message");

    broker
        .dead_letter(&delivery, "Test error")
        .await
        .expect("Failed to dead-letter");

    let parked = broker
        .receive(&dlq, Duration::from_secs(1))
        .await
        .expect("Failed to receive from DLQ")
        .expect("DLQ empty");
    assert_eq!(parked.payload, "not json");
    broker.ack(&parked).await.expect("Failed to ack");
}

/// Test that a message left unacknowledged comes back to the same consumer
/// before newer messages.
#[tokio::test]
#[ignore = "requires Redis"]
async fn test_own_unacked_message_comes_back_first() {
    let config = test_config("it-own-pending");
    let connector = RedisConnector::new(config).expect("Failed to create connector");
    let queue = unique_queue("it-own-pending");

    let mut broker = connect_with_deadline(&connector, &[queue.as_str()], Duration::from_secs(5))
        .await
        .expect("Failed to connect");
    let failed_tag = broker.publish(&queue, "first").await.expect("Failed to publish");

    let failed = broker
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No message");
    assert_eq!(failed.tag, failed_tag);

    // Not acked; a newer message arrives meanwhile.
    broker.publish(&queue, "second").await.expect("Failed to publish");

    let again = broker
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No redelivery");
    assert_eq!(again.tag, failed_tag);
    assert_eq!(again.payload, "first");
    assert_eq!(again.delivery_count, 2);
    broker.ack(&again).await.expect("Failed to ack");

    let next = broker
        .receive(&queue, Duration::from_secs(1))
        .await
        .expect("Failed to receive")
        .expect("No message");
    assert_eq!(next.payload, "second");
    assert_eq!(next.delivery_count, 1);
    broker.ack(&next).await.expect("Failed to ack");
}
