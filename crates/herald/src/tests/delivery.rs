//! Subscribing, publishing and batched delivery.

use super::harness::TestBroker;
use herald_protocol::{ClientRequest, ServerMessage, Subscribe, Unsubscribe};
use std::time::Duration;

/// Publishes within one millisecond share `created_at`; keep them apart.
async fn tick() {
    tokio::time::sleep(Duration::from_millis(3)).await;
}

#[tokio::test]
async fn test_subscriber_receives_published_message() {
    let mut broker = TestBroker::new();

    let mut alice = broker.connect();
    alice.register("alice").await;
    let publisher = alice.create_publisher("news").await;

    let mut bob = broker.connect();
    bob.register("bob").await;
    let subscription = bob.subscribe(&publisher.id).await;
    assert_eq!(subscription.publisher_id, publisher.id);

    let published = alice.publish(&publisher.id, "hello", 0).await;
    assert_eq!(published.publisher_id, publisher.id);
    assert_eq!(published.ttl_at, 0);

    let items = bob.recv_items(1).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, published.id);
    assert_eq!(items[0].publisher_id, publisher.id);
    assert_eq!(items[0].subscription_id, subscription.id);
    assert_eq!(items[0].payload, "hello");

    // The publisher is not subscribed to its own feed.
    alice.expect_silence(Duration::from_millis(150)).await;

    broker.stop().await;
}

#[tokio::test]
async fn test_subscribed_precedes_first_batch() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    client.publish(&publisher.id, "backlog", 0).await;

    client.send(ClientRequest::Subscribe(Subscribe {
        publisher_id: publisher.id.clone(),
    }));
    assert!(matches!(client.recv().await, ServerMessage::Subscribed(_)));
    match client.recv().await {
        ServerMessage::Messages(items) => assert_eq!(items[0].payload, "backlog"),
        other => panic!("expected messages, got {other:?}"),
    }

    broker.stop().await;
}

#[tokio::test]
async fn test_backlog_arrives_oldest_first() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    for payload in ["one", "two", "three"] {
        client.publish(&publisher.id, payload, 0).await;
        tick().await;
    }

    client.subscribe(&publisher.id).await;
    let items = client.recv_items(3).await;
    let payloads: Vec<&str> = items.iter().map(|item| item.payload.as_str()).collect();
    assert_eq!(payloads, ["one", "two", "three"]);

    broker.stop().await;
}

#[tokio::test]
async fn test_batches_respect_the_limit() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    for n in 0..12 {
        client.publish(&publisher.id, &format!("m{n}"), 0).await;
        tick().await;
    }

    let subscription = client.subscribe(&publisher.id).await;
    let first = client.recv_items(1).await;
    assert_eq!(first.len(), 10);

    let pairs: Vec<(&str, &str)> = first
        .iter()
        .map(|item| (item.id.as_str(), subscription.id.as_str()))
        .collect();
    assert_eq!(client.confirm(&pairs).await, 10);

    let rest = client.recv_items(1).await;
    let payloads: Vec<&str> = rest.iter().map(|item| item.payload.as_str()).collect();
    assert_eq!(payloads, ["m10", "m11"]);

    broker.stop().await;
}

#[tokio::test]
async fn test_subscribe_to_unknown_publisher_fails() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    client.send(ClientRequest::Subscribe(Subscribe {
        publisher_id: "missing".into(),
    }));
    assert_eq!(
        client.recv().await,
        ServerMessage::FailedSubscribing("publisher not found".into())
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_second_subscription_to_same_publisher_fails() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    client.subscribe(&publisher.id).await;

    client.send(ClientRequest::Subscribe(Subscribe {
        publisher_id: publisher.id.clone(),
    }));
    assert_eq!(
        client.recv().await,
        ServerMessage::FailedSubscribing("already subscribed".into())
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_cannot_publish_through_someone_elses_publisher() {
    let mut broker = TestBroker::new();

    let mut alice = broker.connect();
    alice.register("alice").await;
    let publisher = alice.create_publisher("news").await;

    let mut mallory = broker.connect();
    mallory.register("mallory").await;
    mallory.send(ClientRequest::PublishMessage(herald_protocol::PublishMessage {
        publisher_id: publisher.id.clone(),
        ttl: 0,
        payload: "forged".into(),
    }));
    assert_eq!(
        mallory.recv().await,
        ServerMessage::FailedPublishingMessage("publisher not found".into())
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_each_subscription_tags_its_own_items() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let news = client.create_publisher("news").await;
    let sport = client.create_publisher("sport").await;
    let news_sub = client.subscribe(&news.id).await;
    let sport_sub = client.subscribe(&sport.id).await;

    client.publish(&news.id, "headline", 0).await;
    client.publish(&sport.id, "score", 0).await;

    let mut items = client.recv_items(2).await;
    items.sort_by(|a, b| a.payload.cmp(&b.payload));
    assert_eq!(items[0].payload, "headline");
    assert_eq!(items[0].subscription_id, news_sub.id);
    assert_eq!(items[1].payload, "score");
    assert_eq!(items[1].subscription_id, sport_sub.id);

    broker.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    let subscription = client.subscribe(&publisher.id).await;

    client.send(ClientRequest::Unsubscribe(Unsubscribe {
        subscription_id: subscription.id.clone(),
    }));
    assert_eq!(client.recv().await, ServerMessage::Unsubscribed(subscription));

    client.publish(&publisher.id, "unheard", 0).await;
    client.expect_silence(Duration::from_millis(200)).await;

    client.send(ClientRequest::GetSubscriptions);
    assert_eq!(client.recv().await, ServerMessage::YourSubscriptions(Vec::new()));

    broker.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_unknown_subscription_fails() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    client.send(ClientRequest::Unsubscribe(Unsubscribe {
        subscription_id: "missing".into(),
    }));
    assert_eq!(
        client.recv().await,
        ServerMessage::FailedUnsubscribing("subscription not found".into())
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_unconfirmed_messages_survive_reconnect() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    let info = client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    let subscription = client.subscribe(&publisher.id).await;
    let published = client.publish(&publisher.id, "keep me", 0).await;

    let items = client.recv_items(1).await;
    assert_eq!(items[0].id, published.id);
    client.disconnect();
    client.expect_closed().await;

    let mut client = broker.connect();
    client.login(&info.id).await;
    let items = client.recv_items(1).await;
    assert_eq!(items[0].id, published.id);
    assert_eq!(client.confirm(&[(published.id.as_str(), subscription.id.as_str())]).await, 1);
    client.disconnect();
    client.expect_closed().await;

    let mut client = broker.connect();
    client.login(&info.id).await;
    client.expect_silence(Duration::from_millis(200)).await;

    broker.stop().await;
}
