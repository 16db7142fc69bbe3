//! Time-to-live cut-off and the expiry sweeper.

use super::harness::{TestBroker, RECV_TIMEOUT};
use crate::catalog::{now_millis, now_secs, Catalog};
use crate::sweeper::ExpirySweeper;
use herald_store::{Collection, Filter, Message, Record};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn insert_message(catalog: &Catalog, id: &str, publisher_id: &str, ttl_at: i64, received_by: &[&str]) {
    let message = Message {
        id: id.to_string(),
        publisher_id: publisher_id.to_string(),
        payload: format!("payload of {id}"),
        created_at: now_millis(),
        ttl_at,
        received_by: received_by.iter().map(|s| s.to_string()).collect(),
    };
    catalog
        .store()
        .insert_one(Collection::PublisherMessages, message.to_document().unwrap())
        .await
        .unwrap();
}

async fn message_count(catalog: &Catalog) -> u64 {
    catalog
        .store()
        .count(Collection::PublisherMessages, &Filter::All)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_publish_sets_absolute_expiry() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;

    let before = now_secs();
    let published = client.publish(&publisher.id, "short lived", 60).await;
    assert!(published.ttl_at >= before + 60);
    assert!(published.ttl_at <= now_secs() + 60);

    let forever = client.publish(&publisher.id, "forever", 0).await;
    assert_eq!(forever.ttl_at, 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_expired_messages_are_not_delivered() {
    let mut broker = TestBroker::new();

    let mut client = broker.connect();
    client.register("alice").await;
    let publisher = client.create_publisher("news").await;
    insert_message(broker.catalog(), "stale", &publisher.id, now_secs() - 10, &[]).await;
    let fresh = client.publish(&publisher.id, "fresh", 60).await;

    let subscription = client.subscribe(&publisher.id).await;
    let items = client.recv_items(1).await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, fresh.id);

    assert_eq!(
        client
            .confirm(&[("stale", subscription.id.as_str())])
            .await,
        0
    );

    broker.stop().await;
}

#[tokio::test]
async fn test_sweep_removes_expired_messages_even_when_received() {
    let broker = TestBroker::new();
    let catalog = broker.catalog().clone();
    let now = now_secs();

    insert_message(&catalog, "expired", "p1", now - 5, &[]).await;
    insert_message(&catalog, "expired-and-read", "p1", now - 5, &["c1"]).await;
    insert_message(&catalog, "later", "p1", now + 3600, &[]).await;
    insert_message(&catalog, "forever", "p1", 0, &["c1"]).await;

    let sweeper = ExpirySweeper::new(catalog.clone(), Duration::from_secs(60));
    assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
    assert_eq!(message_count(&catalog).await, 2);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);

    broker.stop().await;
}

#[tokio::test]
async fn test_running_sweeper_purges_periodically() {
    let broker = TestBroker::new();
    let catalog = broker.catalog().clone();

    let cancel = CancellationToken::new();
    let sweeper = tokio::spawn(
        ExpirySweeper::new(catalog.clone(), Duration::from_millis(20)).run(cancel.clone()),
    );

    insert_message(&catalog, "expired", "p1", now_secs() - 5, &[]).await;
    insert_message(&catalog, "forever", "p1", 0, &[]).await;

    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while message_count(&catalog).await != 1 {
        assert!(tokio::time::Instant::now() < deadline, "sweeper never ran");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), sweeper)
        .await
        .expect("sweeper did not stop")
        .unwrap();

    broker.stop().await;
}
