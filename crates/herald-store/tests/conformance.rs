//! Behavior every store backend must share.
//!
//! Each check runs once against `MemoryStore` and once against a
//! file-backed `SqliteStore`.

use herald_store::{
    Collection, Document, Filter, FindOptions, MemoryStore, Message, Record, SharedStore, Sort,
    SqliteStore, StoreError, Update,
};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn message(id: &str, publisher: &str, created_at: i64, ttl_at: i64) -> Document {
    Message {
        id: id.to_string(),
        publisher_id: publisher.to_string(),
        payload: format!("payload-{id}"),
        created_at,
        ttl_at,
        received_by: Vec::new(),
    }
    .to_document()
    .unwrap()
}

/// Run `check` against both backends.
async fn on_each_backend<F, Fut>(check: F)
where
    F: Fn(SharedStore) -> Fut,
    Fut: Future<Output = ()>,
{
    check(Arc::new(MemoryStore::new())).await;

    let dir = tempfile::tempdir().unwrap();
    let sqlite = SqliteStore::open(&dir.path().join("store.db")).await.unwrap();
    check(Arc::new(sqlite)).await;
}

fn ids(docs: &[Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d["_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn duplicate_ids_are_rejected() {
    on_each_backend(|store| async move {
        store
            .insert_one(Collection::Clients, doc(json!({"_id": "c1", "name": "alice"})))
            .await
            .unwrap();

        let err = store
            .insert_one(Collection::Clients, doc(json!({"_id": "c1", "name": "bob"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate { .. }));

        // Same id in a different collection is fine.
        store
            .insert_one(Collection::Publishers, doc(json!({"_id": "c1", "name": "p"})))
            .await
            .unwrap();
    })
    .await;
}

#[tokio::test]
async fn documents_without_id_are_rejected() {
    on_each_backend(|store| async move {
        let err = store
            .insert_one(Collection::Clients, doc(json!({"name": "alice"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument(_)));
    })
    .await;
}

#[tokio::test]
async fn find_sorts_then_limits_with_stable_ties() {
    on_each_backend(|store| async move {
        for (id, created) in [("m3", 30), ("m1", 10), ("m2a", 20), ("m2b", 20), ("m4", 40)] {
            store
                .insert_one(Collection::PublisherMessages, message(id, "p1", created, 0))
                .await
                .unwrap();
        }

        let docs = store
            .find_many(
                Collection::PublisherMessages,
                &Filter::eq(Message::PUBLISHER_ID, "p1"),
                FindOptions::new()
                    .sort(Sort::ascending(Message::CREATED_AT))
                    .limit(4),
            )
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["m1", "m2a", "m2b", "m3"]);

        let docs = store
            .find_many(
                Collection::PublisherMessages,
                &Filter::All,
                FindOptions::new().sort(Sort::descending(Message::CREATED_AT)).limit(2),
            )
            .await
            .unwrap();
        assert_eq!(ids(&docs), vec!["m4", "m3"]);
    })
    .await;
}

#[tokio::test]
async fn projection_keeps_only_requested_fields() {
    on_each_backend(|store| async move {
        store
            .insert_one(Collection::PublisherMessages, message("m1", "p1", 1, 0))
            .await
            .unwrap();

        let found = store
            .find_one(
                Collection::PublisherMessages,
                &Filter::All,
                FindOptions::new().projection(&[Message::PAYLOAD]),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["payload"], "payload-m1");
    })
    .await;
}

#[tokio::test]
async fn not_contains_excludes_received_messages() {
    on_each_backend(|store| async move {
        for id in ["m1", "m2", "m3"] {
            store
                .insert_one(Collection::PublisherMessages, message(id, "p1", 1, 0))
                .await
                .unwrap();
        }

        let outcome = store
            .update_many(
                Collection::PublisherMessages,
                &Filter::is_in("_id", ["m1", "m3"]),
                &Update::add_to_set(Message::RECEIVED_BY, "client-1"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched, 2);
        assert_eq!(outcome.modified, 2);

        let pending = store
            .find_many(
                Collection::PublisherMessages,
                &Filter::not_contains(Message::RECEIVED_BY, "client-1"),
                FindOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(ids(&pending), vec!["m2"]);

        // Membership is exact: a different client with a shared prefix sees everything.
        let other = store
            .count(
                Collection::PublisherMessages,
                &Filter::not_contains(Message::RECEIVED_BY, "client-"),
            )
            .await
            .unwrap();
        assert_eq!(other, 3);
    })
    .await;
}

#[tokio::test]
async fn add_to_set_reports_only_real_modifications() {
    on_each_backend(|store| async move {
        store
            .insert_one(Collection::PublisherMessages, message("m1", "p1", 1, 0))
            .await
            .unwrap();
        let update = Update::add_to_set(Message::RECEIVED_BY, "c1");
        let filter = Filter::eq("_id", "m1");

        let first = store
            .update_many(Collection::PublisherMessages, &filter, &update)
            .await
            .unwrap();
        let second = store
            .update_many(Collection::PublisherMessages, &filter, &update)
            .await
            .unwrap();
        assert_eq!((first.matched, first.modified), (1, 1));
        assert_eq!((second.matched, second.modified), (1, 0));

        let stored = store
            .find_one(Collection::PublisherMessages, &filter, FindOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(Message::from_document(stored).unwrap().received_by, vec!["c1"]);
    })
    .await;
}

#[tokio::test]
async fn expiry_filter_deletes_only_expired() {
    on_each_backend(|store| async move {
        store
            .insert_one(Collection::PublisherMessages, message("forever", "p1", 1, 0))
            .await
            .unwrap();
        store
            .insert_one(Collection::PublisherMessages, message("old", "p1", 1, 100))
            .await
            .unwrap();
        store
            .insert_one(Collection::PublisherMessages, message("fresh", "p1", 1, 500))
            .await
            .unwrap();

        let expired = Filter::and([
            Filter::ne(Message::TTL_AT, 0),
            Filter::lt(Message::TTL_AT, 200),
        ]);
        let deleted = store
            .delete_many(Collection::PublisherMessages, &expired)
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let remaining = store
            .find_many(Collection::PublisherMessages, &Filter::All, FindOptions::new())
            .await
            .unwrap();
        assert_eq!(ids(&remaining), vec!["forever", "fresh"]);
    })
    .await;
}

#[tokio::test]
async fn or_and_in_compose() {
    on_each_backend(|store| async move {
        store
            .insert_one(Collection::PublisherMessages, message("a", "p1", 1, 0))
            .await
            .unwrap();
        store
            .insert_one(Collection::PublisherMessages, message("b", "p2", 1, 1000))
            .await
            .unwrap();
        store
            .insert_one(Collection::PublisherMessages, message("c", "p2", 1, 10))
            .await
            .unwrap();

        let live = Filter::or([Filter::eq(Message::TTL_AT, 0), Filter::gte(Message::TTL_AT, 500)]);
        let count = store
            .count(
                Collection::PublisherMessages,
                &Filter::and([live, Filter::is_in(Message::PUBLISHER_ID, ["p1", "p2"])]),
            )
            .await
            .unwrap();
        assert_eq!(count, 2);

        let none = store
            .count(Collection::PublisherMessages, &Filter::In("_id", vec![]))
            .await
            .unwrap();
        assert_eq!(none, 0);
    })
    .await;
}

#[tokio::test]
async fn empty_collections_behave() {
    on_each_backend(|store| async move {
        let found = store
            .find_one(Collection::Subscriptions, &Filter::All, FindOptions::new())
            .await
            .unwrap();
        assert!(found.is_none());

        let outcome = store
            .update_many(
                Collection::Subscriptions,
                &Filter::All,
                &Update::add_to_set("tags", "x"),
            )
            .await
            .unwrap();
        assert_eq!(outcome.matched, 0);
        assert_eq!(
            store
                .delete_many(Collection::Subscriptions, &Filter::All)
                .await
                .unwrap(),
            0
        );
    })
    .await;
}
