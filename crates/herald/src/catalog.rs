//! Broker operations on the durable store.
//!
//! Every rule the broker enforces through storage lives here, expressed as
//! query shape: ownership checks, uniqueness, the "not yet received by this
//! client" delivery predicate and the expiry cut-off. Callers never build
//! filters themselves.

use crate::error::{RequestError, RequestResult};
use herald_protocol::PublishMessage;
use herald_store::{
    ClientIdentity, Filter, FindOptions, Message, Publisher, Record, SharedStore, Sort,
    StoreResult, Subscription, Update, ID_FIELD,
};
use tracing::debug;
use uuid::Uuid;

/// Current time in epoch seconds, the unit of `ttl_at`.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current time in epoch milliseconds, the unit of `created_at`.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Messages that have not expired as of `now`.
fn live(now: i64) -> Filter {
    Filter::or([
        Filter::eq(Message::TTL_AT, 0),
        Filter::gte(Message::TTL_AT, now),
    ])
}

/// Typed broker operations over a [`SharedStore`].
#[derive(Clone)]
pub struct Catalog {
    store: SharedStore,
}

impl Catalog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    async fn find_all<R: Record>(&self, filter: Filter, options: FindOptions) -> StoreResult<Vec<R>> {
        self.store
            .find_many(R::COLLECTION, &filter, options)
            .await?
            .into_iter()
            .map(R::from_document)
            .collect()
    }

    async fn find_first<R: Record>(&self, filter: Filter) -> StoreResult<Option<R>> {
        self.store
            .find_one(R::COLLECTION, &filter, FindOptions::new())
            .await?
            .map(R::from_document)
            .transpose()
    }

    async fn insert<R: Record>(&self, record: &R) -> StoreResult<()> {
        self.store
            .insert_one(R::COLLECTION, record.to_document()?)
            .await
    }

    // Clients

    pub async fn find_client(&self, id: &str) -> StoreResult<Option<ClientIdentity>> {
        self.find_first(Filter::eq(ID_FIELD, id)).await
    }

    pub async fn find_client_by_name(&self, name: &str) -> StoreResult<Option<ClientIdentity>> {
        self.find_first(Filter::eq(ClientIdentity::NAME, name)).await
    }

    /// Create a client identity with a fresh id. Names are trimmed and unique.
    pub async fn register_client(&self, name: &str) -> RequestResult<ClientIdentity> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RequestError::Validation("Client name is required".to_string()));
        }
        if self.find_client_by_name(name).await?.is_some() {
            return Err(RequestError::Conflict("Client already exists".to_string()));
        }

        let identity = ClientIdentity {
            id: new_id(),
            name: name.to_string(),
        };
        self.insert(&identity).await?;
        debug!(client_id = %identity.id, name, "client registered");
        Ok(identity)
    }

    // Publishers and messages

    /// Register a publisher owned by `owner_id`. Names are unique per owner.
    pub async fn register_publisher(&self, owner_id: &str, name: &str) -> RequestResult<Publisher> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RequestError::Validation(
                "Publisher name is required".to_string(),
            ));
        }

        let existing = self
            .store
            .count(
                Publisher::COLLECTION,
                &Filter::and([
                    Filter::eq(Publisher::OWNER_ID, owner_id),
                    Filter::eq(Publisher::NAME, name),
                ]),
            )
            .await?;
        if existing > 0 {
            return Err(RequestError::Conflict("publisher exists".to_string()));
        }

        let publisher = Publisher {
            id: new_id(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
        };
        self.insert(&publisher).await?;
        debug!(publisher_id = %publisher.id, owner_id, "publisher registered");
        Ok(publisher)
    }

    pub async fn find_publisher(&self, id: &str) -> StoreResult<Option<Publisher>> {
        self.find_first(Filter::eq(ID_FIELD, id)).await
    }

    pub async fn publishers_owned_by(&self, owner_id: &str) -> StoreResult<Vec<Publisher>> {
        self.find_all(Filter::eq(Publisher::OWNER_ID, owner_id), FindOptions::new())
            .await
    }

    /// Append a message to a publisher the caller owns.
    ///
    /// A positive `ttl` (seconds) sets `ttl_at = now + ttl`; anything else
    /// never expires.
    pub async fn publish(&self, owner_id: &str, request: PublishMessage) -> RequestResult<Message> {
        let owned = self
            .find_first::<Publisher>(Filter::and([
                Filter::eq(ID_FIELD, request.publisher_id.as_str()),
                Filter::eq(Publisher::OWNER_ID, owner_id),
            ]))
            .await?;
        if owned.is_none() {
            return Err(RequestError::NotFound("publisher not found".to_string()));
        }

        let ttl_at = if request.ttl > 0 {
            now_secs().saturating_add(request.ttl)
        } else {
            0
        };
        let message = Message {
            id: new_id(),
            publisher_id: request.publisher_id,
            payload: request.payload,
            created_at: now_millis(),
            ttl_at,
            received_by: Vec::new(),
        };
        self.insert(&message).await?;
        debug!(message_id = %message.id, publisher_id = %message.publisher_id, ttl_at, "message published");
        Ok(message)
    }

    // Subscriptions

    /// Persist a subscription of `client_id` to an existing publisher.
    pub async fn subscribe(&self, client_id: &str, publisher_id: &str) -> RequestResult<Subscription> {
        if self.find_publisher(publisher_id).await?.is_none() {
            return Err(RequestError::NotFound("publisher not found".to_string()));
        }

        let existing = self
            .store
            .count(
                Subscription::COLLECTION,
                &Filter::and([
                    Filter::eq(Subscription::CLIENT_ID, client_id),
                    Filter::eq(Subscription::PUBLISHER_ID, publisher_id),
                ]),
            )
            .await?;
        if existing > 0 {
            return Err(RequestError::Conflict("already subscribed".to_string()));
        }

        let subscription = Subscription {
            id: new_id(),
            publisher_id: publisher_id.to_string(),
            client_id: client_id.to_string(),
        };
        self.insert(&subscription).await?;
        Ok(subscription)
    }

    /// Remove one of the caller's subscriptions.
    pub async fn unsubscribe(&self, client_id: &str, subscription_id: &str) -> RequestResult<Subscription> {
        let subscription = self
            .find_first::<Subscription>(Filter::and([
                Filter::eq(ID_FIELD, subscription_id),
                Filter::eq(Subscription::CLIENT_ID, client_id),
            ]))
            .await?
            .ok_or_else(|| RequestError::NotFound("subscription not found".to_string()))?;

        self.store
            .delete_many(
                Subscription::COLLECTION,
                &Filter::eq(ID_FIELD, subscription.id.as_str()),
            )
            .await?;
        Ok(subscription)
    }

    pub async fn subscriptions_for(&self, client_id: &str) -> StoreResult<Vec<Subscription>> {
        self.find_all(
            Filter::eq(Subscription::CLIENT_ID, client_id),
            FindOptions::new(),
        )
        .await
    }

    // Delivery

    /// Oldest live messages of the subscription's publisher that its client
    /// has not confirmed yet, at most `limit`.
    pub async fn pending_messages(
        &self,
        subscription: &Subscription,
        limit: usize,
        now: i64,
    ) -> StoreResult<Vec<Message>> {
        self.find_all(
            Filter::and([
                Filter::eq(Message::PUBLISHER_ID, subscription.publisher_id.as_str()),
                Filter::not_contains(Message::RECEIVED_BY, subscription.client_id.as_str()),
                live(now),
            ]),
            FindOptions::new()
                .sort(Sort::ascending(Message::CREATED_AT))
                .limit(limit),
        )
        .await
    }

    /// Record that the subscription's client received `message_ids`.
    ///
    /// Only live messages of the subscription's own publisher are touched.
    /// Returns the number of messages newly marked.
    pub async fn mark_received(
        &self,
        subscription: &Subscription,
        message_ids: &[String],
        now: i64,
    ) -> StoreResult<u64> {
        if message_ids.is_empty() {
            return Ok(0);
        }

        let outcome = self
            .store
            .update_many(
                Message::COLLECTION,
                &Filter::and([
                    Filter::is_in(ID_FIELD, message_ids.iter().map(String::as_str)),
                    Filter::eq(Message::PUBLISHER_ID, subscription.publisher_id.as_str()),
                    live(now),
                ]),
                &Update::add_to_set(Message::RECEIVED_BY, subscription.client_id.as_str()),
            )
            .await?;
        Ok(outcome.modified)
    }

    /// Delete every message whose expiry lies before `now`.
    pub async fn purge_expired(&self, now: i64) -> StoreResult<u64> {
        self.store
            .delete_many(
                Message::COLLECTION,
                &Filter::and([
                    Filter::ne(Message::TTL_AT, 0),
                    Filter::lt(Message::TTL_AT, now),
                ]),
            )
            .await
    }
}
