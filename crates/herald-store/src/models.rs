//! Typed records stored in the broker's collections.
//!
//! Each record maps losslessly to and from a [`Document`]. Field-name
//! constants are exposed so query code never spells a field twice.

use crate::document::{Collection, Document};
use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversion between a record and its stored document.
pub trait Record: Serialize + DeserializeOwned {
    /// Collection the record lives in.
    const COLLECTION: Collection;

    fn to_document(&self) -> StoreResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(StoreError::InvalidDocument(format!(
                "{} record did not serialize to an object",
                Self::COLLECTION
            ))),
        }
    }

    fn from_document(doc: Document) -> StoreResult<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }
}

/// A registered client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

impl ClientIdentity {
    pub const NAME: &'static str = "name";
}

impl Record for ClientIdentity {
    const COLLECTION: Collection = Collection::Clients;
}

/// A named message source owned by one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publisher {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub owner_id: String,
}

impl Publisher {
    pub const NAME: &'static str = "name";
    pub const OWNER_ID: &'static str = "owner_id";
}

impl Record for Publisher {
    const COLLECTION: Collection = Collection::Publishers;
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub publisher_id: String,
    pub payload: String,
    /// Insertion time, epoch milliseconds.
    pub created_at: i64,
    /// Absolute expiry, epoch seconds. `0` never expires.
    pub ttl_at: i64,
    /// Clients that confirmed receipt. Only ever grows.
    #[serde(default)]
    pub received_by: Vec<String>,
}

impl Message {
    pub const PUBLISHER_ID: &'static str = "publisher_id";
    pub const PAYLOAD: &'static str = "payload";
    pub const CREATED_AT: &'static str = "created_at";
    pub const TTL_AT: &'static str = "ttl_at";
    pub const RECEIVED_BY: &'static str = "received_by";

    /// Whether the message has expired as of `now` (epoch seconds).
    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl_at != 0 && self.ttl_at < now
    }
}

impl Record for Message {
    const COLLECTION: Collection = Collection::PublisherMessages;
}

/// A client's durable interest in one publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    #[serde(rename = "_id")]
    pub id: String,
    pub publisher_id: String,
    pub client_id: String,
}

impl Subscription {
    pub const PUBLISHER_ID: &'static str = "publisher_id";
    pub const CLIENT_ID: &'static str = "client_id";
}

impl Record for Subscription {
    const COLLECTION: Collection = Collection::Subscriptions;
}
