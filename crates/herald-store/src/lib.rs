//! # Herald Store
//!
//! Store gateway for the herald broker.
//!
//! The broker treats durable storage as a capability: a handful of
//! operations (find, count, insert, update-many, delete-many) against named
//! collections of JSON documents. This crate defines that capability as the
//! [`Store`] trait and ships two backends:
//!
//! - [`MemoryStore`]: in-process maps, for tests and ephemeral brokers
//! - [`SqliteStore`]: a single SQLite file driven through a dedicated
//!   executor thread (`tokio-rusqlite`)
//!
//! Both backends evaluate the same typed [`Filter`] language, so the broker
//! enforces its consistency rules (delivery dedup, expiry precedence) purely
//! through query shape.
//!
//! ```ignore
//! let store: SharedStore = Arc::new(SqliteStore::open(&path).await?);
//! let pending = store
//!     .find_many(
//!         Collection::PublisherMessages,
//!         &Filter::eq(Message::PUBLISHER_ID, "p1"),
//!         FindOptions::new().sort(Sort::ascending(Message::CREATED_AT)).limit(10),
//!     )
//!     .await?;
//! ```

mod document;
mod error;
mod filter;
mod memory;
pub mod models;
mod sqlite;

pub use document::{document_id, project, Collection, Document, ID_FIELD};
pub use error::{StoreError, StoreResult};
pub use filter::{Filter, FindOptions, Sort, SortOrder, Update, UpdateOutcome};
pub use memory::MemoryStore;
pub use models::{ClientIdentity, Message, Publisher, Record, Subscription};
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::sync::Arc;

/// Operations the broker issues against durable storage.
///
/// Implementations are concurrent and stateless from the caller's point of
/// view; no operation holds state across calls.
#[async_trait]
pub trait Store: Send + Sync {
    /// Find documents matching `filter`, honoring projection, sort and limit.
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Vec<Document>>;

    /// Find the first matching document.
    async fn find_one(
        &self,
        collection: Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Option<Document>> {
        let mut docs = self
            .find_many(collection, filter, options.limit(1))
            .await?;
        Ok(docs.pop())
    }

    /// Count matching documents.
    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64>;

    /// Insert a document. Fails with [`StoreError::Duplicate`] if `_id` exists.
    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()>;

    /// Apply `update` to every matching document.
    async fn update_many(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete every matching document, returning how many were removed.
    async fn delete_many(&self, collection: Collection, filter: &Filter) -> StoreResult<u64>;
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn Store>;

/// Extract the string `_id` of a document about to be inserted.
pub(crate) fn require_id(doc: &Document) -> StoreResult<String> {
    document_id(doc)
        .map(str::to_string)
        .ok_or_else(|| StoreError::InvalidDocument("document has no string _id".to_string()))
}
