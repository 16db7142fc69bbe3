//! In-process store backend.

use crate::document::{compare_values, project, Collection, Document};
use crate::error::{StoreError, StoreResult};
use crate::filter::{Filter, FindOptions, SortOrder, Update, UpdateOutcome};
use crate::{require_id, Store};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store backed by in-memory vectors, one per collection.
///
/// Documents keep insertion order, which is also the tie-break order for
/// sorted queries.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_many(
        &self,
        collection: Collection,
        filter: &Filter,
        options: FindOptions,
    ) -> StoreResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Document> = docs.iter().filter(|d| filter.matches(d)).collect();

        if let Some(sort) = options.sort {
            // sort_by is stable, so ties stay in insertion order
            matched.sort_by(|a, b| {
                let ordering = compare_values(a.get(sort.field), b.get(sort.field));
                match sort.order {
                    SortOrder::Ascending => ordering,
                    SortOrder::Descending => ordering.reverse(),
                }
            });
        }

        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|doc| match &options.projection {
                Some(fields) => project(doc.clone(), fields),
                None => doc.clone(),
            })
            .collect())
    }

    async fn count(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> StoreResult<()> {
        let id = require_id(&doc)?;
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();

        if docs
            .iter()
            .any(|existing| crate::document_id(existing) == Some(id.as_str()))
        {
            return Err(StoreError::Duplicate {
                collection: collection.name(),
                id,
            });
        }

        docs.push(doc);
        Ok(())
    }

    async fn update_many(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> StoreResult<UpdateOutcome> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(UpdateOutcome::default());
        };

        // All-or-nothing: a failing document leaves the collection untouched.
        let mut staged = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if filter.matches(doc) {
                let mut copy = doc.clone();
                let changed = update.apply(&mut copy)?;
                staged.push((index, copy, changed));
            }
        }

        let mut outcome = UpdateOutcome {
            matched: staged.len() as u64,
            modified: 0,
        };
        for (index, copy, changed) in staged {
            if changed {
                docs[index] = copy;
                outcome.modified += 1;
            }
        }
        Ok(outcome)
    }

    async fn delete_many(&self, collection: Collection, filter: &Filter) -> StoreResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(&collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !filter.matches(doc));
        Ok((before - docs.len()) as u64)
    }
}
