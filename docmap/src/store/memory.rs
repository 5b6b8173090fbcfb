//! In-memory document store for tests and ephemeral use.
//!
//! [`MemoryStore`] keeps every collection in a `Vec` behind a `RwLock` and
//! records each call in an operation log, so tests can assert exactly which
//! ids a finder asked for.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
};

use super::{Query, Store};
use crate::{
    errors::Result,
    id::{ensure_id, id_from_attributes},
    sync,
    value::Attributes,
};

/// One call made against a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOperation {
    FindOne { collection: String, id: String },
    FindIds { collection: String, ids: Vec<String> },
    Find { collection: String, query: Query },
    Count { collection: String, query: Query },
    Insert { collection: String, id: String },
    Update { collection: String, id: String },
    Remove { collection: String, query: Query },
}

impl StoreOperation {
    pub fn collection(&self) -> &str {
        match self {
            StoreOperation::FindOne { collection, .. }
            | StoreOperation::FindIds { collection, .. }
            | StoreOperation::Find { collection, .. }
            | StoreOperation::Count { collection, .. }
            | StoreOperation::Insert { collection, .. }
            | StoreOperation::Update { collection, .. }
            | StoreOperation::Remove { collection, .. } => collection,
        }
    }

    /// Whether the operation reads documents.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            StoreOperation::FindOne { .. } | StoreOperation::FindIds { .. } | StoreOperation::Find { .. }
        )
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Attributes>>>,
    operations: Mutex<Vec<StoreOperation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every operation recorded since creation or the last [`clear_operations`](Self::clear_operations).
    pub fn operations(&self) -> Vec<StoreOperation> {
        sync::lock(&self.operations).clone()
    }

    pub fn clear_operations(&self) {
        sync::lock(&self.operations).clear();
    }

    /// Read operations against `collection` only.
    pub fn reads_of(&self, collection: &str) -> Vec<StoreOperation> {
        self.operations()
            .into_iter()
            .filter(|op| op.is_read() && op.collection() == collection)
            .collect()
    }

    /// Raw stored copy of a document, bypassing the operation log.
    pub fn raw(&self, collection: &str, id: &str) -> Option<Attributes> {
        sync::read(&self.collections)
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| has_id(doc, id)).cloned())
    }

    /// Number of stored documents, bypassing the operation log.
    pub fn len(&self, collection: &str) -> usize {
        sync::read(&self.collections).get(collection).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    fn record(&self, operation: StoreOperation) {
        sync::lock(&self.operations).push(operation);
    }
}

fn has_id(document: &Attributes, id: &str) -> bool {
    id_from_attributes(document).as_deref() == Some(id)
}

impl Store for MemoryStore {
    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Attributes>> {
        self.record(StoreOperation::FindOne {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(sync::read(&self.collections)
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| has_id(doc, id)).cloned()))
    }

    fn find_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Attributes>> {
        self.record(StoreOperation::FindIds {
            collection: collection.to_string(),
            ids: ids.to_vec(),
        });
        let collections = sync::read(&self.collections);
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| docs.iter().find(|doc| has_id(doc, id)).cloned())
            .collect())
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Attributes>> {
        self.record(StoreOperation::Find {
            collection: collection.to_string(),
            query: query.clone(),
        });
        Ok(sync::read(&self.collections)
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| query.matches(doc)).cloned().collect())
            .unwrap_or_default())
    }

    fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        self.record(StoreOperation::Count {
            collection: collection.to_string(),
            query: query.clone(),
        });
        Ok(sync::read(&self.collections)
            .get(collection)
            .map_or(0, |docs| docs.iter().filter(|doc| query.matches(doc)).count() as u64))
    }

    fn insert(&self, collection: &str, mut document: Attributes) -> Result<String> {
        let id = ensure_id(&mut document);
        self.record(StoreOperation::Insert {
            collection: collection.to_string(),
            id: id.clone(),
        });
        let mut collections = sync::write(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|doc| has_id(doc, &id)) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
        Ok(id)
    }

    fn update(&self, collection: &str, document: Attributes) -> Result<()> {
        let id = id_from_attributes(&document).unwrap_or_default();
        self.record(StoreOperation::Update {
            collection: collection.to_string(),
            id: id.clone(),
        });
        let mut collections = sync::write(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|doc| has_id(doc, &id)) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
        Ok(())
    }

    fn remove(&self, collection: &str, query: &Query) -> Result<u64> {
        self.record(StoreOperation::Remove {
            collection: collection.to_string(),
            query: query.clone(),
        });
        let mut collections = sync::write(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|doc| !query.matches(doc));
        Ok((before - docs.len()) as u64)
    }
}
