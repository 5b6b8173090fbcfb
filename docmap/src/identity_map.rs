//! Identity map: at most one live instance per (class, id).
//!
//! A map is shared by `Arc`. Every class holds one; by default all classes of
//! a mapper share the mapper's map and subclasses inherit their parent's, but
//! a class can be pointed at any map (aliasing two classes onto one map, or
//! isolating one). Entries are keyed `"<Class>:<id>"`, so sharing never mixes
//! classes up.
//!
//! Slots hold the instance weakly: the map never keeps a document alive on
//! its own, and a slot whose instance was dropped reads as empty. Nothing is
//! evicted otherwise. Callers own the scope and call [`IdentityMap::clear`]
//! between logical units of work (requests, tests).

use std::{collections::HashMap, fmt, sync::Mutex};

use crate::{
    document::{DocumentRef, WeakDocument},
    keys::identity_key,
    sync,
};

#[derive(Default)]
pub struct IdentityMap {
    entries: Mutex<HashMap<String, WeakDocument>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(class: &str, id: &str) -> String {
        identity_key(class, id)
    }

    pub fn get(&self, class: &str, id: &str) -> Option<DocumentRef> {
        self.get_key(&identity_key(class, id))
    }

    /// Live instance under `key`; a dead slot is dropped on the way.
    pub fn get_key(&self, key: &str) -> Option<DocumentRef> {
        let mut entries = sync::lock(&self.entries);
        let live = entries.get(key).and_then(WeakDocument::upgrade);
        if live.is_none() {
            entries.remove(key);
        }
        live
    }

    /// Inserts or replaces the entry for (class, id).
    pub fn put(&self, class: &str, id: &str, document: &DocumentRef) {
        sync::lock(&self.entries).insert(identity_key(class, id), document.downgrade());
    }

    /// Returns the live instance for (class, id), mapping `document` first
    /// when there is none.
    pub fn get_or_insert(&self, class: &str, id: &str, document: DocumentRef) -> DocumentRef {
        let mut entries = sync::lock(&self.entries);
        let key = identity_key(class, id);
        if let Some(live) = entries.get(&key).and_then(WeakDocument::upgrade) {
            return live;
        }
        entries.insert(key, document.downgrade());
        document
    }

    pub fn remove(&self, class: &str, id: &str) -> Option<DocumentRef> {
        sync::lock(&self.entries)
            .remove(&identity_key(class, id))
            .and_then(|slot| slot.upgrade())
    }

    pub fn contains(&self, class: &str, id: &str) -> bool {
        self.contains_key(&identity_key(class, id))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get_key(key).is_some()
    }

    /// Keys of live entries, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut entries = sync::lock(&self.entries);
        entries.retain(|_, slot| slot.upgrade().is_some());
        let mut keys: Vec<_> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        sync::lock(&self.entries).clear();
    }
}

impl fmt::Debug for IdentityMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMap").field("keys", &self.keys()).finish()
    }
}
