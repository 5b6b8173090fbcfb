//! Documents and their shared handles.
//!
//! A [`DocumentRef`] is the single in-memory instance of a document: the
//! identity map hands out clones of the same `Arc`, and owners hold their
//! associated documents through it. Embedded documents point back at their
//! parent and root through [`WeakDocument`] handles, so the graph never forms
//! an owning cycle.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak},
};

use log::{debug, trace};
use serde_json::Value;

use crate::{
    class::DocumentClass,
    errors::{MapperError, Result},
    id::{ID_KEY, id_from_attributes, id_string},
    nested,
    proxy::{AssociationHandle, Proxy},
    registry::normalize_name,
    store::Query,
    sync,
    types::AssociationDescriptor,
    value::Attributes,
};

/// Save or destroy of another document, run once the owner's lock is
/// released.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeferredWrite {
    Save(DocumentRef),
    Destroy(DocumentRef),
}

pub struct Document {
    class: Arc<DocumentClass>,
    pub(crate) attributes: Attributes,
    pub(crate) new_record: bool,
    pub(crate) destroyed: bool,
    /// Changed through an owner's nested attributes; saved with that owner.
    pub(crate) pending_save: bool,
    /// Writes to other documents queued while this one is locked.
    pub(crate) deferred: Vec<DeferredWrite>,
    /// Association proxies, materialized on first access.
    pub(crate) proxies: HashMap<String, Proxy>,
    pub(crate) self_ref: WeakDocument,
    pub(crate) root: Option<WeakDocument>,
    pub(crate) parent: Option<WeakDocument>,
}

impl Document {
    pub fn class(&self) -> &Arc<DocumentClass> {
        &self.class
    }

    pub fn id(&self) -> String {
        id_from_attributes(&self.attributes).unwrap_or_default()
    }

    /// Root that documents embedded into this one must point at.
    pub(crate) fn root_for_children(&self) -> WeakDocument {
        self.root.clone().unwrap_or_else(|| self.self_ref.clone())
    }

    /// Runs `f` against the proxy for `name`, creating it on first use.
    ///
    /// The proxy is taken out of the cache for the duration of the call so
    /// `f` can borrow both the proxy and its owner mutably.
    pub(crate) fn with_proxy<R>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut Proxy, &mut Document) -> Result<R>,
    ) -> Result<R> {
        let descriptor = self.class.association(name)?;
        let mut proxy = self
            .proxies
            .remove(&descriptor.name)
            .unwrap_or_else(|| Proxy::new(Arc::clone(&descriptor)));
        let result = f(&mut proxy, self);
        self.proxies.insert(descriptor.name.clone(), proxy);
        result
    }

    /// Mass assignment.
    ///
    /// `id`/`_id` set the document id, `<name>_attributes` keys go through the
    /// nested attributes assigner when the class accepts them, embedded
    /// association names go through the association writer, and every other
    /// key is stored as a plain attribute.
    pub(crate) fn assign(&mut self, attributes: Attributes) -> Result<()> {
        let (ids, rest): (Vec<_>, Vec<_>) = attributes
            .into_iter()
            .partition(|(key, _)| key == ID_KEY || key == "id");
        for (_, value) in ids {
            if let Some(id) = id_string(&value) {
                self.attributes.insert(ID_KEY.to_string(), Value::String(id));
            }
        }

        for (key, value) in rest {
            if let Some(name) = key.strip_suffix("_attributes")
                && self.class.accepts_nested_attributes(name)
            {
                nested::assign(self, name, value)?;
                continue;
            }
            if let Some(descriptor) = self.class.find_association(&key) {
                self.assign_association_value(&descriptor, value)?;
                continue;
            }
            self.attributes.insert(key, value);
        }
        Ok(())
    }

    fn assign_association_value(&mut self, descriptor: &AssociationDescriptor, value: Value) -> Result<()> {
        if !descriptor.embedded {
            return Err(MapperError::invalid_payload(format!(
                "`{}` references stored documents; assign it through its association handle",
                descriptor.name
            )));
        }
        self.with_proxy(&descriptor.name, |proxy, owner| proxy.replace_from_value(owner, value))
    }

    /// Storage representation: plain attributes plus every materialized
    /// embedded association, serialized recursively.
    pub(crate) fn to_storage(&self) -> Result<Attributes> {
        let mut out = self.attributes.clone();
        for proxy in self.proxies.values() {
            proxy.write_embedded(&mut out)?;
        }
        Ok(out)
    }

    /// Clears the new flag on this document and every materialized embedded
    /// descendant.
    pub(crate) fn mark_persisted(&mut self) {
        self.new_record = false;
        for proxy in self.proxies.values() {
            for child in proxy.embedded_children() {
                child.write().mark_persisted();
            }
        }
    }

    /// Loaded referenced members waiting for this document's save, including
    /// those of embedded descendants.
    pub(crate) fn pending_members(&self) -> Vec<DocumentRef> {
        let mut pending: Vec<DocumentRef> = self
            .proxies
            .values()
            .flat_map(Proxy::referenced_members)
            .filter(|member| !self.self_ref.points_to(member) && member.read().pending_save)
            .collect();
        for proxy in self.proxies.values() {
            for child in proxy.embedded_children() {
                pending.extend(child.read().pending_members());
            }
        }
        pending
    }

    /// Queues a write to `document`; repeated writes to one document run once.
    pub(crate) fn defer(&mut self, write: DeferredWrite) {
        if !self.deferred.contains(&write) {
            self.deferred.push(write);
        }
    }

    /// Moves the writes queued on `other` into this document's queue.
    pub(crate) fn adopt_deferred(&mut self, other: &DocumentRef) {
        let queued = other.write().take_deferred();
        for write in queued {
            self.defer(write);
        }
    }

    /// Drains the writes queued on this document and its embedded descendants.
    pub(crate) fn take_deferred(&mut self) -> Vec<DeferredWrite> {
        let mut deferred = std::mem::take(&mut self.deferred);
        for proxy in self.proxies.values() {
            for child in proxy.embedded_children() {
                deferred.extend(child.write().take_deferred());
            }
        }
        deferred
    }

    /// Points every materialized embedded descendant at `root`.
    pub(crate) fn restamp_descendants(&mut self, root: &WeakDocument) {
        for proxy in self.proxies.values() {
            for child in proxy.embedded_children() {
                let mut child = child.write();
                child.root = Some(root.clone());
                child.restamp_descendants(root);
            }
        }
    }
}

/// Shared handle to the one live instance of a document.
#[derive(Clone)]
pub struct DocumentRef(Arc<RwLock<Document>>);

/// Non-owning handle used for root and parent links.
#[derive(Clone, Default)]
pub struct WeakDocument(Weak<RwLock<Document>>);

impl WeakDocument {
    pub fn upgrade(&self) -> Option<DocumentRef> {
        self.0.upgrade().map(DocumentRef)
    }

    pub(crate) fn points_to(&self, document: &DocumentRef) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&document.0))
    }
}

impl DocumentRef {
    pub(crate) fn new(class: Arc<DocumentClass>, attributes: Attributes, new_record: bool) -> Self {
        DocumentRef(Arc::new_cyclic(|weak| {
            RwLock::new(Document {
                class,
                attributes,
                new_record,
                destroyed: false,
                pending_save: false,
                deferred: Vec::new(),
                proxies: HashMap::new(),
                self_ref: WeakDocument(weak.clone()),
                root: None,
                parent: None,
            })
        }))
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Document> {
        sync::read(&self.0)
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Document> {
        sync::write(&self.0)
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &DocumentRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakDocument {
        WeakDocument(Arc::downgrade(&self.0))
    }

    pub fn id(&self) -> String {
        self.read().id()
    }

    pub fn class(&self) -> Arc<DocumentClass> {
        Arc::clone(self.read().class())
    }

    pub fn class_name(&self) -> String {
        self.read().class().name().to_string()
    }

    pub fn is_new(&self) -> bool {
        self.read().new_record
    }

    pub fn is_destroyed(&self) -> bool {
        self.read().destroyed
    }

    pub fn is_embedded(&self) -> bool {
        self.read().class().is_embeddable()
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.read().attributes.get(field).cloned()
    }

    /// String value of `field`, if it holds a string.
    pub fn get_str(&self, field: &str) -> Option<String> {
        self.get(field).and_then(|value| value.as_str().map(str::to_string))
    }

    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.write().attributes.insert(field.into(), value.into());
    }

    /// Plain attributes, without materialized embedded associations.
    pub fn attributes(&self) -> Attributes {
        self.read().attributes.clone()
    }

    /// Whether the in-memory attributes satisfy `query`.
    pub fn matches(&self, query: &Query) -> bool {
        query.matches(&self.read().attributes)
    }

    pub fn to_storage(&self) -> Result<Attributes> {
        self.read().to_storage()
    }

    pub fn assign_attributes(&self, attributes: impl Into<Value>) -> Result<()> {
        let attributes = crate::class::into_attributes(attributes.into())?;
        self.locked(|doc| doc.assign(attributes))
    }

    /// Runs `f` under the write lock, then performs the writes it queued on
    /// other documents. Those run even when `f` failed part-way.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&mut Document) -> Result<R>) -> Result<R> {
        let result = f(&mut self.write());
        let flushed = self.flush_deferred();
        let value = result?;
        flushed?;
        Ok(value)
    }

    pub(crate) fn flush_deferred(&self) -> Result<()> {
        let deferred = self.write().take_deferred();
        for write in deferred {
            match write {
                DeferredWrite::Save(document) => {
                    document.save()?;
                }
                DeferredWrite::Destroy(document) => document.destroy()?,
            }
        }
        Ok(())
    }

    /// Assigns `attributes` and saves.
    pub fn update_attributes(&self, attributes: impl Into<Value>) -> Result<bool> {
        self.assign_attributes(attributes)?;
        self.save()
    }

    pub fn update_attributes_strict(&self, attributes: impl Into<Value>) -> Result<()> {
        self.assign_attributes(attributes)?;
        self.save_strict()
    }

    /// Persists the document.
    ///
    /// Embedded documents delegate to their root and report `false` when
    /// they have none; their new flag only flips when the root saved.
    pub fn save(&self) -> Result<bool> {
        let class = self.class();
        if class.is_embeddable() {
            return self.save_through_root();
        }

        let (document, was_new, id, destroyed) = {
            let doc = self.read();
            (doc.to_storage()?, doc.new_record, doc.id(), doc.destroyed)
        };
        if destroyed {
            return Ok(false);
        }

        let store = class.store();
        if was_new {
            store.insert(class.collection(), document)?;
        } else {
            store.update(class.collection(), document)?;
        }
        let pending = {
            let mut doc = self.write();
            doc.mark_persisted();
            doc.pending_save = false;
            doc.pending_members()
        };

        if class.identity_map_enabled() {
            class.identity_map().put(class.name(), &id, self);
        }
        debug!("saved {} (new: {was_new})", class.identity_map_key(&id));

        for member in pending {
            member.write().pending_save = false;
            member.save()?;
        }
        Ok(true)
    }

    fn save_through_root(&self) -> Result<bool> {
        let root = self.read().root.as_ref().and_then(WeakDocument::upgrade);
        let Some(root) = root else {
            trace!("{} has no root document, not saving", self.identity_map_key());
            return Ok(false);
        };
        let saved = root.save()?;
        if saved {
            self.write().new_record = false;
        }
        Ok(saved)
    }

    /// Like [`save`](Self::save), but a document that could not be saved is an error.
    pub fn save_strict(&self) -> Result<()> {
        if self.save()? {
            Ok(())
        } else {
            Err(MapperError::NotPersisted {
                class: self.class_name(),
                id: self.id(),
            })
        }
    }

    /// Removes the document from storage and from its identity map, then
    /// runs the class's after-destroy hooks (including `dependent` cascades).
    pub fn destroy(&self) -> Result<()> {
        let class = self.class();
        if class.is_embeddable() {
            return Err(MapperError::invalid_operation(format!(
                "embedded {} documents are removed through their owner",
                class.name()
            )));
        }
        let id = self.id();
        class.store().remove(class.collection(), &Query::by_id(&id))?;
        class.identity_map().remove(class.name(), &id);
        self.write().destroyed = true;
        debug!("destroyed {}", class.identity_map_key(&id));
        class.run_after_destroy(self)
    }

    /// Re-reads the document from storage into this same instance and drops
    /// every cached association proxy.
    pub fn reload(&self) -> Result<()> {
        let class = self.class();
        if class.is_embeddable() {
            return Err(MapperError::invalid_operation(format!(
                "embedded {} documents are reloaded through their root",
                class.name()
            )));
        }
        let id = self.id();
        let raw = class
            .store()
            .find_one(class.collection(), &id)?
            .ok_or_else(|| MapperError::DocumentNotFound {
                class: class.name().to_string(),
                id: id.clone(),
            })?;
        let mut doc = self.write();
        doc.attributes = raw;
        doc.proxies.clear();
        doc.new_record = false;
        Ok(())
    }

    /// Top-level document that persists this embedded document.
    pub fn root_document(&self) -> Option<DocumentRef> {
        self.read().root.as_ref().and_then(WeakDocument::upgrade)
    }

    /// Immediate container of this embedded document.
    pub fn parent_document(&self) -> Option<DocumentRef> {
        self.read().parent.as_ref().and_then(WeakDocument::upgrade)
    }

    pub fn identity_map_key(&self) -> String {
        let doc = self.read();
        doc.class().identity_map_key(&doc.id())
    }

    /// Reader, writer and collection operations for association `name`.
    pub fn association(&self, name: &str) -> Result<AssociationHandle<'_>> {
        let descriptor = self.class().association(&normalize_name(name))?;
        Ok(AssociationHandle::new(self, descriptor))
    }

    /// The `<name>_attributes=` writer.
    pub fn assign_nested_attributes(&self, name: &str, payload: Value) -> Result<()> {
        self.locked(|doc| nested::assign(doc, name, payload))
    }
}

impl PartialEq for DocumentRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DocumentRef {}

impl fmt::Debug for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_read() {
            Ok(doc) => write!(f, "DocumentRef({})", doc.class().identity_map_key(&doc.id())),
            Err(_) => f.write_str("DocumentRef(<locked>)"),
        }
    }
}
