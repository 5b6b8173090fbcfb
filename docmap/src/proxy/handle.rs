use std::{fmt, sync::Arc};

use log::{debug, warn};
use serde_json::Value;

use super::{Proxy, ProxyVariant, Target};
use crate::{
    class::into_attributes,
    document::{Document, DocumentRef},
    errors::{CascadeFailure, MapperError, Result},
    nested,
    types::AssociationDescriptor,
};

/// Accessor for one association of one document.
///
/// `get`/`set`/`is_present` are the reader, writer and presence check of
/// singular associations; `all`/`replace`/`push` and friends serve
/// collections. Every call locks the owner for its duration only.
pub struct AssociationHandle<'a> {
    owner: &'a DocumentRef,
    descriptor: Arc<AssociationDescriptor>,
}

impl<'a> AssociationHandle<'a> {
    pub(crate) fn new(owner: &'a DocumentRef, descriptor: Arc<AssociationDescriptor>) -> Self {
        Self { owner, descriptor }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &Arc<AssociationDescriptor> {
        &self.descriptor
    }

    pub fn variant(&self) -> ProxyVariant {
        ProxyVariant::for_descriptor(&self.descriptor)
    }

    pub fn owner(&self) -> &DocumentRef {
        self.owner
    }

    /// Runs `f` on the proxy with the owner locked. Saves and destroys of
    /// other documents happen after the lock is released.
    fn with<R>(&self, f: impl FnOnce(&mut Proxy, &mut Document) -> Result<R>) -> Result<R> {
        self.owner.locked(|owner| owner.with_proxy(&self.descriptor.name, f))
    }

    fn ensure_singular(&self, operation: &str) -> Result<()> {
        if self.descriptor.is_singular() {
            Ok(())
        } else {
            Err(MapperError::invalid_operation(format!(
                "{operation} is only available on singular associations; `{}` is a collection",
                self.descriptor.name
            )))
        }
    }

    pub fn load(&self) -> Result<Target> {
        self.with(|proxy, owner| proxy.load(owner).cloned())
    }

    /// Reader of a singular association.
    pub fn get(&self) -> Result<Option<DocumentRef>> {
        self.ensure_singular("get")?;
        Ok(self.load()?.single())
    }

    /// Members of a collection (or the single target as a one-element list).
    pub fn all(&self) -> Result<Vec<DocumentRef>> {
        Ok(self.load()?.members())
    }

    pub fn first(&self) -> Result<Option<DocumentRef>> {
        Ok(self.all()?.into_iter().next())
    }

    /// Writer of a singular association.
    pub fn set(&self, document: Option<DocumentRef>) -> Result<()> {
        self.ensure_singular("set")?;
        let target = document.map_or(Target::Absent, Target::Single);
        self.with(|proxy, owner| proxy.replace(owner, target))
    }

    /// Writer of a collection.
    pub fn replace(&self, documents: Vec<DocumentRef>) -> Result<()> {
        self.with(|proxy, owner| proxy.replace(owner, Target::Many(documents)))
    }

    /// Presence check of a singular association; loads it when needed.
    pub fn is_present(&self) -> Result<bool> {
        self.ensure_singular("is_present")?;
        Ok(self.load()?.is_present())
    }

    pub fn is_loaded(&self) -> bool {
        self.owner
            .read()
            .proxies
            .get(&self.descriptor.name)
            .is_some_and(Proxy::is_loaded)
    }

    /// Drops the cached target; the next read loads it again.
    pub fn reset(&self) {
        if let Some(proxy) = self.owner.write().proxies.get_mut(&self.descriptor.name) {
            proxy.reset();
        }
    }

    pub fn push(&self, document: &DocumentRef) -> Result<()> {
        self.with(|proxy, owner| proxy.push(owner, document))
    }

    pub fn concat(&self, documents: &[DocumentRef]) -> Result<()> {
        self.with(|proxy, owner| documents.iter().try_for_each(|document| proxy.push(owner, document)))
    }

    /// Builds a member, links it to the owner and appends it without saving.
    pub fn build(&self, attributes: impl Into<Value>) -> Result<DocumentRef> {
        let attributes = into_attributes(attributes.into())?;
        self.with(|proxy, owner| proxy.build(owner, attributes))
    }

    /// Builds a member and saves it (through the root when embedded).
    pub fn create(&self, attributes: impl Into<Value>) -> Result<DocumentRef> {
        let document = self.build(attributes)?;
        if self.variant().is_embedded() {
            self.owner.save()?;
        } else {
            document.save()?;
        }
        Ok(document)
    }

    pub fn find(&self, id: &str) -> Result<Option<DocumentRef>> {
        self.with(|proxy, owner| proxy.find(owner, id))
    }

    pub fn count(&self) -> Result<u64> {
        self.with(|proxy, owner| proxy.count(owner))
    }

    /// Removes `document` from the loaded collection without touching storage.
    pub fn delete(&self, document: &DocumentRef) -> Result<()> {
        self.with(|proxy, owner| proxy.delete(owner, document))
    }

    /// Destroys every member, running each member's own hooks.
    ///
    /// Every member is attempted; failures are collected and reported
    /// together once all members were processed.
    pub fn destroy_all(&self) -> Result<()> {
        let members = self.with(|proxy, owner| proxy.take_members(owner, "destroy_all"))?;
        debug!(
            "destroying {} member(s) of {}.{}",
            members.len(),
            self.owner.identity_map_key(),
            self.descriptor.name
        );
        let mut failures = Vec::new();
        for member in members {
            if let Err(err) = member.destroy() {
                warn!("failed to destroy {}: {err}", member.identity_map_key());
                failures.push(CascadeFailure::new(member.class_name(), member.id(), err.to_string()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(MapperError::CascadeFailed { failures })
        }
    }

    /// Deletes every member in storage without loading or destroying them
    /// one by one. Returns the number of removed documents.
    pub fn delete_all(&self) -> Result<u64> {
        self.with(|proxy, owner| proxy.delete_all(owner))
    }

    /// Clears the link to the owner on every member and saves it.
    pub fn nullify(&self) -> Result<()> {
        let (members, fields) =
            self.with(|proxy, owner| Ok((proxy.take_members(owner, "nullify")?, proxy.link_fields())))?;
        debug!(
            "nullifying {} member(s) of {}.{}",
            members.len(),
            self.owner.identity_map_key(),
            self.descriptor.name
        );
        for member in members {
            for field in &fields {
                member.set(field.clone(), Value::Null);
            }
            member.save()?;
        }
        Ok(())
    }

    /// The `<name>_attributes=` writer.
    pub fn assign_nested(&self, payload: Value) -> Result<()> {
        self.owner
            .locked(|owner| nested::assign(owner, &self.descriptor.name, payload))
    }

    /// Runs the named extension over the loaded members.
    pub fn call_extension(&self, name: &str) -> Result<Value> {
        let extension = self.descriptor.options.extensions.get(name).cloned().ok_or_else(|| {
            MapperError::invalid_operation(format!("`{}` has no extension `{name}`", self.descriptor.name))
        })?;
        let members = self.all()?;
        extension(&members)
    }
}

impl fmt::Debug for AssociationHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssociationHandle")
            .field("owner", self.owner)
            .field("name", &self.descriptor.name)
            .field("variant", &self.variant())
            .finish()
    }
}
