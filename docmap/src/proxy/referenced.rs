//! Behavior of associations whose members are stored in their own
//! collection and linked by id.

use log::debug;
use serde_json::Value;

use super::{Proxy, ProxyVariant};
use crate::{
    document::{DeferredWrite, Document, DocumentRef},
    errors::{MapperError, Result},
    store::Query,
    id::{ID_KEY, id_string},
    value::TYPE_KEY,
};

fn foreign_key(proxy: &Proxy) -> Result<&str> {
    proxy.descriptor.foreign_key.as_deref().ok_or_else(|| {
        MapperError::invalid_operation(format!("`{}` has no foreign key", proxy.descriptor.name))
    })
}

/// Ids stored in the owner's array field, in order.
fn owner_ids(proxy: &Proxy, owner: &Document) -> Vec<String> {
    proxy
        .descriptor
        .foreign_key
        .as_ref()
        .and_then(|field| owner.attributes.get(field))
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(id_string).collect())
        .unwrap_or_default()
}

fn set_owner_ids(proxy: &Proxy, owner: &mut Document, ids: Vec<String>) {
    if let Some(field) = &proxy.descriptor.foreign_key {
        let ids = ids.into_iter().map(Value::String).collect();
        owner.attributes.insert(field.clone(), Value::Array(ids));
    }
}

/// Query selecting the members of a referenced collection or `one`.
pub(super) fn scope(proxy: &Proxy, owner: &Document) -> Result<Query> {
    if proxy.variant == ProxyVariant::InArray {
        return Ok(Query::new().any_of(ID_KEY, owner_ids(proxy, owner)));
    }
    let mut query = Query::new().eq(foreign_key(proxy)?, owner.id());
    if proxy.variant == ProxyVariant::ManyDocumentsAs
        && let Some(type_key) = &proxy.descriptor.type_key
    {
        query = query.eq(type_key.clone(), owner.class().name());
    }
    Ok(query)
}

pub(super) fn fetch_belongs_to(proxy: &Proxy, owner: &Document) -> Result<Option<DocumentRef>> {
    let Some(id) = owner.attributes.get(foreign_key(proxy)?).and_then(id_string) else {
        return Ok(None);
    };
    if proxy.variant == ProxyVariant::BelongsToPolymorphic {
        let type_key = proxy.descriptor.type_key.as_deref().unwrap_or(TYPE_KEY);
        if owner.attributes.get(type_key).and_then(Value::as_str).is_none() {
            return Ok(None);
        }
    }
    proxy.target_class(owner)?.find(&id)
}

pub(super) fn fetch_one(proxy: &Proxy, owner: &Document) -> Result<Option<DocumentRef>> {
    proxy.target_class(owner)?.first(&scope(proxy, owner)?)
}

pub(super) fn fetch_many(proxy: &Proxy, owner: &Document) -> Result<Vec<DocumentRef>> {
    proxy.target_class(owner)?.all(&scope(proxy, owner)?)
}

pub(super) fn fetch_in_array(proxy: &Proxy, owner: &Document) -> Result<Vec<DocumentRef>> {
    let ids = owner_ids(proxy, owner);
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    proxy.target_class(owner)?.find_many(&ids)
}

/// Points the owner's foreign key (and stored type) at `target`.
/// A new target is queued for saving so the key refers to a stored document.
pub(super) fn assign_belongs_to(proxy: &Proxy, owner: &mut Document, target: Option<&DocumentRef>) -> Result<()> {
    let foreign_key = foreign_key(proxy)?.to_string();
    let type_key = proxy.descriptor.type_key.clone();
    match target {
        Some(target) => {
            if !owner.self_ref.points_to(target) && target.is_new() {
                owner.defer(DeferredWrite::Save(target.clone()));
            }
            let id = if owner.self_ref.points_to(target) { owner.id() } else { target.id() };
            owner.attributes.insert(foreign_key, Value::String(id));
            if let Some(type_key) = type_key {
                let class_name = if owner.self_ref.points_to(target) {
                    owner.class().name().to_string()
                } else {
                    target.class_name()
                };
                owner.attributes.insert(type_key, Value::String(class_name));
            }
        }
        None => {
            owner.attributes.insert(foreign_key, Value::Null);
            if let Some(type_key) = type_key {
                owner.attributes.insert(type_key, Value::Null);
            }
        }
    }
    Ok(())
}

fn reject_self(proxy: &Proxy, owner: &Document, document: &DocumentRef) -> Result<()> {
    if owner.self_ref.points_to(document) {
        return Err(MapperError::invalid_operation(format!(
            "a document cannot be linked through its own `{}`",
            proxy.descriptor.name
        )));
    }
    Ok(())
}

/// Writes the owner link onto `document` without saving it.
pub(super) fn link_unsaved(proxy: &Proxy, owner: &mut Document, document: &DocumentRef) -> Result<()> {
    reject_self(proxy, owner, document)?;
    match proxy.variant {
        ProxyVariant::InArray => {
            let mut ids = owner_ids(proxy, owner);
            let id = document.id();
            if !ids.contains(&id) {
                ids.push(id);
            }
            set_owner_ids(proxy, owner, ids);
        }
        ProxyVariant::ManyPolymorphic => {
            let class_name = document.class_name();
            let mut member = document.write();
            member.attributes.insert(foreign_key(proxy)?.to_string(), Value::String(owner.id()));
            member.attributes.insert(TYPE_KEY.to_string(), Value::String(class_name));
        }
        _ => {
            let mut member = document.write();
            member.attributes.insert(foreign_key(proxy)?.to_string(), Value::String(owner.id()));
            if let Some(type_key) = &proxy.descriptor.type_key {
                member
                    .attributes
                    .insert(type_key.clone(), Value::String(owner.class().name().to_string()));
            }
        }
    }
    Ok(())
}

/// Links `document` to the owner and queues a save of the side holding
/// the key.
pub(super) fn link(proxy: &Proxy, owner: &mut Document, document: &DocumentRef) -> Result<()> {
    link_unsaved(proxy, owner, document)?;
    // the in-array key lives on the owner, which persists on its own save
    if proxy.variant != ProxyVariant::InArray || document.is_new() {
        owner.defer(DeferredWrite::Save(document.clone()));
    }
    Ok(())
}

/// Clears the link fields on `document` and queues its save.
pub(super) fn unlink(proxy: &Proxy, owner: &mut Document, document: &DocumentRef) {
    for field in proxy.link_fields() {
        document.set(field, Value::Null);
    }
    owner.defer(DeferredWrite::Save(document.clone()));
}

pub(super) fn replace_one(
    proxy: &Proxy,
    owner: &mut Document,
    previous: Option<DocumentRef>,
    next: Option<DocumentRef>,
) -> Result<()> {
    if let Some(previous) = &previous
        && !next.as_ref().is_some_and(|next| next.ptr_eq(previous))
    {
        unlink(proxy, owner, previous);
    }
    if let Some(next) = &next {
        link(proxy, owner, next)?;
    }
    Ok(())
}

/// Members missing from `next` are unlinked; every member of `next` is
/// linked and saved.
pub(super) fn replace_many(
    proxy: &Proxy,
    owner: &mut Document,
    previous: &[DocumentRef],
    next: &[DocumentRef],
) -> Result<()> {
    for old in previous {
        if !next.iter().any(|member| member.ptr_eq(old)) {
            unlink(proxy, owner, old);
        }
    }
    for member in next {
        link(proxy, owner, member)?;
    }
    Ok(())
}

pub(super) fn replace_in_array(proxy: &Proxy, owner: &mut Document, next: &[DocumentRef]) -> Result<()> {
    for member in next {
        reject_self(proxy, owner, member)?;
        if member.is_new() {
            owner.defer(DeferredWrite::Save(member.clone()));
        }
    }
    set_owner_ids(proxy, owner, next.iter().map(DocumentRef::id).collect());
    Ok(())
}

pub(super) fn forget_id(proxy: &Proxy, owner: &mut Document, id: &str) {
    let ids = owner_ids(proxy, owner).into_iter().filter(|existing| existing != id).collect();
    set_owner_ids(proxy, owner, ids);
}

pub(super) fn find(proxy: &Proxy, owner: &Document, id: &str) -> Result<Option<DocumentRef>> {
    if proxy.variant == ProxyVariant::InArray && !owner_ids(proxy, owner).iter().any(|existing| existing == id) {
        return Ok(None);
    }
    let query = scope(proxy, owner)?.without(ID_KEY).eq(ID_KEY, id);
    proxy.target_class(owner)?.first(&query)
}

pub(super) fn count(proxy: &Proxy, owner: &Document) -> Result<u64> {
    if proxy.variant == ProxyVariant::InArray && owner_ids(proxy, owner).is_empty() {
        return Ok(0);
    }
    proxy.target_class(owner)?.count(&scope(proxy, owner)?)
}

/// Bulk removal in the store without loading members. Loaded members are
/// evicted from their identity maps.
pub(super) fn delete_all(proxy: &Proxy, owner: &mut Document) -> Result<u64> {
    let class = proxy.target_class(owner)?;
    let query = scope(proxy, owner)?;
    let removed = class.store().remove(class.collection(), &query)?;
    if proxy.loaded {
        for member in proxy.target.members() {
            let member_class = member.class();
            member_class.identity_map().remove(member_class.name(), &member.id());
        }
    }
    if proxy.variant == ProxyVariant::InArray {
        set_owner_ids(proxy, owner, Vec::new());
    }
    debug!(
        "deleted {removed} {} document(s) through `{}`",
        class.name(),
        proxy.descriptor.name
    );
    Ok(removed)
}
