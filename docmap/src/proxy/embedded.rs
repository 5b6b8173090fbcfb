//! Behavior of associations whose members live inside the owner's document.

use log::trace;
use serde_json::Value;

use super::{Proxy, ProxyVariant, Target};
use crate::{
    class::into_attributes,
    document::{Document, DocumentRef},
    errors::{MapperError, Result},
};

/// Turns the raw stored value of the association into live members.
///
/// The raw value is taken out of the owner's attributes: from here on the
/// proxy is the single source of truth and serializes it back on save.
pub(super) fn materialize(proxy: &Proxy, owner: &mut Document) -> Result<Target> {
    let raw = owner.attributes.remove(&proxy.descriptor.name).unwrap_or(Value::Null);
    let target = instantiate_all(proxy, owner, raw)?;
    for member in target.members() {
        stamp(owner, &member);
        member.write().new_record = owner.new_record;
    }
    Ok(target)
}

fn instantiate_all(proxy: &Proxy, owner: &Document, raw: Value) -> Result<Target> {
    let instantiate = |value: Value| -> Result<DocumentRef> {
        let attributes = into_attributes(value)?;
        let class = proxy.member_class(owner, &attributes)?;
        Ok(class.instantiate(attributes))
    };
    match (proxy.variant, raw) {
        (_, Value::Null) if proxy.variant == ProxyVariant::OneEmbedded => Ok(Target::Absent),
        (_, Value::Null) => Ok(Target::Many(Vec::new())),
        (ProxyVariant::OneEmbedded, value @ Value::Object(_)) => instantiate(value).map(Target::Single),
        (ProxyVariant::OneEmbedded, other) => Err(unexpected(proxy, &other)),
        (_, Value::Array(items)) => items
            .into_iter()
            .map(instantiate)
            .collect::<Result<Vec<_>>>()
            .map(Target::Many),
        (_, other) => Err(unexpected(proxy, &other)),
    }
}

fn unexpected(proxy: &Proxy, value: &Value) -> MapperError {
    MapperError::invalid_payload(format!(
        "`{}` expects {}, got {value}",
        proxy.descriptor.name,
        if proxy.variant.is_collection() { "a list of objects" } else { "an object" }
    ))
}

/// Builds new members from an assigned attribute value (`"pets": [{..}]`).
pub(super) fn build_from_value(proxy: &Proxy, owner: &mut Document, value: Value) -> Result<Target> {
    let mut build = |value: Value| -> Result<DocumentRef> {
        let attributes = into_attributes(value)?;
        proxy.build_member(owner, attributes)
    };
    match value {
        Value::Null => Ok(Target::Absent),
        Value::Array(items) if proxy.variant.is_collection() => {
            items.into_iter().map(build).collect::<Result<Vec<_>>>().map(Target::Many)
        }
        value @ Value::Object(_) if !proxy.variant.is_collection() => build(value).map(Target::Single),
        other => Err(unexpected(proxy, &other)),
    }
}

/// Makes `member` a child of `owner`.
pub(super) fn adopt(proxy: &Proxy, owner: &Document, member: &DocumentRef) -> Result<()> {
    if owner.self_ref.points_to(member) {
        return Err(MapperError::invalid_operation(format!(
            "cannot embed a document into its own `{}`",
            proxy.descriptor.name
        )));
    }
    stamp(owner, member);
    Ok(())
}

/// Sets the parent and root of `member` from its owner and re-points every
/// already materialized descendant at the same root.
fn stamp(owner: &Document, member: &DocumentRef) {
    let root = owner.root_for_children();
    let mut child = member.write();
    child.parent = Some(owner.self_ref.clone());
    child.root = Some(root.clone());
    child.restamp_descendants(&root);
    trace!(
        "stamped {} under {}",
        child.class().identity_map_key(&child.id()),
        owner.class().identity_map_key(&owner.id())
    );
}
