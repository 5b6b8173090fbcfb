//! `<name>_attributes` assignment.
//!
//! A payload either builds new members (no id), updates the member with the
//! given id, or removes it when `_destroy` is truthy and the declaration
//! allows it. Elements naming an id that is not a current member are skipped.

use log::{debug, warn};
use serde_json::Value;

use crate::{
    document::{DeferredWrite, Document, DocumentRef},
    errors::{MapperError, Result},
    proxy::{Proxy, ProxyVariant, Target},
    registry::normalize_name,
    types::NestedAttributesOptions,
    id::id_from_attributes,
    value::{Attributes, is_truthy, without_unassignable},
};

/// Normalizes a collection payload into an ordered list of element maps.
///
/// Lists keep their order. Keyed maps (`{"0": {..}, "1": {..}}`) are
/// ordered by the integer value of their keys; keys without a leading
/// integer count as 0 and keep their relative order.
pub fn normalize_collection(payload: Value) -> Result<Vec<Attributes>> {
    let elements: Vec<Value> = match payload {
        Value::Array(items) => items,
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by_key(|(key, _)| leading_integer(key));
            entries.into_iter().map(|(_, value)| value).collect()
        }
        other => {
            return Err(MapperError::invalid_payload(format!(
                "Hash or Array expected, got {}",
                type_name(&other)
            )));
        }
    };
    elements
        .into_iter()
        .map(|element| match element {
            Value::Object(attributes) => Ok(attributes),
            other => Err(MapperError::invalid_payload(format!(
                "nested elements must be objects, got {}",
                type_name(&other)
            ))),
        })
        .collect()
}

/// Integer prefix of `key` after optional whitespace and sign; 0 when absent.
fn leading_integer(key: &str) -> i64 {
    let trimmed = key.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let end = digits.find(|c: char| !c.is_ascii_digit()).unwrap_or(digits.len());
    digits[..end].parse::<i64>().map(|value| sign * value).unwrap_or(0)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Applies a nested payload to association `name` of `owner`.
pub(crate) fn assign(owner: &mut Document, name: &str, payload: Value) -> Result<()> {
    let name = normalize_name(name);
    let descriptor = owner.class().association(&name)?;
    let options = owner.class().nested_attributes_options(&name).ok_or_else(|| {
        MapperError::invalid_operation(format!(
            "{} does not accept nested attributes for `{name}`",
            owner.class().name()
        ))
    })?;

    if descriptor.is_singular() {
        let kind = type_name(&payload);
        let Value::Object(attributes) = payload else {
            return Err(MapperError::invalid_payload(format!(
                "`{name}` is singular; expected an object, got {kind}"
            )));
        };
        owner.with_proxy(&name, |proxy, owner| assign_one(proxy, owner, &options, attributes))
    } else {
        let elements = normalize_collection(payload)?;
        owner.with_proxy(&name, |proxy, owner| {
            elements
                .into_iter()
                .try_for_each(|attributes| assign_member(proxy, owner, &options, attributes))
        })
    }
}

fn wants_destroy(options: &NestedAttributesOptions, attributes: &Attributes) -> bool {
    options.allow_destroy && attributes.get("_destroy").is_some_and(is_truthy)
}

/// Referenced members leave storage once the owner is released; embedded
/// ones disappear from their root on its next save.
fn destroy_removed(owner: &mut Document, member: DocumentRef) {
    if !member.is_embedded() {
        owner.defer(DeferredWrite::Destroy(member));
    }
}

/// Adds a member built from a nested element.
///
/// An owner that was never saved keeps new referenced members unsaved too:
/// they carry its key and are written by its first save. `belongs_to`
/// targets hold no key of the owner and are saved as on assignment.
fn add_new(proxy: &mut Proxy, owner: &mut Document, member: DocumentRef) -> Result<()> {
    let variant = proxy.variant();
    let owner_keyed = !variant.is_embedded()
        && !matches!(variant, ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic);
    if owner.new_record && owner_keyed {
        proxy.attach_pending(owner, &member)
    } else if variant.is_collection() {
        proxy.push(owner, &member)
    } else {
        proxy.replace(owner, Target::Single(member))
    }
}

/// Assigns onto an existing member without saving it. Referenced members
/// are saved by the owner's next save; embedded ones persist with the root.
fn update_member(owner: &mut Document, member: &DocumentRef, attributes: &Attributes) -> Result<()> {
    {
        let mut member = member.write();
        member.assign(without_unassignable(attributes))?;
        if !member.class().is_embeddable() {
            member.pending_save = true;
        }
    }
    owner.adopt_deferred(member);
    Ok(())
}

fn skip_unknown(owner: &Document, name: &str, id: &str) {
    warn!(
        "{}.{name}_attributes: no member with id {id}, skipping",
        owner.class().identity_map_key(&owner.id())
    );
}

fn assign_member(
    proxy: &mut Proxy,
    owner: &mut Document,
    options: &NestedAttributesOptions,
    attributes: Attributes,
) -> Result<()> {
    let name = proxy.descriptor().name.clone();
    let Some(id) = id_from_attributes(&attributes) else {
        if options.rejects(&attributes) {
            debug!("{name}_attributes: rejected new element");
            return Ok(());
        }
        let member = proxy.build_member(owner, without_unassignable(&attributes))?;
        return add_new(proxy, owner, member);
    };

    let existing = proxy
        .load(owner)?
        .members()
        .into_iter()
        .find(|member| member.id() == id);
    match existing {
        Some(member) if wants_destroy(options, &attributes) => {
            proxy.delete(owner, &member)?;
            destroy_removed(owner, member);
            Ok(())
        }
        Some(member) => update_member(owner, &member, &attributes),
        None => {
            skip_unknown(owner, &name, &id);
            Ok(())
        }
    }
}

fn assign_one(
    proxy: &mut Proxy,
    owner: &mut Document,
    options: &NestedAttributesOptions,
    attributes: Attributes,
) -> Result<()> {
    let name = proxy.descriptor().name.clone();
    let current = proxy.load(owner)?.single();
    let Some(id) = id_from_attributes(&attributes) else {
        if options.rejects(&attributes) {
            debug!("{name}_attributes: rejected new element");
            return Ok(());
        }
        let member = proxy.build_member(owner, without_unassignable(&attributes))?;
        return add_new(proxy, owner, member);
    };

    match current.filter(|member| !owner.self_ref.points_to(member) && member.id() == id) {
        Some(member) if wants_destroy(options, &attributes) => {
            proxy.detach(owner)?;
            destroy_removed(owner, member);
            Ok(())
        }
        Some(member) => update_member(owner, &member, &attributes),
        None => {
            skip_unknown(owner, &name, &id);
            Ok(())
        }
    }
}
