//! Association proxies.
//!
//! One [`Proxy`] exists per (owner document, association name) once the
//! association is first touched. It caches the loaded target and dispatches
//! every operation to the behavior of its [`ProxyVariant`]: referenced
//! variants talk to the store through the target class finders, embedded
//! variants keep their members inside the owner.

mod embedded;
mod handle;
mod referenced;

pub use handle::AssociationHandle;

use std::{fmt, sync::Arc};

use serde_json::Value;

use crate::{
    class::DocumentClass,
    document::{Document, DocumentRef},
    errors::{MapperError, Result},
    types::{AssociationDescriptor, AssociationKind, TargetClass},
    value::{Attributes, TYPE_KEY},
};

/// Concrete proxy behavior, chosen once from the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyVariant {
    BelongsTo,
    BelongsToPolymorphic,
    /// Referenced single target holding the owner's id.
    One,
    /// Single embedded document stored inside the owner.
    OneEmbedded,
    ManyDocuments,
    /// Referenced members pointing back through a polymorphic role.
    ManyDocumentsAs,
    /// Referenced members whose class is read from `_type`.
    ManyPolymorphic,
    ManyEmbedded,
    ManyEmbeddedPolymorphic,
    /// Ids of the targets stored in an array on the owner.
    InArray,
}

impl ProxyVariant {
    pub fn for_descriptor(descriptor: &AssociationDescriptor) -> Self {
        let options = &descriptor.options;
        match descriptor.kind {
            AssociationKind::BelongsTo if descriptor.polymorphic => ProxyVariant::BelongsToPolymorphic,
            AssociationKind::BelongsTo => ProxyVariant::BelongsTo,
            AssociationKind::One if descriptor.embedded => ProxyVariant::OneEmbedded,
            AssociationKind::One => ProxyVariant::One,
            AssociationKind::Many if descriptor.embedded && descriptor.polymorphic => {
                ProxyVariant::ManyEmbeddedPolymorphic
            }
            AssociationKind::Many if descriptor.embedded => ProxyVariant::ManyEmbedded,
            AssociationKind::Many if options.in_field.is_some() => ProxyVariant::InArray,
            AssociationKind::Many if options.as_role.is_some() => ProxyVariant::ManyDocumentsAs,
            AssociationKind::Many if descriptor.polymorphic => ProxyVariant::ManyPolymorphic,
            AssociationKind::Many => ProxyVariant::ManyDocuments,
        }
    }

    pub fn is_collection(self) -> bool {
        !matches!(
            self,
            ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic | ProxyVariant::One | ProxyVariant::OneEmbedded
        )
    }

    pub fn is_embedded(self) -> bool {
        matches!(
            self,
            ProxyVariant::OneEmbedded | ProxyVariant::ManyEmbedded | ProxyVariant::ManyEmbeddedPolymorphic
        )
    }
}

/// Loaded value of an association.
#[derive(Debug, Clone, Default)]
pub enum Target {
    #[default]
    Absent,
    Single(DocumentRef),
    Many(Vec<DocumentRef>),
}

impl Target {
    pub fn single(&self) -> Option<DocumentRef> {
        match self {
            Target::Single(document) => Some(document.clone()),
            Target::Many(members) => members.first().cloned(),
            Target::Absent => None,
        }
    }

    pub fn members(&self) -> Vec<DocumentRef> {
        match self {
            Target::Absent => Vec::new(),
            Target::Single(document) => vec![document.clone()],
            Target::Many(members) => members.clone(),
        }
    }

    pub fn is_present(&self) -> bool {
        match self {
            Target::Absent => false,
            Target::Single(_) => true,
            Target::Many(members) => !members.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Target::Absent => 0,
            Target::Single(_) => 1,
            Target::Many(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_option(document: Option<DocumentRef>) -> Self {
        document.map_or(Target::Absent, Target::Single)
    }
}

pub struct Proxy {
    descriptor: Arc<AssociationDescriptor>,
    variant: ProxyVariant,
    loaded: bool,
    target: Target,
}

impl Proxy {
    pub(crate) fn new(descriptor: Arc<AssociationDescriptor>) -> Self {
        let variant = ProxyVariant::for_descriptor(&descriptor);
        Self {
            descriptor,
            variant,
            loaded: false,
            target: Target::Absent,
        }
    }

    pub fn descriptor(&self) -> &Arc<AssociationDescriptor> {
        &self.descriptor
    }

    pub fn variant(&self) -> ProxyVariant {
        self.variant
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn reset(&mut self) {
        self.loaded = false;
        self.target = Target::Absent;
    }

    /// Loads the target on first call and returns the cached value afterwards.
    pub(crate) fn load(&mut self, owner: &mut Document) -> Result<&Target> {
        if !self.loaded {
            self.target = self.fetch(owner)?;
            self.loaded = true;
        }
        Ok(&self.target)
    }

    fn fetch(&self, owner: &mut Document) -> Result<Target> {
        match self.variant {
            ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic => {
                referenced::fetch_belongs_to(self, owner).map(Target::from_option)
            }
            ProxyVariant::One => referenced::fetch_one(self, owner).map(Target::from_option),
            ProxyVariant::ManyDocuments | ProxyVariant::ManyDocumentsAs | ProxyVariant::ManyPolymorphic => {
                referenced::fetch_many(self, owner).map(Target::Many)
            }
            ProxyVariant::InArray => referenced::fetch_in_array(self, owner).map(Target::Many),
            ProxyVariant::OneEmbedded | ProxyVariant::ManyEmbedded | ProxyVariant::ManyEmbeddedPolymorphic => {
                embedded::materialize(self, owner)
            }
        }
    }

    /// Replaces the whole target and marks the proxy loaded.
    pub(crate) fn replace(&mut self, owner: &mut Document, target: Target) -> Result<()> {
        let target = self.shape(target)?;
        for member in target.members() {
            self.check_member(owner, &member)?;
        }
        match self.variant {
            ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic => {
                referenced::assign_belongs_to(self, owner, target.single().as_ref())?;
            }
            ProxyVariant::One => {
                let previous = self.load(owner)?.single();
                referenced::replace_one(self, owner, previous, target.single())?;
            }
            ProxyVariant::ManyDocuments | ProxyVariant::ManyDocumentsAs | ProxyVariant::ManyPolymorphic => {
                let previous = self.load(owner)?.members();
                referenced::replace_many(self, owner, &previous, &target.members())?;
            }
            ProxyVariant::InArray => referenced::replace_in_array(self, owner, &target.members())?,
            ProxyVariant::OneEmbedded | ProxyVariant::ManyEmbedded | ProxyVariant::ManyEmbeddedPolymorphic => {
                // drop any raw value so it never resurfaces
                owner.attributes.remove(&self.descriptor.name);
                for member in target.members() {
                    embedded::adopt(self, owner, &member)?;
                }
            }
        }
        self.target = target;
        self.loaded = true;
        Ok(())
    }

    /// Members must be of the target class and embedded exactly when the
    /// association is. Only `belongs_to` may point a document at itself.
    fn check_member(&self, owner: &Document, document: &DocumentRef) -> Result<()> {
        let name = &self.descriptor.name;
        let class = if owner.self_ref.points_to(document) {
            if !matches!(self.variant, ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic) {
                return Err(MapperError::invalid_operation(format!(
                    "a document cannot be a member of its own `{name}`"
                )));
            }
            Arc::clone(owner.class())
        } else {
            document.class()
        };
        if class.is_embeddable() != self.variant.is_embedded() {
            return Err(MapperError::invalid_operation(format!(
                "{} documents cannot be stored in `{name}`",
                class.name()
            )));
        }
        if let Some(base) = self.descriptor.target.base()
            && !class.is_a(base)
        {
            return Err(MapperError::invalid_operation(format!(
                "`{name}` holds {base} documents, got {}",
                class.name()
            )));
        }
        Ok(())
    }

    /// Singular targets must not receive lists, and vice versa.
    fn shape(&self, target: Target) -> Result<Target> {
        match (self.variant.is_collection(), target) {
            (true, Target::Absent) => Ok(Target::Many(Vec::new())),
            (true, Target::Single(document)) => Ok(Target::Many(vec![document])),
            (true, many @ Target::Many(_)) => Ok(many),
            (false, Target::Many(members)) if members.len() <= 1 => {
                Ok(Target::from_option(members.into_iter().next()))
            }
            (false, Target::Many(_)) => Err(MapperError::invalid_operation(format!(
                "`{}` holds a single document",
                self.descriptor.name
            ))),
            (false, single) => Ok(single),
        }
    }

    /// Assignment of a raw attribute value to an embedded association.
    pub(crate) fn replace_from_value(&mut self, owner: &mut Document, value: Value) -> Result<()> {
        let documents = embedded::build_from_value(self, owner, value)?;
        self.replace(owner, documents)
    }

    fn ensure_collection(&self, operation: &str) -> Result<()> {
        if self.variant.is_collection() {
            Ok(())
        } else {
            Err(MapperError::invalid_operation(format!(
                "{operation} is not supported by {} `{}`",
                self.descriptor.kind, self.descriptor.name
            )))
        }
    }

    /// Appends `document`. Referenced members are linked and saved right
    /// away; embedded members are stamped and persist with their root.
    pub(crate) fn push(&mut self, owner: &mut Document, document: &DocumentRef) -> Result<()> {
        self.ensure_collection("push")?;
        self.check_member(owner, document)?;
        if self.variant.is_embedded() {
            self.load(owner)?;
            embedded::adopt(self, owner, document)?;
        } else {
            referenced::link(self, owner, document)?;
        }
        if self.loaded
            && let Target::Many(members) = &mut self.target
            && !members.iter().any(|member| member.ptr_eq(document))
        {
            members.push(document.clone());
        }
        Ok(())
    }

    /// Links `document` to an owner that was never saved without writing
    /// anything. The member is flagged so the owner's first save persists it.
    pub(crate) fn attach_pending(&mut self, owner: &mut Document, document: &DocumentRef) -> Result<()> {
        self.check_member(owner, document)?;
        let previous = self.load(owner)?.members();
        if !self.variant.is_collection() {
            for old in previous.iter().filter(|old| !old.ptr_eq(document)) {
                referenced::unlink(self, owner, old);
            }
        }
        referenced::link_unsaved(self, owner, document)?;
        document.write().pending_save = true;
        match &mut self.target {
            Target::Many(members) => {
                if !members.iter().any(|member| member.ptr_eq(document)) {
                    members.push(document.clone());
                }
            }
            target => *target = Target::Single(document.clone()),
        }
        Ok(())
    }

    /// Builds a new member from `attributes` and appends it without saving.
    pub(crate) fn build(&mut self, owner: &mut Document, attributes: Attributes) -> Result<DocumentRef> {
        self.ensure_collection("build")?;
        let document = self.build_member(owner, attributes)?;
        self.load(owner)?;
        if self.variant.is_embedded() {
            embedded::adopt(self, owner, &document)?;
        } else {
            referenced::link_unsaved(self, owner, &document)?;
        }
        if let Target::Many(members) = &mut self.target {
            members.push(document.clone());
        }
        Ok(document)
    }

    /// Class of a member built from `attributes`: the stored type for
    /// polymorphic associations, the declared target otherwise.
    pub(crate) fn member_class(&self, owner: &Document, attributes: &Attributes) -> Result<Arc<DocumentClass>> {
        let class_name = match &self.descriptor.target {
            TargetClass::Static(name) => name.clone(),
            TargetClass::ByStoredType { base, .. } => attributes
                .get(TYPE_KEY)
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| base.clone())
                .ok_or_else(|| {
                    MapperError::invalid_payload(format!(
                        "`{}` is polymorphic; `{TYPE_KEY}` must name the class to build",
                        self.descriptor.name
                    ))
                })?,
        };
        owner.class().resolve_class(&class_name)
    }

    /// Builds a member; writes it queued while being built move to `owner`.
    pub(crate) fn build_member(&self, owner: &mut Document, attributes: Attributes) -> Result<DocumentRef> {
        let document = self.member_class(owner, &attributes)?.build_deferred(attributes)?;
        owner.adopt_deferred(&document);
        Ok(document)
    }

    /// Class queried for referenced members.
    pub(crate) fn target_class(&self, owner: &Document) -> Result<Arc<DocumentClass>> {
        let name = match &self.descriptor.target {
            TargetClass::Static(name) => name.clone(),
            TargetClass::ByStoredType { type_key, base } => match base {
                Some(base) => base.clone(),
                None => owner
                    .attributes
                    .get(type_key)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        MapperError::invalid_operation(format!(
                            "`{}` has no `{type_key}` to resolve its class from",
                            self.descriptor.name
                        ))
                    })?,
            },
        };
        owner.class().resolve_class(&name)
    }

    pub(crate) fn find(&mut self, owner: &mut Document, id: &str) -> Result<Option<DocumentRef>> {
        self.ensure_collection("find")?;
        if self.variant.is_embedded() || self.loaded {
            let members = self.load(owner)?.members();
            return Ok(members.into_iter().find(|member| member.id() == id));
        }
        referenced::find(self, owner, id)
    }

    pub(crate) fn count(&mut self, owner: &mut Document) -> Result<u64> {
        self.ensure_collection("count")?;
        if self.variant.is_embedded() {
            return Ok(self.load(owner)?.len() as u64);
        }
        referenced::count(self, owner)
    }

    /// Removes `document` from the in-memory collection only.
    pub(crate) fn delete(&mut self, owner: &mut Document, document: &DocumentRef) -> Result<()> {
        self.ensure_collection("delete")?;
        if owner.self_ref.points_to(document) {
            return Ok(());
        }
        self.load(owner)?;
        if let Target::Many(members) = &mut self.target {
            members.retain(|member| !member.ptr_eq(document));
        }
        if self.variant == ProxyVariant::InArray {
            referenced::forget_id(self, owner, &document.id());
        }
        Ok(())
    }

    /// Clears a singular target in memory (no store side effects).
    pub(crate) fn detach(&mut self, owner: &mut Document) -> Result<()> {
        if self.variant.is_collection() {
            return Err(MapperError::invalid_operation(format!(
                "`{}` is a collection; delete members instead",
                self.descriptor.name
            )));
        }
        match self.variant {
            ProxyVariant::BelongsTo | ProxyVariant::BelongsToPolymorphic => {
                referenced::assign_belongs_to(self, owner, None)?;
            }
            ProxyVariant::OneEmbedded => {
                owner.attributes.remove(&self.descriptor.name);
            }
            _ => {}
        }
        self.target = Target::Absent;
        self.loaded = true;
        Ok(())
    }

    fn ensure_referenced_collection(&self, operation: &str) -> Result<()> {
        self.ensure_collection(operation)?;
        if self.variant.is_embedded() {
            return Err(MapperError::invalid_operation(format!(
                "{operation} is not supported by embedded `{}`; members persist with their owner",
                self.descriptor.name
            )));
        }
        Ok(())
    }

    /// Loads and unlinks every member, leaving the proxy loaded and empty.
    pub(crate) fn take_members(&mut self, owner: &mut Document, operation: &str) -> Result<Vec<DocumentRef>> {
        self.ensure_referenced_collection(operation)?;
        let members = self.load(owner)?.members();
        if self.variant == ProxyVariant::InArray
            && let Some(field) = &self.descriptor.foreign_key
        {
            owner.attributes.insert(field.clone(), Value::Array(Vec::new()));
        }
        self.target = Target::Many(Vec::new());
        Ok(members)
    }

    /// Fields cleared on members by `nullify`.
    pub(crate) fn link_fields(&self) -> Vec<String> {
        match self.variant {
            ProxyVariant::InArray => Vec::new(),
            _ => self
                .descriptor
                .foreign_key
                .iter()
                .chain(self.descriptor.type_key.iter())
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn delete_all(&mut self, owner: &mut Document) -> Result<u64> {
        self.ensure_referenced_collection("delete_all")?;
        let removed = referenced::delete_all(self, owner)?;
        self.target = Target::Many(Vec::new());
        self.loaded = true;
        Ok(removed)
    }

    /// Writes materialized embedded members into a storage document.
    pub(crate) fn write_embedded(&self, out: &mut Attributes) -> Result<()> {
        if !self.variant.is_embedded() || !self.loaded {
            return Ok(());
        }
        let name = self.descriptor.name.clone();
        match (&self.target, self.variant) {
            (Target::Single(document), _) => {
                out.insert(name, Value::Object(document.read().to_storage()?));
            }
            (Target::Absent, ProxyVariant::OneEmbedded) => {
                out.remove(&name);
            }
            (target, _) => {
                let members = target
                    .members()
                    .iter()
                    .map(|member| member.read().to_storage().map(Value::Object))
                    .collect::<Result<Vec<_>>>()?;
                out.insert(name, Value::Array(members));
            }
        }
        Ok(())
    }

    /// Loaded members of a referenced association.
    pub(crate) fn referenced_members(&self) -> Vec<DocumentRef> {
        if !self.variant.is_embedded() && self.loaded {
            self.target.members()
        } else {
            Vec::new()
        }
    }

    /// Materialized embedded members.
    pub(crate) fn embedded_children(&self) -> Vec<DocumentRef> {
        if self.variant.is_embedded() && self.loaded {
            self.target.members()
        } else {
            Vec::new()
        }
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("name", &self.descriptor.name)
            .field("variant", &self.variant)
            .field("loaded", &self.loaded)
            .field("size", &self.target.len())
            .finish()
    }
}
