//! Document classes: association declarations, nested-attribute settings,
//! destroy hooks, and the identity-mapped finders.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock, Weak},
};

use log::{debug, warn};
use serde_json::Value;

use crate::{
    document::DocumentRef,
    errors::{MapperError, Result},
    id::{ID_KEY, generate_document_id, id_from_attributes, normalize_stored_id},
    identity_map::IdentityMap,
    keys::identity_key,
    mapper::Catalog,
    registry::{AssociationRegistry, normalize_name},
    store::{Query, Store},
    sync,
    types::{AssociationDescriptor, AssociationKind, AssociationOptions, Dependent, NestedAttributesOptions},
    value::{Attributes, TYPE_KEY, classify},
};

/// User callback run after a document is destroyed.
pub type DestroyHook = Arc<dyn Fn(&DocumentRef) -> Result<()> + Send + Sync>;

#[derive(Clone)]
enum AfterDestroy {
    /// `dependent` cascade of the named association, resolved when it runs.
    Cascade(String),
    Hook(DestroyHook),
}

/// Collaborators a class is wired to when the mapper defines it.
#[derive(Clone)]
pub(crate) struct ClassContext {
    pub store: Arc<dyn Store>,
    pub catalog: Weak<Catalog>,
    pub identity_map: Arc<IdentityMap>,
    pub identity_map_enabled: bool,
}

pub struct DocumentClass {
    name: String,
    collection: String,
    embeddable: bool,
    parent: Option<Arc<DocumentClass>>,
    store: Arc<dyn Store>,
    catalog: Weak<Catalog>,
    identity_map: RwLock<Arc<IdentityMap>>,
    identity_map_enabled: bool,
    associations: RwLock<AssociationRegistry>,
    nested_attributes: RwLock<HashMap<String, NestedAttributesOptions>>,
    after_destroy: RwLock<Vec<AfterDestroy>>,
}

impl DocumentClass {
    pub(crate) fn new(name: &str, collection: &str, embeddable: bool, context: ClassContext) -> Self {
        Self {
            name: name.to_string(),
            collection: collection.to_string(),
            embeddable,
            parent: None,
            store: context.store,
            catalog: context.catalog,
            identity_map: RwLock::new(context.identity_map),
            identity_map_enabled: context.identity_map_enabled,
            associations: RwLock::new(AssociationRegistry::new()),
            nested_attributes: RwLock::new(HashMap::new()),
            after_destroy: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing collection; empty for embeddable classes.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_embeddable(&self) -> bool {
        self.embeddable
    }

    pub fn parent(&self) -> Option<&Arc<DocumentClass>> {
        self.parent.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Whether this class is `name` or inherits from it.
    pub fn is_a(&self, name: &str) -> bool {
        self.name == name || self.parent.as_ref().is_some_and(|parent| parent.is_a(name))
    }

    fn catalog(&self) -> Result<Arc<Catalog>> {
        self.catalog
            .upgrade()
            .ok_or_else(|| MapperError::invalid_operation(format!("the mapper owning {} was dropped", self.name)))
    }

    /// Looks up another class of the same mapper.
    pub fn resolve_class(&self, name: &str) -> Result<Arc<DocumentClass>> {
        self.catalog()?
            .get(name)
            .ok_or_else(|| MapperError::UnknownClass { name: name.to_string() })
    }

    /// Creates a subclass stored in the same collection.
    ///
    /// The subclass starts with a copy of this class's associations,
    /// nested-attribute declarations and hooks and shares its identity map;
    /// declarations made on either class afterwards stay separate.
    pub fn inherit(self: &Arc<Self>, name: &str) -> Result<Arc<DocumentClass>> {
        let catalog = self.catalog()?;
        let child = Arc::new(DocumentClass {
            name: name.to_string(),
            collection: self.collection.clone(),
            embeddable: self.embeddable,
            parent: Some(Arc::clone(self)),
            store: Arc::clone(&self.store),
            catalog: self.catalog.clone(),
            identity_map: RwLock::new(self.identity_map()),
            identity_map_enabled: self.identity_map_enabled,
            associations: RwLock::new(sync::read(&self.associations).clone()),
            nested_attributes: RwLock::new(sync::read(&self.nested_attributes).clone()),
            after_destroy: RwLock::new(sync::read(&self.after_destroy).clone()),
        });
        catalog.register(Arc::clone(&child))?;
        Ok(child)
    }

    /// Replaces this class's associations, nested-attribute declarations and
    /// hooks with a copy of its parent's current ones.
    pub(crate) fn copy_parent_declarations(&self) {
        let Some(parent) = &self.parent else {
            return;
        };
        *sync::write(&self.associations) = sync::read(&parent.associations).clone();
        *sync::write(&self.nested_attributes) = sync::read(&parent.nested_attributes).clone();
        *sync::write(&self.after_destroy) = sync::read(&parent.after_destroy).clone();
    }

    // -- declarations --------------------------------------------------------

    pub fn belongs_to(&self, name: &str, options: AssociationOptions) -> Result<Arc<AssociationDescriptor>> {
        self.declare(AssociationKind::BelongsTo, name, options)
    }

    pub fn one(&self, name: &str, options: AssociationOptions) -> Result<Arc<AssociationDescriptor>> {
        self.declare(AssociationKind::One, name, options)
    }

    pub fn many(&self, name: &str, options: AssociationOptions) -> Result<Arc<AssociationDescriptor>> {
        self.declare(AssociationKind::Many, name, options)
    }

    /// Declares (or redeclares) an association.
    ///
    /// The target class must already be registered, except for polymorphic
    /// `belongs_to` whose target is only known per record. A `dependent`
    /// option on a referenced `many` registers a cascade hook once.
    pub fn declare(
        &self,
        kind: AssociationKind,
        name: &str,
        options: AssociationOptions,
    ) -> Result<Arc<AssociationDescriptor>> {
        let name = normalize_name(name);
        let target_embeddable = if kind == AssociationKind::BelongsTo && options.polymorphic {
            None
        } else {
            let class_name = options.class_name.clone().unwrap_or_else(|| classify(&name));
            Some(self.resolve_class(&class_name)?.is_embeddable())
        };

        let descriptor = AssociationDescriptor::new(kind, &name, &self.name, options, target_embeddable)?;
        if let Some(dependent) = descriptor.dependent()
            && !descriptor.cascades()
        {
            warn!(
                "{}.{name}: dependent {dependent:?} only applies to referenced many associations, ignoring",
                self.name
            );
        }

        let cascades = descriptor.cascades();
        let descriptor = sync::write(&self.associations).insert(descriptor);
        if cascades {
            let mut hooks = sync::write(&self.after_destroy);
            let registered = hooks
                .iter()
                .any(|hook| matches!(hook, AfterDestroy::Cascade(existing) if *existing == descriptor.name));
            if !registered {
                hooks.push(AfterDestroy::Cascade(descriptor.name.clone()));
            }
        }
        Ok(descriptor)
    }

    pub fn association(&self, name: &str) -> Result<Arc<AssociationDescriptor>> {
        self.find_association(name)
            .ok_or_else(|| MapperError::unknown_association(&self.name, name))
    }

    pub fn find_association(&self, name: &str) -> Option<Arc<AssociationDescriptor>> {
        sync::read(&self.associations).get(name)
    }

    /// Every declared association, sorted by name.
    pub fn associations(&self) -> Vec<Arc<AssociationDescriptor>> {
        sync::read(&self.associations).all()
    }

    /// Enables `<name>_attributes` assignment for each named association.
    ///
    /// Fails without declaring anything when one of the names is not an
    /// association of this class.
    pub fn accepts_nested_attributes_for(&self, names: &[&str], options: NestedAttributesOptions) -> Result<()> {
        let descriptors = names
            .iter()
            .map(|name| self.association(name))
            .collect::<Result<Vec<_>>>()?;
        let mut nested = sync::write(&self.nested_attributes);
        for descriptor in descriptors {
            nested.insert(descriptor.name.clone(), options.clone());
        }
        Ok(())
    }

    pub fn accepts_nested_attributes(&self, name: &str) -> bool {
        sync::read(&self.nested_attributes).contains_key(&normalize_name(name))
    }

    pub fn nested_attributes_options(&self, name: &str) -> Option<NestedAttributesOptions> {
        sync::read(&self.nested_attributes).get(&normalize_name(name)).cloned()
    }

    /// Registers a callback run after each successful destroy.
    pub fn after_destroy<F>(&self, hook: F)
    where
        F: Fn(&DocumentRef) -> Result<()> + Send + Sync + 'static,
    {
        sync::write(&self.after_destroy).push(AfterDestroy::Hook(Arc::new(hook)));
    }

    pub(crate) fn run_after_destroy(&self, document: &DocumentRef) -> Result<()> {
        let hooks = sync::read(&self.after_destroy).clone();
        for hook in hooks {
            match hook {
                AfterDestroy::Cascade(name) => self.cascade(document, &name)?,
                AfterDestroy::Hook(hook) => hook(document)?,
            }
        }
        Ok(())
    }

    fn cascade(&self, document: &DocumentRef, name: &str) -> Result<()> {
        let descriptor = self.association(name)?;
        let Some(dependent) = descriptor.dependent().filter(|_| descriptor.cascades()) else {
            return Ok(());
        };
        debug!("cascading {dependent:?} from {} into {name}", document.identity_map_key());
        let association = document.association(name)?;
        match dependent {
            Dependent::Destroy => association.destroy_all(),
            Dependent::DeleteAll => association.delete_all().map(|_| ()),
            Dependent::Nullify => association.nullify(),
        }
    }

    // -- identity map --------------------------------------------------------

    pub fn identity_map(&self) -> Arc<IdentityMap> {
        Arc::clone(&sync::read(&self.identity_map))
    }

    /// Points this class at `map`, aliasing it with every class using the
    /// same map. Subclasses created afterwards inherit it.
    pub fn set_identity_map(&self, map: Arc<IdentityMap>) {
        *sync::write(&self.identity_map) = map;
    }

    pub fn identity_map_enabled(&self) -> bool {
        self.identity_map_enabled
    }

    pub fn identity_map_key(&self, id: &str) -> String {
        identity_key(&self.name, id)
    }

    fn mapped(&self, id: &str) -> Option<DocumentRef> {
        if self.embeddable || !self.identity_map_enabled {
            return None;
        }
        let found = self.identity_map().get(&self.name, id);
        debug!(
            "identity map {} for {}",
            if found.is_some() { "hit" } else { "miss" },
            self.identity_map_key(id)
        );
        found
    }

    // -- construction --------------------------------------------------------

    /// New, unsaved document with a fresh id.
    pub fn build(self: &Arc<Self>, attributes: impl Into<Value>) -> Result<DocumentRef> {
        let document = self.build_deferred(into_attributes(attributes.into())?)?;
        document.flush_deferred()?;
        Ok(document)
    }

    /// Like [`build`](Self::build), but writes to other documents stay
    /// queued on the new document.
    pub(crate) fn build_deferred(self: &Arc<Self>, attributes: Attributes) -> Result<DocumentRef> {
        let mut initial = Attributes::new();
        initial.insert(ID_KEY.to_string(), Value::String(generate_document_id()));
        if self.parent.is_some() {
            initial.insert(TYPE_KEY.to_string(), Value::String(self.name.clone()));
        }
        let document = DocumentRef::new(Arc::clone(self), initial, true);
        document.write().assign(attributes)?;
        Ok(document)
    }

    /// Builds and saves a top-level document.
    pub fn create(self: &Arc<Self>, attributes: impl Into<Value>) -> Result<DocumentRef> {
        if self.embeddable {
            return Err(MapperError::invalid_operation(format!(
                "{} is embeddable and is created through its owner",
                self.name
            )));
        }
        let document = self.build(attributes)?;
        document.save()?;
        Ok(document)
    }

    /// Wraps stored attributes without consulting the identity map.
    pub(crate) fn instantiate(self: &Arc<Self>, mut raw: Attributes) -> DocumentRef {
        normalize_stored_id(&mut raw);
        let class = self.concrete_class(&raw);
        DocumentRef::new(class, raw, false)
    }

    /// Turns stored attributes into the live document for their id.
    ///
    /// When an instance for (class, id) is already mapped it is returned
    /// unchanged; otherwise a new instance is created and mapped.
    pub fn load(self: &Arc<Self>, raw: impl Into<Value>) -> Result<DocumentRef> {
        Ok(self.load_raw(into_attributes(raw.into())?))
    }

    pub(crate) fn load_raw(self: &Arc<Self>, mut raw: Attributes) -> DocumentRef {
        normalize_stored_id(&mut raw);
        let class = self.concrete_class(&raw);
        let Some(id) = id_from_attributes(&raw) else {
            return DocumentRef::new(class, raw, false);
        };
        if class.embeddable || !class.identity_map_enabled {
            return DocumentRef::new(class, raw, false);
        }
        if let Some(existing) = class.mapped(&id) {
            return existing;
        }
        let map = class.identity_map();
        let document = DocumentRef::new(Arc::clone(&class), raw, false);
        map.get_or_insert(&class.name, &id, document)
    }

    /// Class named by the stored `_type`, falling back to `self`.
    fn concrete_class(self: &Arc<Self>, raw: &Attributes) -> Arc<DocumentClass> {
        let Some(type_name) = raw.get(TYPE_KEY).and_then(Value::as_str) else {
            return Arc::clone(self);
        };
        if type_name == self.name {
            return Arc::clone(self);
        }
        match self.resolve_class(type_name) {
            Ok(class) => class,
            Err(err) => {
                warn!("{err}; loading as {}", self.name);
                Arc::clone(self)
            }
        }
    }

    // -- finders -------------------------------------------------------------

    fn ensure_collection(&self) -> Result<()> {
        if self.embeddable {
            return Err(MapperError::invalid_operation(format!(
                "{} is embeddable and has no collection of its own",
                self.name
            )));
        }
        Ok(())
    }

    /// Names of this class and every registered subclass.
    pub fn type_names(&self) -> Vec<String> {
        let mut names = vec![self.name.clone()];
        if let Ok(catalog) = self.catalog() {
            names.extend(catalog.descendants_of(&self.name));
        }
        names
    }

    /// Restricts queries issued by a subclass to its own documents.
    fn scoped(&self, query: &Query) -> Query {
        if self.parent.is_none() {
            return query.clone();
        }
        query.clone().any_of(TYPE_KEY, self.type_names())
    }

    fn accepts(&self, raw: &Attributes) -> bool {
        self.parent.is_none() || self.scoped(&Query::new()).matches(raw)
    }

    /// Finds by id, answering from the identity map when possible.
    pub fn find(self: &Arc<Self>, id: &str) -> Result<Option<DocumentRef>> {
        self.ensure_collection()?;
        if let Some(document) = self.mapped(id) {
            return Ok(Some(document));
        }
        debug!("querying {} for {id}", self.collection);
        match self.store.find_one(&self.collection, id)? {
            Some(raw) if self.accepts(&raw) => Ok(Some(self.load_raw(raw))),
            _ => Ok(None),
        }
    }

    /// Finds several ids, querying the store only for ids that are not
    /// already mapped. Results follow the order of `ids`; missing ids are
    /// skipped.
    pub fn find_many<S: AsRef<str>>(self: &Arc<Self>, ids: &[S]) -> Result<Vec<DocumentRef>> {
        self.ensure_collection()?;
        let mut found: HashMap<String, DocumentRef> = HashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for id in ids.iter().map(AsRef::as_ref) {
            if found.contains_key(id) || missing.iter().any(|m| m == id) {
                continue;
            }
            match self.mapped(id) {
                Some(document) => {
                    found.insert(id.to_string(), document);
                }
                None => missing.push(id.to_string()),
            }
        }

        if !missing.is_empty() {
            debug!("querying {} for {} unmapped id(s)", self.collection, missing.len());
            for raw in self.store.find_ids(&self.collection, &missing)? {
                if self.accepts(&raw) {
                    let document = self.load_raw(raw);
                    found.insert(document.id(), document);
                }
            }
        }

        Ok(ids.iter().filter_map(|id| found.get(id.as_ref()).cloned()).collect())
    }

    pub fn first(self: &Arc<Self>, query: &Query) -> Result<Option<DocumentRef>> {
        if let Some(id) = query.only_id() {
            return self.find(&id);
        }
        Ok(self.all(query)?.into_iter().next())
    }

    /// Every document matching `query`.
    ///
    /// Queries constrained by `_id` answer mapped ids from memory (checked
    /// against the remaining conditions) and only fetch the rest.
    pub fn all(self: &Arc<Self>, query: &Query) -> Result<Vec<DocumentRef>> {
        self.ensure_collection()?;
        let query = self.scoped(query);

        if let Some(ids) = query.ids()
            && self.identity_map_enabled
        {
            let rest = query.without(ID_KEY);
            let mut found: HashMap<String, DocumentRef> = HashMap::new();
            let mut missing: Vec<String> = Vec::new();
            for id in &ids {
                match self.mapped(id) {
                    Some(document) if document.matches(&rest) => {
                        found.insert(id.clone(), document);
                    }
                    Some(_) => {}
                    None => missing.push(id.clone()),
                }
            }
            if !missing.is_empty() {
                let remaining = rest.any_of(ID_KEY, missing);
                for raw in self.store.find(&self.collection, &remaining)? {
                    let document = self.load_raw(raw);
                    found.insert(document.id(), document);
                }
            }
            return Ok(ids.iter().filter_map(|id| found.remove(id)).collect());
        }

        debug!("querying {} with {} condition(s)", self.collection, query.conditions().len());
        let rows = self.store.find(&self.collection, &query)?;
        Ok(rows.into_iter().map(|raw| self.load_raw(raw)).collect())
    }

    pub fn count(&self, query: &Query) -> Result<u64> {
        self.ensure_collection()?;
        self.store.count(&self.collection, &self.scoped(query))
    }
}

impl fmt::Debug for DocumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentClass")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("embeddable", &self.embeddable)
            .field("parent", &self.parent.as_ref().map(|parent| parent.name()))
            .finish_non_exhaustive()
    }
}

pub(crate) fn into_attributes(value: Value) -> Result<Attributes> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Attributes::new()),
        other => Err(MapperError::invalid_payload(format!(
            "attributes must be an object, got {other}"
        ))),
    }
}
