//! Main entry point: owns the store, the class catalog and the default
//! identity map.
//!
//! # Example
//! ```ignore
//! let mapper = Mapper::in_memory();
//! let player = mapper.define_embedded("Player")?;
//! let team = mapper.define("Team")?;
//! team.many("players", AssociationOptions::new())?;
//! team.accepts_nested_attributes_for(&["players"], NestedAttributesOptions::new().allow_destroy(true))?;
//!
//! let team = team.create(json!({"name": "Bears", "players_attributes": [{"name": "Koda"}]}))?;
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use log::debug;

use crate::{
    class::{ClassContext, DocumentClass},
    config::{ClassSettings, MapperConfig, StoreBackend},
    errors::{MapperError, Result},
    identity_map::IdentityMap,
    store::{MemoryStore, RedisStore, Store},
    sync,
    types::{AssociationOptions, NestedAttributesOptions, RejectIf},
    value::tableize,
};

/// Every class defined by one mapper, by name.
#[derive(Debug, Default)]
pub struct Catalog {
    classes: RwLock<HashMap<String, Arc<DocumentClass>>>,
}

impl Catalog {
    pub(crate) fn register(&self, class: Arc<DocumentClass>) -> Result<()> {
        let mut classes = sync::write(&self.classes);
        if classes.contains_key(class.name()) {
            return Err(MapperError::invalid_operation(format!(
                "class {} is already defined",
                class.name()
            )));
        }
        classes.insert(class.name().to_string(), class);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<DocumentClass>> {
        sync::read(&self.classes).get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = sync::read(&self.classes).keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of every class inheriting (directly or not) from `name`.
    pub fn descendants_of(&self, name: &str) -> Vec<String> {
        let mut names: Vec<_> = sync::read(&self.classes)
            .values()
            .filter(|class| class.name() != name && class.is_a(name))
            .map(|class| class.name().to_string())
            .collect();
        names.sort();
        names
    }
}

struct MapperInner {
    store: Arc<dyn Store>,
    catalog: Arc<Catalog>,
    identity_map: Arc<IdentityMap>,
    config: MapperConfig,
}

/// Cheap to clone; clones share the store, classes and identity map.
#[derive(Clone)]
pub struct Mapper {
    inner: Arc<MapperInner>,
}

impl Mapper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, MapperConfig::default())
    }

    /// Mapper over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_config(store: Arc<dyn Store>, config: MapperConfig) -> Self {
        Self {
            inner: Arc::new(MapperInner {
                store,
                catalog: Arc::new(Catalog::default()),
                identity_map: Arc::new(IdentityMap::new()),
                config,
            }),
        }
    }

    /// Connects the configured store and declares every configured class.
    pub fn from_config(config: MapperConfig) -> Result<Self> {
        let store: Arc<dyn Store> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryStore::new()),
            StoreBackend::Redis => Arc::new(RedisStore::connect(&config.store.url, &config.store.prefix)?),
        };
        let mapper = Self::with_config(store, config.clone());
        mapper.declare_classes(&config.classes)?;
        Ok(mapper)
    }

    fn declare_classes(&self, classes: &[ClassSettings]) -> Result<()> {
        // Parents must exist before their subclasses; defer until they do.
        let mut pending: Vec<&ClassSettings> = classes.iter().collect();
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            for settings in pending {
                match &settings.parent {
                    Some(parent) => match self.class(parent) {
                        Some(parent) => {
                            parent.inherit(&settings.name)?;
                        }
                        None => deferred.push(settings),
                    },
                    None if settings.embeddable => {
                        self.define_embedded(&settings.name)?;
                    }
                    None => {
                        let collection = settings.collection.clone().unwrap_or_else(|| tableize(&settings.name));
                        self.define_in(&settings.name, &collection)?;
                    }
                }
            }
            if deferred.len() == before {
                let names: Vec<_> = deferred.iter().map(|s| s.name.as_str()).collect();
                return Err(MapperError::config(format!("unresolvable parent classes for {names:?}")));
            }
            pending = deferred;
        }

        // Declarations run parent-first so subclasses pick up their parent's.
        let mut ordered: Vec<(Arc<DocumentClass>, &ClassSettings)> = classes
            .iter()
            .map(|settings| {
                self.class(&settings.name)
                    .map(|class| (class, settings))
                    .ok_or_else(|| MapperError::UnknownClass { name: settings.name.clone() })
            })
            .collect::<Result<_>>()?;
        ordered.sort_by_key(|(class, _)| ancestry_depth(class));

        for (class, settings) in ordered {
            class.copy_parent_declarations();
            for association in &settings.associations {
                let options = AssociationOptions::from_map(&association.options)?;
                class.declare(association.kind, &association.name, options)?;
            }
            for nested in &settings.nested_attributes {
                let mut options = NestedAttributesOptions::new().allow_destroy(nested.allow_destroy);
                if let Some(reject_if) = &nested.reject_if {
                    options = options.reject_if(reject_if.parse::<RejectIf>()?);
                }
                let names: Vec<&str> = nested.associations.iter().map(String::as_str).collect();
                class.accepts_nested_attributes_for(&names, options)?;
            }
            debug!("declared {} from config", settings.name);
        }
        Ok(())
    }

    pub fn config(&self) -> &MapperConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Identity map shared by every class that was not pointed elsewhere.
    pub fn identity_map(&self) -> &Arc<IdentityMap> {
        &self.inner.identity_map
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.inner.catalog
    }

    fn context(&self) -> ClassContext {
        ClassContext {
            store: Arc::clone(&self.inner.store),
            catalog: Arc::downgrade(&self.inner.catalog),
            identity_map: Arc::clone(&self.inner.identity_map),
            identity_map_enabled: self.inner.config.identity_map.enabled,
        }
    }

    /// Defines a top-level class stored in the tableized collection of its name.
    pub fn define(&self, name: &str) -> Result<Arc<DocumentClass>> {
        self.define_in(name, &tableize(name))
    }

    pub fn define_in(&self, name: &str, collection: &str) -> Result<Arc<DocumentClass>> {
        let class = Arc::new(DocumentClass::new(name, collection, false, self.context()));
        self.inner.catalog.register(Arc::clone(&class))?;
        Ok(class)
    }

    /// Defines a class whose documents only live inside an owner.
    pub fn define_embedded(&self, name: &str) -> Result<Arc<DocumentClass>> {
        let class = Arc::new(DocumentClass::new(name, "", true, self.context()));
        self.inner.catalog.register(Arc::clone(&class))?;
        Ok(class)
    }

    pub fn class(&self, name: &str) -> Option<Arc<DocumentClass>> {
        self.inner.catalog.get(name)
    }

    pub fn classes(&self) -> Vec<Arc<DocumentClass>> {
        self.inner
            .catalog
            .names()
            .iter()
            .filter_map(|name| self.inner.catalog.get(name))
            .collect()
    }
}

impl fmt::Debug for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<String> = self.classes().iter().map(|class| class.name().to_string()).collect();
        f.debug_struct("Mapper")
            .field("classes", &classes)
            .field("identity_map", &self.inner.identity_map)
            .finish_non_exhaustive()
    }
}

fn ancestry_depth(class: &DocumentClass) -> usize {
    class.parent().map_or(0, |parent| 1 + ancestry_depth(parent))
}
