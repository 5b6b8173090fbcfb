use std::{collections::HashMap, sync::Arc};

use crate::types::AssociationDescriptor;

/// Per-class mapping from association name to descriptor.
///
/// Cloning produces an independent copy: subclasses receive a clone when they
/// are created, so later declarations on either class stay isolated.
#[derive(Debug, Clone, Default)]
pub struct AssociationRegistry {
    associations: HashMap<String, Arc<AssociationDescriptor>>,
}

/// Association names are matched case-insensitively, ignoring a leading `:`.
pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().trim_start_matches(':').to_ascii_lowercase()
}

impl AssociationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `descriptor`, replacing any previous declaration of the same name.
    pub fn insert(&mut self, descriptor: AssociationDescriptor) -> Arc<AssociationDescriptor> {
        let descriptor = Arc::new(descriptor);
        self.associations
            .insert(normalize_name(&descriptor.name), Arc::clone(&descriptor));
        descriptor
    }

    pub fn get(&self, name: &str) -> Option<Arc<AssociationDescriptor>> {
        self.associations.get(&normalize_name(name)).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.associations.contains_key(&normalize_name(name))
    }

    pub fn all(&self) -> Vec<Arc<AssociationDescriptor>> {
        let mut all: Vec<_> = self.associations.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.associations.is_empty()
    }
}
