/// Identity-map key for a document of `class` with `id`: `"<Class>:<id>"`.
pub fn identity_key(class: &str, id: &str) -> String {
    format!("{class}:{id}")
}

/// Key-construction helpers for the Redis-backed store.
#[derive(Debug, Clone)]
pub struct KeyContext<'a> {
    pub prefix: &'a str,
}

impl<'a> KeyContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }

    pub fn document(&self, collection: &str, id: &str) -> String {
        format!("{}:{}:{}", self.prefix, collection, id)
    }

    /// SCAN pattern matching every document of a collection.
    pub fn collection_pattern(&self, collection: &str) -> String {
        format!("{}:{}:*", self.prefix, collection)
    }

    /// Extracts the document id from a key produced by [`KeyContext::document`].
    pub fn id_from_key<'k>(&self, collection: &str, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.prefix)?
            .strip_prefix(':')?
            .strip_prefix(collection)?
            .strip_prefix(':')
    }
}
