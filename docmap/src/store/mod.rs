//! Storage collaborator contract and its backends.
//!
//! The mapper only needs a handful of synchronous operations per collection;
//! everything else (query planning, wire protocol) lives behind [`Store`].

mod memory;
mod redis_store;

pub use memory::{MemoryStore, StoreOperation};
pub use redis_store::RedisStore;

use serde_json::Value;

use crate::{
    errors::Result,
    id::{ID_KEY, id_string},
    value::Attributes,
};

/// Minimal synchronous document store.
///
/// Every call returns a fully resolved result or fails; timeouts belong to
/// the implementation.
pub trait Store: Send + Sync {
    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Attributes>>;

    /// Fetches the documents with the given ids, in the order of `ids`.
    /// Missing ids are skipped.
    fn find_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Attributes>>;

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Attributes>>;

    fn count(&self, collection: &str, query: &Query) -> Result<u64> {
        Ok(self.find(collection, query)?.len() as u64)
    }

    /// Inserts `document` and returns its id. An id is generated when absent.
    fn insert(&self, collection: &str, document: Attributes) -> Result<String>;

    /// Writes `document` over the stored document with the same `_id`.
    fn update(&self, collection: &str, document: Attributes) -> Result<()>;

    /// Removes every matching document and returns how many were removed.
    fn remove(&self, collection: &str, query: &Query) -> Result<u64>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Field equals the value; `Null` also matches a missing field.
    Eq(Value),
    /// Field equals any of the values.
    In(Vec<Value>),
}

impl Condition {
    fn matches(&self, candidate: Option<&Value>) -> bool {
        match self {
            Condition::Eq(expected) => values_match(expected, candidate),
            Condition::In(options) => options.iter().any(|expected| values_match(expected, candidate)),
        }
    }
}

fn values_match(expected: &Value, candidate: Option<&Value>) -> bool {
    match (expected, candidate) {
        (Value::Null, None) | (Value::Null, Some(Value::Null)) => true,
        (_, None) => false,
        (expected, Some(actual)) if expected == actual => true,
        // ids may be stored as strings or numbers
        (expected, Some(actual)) => {
            is_scalar_id(expected) && is_scalar_id(actual) && id_string(expected) == id_string(actual)
        }
    }
}

fn is_scalar_id(value: &Value) -> bool {
    value.is_string() || value.is_number()
}

/// Conjunction of field conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<(String, Condition)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(ID_KEY, Value::String(id.into()))
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((field.into(), Condition::Eq(value.into())));
        self
    }

    pub fn any_of<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.conditions.push((field.into(), Condition::In(values)));
        self
    }

    pub fn conditions(&self) -> &[(String, Condition)] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn condition(&self, field: &str) -> Option<&Condition> {
        self.conditions.iter().find(|(name, _)| name == field).map(|(_, condition)| condition)
    }

    /// Copy of the query without conditions on `field`.
    pub fn without(&self, field: &str) -> Self {
        Self {
            conditions: self.conditions.iter().filter(|(name, _)| name != field).cloned().collect(),
        }
    }

    /// Ids named by an `_id` condition, if the query has one.
    pub fn ids(&self) -> Option<Vec<String>> {
        match self.condition(ID_KEY)? {
            Condition::Eq(value) => Some(id_string(value).into_iter().collect()),
            Condition::In(values) => Some(values.iter().filter_map(id_string).collect()),
        }
    }

    /// The single id of a query that constrains nothing but `_id` equality.
    pub fn only_id(&self) -> Option<String> {
        match self.conditions.as_slice() {
            [(field, Condition::Eq(value))] if field == ID_KEY => id_string(value),
            _ => None,
        }
    }

    pub fn matches(&self, document: &Attributes) -> bool {
        self.conditions
            .iter()
            .all(|(field, condition)| condition.matches(document.get(field)))
    }
}
