//! RedisJSON-backed store.
//!
//! Documents live at `{prefix}:{collection}:{id}` as JSON values. Queries
//! scan the collection's keys and filter in process; there is no secondary
//! index at this layer.

use std::sync::Mutex;

use redis::{Connection, cmd};
use serde_json::Value;

use super::{Query, Store};
use crate::{
    errors::{MapperError, Result},
    id::{ensure_id, id_from_attributes},
    keys::KeyContext,
    sync,
    value::Attributes,
};

const SCAN_COUNT: usize = 1000;

pub struct RedisStore {
    conn: Mutex<Connection>,
    prefix: String,
}

impl RedisStore {
    /// Opens a blocking connection to the Redis server at `url`.
    pub fn connect(url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection()?;
        Ok(Self::new(conn, prefix))
    }

    pub fn new(conn: Connection, prefix: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(conn),
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix)
    }

    fn get(&self, conn: &mut Connection, key: &str) -> Result<Option<Attributes>> {
        let raw: Option<String> = cmd("JSON.GET").arg(key).query(conn)?;
        match raw {
            Some(json) => match serde_json::from_str::<Value>(&json)? {
                Value::Object(map) => Ok(Some(map)),
                _ => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn set(&self, conn: &mut Connection, key: &str, document: &Attributes) -> Result<()> {
        let json = serde_json::to_string(document)?;
        let _: () = cmd("JSON.SET").arg(key).arg("$").arg(json).query(conn)?;
        Ok(())
    }

    /// Every document key of `collection`, via SCAN so the server is never blocked.
    fn scan(&self, conn: &mut Connection, collection: &str) -> Result<Vec<String>> {
        let pattern = self.keys().collection_pattern(collection);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query(conn)?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    fn matching(&self, conn: &mut Connection, collection: &str, query: &Query) -> Result<Vec<(String, Attributes)>> {
        let keys = match query.ids() {
            Some(ids) => ids.iter().map(|id| self.keys().document(collection, id)).collect(),
            None => self.scan(conn, collection)?,
        };
        let mut matching = Vec::new();
        for key in keys {
            if let Some(document) = self.get(conn, &key)?
                && query.matches(&document)
            {
                matching.push((key, document));
            }
        }
        Ok(matching)
    }
}

impl Store for RedisStore {
    fn find_one(&self, collection: &str, id: &str) -> Result<Option<Attributes>> {
        let mut conn = sync::lock(&self.conn);
        let key = self.keys().document(collection, id);
        self.get(&mut conn, &key)
    }

    fn find_ids(&self, collection: &str, ids: &[String]) -> Result<Vec<Attributes>> {
        let mut conn = sync::lock(&self.conn);
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            let key = self.keys().document(collection, id);
            if let Some(document) = self.get(&mut conn, &key)? {
                found.push(document);
            }
        }
        Ok(found)
    }

    fn find(&self, collection: &str, query: &Query) -> Result<Vec<Attributes>> {
        let mut conn = sync::lock(&self.conn);
        Ok(self
            .matching(&mut conn, collection, query)?
            .into_iter()
            .map(|(_, document)| document)
            .collect())
    }

    fn insert(&self, collection: &str, mut document: Attributes) -> Result<String> {
        let id = ensure_id(&mut document);
        let mut conn = sync::lock(&self.conn);
        let key = self.keys().document(collection, &id);
        self.set(&mut conn, &key, &document)?;
        Ok(id)
    }

    fn update(&self, collection: &str, document: Attributes) -> Result<()> {
        let id = id_from_attributes(&document).ok_or_else(|| MapperError::InvalidOperation {
            message: format!("cannot update a {collection} document without an `_id`"),
        })?;
        let mut conn = sync::lock(&self.conn);
        let key = self.keys().document(collection, &id);
        self.set(&mut conn, &key, &document)
    }

    fn remove(&self, collection: &str, query: &Query) -> Result<u64> {
        let mut conn = sync::lock(&self.conn);
        let keys: Vec<String> = self
            .matching(&mut conn, collection, query)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted: u64 = cmd("DEL").arg(&keys).query(&mut *conn)?;
        Ok(deleted)
    }
}
