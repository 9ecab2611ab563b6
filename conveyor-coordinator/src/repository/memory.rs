//! In-memory store
//!
//! Used when no database is configured and in tests.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::store::{KvStore, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn put(&self, key: &str, value: Value) -> StoreResult<()> {
        self.entries.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Value) -> StoreResult<bool> {
        match self.entries.write().entry(key.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn find_by_suffix(
        &self,
        prefix: &str,
        suffix: &str,
    ) -> StoreResult<Option<(String, Value)>> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .find(|(key, _)| key.ends_with(suffix))
            .map(|(key, value)| (key.clone(), value.clone())))
    }
}
