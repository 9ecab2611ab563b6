//! Key/value store
//!
//! All coordinator records are JSON values in a single ordered key space.
//! Keys start with the record kind followed by ids, which makes "all streams
//! of a step" or "all lines of a stream" a prefix scan.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("could not decode record {key}: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },

    #[error("could not encode record {key}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Stores `value` only if `key` is free; returns whether it was stored
    async fn put_if_absent(&self, key: &str, value: Value) -> StoreResult<bool>;

    async fn get(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Returns whether the key existed
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Entries whose key starts with `prefix`, in key order
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Value)>>;

    /// First entry whose key starts with `prefix` and ends with `suffix`
    async fn find_by_suffix(&self, prefix: &str, suffix: &str)
    -> StoreResult<Option<(String, Value)>>;
}

pub async fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, record: &T) -> StoreResult<()> {
    store.put(key, encode(key, record)?).await
}

/// Like `put_json`, but never replaces an existing record
pub async fn insert_json<T: Serialize>(
    store: &dyn KvStore,
    key: &str,
    record: &T,
) -> StoreResult<bool> {
    store.put_if_absent(key, encode(key, record)?).await
}

fn encode<T: Serialize>(key: &str, record: &T) -> StoreResult<Value> {
    serde_json::to_value(record).map_err(|source| StoreError::Encode {
        key: key.to_string(),
        source,
    })
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(key).await? {
        Some(value) => decode(key, value).map(Some),
        None => Ok(None),
    }
}

pub async fn scan_json<T: DeserializeOwned>(store: &dyn KvStore, prefix: &str) -> StoreResult<Vec<T>> {
    store
        .scan_prefix(prefix)
        .await?
        .into_iter()
        .map(|(key, value)| decode(&key, value))
        .collect()
}

pub fn decode<T: DeserializeOwned>(key: &str, value: Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|source| StoreError::Decode {
        key: key.to_string(),
        source,
    })
}

// =============================================================================
// Key space
// =============================================================================

pub mod keys {
    use super::Uuid;

    pub fn build(build_id: Uuid) -> String {
        format!("build-{build_id}")
    }

    pub fn builds() -> &'static str {
        "build-"
    }

    pub fn build_step(build_id: Uuid, step_id: Uuid) -> String {
        format!("buildStep-{build_id}-{step_id}")
    }

    pub fn build_steps(build_id: Uuid) -> String {
        format!("buildStep-{build_id}-")
    }

    pub fn stream(step_id: Uuid, stream_id: Uuid) -> String {
        format!("stream-{step_id}-{stream_id}")
    }

    pub fn streams(step_id: Uuid) -> String {
        format!("stream-{step_id}-")
    }

    /// Line numbers are zero padded so key order is line order
    pub fn stream_line(stream_id: Uuid, line_number: u64) -> String {
        format!("streamLine-{stream_id}-{line_number:020}")
    }

    pub fn stream_lines(stream_id: Uuid) -> String {
        format!("streamLine-{stream_id}-")
    }

    pub fn project(project_id: Uuid) -> String {
        format!("project-{project_id}")
    }

    pub fn commit(commit_id: Uuid) -> String {
        format!("commit-{commit_id}")
    }

    pub fn task(task_id: Uuid) -> String {
        format!("task-{task_id}")
    }

    pub fn tasks() -> &'static str {
        "task-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_keys_sort_numerically() {
        let id = Uuid::new_v4();
        let mut keys = vec![
            keys::stream_line(id, 10),
            keys::stream_line(id, 2),
            keys::stream_line(id, 1),
        ];
        keys.sort();
        assert_eq!(keys[0], keys::stream_line(id, 1));
        assert_eq!(keys[2], keys::stream_line(id, 10));
        assert!(keys[0].starts_with(&keys::stream_lines(id)));
    }

    #[test]
    fn test_build_prefix_does_not_match_steps() {
        let id = Uuid::new_v4();
        assert!(!keys::build_step(id, id).starts_with(keys::builds()));
    }
}
