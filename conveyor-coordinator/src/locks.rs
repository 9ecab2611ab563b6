//! Per-key async locks
//!
//! Read-modify-write sequences on one record (a build, a builder) run under
//! the lock for its key. Locks are created on first use and dropped once no
//! one holds or waits for them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Holds the lock for one key until dropped
pub struct KeyGuard<'a> {
    key: String,
    owner: &'a KeyLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: impl Into<String>) -> KeyGuard<'_> {
        let key = key.into();
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        let guard = mutex.lock_owned().await;
        KeyGuard {
            key,
            owner: self,
            guard: Some(guard),
        }
    }

    fn release(&self, key: &str) {
        let mut locks = self.locks.lock();
        // Only the map still references the mutex: nobody holds or awaits it
        if locks.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.owner.release(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let counter = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.lock("build-1").await;

        let task = {
            let locks = Arc::clone(&locks);
            let counter = Arc::clone(&counter);
            tokio::spawn(async move {
                let _guard = locks.lock("build-1").await;
                counter.lock().push("second");
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        counter.lock().push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*counter.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock("b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unused_locks_are_dropped() {
        let locks = KeyLocks::new();
        {
            let _guard = locks.lock("a").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }
}
