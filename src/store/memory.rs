//! In-memory document store for tests.
//!
//! Supports fault injection: forced version conflicts to exercise the
//! atomic-update retry loop, and a hang switch to exercise save timeouts.

use super::{DocumentStore, StoreError};
use crate::queue::TaskQueue;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, TaskQueue>>,
    /// Number of upcoming puts to fail with a version mismatch.
    conflicts_to_inject: AtomicUsize,
    /// When set, puts stall long enough to trip any sane save timeout.
    hang_puts: AtomicBool,
    puts_attempted: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` puts with `VersionMismatch`, regardless of the
    /// actual stored version.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Make subsequent puts stall (for save-timeout tests).
    pub fn set_hang_puts(&self, hang: bool) {
        self.hang_puts.store(hang, Ordering::SeqCst);
    }

    /// Total puts attempted, including injected failures.
    pub fn puts_attempted(&self) -> usize {
        self.puts_attempted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, player_id: &str) -> Result<Option<TaskQueue>, StoreError> {
        Ok(self.docs.lock().unwrap().get(player_id).cloned())
    }

    async fn put(
        &self,
        queue: &TaskQueue,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        self.puts_attempted.fetch_add(1, Ordering::SeqCst);

        if self.hang_puts.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
        }

        if self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::VersionMismatch {
                expected: expected_version,
                actual: None,
            });
        }

        let mut docs = self.docs.lock().unwrap();
        let actual = docs.get(&queue.player_id).map(|q| q.version);
        if actual != expected_version {
            return Err(StoreError::VersionMismatch {
                expected: expected_version,
                actual,
            });
        }
        docs.insert(queue.player_id.clone(), queue.clone());
        Ok(())
    }

    async fn delete(&self, player_id: &str) -> Result<(), StoreError> {
        self.docs.lock().unwrap().remove(player_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conditional_put_enforces_versions() {
        let store = MemoryStore::new();
        let mut q = TaskQueue::new("p1", 0);
        q.version = 1;

        store.put(&q, None).await.expect("initial insert");

        // Re-inserting as if absent must conflict.
        let err = store.put(&q, None).await.unwrap_err();
        assert!(err.is_conflict());

        q.version = 2;
        store.put(&q, Some(1)).await.expect("conditional update");

        let err = store.put(&q, Some(1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn injected_conflicts_consume_themselves() {
        let store = MemoryStore::new();
        let mut q = TaskQueue::new("p1", 0);
        q.version = 1;

        store.inject_conflicts(1);
        assert!(store.put(&q, None).await.is_err());
        store.put(&q, None).await.expect("second attempt succeeds");
    }
}
