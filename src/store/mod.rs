//! Persistence abstraction: a keyed document store with conditional writes.
//!
//! The engine treats storage as a per-player document keyed by player id.
//! The only hard requirements are get-by-key and a conditional put whose
//! version-mismatch failure is distinguishable from other errors. That
//! distinction is what the optimistic-concurrency loop keys off.

pub mod cache;
pub mod memory;
pub mod sqlite;

use crate::queue::TaskQueue;
use async_trait::async_trait;

pub use cache::QueueCache;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The conditional write predicate failed: another writer got there
    /// first (or the document unexpectedly exists / is missing).
    #[error("version mismatch: expected {expected:?}, found {actual:?}")]
    VersionMismatch {
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionMismatch { .. })
    }
}

/// Keyed document store for queue documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the persisted queue for a player, if any.
    async fn get(&self, player_id: &str) -> Result<Option<TaskQueue>, StoreError>;

    /// Conditionally persist a queue. The write succeeds only when the
    /// stored version equals `expected_version`; `None` means the document
    /// must not exist yet. The queue's own `version` field is the new
    /// version being written.
    async fn put(&self, queue: &TaskQueue, expected_version: Option<u64>)
        -> Result<(), StoreError>;

    /// Remove a player's document. Missing documents are not an error.
    async fn delete(&self, player_id: &str) -> Result<(), StoreError>;
}
