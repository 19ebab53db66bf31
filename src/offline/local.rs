//! Durable client-side storage for the offline mirror and pending
//! operations. Small key-value surface so the same manager logic runs
//! against any embedded storage.

use crate::queue::TaskQueue;
use crate::store::{SqliteStore, StoreError};
use crate::types::OfflineOperation;
use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-player offline state persisted on the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineRecord {
    pub mirror: TaskQueue,
    pub pending: Vec<OfflineOperation>,
    pub last_online_sync: i64,
}

impl OfflineRecord {
    pub fn new(mirror: TaskQueue) -> Self {
        Self {
            mirror,
            pending: Vec::new(),
            last_online_sync: 0,
        }
    }
}

/// Durable key-value store keyed by player id.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, player_id: &str) -> Result<Option<OfflineRecord>, StoreError>;
    async fn set(&self, player_id: &str, record: &OfflineRecord) -> Result<(), StoreError>;
    async fn delete(&self, player_id: &str) -> Result<(), StoreError>;
    /// Players with a stored record, for the reconnect sync pass.
    async fn list_players(&self) -> Result<Vec<String>, StoreError>;
}

/// In-memory local store for tests.
#[derive(Default)]
pub struct MemoryLocalStore {
    records: Mutex<HashMap<String, OfflineRecord>>,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, player_id: &str) -> Result<Option<OfflineRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(player_id).cloned())
    }

    async fn set(&self, player_id: &str, record: &OfflineRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .unwrap()
            .insert(player_id.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, player_id: &str) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(player_id);
        Ok(())
    }

    async fn list_players(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.records.lock().unwrap().keys().cloned().collect())
    }
}

/// SQLite-backed local store, sharing the engine's database handling.
#[derive(Clone)]
pub struct SqliteLocalStore {
    db: SqliteStore,
}

impl SqliteLocalStore {
    pub fn open<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self {
            db: SqliteStore::open(path)?,
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            db: SqliteStore::open_in_memory()?,
        })
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, player_id: &str) -> Result<Option<OfflineRecord>, StoreError> {
        let body: Option<String> = self
            .db
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM offline_state WHERE player_id = ?1",
                        params![player_id],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .map_err(StoreError::Backend)?;

        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, player_id: &str, record: &OfflineRecord) -> Result<(), StoreError> {
        let body = serde_json::to_string(record)?;
        let updated_at = record.mirror.last_updated;
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO offline_state (player_id, body, updated_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(player_id) DO UPDATE SET body = ?2, updated_at = ?3",
                    params![player_id, body, updated_at],
                )?;
                Ok(())
            })
            .map_err(StoreError::Backend)
    }

    async fn delete(&self, player_id: &str) -> Result<(), StoreError> {
        self.db
            .with_conn(|conn| {
                conn.execute(
                    "DELETE FROM offline_state WHERE player_id = ?1",
                    params![player_id],
                )?;
                Ok(())
            })
            .map_err(StoreError::Backend)
    }

    async fn list_players(&self) -> Result<Vec<String>, StoreError> {
        self.db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT player_id FROM offline_state")?;
                let players = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(players)
            })
            .map_err(StoreError::Backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sqlite_local_store_round_trip() {
        let store = SqliteLocalStore::open_in_memory().expect("open");
        let record = OfflineRecord::new(TaskQueue::new("p1", 0));

        store.set("p1", &record).await.expect("set");
        let loaded = store.get("p1").await.expect("get").expect("present");
        assert_eq!(loaded.mirror.player_id, "p1");
        assert!(loaded.pending.is_empty());

        assert_eq!(store.list_players().await.unwrap(), vec!["p1"]);

        store.delete("p1").await.expect("delete");
        assert!(store.get("p1").await.unwrap().is_none());
    }
}
