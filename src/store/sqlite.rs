//! SQLite-backed document store.
//!
//! Reference persistence backend: one row per player holding the queue
//! document as JSON plus a version column for the conditional write.

use super::{DocumentStore, StoreError};
use crate::queue::TaskQueue;
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Database handle wrapping a SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL for concurrent access from ticks and player actions
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations()?;

        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        store.run_migrations()?;

        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        embedded::migrations::runner().run(&mut *conn)?;
        Ok(())
    }

    /// Execute a function with exclusive access to the connection.
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }

    fn current_version(conn: &Connection, player_id: &str) -> Result<Option<u64>> {
        let version: Option<i64> = conn
            .query_row(
                "SELECT version FROM queues WHERE player_id = ?1",
                params![player_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version.map(|v| v as u64))
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, player_id: &str) -> Result<Option<TaskQueue>, StoreError> {
        let body: Option<String> = self
            .with_conn(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM queues WHERE player_id = ?1",
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

    async fn put(
        &self,
        queue: &TaskQueue,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(queue)?;
        let player_id = queue.player_id.clone();
        let new_version = queue.version as i64;
        let updated_at = queue.last_updated;

        let outcome: Result<Result<(), StoreError>> = self.with_conn(|conn| {
            match expected_version {
                None => {
                    let inserted = conn.execute(
                        "INSERT INTO queues (player_id, version, body, updated_at)
                         VALUES (?1, ?2, ?3, ?4)
                         ON CONFLICT(player_id) DO NOTHING",
                        params![player_id, new_version, body, updated_at],
                    )?;
                    if inserted == 0 {
                        let actual = Self::current_version(conn, &player_id)?;
                        return Ok(Err(StoreError::VersionMismatch {
                            expected: None,
                            actual,
                        }));
                    }
                }
                Some(expected) => {
                    let updated = conn.execute(
                        "UPDATE queues SET version = ?1, body = ?2, updated_at = ?3
                         WHERE player_id = ?4 AND version = ?5",
                        params![new_version, body, updated_at, player_id, expected as i64],
                    )?;
                    if updated == 0 {
                        let actual = Self::current_version(conn, &player_id)?;
                        return Ok(Err(StoreError::VersionMismatch {
                            expected: Some(expected),
                            actual,
                        }));
                    }
                }
            }
            Ok(Ok(()))
        });

        outcome.map_err(StoreError::Backend)?
    }

    async fn delete(&self, player_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM queues WHERE player_id = ?1", params![player_id])?;
            Ok(())
        })
        .map_err(StoreError::Backend)
    }
}
