//! State management: the only path to persistent storage.
//!
//! Every mutation of a queue that might be touched concurrently must flow
//! through [`StateManager::atomic_update`]; reading then writing a queue
//! outside it loses updates.

pub mod integrity;

use crate::checksum;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{QueueStateSnapshot, TaskQueue};
use crate::store::{DocumentStore, QueueCache};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use integrity::{validate_state, RepairAction, StateReport};

/// Owns persistence for queue documents: optimistic versioning, checksums,
/// validation-driven repair, snapshot history, and the atomic
/// read-modify-write loop.
pub struct StateManager {
    store: Arc<dyn DocumentStore>,
    cache: Option<QueueCache>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl StateManager {
    pub fn new(store: Arc<dyn DocumentStore>, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        Self {
            store,
            cache: None,
            clock,
            config,
        }
    }

    /// Enable the read-through cache. Reads served from cache never bypass
    /// the authoritative store for writes.
    pub fn with_cache(mut self) -> Self {
        self.cache = Some(QueueCache::new(self.config.cache_ttl_ms, self.clock.clone()));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Persist a queue: bump version, recompute checksum, append a snapshot,
    /// and perform the conditional write.
    ///
    /// A version mismatch surfaces as [`QueueError::Conflict`]; the in-memory
    /// queue is then stale and the caller must reload (the atomic-update
    /// loop does). Timeouts surface as [`QueueError::Timeout`] and are not
    /// retried here; retry policy belongs to the caller.
    pub async fn save_state(&self, queue: &mut TaskQueue) -> QueueResult<()> {
        let now = self.clock.now_ms();
        let expected = if queue.version == 0 {
            None
        } else {
            Some(queue.version)
        };

        queue.version += 1;
        queue.last_updated = now;
        queue.checksum = checksum::calculate_checksum(queue);

        let snapshot = self.create_snapshot(queue);
        queue.state_history.push(snapshot);
        if queue.state_history.len() > queue.max_history_size {
            let excess = queue.state_history.len() - queue.max_history_size;
            queue.state_history.drain(..excess);
        }

        let timeout_ms = queue.config.save_timeout_ms;
        let write = self.store.put(queue, expected);
        match tokio::time::timeout(Duration::from_millis(timeout_ms), write).await {
            Err(_) => Err(QueueError::Timeout {
                waited_ms: timeout_ms,
            }),
            Ok(Err(err)) if err.is_conflict() => {
                tracing::debug!(
                    player_id = %queue.player_id,
                    expected = ?expected,
                    "save lost to a concurrent writer"
                );
                Err(QueueError::Conflict {
                    player_id: queue.player_id.clone(),
                    expected: expected.unwrap_or(0),
                })
            }
            Ok(Err(err)) => Err(err.into()),
            Ok(Ok(())) => {
                if let Some(ref cache) = self.cache {
                    cache.insert(queue);
                }
                Ok(())
            }
        }
    }

    /// Load a player's queue. Returns `Ok(None)` when the player has never
    /// been persisted. Persisted state is validated before it is returned;
    /// repairable corruption is repaired (and re-saved), critical corruption
    /// surfaces as [`QueueError::Corrupted`].
    pub async fn load_state(&self, player_id: &str) -> QueueResult<Option<TaskQueue>> {
        if let Some(ref cache) = self.cache
            && let Some(queue) = cache.get(player_id)
        {
            return Ok(Some(queue));
        }

        let Some(mut queue) = self.store.get(player_id).await? else {
            return Ok(None);
        };

        let now = self.clock.now_ms();
        let report = integrity::validate_state(&queue, now);
        if !report.is_valid {
            self.repair_state(&mut queue, &report).await?;
        }
        queue.last_validated = now;

        if let Some(ref cache) = self.cache {
            cache.insert(&queue);
        }
        Ok(Some(queue))
    }

    /// Validate a queue's integrity without touching storage.
    pub fn validate_state(&self, queue: &TaskQueue) -> StateReport {
        integrity::validate_state(queue, self.clock.now_ms())
    }

    /// Apply the repair actions from a validation report and re-save.
    ///
    /// Fails with [`QueueError::Corrupted`] when the report carries a
    /// critical error. Every repair is logged; repair never happens silently.
    pub async fn repair_state(
        &self,
        queue: &mut TaskQueue,
        report: &StateReport,
    ) -> QueueResult<Vec<RepairAction>> {
        if !report.can_repair {
            return Err(QueueError::Corrupted {
                player_id: queue.player_id.clone(),
                reason: report
                    .errors
                    .iter()
                    .map(|e| e.message.clone())
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        }

        let now = self.clock.now_ms();
        let applied = integrity::apply_repairs(queue, &report.repair_actions, now);
        tracing::warn!(
            player_id = %queue.player_id,
            actions = ?applied.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            integrity_score = report.integrity_score,
            "repaired queue state"
        );

        self.save_state(queue).await?;
        Ok(applied)
    }

    /// Explicit last resort for state that cannot be loaded or repaired:
    /// replace the player's document with a safe empty queue.
    pub async fn reset_state(&self, player_id: &str) -> QueueResult<TaskQueue> {
        tracing::error!(player_id, "resetting queue to a safe empty state");
        let now = self.clock.now_ms();
        let mut queue = TaskQueue::new(player_id, now);
        queue.config = self.config.queue.clone();

        // The old document may not even deserialize, so remove it rather
        // than guessing at its version.
        self.store.delete(player_id).await?;
        if let Some(ref cache) = self.cache {
            cache.invalidate(player_id);
        }
        self.save_state(&mut queue).await?;
        Ok(queue)
    }

    /// Read-modify-write with optimistic concurrency.
    ///
    /// Loads the current state (creating a default queue for unseen
    /// players), applies `f`, validates, and attempts a version-conditioned
    /// save. On conflict it reloads and retries with exponential backoff
    /// (`base * 2^attempt`), up to the configured attempt budget; `f` runs
    /// once per attempt, so it must be a pure transform of its argument.
    pub async fn atomic_update<F>(&self, player_id: &str, mut f: F) -> QueueResult<TaskQueue>
    where
        F: FnMut(&mut TaskQueue) -> QueueResult<()>,
    {
        let attempts = self.config.atomic_retry_attempts.max(1);
        for attempt in 0..attempts {
            let mut queue = match self.load_for_update(player_id).await? {
                Some(queue) => queue,
                None => {
                    let mut queue = TaskQueue::new(player_id, self.clock.now_ms());
                    queue.config = self.config.queue.clone();
                    queue
                }
            };

            f(&mut queue)?;

            let report = integrity::validate_state_pre_save(&queue, self.clock.now_ms());
            if !report.can_repair {
                return Err(QueueError::Corrupted {
                    player_id: player_id.to_string(),
                    reason: "update produced critically invalid state".into(),
                });
            }

            match self.save_state(&mut queue).await {
                Ok(()) => return Ok(queue),
                Err(QueueError::Conflict { .. }) if attempt + 1 < attempts => {
                    let delay = self.config.atomic_backoff_base_ms * 2u64.pow(attempt);
                    tracing::debug!(player_id, attempt, delay_ms = delay, "retrying after conflict");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(QueueError::Conflict { .. }) => break,
                Err(err) => return Err(err),
            }
        }

        Err(QueueError::AtomicUpdateFailed {
            player_id: player_id.to_string(),
            attempts,
        })
    }

    /// Authoritative load for the update loop: always hits the store, and
    /// repairs recoverable corruption in memory (the upcoming save persists
    /// the repairs).
    async fn load_for_update(&self, player_id: &str) -> QueueResult<Option<TaskQueue>> {
        let Some(mut queue) = self.store.get(player_id).await? else {
            return Ok(None);
        };

        let now = self.clock.now_ms();
        let report = integrity::validate_state(&queue, now);
        if !report.is_valid {
            if !report.can_repair {
                return Err(QueueError::Corrupted {
                    player_id: player_id.to_string(),
                    reason: report
                        .errors
                        .iter()
                        .map(|e| e.message.clone())
                        .collect::<Vec<_>>()
                        .join("; "),
                });
            }
            let applied = integrity::apply_repairs(&mut queue, &report.repair_actions, now);
            tracing::warn!(
                player_id,
                actions = ?applied.iter().map(|a| a.as_str()).collect::<Vec<_>>(),
                "repaired queue state during update"
            );
        }
        Ok(Some(queue))
    }

    /// Id-only snapshot of the queue's current shape.
    pub fn create_snapshot(&self, queue: &TaskQueue) -> QueueStateSnapshot {
        QueueStateSnapshot {
            timestamp: self.clock.now_ms(),
            current_task_id: queue.current_task.as_ref().map(|t| t.id.clone()),
            queued_task_ids: queue.queued_task_ids(),
            is_running: queue.is_running,
            is_paused: queue.is_paused,
            total_tasks_completed: queue.total_tasks_completed,
            checksum: queue.checksum.clone(),
        }
    }

    /// Rewind a queue's ordering and flags to a snapshot.
    ///
    /// Tasks are re-hydrated by id from the currently persisted queue, so
    /// restoring cannot resurrect task content that no longer exists; ids
    /// missing from the live queue are dropped.
    pub async fn restore_from_snapshot(
        &self,
        player_id: &str,
        snapshot: &QueueStateSnapshot,
    ) -> QueueResult<TaskQueue> {
        self.atomic_update(player_id, |queue| {
            let mut pool: HashMap<String, crate::types::Task> = HashMap::new();
            if let Some(task) = queue.current_task.take() {
                pool.insert(task.id.clone(), task);
            }
            for task in queue.queued_tasks.drain(..) {
                pool.insert(task.id.clone(), task);
            }

            queue.current_task = snapshot
                .current_task_id
                .as_ref()
                .and_then(|id| pool.remove(id));
            queue.queued_tasks = snapshot
                .queued_task_ids
                .iter()
                .filter_map(|id| pool.remove(id))
                .collect();

            queue.is_running = snapshot.is_running && queue.current_task.is_some();
            queue.is_paused = snapshot.is_paused && !queue.is_running;
            Ok(())
        })
        .await
    }
}
