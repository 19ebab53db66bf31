//! Offline queue management: a locally usable mirror of the server queue,
//! a bounded pending-operation list, and the sync pass that reconciles the
//! two after a connectivity gap.
//!
//! Conflict policy: the remote copy is authoritative for integrity-sensitive
//! fields (counters, version, current task); locally recorded intents the
//! server has not acknowledged are replayed on top. Last-writer-wins is
//! deliberately not used. Every resolved conflict is appended to a
//! resolution log.

pub mod local;

use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, TaskEvent};
use crate::queue::TaskQueue;
use crate::state::StateManager;
use crate::types::{OfflineOperation, OfflineOperationKind, SyncStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub use local::{LocalStore, MemoryLocalStore, OfflineRecord, SqliteLocalStore};

/// What the UI shows about sync state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIndicator {
    pub status: SyncStatus,
    pub pending_operations: usize,
    pub can_manual_sync: bool,
}

/// One resolved divergence between local mirror and remote state.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConflictRecord {
    pub player_id: String,
    pub field: String,
    pub local_value: String,
    pub remote_value: String,
    /// How the conflict was settled ("remote_wins" or "local_replayed").
    pub resolution: String,
    pub timestamp: i64,
}

/// Result of a completed sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub operations_applied: usize,
    pub conflicts_resolved: usize,
    /// Mirror version after adopting the server-resolved queue.
    pub mirror_version: u64,
}

/// Client-side queue manager that keeps play possible while disconnected.
pub struct OfflineQueueManager {
    local: Arc<dyn LocalStore>,
    state: Arc<StateManager>,
    events: Arc<dyn EventSink>,
    pending_cap: usize,
    online: AtomicBool,
    sync_in_flight: AtomicBool,
    resolution_log: Mutex<Vec<ConflictRecord>>,
}

impl OfflineQueueManager {
    pub fn new(
        local: Arc<dyn LocalStore>,
        state: Arc<StateManager>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let pending_cap = state.config().offline_pending_cap;
        Self {
            local,
            state,
            events,
            pending_cap,
            online: AtomicBool::new(true),
            sync_in_flight: AtomicBool::new(false),
            resolution_log: Mutex::new(Vec::new()),
        }
    }

    // ------------------------------------------------------------------
    // Local mutations
    // ------------------------------------------------------------------

    /// Queue a task locally and record the intent for replay.
    pub async fn add_task(&self, player_id: &str, task: crate::types::Task) -> QueueResult<()> {
        let now = self.state.clock().now_ms();
        let op = OfflineOperation::new(player_id, OfflineOperationKind::AddTask(task), now);
        self.apply_and_record(player_id, op).await
    }

    pub async fn remove_task(&self, player_id: &str, task_id: &str) -> QueueResult<()> {
        let now = self.state.clock().now_ms();
        let op = OfflineOperation::new(
            player_id,
            OfflineOperationKind::RemoveTask {
                task_id: task_id.to_string(),
            },
            now,
        );
        self.apply_and_record(player_id, op).await
    }

    pub async fn reorder_tasks(&self, player_id: &str, task_ids: Vec<String>) -> QueueResult<()> {
        let now = self.state.clock().now_ms();
        let op = OfflineOperation::new(player_id, OfflineOperationKind::Reorder { task_ids }, now);
        self.apply_and_record(player_id, op).await
    }

    pub async fn pause_queue(&self, player_id: &str, reason: &str) -> QueueResult<()> {
        let now = self.state.clock().now_ms();
        let op = OfflineOperation::new(
            player_id,
            OfflineOperationKind::Pause {
                reason: reason.to_string(),
            },
            now,
        );
        self.apply_and_record(player_id, op).await
    }

    pub async fn resume_queue(&self, player_id: &str) -> QueueResult<()> {
        let now = self.state.clock().now_ms();
        let op = OfflineOperation::new(player_id, OfflineOperationKind::Resume, now);
        self.apply_and_record(player_id, op).await
    }

    /// Apply an operation to the local mirror immediately (optimistic) and
    /// append it to the pending list with coalescing and the FIFO cap.
    async fn apply_and_record(&self, player_id: &str, op: OfflineOperation) -> QueueResult<()> {
        let mut record = self.load_record(player_id).await?;
        let now = self.state.clock().now_ms();

        apply_operation(&mut record.mirror, &op, now);
        coalesce_pending(&mut record.pending, &op);
        record.pending.push(op);

        while record.pending.len() > self.pending_cap {
            let dropped = record.pending.remove(0);
            tracing::warn!(
                player_id,
                op = dropped.kind.as_str(),
                "pending operation dropped: capacity exceeded"
            );
        }

        self.local.set(player_id, &record).await?;
        Ok(())
    }

    /// Local record for a player, seeding the mirror from the server copy
    /// (or a default queue) on first touch.
    async fn load_record(&self, player_id: &str) -> QueueResult<OfflineRecord> {
        if let Some(record) = self.local.get(player_id).await? {
            return Ok(record);
        }
        let mirror = if self.is_online() {
            match self.state.load_state(player_id).await? {
                Some(queue) => queue,
                None => TaskQueue::new(player_id, self.state.clock().now_ms()),
            }
        } else {
            TaskQueue::new(player_id, self.state.clock().now_ms())
        };
        Ok(OfflineRecord::new(mirror))
    }

    /// Local view of the queue (mirror when present, else server copy).
    pub async fn local_queue(&self, player_id: &str) -> QueueResult<TaskQueue> {
        Ok(self.load_record(player_id).await?.mirror)
    }

    pub async fn pending_operations_count(&self, player_id: &str) -> QueueResult<usize> {
        Ok(self
            .local
            .get(player_id)
            .await?
            .map_or(0, |r| r.pending.len()))
    }

    // ------------------------------------------------------------------
    // Connectivity and sync
    // ------------------------------------------------------------------

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Mark the network as gone; remote sync freezes until reconnect.
    pub fn set_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
        tracing::info!("network offline: queuing operations locally");
    }

    /// Mark the network as back and run a sync pass for every player with a
    /// local record. Per-player failures are reported but do not stop the
    /// pass for other players.
    pub async fn set_online(&self) -> QueueResult<Vec<(String, QueueResult<SyncReport>)>> {
        self.online.store(true, Ordering::SeqCst);
        let players = self.local.list_players().await?;
        let mut results = Vec::with_capacity(players.len());
        for player_id in players {
            let result = self.sync_player(&player_id).await;
            results.push((player_id, result));
        }
        Ok(results)
    }

    /// UI-facing sync status for a player.
    pub async fn sync_indicator(&self, player_id: &str) -> QueueResult<SyncIndicator> {
        let pending = self.pending_operations_count(player_id).await?;
        let in_flight = self.sync_in_flight.load(Ordering::SeqCst);
        let status = if in_flight {
            SyncStatus::Syncing
        } else if self.is_online() {
            SyncStatus::Online
        } else {
            SyncStatus::Offline
        };
        Ok(SyncIndicator {
            status,
            pending_operations: pending,
            can_manual_sync: self.is_online() && !in_flight,
        })
    }

    /// Player-initiated sync. Refused while offline or while another sync
    /// is in flight.
    pub async fn trigger_manual_sync(&self, player_id: &str) -> QueueResult<SyncReport> {
        if !self.is_online() {
            return Err(QueueError::SyncUnavailable {
                reason: "offline".into(),
            });
        }
        self.sync_player(player_id).await
    }

    /// Replay pending operations against the server copy in original order,
    /// then adopt the server-resolved queue as the new mirror.
    ///
    /// On failure the not-yet-applied operations are preserved for the next
    /// attempt and the error is surfaced.
    pub async fn sync_player(&self, player_id: &str) -> QueueResult<SyncReport> {
        if !self.is_online() {
            return Err(QueueError::SyncUnavailable {
                reason: "offline".into(),
            });
        }
        if self
            .sync_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(QueueError::SyncUnavailable {
                reason: "sync already in flight".into(),
            });
        }

        let result = self.sync_player_inner(player_id).await;
        self.sync_in_flight.store(false, Ordering::SeqCst);

        match &result {
            Ok(report) => self.events.emit(TaskEvent::SyncCompleted {
                player_id: player_id.to_string(),
                operations_applied: report.operations_applied,
            }),
            Err(err) => self.events.emit(TaskEvent::SyncFailed {
                player_id: player_id.to_string(),
                reason: err.to_string(),
            }),
        }
        result
    }

    async fn sync_player_inner(&self, player_id: &str) -> QueueResult<SyncReport> {
        self.events.emit(TaskEvent::SyncStarted {
            player_id: player_id.to_string(),
        });

        let Some(mut record) = self.local.get(player_id).await? else {
            // Nothing recorded locally; adopt the server copy as mirror.
            let mirror = match self.state.load_state(player_id).await? {
                Some(queue) => queue,
                None => TaskQueue::new(player_id, self.state.clock().now_ms()),
            };
            let version = mirror.version;
            let mut record = OfflineRecord::new(mirror);
            record.last_online_sync = self.state.clock().now_ms();
            self.local.set(player_id, &record).await?;
            return Ok(SyncReport {
                operations_applied: 0,
                conflicts_resolved: 0,
                mirror_version: version,
            });
        };

        let now = self.state.clock().now_ms();
        let conflicts = self.detect_conflicts(player_id, &record, now).await?;
        let conflicts_resolved = conflicts.len();
        if conflicts_resolved > 0 {
            self.resolution_log.lock().unwrap().extend(conflicts);
        }

        // Replay in original operation order through the atomic path.
        let total = record.pending.len();
        let mut applied = 0usize;
        let mut server_queue = None;
        for op in record.pending.clone() {
            let clock = self.state.clock().clone();
            let result = self
                .state
                .atomic_update(player_id, |queue| {
                    apply_operation(queue, &op, clock.now_ms());
                    Ok(())
                })
                .await;
            match result {
                Ok(queue) => {
                    applied += 1;
                    server_queue = Some(queue);
                }
                Err(err) => {
                    // Keep what is not yet acknowledged.
                    record.pending.drain(..applied);
                    self.local.set(player_id, &record).await?;
                    tracing::warn!(
                        player_id,
                        applied,
                        remaining = record.pending.len(),
                        error = %err,
                        "sync aborted mid-replay; pending operations preserved"
                    );
                    return Err(QueueError::SyncFailed {
                        reason: err.to_string(),
                        pending: record.pending.len(),
                    });
                }
            }
        }

        // Adopt the server-resolved queue as the new mirror.
        let mirror = match server_queue {
            Some(queue) => queue,
            None => match self.state.load_state(player_id).await? {
                Some(queue) => queue,
                None => TaskQueue::new(player_id, now),
            },
        };
        let mirror_version = mirror.version;
        record.mirror = mirror;
        record.mirror.last_synced = now;
        record.pending.clear();
        record.last_online_sync = now;
        self.local.set(player_id, &record).await?;

        tracing::info!(player_id, applied, total, "sync completed");
        Ok(SyncReport {
            operations_applied: applied,
            conflicts_resolved,
            mirror_version,
        })
    }

    /// Compare mirror and server copies; remote wins on integrity-sensitive
    /// fields, local pending intents are replayed on top.
    async fn detect_conflicts(
        &self,
        player_id: &str,
        record: &OfflineRecord,
        now: i64,
    ) -> QueueResult<Vec<ConflictRecord>> {
        let Some(server) = self.state.load_state(player_id).await? else {
            return Ok(Vec::new());
        };
        if server.version == record.mirror.version {
            return Ok(Vec::new());
        }

        let mut conflicts = vec![ConflictRecord {
            player_id: player_id.to_string(),
            field: "version".into(),
            local_value: record.mirror.version.to_string(),
            remote_value: server.version.to_string(),
            resolution: "remote_wins".into(),
            timestamp: now,
        }];

        if server.total_tasks_completed != record.mirror.total_tasks_completed {
            conflicts.push(ConflictRecord {
                player_id: player_id.to_string(),
                field: "total_tasks_completed".into(),
                local_value: record.mirror.total_tasks_completed.to_string(),
                remote_value: server.total_tasks_completed.to_string(),
                resolution: "remote_wins".into(),
                timestamp: now,
            });
        }

        let local_current = record.mirror.current_task.as_ref().map(|t| t.id.clone());
        let remote_current = server.current_task.as_ref().map(|t| t.id.clone());
        if local_current != remote_current {
            conflicts.push(ConflictRecord {
                player_id: player_id.to_string(),
                field: "current_task".into(),
                local_value: local_current.unwrap_or_default(),
                remote_value: remote_current.unwrap_or_default(),
                resolution: "remote_wins".into(),
                timestamp: now,
            });
        }

        if !record.pending.is_empty() {
            conflicts.push(ConflictRecord {
                player_id: player_id.to_string(),
                field: "pending_operations".into(),
                local_value: record.pending.len().to_string(),
                remote_value: "0".into(),
                resolution: "local_replayed".into(),
                timestamp: now,
            });
        }

        for conflict in &conflicts {
            tracing::info!(
                player_id,
                field = %conflict.field,
                resolution = %conflict.resolution,
                "sync conflict resolved"
            );
        }
        Ok(conflicts)
    }

    /// Snapshot of the conflict-resolution log.
    pub fn resolution_log(&self) -> Vec<ConflictRecord> {
        self.resolution_log.lock().unwrap().clone()
    }
}

/// Apply a recorded operation to a queue (mirror or server copy).
fn apply_operation(queue: &mut TaskQueue, op: &OfflineOperation, now: i64) {
    match &op.kind {
        OfflineOperationKind::AddTask(task) => {
            // Replays are idempotent: an already-present id is a no-op.
            if queue.find_task(&task.id).is_none() {
                queue.queued_tasks.push(task.clone());
            }
        }
        OfflineOperationKind::RemoveTask { task_id } => {
            queue.remove_queued_task(task_id);
        }
        OfflineOperationKind::Reorder { task_ids } => {
            queue.reorder(task_ids);
        }
        OfflineOperationKind::Pause { reason } => {
            if !queue.is_paused {
                queue.is_paused = true;
                queue.is_running = false;
                queue.pause_reason = Some(reason.clone());
                queue.paused_at = now;
                queue.can_resume = true;
            }
        }
        OfflineOperationKind::Resume => {
            if queue.is_paused {
                queue.is_paused = false;
                queue.pause_reason = None;
                if queue.paused_at > 0 {
                    queue.total_pause_time += now - queue.paused_at;
                }
                queue.resumed_at = now;
                queue.is_running = queue.current_task.is_some();
            }
        }
    }
}

/// Coalesce the pending list before appending `incoming`: only the latest
/// reorder per queue is kept, and only the latest operation per targeted
/// task is kept (so removing a locally added task collapses to its latest
/// intent rather than growing the list).
fn coalesce_pending(pending: &mut Vec<OfflineOperation>, incoming: &OfflineOperation) {
    match &incoming.kind {
        OfflineOperationKind::Reorder { .. } => {
            pending.retain(|op| !matches!(op.kind, OfflineOperationKind::Reorder { .. }));
        }
        _ => {
            if let Some(target) = incoming.target_task_id() {
                pending.retain(|op| op.target_task_id() != Some(target));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityPayload, Task};

    fn op(kind: OfflineOperationKind, ts: i64) -> OfflineOperation {
        OfflineOperation::new("p1", kind, ts)
    }

    fn task(id: &str) -> Task {
        let mut t = Task::new(
            "p1",
            id,
            ActivityPayload::Harvesting {
                node_id: "oak".into(),
                stat: "gathering".into(),
                required_stat_level: 0,
                energy_cost: 0.0,
                tool_slot: None,
            },
            1_000,
            0,
        );
        t.id = id.to_string();
        t
    }

    #[test]
    fn successive_reorders_coalesce() {
        let mut pending = Vec::new();
        let first = op(
            OfflineOperationKind::Reorder {
                task_ids: vec!["a".into(), "b".into()],
            },
            1,
        );
        coalesce_pending(&mut pending, &first);
        pending.push(first);

        let second = op(
            OfflineOperationKind::Reorder {
                task_ids: vec!["b".into(), "a".into()],
            },
            2,
        );
        coalesce_pending(&mut pending, &second);
        pending.push(second);

        assert_eq!(pending.len(), 1);
        assert!(matches!(
            pending[0].kind,
            OfflineOperationKind::Reorder { ref task_ids } if task_ids[0] == "b"
        ));
    }

    #[test]
    fn remove_collapses_pending_add_for_same_task() {
        let mut pending = Vec::new();
        for t in ["a", "b"] {
            let add = op(OfflineOperationKind::AddTask(task(t)), 1);
            coalesce_pending(&mut pending, &add);
            pending.push(add);
        }
        let remove = op(
            OfflineOperationKind::RemoveTask {
                task_id: "b".into(),
            },
            2,
        );
        coalesce_pending(&mut pending, &remove);
        pending.push(remove);

        // add(a), add(b), remove(b) -> add(a), remove(b)
        assert_eq!(pending.len(), 2);
        assert!(matches!(pending[0].kind, OfflineOperationKind::AddTask(_)));
        assert!(matches!(
            pending[1].kind,
            OfflineOperationKind::RemoveTask { .. }
        ));
    }

    #[test]
    fn replayed_add_is_idempotent() {
        let mut queue = TaskQueue::new("p1", 0);
        let add = op(OfflineOperationKind::AddTask(task("a")), 1);
        apply_operation(&mut queue, &add, 1);
        apply_operation(&mut queue, &add, 2);
        assert_eq!(queue.queued_tasks.len(), 1);
    }

    #[test]
    fn pause_resume_round_trip_accumulates_pause_time() {
        let mut queue = TaskQueue::new("p1", 0);
        apply_operation(
            &mut queue,
            &op(
                OfflineOperationKind::Pause {
                    reason: "bedtime".into(),
                },
                100,
            ),
            100,
        );
        assert!(queue.is_paused);
        apply_operation(&mut queue, &op(OfflineOperationKind::Resume, 600), 600);
        assert!(!queue.is_paused);
        assert_eq!(queue.total_pause_time, 500);
    }
}
