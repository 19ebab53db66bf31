//! The per-player queue aggregate and its configuration.

use crate::types::{RewardItem, Task};
use serde::{Deserialize, Serialize};

/// Per-queue configuration block, persisted inside the queue document.
///
/// Every field has a serde default so documents written by older builds
/// deserialize cleanly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Soft ceiling on queued task count.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Longest single task accepted, in milliseconds (default: 24 hours).
    #[serde(default = "default_max_task_duration_ms")]
    pub max_task_duration_ms: i64,

    /// Longest total queued duration accepted, in milliseconds (default: 7 days).
    #[serde(default = "default_max_total_duration_ms")]
    pub max_total_duration_ms: i64,

    /// Default retry ceiling for tasks that do not set their own.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Retry delay ceiling in milliseconds (default: 5 minutes).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// When true, the highest-priority queued task runs next; otherwise FIFO.
    #[serde(default = "default_true")]
    pub priority_handling: bool,

    /// When true, completing a task immediately promotes the next one.
    #[serde(default = "default_true")]
    pub auto_start: bool,

    /// How often the offline manager attempts a background sync.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// How often the queue is persisted by periodic ticks.
    #[serde(default = "default_persistence_interval_ms")]
    pub persistence_interval_ms: u64,

    /// Ceiling on a single persistence call before it fails.
    #[serde(default = "default_save_timeout_ms")]
    pub save_timeout_ms: u64,

    /// How often cached validation state is considered stale.
    #[serde(default = "default_validation_interval_ms")]
    pub validation_interval_ms: u64,
}

fn default_max_queue_size() -> usize {
    50
}

fn default_max_task_duration_ms() -> i64 {
    86_400_000 // 24 hours
}

fn default_max_total_duration_ms() -> i64 {
    604_800_000 // 7 days
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_true() -> bool {
    true
}

fn default_sync_interval_ms() -> u64 {
    30_000
}

fn default_persistence_interval_ms() -> u64 {
    10_000
}

fn default_save_timeout_ms() -> u64 {
    5_000
}

fn default_validation_interval_ms() -> u64 {
    60_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_task_duration_ms: default_max_task_duration_ms(),
            max_total_duration_ms: default_max_total_duration_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            priority_handling: default_true(),
            auto_start: default_true(),
            sync_interval_ms: default_sync_interval_ms(),
            persistence_interval_ms: default_persistence_interval_ms(),
            save_timeout_ms: default_save_timeout_ms(),
            validation_interval_ms: default_validation_interval_ms(),
        }
    }
}

impl QueueConfig {
    /// Whether the configuration is usable. State validation resets queues
    /// carrying a config that fails this check.
    pub fn is_sane(&self) -> bool {
        self.max_queue_size > 0
            && self.max_task_duration_ms > 0
            && self.max_total_duration_ms > 0
            && self.retry_base_delay_ms > 0
            && self.retry_max_delay_ms >= self.retry_base_delay_ms
            && self.save_timeout_ms > 0
    }
}

/// Immutable point-in-time summary appended to the queue's state history.
///
/// Snapshots carry task ids only, never task payloads; restoring re-hydrates
/// tasks from the currently persisted queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStateSnapshot {
    pub timestamp: i64,
    pub current_task_id: Option<String>,
    /// Queued task ids in queue order.
    pub queued_task_ids: Vec<String>,
    pub is_running: bool,
    pub is_paused: bool,
    pub total_tasks_completed: i64,
    pub checksum: String,
}

/// Default bound on `state_history`.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 20;

/// The per-player aggregate root: one executing task, the ordered backlog,
/// execution flags, counters, and persistence bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueue {
    pub player_id: String,

    pub current_task: Option<Task>,
    /// Queue order is execution order (modulated by priority when enabled).
    pub queued_tasks: Vec<Task>,

    // Execution flags. Never both true.
    pub is_running: bool,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
    pub paused_at: i64,
    pub resumed_at: i64,
    pub can_resume: bool,
    pub total_pause_time: i64,

    // Cumulative counters.
    pub total_tasks_completed: i64,
    /// Total task execution time in milliseconds.
    pub total_time_spent: i64,
    pub total_rewards_earned: Vec<RewardItem>,

    // Derived metrics, recomputed on completion and during repair.
    pub average_task_duration: f64,
    pub task_completion_rate: f64,
    pub queue_efficiency_score: f64,

    pub config: QueueConfig,

    // Persistence bookkeeping.
    /// Monotonic version counter; bumped on every save.
    pub version: u64,
    /// Integrity hash over critical fields. See [`crate::checksum`].
    pub checksum: String,
    pub last_updated: i64,
    pub last_synced: i64,
    pub created_at: i64,
    pub last_validated: i64,

    #[serde(default)]
    pub state_history: Vec<QueueStateSnapshot>,
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,
}

fn default_max_history_size() -> usize {
    DEFAULT_MAX_HISTORY_SIZE
}

impl TaskQueue {
    /// Default queue for a player seen for the first time.
    pub fn new(player_id: impl Into<String>, now: i64) -> Self {
        Self {
            player_id: player_id.into(),
            current_task: None,
            queued_tasks: Vec::new(),
            is_running: false,
            is_paused: false,
            pause_reason: None,
            paused_at: 0,
            resumed_at: 0,
            can_resume: false,
            total_pause_time: 0,
            total_tasks_completed: 0,
            total_time_spent: 0,
            total_rewards_earned: Vec::new(),
            average_task_duration: 0.0,
            task_completion_rate: 0.0,
            queue_efficiency_score: 0.0,
            config: QueueConfig::default(),
            version: 0,
            checksum: String::new(),
            last_updated: now,
            last_synced: 0,
            created_at: now,
            last_validated: 0,
            state_history: Vec::new(),
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
        }
    }

    /// Queued task ids in queue order.
    pub fn queued_task_ids(&self) -> Vec<String> {
        self.queued_tasks.iter().map(|t| t.id.clone()).collect()
    }

    /// Find a task by id among the current task and the backlog.
    pub fn find_task(&self, task_id: &str) -> Option<&Task> {
        if let Some(ref cur) = self.current_task
            && cur.id == task_id
        {
            return Some(cur);
        }
        self.queued_tasks.iter().find(|t| t.id == task_id)
    }

    /// Remove a queued task by id. The current task is not removable this
    /// way; pause or fail it through the pipeline instead.
    pub fn remove_queued_task(&mut self, task_id: &str) -> Option<Task> {
        let idx = self.queued_tasks.iter().position(|t| t.id == task_id)?;
        Some(self.queued_tasks.remove(idx))
    }

    /// Sum of queued durations plus the current task's, in milliseconds.
    pub fn total_duration_ms(&self) -> i64 {
        let queued: i64 = self.queued_tasks.iter().map(|t| t.duration_ms).sum();
        queued + self.current_task.as_ref().map_or(0, |t| t.duration_ms)
    }

    /// Reorder the backlog to match `task_ids`. Ids not present in the
    /// backlog are ignored; backlog tasks missing from `task_ids` keep their
    /// relative order after the listed ones.
    pub fn reorder(&mut self, task_ids: &[String]) {
        let mut reordered = Vec::with_capacity(self.queued_tasks.len());
        for id in task_ids {
            if let Some(idx) = self.queued_tasks.iter().position(|t| &t.id == id) {
                reordered.push(self.queued_tasks.remove(idx));
            }
        }
        reordered.append(&mut self.queued_tasks);
        self.queued_tasks = reordered;
    }

    /// Recompute the derived metrics from the counters.
    ///
    /// `queue_efficiency_score` is the fraction of wall-clock lifetime spent
    /// executing tasks rather than paused or idle.
    pub fn recalculate_metrics(&mut self, now: i64) {
        self.average_task_duration = if self.total_tasks_completed > 0 {
            self.total_time_spent as f64 / self.total_tasks_completed as f64
        } else {
            0.0
        };

        let lifetime = (now - self.created_at).max(1);
        self.task_completion_rate =
            self.total_tasks_completed as f64 / (lifetime as f64 / 3_600_000.0);
        self.queue_efficiency_score =
            (self.total_time_spent as f64 / lifetime as f64).clamp(0.0, 1.0);
    }
}
