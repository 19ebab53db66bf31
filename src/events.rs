//! Task-lifecycle event notifications.
//!
//! Events are fire-and-forget: sinks must not block queue mutation, and a
//! failing sink never fails the operation that emitted the event.

use crate::types::RewardItem;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// A lifecycle event emitted by the pipeline and sync layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    TaskStarted {
        player_id: String,
        task_id: String,
    },
    TaskProgress {
        player_id: String,
        task_id: String,
        progress: f64,
    },
    TaskCompleted {
        player_id: String,
        task_id: String,
        rewards: Vec<RewardItem>,
    },
    TaskFailed {
        player_id: String,
        task_id: String,
        reason: String,
        will_retry: bool,
    },
    QueuePaused {
        player_id: String,
        reason: String,
    },
    QueueResumed {
        player_id: String,
    },
    SyncStarted {
        player_id: String,
    },
    SyncCompleted {
        player_id: String,
        operations_applied: usize,
    },
    SyncFailed {
        player_id: String,
        reason: String,
    },
}

/// Consumer of lifecycle events (UI, telemetry).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

/// Sink that forwards events to `tracing` at info/warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: TaskEvent) {
        match &event {
            TaskEvent::TaskFailed {
                player_id,
                task_id,
                reason,
                will_retry,
            } => {
                tracing::warn!(%player_id, %task_id, %reason, will_retry, "task failed");
            }
            TaskEvent::SyncFailed { player_id, reason } => {
                tracing::warn!(%player_id, %reason, "sync failed");
            }
            other => {
                tracing::info!(event = ?other, "queue event");
            }
        }
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: TaskEvent) {}
}

/// Sink that records events for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<TaskEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    pub fn snapshot(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}
