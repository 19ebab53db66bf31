//! Core types for the idle task-queue engine.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Task priority (0..=10, higher runs first when priority handling is enabled).
pub type Priority = u8;

/// Priority constants for convenience.
pub const PRIORITY_MIN: Priority = 0;
pub const PRIORITY_DEFAULT: Priority = 5;
pub const PRIORITY_MAX: Priority = 10;

/// Clamp an arbitrary integer into the valid priority range.
pub fn clamp_priority(p: i64) -> Priority {
    p.clamp(PRIORITY_MIN as i64, PRIORITY_MAX as i64) as Priority
}

/// The kind of activity a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Harvesting,
    Crafting,
    Combat,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Harvesting => "harvesting",
            TaskKind::Crafting => "crafting",
            TaskKind::Combat => "combat",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "harvesting" => Some(TaskKind::Harvesting),
            "crafting" => Some(TaskKind::Crafting),
            "combat" => Some(TaskKind::Combat),
            _ => None,
        }
    }
}

/// Kind-specific payload carried by a task.
///
/// Content identifiers (node, recipe, enemy) point into game data tables that
/// live outside this crate; the engine only needs the thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "activity", rename_all = "snake_case")]
pub enum ActivityPayload {
    Harvesting {
        node_id: String,
        /// Stat gating this node (e.g. "gathering").
        stat: String,
        required_stat_level: u32,
        energy_cost: f64,
        /// Equipment slot holding the required tool, if the node needs one.
        tool_slot: Option<String>,
    },
    Crafting {
        recipe_id: String,
        skill: String,
        required_skill_level: u32,
        /// Crafting station the recipe requires, if any.
        station: Option<String>,
    },
    Combat {
        enemy_id: String,
        enemy_level: u32,
        /// Combat power the encounter is tuned for.
        recommended_power: f64,
    },
}

impl ActivityPayload {
    pub fn kind(&self) -> TaskKind {
        match self {
            ActivityPayload::Harvesting { .. } => TaskKind::Harvesting,
            ActivityPayload::Crafting { .. } => TaskKind::Crafting,
            ActivityPayload::Combat { .. } => TaskKind::Combat,
        }
    }
}

/// A typed condition that must hold before a task may run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PrereqCondition {
    Level { required: u32 },
    Stat { stat: String, required: u32 },
    Skill { skill: String, required: u32 },
    Item { item_id: String, quantity: u32 },
    Equipment { slot: String },
    ActivityCompleted { task_id: String },
}

/// A prerequisite with its cached evaluation result.
///
/// `is_met` is a display cache refreshed at validation time; the pipeline
/// re-evaluates against live player state before activating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    pub condition: PrereqCondition,
    #[serde(default)]
    pub is_met: bool,
}

impl Prerequisite {
    pub fn new(condition: PrereqCondition) -> Self {
        Self {
            condition,
            is_met: false,
        }
    }
}

/// A resource the task consumes, with availability snapshotted at validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_id: String,
    pub name: String,
    pub required: u32,
    /// Quantity available at last validation.
    #[serde(default)]
    pub available: u32,
    #[serde(default)]
    pub sufficient: bool,
}

/// Rarity tier for reward items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

/// An item granted on task completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardItem {
    pub item_id: String,
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub rarity: Rarity,
}

/// A unit of player activity scheduled on the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub player_id: String,
    pub payload: ActivityPayload,

    /// Wall-clock duration of the task in milliseconds. Always > 0.
    pub duration_ms: i64,
    /// When the task started executing; 0 until scheduled. A retry-scheduled
    /// task carries a future start time.
    pub start_time: i64,
    /// Expected completion timestamp, recomputed when scheduled.
    pub estimated_completion: i64,

    pub prerequisites: Vec<Prerequisite>,
    pub requirements: Vec<ResourceRequirement>,

    /// Completion fraction in [0, 1].
    pub progress: f64,
    pub completed: bool,
    pub rewards: Vec<RewardItem>,

    pub priority: Priority,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Cached validation state for UI display.
    pub is_valid: bool,
    #[serde(default)]
    pub validation_errors: Vec<String>,

    pub created_at: i64,
}

impl Task {
    /// Create a task with a fresh UUID7 id and default scheduling state.
    pub fn new(
        player_id: impl Into<String>,
        name: impl Into<String>,
        payload: ActivityPayload,
        duration_ms: i64,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.into(),
            description: None,
            icon: None,
            player_id: player_id.into(),
            payload,
            duration_ms,
            start_time: 0,
            estimated_completion: 0,
            prerequisites: Vec::new(),
            requirements: Vec::new(),
            progress: 0.0,
            completed: false,
            rewards: Vec::new(),
            priority: PRIORITY_DEFAULT,
            retry_count: 0,
            max_retries: 3,
            is_valid: false,
            validation_errors: Vec::new(),
            created_at: now,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Apply a progress delta, clamping the result to [0, 1].
    pub fn update_progress(&mut self, delta: f64) {
        self.progress = (self.progress + delta).clamp(0.0, 1.0);
    }

    /// Completion fraction implied by elapsed time, clamped to [0, 1].
    pub fn progress_at(&self, now: i64) -> f64 {
        if self.start_time == 0 || self.duration_ms <= 0 || now < self.start_time {
            return 0.0;
        }
        ((now - self.start_time) as f64 / self.duration_ms as f64).clamp(0.0, 1.0)
    }

    /// Whether the task has run for its full duration.
    pub fn is_overdue(&self, now: i64) -> bool {
        self.start_time > 0 && now >= self.start_time && now - self.start_time >= self.duration_ms
    }

    /// Stamp the task as started at `now`.
    pub fn schedule(&mut self, now: i64) {
        self.start_time = now;
        self.estimated_completion = now + self.duration_ms;
    }
}

/// An equipped item as seen by validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentItem {
    pub item_id: String,
    pub name: String,
    pub slot: String,
    pub durability: f64,
    pub max_durability: f64,
}

impl EquipmentItem {
    /// Remaining durability as a fraction of maximum, in [0, 1].
    pub fn durability_pct(&self) -> f64 {
        if self.max_durability <= 0.0 {
            return 0.0;
        }
        (self.durability / self.max_durability).clamp(0.0, 1.0)
    }

    pub fn is_broken(&self) -> bool {
        self.durability <= 0.0
    }
}

/// Point-in-time view of a player used by validation and the pipeline.
///
/// The engine never owns player state; callers snapshot it from whatever
/// character system they run and pass it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub player_id: String,
    pub level: u32,
    pub energy: f64,
    pub stats: HashMap<String, u32>,
    pub skills: HashMap<String, u32>,
    /// Item id -> quantity held.
    pub inventory: HashMap<String, u32>,
    /// Slot -> equipped item.
    pub equipment: HashMap<String, EquipmentItem>,
    /// Ids of activity tasks the player has completed.
    pub completed_tasks: HashSet<String>,
}

impl PlayerSnapshot {
    pub fn stat(&self, name: &str) -> u32 {
        self.stats.get(name).copied().unwrap_or(0)
    }

    pub fn skill(&self, name: &str) -> u32 {
        self.skills.get(name).copied().unwrap_or(0)
    }

    pub fn item_count(&self, item_id: &str) -> u32 {
        self.inventory.get(item_id).copied().unwrap_or(0)
    }

    /// Rough combat power estimate used for risk banding.
    pub fn combat_power(&self) -> f64 {
        let stat_power: u32 = ["attack", "strength", "defense"]
            .iter()
            .map(|s| self.stat(s))
            .sum();
        f64::from(stat_power) + f64::from(self.level) * 2.0
    }
}

/// Connectivity state of the offline queue manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Online,
    Offline,
    Syncing,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Online => "online",
            SyncStatus::Offline => "offline",
            SyncStatus::Syncing => "syncing",
        }
    }
}

/// A client-side mutation intent recorded while offline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineOperation {
    pub id: String,
    pub player_id: String,
    pub kind: OfflineOperationKind,
    pub timestamp: i64,
}

impl OfflineOperation {
    pub fn new(player_id: impl Into<String>, kind: OfflineOperationKind, now: i64) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            player_id: player_id.into(),
            kind,
            timestamp: now,
        }
    }

    /// The task this operation targets, when it targets exactly one.
    /// Used for per-task coalescing of pending operations.
    pub fn target_task_id(&self) -> Option<&str> {
        match &self.kind {
            OfflineOperationKind::AddTask(task) => Some(&task.id),
            OfflineOperationKind::RemoveTask { task_id } => Some(task_id),
            _ => None,
        }
    }
}

/// Payload of an offline operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OfflineOperationKind {
    AddTask(Task),
    RemoveTask { task_id: String },
    /// Full desired order of queued task ids.
    Reorder { task_ids: Vec<String> },
    Pause { reason: String },
    Resume,
}

impl OfflineOperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfflineOperationKind::AddTask(_) => "add_task",
            OfflineOperationKind::RemoveTask { .. } => "remove_task",
            OfflineOperationKind::Reorder { .. } => "reorder",
            OfflineOperationKind::Pause { .. } => "pause",
            OfflineOperationKind::Resume => "resume",
        }
    }
}
