//! Reward collaborator interface.
//!
//! Reward formulas depend on content tables (recipes, enemies, zones) that
//! live outside this crate. The pipeline only needs a source that maps a
//! completed task to its reward items.

use crate::types::{RewardItem, Task, TaskKind};
use std::collections::HashMap;

/// Maps a completed task to the items it grants.
///
/// Called synchronously inside the atomic-update transform, so
/// implementations must be cheap and must not block.
pub trait RewardSource: Send + Sync {
    fn rewards_for(&self, task: &Task) -> Vec<RewardItem>;
}

/// Source that grants nothing. Useful when rewards are handled elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRewards;

impl RewardSource for NoRewards {
    fn rewards_for(&self, _task: &Task) -> Vec<RewardItem> {
        Vec::new()
    }
}

/// Table-driven source keyed by task kind, with a fallback item.
///
/// Real deployments back this with content data; tests use it directly.
#[derive(Debug, Clone, Default)]
pub struct StaticRewards {
    by_kind: HashMap<TaskKind, Vec<RewardItem>>,
}

impl StaticRewards {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: TaskKind, rewards: Vec<RewardItem>) -> Self {
        self.by_kind.insert(kind, rewards);
        self
    }
}

impl RewardSource for StaticRewards {
    fn rewards_for(&self, task: &Task) -> Vec<RewardItem> {
        self.by_kind.get(&task.kind()).cloned().unwrap_or_else(|| {
            vec![RewardItem {
                item_id: format!("{}-yield", task.kind().as_str()),
                name: format!("{} yield", task.name),
                quantity: 1,
                rarity: Default::default(),
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivityPayload;

    #[test]
    fn static_rewards_fall_back_to_yield_item() {
        let source = StaticRewards::new();
        let task = Task::new(
            "p1",
            "Fight goblin",
            ActivityPayload::Combat {
                enemy_id: "goblin".into(),
                enemy_level: 3,
                recommended_power: 10.0,
            },
            1_000,
            0,
        );
        let rewards = source.rewards_for(&task);
        assert_eq!(rewards.len(), 1);
        assert_eq!(rewards[0].item_id, "combat-yield");
    }
}
