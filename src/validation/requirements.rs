//! Prerequisite, resource, and equipment evaluation.
//!
//! These evaluators are pure; the pipeline reuses them to refresh the cached
//! `is_met`/`sufficient` flags right before activating a task.

use crate::error::{ErrorCode, ValidationIssue};
use crate::types::{PlayerSnapshot, PrereqCondition, ResourceRequirement, Task};

/// Evaluate a single prerequisite condition against live player state.
pub fn prerequisite_met(condition: &PrereqCondition, player: &PlayerSnapshot) -> bool {
    match condition {
        PrereqCondition::Level { required } => player.level >= *required,
        PrereqCondition::Stat { stat, required } => player.stat(stat) >= *required,
        PrereqCondition::Skill { skill, required } => player.skill(skill) >= *required,
        PrereqCondition::Item { item_id, quantity } => player.item_count(item_id) >= *quantity,
        PrereqCondition::Equipment { slot } => player
            .equipment
            .get(slot)
            .is_some_and(|item| !item.is_broken()),
        PrereqCondition::ActivityCompleted { task_id } => player.completed_tasks.contains(task_id),
    }
}

/// Human-readable description of an unmet prerequisite.
pub fn describe_prerequisite(condition: &PrereqCondition) -> String {
    match condition {
        PrereqCondition::Level { required } => format!("requires level {}", required),
        PrereqCondition::Stat { stat, required } => {
            format!("requires {} {}", stat, required)
        }
        PrereqCondition::Skill { skill, required } => {
            format!("requires {} skill {}", skill, required)
        }
        PrereqCondition::Item { item_id, quantity } => {
            format!("requires {}x {}", quantity, item_id)
        }
        PrereqCondition::Equipment { slot } => {
            format!("requires working equipment in slot '{}'", slot)
        }
        PrereqCondition::ActivityCompleted { task_id } => {
            format!("requires completing activity {}", task_id)
        }
    }
}

/// Current availability for a resource requirement.
pub fn resource_available(req: &ResourceRequirement, player: &PlayerSnapshot) -> u32 {
    player.item_count(&req.resource_id)
}

/// Check a task's prerequisites, pushing findings into the error/warning
/// lists. Borderline matches (exact level/stat) become warnings.
pub(super) fn check_prerequisites(
    task: &Task,
    player: &PlayerSnapshot,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    for prereq in &task.prerequisites {
        if !prerequisite_met(&prereq.condition, player) {
            errors.push(ValidationIssue::new(
                ErrorCode::PrerequisiteNotMet,
                format!("task '{}' {}", task.name, describe_prerequisite(&prereq.condition)),
            ));
            continue;
        }

        // Exactly-at-threshold matches pass but are worth surfacing.
        let borderline = match &prereq.condition {
            PrereqCondition::Level { required } => player.level == *required,
            PrereqCondition::Stat { stat, required } => player.stat(stat) == *required,
            PrereqCondition::Skill { skill, required } => player.skill(skill) == *required,
            _ => false,
        };
        if borderline {
            warnings.push(ValidationIssue::new(
                ErrorCode::PrerequisiteNotMet,
                format!(
                    "task '{}' barely meets: {}",
                    task.name,
                    describe_prerequisite(&prereq.condition)
                ),
            ));
        }
    }
}

/// Check a task's resource requirements against current inventory.
pub(super) fn check_resources(
    task: &Task,
    player: &PlayerSnapshot,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    for req in &task.requirements {
        let available = resource_available(req, player);
        if available < req.required {
            errors.push(
                ValidationIssue::new(
                    ErrorCode::InsufficientResource,
                    format!(
                        "need {}x {} but only {} available",
                        req.required, req.name, available
                    ),
                )
                .with_field(req.resource_id.clone()),
            );
        } else if available == req.required {
            warnings.push(
                ValidationIssue::new(
                    ErrorCode::ExactResourceMatch,
                    format!("{} will be fully consumed ({}x)", req.name, req.required),
                )
                .with_field(req.resource_id.clone()),
            );
        }
    }
}

/// Durability fraction below which equipment draws a warning.
pub const LOW_DURABILITY_THRESHOLD: f64 = 0.25;

/// Cross-cutting equipment checks: broken gear is always an error, low
/// durability and missing recommended slots are warnings.
pub(super) fn check_equipment(
    task: &Task,
    player: &PlayerSnapshot,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    for item in player.equipment.values() {
        if item.is_broken() {
            errors.push(
                ValidationIssue::new(
                    ErrorCode::BrokenEquipment,
                    format!("{} is broken", item.name),
                )
                .with_field(item.slot.clone()),
            );
        } else if item.durability_pct() < LOW_DURABILITY_THRESHOLD {
            warnings.push(
                ValidationIssue::new(
                    ErrorCode::LowDurability,
                    format!(
                        "{} is at {:.0}% durability",
                        item.name,
                        item.durability_pct() * 100.0
                    ),
                )
                .with_field(item.slot.clone()),
            );
        }
    }

    for slot in recommended_slots(task) {
        if !player.equipment.contains_key(slot) {
            warnings.push(
                ValidationIssue::new(
                    ErrorCode::MissingEquipment,
                    format!("no equipment in recommended slot '{}'", slot),
                )
                .with_field(slot.to_string()),
            );
        }
    }
}

/// Slots a task benefits from, beyond hard requirements.
fn recommended_slots(task: &Task) -> &'static [&'static str] {
    match task.kind() {
        crate::types::TaskKind::Harvesting => &["tool"],
        crate::types::TaskKind::Crafting => &[],
        crate::types::TaskKind::Combat => &["weapon", "armor"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityPayload, EquipmentItem, Prerequisite};

    fn player() -> PlayerSnapshot {
        let mut p = PlayerSnapshot {
            player_id: "p1".into(),
            level: 10,
            energy: 50.0,
            ..Default::default()
        };
        p.stats.insert("gathering".into(), 7);
        p.inventory.insert("iron-ore".into(), 5);
        p
    }

    #[test]
    fn level_prerequisite() {
        let p = player();
        assert!(prerequisite_met(&PrereqCondition::Level { required: 10 }, &p));
        assert!(!prerequisite_met(&PrereqCondition::Level { required: 11 }, &p));
    }

    #[test]
    fn item_prerequisite_counts_inventory() {
        let p = player();
        assert!(prerequisite_met(
            &PrereqCondition::Item {
                item_id: "iron-ore".into(),
                quantity: 5
            },
            &p
        ));
        assert!(!prerequisite_met(
            &PrereqCondition::Item {
                item_id: "iron-ore".into(),
                quantity: 6
            },
            &p
        ));
    }

    #[test]
    fn broken_equipment_fails_equipment_prerequisite() {
        let mut p = player();
        p.equipment.insert(
            "tool".into(),
            EquipmentItem {
                item_id: "axe".into(),
                name: "Axe".into(),
                slot: "tool".into(),
                durability: 0.0,
                max_durability: 100.0,
            },
        );
        assert!(!prerequisite_met(
            &PrereqCondition::Equipment { slot: "tool".into() },
            &p
        ));
    }

    #[test]
    fn exact_level_match_is_borderline_warning() {
        let p = player();
        let mut task = Task::new(
            "p1",
            "Mine",
            ActivityPayload::Harvesting {
                node_id: "iron".into(),
                stat: "gathering".into(),
                required_stat_level: 1,
                energy_cost: 1.0,
                tool_slot: None,
            },
            1_000,
            0,
        );
        task.prerequisites
            .push(Prerequisite::new(PrereqCondition::Level { required: 10 }));

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        check_prerequisites(&task, &p, &mut errors, &mut warnings);
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }
}
