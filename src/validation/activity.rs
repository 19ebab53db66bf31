//! Kind-specific validation: harvesting, crafting, combat.

use crate::error::{ErrorCode, ValidationIssue};
use crate::types::{ActivityPayload, PlayerSnapshot, Task};

/// Enemy level gap (enemy - player) at which combat is rejected outright.
pub const COMBAT_GAP_REJECT: i64 = 10;
/// Enemy level gap at which combat draws an elevated-risk warning.
pub const COMBAT_GAP_WARN: i64 = 5;
/// Estimated win probability below which combat is rejected.
pub const WIN_PROBABILITY_REJECT: f64 = 0.3;
/// Estimated win probability below which combat draws a warning.
pub const WIN_PROBABILITY_WARN: f64 = 0.5;

/// Dispatch to the kind-specific checks for a task.
pub(super) fn check_activity(
    task: &Task,
    player: &PlayerSnapshot,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    match &task.payload {
        ActivityPayload::Harvesting {
            stat,
            required_stat_level,
            energy_cost,
            tool_slot,
            ..
        } => check_harvesting(
            player,
            stat,
            *required_stat_level,
            *energy_cost,
            tool_slot.as_deref(),
            errors,
            warnings,
        ),
        ActivityPayload::Crafting {
            skill,
            required_skill_level,
            station,
            ..
        } => check_crafting(
            player,
            skill,
            *required_skill_level,
            station.as_deref(),
            errors,
        ),
        ActivityPayload::Combat {
            enemy_level,
            recommended_power,
            ..
        } => check_combat(player, *enemy_level, *recommended_power, errors, warnings),
    }
}

fn check_harvesting(
    player: &PlayerSnapshot,
    stat: &str,
    required_stat_level: u32,
    energy_cost: f64,
    tool_slot: Option<&str>,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    if player.stat(stat) < required_stat_level {
        errors.push(
            ValidationIssue::new(
                ErrorCode::StatTooLow,
                format!(
                    "{} {} required, have {}",
                    stat,
                    required_stat_level,
                    player.stat(stat)
                ),
            )
            .with_field(stat.to_string()),
        );
    }

    if player.energy < energy_cost {
        errors.push(ValidationIssue::new(
            ErrorCode::InsufficientEnergy,
            format!(
                "needs {:.0} energy, have {:.0}",
                energy_cost, player.energy
            ),
        ));
    }

    if let Some(slot) = tool_slot {
        match player.equipment.get(slot) {
            None => errors.push(
                ValidationIssue::new(
                    ErrorCode::MissingEquipment,
                    format!("harvesting here needs a tool in slot '{}'", slot),
                )
                .with_field(slot.to_string()),
            ),
            Some(tool) if tool.is_broken() => errors.push(
                ValidationIssue::new(
                    ErrorCode::BrokenEquipment,
                    format!("{} is broken and cannot harvest", tool.name),
                )
                .with_field(slot.to_string()),
            ),
            Some(tool) if tool.durability_pct() < super::requirements::LOW_DURABILITY_THRESHOLD => {
                warnings.push(
                    ValidationIssue::new(
                        ErrorCode::LowDurability,
                        format!("{} may break mid-harvest", tool.name),
                    )
                    .with_field(slot.to_string()),
                );
            }
            Some(_) => {}
        }
    }
}

fn check_crafting(
    player: &PlayerSnapshot,
    skill: &str,
    required_skill_level: u32,
    station: Option<&str>,
    errors: &mut Vec<ValidationIssue>,
) {
    if player.skill(skill) < required_skill_level {
        errors.push(
            ValidationIssue::new(
                ErrorCode::SkillTooLow,
                format!(
                    "{} skill {} required, have {}",
                    skill,
                    required_skill_level,
                    player.skill(skill)
                ),
            )
            .with_field(skill.to_string()),
        );
    }

    // Stations are modeled as inventory access items (the player "has" a
    // station when their camp inventory lists it).
    if let Some(station_id) = station
        && player.item_count(station_id) == 0
    {
        errors.push(
            ValidationIssue::new(
                ErrorCode::MissingStation,
                format!("recipe needs access to a {}", station_id),
            )
            .with_field(station_id.to_string()),
        );
    }
}

/// Estimated win probability from the power ratio, clamped to [0.05, 0.95].
/// Deliberately crude: real combat math is a content concern, the engine
/// only needs a stable risk signal.
pub fn estimate_win_probability(player_power: f64, recommended_power: f64) -> f64 {
    if recommended_power <= 0.0 {
        return 0.95;
    }
    (0.5 + (player_power - recommended_power) / (2.0 * recommended_power)).clamp(0.05, 0.95)
}

fn check_combat(
    player: &PlayerSnapshot,
    enemy_level: u32,
    recommended_power: f64,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    let gap = i64::from(enemy_level) - i64::from(player.level);
    if gap >= COMBAT_GAP_REJECT {
        errors.push(ValidationIssue::new(
            ErrorCode::RiskTooHigh,
            format!(
                "enemy is {} levels above you; fight refused",
                gap
            ),
        ));
    } else if gap >= COMBAT_GAP_WARN {
        warnings.push(ValidationIssue::new(
            ErrorCode::RiskElevated,
            format!("enemy is {} levels above you", gap),
        ));
    }

    let win_probability = estimate_win_probability(player.combat_power(), recommended_power);
    if win_probability < WIN_PROBABILITY_REJECT {
        errors.push(ValidationIssue::new(
            ErrorCode::LowWinProbability,
            format!("estimated win chance {:.0}%", win_probability * 100.0),
        ));
    } else if win_probability < WIN_PROBABILITY_WARN {
        warnings.push(ValidationIssue::new(
            ErrorCode::LowWinProbability,
            format!("estimated win chance only {:.0}%", win_probability * 100.0),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win_probability_is_clamped_and_monotonic() {
        assert_eq!(estimate_win_probability(0.0, 100.0), 0.05);
        assert_eq!(estimate_win_probability(100.0, 100.0), 0.5);
        assert_eq!(estimate_win_probability(1_000.0, 100.0), 0.95);
        assert!(
            estimate_win_probability(80.0, 100.0) < estimate_win_probability(90.0, 100.0)
        );
    }

    #[test]
    fn combat_gap_bands() {
        let player = PlayerSnapshot {
            player_id: "p1".into(),
            level: 10,
            ..Default::default()
        };

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        // Power high enough that only the level gap matters.
        check_combat(&player, 20, 1.0, &mut errors, &mut warnings);
        assert!(errors.iter().any(|e| e.code == ErrorCode::RiskTooHigh));

        errors.clear();
        warnings.clear();
        check_combat(&player, 15, 1.0, &mut errors, &mut warnings);
        assert!(errors.is_empty());
        assert!(warnings.iter().any(|w| w.code == ErrorCode::RiskElevated));
    }
}
