//! Pure validation of tasks and queues against player state.
//!
//! No persistence dependency: callers pass a [`PlayerSnapshot`] and get a
//! structured report back. The only side effect is audit logging for
//! bypassed validations.

pub mod activity;
pub mod requirements;

use crate::error::{ErrorCode, ValidationIssue};
use crate::types::{PlayerSnapshot, Task, PRIORITY_MAX};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub use requirements::{describe_prerequisite, prerequisite_met, resource_available};

/// How strictly validation is applied.
///
/// Bypass is never silent: every bypassing mode records a
/// `VALIDATION_BYPASSED` warning and an audit log line.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ValidationMode {
    /// Full validation; errors block activation.
    #[default]
    Normal,
    /// Operator override with a mandatory reason.
    AdminOverride { reason: String },
    /// Test fixtures skip validation entirely.
    TestMode,
    /// Run every check for visibility but never fail.
    Debug,
}

impl ValidationMode {
    fn bypasses(&self) -> bool {
        !matches!(self, ValidationMode::Normal)
    }

    fn reason_code(&self) -> &'static str {
        match self {
            ValidationMode::Normal => "none",
            ValidationMode::AdminOverride { .. } => "admin_override",
            ValidationMode::TestMode => "test_mode",
            ValidationMode::Debug => "debug",
        }
    }
}

/// Outcome of validating a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_findings(errors: Vec<ValidationIssue>, warnings: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

/// Validate a task against a player snapshot.
///
/// Runs structural checks, kind-specific checks, prerequisites, resource
/// requirements, and cross-cutting equipment checks. `TestMode` and
/// `AdminOverride` short-circuit to valid; `Debug` runs everything but
/// forces the verdict to valid so problems stay visible.
pub fn validate_task(
    task: &Task,
    player: &PlayerSnapshot,
    mode: &ValidationMode,
) -> ValidationReport {
    if mode.bypasses() {
        let bypass_warning = ValidationIssue::new(
            ErrorCode::ValidationBypassed,
            format!("validation bypassed ({})", mode.reason_code()),
        );
        tracing::warn!(
            task_id = %task.id,
            player_id = %task.player_id,
            reason = mode.reason_code(),
            "validation bypassed"
        );

        if let ValidationMode::Debug = mode {
            // Keep detection running for visibility; demote errors to the
            // warning list so the report still passes.
            let mut report = run_all_checks(task, player);
            let mut warnings = vec![bypass_warning];
            warnings.append(&mut report.errors);
            warnings.append(&mut report.warnings);
            return ValidationReport {
                is_valid: true,
                errors: Vec::new(),
                warnings,
            };
        }

        return ValidationReport {
            is_valid: true,
            errors: Vec::new(),
            warnings: vec![bypass_warning],
        };
    }

    run_all_checks(task, player)
}

fn run_all_checks(task: &Task, player: &PlayerSnapshot) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    check_structure(task, &mut errors);
    activity::check_activity(task, player, &mut errors, &mut warnings);
    requirements::check_prerequisites(task, player, &mut errors, &mut warnings);
    requirements::check_resources(task, player, &mut errors, &mut warnings);
    requirements::check_equipment(task, player, &mut errors, &mut warnings);

    ValidationReport::from_findings(errors, warnings)
}

/// Structural sanity of the task record itself.
fn check_structure(task: &Task, errors: &mut Vec<ValidationIssue>) {
    if task.id.trim().is_empty() {
        errors.push(
            ValidationIssue::new(ErrorCode::InvalidTaskId, "task id must not be empty")
                .with_field("id"),
        );
    }
    if task.player_id.trim().is_empty() {
        errors.push(
            ValidationIssue::new(ErrorCode::InvalidPlayerId, "player id must not be empty")
                .with_field("player_id"),
        );
    }
    if task.duration_ms <= 0 {
        errors.push(
            ValidationIssue::new(ErrorCode::InvalidDuration, "duration must be positive")
                .with_field("duration_ms"),
        );
    }
    if task.priority > PRIORITY_MAX {
        errors.push(
            ValidationIssue::new(
                ErrorCode::InvalidPriority,
                format!("priority {} outside 0..={}", task.priority, PRIORITY_MAX),
            )
            .with_field("priority"),
        );
    }
    if !(0.0..=1.0).contains(&task.progress) {
        errors.push(
            ValidationIssue::new(
                ErrorCode::InvalidProgress,
                format!("progress {} outside [0, 1]", task.progress),
            )
            .with_field("progress"),
        );
    }
    if task.retry_count > task.max_retries + 1 {
        errors.push(
            ValidationIssue::new(
                ErrorCode::InvalidRetries,
                format!(
                    "retry count {} exceeds max retries {} + 1",
                    task.retry_count, task.max_retries
                ),
            )
            .with_field("retry_count"),
        );
    }
}

/// Queue-level constraints: size ceiling, total-duration ceiling, duplicate
/// ids. Size and duplicates are errors; total duration is a warning.
pub fn validate_task_queue(
    tasks: &[Task],
    max_size: usize,
    max_total_duration_ms: i64,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if tasks.len() > max_size {
        errors.push(ValidationIssue::new(
            ErrorCode::QueueSizeExceeded,
            format!("queue holds {} tasks, limit is {}", tasks.len(), max_size),
        ));
    }

    let total: i64 = tasks.iter().map(|t| t.duration_ms).sum();
    if total > max_total_duration_ms {
        warnings.push(ValidationIssue::new(
            ErrorCode::QueueDurationExceeded,
            format!(
                "queued work totals {}ms, limit is {}ms",
                total, max_total_duration_ms
            ),
        ));
    }

    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id.as_str()) {
            errors.push(
                ValidationIssue::new(
                    ErrorCode::DuplicateTaskId,
                    format!("task id {} appears more than once", task.id),
                )
                .with_field(task.id.clone()),
            );
        }
    }

    ValidationReport::from_findings(errors, warnings)
}
