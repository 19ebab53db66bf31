//! Structured error types for the queue engine.
//!
//! Validation and integrity problems are returned as structured result
//! values so callers can decide to bypass or repair; only concurrency,
//! timeout, storage, and sync failures surface as [`QueueError`].

use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling of validation and integrity issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Structural validation
    InvalidTaskId,
    InvalidPlayerId,
    InvalidDuration,
    InvalidPriority,
    InvalidProgress,
    InvalidRetries,

    // Activity-specific validation
    StatTooLow,
    SkillTooLow,
    InsufficientEnergy,
    MissingStation,
    RiskTooHigh,
    RiskElevated,
    LowWinProbability,

    // Prerequisites and resources
    PrerequisiteNotMet,
    InsufficientResource,
    ExactResourceMatch,

    // Equipment
    MissingEquipment,
    BrokenEquipment,
    LowDurability,

    // Queue-level validation
    QueueSizeExceeded,
    QueueDurationExceeded,
    DuplicateTaskId,

    // Bypass audit
    ValidationBypassed,

    // State integrity
    MissingPlayerId,
    ChecksumMismatch,
    InconsistentPauseState,
    NegativeCounter,
    FutureTimestamp,
    InvalidConfig,
    HistoryOverflow,
    InvalidQueuedTask,
}

/// Severity of a state-integrity issue. Critical issues are unrepairable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

/// A single validation finding with its code and optional offending field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            field: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A state-integrity finding with severity classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityIssue {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
}

impl IntegrityIssue {
    pub fn new(code: ErrorCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity,
        }
    }
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Failures raised by the engine after its internal retry policies are
/// exhausted. Everything else is a structured result value.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Another writer saved the queue first. Retryable.
    #[error("version conflict for player {player_id}: expected version {expected}")]
    Conflict { player_id: String, expected: u64 },

    /// A persistence call exceeded the configured save timeout.
    #[error("persistence call timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// The atomic read-modify-write loop exhausted its retry budget.
    #[error("atomic update for player {player_id} failed after {attempts} attempts")]
    AtomicUpdateFailed { player_id: String, attempts: u32 },

    /// The persisted state has a critical integrity error and cannot be
    /// repaired automatically.
    #[error("queue state for player {player_id} is corrupted: {reason}")]
    Corrupted { player_id: String, reason: String },

    /// Offline replay failed; pending operations are preserved.
    #[error("offline sync failed with {pending} operations pending: {reason}")]
    SyncFailed { reason: String, pending: usize },

    /// Manual sync requested while offline or while a sync is in flight.
    #[error("sync is not available right now: {reason}")]
    SyncUnavailable { reason: String },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl QueueError {
    /// Whether retrying the operation could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Conflict { .. })
    }
}

/// Result type for engine operations.
pub type QueueResult<T> = std::result::Result<T, QueueError>;
