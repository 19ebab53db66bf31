//! Engine configuration.
//!
//! Engine-level knobs live here; per-queue knobs live in
//! [`crate::queue::QueueConfig`] and are persisted inside each queue
//! document. Every field has a serde default so a partial YAML file works.

use crate::queue::QueueConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Total attempts the atomic-update loop makes before giving up.
    #[serde(default = "default_atomic_retry_attempts")]
    pub atomic_retry_attempts: u32,

    /// Base backoff between atomic-update attempts (doubles per attempt).
    #[serde(default = "default_atomic_backoff_base_ms")]
    pub atomic_backoff_base_ms: u64,

    /// TTL for the read-through queue cache.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: i64,

    /// Maximum pending offline operations retained per player (FIFO drop).
    #[serde(default = "default_offline_pending_cap")]
    pub offline_pending_cap: usize,

    /// Defaults applied to newly created queues.
    #[serde(default)]
    pub queue: QueueConfig,
}

fn default_atomic_retry_attempts() -> u32 {
    3
}

fn default_atomic_backoff_base_ms() -> u64 {
    100
}

fn default_cache_ttl_ms() -> i64 {
    5_000
}

fn default_offline_pending_cap() -> usize {
    100
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            atomic_retry_attempts: default_atomic_retry_attempts(),
            atomic_backoff_base_ms: default_atomic_backoff_base_ms(),
            cache_ttl_ms: default_cache_ttl_ms(),
            offline_pending_cap: default_offline_pending_cap(),
            queue: QueueConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load_from_path(&path),
            _ => Ok(Self::default()),
        }
    }
}

/// Default config file location: `<config dir>/idle-task-queue/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("idle-task-queue").join("config.yaml"))
}
