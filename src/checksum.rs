//! Integrity checksums over a queue's critical fields.
//!
//! The checksum is a SHA-256 digest of a canonical JSON encoding of the
//! critical-field tuple. `serde_json` maps are key-sorted, which gives the
//! required cross-run determinism without a custom encoder.
//!
//! Queued task ids are sorted before hashing, so the checksum is insensitive
//! to pure reordering. Queue order is still meaningful: it travels in the
//! ordered id list of each [`crate::queue::QueueStateSnapshot`], and every
//! save bumps `version`, so a reorder is visible to concurrent writers even
//! though the checksum does not change. The checksum detects corruption, not
//! change.

use crate::queue::TaskQueue;
use serde_json::json;
use sha2::{Digest, Sha256};

/// Compute the integrity checksum for a queue.
///
/// Input fields: player id, current task id, sorted queued task ids, the
/// run/pause flags, completion counters, and the version.
pub fn calculate_checksum(queue: &TaskQueue) -> String {
    let mut queued_ids = queue.queued_task_ids();
    queued_ids.sort_unstable();

    let canonical = json!({
        "player_id": queue.player_id,
        "current_task_id": queue.current_task.as_ref().map(|t| t.id.as_str()),
        "queued_task_ids": queued_ids,
        "is_running": queue.is_running,
        "is_paused": queue.is_paused,
        "total_tasks_completed": queue.total_tasks_completed,
        "total_time_spent": queue.total_time_spent,
        "version": queue.version,
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex_encode(&hasher.finalize())
}

/// Whether the queue's stored checksum matches its current critical fields.
pub fn verify_checksum(queue: &TaskQueue) -> bool {
    queue.checksum == calculate_checksum(queue)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityPayload, Task};

    fn task(id: &str) -> Task {
        let mut t = Task::new(
            "p1",
            id,
            ActivityPayload::Harvesting {
                node_id: "oak".into(),
                stat: "gathering".into(),
                required_stat_level: 1,
                energy_cost: 1.0,
                tool_slot: None,
            },
            1_000,
            0,
        );
        t.id = id.to_string();
        t
    }

    #[test]
    fn checksum_is_deterministic() {
        let mut q = TaskQueue::new("p1", 0);
        q.queued_tasks = vec![task("a"), task("b")];
        assert_eq!(calculate_checksum(&q), calculate_checksum(&q));
    }

    #[test]
    fn checksum_ignores_queue_order() {
        let mut q1 = TaskQueue::new("p1", 0);
        q1.queued_tasks = vec![task("a"), task("b")];
        let mut q2 = TaskQueue::new("p1", 0);
        q2.queued_tasks = vec![task("b"), task("a")];
        assert_eq!(calculate_checksum(&q1), calculate_checksum(&q2));
    }

    #[test]
    fn checksum_changes_with_counters() {
        let mut q = TaskQueue::new("p1", 0);
        let before = calculate_checksum(&q);
        q.total_tasks_completed = 1;
        assert_ne!(before, calculate_checksum(&q));
    }

    #[test]
    fn verify_detects_tampering() {
        let mut q = TaskQueue::new("p1", 0);
        q.checksum = calculate_checksum(&q);
        assert!(verify_checksum(&q));
        q.total_time_spent = 999;
        assert!(!verify_checksum(&q));
    }
}
