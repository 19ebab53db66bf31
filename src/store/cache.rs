//! Optional read-through cache for queue documents.
//!
//! Serves reads within a short TTL; every successful write must overwrite
//! the entry (the state manager does this) so no staleness window opens.
//! Absence of the cache degrades to direct store reads without correctness
//! loss.

use crate::clock::Clock;
use crate::queue::TaskQueue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

struct CacheEntry {
    queue: TaskQueue,
    cached_at: i64,
}

/// TTL cache keyed by player id.
pub struct QueueCache {
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl QueueCache {
    pub fn new(ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl_ms,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fresh cached queue for a player, if any. Stale entries are evicted.
    pub fn get(&self, player_id: &str) -> Option<TaskQueue> {
        let now = self.clock.now_ms();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(player_id) {
            Some(entry) if now - entry.cached_at < self.ttl_ms => Some(entry.queue.clone()),
            Some(_) => {
                entries.remove(player_id);
                None
            }
            None => None,
        }
    }

    /// Overwrite the entry for a queue. Called after every successful save.
    pub fn insert(&self, queue: &TaskQueue) {
        let now = self.clock.now_ms();
        self.entries.lock().unwrap().insert(
            queue.player_id.clone(),
            CacheEntry {
                queue: queue.clone(),
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, player_id: &str) {
        self.entries.lock().unwrap().remove(player_id);
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = QueueCache::new(1_000, clock.clone());
        let q = TaskQueue::new("p1", 0);

        cache.insert(&q);
        assert!(cache.get("p1").is_some());

        clock.advance(999);
        assert!(cache.get("p1").is_some());

        clock.advance(1);
        assert!(cache.get("p1").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = QueueCache::new(1_000, clock);
        let q = TaskQueue::new("p1", 0);
        cache.insert(&q);
        cache.invalidate("p1");
        assert!(cache.get("p1").is_none());
    }
}
