//! Replay cache for exactly-once probe accounting
//!
//! A transport that redelivers a request must not charge the budget twice.
//! Clients tag probes with an idempotency key; each session remembers the
//! replies to the most recent keys and hands the stored reply back when a key
//! shows up again.
//!
//! The cache is bounded and evicts in insertion order, so its memory is fixed
//! per session no matter how many probes a client sends.

use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Bounded FIFO map from probe id to the reply that was sent for it
#[derive(Debug, Clone)]
pub struct ReplayCache<V> {
    /// Stored replies by probe id
    entries: HashMap<String, V>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<String>,
    /// Maximum number of remembered probe ids; zero disables the cache
    max_entries: usize,
}

impl<V: Clone> ReplayCache<V> {
    /// Create a cache remembering up to `max_entries` probe ids
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1024)),
            insertion_order: VecDeque::with_capacity(max_entries.min(1024)),
            max_entries,
        }
    }

    /// Reply previously stored under `probe_id`, if still remembered
    pub fn lookup(&self, probe_id: &str) -> Option<V> {
        let hit = self.entries.get(probe_id).cloned();
        trace!(probe_id, hit = hit.is_some(), "Replay cache lookup");
        hit
    }

    /// Remember the reply sent for `probe_id`
    pub fn remember(&mut self, probe_id: &str, reply: V) {
        if self.max_entries == 0 {
            return;
        }

        if self.entries.insert(probe_id.to_string(), reply).is_some() {
            return;
        }
        self.insertion_order.push_back(probe_id.to_string());

        if self.entries.len() > self.max_entries {
            self.remove_oldest_entries(self.entries.len() - self.max_entries);
        }
    }

    #[inline]
    fn remove_oldest_entries(&mut self, count: usize) {
        for _ in 0..count {
            if let Some(key) = self.insertion_order.pop_front() {
                self.entries.remove(&key);
            }
        }
        debug!(count, "Evicted oldest probe ids from replay cache");
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
        }
    }
}

/// Statistics about a replay cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries
    pub entries: usize,
    /// Maximum allowed entries
    pub max_entries: usize,
}
