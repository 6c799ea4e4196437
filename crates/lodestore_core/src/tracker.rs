//! Cache access tracking for eviction candidate selection.
//!
//! The tracker only observes accesses and ranks candidates; the hosting
//! store decides the policy and performs any actual deletion.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
struct AccessEntry {
    last_access: Instant,
    access_count: u64,
    size: u64,
}

/// Tracks per-entry access recency, frequency, and size.
pub struct CacheAccessTracker<K> {
    entries: RwLock<HashMap<K, AccessEntry>>,
}

impl<K: Clone + Eq + Hash> CacheAccessTracker<K> {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Upserts an entry: bumps its access count, refreshes its last-access
    /// time, and records its current size.
    pub fn record_access(&self, id: K, size: u64) {
        let mut entries = self.entries.write();
        let now = Instant::now();
        entries
            .entry(id)
            .and_modify(|e| {
                e.access_count += 1;
                e.last_access = now;
                e.size = size;
            })
            .or_insert(AccessEntry {
                last_access: now,
                access_count: 1,
                size,
            });
    }

    /// Forgets an entry. Returns true if it existed.
    pub fn remove(&self, id: &K) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Forgets everything.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns true if the entry is tracked.
    pub fn contains(&self, id: &K) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Sum of recorded entry sizes.
    pub fn total_size(&self) -> u64 {
        self.entries.read().values().map(|e| e.size).sum()
    }

    /// Number of tracked entries.
    pub fn item_count(&self) -> usize {
        self.entries.read().len()
    }

    /// All tracked ids, in no particular order.
    pub fn all_ids(&self) -> Vec<K> {
        self.entries.read().keys().cloned().collect()
    }

    /// Up to `count` ids, least recently accessed first.
    pub fn eviction_candidates_lru(&self, count: usize, exclude: &HashSet<K>) -> Vec<K> {
        self.candidates(count, exclude, |a, b| a.last_access.cmp(&b.last_access))
    }

    /// Up to `count` ids, least frequently accessed first. Ties break
    /// arbitrarily.
    pub fn eviction_candidates_lfu(&self, count: usize, exclude: &HashSet<K>) -> Vec<K> {
        self.candidates(count, exclude, |a, b| a.access_count.cmp(&b.access_count))
    }

    /// Up to `count` ids, largest first.
    pub fn eviction_candidates_by_size(&self, count: usize, exclude: &HashSet<K>) -> Vec<K> {
        self.candidates(count, exclude, |a, b| b.size.cmp(&a.size))
    }

    fn candidates(
        &self,
        count: usize,
        exclude: &HashSet<K>,
        order: impl Fn(&AccessEntry, &AccessEntry) -> std::cmp::Ordering,
    ) -> Vec<K> {
        let entries = self.entries.read();
        let mut ranked: Vec<(&K, &AccessEntry)> = entries
            .iter()
            .filter(|(id, _)| !exclude.contains(*id))
            .collect();
        ranked.sort_by(|(_, a), (_, b)| order(a, b));
        ranked.into_iter().take(count).map(|(id, _)| id.clone()).collect()
    }
}

impl<K: Clone + Eq + Hash> Default for CacheAccessTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_exclusions() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn record_and_inspect() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        tracker.record_access("a".into(), 100);
        tracker.record_access("b".into(), 250);
        tracker.record_access("a".into(), 120);

        assert!(tracker.contains(&"a".into()));
        assert_eq!(tracker.item_count(), 2);
        assert_eq!(tracker.total_size(), 370);

        let mut ids = tracker.all_ids();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn remove_and_clear() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        tracker.record_access("a".into(), 1);
        assert!(tracker.remove(&"a".into()));
        assert!(!tracker.remove(&"a".into()));

        tracker.record_access("b".into(), 1);
        tracker.clear();
        assert_eq!(tracker.item_count(), 0);
        assert_eq!(tracker.total_size(), 0);
    }

    #[test]
    fn lru_orders_by_recency() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        tracker.record_access("old".into(), 1);
        tracker.record_access("mid".into(), 1);
        tracker.record_access("new".into(), 1);
        // Re-access "old" so it becomes the most recent.
        tracker.record_access("old".into(), 1);

        let candidates = tracker.eviction_candidates_lru(2, &no_exclusions());
        assert_eq!(candidates, ["mid", "new"]);
    }

    #[test]
    fn lfu_orders_by_frequency() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        for _ in 0..5 {
            tracker.record_access("hot".into(), 1);
        }
        for _ in 0..2 {
            tracker.record_access("warm".into(), 1);
        }
        tracker.record_access("cold".into(), 1);

        let candidates = tracker.eviction_candidates_lfu(3, &no_exclusions());
        assert_eq!(candidates, ["cold", "warm", "hot"]);
    }

    #[test]
    fn by_size_orders_largest_first() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        tracker.record_access("small".into(), 10);
        tracker.record_access("large".into(), 1000);
        tracker.record_access("medium".into(), 100);

        let candidates = tracker.eviction_candidates_by_size(2, &no_exclusions());
        assert_eq!(candidates, ["large", "medium"]);
    }

    #[test]
    fn exclusions_are_skipped() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        tracker.record_access("a".into(), 1);
        tracker.record_access("b".into(), 2);
        tracker.record_access("c".into(), 3);

        let exclude: HashSet<String> = ["b".to_owned()].into_iter().collect();
        let candidates = tracker.eviction_candidates_by_size(10, &exclude);
        assert_eq!(candidates, ["c", "a"]);
        assert!(!candidates.contains(&"b".to_owned()));
    }

    #[test]
    fn count_caps_results() {
        let tracker: CacheAccessTracker<String> = CacheAccessTracker::new();
        for i in 0..10 {
            tracker.record_access(format!("k{i}"), 1);
        }
        assert_eq!(tracker.eviction_candidates_lru(3, &no_exclusions()).len(), 3);
    }
}
