//! In-process memory tier.
//!
//! A bounded least-recently-used map. Entries never expire on their own;
//! the controller and the invalidation loop remove stale entries, and
//! capacity eviction bounds everything else. Operations are synchronous
//! and never touch the network or disk.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tracing::debug;

use crate::entry::CacheEntry;
use crate::key::CacheKey;
use crate::stats::{TierStats, TierStatsSnapshot};
use crate::store::glob_match;

/// Bounded LRU tier.
pub struct MemoryTier {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    stats: TierStats,
    capacity: usize,
}

impl MemoryTier {
    /// Create a tier holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let bound = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(bound)),
            stats: TierStats::new(),
            capacity: bound.get(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get an entry, moving it to the most-recently-used position and
    /// bumping its access bookkeeping.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                self.stats.record_hit();
                Some(entry.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Look at an entry without touching recency, bookkeeping, or counters.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lock().peek(key).cloned()
    }

    /// Insert an entry, evicting the least-recently-used one when at
    /// capacity.
    pub fn set(&self, key: CacheKey, entry: CacheEntry) {
        let mut entries = self.lock();
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                debug!("memory tier evicted {evicted}");
            }
        }
        self.stats.record_set();
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, key: &CacheKey) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Remove every entry belonging to `model_name`. Returns how many were
    /// removed.
    pub fn remove_model(&self, model_name: &str) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| entry.model_name == model_name)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Remove every entry whose key matches a glob pattern. Returns how
    /// many were removed.
    pub fn remove_matching(&self, pattern: &str) -> usize {
        let mut entries = self.lock();
        let doomed: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| glob_match(pattern, key.as_str()))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the tier is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot the tier's counters.
    pub fn stats(&self) -> TierStatsSnapshot {
        self.stats.snapshot(self.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::VectorPayload;
    use pretty_assertions::assert_eq;

    fn entry(model: &str, v: Vec<f32>) -> CacheEntry {
        CacheEntry::new(VectorPayload::Plain(v), model, 60)
    }

    fn key(n: &str) -> CacheKey {
        CacheKey::derive("m", n)
    }

    #[test]
    fn test_set_get() {
        let tier = MemoryTier::new(10);
        tier.set(key("a"), entry("m", vec![1.0]));

        let got = tier.get(&key("a")).unwrap();
        assert_eq!(got.vector, VectorPayload::Plain(vec![1.0]));
        assert_eq!(got.access_count, 1);
    }

    #[test]
    fn test_miss() {
        let tier = MemoryTier::new(10);
        assert!(tier.get(&key("nope")).is_none());
        assert_eq!(tier.stats().misses, 1);
    }

    #[test]
    fn test_capacity_eviction_is_lru() {
        let tier = MemoryTier::new(2);
        tier.set(key("a"), entry("m", vec![1.0]));
        tier.set(key("b"), entry("m", vec![2.0]));

        // Promote "a" to most-recently-used, then overflow.
        assert!(tier.get(&key("a")).is_some());
        tier.set(key("c"), entry("m", vec![3.0]));

        assert!(tier.get(&key("b")).is_none());
        assert!(tier.get(&key("a")).is_some());
        assert!(tier.get(&key("c")).is_some());
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let tier = MemoryTier::new(3);
        for i in 0..50 {
            tier.set(key(&format!("k{i}")), entry("m", vec![i as f32]));
        }
        assert_eq!(tier.len(), 3);
    }

    #[test]
    fn test_delete() {
        let tier = MemoryTier::new(10);
        tier.set(key("a"), entry("m", vec![1.0]));

        assert!(tier.delete(&key("a")));
        assert!(!tier.delete(&key("a")));
        assert!(tier.get(&key("a")).is_none());
    }

    #[test]
    fn test_clear() {
        let tier = MemoryTier::new(10);
        tier.set(key("a"), entry("m", vec![1.0]));
        tier.set(key("b"), entry("m", vec![2.0]));

        tier.clear();
        assert!(tier.is_empty());
    }

    #[test]
    fn test_remove_model_is_scoped() {
        let tier = MemoryTier::new(10);
        tier.set(CacheKey::derive("m1", "a"), entry("m1", vec![1.0]));
        tier.set(CacheKey::derive("m1", "b"), entry("m1", vec![2.0]));
        tier.set(CacheKey::derive("m2", "a"), entry("m2", vec![3.0]));

        assert_eq!(tier.remove_model("m1"), 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.get(&CacheKey::derive("m2", "a")).is_some());
    }

    #[test]
    fn test_remove_matching() {
        let tier = MemoryTier::new(10);
        tier.set(CacheKey::from("aaa1".to_string()), entry("m", vec![1.0]));
        tier.set(CacheKey::from("aaa2".to_string()), entry("m", vec![2.0]));
        tier.set(CacheKey::from("bbb1".to_string()), entry("m", vec![3.0]));

        assert_eq!(tier.remove_matching("aaa*"), 2);
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let tier = MemoryTier::new(2);
        tier.set(key("a"), entry("m", vec![1.0]));
        tier.set(key("b"), entry("m", vec![2.0]));

        // Peeking "a" must not promote it.
        assert!(tier.peek(&key("a")).is_some());
        tier.set(key("c"), entry("m", vec![3.0]));

        assert!(tier.peek(&key("a")).is_none());
        assert_eq!(tier.peek(&key("a")).map(|e| e.access_count), None);
    }

    #[test]
    fn test_stats_counters() {
        let tier = MemoryTier::new(10);
        tier.set(key("a"), entry("m", vec![1.0]));
        tier.get(&key("a"));
        tier.get(&key("missing"));

        let stats = tier.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.size, 1);
    }
}
