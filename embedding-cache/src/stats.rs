//! Cache statistics.
//!
//! Counters are in-process only and reset on restart; nothing here is
//! persisted or shared between instances.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters for one tier.
#[derive(Debug, Default)]
pub struct TierStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl TierStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a hit.
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a write.
    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    /// Total hits so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Snapshot the counters together with the tier's current size.
    pub fn snapshot(&self, size: u64) -> TierStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        TierStatsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            size,
            hit_ratio: ratio(hits, misses),
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

/// Point-in-time view of one tier's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStatsSnapshot {
    /// Reads answered by this tier.
    pub hits: u64,

    /// Reads this tier could not answer.
    pub misses: u64,

    /// Writes accepted by this tier.
    pub sets: u64,

    /// Entries currently held.
    pub size: u64,

    /// hits / (hits + misses).
    pub hit_ratio: f64,
}

/// Disk usage of the file tier, gathered by the periodic collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStats {
    /// Live entry files.
    pub entries: u64,

    /// Total bytes on disk.
    pub bytes: u64,

    /// Entry files whose expiry has passed but that have not been swept.
    pub expired: u64,
}

/// Hit/miss counters bucketed by hour of day (UTC), feeding the adaptive
/// TTL's traffic-shape factor.
#[derive(Debug)]
pub struct HourBuckets {
    hits: [AtomicU64; 24],
    misses: [AtomicU64; 24],
}

impl HourBuckets {
    /// Create zeroed buckets.
    pub fn new() -> Self {
        Self {
            hits: std::array::from_fn(|_| AtomicU64::new(0)),
            misses: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    /// Record the outcome of a lookup in the given hour bucket.
    pub fn record(&self, hour: usize, hit: bool) {
        let idx = hour % 24;
        if hit {
            self.hits[idx].fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Hit ratio observed for the given hour, or `None` when no lookups
    /// have landed in that bucket yet.
    pub fn hit_ratio(&self, hour: usize) -> Option<f64> {
        let idx = hour % 24;
        let hits = self.hits[idx].load(Ordering::Relaxed);
        let misses = self.misses[idx].load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            None
        } else {
            Some(hits as f64 / total as f64)
        }
    }
}

impl Default for HourBuckets {
    fn default() -> Self {
        Self::new()
    }
}

/// The hour-of-day bucket for an epoch-seconds timestamp (UTC).
pub fn hour_of_day(epoch_secs: u64) -> usize {
    ((epoch_secs / 3600) % 24) as usize
}

/// Aggregate snapshot across all enabled tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsSnapshot {
    /// Memory tier, when enabled.
    pub memory: Option<TierStatsSnapshot>,

    /// File tier, when enabled.
    pub file: Option<TierStatsSnapshot>,

    /// Distributed tier, when enabled.
    pub distributed: Option<TierStatsSnapshot>,

    /// File-tier disk usage from the most recent collection pass.
    pub file_disk: Option<DiskStats>,

    /// Lookups answered by any tier.
    pub hits: u64,

    /// Lookups answered by no tier.
    pub misses: u64,

    /// Writes accepted.
    pub sets: u64,

    /// hits / (hits + misses) across the whole cache.
    pub hit_ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tier_stats_snapshot() {
        let stats = TierStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_set();

        let snapshot = stats.snapshot(7);
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.size, 7);
        assert!((snapshot.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_tier_has_zero_ratio() {
        let snapshot = TierStats::new().snapshot(0);
        assert_eq!(snapshot.hit_ratio, 0.0);
    }

    #[test]
    fn test_hour_buckets_ratio() {
        let buckets = HourBuckets::new();
        assert_eq!(buckets.hit_ratio(3), None);

        buckets.record(3, true);
        buckets.record(3, true);
        buckets.record(3, false);
        buckets.record(4, false);

        assert!((buckets.hit_ratio(3).unwrap() - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(buckets.hit_ratio(4), Some(0.0));
    }

    #[test]
    fn test_hour_of_day() {
        assert_eq!(hour_of_day(0), 0);
        assert_eq!(hour_of_day(3600), 1);
        assert_eq!(hour_of_day(25 * 3600), 1);
        assert_eq!(hour_of_day(23 * 3600 + 3599), 23);
    }
}
