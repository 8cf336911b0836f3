//! Adaptive TTL computation.
//!
//! The TTL written with an entry starts from the configured default and is
//! scaled by how often the entry has been read, how recently it was read,
//! and how well the cache has been hitting during the current hour of day.
//! The result is always clamped to the configured bounds.

const DAY_SECS: u64 = 24 * 60 * 60;
const WEEK_SECS: u64 = 7 * DAY_SECS;

/// TTL bounds and starting point.
#[derive(Debug, Clone, Copy)]
pub struct TtlPolicy {
    /// Starting TTL in seconds.
    pub default_ttl_secs: u64,

    /// Lower clamp in seconds.
    pub min_ttl_secs: u64,

    /// Upper clamp in seconds.
    pub max_ttl_secs: u64,
}

/// Compute the TTL for an entry about to be written.
///
/// * `access_count` — reads observed for this entry so far.
/// * `secs_since_access` — age of the last read, `None` for a fresh entry.
/// * `hour_hit_ratio` — cache hit ratio for the current hour-of-day
///   bucket, `None` when the bucket has no samples yet.
pub fn adaptive_ttl(
    policy: &TtlPolicy,
    access_count: u64,
    secs_since_access: Option<u64>,
    hour_hit_ratio: Option<f64>,
) -> u64 {
    let mut ttl = policy.default_ttl_secs as f64;

    // Popular entries live longer, untouched ones shorter.
    ttl *= match access_count {
        0 => 0.75,
        1..=2 => 1.0,
        3..=9 => 1.2,
        10..=99 => 1.5,
        _ => 2.0,
    };

    if let Some(age) = secs_since_access {
        if age <= DAY_SECS {
            ttl *= 1.5;
        } else if age > WEEK_SECS {
            ttl *= 0.5;
        }
    }

    if let Some(ratio) = hour_hit_ratio {
        if ratio >= 0.8 {
            ttl *= 1.2;
        } else if ratio <= 0.2 {
            ttl *= 0.9;
        }
    }

    (ttl as u64).clamp(policy.min_ttl_secs, policy.max_ttl_secs)
}
