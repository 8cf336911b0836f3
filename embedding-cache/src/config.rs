//! Configuration for the embedding cache.
//!
//! One typed structure, defaults enumerated once, validated at
//! construction. There is no environment-variable fallback: whatever the
//! gateway wants, it sets explicitly.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// How the periodic optimizer ranks file-tier entries when refilling the
/// memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionStrategy {
    /// Rank by total access count.
    Frequency,
    /// Rank by most recent access.
    Recency,
}

/// Configuration for [`CacheController`](crate::CacheController).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the in-process memory tier.
    pub enable_memory_cache: bool,

    /// Enable the local-disk tier.
    pub enable_file_cache: bool,

    /// Enable the shared network tier.
    pub enable_distributed_cache: bool,

    /// Connection URL for the shared store.
    pub distributed_store_url: String,

    /// Prefix applied to every shared-store key; the invalidation channel
    /// name is derived from it as `<prefix>pubsub`.
    pub key_prefix: String,

    /// Starting TTL for new entries, in seconds.
    pub default_ttl_secs: u64,

    /// Lower bound for the adaptive TTL, in seconds.
    pub min_ttl_secs: u64,

    /// Upper bound for the adaptive TTL, in seconds.
    pub max_ttl_secs: u64,

    /// Maximum number of entries held by the memory tier.
    pub memory_capacity: usize,

    /// Directory backing the file tier.
    pub file_cache_directory: PathBuf,

    /// Compress values above the threshold before storing.
    pub compression_enabled: bool,

    /// lz4 compression level.
    pub compression_level: i32,

    /// Values whose raw size exceeds this many bytes are compressed.
    pub compression_threshold_bytes: usize,

    /// Minimum cosine similarity for a prefetch candidate (0.0 - 1.0).
    pub prefetch_threshold: f32,

    /// Maximum number of entries pre-loaded per prefetch pass.
    pub max_prefetch_items: usize,

    /// File-tier hits are promoted to the memory tier once their access
    /// count reaches this threshold.
    pub frequency_promotion_threshold: u64,

    /// Ranking used by the periodic optimizer.
    pub promotion_strategy: PromotionStrategy,

    /// Interval between optimizer passes, in seconds.
    pub optimize_interval_secs: u64,

    /// Interval between stats collection passes, in seconds.
    pub stats_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable_memory_cache: true,
            enable_file_cache: true,
            enable_distributed_cache: false,
            distributed_store_url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: "embedcache:".to_string(),
            default_ttl_secs: 24 * 60 * 60,
            min_ttl_secs: 60 * 60,
            max_ttl_secs: 7 * 24 * 60 * 60,
            memory_capacity: 1000,
            file_cache_directory: dirs::cache_dir()
                .unwrap_or_default()
                .join("toolgate/embeddings"),
            compression_enabled: true,
            compression_level: 4,
            compression_threshold_bytes: 1024,
            prefetch_threshold: 0.85,
            max_prefetch_items: 5,
            frequency_promotion_threshold: 3,
            promotion_strategy: PromotionStrategy::Frequency,
            optimize_interval_secs: 300,
            stats_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the file-tier directory.
    pub fn with_file_cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.file_cache_directory = dir.into();
        self
    }

    /// Set the memory-tier capacity.
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    /// Enable the distributed tier against the given store URL.
    pub fn with_distributed_store(mut self, url: impl Into<String>) -> Self {
        self.enable_distributed_cache = true;
        self.distributed_store_url = url.into();
        self
    }

    /// Set the shared-store key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl_secs(mut self, ttl: u64) -> Self {
        self.default_ttl_secs = ttl;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.enable_memory_cache && !self.enable_file_cache && !self.enable_distributed_cache {
            return Err(CacheError::InvalidConfig(
                "at least one tier must be enabled".to_string(),
            ));
        }

        if self.enable_memory_cache && self.memory_capacity == 0 {
            return Err(CacheError::InvalidConfig(
                "memory_capacity must be greater than zero".to_string(),
            ));
        }

        if self.min_ttl_secs > self.max_ttl_secs {
            return Err(CacheError::InvalidConfig(format!(
                "min_ttl_secs ({}) exceeds max_ttl_secs ({})",
                self.min_ttl_secs, self.max_ttl_secs
            )));
        }

        if !(0.0..=1.0).contains(&self.prefetch_threshold) {
            return Err(CacheError::InvalidConfig(format!(
                "prefetch_threshold must be within 0.0..=1.0, got {}",
                self.prefetch_threshold
            )));
        }

        if self.compression_enabled && !(1..=12).contains(&self.compression_level) {
            return Err(CacheError::InvalidConfig(format!(
                "compression_level must be within 1..=12, got {}",
                self.compression_level
            )));
        }

        if self.enable_distributed_cache && self.key_prefix.is_empty() {
            return Err(CacheError::InvalidConfig(
                "key_prefix must not be empty when the distributed tier is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_all_tiers_disabled_is_rejected() {
        let config = CacheConfig {
            enable_memory_cache: false,
            enable_file_cache: false,
            enable_distributed_cache: false,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_memory_capacity_is_rejected() {
        let config = CacheConfig::default().with_memory_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_ttl_bounds_are_rejected() {
        let config = CacheConfig {
            min_ttl_secs: 100,
            max_ttl_secs: 10,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_prefetch_threshold_is_rejected() {
        let config = CacheConfig {
            prefetch_threshold: 1.5,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prefix_rejected_with_distributed_tier() {
        let config = CacheConfig::default()
            .with_distributed_store("redis://localhost:6379")
            .with_key_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::new()
            .with_memory_capacity(10)
            .with_default_ttl_secs(120)
            .with_key_prefix("test:");

        assert_eq!(config.memory_capacity, 10);
        assert_eq!(config.default_ttl_secs, 120);
        assert_eq!(config.key_prefix, "test:");
    }
}
