//! Error types for the embedding cache.

use thiserror::Error;

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the embedding cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A tier could not be reached.
    #[error("tier unavailable: {0}")]
    TierUnavailable(String),

    /// Shared store (network) error.
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A stored record could not be parsed.
    #[error("corrupt entry for key {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    /// Compressing a value failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// Decompressing a stored value failed.
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// Configuration rejected at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
