//! Error types for the embeddings boundary.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur at the embedding boundary.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider is not configured or reachable.
    #[error("embedding provider unavailable")]
    ProviderUnavailable,

    /// Provider-side failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Text too long for embedding.
    #[error("text too long: {length} characters, max {max_length}")]
    TextTooLong { length: usize, max_length: usize },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
