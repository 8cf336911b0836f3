//! # Embeddings
//!
//! This crate defines the embedding provider boundary and the vector math
//! used by the Toolgate gateway.
//!
//! The gateway never computes embeddings itself: an [`EmbeddingProvider`]
//! turns text into a dense vector, and everything else (caching, retrieval,
//! prefetch scoring) consumes the resulting [`Embedding`] values through the
//! functions in [`similarity`].

pub mod error;
pub mod provider;
pub mod similarity;

pub use error::{EmbeddingError, Result};
pub use provider::{EmbeddingProvider, EmbeddingRequest, EmbeddingResponse, LocalProvider};
pub use similarity::{Scored, cosine_similarity, find_top_k, normalize};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Default dimension used when a provider does not report one.
pub const DEFAULT_DIMENSION: usize = 1536;
