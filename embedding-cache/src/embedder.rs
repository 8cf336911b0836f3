//! Cached embedding generation.
//!
//! The owning layer's view of the cache: consult it first, compute on a
//! miss, write the result back. The cache is strictly an optimization
//! here; a cache failure never stops the caller from getting a freshly
//! computed vector, while a provider failure always propagates.

use std::sync::Arc;

use tracing::{debug, warn};

use toolgate_embeddings::provider::{EmbeddingProvider, EmbeddingRequest};
use toolgate_embeddings::{Embedding, Result};

use crate::controller::CacheController;

/// An embedding provider fronted by the tiered cache.
pub struct CachedEmbedder<P> {
    provider: P,
    cache: Arc<CacheController>,
}

impl<P> CachedEmbedder<P>
where
    P: EmbeddingProvider,
{
    /// Front `provider` with `cache`.
    pub fn new(provider: P, cache: Arc<CacheController>) -> Self {
        Self { provider, cache }
    }

    /// Get the vector for `text`, computing it only on a cache miss.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let model = self.provider.default_model().to_string();

        if let Some(vector) = self.cache.get(text, &model).await {
            debug!("embedding served from cache");
            return Ok(vector);
        }

        let response = self
            .provider
            .embed(EmbeddingRequest::new(text).with_model(&model))
            .await?;

        if !self
            .cache
            .set(text, &model, response.embedding.clone())
            .await
        {
            warn!("no cache tier accepted the freshly computed embedding");
        }

        Ok(response.embedding)
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<CacheController> {
        &self.cache
    }

    /// The underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }
}
