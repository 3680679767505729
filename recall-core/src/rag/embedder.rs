//! Embedding generation using model providers.
//!
//! This module converts text into normalized vector embeddings. Provider
//! calls dominate retrieval latency and cost, so an [`Embedder`] can be given
//! a cache that memoizes vectors by model, dimensionality and text.

use super::vector::normalize;
use crate::cache::Cache;
use crate::config::ProviderConfig;
use crate::provider::{EmbedRequest, Provider, ProviderError};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during embedding generation.
#[derive(Debug, Error)]
pub enum EmbedderError {
    /// The provider API returned an error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// The provider answered with an empty vector.
    #[error("No embeddings returned")]
    NoEmbeddings,
}

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedderError>;

/// Generates unit-length embeddings through a [`Provider`].
///
/// Every vector is normalized before it is returned, so stored and query
/// embeddings are always compared in the same form.
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: usize,
    cache: Option<Arc<Cache<Vec<f32>>>>,
}

impl Embedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions,
            cache: None,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &ProviderConfig) -> Self {
        Self::new(provider, config.embedding_model.clone(), config.dimensions)
    }

    /// Memoizes embeddings in `cache`.
    pub fn with_cache(mut self, cache: Arc<Cache<Vec<f32>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Generates a normalized embedding for `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider call fails (including a non-success
    /// status or a timeout) or the provider returns an empty vector. Failures
    /// are never cached.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.cache {
            Some(cache) => {
                let key = self.cache_key(text);
                cache
                    .get_or_try_insert_with(&key, cache.default_ttl(), || self.embed_uncached(text))
                    .await
            }
            None => self.embed_uncached(text).await,
        }
    }

    async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest::single(&self.model, text, self.dimensions);
        let raw = self.provider.embed(&request).await?;

        if raw.is_empty() {
            return Err(EmbedderError::NoEmbeddings);
        }

        debug!(model = %self.model, dims = raw.len(), "Generated embedding");
        Ok(normalize(&raw))
    }

    fn cache_key(&self, text: &str) -> String {
        format!("{}:{}:{}", self.model, self.dimensions, text)
    }
}
