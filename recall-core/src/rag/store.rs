//! Document store abstraction and factory.
//!
//! This module provides a unified interface for the backends that hold the
//! knowledge corpus.

use super::memory_store::MemoryStore;
use super::supabase_store::SupabaseStore;
use super::types::{KnowledgeDocument, MatchQuery, SearchResult};
use crate::config::{ConfigError, StorageConfig, StorageMode};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend has no store-side similarity search.
    #[error("Similarity search is not supported by this store")]
    Unsupported,

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl StoreError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else {
            Self::Request(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified interface for the knowledge corpus.
///
/// Every operation is scoped to a project partition; implementations must
/// never return documents from another partition.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Store-side similarity search.
    ///
    /// Returns at most `top_k` results with similarity strictly above
    /// `threshold`, sorted by descending similarity. Stores without an index
    /// keep the default, which reports [`StoreError::Unsupported`].
    async fn match_documents(&self, _query: MatchQuery<'_>) -> Result<Vec<SearchResult>> {
        Err(StoreError::Unsupported)
    }

    /// Returns every document in the partition, with embeddings when present.
    async fn fetch_partition(&self, project_id: &str) -> Result<Vec<KnowledgeDocument>>;

    /// Inserts the document or replaces the one with the same id.
    async fn upsert(&self, document: KnowledgeDocument) -> Result<()>;

    /// Removes the document with `id` from the partition. Missing ids are not an error.
    async fn delete(&self, id: &str, project_id: &str) -> Result<()>;
}

/// Creates a store for the configured backend.
///
/// - `Supabase` talks to PostgREST and uses the configured match function
/// - `Memory` keeps documents in process
pub fn create_store(config: &StorageConfig) -> Result<Arc<dyn KnowledgeStore>> {
    match &config.backend {
        StorageMode::Supabase { url, key } => {
            let store = SupabaseStore::new(url, key, config)?;
            Ok(Arc::new(store))
        }
        StorageMode::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
