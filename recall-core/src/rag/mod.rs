//! Retrieval over a partitioned knowledge base.
//!
//! This module turns text into normalized embeddings, stores documents per
//! project partition, and finds the documents most similar to a query.
//!
//! # Architecture
//!
//! - [`RetrievalEngine`]: ingestion, search, listing and research
//! - [`Embedder`]: provider-backed, normalizing, optionally cached
//! - [`KnowledgeStore`]: the corpus, with a Supabase and an in-memory backend
//! - [`vector`]: cosine similarity and local ranking
//!
//! # Search paths
//!
//! 1. **Remote**: the store ranks documents itself (e.g. a pgvector RPC).
//! 2. **Fallback**: if the remote path is unsupported or fails, the whole
//!    partition is fetched and ranked locally. The switch is logged and
//!    reported through [`SearchOutcome::path`], but it is not an error.
//!
//! Only when both paths fail does a search return [`RagError::Retrieval`].

mod embedder;
mod memory_store;
pub mod research;
mod store;
mod supabase_store;
mod types;
pub mod vector;

pub use embedder::{Embedder, EmbedderError};
pub use memory_store::MemoryStore;
pub use research::{ResearchReport, ResearchSource};
pub use store::{create_store, KnowledgeStore, StoreError};
pub use supabase_store::SupabaseStore;
pub use types::{
    DocumentMetadata, DocumentSummary, KnowledgeDocument, MatchQuery, NewDocument, SearchOutcome,
    SearchPath, SearchResult, DEFAULT_DOC_TYPE, DEFAULT_TITLE,
};

use crate::cache::{Cache, CachePools};
use crate::config::{Config, ProviderConfig, SearchConfig};
use crate::provider::{ChatRequest, Provider, ProviderError, ZhipuProvider};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Message carried by [`RagError::Retrieval`]; safe to show to end users.
pub const SEARCH_UNAVAILABLE: &str = "search temporarily unavailable";

/// Metadata keys managed by the engine; callers cannot override them via `extra`.
const RESERVED_METADATA_KEYS: [&str; 5] = ["projectId", "title", "type", "createdAt", "tags"];

static NEXT_DOC_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generates `doc_<unix-millis>_<seq>`; the sequence keeps ids unique within
/// a millisecond.
fn default_doc_id(now: DateTime<Utc>) -> String {
    let seq = NEXT_DOC_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("doc_{}_{seq}", now.timestamp_millis())
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("Embedder error: {0}")]
    Embedder(#[from] EmbedderError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to retrieve context: {0}")]
    Retrieval(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, RagError>;

/// Ingestion and retrieval over one provider and one store.
///
/// The engine is `Clone` and cheap to share; clones use the same provider,
/// store and caches.
#[derive(Clone)]
pub struct RetrievalEngine {
    embedder: Embedder,
    provider: Arc<dyn Provider>,
    store: Arc<dyn KnowledgeStore>,
    search_cache: Option<Arc<Cache<Vec<SearchResult>>>>,
    provider_config: ProviderConfig,
    search_config: SearchConfig,
}

impl RetrievalEngine {
    /// Creates an engine without caches.
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn KnowledgeStore>, config: &Config) -> Self {
        Self {
            embedder: Embedder::from_config(provider.clone(), &config.provider),
            provider,
            store,
            search_cache: None,
            provider_config: config.provider.clone(),
            search_config: config.search.clone(),
        }
    }

    /// Routes embeddings and text searches through the given pools.
    pub fn with_caches(mut self, pools: &CachePools) -> Self {
        self.embedder = self.embedder.with_cache(pools.embeddings.clone());
        self.search_cache = Some(pools.search.clone());
        self
    }

    /// Builds the Zhipu provider and the configured store.
    ///
    /// Fails before any network call when credentials are missing.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use recall_core::{Config, rag::RetrievalEngine};
    /// # async fn example() -> recall_core::rag::Result<()> {
    /// let config = Config::load_or_default().apply_env();
    /// let engine = RetrievalEngine::from_config(&config)?;
    /// let outcome = engine.search_text("refund policy", None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = Arc::new(ZhipuProvider::new(&config.provider)?);
        let store = create_store(&config.storage)?;
        Ok(Self::new(provider, store, config))
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Resolves an optional project id to a partition, defaulting to the shared one.
    pub fn partition(&self, project: Option<&str>) -> String {
        project
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(self.search_config.default_project.as_str())
            .to_string()
    }

    /// Embeds `text` as a normalized vector.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::InvalidInput("text to embed is empty".to_string()));
        }
        Ok(self.embedder.embed(text).await?)
    }

    /// Finds the `top_k` documents most similar to `query_embedding`.
    ///
    /// Tries the store's own similarity search first and falls back to a
    /// local scan of the partition. Results always have similarity strictly
    /// above `threshold` and are sorted by descending similarity.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        project: Option<&str>,
        threshold: f32,
        top_k: usize,
    ) -> Result<SearchOutcome> {
        let project_id = self.partition(project);
        let query = MatchQuery {
            embedding: query_embedding,
            threshold,
            top_k,
            project_id: &project_id,
        };

        match self.store.match_documents(query).await {
            Ok(results) => {
                return Ok(SearchOutcome {
                    results,
                    path: SearchPath::Remote,
                })
            }
            Err(StoreError::Unsupported) => {
                debug!(project = %project_id, "Store has no similarity search, scanning partition");
            }
            Err(e) => {
                warn!(project = %project_id, error = %e, "Server-side search failed, falling back to local scan");
            }
        }

        let documents = self.store.fetch_partition(&project_id).await.map_err(|e| {
            error!(project = %project_id, error = %e, "Fallback search failed");
            RagError::Retrieval(SEARCH_UNAVAILABLE.to_string())
        })?;

        let scanned = documents.len();
        let results = vector::rank_documents(query_embedding, documents, threshold, top_k);
        debug!(project = %project_id, scanned, matched = results.len(), "Local scan completed");

        Ok(SearchOutcome {
            results,
            path: SearchPath::Fallback,
        })
    }

    /// Embeds `query` and searches with the configured threshold and `top_k`.
    pub async fn search_text(&self, query: &str, project: Option<&str>) -> Result<SearchOutcome> {
        self.search_text_with(
            query,
            project,
            self.search_config.threshold,
            self.search_config.top_k,
        )
        .await
    }

    /// Embeds `query` and searches, memoizing results in the search cache.
    pub async fn search_text_with(
        &self,
        query: &str,
        project: Option<&str>,
        threshold: f32,
        top_k: usize,
    ) -> Result<SearchOutcome> {
        let project_id = self.partition(project);
        let cache_key = format!("{project_id}:{threshold}:{top_k}:{query}");

        if let Some(results) = self.search_cache.as_ref().and_then(|c| c.get(&cache_key)) {
            debug!(project = %project_id, "Search cache hit");
            return Ok(SearchOutcome {
                results,
                path: SearchPath::Cache,
            });
        }

        let embedding = self.embed(query).await?;
        let outcome = self
            .search(&embedding, Some(&project_id), threshold, top_k)
            .await?;

        if let Some(cache) = &self.search_cache {
            cache.insert(cache_key, outcome.results.clone());
        }

        info!(
            project = %project_id,
            results = outcome.results.len(),
            path = ?outcome.path,
            "Search completed"
        );
        Ok(outcome)
    }

    /// Embeds and stores a document, returning its id.
    ///
    /// Missing fields are filled in: id `doc_<unix-millis>_<seq>`, title
    /// `Untitled`, type `text`, `createdAt` now. A document with the same id
    /// in the partition is replaced.
    pub async fn upsert(&self, document: NewDocument, project: Option<&str>) -> Result<String> {
        if document.content.trim().is_empty() {
            return Err(RagError::InvalidInput("document content is empty".to_string()));
        }

        let project_id = self.partition(project);
        let now = Utc::now();
        let id = document
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| default_doc_id(now));

        let embedding = self.embedder.embed(&document.content).await?;

        let mut extra = document.extra;
        extra.retain(|key, _| !RESERVED_METADATA_KEYS.contains(&key.as_str()));

        let metadata = DocumentMetadata {
            project_id: Some(project_id.clone()),
            title: Some(document.title.unwrap_or_else(|| DEFAULT_TITLE.to_string())),
            doc_type: Some(document.doc_type.unwrap_or_else(|| DEFAULT_DOC_TYPE.to_string())),
            created_at: Some(now),
            tags: document.tags,
            extra,
        };

        let stored = KnowledgeDocument {
            id: id.clone(),
            content: document.content,
            embedding: Some(embedding),
            metadata,
            project_id: project_id.clone(),
        };

        self.store.upsert(stored).await?;
        self.invalidate_searches();

        info!(id = %id, project = %project_id, "Document upserted");
        Ok(id)
    }

    /// Removes a document from the partition. Missing ids are not an error.
    pub async fn delete(&self, id: &str, project: Option<&str>) -> Result<()> {
        let project_id = self.partition(project);
        self.store.delete(id, &project_id).await?;
        self.invalidate_searches();

        info!(id, project = %project_id, "Document deleted");
        Ok(())
    }

    /// Lists the partition's documents, newest first.
    pub async fn list(&self, project: Option<&str>) -> Result<Vec<DocumentSummary>> {
        let project_id = self.partition(project);
        let documents = self.store.fetch_partition(&project_id).await?;

        let mut summaries: Vec<DocumentSummary> =
            documents.iter().map(DocumentSummary::from).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Answers `query` with the chat model, grounded in retrieved documents.
    pub async fn research(&self, query: &str, project: Option<&str>) -> Result<ResearchReport> {
        let outcome = self.search_text(query, project).await?;

        let messages = research::build_messages(query, &outcome.results);
        let request = ChatRequest::new(self.provider_config.chat_model.clone(), messages)
            .with_temperature(self.provider_config.temperature)
            .with_max_tokens(self.provider_config.max_tokens);

        let analysis = self.provider.complete(request).await?;
        info!(sources = outcome.results.len(), "Research completed");

        Ok(research::into_report(analysis, &outcome.results))
    }

    fn invalidate_searches(&self) {
        if let Some(cache) = &self.search_cache {
            cache.clear();
        }
    }
}
