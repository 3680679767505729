//! recall-core - Embedding retrieval engine
//!
//! Provides the components behind semantic search over a partitioned
//! knowledge base:
//! - Embedding and chat provider abstraction (Zhipu)
//! - Document stores (Supabase/PostgREST, in-memory)
//! - Two-path similarity search with a local fallback
//! - Bounded TTL/LRU caches with a background sweeper
//! - Configuration management
//!
//! ## Primary API
//!
//! Most users build a [`RetrievalEngine`] from a [`Config`] and optionally
//! attach [`CachePools`].

// Public modules
pub mod cache;
pub mod config;
pub mod provider;
pub mod rag;
pub mod time;

// Public exports
pub use cache::{Cache, CachePools, CacheStats, CacheSweeper};
pub use config::{Config, ConfigError};
pub use rag::{
    KnowledgeDocument, KnowledgeStore, NewDocument, RagError, RetrievalEngine, SearchOutcome,
    SearchPath, SearchResult,
};
pub use time::{SystemTimeSource, TimeSource};

// Provider exports
pub use provider::{ChatRequest, ChatResponse, Message, Provider, ProviderError, ZhipuProvider};
