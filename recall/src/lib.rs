//! recall - Embedding-based knowledge retrieval
//!
//! This is the convenience wrapper crate that re-exports the recall
//! components for easy usage.
//!
//! # Quick Start
//!
//! ```toml
//! [dependencies]
//! recall = "0.1"
//! ```
//!
//! Implementing your own [`Provider`] or [`KnowledgeStore`] needs the
//! re-exported [`async_trait`] attribute.

// Re-export core
pub use recall_core::*;

pub use async_trait::async_trait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use async_trait::async_trait;
    pub use recall_core::cache::{Cache, CachePools, CacheSweeper};
    pub use recall_core::config::{Config, StorageMode};
    pub use recall_core::provider::{ChatRequest, ChatResponse, EmbedRequest, Provider};
    pub use recall_core::rag::{
        DocumentSummary, KnowledgeDocument, KnowledgeStore, MatchQuery, MemoryStore, NewDocument,
        RetrievalEngine, SearchOutcome, SearchPath, SearchResult,
    };
}
