//! Model provider abstraction layer.
//!
//! This module defines a common interface for embedding and chat backends.
//! [`ZhipuProvider`] is the HTTPS implementation used in production.

mod types;
pub mod zhipu;

// Re-export common types
pub use types::{
    ChatRequest, ChatResponse, EmbedRequest, EmbedResponse, EmbeddingData, Message, Provider,
    ProviderError, Result,
};

// Re-export provider implementations
pub use zhipu::ZhipuProvider;
