//! In-memory document storage.
//!
//! Keeps each project partition as a vector of documents in insertion order.
//! There is no index, so [`KnowledgeStore::match_documents`] is unsupported
//! and searches always go through the local full-scan path.

use super::store::{KnowledgeStore, Result};
use super::types::KnowledgeDocument;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// An in-process [`KnowledgeStore`].
///
/// Suitable for tests, demos and small corpora. Data is lost when the process
/// ends.
#[derive(Clone, Default)]
pub struct MemoryStore {
    partitions: Arc<RwLock<HashMap<String, Vec<KnowledgeDocument>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of documents across all partitions.
    pub fn count(&self) -> usize {
        self.partitions.read().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl KnowledgeStore for MemoryStore {
    async fn fetch_partition(&self, project_id: &str) -> Result<Vec<KnowledgeDocument>> {
        Ok(self
            .partitions
            .read()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert(&self, document: KnowledgeDocument) -> Result<()> {
        let mut partitions = self.partitions.write();
        let docs = partitions.entry(document.project_id.clone()).or_default();

        match docs.iter_mut().find(|existing| existing.id == document.id) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
        Ok(())
    }

    async fn delete(&self, id: &str, project_id: &str) -> Result<()> {
        if let Some(docs) = self.partitions.write().get_mut(project_id) {
            docs.retain(|doc| doc.id != id);
        }
        Ok(())
    }
}
