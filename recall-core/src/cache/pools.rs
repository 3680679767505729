//! Named cache pools with independent limits.
//!
//! The retrieval engine uses `embeddings` and `search`. `general` and `user`
//! are left to callers embedding the engine in a larger service, e.g. for
//! per-session or per-user state, and are swept alongside the others.

use super::{Cache, CacheStats, CacheSweeper, Sweep};
use crate::config::{CacheLimits, CacheSettings};
use crate::rag::SearchResult;
use crate::time::TimeSource;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// The named cache pools shared by a retrieval engine.
///
/// Pools are independent: each has its own limits, and clearing or sweeping
/// one never touches the others.
#[derive(Clone)]
pub struct CachePools {
    /// Free-form application data; not read by the engine.
    pub general: Arc<Cache<Value>>,
    /// Normalized embeddings, used by [`Embedder`](crate::rag::Embedder).
    pub embeddings: Arc<Cache<Vec<f32>>>,
    /// Ranked results, used by [`RetrievalEngine`](crate::rag::RetrievalEngine).
    pub search: Arc<Cache<Vec<SearchResult>>>,
    /// Per-user application data; not read by the engine.
    pub user: Arc<Cache<Value>>,
}

impl CachePools {
    pub fn from_settings(settings: &CacheSettings) -> Self {
        Self {
            general: Arc::new(Cache::from_limits(&settings.general).named("general")),
            embeddings: Arc::new(Cache::from_limits(&settings.embeddings).named("embeddings")),
            search: Arc::new(Cache::from_limits(&settings.search).named("search")),
            user: Arc::new(Cache::from_limits(&settings.user).named("user")),
        }
    }

    /// Builds the pools on a shared clock.
    pub fn with_time_source(settings: &CacheSettings, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            general: pool(&settings.general, "general", &clock),
            embeddings: pool(&settings.embeddings, "embeddings", &clock),
            search: pool(&settings.search, "search", &clock),
            user: pool(&settings.user, "user", &clock),
        }
    }

    pub fn sweep_targets(&self) -> Vec<Arc<dyn Sweep>> {
        vec![
            self.general.clone() as Arc<dyn Sweep>,
            self.embeddings.clone() as Arc<dyn Sweep>,
            self.search.clone() as Arc<dyn Sweep>,
            self.user.clone() as Arc<dyn Sweep>,
        ]
    }

    /// Starts a sweeper over every pool. Must be called inside a Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> CacheSweeper {
        CacheSweeper::spawn(interval, self.sweep_targets())
    }

    /// Per-pool statistics, keyed by pool name.
    pub fn stats(&self) -> Vec<(&str, CacheStats)> {
        vec![
            (self.general.name(), self.general.stats()),
            (self.embeddings.name(), self.embeddings.stats()),
            (self.search.name(), self.search.stats()),
            (self.user.name(), self.user.stats()),
        ]
    }

    pub fn clear_all(&self) {
        self.general.clear();
        self.embeddings.clear();
        self.search.clear();
        self.user.clear();
    }
}

fn pool<T>(limits: &CacheLimits, name: &str, clock: &Arc<dyn TimeSource>) -> Arc<Cache<T>>
where
    T: Clone + Serialize,
{
    Arc::new(
        Cache::from_limits(limits)
            .named(name)
            .with_time_source(clock.clone()),
    )
}

impl Default for CachePools {
    fn default() -> Self {
        Self::from_settings(&CacheSettings::default())
    }
}
