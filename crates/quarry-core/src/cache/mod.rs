//! Bounded, thread-safe, TTL-aware result cache.
//!
//! [`ResultCache`] groups four independent [`CachePool`]s:
//!
//! | Pool        | Value                      | Scope          |
//! |-------------|----------------------------|----------------|
//! | `query`     | ranked `ScoredCandidate`s  | corpus id      |
//! | `document`  | document content           | corpus id      |
//! | `embedding` | query embedding vectors    | unscoped       |
//! | `metadata`  | document metadata          | corpus id      |
//!
//! Each pool has its own lock, bounds and default TTL. Expired entries are
//! removed lazily on lookup and periodically by [`CacheSweeper`].

pub mod clock;
pub mod key;
pub mod pool;
pub mod sweep;

use serde::Serialize;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::model::{Metadata, ScoredCandidate};

pub use clock::{Clock, ManualClock, SystemClock};
pub use pool::{CachePool, EntryInfo, PoolStats, Weigh};
pub use sweep::CacheSweeper;

/// The four cache pools used by the retriever.
#[derive(Debug)]
pub struct ResultCache {
    pub query: CachePool<Vec<ScoredCandidate>>,
    pub document: CachePool<String>,
    pub embedding: CachePool<Vec<f32>>,
    pub metadata: CachePool<Metadata>,
}

/// Per-pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultCacheStats {
    pub query: PoolStats,
    pub document: PoolStats,
    pub embedding: PoolStats,
    pub metadata: PoolStats,
}

/// Entries removed by one sweep, per pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub query: usize,
    pub document: usize,
    pub embedding: usize,
    pub metadata: usize,
}

impl SweepReport {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.query + self.document + self.embedding + self.metadata
    }
}

impl ResultCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            query: CachePool::with_clock("query", &config.query, Arc::clone(&clock)),
            document: CachePool::with_clock("document", &config.document, Arc::clone(&clock)),
            embedding: CachePool::with_clock("embedding", &config.embedding, Arc::clone(&clock)),
            metadata: CachePool::with_clock("metadata", &config.metadata, clock),
        }
    }

    /// Purge TTL-expired entries from every pool, one lock acquisition each.
    pub fn purge_expired(&self) -> SweepReport {
        SweepReport {
            query: self.query.purge_expired(),
            document: self.document.purge_expired(),
            embedding: self.embedding.purge_expired(),
            metadata: self.metadata.purge_expired(),
        }
    }

    /// Drop cached query results for `corpus_id`.
    pub fn invalidate_queries(&self, corpus_id: &str) -> usize {
        self.query.purge_scope(corpus_id)
    }

    /// Drop every corpus-scoped entry (query results, content, metadata).
    pub fn invalidate_corpus(&self, corpus_id: &str) -> usize {
        self.query.purge_scope(corpus_id)
            + self.document.purge_scope(corpus_id)
            + self.metadata.purge_scope(corpus_id)
    }

    pub fn clear(&self) {
        self.query.clear();
        self.document.clear();
        self.embedding.clear();
        self.metadata.clear();
    }

    #[must_use]
    pub fn stats(&self) -> ResultCacheStats {
        ResultCacheStats {
            query: self.query.stats(),
            document: self.document.stats(),
            embedding: self.embedding.stats(),
            metadata: self.metadata.stats(),
        }
    }
}
