//! The retrieval backend seam.
//!
//! The orchestrator only sees [`RankedSource`]; the lexical and vector
//! implementations below are built once per corpus snapshot.

use quarry_core::cache::ResultCache;
use quarry_core::cache::key::embedding_key;
use quarry_core::{Backend, RetrievalError};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

use crate::lexical::LexicalIndex;
use crate::status::RankedList;
use crate::vector::{Embedder, VectorIndex};

/// Something that turns a query into a ranked list of document ids.
pub trait RankedSource: Send + Sync {
    fn backend(&self) -> Backend;

    /// How long the orchestrator waits for this source. `None` runs it
    /// inline on the caller's thread.
    fn budget(&self) -> Option<Duration> {
        None
    }

    /// Best `top_n` documents, best first.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::BackendUnavailable`] when the backend cannot
    /// answer this query.
    fn search(&self, query: &str, top_n: usize) -> Result<RankedList, RetrievalError>;
}

/// BM25 over an immutable [`LexicalIndex`].
#[derive(Debug, Clone)]
pub struct LexicalSource {
    index: Arc<LexicalIndex>,
}

impl LexicalSource {
    #[must_use]
    pub const fn new(index: Arc<LexicalIndex>) -> Self {
        Self { index }
    }
}

impl RankedSource for LexicalSource {
    fn backend(&self) -> Backend {
        Backend::Lexical
    }

    fn search(&self, query: &str, top_n: usize) -> Result<RankedList, RetrievalError> {
        Ok(self.index.search(query, top_n))
    }
}

/// Query embedding plus similarity search, with query vectors memoized in
/// the embedding pool.
pub struct VectorSource {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    cache: Arc<ResultCache>,
    timeout: Duration,
}

impl std::fmt::Debug for VectorSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorSource")
            .field("model", &self.embedder.model_id())
            .field("vectors", &self.index.len())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl VectorSource {
    #[must_use]
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        cache: Arc<ResultCache>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            cache,
            timeout,
        }
    }

    fn unavailable(reason: impl Into<String>) -> RetrievalError {
        RetrievalError::BackendUnavailable {
            backend: Backend::Vector,
            reason: reason.into(),
        }
    }

    fn query_vector(&self, query: &str) -> Result<Arc<Vec<f32>>, RetrievalError> {
        let key = embedding_key(self.embedder.model_id(), query);
        if let Some(vector) = self.cache.embedding.get(&key) {
            trace!("query embedding cache hit");
            return Ok(vector);
        }

        let vector = self
            .embedder
            .embed(query)
            .map_err(|err| Self::unavailable(format!("embedding failed: {err:#}")))?;
        self.cache.embedding.set(key, vector.clone());
        Ok(Arc::new(vector))
    }
}

impl RankedSource for VectorSource {
    fn backend(&self) -> Backend {
        Backend::Vector
    }

    fn budget(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    fn search(&self, query: &str, top_n: usize) -> Result<RankedList, RetrievalError> {
        let vector = self.query_vector(query)?;
        self.index
            .similarity_search(&vector, top_n)
            .map_err(|err| Self::unavailable(format!("similarity search failed: {err:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::Bm25Params;
    use crate::vector::{HashingEmbedder, InMemoryVectorIndex};
    use anyhow::bail;
    use quarry_core::config::CacheConfig;

    struct BrokenEmbedder;

    impl Embedder for BrokenEmbedder {
        fn model_id(&self) -> &str {
            "broken"
        }

        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            bail!("model file missing")
        }
    }

    fn vector_source(embedder: Arc<dyn Embedder>) -> VectorSource {
        let hashing = HashingEmbedder::new(64);
        let mut index = InMemoryVectorIndex::new();
        index
            .add("fruit", hashing.embed("apple banana").unwrap())
            .unwrap();
        index
            .add("code", hashing.embed("rust compiler").unwrap())
            .unwrap();
        VectorSource::new(
            embedder,
            Arc::new(index),
            Arc::new(ResultCache::new(&CacheConfig::default())),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn lexical_source_wraps_bm25() {
        let index = LexicalIndex::build([("a", "apple"), ("b", "banana")], Bm25Params::default())
            .unwrap();
        let source = LexicalSource::new(Arc::new(index));
        assert_eq!(source.backend(), Backend::Lexical);
        assert!(source.budget().is_none());
        let hits = source.search("banana", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");
    }

    #[test]
    fn vector_source_memoizes_query_embeddings() {
        let source = vector_source(Arc::new(HashingEmbedder::new(64)));
        assert_eq!(source.budget(), Some(Duration::from_secs(1)));

        let first = source.search("banana apple", 2).unwrap();
        assert_eq!(first[0].0, "fruit");
        assert_eq!(source.cache.embedding.len(), 1);

        let second = source.search("banana apple", 2).unwrap();
        assert_eq!(first, second);
        assert_eq!(source.cache.embedding.stats().hits, 1);
    }

    #[test]
    fn embedding_failure_is_backend_unavailable() {
        let source = vector_source(Arc::new(BrokenEmbedder));
        let err = source.search("banana", 2).unwrap_err();
        assert!(matches!(
            err,
            RetrievalError::BackendUnavailable {
                backend: Backend::Vector,
                ..
            }
        ));
        assert!(err.to_string().contains("model file missing"));
    }
}
