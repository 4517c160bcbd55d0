//! Hybrid retrieval orchestration across lexical and vector backends.
//!
//! The retriever degrades instead of failing:
//! - a backend that was never built for a corpus contributes no list
//! - a backend that errors or exceeds its budget contributes no list
//! - with no list at all the result is empty and the status `Unavailable`
//! - a reranker failure keeps the fused order
//!
//! Every such fallback is recorded in the returned [`RetrievalStatus`].

use anyhow::{Context, Result, bail};
use quarry_core::cache::key::{document_key, embedding_key, key_prefix, query_key};
use quarry_core::cache::{CacheSweeper, Clock, ResultCache, ResultCacheStats, SystemClock};
use quarry_core::config::EngineConfig;
use quarry_core::{Backend, Document, Metadata, RetrievalError, RetrievalMethod, ScoredCandidate};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::backend::{LexicalSource, RankedSource, VectorSource};
use crate::deadline::{self, Bounded, InFlight, Pending, spawn_bounded};
use crate::fusion::{WeightedList, fuse};
use crate::lexical::{Bm25Params, LexicalIndex};
use crate::registry::{BackendState, Corpus, CorpusRegistry, CorpusSnapshot};
use crate::rerank::{CrossEncoder, Reranker};
use crate::status::{BackendOutcome, DegradeReason, RankedList, RetrievalStatus, Stage};
use crate::vector::{Embedder, InMemoryVectorIndexFactory, VectorIndex, VectorIndexFactory};

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// One search call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub corpus_id: String,
    pub query: String,
    pub top_k: usize,
    pub use_rerank: bool,
    /// Past this instant the pipeline returns whatever it has.
    pub deadline: Option<Instant>,
}

impl SearchRequest {
    pub fn new(corpus_id: impl Into<String>, query: impl Into<String>, top_k: usize) -> Self {
        Self {
            corpus_id: corpus_id.into(),
            query: query.into(),
            top_k,
            use_rerank: false,
            deadline: None,
        }
    }

    #[must_use]
    pub const fn with_rerank(mut self, use_rerank: bool) -> Self {
        self.use_rerank = use_rerank;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// Candidates plus how they were obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub candidates: Vec<ScoredCandidate>,
    pub status: RetrievalStatus,
    pub cache_hit: bool,
}

impl SearchOutcome {
    const fn unavailable() -> Self {
        Self {
            candidates: Vec::new(),
            status: RetrievalStatus::Unavailable,
            cache_hit: false,
        }
    }
}

/// Result of [`HybridRetriever::add_documents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Documents passed in this call.
    pub indexed_count: usize,
    pub lexical_ok: bool,
    pub vector_ok: bool,
    /// Documents in the corpus after the rebuild.
    pub document_count: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    pub lexical: f64,
    pub vector: f64,
    pub k: u32,
}

/// Result of [`HybridRetriever::get_stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStats {
    pub corpus_id: String,
    pub document_count: usize,
    pub generation: u64,
    pub lexical_available: bool,
    pub vector_available: bool,
    pub reranker_available: bool,
    pub weights: FusionWeights,
    /// Share of this corpus's searches answered by the query cache.
    pub cache_hit_rate: f64,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures and constructs a [`HybridRetriever`].
pub struct RetrieverBuilder {
    config: EngineConfig,
    embedder: Option<Arc<dyn Embedder>>,
    vector_factory: Option<Arc<dyn VectorIndexFactory>>,
    cross_encoder: Option<Arc<dyn CrossEncoder>>,
    clock: Option<Arc<dyn Clock>>,
    sweeper: bool,
}

impl RetrieverBuilder {
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            embedder: None,
            vector_factory: None,
            cross_encoder: None,
            clock: None,
            sweeper: true,
        }
    }

    /// Embedding model for the vector backend. Without one the vector
    /// backend stays disabled.
    #[must_use]
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Vector store used for each corpus build. Defaults to
    /// [`InMemoryVectorIndexFactory`].
    #[must_use]
    pub fn with_vector_factory(mut self, factory: Arc<dyn VectorIndexFactory>) -> Self {
        self.vector_factory = Some(factory);
        self
    }

    #[must_use]
    pub fn with_cross_encoder(mut self, encoder: Arc<dyn CrossEncoder>) -> Self {
        self.cross_encoder = Some(encoder);
        self
    }

    /// Time source for cache TTLs.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Skip the background TTL sweep thread.
    #[must_use]
    pub const fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Validate the configuration and assemble the retriever.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Configuration`] if the configuration is
    /// invalid, a configured reranker cannot be constructed, or the sweep
    /// thread cannot be started.
    pub fn build(self) -> Result<HybridRetriever, RetrievalError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = Arc::new(ResultCache::with_clock(&self.config.cache, clock));

        let reranker = if self.config.rerank.enabled {
            let encoder = match self.cross_encoder {
                Some(encoder) => Some(encoder),
                None => http_cross_encoder(&self.config)?,
            };
            encoder.map(|encoder| Reranker::new(encoder, &self.config.rerank))
        } else {
            None
        };

        let interval = self.config.cache.sweep_interval();
        let sweeper = if self.sweeper && !interval.is_zero() {
            let sweeper = CacheSweeper::spawn(Arc::clone(&cache), interval).map_err(|err| {
                RetrievalError::configuration(format!("failed to start cache sweeper: {err}"))
            })?;
            Some(sweeper)
        } else {
            None
        };

        info!(
            lexical = self.config.lexical.enabled,
            vector = self.config.vector.enabled && self.embedder.is_some(),
            reranker = reranker.is_some(),
            "hybrid retriever ready"
        );

        let helper_slots = InFlight::new(self.config.vector.max_concurrent);
        Ok(HybridRetriever {
            config: self.config,
            registry: CorpusRegistry::new(),
            cache,
            embedder: self.embedder,
            vector_factory: self
                .vector_factory
                .unwrap_or_else(|| Arc::new(InMemoryVectorIndexFactory)),
            reranker,
            helper_slots,
            _sweeper: sweeper,
        })
    }
}

#[cfg(feature = "http-rerank")]
fn http_cross_encoder(
    config: &EngineConfig,
) -> Result<Option<Arc<dyn CrossEncoder>>, RetrievalError> {
    let Some(http) = &config.http_rerank else {
        return Ok(None);
    };
    let encoder = crate::rerank::HttpCrossEncoder::from_config(http)
        .map_err(|err| RetrievalError::rerank_model(format!("{err:#}")))?;
    Ok(Some(Arc::new(encoder)))
}

#[cfg(not(feature = "http-rerank"))]
fn http_cross_encoder(
    config: &EngineConfig,
) -> Result<Option<Arc<dyn CrossEncoder>>, RetrievalError> {
    if config.http_rerank.is_some() {
        return Err(RetrievalError::rerank_model(
            "http_rerank is configured but quarry-search was built without the `http-rerank` feature",
        ));
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Retriever
// ---------------------------------------------------------------------------

/// Lexical + vector retrieval with RRF fusion, optional reranking and a
/// write-through result cache, over any number of named corpora.
pub struct HybridRetriever {
    config: EngineConfig,
    registry: CorpusRegistry,
    cache: Arc<ResultCache>,
    embedder: Option<Arc<dyn Embedder>>,
    vector_factory: Arc<dyn VectorIndexFactory>,
    reranker: Option<Reranker>,
    /// Bounds live helper threads for budgeted sources.
    helper_slots: InFlight,
    _sweeper: Option<CacheSweeper>,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("corpora", &self.registry.ids())
            .field("embedder", &self.embedder.as_ref().map(|e| e.model_id()))
            .field("reranker", &self.reranker)
            .finish_non_exhaustive()
    }
}

/// A source either answers inline or on a helper thread with a budget.
enum Slot {
    Done(BackendOutcome),
    Inline(Arc<dyn RankedSource>),
    Waiting(Pending<Result<RankedList, RetrievalError>>, Duration),
}

fn outcome_of(result: Result<RankedList, RetrievalError>) -> BackendOutcome {
    match result {
        Ok(list) => BackendOutcome::Ok(list),
        Err(err) => BackendOutcome::Degraded(err),
    }
}

/// Degradations that hold for as long as the snapshot does.
const fn is_structural(reason: &DegradeReason) -> bool {
    matches!(
        reason,
        DegradeReason::BackendMissing { .. } | DegradeReason::RerankerUnavailable
    )
}

impl HybridRetriever {
    /// Retriever with default collaborators (no embedder, no reranker).
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Configuration`] if `config` is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, RetrievalError> {
        RetrieverBuilder::new(config).build()
    }

    #[must_use]
    pub fn builder(config: EngineConfig) -> RetrieverBuilder {
        RetrieverBuilder::new(config)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> ResultCacheStats {
        self.cache.stats()
    }

    #[must_use]
    pub const fn reranker_available(&self) -> bool {
        self.reranker.is_some()
    }

    /// Budgeted backend calls (vector searches) still running, including
    /// ones the caller already gave up on.
    #[must_use]
    pub fn backend_calls_in_flight(&self) -> usize {
        self.helper_slots.current()
    }

    #[must_use]
    pub fn corpus_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    const fn weight(&self, backend: Backend) -> f64 {
        match backend {
            Backend::Lexical => self.config.fusion.lexical_weight,
            Backend::Vector => self.config.fusion.vector_weight,
            Backend::Reranker => 0.0,
        }
    }

    fn corpus(&self, corpus_id: &str) -> Result<Arc<Corpus>, RetrievalError> {
        self.registry
            .get(corpus_id)
            .ok_or_else(|| RetrievalError::not_found(corpus_id))
    }

    // -- indexing -----------------------------------------------------------

    /// Merge `documents` into `corpus_id` (creating it if needed), rebuild
    /// its indexes and swap them in. Invalidates every cache entry scoped to
    /// the corpus.
    ///
    /// Build failures disable the affected backend; they are reported in
    /// the returned [`IndexReport`], never raised.
    #[instrument(skip_all, fields(corpus = corpus_id, documents = documents.len()))]
    pub fn add_documents(&self, corpus_id: &str, documents: Vec<Document>) -> IndexReport {
        let indexed_count = documents.len();
        let corpus = self.registry.get_or_create(corpus_id);
        let _rebuild = corpus.lock_rebuild();

        let current = corpus.snapshot();
        let merged = current.merged_documents(documents);
        let generation = current.generation() + 1;

        let lexical = self.build_lexical(&merged);
        let vector = self.build_vector(corpus_id, &merged);

        let report = IndexReport {
            indexed_count,
            lexical_ok: lexical.is_ready(),
            vector_ok: vector.is_ready(),
            document_count: merged.len(),
            generation,
        };

        corpus.install(CorpusSnapshot::new(generation, merged, lexical, vector));
        let purged = self.cache.invalidate_corpus(corpus_id);

        info!(
            generation,
            document_count = report.document_count,
            lexical_ok = report.lexical_ok,
            vector_ok = report.vector_ok,
            purged,
            "indexed documents"
        );
        report
    }

    fn build_lexical(&self, documents: &[Document]) -> BackendState {
        let config = &self.config.lexical;
        if !config.enabled {
            return BackendState::Disabled("lexical backend disabled by configuration".to_string());
        }

        let params = Bm25Params {
            k1: config.k1,
            b: config.b,
        };
        let pairs = documents
            .iter()
            .map(|doc| (doc.id.as_str(), doc.content.as_str()));
        match LexicalIndex::build(pairs, params) {
            Ok(index) => BackendState::Ready(Arc::new(LexicalSource::new(Arc::new(index)))),
            Err(err) => {
                warn!("lexical index build failed, lexical backend disabled: {err:#}");
                BackendState::Failed(format!("{err:#}"))
            }
        }
    }

    fn build_vector(&self, corpus_id: &str, documents: &[Document]) -> BackendState {
        if !self.config.vector.enabled {
            return BackendState::Disabled("vector backend disabled by configuration".to_string());
        }
        let Some(embedder) = &self.embedder else {
            return BackendState::Disabled("no embedder configured".to_string());
        };

        match self.index_vectors(corpus_id, embedder.as_ref(), documents) {
            Ok(index) => BackendState::Ready(Arc::new(VectorSource::new(
                Arc::clone(embedder),
                index,
                Arc::clone(&self.cache),
                self.config.vector.timeout(),
            ))),
            Err(err) => {
                warn!("vector index build failed, vector backend disabled: {err:#}");
                BackendState::Failed(format!("{err:#}"))
            }
        }
    }

    /// Fill a fresh index, embedding only texts the embedding pool has not
    /// seen.
    fn index_vectors(
        &self,
        corpus_id: &str,
        embedder: &dyn Embedder,
        documents: &[Document],
    ) -> Result<Arc<dyn VectorIndex>> {
        let mut index = self
            .vector_factory
            .create(corpus_id)
            .context("failed to create vector index")?;

        let model = embedder.model_id();
        let keys: Vec<String> = documents
            .iter()
            .map(|doc| embedding_key(model, &doc.content))
            .collect();
        let mut vectors: Vec<Option<Arc<Vec<f32>>>> =
            keys.iter().map(|key| self.cache.embedding.get(key)).collect();

        let missing: Vec<usize> = (0..documents.len())
            .filter(|&i| vectors[i].is_none())
            .collect();
        if !missing.is_empty() {
            let texts: Vec<&str> = missing
                .iter()
                .map(|&i| documents[i].content.as_str())
                .collect();
            let embedded = embedder
                .embed_batch(&texts)
                .context("failed to embed documents")?;
            if embedded.len() != texts.len() {
                bail!(
                    "embedder returned {} vectors for {} documents",
                    embedded.len(),
                    texts.len()
                );
            }
            for (&i, vector) in missing.iter().zip(embedded) {
                self.cache.embedding.set(keys[i].clone(), vector.clone());
                vectors[i] = Some(Arc::new(vector));
            }
        }

        debug!(
            documents = documents.len(),
            embedded = missing.len(),
            "built vector index"
        );

        for (doc, vector) in documents.iter().zip(vectors) {
            let vector = vector.map(|v| v.to_vec()).unwrap_or_default();
            index
                .add(&doc.id, vector)
                .with_context(|| format!("failed to index vector for '{}'", doc.id))?;
        }
        Ok(Arc::from(index))
    }

    // -- search -------------------------------------------------------------

    /// Ranked candidates for `query`. Never fails; see [`Self::search_detailed`]
    /// for why a result may be degraded.
    pub fn search(
        &self,
        corpus_id: &str,
        query: &str,
        top_k: usize,
        use_rerank: bool,
    ) -> Vec<ScoredCandidate> {
        let request = SearchRequest::new(corpus_id, query, top_k).with_rerank(use_rerank);
        self.search_detailed(&request).candidates
    }

    /// Run the full pipeline: cache lookup, lexical and vector retrieval,
    /// fusion, optional rerank, truncation and cache write-through.
    #[instrument(skip_all, fields(corpus = %request.corpus_id, top_k = request.top_k, rerank = request.use_rerank))]
    pub fn search_detailed(&self, request: &SearchRequest) -> SearchOutcome {
        let Some(corpus) = self.registry.get(&request.corpus_id) else {
            debug!("unknown corpus");
            return SearchOutcome::unavailable();
        };
        let snapshot = corpus.snapshot();

        let key = query_key(
            &request.corpus_id,
            &request.query,
            request.top_k,
            request.use_rerank,
        );
        if let Some(cached) = self.cache.query.get(&key) {
            corpus.record_lookup(true);
            debug!(key = key_prefix(&key), "query cache hit");
            let reasons = self.structural_reasons(&snapshot, request.use_rerank);
            return SearchOutcome {
                candidates: Vec::clone(&cached),
                status: RetrievalStatus::from_reasons(reasons),
                cache_hit: true,
            };
        }
        corpus.record_lookup(false);

        let (outcome, cacheable) = self.run_pipeline(&snapshot, request);

        // A rebuild installs its snapshot before purging the scope. Checking
        // the generation after the write catches a purge we raced past.
        if cacheable && corpus.snapshot().generation() == snapshot.generation() {
            self.cache
                .query
                .set_scoped(&request.corpus_id, key.clone(), outcome.candidates.clone());
            if corpus.snapshot().generation() != snapshot.generation() {
                self.cache.query.delete(&key);
            }
        }
        outcome
    }

    fn structural_reasons(&self, snapshot: &CorpusSnapshot, use_rerank: bool) -> Vec<DegradeReason> {
        let mut reasons = Vec::new();
        for backend in [Backend::Lexical, Backend::Vector] {
            if let Some(reason) = snapshot
                .backend(backend)
                .and_then(BackendState::unavailable_reason)
            {
                reasons.push(DegradeReason::BackendMissing {
                    backend,
                    reason: reason.to_string(),
                });
            }
        }
        if use_rerank && self.reranker.is_none() {
            reasons.push(DegradeReason::RerankerUnavailable);
        }
        reasons
    }

    /// Returns the outcome and whether it may be cached.
    fn run_pipeline(&self, snapshot: &CorpusSnapshot, request: &SearchRequest) -> (SearchOutcome, bool) {
        let top_k = request.top_k;
        if top_k == 0 {
            let status = RetrievalStatus::from_reasons(
                self.structural_reasons(snapshot, request.use_rerank),
            );
            let outcome = SearchOutcome {
                candidates: Vec::new(),
                status,
                cache_hit: false,
            };
            return (outcome, false);
        }

        let fetch = top_k.saturating_mul(self.config.vector.candidate_multiplier);
        let mut reasons = Vec::new();
        let mut cacheable = true;
        let mut lists: Vec<(Backend, f64, RankedList)> = Vec::new();

        for (backend, outcome) in self.gather(snapshot, &request.query, fetch, request.deadline) {
            if let Some(reason) = outcome.degrade_reason(backend) {
                if is_structural(&reason) {
                    debug!(%backend, "{reason}");
                } else {
                    warn!(%backend, "{reason}, continuing without it");
                    cacheable = false;
                }
                reasons.push(reason);
            }
            if let Some(list) = outcome.into_list() {
                lists.push((backend, self.weight(backend), list));
            }
        }

        if lists.is_empty() {
            warn!(?reasons, "no retrieval backend available");
            return (SearchOutcome::unavailable(), false);
        }

        let mut deadline_cut = false;
        if deadline::expired(request.deadline) {
            warn!("deadline reached before fusion, returning the strongest single list");
            reasons.push(DegradeReason::DeadlineExceeded {
                stage: Stage::Fusion,
            });
            keep_strongest(&mut lists);
            deadline_cut = true;
        }

        let method = method_for(&lists);
        let fused = {
            let ids: Vec<Vec<&str>> = lists
                .iter()
                .map(|(_, _, list)| list.iter().map(|(id, _)| id.as_str()).collect())
                .collect();
            let weighted: Vec<WeightedList<'_, &str>> = lists
                .iter()
                .zip(&ids)
                .map(|((_, weight, _), ids)| WeightedList::new(*weight, ids))
                .collect();
            fuse(&weighted, self.config.fusion.k)
        };

        let rerank_wanted = request.use_rerank && !deadline_cut;
        let keep = match (&self.reranker, rerank_wanted) {
            (Some(reranker), true) => top_k.max(reranker.window()),
            _ => top_k,
        };
        let mut candidates = materialize(snapshot, &lists, fused, keep, method);

        let mut reranked = false;
        if rerank_wanted {
            match &self.reranker {
                None => reasons.push(DegradeReason::RerankerUnavailable),
                Some(_) if deadline::expired(request.deadline) => {
                    warn!("deadline reached before rerank, keeping fused order");
                    reasons.push(DegradeReason::DeadlineExceeded {
                        stage: Stage::Rerank,
                    });
                    cacheable = false;
                }
                Some(reranker) => {
                    let outcome = reranker.rerank(
                        &request.query,
                        std::mem::take(&mut candidates),
                        top_k,
                        deadline::remaining(request.deadline),
                    );
                    candidates = outcome.candidates;
                    reranked = outcome.reranked;
                    if let Some(reason) = outcome.degraded {
                        reasons.push(reason);
                        cacheable = false;
                    }
                }
            }
        }

        candidates.truncate(top_k);
        for (i, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = i + 1;
            if reranked {
                candidate.method = RetrievalMethod::HybridRerank;
            }
        }

        debug!(
            returned = candidates.len(),
            lists = lists.len(),
            reranked,
            "search complete"
        );

        let outcome = SearchOutcome {
            candidates,
            status: RetrievalStatus::from_reasons(reasons),
            cache_hit: false,
        };
        (outcome, cacheable && !deadline_cut)
    }

    /// Query every backend of `snapshot`. Budgeted sources start first on
    /// helper threads so they overlap the inline ones.
    fn gather(
        &self,
        snapshot: &CorpusSnapshot,
        query: &str,
        top_n: usize,
        deadline: Option<Instant>,
    ) -> Vec<(Backend, BackendOutcome)> {
        let mut slots = Vec::with_capacity(2);
        for backend in [Backend::Lexical, Backend::Vector] {
            let slot = match snapshot.backend(backend) {
                Some(BackendState::Ready(source)) => match source.budget() {
                    None => Slot::Inline(Arc::clone(source)),
                    Some(budget) => {
                        let budget = deadline::clamp(budget, deadline);
                        if budget.is_zero() {
                            Slot::Done(BackendOutcome::Degraded(RetrievalError::ProviderTimeout {
                                backend,
                                budget,
                            }))
                        } else if let Some(permit) = self.helper_slots.try_acquire() {
                            let source = Arc::clone(source);
                            let query = query.to_string();
                            let pending = spawn_bounded(&format!("quarry-{backend}"), move || {
                                let _permit = permit;
                                source.search(&query, top_n)
                            });
                            Slot::Waiting(pending, budget)
                        } else {
                            warn!(
                                %backend,
                                max_concurrent = self.helper_slots.max(),
                                "backend at capacity, not starting another call"
                            );
                            Slot::Done(BackendOutcome::Busy)
                        }
                    }
                },
                Some(state) => Slot::Done(BackendOutcome::Unavailable(
                    state.unavailable_reason().unwrap_or_default().to_string(),
                )),
                None => Slot::Done(BackendOutcome::Unavailable(format!(
                    "{backend} is not a retrieval backend"
                ))),
            };
            slots.push((backend, slot));
        }

        slots
            .into_iter()
            .map(|(backend, slot)| {
                let outcome = match slot {
                    Slot::Done(outcome) => outcome,
                    Slot::Inline(source) => outcome_of(source.search(query, top_n)),
                    Slot::Waiting(pending, budget) => match pending.wait(budget) {
                        Bounded::Done(result) => outcome_of(result),
                        Bounded::TimedOut => {
                            BackendOutcome::Degraded(RetrievalError::ProviderTimeout {
                                backend,
                                budget,
                            })
                        }
                        Bounded::Failed(reason) => {
                            BackendOutcome::Degraded(RetrievalError::BackendUnavailable {
                                backend,
                                reason,
                            })
                        }
                    },
                };
                (backend, outcome)
            })
            .collect()
    }

    // -- management ---------------------------------------------------------

    /// Document count, backend availability, fusion weights and cache hit
    /// rate for `corpus_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::NotFound`] for an unknown corpus.
    pub fn get_stats(&self, corpus_id: &str) -> Result<CorpusStats, RetrievalError> {
        let corpus = self.corpus(corpus_id)?;
        let snapshot = corpus.snapshot();
        let ready = |backend| {
            snapshot
                .backend(backend)
                .is_some_and(BackendState::is_ready)
        };

        Ok(CorpusStats {
            corpus_id: corpus_id.to_string(),
            document_count: snapshot.len(),
            generation: snapshot.generation(),
            lexical_available: ready(Backend::Lexical),
            vector_available: ready(Backend::Vector),
            reranker_available: self.reranker.is_some(),
            weights: FusionWeights {
                lexical: self.config.fusion.lexical_weight,
                vector: self.config.fusion.vector_weight,
                k: self.config.fusion.k,
            },
            cache_hit_rate: corpus.cache_hit_rate(),
        })
    }

    /// Purge cached query results for `corpus_id`. Returns how many entries
    /// were dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::NotFound`] for an unknown corpus.
    pub fn invalidate_corpus(&self, corpus_id: &str) -> Result<usize, RetrievalError> {
        self.corpus(corpus_id)?;
        let purged = self.cache.invalidate_queries(corpus_id);
        info!(corpus = corpus_id, purged, "invalidated cached queries");
        Ok(purged)
    }

    /// Forget `corpus_id` and every cache entry scoped to it.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::NotFound`] for an unknown corpus.
    pub fn remove_corpus(&self, corpus_id: &str) -> Result<usize, RetrievalError> {
        self.registry
            .remove(corpus_id)
            .ok_or_else(|| RetrievalError::not_found(corpus_id))?;
        let purged = self.cache.invalidate_corpus(corpus_id);
        info!(corpus = corpus_id, purged, "removed corpus");
        Ok(purged)
    }

    /// Fetch one document, reading through the document and metadata pools.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::NotFound`] for an unknown corpus. An
    /// unknown document in a known corpus is `Ok(None)`.
    pub fn get_document(
        &self,
        corpus_id: &str,
        doc_id: &str,
    ) -> Result<Option<Document>, RetrievalError> {
        let corpus = self.corpus(corpus_id)?;
        let key = document_key(corpus_id, doc_id);

        if let (Some(content), Some(metadata)) =
            (self.cache.document.get(&key), self.cache.metadata.get(&key))
        {
            return Ok(Some(Document {
                id: doc_id.to_string(),
                content: String::clone(&content),
                metadata: Metadata::clone(&metadata),
            }));
        }

        let snapshot = corpus.snapshot();
        let Some(doc) = snapshot.document(doc_id) else {
            return Ok(None);
        };

        // Same ordering as the query pool: skip the write if a rebuild is
        // already visible, undo it if one landed while writing.
        let generation = snapshot.generation();
        if corpus.snapshot().generation() == generation {
            self.cache
                .document
                .set_scoped(corpus_id, key.clone(), doc.content.clone());
            self.cache
                .metadata
                .set_scoped(corpus_id, key.clone(), doc.metadata.clone());
            if corpus.snapshot().generation() != generation {
                debug!(doc_id, "corpus rebuilt during read-through, dropping cached copy");
                self.cache.document.delete(&key);
                self.cache.metadata.delete(&key);
            }
        }
        Ok(Some(doc.clone()))
    }
}

/// Keep only the highest-weight list; the earlier list wins a tie.
fn keep_strongest(lists: &mut Vec<(Backend, f64, RankedList)>) {
    let mut best = 0;
    for (i, (_, weight, _)) in lists.iter().enumerate() {
        if *weight > lists[best].1 {
            best = i;
        }
    }
    let strongest = lists.swap_remove(best);
    lists.clear();
    lists.push(strongest);
}

/// Which backends shaped the ranking: those that answered with a positive
/// weight.
fn method_for(lists: &[(Backend, f64, RankedList)]) -> RetrievalMethod {
    let contributes = |backend| {
        lists
            .iter()
            .any(|(b, weight, _)| *b == backend && *weight > 0.0)
    };
    match (contributes(Backend::Lexical), contributes(Backend::Vector)) {
        (true, true) => RetrievalMethod::Hybrid,
        (false, true) => RetrievalMethod::Vector,
        _ => RetrievalMethod::Lexical,
    }
}

fn scores_for(lists: &[(Backend, f64, RankedList)], backend: Backend) -> HashMap<&str, f32> {
    lists
        .iter()
        .filter(|(b, _, _)| *b == backend)
        .flat_map(|(_, _, list)| list.iter().map(|(id, score)| (id.as_str(), *score)))
        .collect()
}

/// Turn fused ids into candidates carrying content, metadata and per-stage
/// scores. Ids missing from the snapshot are skipped.
#[allow(clippy::cast_possible_truncation)]
fn materialize(
    snapshot: &CorpusSnapshot,
    lists: &[(Backend, f64, RankedList)],
    fused: Vec<(String, f64)>,
    keep: usize,
    method: RetrievalMethod,
) -> Vec<ScoredCandidate> {
    let bm25 = scores_for(lists, Backend::Lexical);
    let vector = scores_for(lists, Backend::Vector);

    fused
        .into_iter()
        .filter_map(|(doc_id, fused_score)| {
            let doc = snapshot.document(&doc_id)?;
            Some(ScoredCandidate {
                bm25_score: bm25.get(doc_id.as_str()).copied(),
                vector_score: vector.get(doc_id.as_str()).copied(),
                content: doc.content.clone(),
                metadata: doc.metadata.clone(),
                doc_id,
                fused_score: fused_score as f32,
                rerank_score: None,
                rank: 0,
                method,
            })
        })
        .take(keep)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::cache::ManualClock;
    use crate::vector::HashingEmbedder;

    fn fruit() -> Vec<Document> {
        vec![
            Document::new("D1", "apple banana").with_meta("color", "yellow"),
            Document::new("D2", "banana cherry"),
            Document::new("D3", "cherry date"),
        ]
    }

    fn lexical_only() -> HybridRetriever {
        HybridRetriever::builder(EngineConfig::default())
            .without_sweeper()
            .build()
            .unwrap()
    }

    fn hybrid() -> HybridRetriever {
        HybridRetriever::builder(EngineConfig::default())
            .with_embedder(Arc::new(HashingEmbedder::new(64)))
            .without_sweeper()
            .build()
            .unwrap()
    }

    fn ids(candidates: &[ScoredCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.doc_id.as_str()).collect()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.fusion.k = 0;
        let err = HybridRetriever::new(config).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration { .. }));
    }

    #[cfg(not(feature = "http-rerank"))]
    #[test]
    fn http_rerank_without_feature_is_a_missing_model() {
        let mut config = EngineConfig::default();
        config.http_rerank = Some(quarry_core::config::HttpRerankConfig {
            api_base: "http://localhost:1".to_string(),
            path: "/v1/rerank".to_string(),
            model: "m".to_string(),
            api_key_env: None,
            timeout_ms: 100,
        });
        let err = HybridRetriever::new(config).unwrap_err();
        assert!(matches!(err, RetrievalError::RerankModel { .. }));
        assert_eq!(err.code().code(), "E1003");
    }

    #[test]
    fn add_documents_reports_backends() {
        let report = lexical_only().add_documents("ws", fruit());
        assert_eq!(report.indexed_count, 3);
        assert_eq!(report.document_count, 3);
        assert!(report.lexical_ok);
        assert!(!report.vector_ok);
        assert_eq!(report.generation, 1);

        let report = hybrid().add_documents("ws", fruit());
        assert!(report.lexical_ok && report.vector_ok);
    }

    #[test]
    fn lexical_only_search_is_degraded_not_failed() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());

        let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 2));
        assert_eq!(ids(&outcome.candidates), vec!["D1", "D2"]);
        assert!(outcome.candidates.iter().all(|c| c.method == RetrievalMethod::Lexical));
        assert!(outcome.candidates.iter().all(|c| c.bm25_score.is_some()));
        assert!(outcome.candidates.iter().all(|c| c.vector_score.is_none()));
        assert_eq!(outcome.candidates[0].rank, 1);
        assert_eq!(outcome.candidates[1].rank, 2);
        assert!(matches!(
            outcome.status.reasons(),
            [DegradeReason::BackendMissing {
                backend: Backend::Vector,
                ..
            }]
        ));
    }

    #[test]
    fn hybrid_search_uses_both_lists() {
        let retriever = hybrid();
        retriever.add_documents("ws", fruit());

        let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 3));
        assert!(outcome.status.is_ok());
        assert!(outcome.candidates.iter().all(|c| c.method == RetrievalMethod::Hybrid));
        let top = &outcome.candidates[0];
        assert!(top.bm25_score.is_some() && top.vector_score.is_some());
        assert!(outcome.candidates.len() <= 3);
        assert!(!ids(&outcome.candidates[..2]).contains(&"D3"));
    }

    #[test]
    fn unknown_corpus_is_unavailable_not_an_error() {
        let outcome = lexical_only().search_detailed(&SearchRequest::new("nope", "banana", 5));
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.status, RetrievalStatus::Unavailable);
    }

    #[test]
    fn both_backends_missing_returns_empty() {
        let mut config = EngineConfig::default();
        config.lexical.enabled = false;
        let retriever = HybridRetriever::builder(config)
            .without_sweeper()
            .build()
            .unwrap();
        let report = retriever.add_documents("ws", fruit());
        assert!(!report.lexical_ok && !report.vector_ok);

        let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 5));
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.status, RetrievalStatus::Unavailable);
    }

    #[test]
    fn second_search_hits_the_cache_with_same_status() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        let request = SearchRequest::new("ws", "banana", 2);

        let first = retriever.search_detailed(&request);
        let second = retriever.search_detailed(&request);
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        assert_eq!(first.candidates, second.candidates);
        assert_eq!(first.status, second.status);

        let stats = retriever.get_stats("ws").unwrap();
        assert!((stats.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn add_documents_invalidates_cached_results() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        assert_eq!(retriever.search("ws", "kiwi", 5, false).len(), 0);

        retriever.add_documents("ws", vec![Document::new("D4", "kiwi smoothie")]);
        let outcome = retriever.search_detailed(&SearchRequest::new("ws", "kiwi", 5));
        assert!(!outcome.cache_hit);
        assert_eq!(ids(&outcome.candidates), vec!["D4"]);
    }

    #[test]
    fn invalidate_corpus_purges_queries() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        retriever.search("ws", "banana", 2, false);
        assert_eq!(retriever.invalidate_corpus("ws").unwrap(), 1);
        assert!(matches!(
            retriever.invalidate_corpus("missing"),
            Err(RetrievalError::NotFound { .. })
        ));
    }

    #[test]
    fn stats_for_unknown_corpus_is_not_found() {
        let err = lexical_only().get_stats("missing").unwrap_err();
        assert_eq!(err, RetrievalError::not_found("missing"));
    }

    #[test]
    fn stats_report_configuration() {
        let retriever = hybrid();
        retriever.add_documents("ws", fruit());
        let stats = retriever.get_stats("ws").unwrap();
        assert_eq!(stats.document_count, 3);
        assert!(stats.lexical_available && stats.vector_available);
        assert!(!stats.reranker_available);
        assert!((stats.weights.lexical - 0.3).abs() < f64::EPSILON);
        assert!((stats.weights.vector - 0.7).abs() < f64::EPSILON);
        assert_eq!(stats.weights.k, 60);
    }

    #[test]
    fn rerank_without_reranker_is_degraded() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        let outcome =
            retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
        assert_eq!(ids(&outcome.candidates), vec!["D1", "D2"]);
        assert!(outcome.status.reasons().contains(&DegradeReason::RerankerUnavailable));
    }

    #[test]
    fn get_document_reads_through_cache() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());

        let doc = retriever.get_document("ws", "D1").unwrap().unwrap();
        assert_eq!(doc.content, "apple banana");
        assert_eq!(doc.metadata["color"], "yellow");
        assert_eq!(retriever.cache().document.len(), 1);

        let again = retriever.get_document("ws", "D1").unwrap().unwrap();
        assert_eq!(doc, again);
        assert_eq!(retriever.cache().document.stats().hits, 1);

        assert!(retriever.get_document("ws", "D9").unwrap().is_none());
        assert!(retriever.get_document("missing", "D1").is_err());
    }

    #[test]
    fn remove_corpus_forgets_it() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        retriever.get_document("ws", "D1").unwrap();
        retriever.remove_corpus("ws").unwrap();

        assert!(retriever.corpus_ids().is_empty());
        assert!(retriever.cache().document.is_empty());
        assert!(retriever.get_stats("ws").is_err());
        assert!(retriever.remove_corpus("ws").is_err());
    }

    #[test]
    fn re_adding_a_document_replaces_it() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        let report = retriever.add_documents("ws", vec![Document::new("D3", "banana split")]);
        assert_eq!(report.document_count, 3);
        assert_eq!(report.generation, 2);

        let hits = retriever.search("ws", "split", 5, false);
        assert_eq!(ids(&hits), vec!["D3"]);
    }

    #[test]
    fn document_embeddings_are_memoized_across_rebuilds() {
        let retriever = hybrid();
        retriever.add_documents("ws", fruit());
        let after_first = retriever.cache().embedding.len();
        assert_eq!(after_first, 3);

        retriever.add_documents("ws", vec![Document::new("D4", "elderberry")]);
        assert_eq!(retriever.cache().embedding.len(), 4);
        assert_eq!(retriever.cache().embedding.stats().hits, 3);
    }

    #[test]
    fn query_results_expire_with_ttl() {
        let clock = Arc::new(ManualClock::new());
        let retriever = HybridRetriever::builder(EngineConfig::default())
            .with_clock(Arc::clone(&clock) as Arc<dyn Clock>)
            .without_sweeper()
            .build()
            .unwrap();
        retriever.add_documents("ws", fruit());

        let request = SearchRequest::new("ws", "banana", 2);
        retriever.search_detailed(&request);
        assert!(retriever.search_detailed(&request).cache_hit);

        clock.advance(Duration::from_secs(3601));
        assert!(!retriever.search_detailed(&request).cache_hit);
    }

    #[test]
    fn zero_top_k_is_empty() {
        let retriever = lexical_only();
        retriever.add_documents("ws", fruit());
        assert!(retriever.search("ws", "banana", 0, false).is_empty());
    }

    #[test]
    fn keep_strongest_prefers_weight_then_order() {
        let mut lists = vec![
            (Backend::Lexical, 0.3, vec![("a".to_string(), 1.0)]),
            (Backend::Vector, 0.7, vec![("b".to_string(), 1.0)]),
        ];
        keep_strongest(&mut lists);
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].0, Backend::Vector);

        let mut tied = vec![
            (Backend::Lexical, 0.5, Vec::new()),
            (Backend::Vector, 0.5, Vec::new()),
        ];
        keep_strongest(&mut tied);
        assert_eq!(tied[0].0, Backend::Lexical);
    }
}
