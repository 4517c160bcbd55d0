//! Graceful degradation integration tests for hybrid retrieval.
//!
//! Verifies that search keeps answering, and says why, when backends are
//! missing, failing, slow, or cut short by a caller deadline.
//!
//! # Scenarios covered
//!
//! 1. **Lexical-only when the vector backend is disabled**: results are
//!    BM25-ranked and the status names the missing backend.
//! 2. **Vector-only when the lexical backend is disabled.**
//! 3. **Vector index failures at build time**: `vector_ok = false`, lexical
//!    results still returned.
//! 4. **Vector failures at query time**: embedder errors degrade to
//!    lexical-only and are not cached.
//! 5. **Slow vector provider**: exceeds its budget, reported as a timeout.
//!    A hung provider never holds more than `vector.max_concurrent` calls;
//!    further searches skip it as busy.
//! 6. **Reranker failure, timeout and saturation**: fused order kept.
//! 7. **Caller deadline**: rerank skipped, best single list returned.
//! 8. **No backend at all**: empty result, `Unavailable`, no panic.

use anyhow::{Result, bail};
use quarry_core::config::EngineConfig;
use quarry_core::{Backend, Document, RetrievalMethod};
use quarry_search::{
    CrossEncoder, DegradeReason, Embedder, HashingEmbedder, HybridRetriever, RetrievalStatus,
    SearchRequest, Stage, VectorIndex, VectorIndexFactory,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn fruit() -> Vec<Document> {
    vec![
        Document::new("D1", "apple banana"),
        Document::new("D2", "banana cherry"),
        Document::new("D3", "cherry date"),
    ]
}

fn ids(outcome: &quarry_search::SearchOutcome) -> Vec<&str> {
    outcome
        .candidates
        .iter()
        .map(|c| c.doc_id.as_str())
        .collect()
}

/// Embeds with a hashing model until `broken` is set.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    broken: AtomicBool,
}

impl FlakyEmbedder {
    fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(64),
            broken: AtomicBool::new(false),
        }
    }
}

impl Embedder for FlakyEmbedder {
    fn model_id(&self) -> &str {
        "flaky"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.broken.load(Ordering::SeqCst) {
            bail!("embedding service unreachable");
        }
        self.inner.embed(text)
    }
}

/// Sleeps before every embedding.
struct SlowEmbedder(Duration);

impl Embedder for SlowEmbedder {
    fn model_id(&self) -> &str {
        "slow"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        thread::sleep(self.0);
        HashingEmbedder::new(64).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let model = HashingEmbedder::new(64);
        texts.iter().map(|text| model.embed(text)).collect()
    }
}

struct BrokenFactory;

impl VectorIndexFactory for BrokenFactory {
    fn create(&self, _corpus_id: &str) -> Result<Box<dyn VectorIndex>> {
        bail!("vector store offline")
    }
}

/// Indexes normally, then blocks in every similarity search.
struct HangingFactory {
    hang: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct HangingIndex {
    docs: Vec<String>,
    hang: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl VectorIndexFactory for HangingFactory {
    fn create(&self, _corpus_id: &str) -> Result<Box<dyn VectorIndex>> {
        Ok(Box::new(HangingIndex {
            docs: Vec::new(),
            hang: self.hang,
            running: Arc::clone(&self.running),
            peak: Arc::clone(&self.peak),
        }))
    }
}

impl VectorIndex for HangingIndex {
    fn add(&mut self, doc_id: &str, _vector: Vec<f32>) -> Result<()> {
        self.docs.push(doc_id.to_string());
        Ok(())
    }

    fn similarity_search(&self, _query: &[f32], top_n: usize) -> Result<Vec<(String, f32)>> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.hang);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(self
            .docs
            .iter()
            .take(top_n)
            .map(|id| (id.clone(), 0.5))
            .collect())
    }

    fn len(&self) -> usize {
        self.docs.len()
    }
}

struct FailingEncoder;

impl CrossEncoder for FailingEncoder {
    fn model_id(&self) -> &str {
        "failing"
    }

    fn score(&self, _query: &str, _documents: &[&str]) -> Result<Vec<f32>> {
        bail!("reranker model missing")
    }
}

struct SlowEncoder(Duration);

impl CrossEncoder for SlowEncoder {
    fn model_id(&self) -> &str {
        "slow"
    }

    fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        thread::sleep(self.0);
        Ok(vec![0.0; documents.len()])
    }
}

/// Prefers documents mentioning "cherry".
struct CherryEncoder;

impl CrossEncoder for CherryEncoder {
    fn model_id(&self) -> &str {
        "cherry"
    }

    fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        Ok(documents
            .iter()
            .map(|d| if d.contains("cherry") { 1.0 } else { 0.0 })
            .collect())
    }
}

fn config_with(f: impl FnOnce(&mut EngineConfig)) -> EngineConfig {
    let mut config = EngineConfig::default();
    f(&mut config);
    config
}

// ---------------------------------------------------------------------------
// Backend availability
// ---------------------------------------------------------------------------

#[test]
fn vector_disabled_still_returns_bm25_ranked_results() {
    let retriever = HybridRetriever::builder(config_with(|c| c.vector.enabled = false))
        .with_embedder(Arc::new(HashingEmbedder::default()))
        .without_sweeper()
        .build()
        .unwrap();
    let report = retriever.add_documents("ws", fruit());
    assert!(report.lexical_ok);
    assert!(!report.vector_ok);

    let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 3));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(outcome.candidates[0].fused_score >= outcome.candidates[1].fused_score);
    assert!(
        outcome
            .candidates
            .iter()
            .all(|c| c.method == RetrievalMethod::Lexical)
    );
    assert!(matches!(
        outcome.status.reasons(),
        [DegradeReason::BackendMissing {
            backend: Backend::Vector,
            ..
        }]
    ));
}

#[test]
fn lexical_disabled_runs_vector_only() {
    let retriever = HybridRetriever::builder(config_with(|c| c.lexical.enabled = false))
        .with_embedder(Arc::new(HashingEmbedder::new(64)))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 3));
    assert!(!outcome.candidates.is_empty());
    assert!(
        outcome
            .candidates
            .iter()
            .all(|c| c.method == RetrievalMethod::Vector && c.bm25_score.is_none())
    );
    assert!(matches!(
        outcome.status.reasons(),
        [DegradeReason::BackendMissing {
            backend: Backend::Lexical,
            ..
        }]
    ));
}

#[test]
fn vector_build_failure_disables_vector_backend() {
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_embedder(Arc::new(HashingEmbedder::default()))
        .with_vector_factory(Arc::new(BrokenFactory))
        .without_sweeper()
        .build()
        .unwrap();
    let report = retriever.add_documents("ws", fruit());
    assert!(report.lexical_ok);
    assert!(!report.vector_ok);

    let stats = retriever.get_stats("ws").unwrap();
    assert!(!stats.vector_available);

    let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 2));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    match &outcome.status.reasons()[0] {
        DegradeReason::BackendMissing { backend, reason } => {
            assert_eq!(*backend, Backend::Vector);
            assert!(reason.contains("vector store offline"));
        }
        other => panic!("unexpected reason {other:?}"),
    }
}

#[test]
fn query_time_vector_failure_degrades_and_is_not_cached() {
    let embedder = Arc::new(FlakyEmbedder::new());
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_embedder(Arc::clone(&embedder) as Arc<dyn Embedder>)
        .without_sweeper()
        .build()
        .unwrap();
    assert!(retriever.add_documents("ws", fruit()).vector_ok);

    embedder.broken.store(true, Ordering::SeqCst);
    let request = SearchRequest::new("ws", "banana", 2);
    let outcome = retriever.search_detailed(&request);
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(matches!(
        outcome.status.reasons(),
        [DegradeReason::BackendFailed {
            backend: Backend::Vector,
            ..
        }]
    ));

    // Transient failures must not pin a degraded result in the cache.
    embedder.broken.store(false, Ordering::SeqCst);
    let recovered = retriever.search_detailed(&request);
    assert!(!recovered.cache_hit);
    assert!(recovered.status.is_ok());
    assert!(
        recovered
            .candidates
            .iter()
            .all(|c| c.method == RetrievalMethod::Hybrid)
    );
}

#[test]
fn slow_vector_provider_times_out() {
    let retriever = HybridRetriever::builder(config_with(|c| c.vector.timeout_ms = 30))
        .with_embedder(Arc::new(SlowEmbedder(Duration::from_millis(500))))
        .without_sweeper()
        .build()
        .unwrap();
    assert!(retriever.add_documents("ws", fruit()).vector_ok);

    let started = Instant::now();
    let outcome = retriever.search_detailed(&SearchRequest::new("ws", "banana", 2));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert_eq!(
        outcome.status.reasons(),
        &[DegradeReason::BackendTimeout {
            backend: Backend::Vector,
            budget_ms: 30
        }]
    );
}

#[test]
fn hung_vector_index_holds_at_most_max_concurrent_calls() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let factory = HangingFactory {
        hang: Duration::from_millis(600),
        running: Arc::clone(&running),
        peak: Arc::clone(&peak),
    };
    let retriever = HybridRetriever::builder(config_with(|c| {
        c.vector.timeout_ms = 5;
        c.vector.max_concurrent = 2;
    }))
    .with_embedder(Arc::new(HashingEmbedder::new(64)))
    .with_vector_factory(Arc::new(factory))
    .without_sweeper()
    .build()
    .unwrap();
    assert!(retriever.add_documents("ws", fruit()).vector_ok);

    let request = SearchRequest::new("ws", "banana", 2);
    let mut busy = 0;
    for _ in 0..50 {
        let outcome = retriever.search_detailed(&request);
        assert_eq!(ids(&outcome), vec!["D1", "D2"]);
        assert!(!outcome.cache_hit);
        assert!(retriever.backend_calls_in_flight() <= 2);
        match outcome.status.reasons() {
            [DegradeReason::BackendBusy {
                backend: Backend::Vector,
            }] => busy += 1,
            [DegradeReason::BackendTimeout {
                backend: Backend::Vector,
                ..
            }] => {}
            other => panic!("unexpected reasons {other:?}"),
        }
    }
    assert!(busy >= 40, "only {busy} of 50 searches skipped the hung backend");
    assert!(peak.load(Ordering::SeqCst) <= 2);

    // Once the hung calls return, the slots free up again.
    let deadline = Instant::now() + Duration::from_secs(5);
    while retriever.backend_calls_in_flight() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(retriever.backend_calls_in_flight(), 0);
    assert_eq!(running.load(Ordering::SeqCst), 0);

    let outcome = retriever.search_detailed(&request);
    assert!(matches!(
        outcome.status.reasons(),
        [DegradeReason::BackendTimeout {
            backend: Backend::Vector,
            budget_ms: 5
        }]
    ));
}

#[test]
fn no_backend_returns_empty_unavailable() {
    let retriever = HybridRetriever::builder(config_with(|c| {
        c.lexical.enabled = false;
        c.vector.enabled = false;
    }))
    .without_sweeper()
    .build()
    .unwrap();
    retriever.add_documents("ws", fruit());

    for query in ["banana", "", "   ", "!!!", "cherry date apple"] {
        let outcome = retriever.search_detailed(&SearchRequest::new("ws", query, 5));
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.status, RetrievalStatus::Unavailable);
    }
}

#[test]
fn odd_queries_never_panic() {
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_embedder(Arc::new(HashingEmbedder::default()))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    for query in ["", "   ", "🍌", "banana banana banana", "a OR b", "\"unterminated"] {
        let outcome = retriever.search_detailed(&SearchRequest::new("ws", query, 5));
        assert!(outcome.candidates.len() <= 5);
    }
}

// ---------------------------------------------------------------------------
// Reranker
// ---------------------------------------------------------------------------

#[test]
fn reranker_reorders_fused_candidates() {
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_cross_encoder(Arc::new(CherryEncoder))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let outcome =
        retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
    // No embedder, so only the vector backend is reported missing.
    assert!(
        outcome
            .status
            .reasons()
            .iter()
            .all(|r| r.backend() == Some(Backend::Vector))
    );
    assert_eq!(ids(&outcome), vec!["D2", "D1"]);
    assert!(
        outcome
            .candidates
            .iter()
            .all(|c| c.method == RetrievalMethod::HybridRerank)
    );
    assert_eq!(outcome.candidates[0].rerank_score, Some(1.0));
    assert_eq!(outcome.candidates[0].rank, 1);
}

#[test]
fn reranker_failure_keeps_fused_order() {
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_cross_encoder(Arc::new(FailingEncoder))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let outcome =
        retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(outcome.status.reasons().iter().any(|r| matches!(
        r,
        DegradeReason::BackendFailed {
            backend: Backend::Reranker,
            ..
        }
    )));
    assert!(outcome.candidates.iter().all(|c| c.rerank_score.is_none()));
}

#[test]
fn reranker_timeout_keeps_fused_order() {
    let retriever = HybridRetriever::builder(config_with(|c| c.rerank.timeout_ms = 20))
        .with_cross_encoder(Arc::new(SlowEncoder(Duration::from_millis(400))))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let started = Instant::now();
    let outcome =
        retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
    assert!(started.elapsed() < Duration::from_millis(350));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(outcome.status.reasons().contains(&DegradeReason::BackendTimeout {
        backend: Backend::Reranker,
        budget_ms: 20
    }));
}

#[test]
fn saturated_reranker_passes_through() {
    let retriever = HybridRetriever::builder(config_with(|c| {
        c.rerank.timeout_ms = 10;
        c.rerank.max_concurrent = 1;
    }))
    .with_cross_encoder(Arc::new(SlowEncoder(Duration::from_millis(300))))
    .without_sweeper()
    .build()
    .unwrap();
    retriever.add_documents("ws", fruit());

    // The first call times out but its encoder keeps the only slot busy.
    retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
    let outcome =
        retriever.search_detailed(&SearchRequest::new("ws", "cherry", 2).with_rerank(true));
    assert_eq!(ids(&outcome), vec!["D2", "D3"]);
    assert!(outcome.status.reasons().contains(&DegradeReason::RerankerBusy));
}

// ---------------------------------------------------------------------------
// Deadlines
// ---------------------------------------------------------------------------

#[test]
fn expired_deadline_returns_strongest_list_without_rerank() {
    let retriever = HybridRetriever::builder(EngineConfig::default())
        .with_cross_encoder(Arc::new(CherryEncoder))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let request = SearchRequest::new("ws", "banana", 2)
        .with_rerank(true)
        .with_deadline(Instant::now());
    let outcome = retriever.search_detailed(&request);

    // Only the lexical list exists, so it is the strongest; native order.
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(outcome.candidates.iter().all(|c| c.rerank_score.is_none()));
    assert!(
        outcome
            .status
            .reasons()
            .contains(&DegradeReason::DeadlineExceeded {
                stage: Stage::Fusion
            })
    );

    // Deadline-cut results are not cached.
    let again = retriever.search_detailed(&SearchRequest::new("ws", "banana", 2).with_rerank(true));
    assert!(!again.cache_hit);
    assert_eq!(ids(&again), vec!["D2", "D1"]);
}

#[test]
fn deadline_limits_slow_vector_wait() {
    let retriever = HybridRetriever::builder(config_with(|c| c.vector.timeout_ms = 5_000))
        .with_embedder(Arc::new(SlowEmbedder(Duration::from_millis(500))))
        .without_sweeper()
        .build()
        .unwrap();
    retriever.add_documents("ws", fruit());

    let started = Instant::now();
    let request = SearchRequest::new("ws", "banana", 2).with_timeout(Duration::from_millis(40));
    let outcome = retriever.search_detailed(&request);
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(ids(&outcome), vec!["D1", "D2"]);
    assert!(outcome.status.reasons().iter().any(|r| matches!(
        r,
        DegradeReason::BackendTimeout {
            backend: Backend::Vector,
            ..
        }
    )));
}
