//! Cross-encoder reranking of the top fused candidates.
//!
//! The reranker only reorders the first `window` candidates; the rest keep
//! their fused order behind them. Every failure mode (encoder error,
//! timeout, concurrency limit, malformed scores) falls back to the input
//! order truncated to `top_k`. Nothing here panics or returns an error.

#[cfg(feature = "http-rerank")]
mod http;

#[cfg(feature = "http-rerank")]
pub use http::HttpCrossEncoder;

use anyhow::Result;
use quarry_core::config::RerankConfig;
use quarry_core::{Backend, RetrievalMethod, ScoredCandidate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::deadline::{Bounded, InFlight, run_bounded};
use crate::status::DegradeReason;

/// Scores `(query, document)` pairs jointly.
pub trait CrossEncoder: Send + Sync {
    fn model_id(&self) -> &str;

    /// One relevance score per document, aligned with `documents`. Higher
    /// is more relevant.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unavailable or inference fails.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// Outcome of one rerank call.
#[derive(Debug, Clone, PartialEq)]
pub struct RerankOutcome {
    pub candidates: Vec<ScoredCandidate>,
    /// Whether the encoder's order was applied.
    pub reranked: bool,
    pub degraded: Option<DegradeReason>,
}

impl RerankOutcome {
    fn pass_through(
        mut candidates: Vec<ScoredCandidate>,
        top_k: usize,
        degraded: Option<DegradeReason>,
    ) -> Self {
        candidates.truncate(top_k);
        Self {
            candidates,
            reranked: false,
            degraded,
        }
    }

    fn failed(candidates: Vec<ScoredCandidate>, top_k: usize, error: String) -> Self {
        Self::pass_through(
            candidates,
            top_k,
            Some(DegradeReason::BackendFailed {
                backend: Backend::Reranker,
                error,
            }),
        )
    }
}

/// Bounded, timeout-guarded wrapper around a [`CrossEncoder`].
#[derive(Clone)]
pub struct Reranker {
    encoder: Arc<dyn CrossEncoder>,
    window: usize,
    timeout: Duration,
    slots: InFlight,
}

impl std::fmt::Debug for Reranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reranker")
            .field("model", &self.encoder.model_id())
            .field("window", &self.window)
            .field("timeout", &self.timeout)
            .field("max_concurrent", &self.slots.max())
            .finish_non_exhaustive()
    }
}

impl Reranker {
    #[must_use]
    pub fn new(encoder: Arc<dyn CrossEncoder>, config: &RerankConfig) -> Self {
        Self {
            encoder,
            window: config.window.max(1),
            timeout: config.timeout(),
            slots: InFlight::new(config.max_concurrent),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.encoder.model_id()
    }

    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Rerank calls currently holding a slot, including timed-out calls
    /// whose encoder has not returned yet.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.slots.current()
    }

    /// Reorder the first `window` candidates by cross-encoder score and
    /// return the best `top_k`.
    ///
    /// `budget` caps the wait below the configured timeout, e.g. to honor a
    /// caller deadline.
    #[instrument(skip_all, fields(model = self.encoder.model_id(), candidates = candidates.len(), top_k = top_k))]
    pub fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredCandidate>,
        top_k: usize,
        budget: Option<Duration>,
    ) -> RerankOutcome {
        if candidates.is_empty() || top_k == 0 {
            return RerankOutcome::pass_through(candidates, top_k, None);
        }

        let Some(permit) = self.slots.try_acquire() else {
            warn!(max_concurrent = self.slots.max(), "reranker busy, keeping fused order");
            return RerankOutcome::pass_through(candidates, top_k, Some(DegradeReason::RerankerBusy));
        };

        let window = self.window.min(candidates.len());
        let texts: Vec<String> = candidates[..window]
            .iter()
            .map(|c| c.content.clone())
            .collect();
        let encoder = Arc::clone(&self.encoder);
        let owned_query = query.to_string();
        let budget = budget.map_or(self.timeout, |b| b.min(self.timeout));

        let outcome = run_bounded("quarry-rerank", budget, move || {
            let _permit = permit;
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            encoder.score(&owned_query, &refs)
        });

        let scores = match outcome {
            Bounded::Done(Ok(scores)) => scores,
            Bounded::Done(Err(err)) => {
                warn!("reranker failed, keeping fused order: {err:#}");
                return RerankOutcome::failed(candidates, top_k, format!("{err:#}"));
            }
            Bounded::TimedOut => {
                let budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
                warn!(budget_ms, "reranker timed out, keeping fused order");
                return RerankOutcome::pass_through(
                    candidates,
                    top_k,
                    Some(DegradeReason::BackendTimeout {
                        backend: Backend::Reranker,
                        budget_ms,
                    }),
                );
            }
            Bounded::Failed(reason) => {
                warn!("reranker worker failed, keeping fused order: {reason}");
                return RerankOutcome::failed(candidates, top_k, reason);
            }
        };

        if scores.len() != window {
            let reason = format!("expected {window} scores, got {}", scores.len());
            warn!("reranker returned malformed scores: {reason}");
            return RerankOutcome::failed(candidates, top_k, reason);
        }
        if scores.iter().any(|s| !s.is_finite()) {
            warn!("reranker returned non-finite scores");
            return RerankOutcome::failed(candidates, top_k, "non-finite score".to_string());
        }

        for (candidate, score) in candidates.iter_mut().zip(&scores) {
            candidate.rerank_score = Some(*score);
            candidate.method = RetrievalMethod::HybridRerank;
        }
        // Stable sort keeps fused order among equal scores.
        candidates[..window].sort_by(|a, b| {
            let a = a.rerank_score.unwrap_or(f32::NEG_INFINITY);
            let b = b.rerank_score.unwrap_or(f32::NEG_INFINITY);
            b.total_cmp(&a)
        });
        candidates.truncate(top_k);

        debug!(window, returned = candidates.len(), "reranked candidates");
        RerankOutcome {
            candidates,
            reranked: true,
            degraded: None,
        }
    }
}
