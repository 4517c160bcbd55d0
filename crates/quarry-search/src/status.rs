//! Status-tagged backend and search outcomes.
//!
//! Backend failures never surface as errors from `search`. They are
//! recorded here so callers and tests can see why a fallback happened.

use quarry_core::{Backend, RetrievalError};
use serde::Serialize;
use std::fmt;

/// `(doc_id, native score)` pairs, best first.
pub type RankedList = Vec<(String, f32)>;

/// Result of asking one backend for candidates.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    /// The backend answered. The list may be empty.
    Ok(RankedList),
    /// The backend exists but this call failed or timed out.
    Degraded(RetrievalError),
    /// The backend was never built or is disabled for this corpus.
    Unavailable(String),
    /// Too many earlier calls are still running; this one was not started.
    Busy,
}

impl BackendOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// The ranked list, if the backend answered.
    #[must_use]
    pub fn into_list(self) -> Option<RankedList> {
        match self {
            Self::Ok(list) => Some(list),
            Self::Degraded(_) | Self::Unavailable(_) | Self::Busy => None,
        }
    }

    /// The degradation this outcome implies for `backend`, if any.
    #[must_use]
    pub fn degrade_reason(&self, backend: Backend) -> Option<DegradeReason> {
        match self {
            Self::Ok(_) => None,
            Self::Degraded(err) => Some(DegradeReason::from_error(backend, err)),
            Self::Unavailable(reason) => Some(DegradeReason::BackendMissing {
                backend,
                reason: reason.clone(),
            }),
            Self::Busy => Some(DegradeReason::BackendBusy { backend }),
        }
    }
}

/// Pipeline stage cut short by a caller deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fusion,
    Rerank,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fusion => "fusion",
            Self::Rerank => "rerank",
        })
    }
}

/// Why a search result is less than the full pipeline would produce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradeReason {
    BackendFailed { backend: Backend, error: String },
    BackendTimeout { backend: Backend, budget_ms: u64 },
    BackendMissing { backend: Backend, reason: String },
    BackendBusy { backend: Backend },
    RerankerUnavailable,
    RerankerBusy,
    DeadlineExceeded { stage: Stage },
}

impl DegradeReason {
    /// Classify a backend error.
    #[must_use]
    pub fn from_error(backend: Backend, err: &RetrievalError) -> Self {
        match err {
            RetrievalError::ProviderTimeout { budget, .. } => Self::BackendTimeout {
                backend,
                budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
            },
            other => Self::BackendFailed {
                backend,
                error: other.to_string(),
            },
        }
    }

    /// The backend this reason refers to, if it names one.
    #[must_use]
    pub const fn backend(&self) -> Option<Backend> {
        match self {
            Self::BackendFailed { backend, .. }
            | Self::BackendTimeout { backend, .. }
            | Self::BackendMissing { backend, .. }
            | Self::BackendBusy { backend } => Some(*backend),
            Self::RerankerUnavailable | Self::RerankerBusy => Some(Backend::Reranker),
            Self::DeadlineExceeded { .. } => None,
        }
    }
}

impl fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackendFailed { backend, error } => write!(f, "{backend} failed: {error}"),
            Self::BackendTimeout { backend, budget_ms } => {
                write!(f, "{backend} exceeded its {budget_ms}ms budget")
            }
            Self::BackendMissing { backend, reason } => {
                write!(f, "{backend} unavailable: {reason}")
            }
            Self::BackendBusy { backend } => write!(f, "{backend} at capacity"),
            Self::RerankerUnavailable => f.write_str("no reranker configured"),
            Self::RerankerBusy => f.write_str("reranker at capacity"),
            Self::DeadlineExceeded { stage } => write!(f, "deadline reached before {stage}"),
        }
    }
}

/// Overall health of one search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reasons", rename_all = "snake_case")]
pub enum RetrievalStatus {
    /// Every requested stage ran.
    Ok,
    /// A result was produced without some stage.
    Degraded(Vec<DegradeReason>),
    /// No backend could answer; the result is empty.
    Unavailable,
}

impl RetrievalStatus {
    /// `Ok` when nothing degraded, otherwise `Degraded(reasons)`.
    #[must_use]
    pub fn from_reasons(reasons: Vec<DegradeReason>) -> Self {
        if reasons.is_empty() {
            Self::Ok
        } else {
            Self::Degraded(reasons)
        }
    }

    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    #[must_use]
    pub fn reasons(&self) -> &[DegradeReason] {
        match self {
            Self::Degraded(reasons) => reasons,
            Self::Ok | Self::Unavailable => &[],
        }
    }
}
