use std::fmt;
use std::time::Duration;

/// Machine-readable error codes for agent-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalid,
    ConfigParseError,
    RerankModelMissing,
    CorpusNotFound,
    BackendUnavailable,
    ProviderTimeout,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "E1001",
            Self::ConfigParseError => "E1002",
            Self::RerankModelMissing => "E1003",
            Self::CorpusNotFound => "E2001",
            Self::BackendUnavailable => "E6001",
            Self::ProviderTimeout => "E6002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigInvalid => "Invalid engine configuration",
            Self::ConfigParseError => "Config file parse error",
            Self::RerankModelMissing => "Rerank model not configured",
            Self::CorpusNotFound => "Corpus not found",
            Self::BackendUnavailable => "Retrieval backend unavailable",
            Self::ProviderTimeout => "Provider exceeded its time budget",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators and agents.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid => {
                Some("Check weights, BM25 parameters and cache bounds in quarry.toml.")
            }
            Self::ConfigParseError => Some("Fix syntax in quarry.toml and retry."),
            Self::RerankModelMissing => {
                Some("Set [http_rerank] api_base and model, or disable reranking.")
            }
            Self::CorpusNotFound => Some("Index documents into the corpus with add_documents first."),
            Self::BackendUnavailable | Self::ProviderTimeout => None,
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Which retrieval backend an error or degradation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Lexical,
    Vector,
    Reranker,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Reranker => "reranker",
        })
    }
}

/// Errors raised by the retrieval engine.
///
/// Only [`RetrievalError::Configuration`], [`RetrievalError::RerankModel`]
/// and [`RetrievalError::NotFound`] ever reach callers. The backend variants
/// are turned into degradation statuses at the orchestration boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrievalError {
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A reranker was configured but its model cannot be reached or set up.
    #[error("rerank model unavailable: {message}")]
    RerankModel { message: String },

    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable { backend: Backend, reason: String },

    #[error("{backend} exceeded its {budget:?} budget")]
    ProviderTimeout { backend: Backend, budget: Duration },

    #[error("corpus '{corpus_id}' not found")]
    NotFound { corpus_id: String },
}

impl RetrievalError {
    /// Shorthand for a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Shorthand for an unusable rerank model configuration.
    pub fn rerank_model(message: impl Into<String>) -> Self {
        Self::RerankModel {
            message: message.into(),
        }
    }

    /// Shorthand for an unknown corpus.
    pub fn not_found(corpus_id: impl Into<String>) -> Self {
        Self::NotFound {
            corpus_id: corpus_id.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Configuration { .. } => ErrorCode::ConfigInvalid,
            Self::RerankModel { .. } => ErrorCode::RerankModelMissing,
            Self::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            Self::ProviderTimeout { .. } => ErrorCode::ProviderTimeout,
            Self::NotFound { .. } => ErrorCode::CorpusNotFound,
        }
    }

    /// Optional remediation hint for operators and agents.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
