//! Documents handed to the engine and the ranked candidates it returns.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Free-form document metadata, ordered by key.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// A document (or chunk) produced by an upstream ingestion pipeline.
///
/// `id` must be unique within its corpus. Re-adding a document with an
/// existing `id` replaces the earlier version on the next rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Build a document with empty metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry, returning the document for chaining.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Which stages produced a candidate's final position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RetrievalMethod {
    #[serde(rename = "lexical")]
    Lexical,
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "hybrid")]
    Hybrid,
    #[serde(rename = "hybrid+rerank")]
    HybridRerank,
}

impl RetrievalMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lexical => "lexical",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
            Self::HybridRerank => "hybrid+rerank",
        }
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranked search result with a per-stage scoring breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub doc_id: String,
    pub content: String,
    pub metadata: Metadata,
    /// Raw BM25 score, if the lexical backend returned this document.
    pub bm25_score: Option<f32>,
    /// Similarity in `[0, 1]`, if the vector backend returned this document.
    pub vector_score: Option<f32>,
    /// Weighted RRF score.
    pub fused_score: f32,
    /// Cross-encoder score, when the candidate went through reranking.
    pub rerank_score: Option<f32>,
    /// 1-based position in the final list.
    pub rank: usize,
    pub method: RetrievalMethod,
}
