#![forbid(unsafe_code)]
//! quarry-search library.
//!
//! Lexical BM25, dense vector search, weighted Reciprocal Rank Fusion and
//! cross-encoder reranking, orchestrated by [`HybridRetriever`].
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` inside backends; backend failures become
//!   [`status::DegradeReason`]s at the orchestration boundary and never reach
//!   `search` callers.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod backend;
pub mod deadline;
pub mod fusion;
pub mod lexical;
pub mod registry;
pub mod rerank;
pub mod retriever;
pub mod status;
pub mod vector;

pub use backend::{LexicalSource, RankedSource, VectorSource};
pub use lexical::{Bm25Params, LexicalIndex};
pub use rerank::{CrossEncoder, RerankOutcome, Reranker};
pub use retriever::{
    CorpusStats, FusionWeights, HybridRetriever, IndexReport, RetrieverBuilder, SearchOutcome,
    SearchRequest,
};
pub use status::{BackendOutcome, DegradeReason, RankedList, RetrievalStatus, Stage};
pub use vector::{
    Embedder, HashingEmbedder, InMemoryVectorIndex, InMemoryVectorIndexFactory, VectorIndex,
    VectorIndexFactory,
};
