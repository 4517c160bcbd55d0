//! Dense vector retrieval contract.
//!
//! Embedding models and vector stores are external collaborators. The engine
//! only relies on the traits below:
//!
//! - [`Embedder`] turns text into a vector.
//! - [`VectorIndex`] stores vectors per document and answers similarity
//!   queries with scores in `[0, 1]`, best first. An empty index answers
//!   with an empty list, never an error.
//! - [`VectorIndexFactory`] creates a fresh index for a corpus rebuild.
//!
//! [`InMemoryVectorIndex`] is a brute-force cosine implementation suitable
//! for small corpora and tests. [`HashingEmbedder`] needs no model.

mod hashing;
mod memory;

pub use hashing::HashingEmbedder;
pub use memory::{InMemoryVectorIndex, InMemoryVectorIndexFactory, cosine_similarity};

use anyhow::Result;

/// Text to vector model.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the model, used in embedding cache keys.
    fn model_id(&self) -> &str;

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns an error if the model is unavailable or inference fails.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Batch inference for efficiency.
    ///
    /// # Errors
    ///
    /// Returns an error if any text fails to embed.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Similarity search over per-document vectors.
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector for `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the vector is rejected (e.g. dimension mismatch).
    fn add(&mut self, doc_id: &str, vector: Vec<f32>) -> Result<()>;

    /// Best `top_n` documents as `(doc_id, similarity ∈ [0, 1])`, descending.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot answer. An empty index must
    /// return `Ok(vec![])`.
    fn similarity_search(&self, query: &[f32], top_n: usize) -> Result<Vec<(String, f32)>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Creates empty indexes for corpus (re)builds.
pub trait VectorIndexFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be opened.
    fn create(&self, corpus_id: &str) -> Result<Box<dyn VectorIndex>>;
}
