//! Brute-force cosine similarity over vectors held in memory.

use anyhow::{Result, bail};
use std::collections::HashMap;

use super::{VectorIndex, VectorIndexFactory};

/// Cosine similarity, or `None` if the lengths differ or either vector has
/// zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// In-memory vector index. The first vector added fixes the dimension.
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorIndex {
    dimension: Option<usize>,
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

impl InMemoryVectorIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

impl VectorIndex for InMemoryVectorIndex {
    fn add(&mut self, doc_id: &str, vector: Vec<f32>) -> Result<()> {
        if vector.is_empty() {
            bail!("empty vector for document '{doc_id}'");
        }
        match self.dimension {
            Some(dim) if dim != vector.len() => bail!(
                "vector dimension mismatch for '{doc_id}': expected {dim}, got {}",
                vector.len()
            ),
            Some(_) => {}
            None => self.dimension = Some(vector.len()),
        }

        if let Some(&pos) = self.positions.get(doc_id) {
            self.vectors[pos] = vector;
        } else {
            self.positions.insert(doc_id.to_string(), self.ids.len());
            self.ids.push(doc_id.to_string());
            self.vectors.push(vector);
        }
        Ok(())
    }

    fn similarity_search(&self, query: &[f32], top_n: usize) -> Result<Vec<(String, f32)>> {
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if query.len() != dim {
            bail!(
                "query dimension mismatch: expected {dim}, got {}",
                query.len()
            );
        }
        if top_n == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(String, f32)> = self
            .ids
            .iter()
            .zip(&self.vectors)
            .filter_map(|(id, vector)| {
                let cosine = cosine_similarity(query, vector)?;
                // Map cosine [-1, 1] onto [0, 1] so it composes with other scores.
                Some((id.clone(), ((cosine + 1.0) * 0.5).clamp(0.0, 1.0)))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(top_n);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

/// Produces a fresh [`InMemoryVectorIndex`] for every corpus build.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryVectorIndexFactory;

impl VectorIndexFactory for InMemoryVectorIndexFactory {
    fn create(&self, _corpus_id: &str) -> Result<Box<dyn VectorIndex>> {
        Ok(Box::new(InMemoryVectorIndex::new()))
    }
}
