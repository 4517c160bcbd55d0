//! Model-free embedder: hashes terms into fixed-dimension buckets.
//!
//! Not semantically rich, but deterministic and always available, which is
//! enough for the CLI and for exercising the vector path in tests.

use anyhow::Result;
use std::collections::HashMap;

use super::Embedder;
use crate::lexical::tokenize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

/// Term-frequency vectors over FNV-1a hashed buckets, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model_id: String,
}

impl HashingEmbedder {
    /// A zero dimension is raised to 1.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        Self {
            dimensions,
            model_id: format!("hashing-{dimensions}"),
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[allow(clippy::cast_possible_truncation)]
    fn bucket(&self, term: &str) -> usize {
        let mut hash = FNV_OFFSET;
        for byte in term.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash % self.dimensions as u64) as usize
    }

    #[allow(clippy::cast_precision_loss)]
    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let terms = tokenize(text);
        if terms.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, f32> = HashMap::new();
        for term in &terms {
            *tf.entry(term.as_str()).or_default() += 1.0;
        }

        let total = terms.len() as f32;
        for (term, count) in tf {
            // Longer terms are rarer; weight them up a little.
            let weight = 1.0 + (term.chars().count() as f32).ln();
            vector[self.bucket(term)] += count / total * weight;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }
}
