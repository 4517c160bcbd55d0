//! In-memory Okapi BM25 index.
//!
//! ```text
//! score(d) = Σ_{t ∈ query} IDF(t) · tf(t,d)·(k1+1) / (tf(t,d) + k1·(1 − b + b·|d|/avgdl))
//! IDF(t)   = ln(1 + (N − df(t) + 0.5) / (df(t) + 0.5))
//! ```
//!
//! The index is immutable once built. Adding documents means building a new
//! index and swapping it in, so readers never observe a half-built index.

use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::tokenize::tokenize;

/// BM25 free parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f64,
    /// Document-length normalization strength, within `[0, 1]`.
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    tf: u32,
}

/// BM25 statistics over one corpus.
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    params: Bm25Params,
    /// Document ids in insertion order; the position is the tie-break key.
    doc_ids: Vec<String>,
    doc_lens: Vec<u32>,
    avgdl: f64,
    postings: HashMap<String, Vec<Posting>>,
}

impl LexicalIndex {
    /// Tokenize every `(doc_id, content)` pair and compute postings, `avgdl`
    /// and `N`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters are out of range or a document is
    /// too long to count.
    pub fn build<'a, I>(documents: I, params: Bm25Params) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if !params.k1.is_finite() || params.k1 < 0.0 {
            bail!("BM25 k1 must be a finite non-negative number, got {}", params.k1);
        }
        if !(0.0..=1.0).contains(&params.b) {
            bail!("BM25 b must be within [0, 1], got {}", params.b);
        }

        let mut doc_ids = Vec::new();
        let mut doc_lens = Vec::new();
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_len: u64 = 0;

        for (doc, (doc_id, content)) in documents.into_iter().enumerate() {
            let terms = tokenize(content);
            let Ok(len) = u32::try_from(terms.len()) else {
                bail!("document '{doc_id}' has too many terms to index");
            };

            let mut counts: HashMap<String, u32> = HashMap::new();
            for term in terms {
                *counts.entry(term).or_default() += 1;
            }
            for (term, tf) in counts {
                postings.entry(term).or_default().push(Posting { doc, tf });
            }

            doc_ids.push(doc_id.to_string());
            doc_lens.push(len);
            total_len += u64::from(len);
        }

        #[allow(clippy::cast_precision_loss)]
        let avgdl = if doc_ids.is_empty() {
            0.0
        } else {
            total_len as f64 / doc_ids.len() as f64
        };

        debug!(
            documents = doc_ids.len(),
            terms = postings.len(),
            avgdl,
            "built BM25 index"
        );

        Ok(Self {
            params,
            doc_ids,
            doc_lens,
            avgdl,
            postings,
        })
    }

    /// Corpus size `N`.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    #[must_use]
    pub const fn avgdl(&self) -> f64 {
        self.avgdl
    }

    /// Number of documents containing `term` (after tokenization).
    #[must_use]
    pub fn document_frequency(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    /// `IDF(t) = ln(1 + (N − df + 0.5) / (df + 0.5))`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.doc_ids.len() as f64;
        let df = self.document_frequency(term) as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// Score the corpus against `query` and return the best `top_n`
    /// `(doc_id, score)` pairs, highest first.
    ///
    /// Repeated query terms count once. Terms absent from the index
    /// contribute nothing; documents sharing no term with the query are not
    /// returned. Equal scores keep corpus insertion order.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn search(&self, query: &str, top_n: usize) -> Vec<(String, f32)> {
        if top_n == 0 || self.is_empty() || self.avgdl <= 0.0 {
            return Vec::new();
        }

        let Bm25Params { k1, b } = self.params;
        let mut seen = HashSet::new();
        let mut scores: HashMap<usize, f64> = HashMap::new();

        for term in tokenize(query) {
            if !seen.insert(term.clone()) {
                continue;
            }
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(&term);
            for posting in postings {
                let tf = f64::from(posting.tf);
                let dl = f64::from(self.doc_lens[posting.doc]);
                let norm = k1 * (1.0 - b + b * dl / self.avgdl);
                *scores.entry(posting.doc).or_default() += idf * (tf * (k1 + 1.0)) / (tf + norm);
            }
        }

        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|x, y| {
            y.1.partial_cmp(&x.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| x.0.cmp(&y.0))
        });
        ranked.truncate(top_n);

        ranked
            .into_iter()
            .map(|(doc, score)| (self.doc_ids[doc].clone(), score as f32))
            .collect()
    }
}
