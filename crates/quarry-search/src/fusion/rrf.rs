//! Weighted Reciprocal Rank Fusion.
//!
//! ```text
//! fused(d) = Σ_i  w_i / (k + rank_i(d))
//! ```
//!
//! - `rank_i(d)` is the 1-based position of `d` in list `i`.
//! - Documents absent from a list contribute 0 from that list.
//! - Only ranks matter, never the raw backend scores, so BM25 and cosine
//!   lists need no normalization.
//!
//! Output is sorted by fused score descending, ties broken by ascending
//! `doc_id` so the order is reproducible.

use std::collections::BTreeMap;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: u32 = 60;

/// One ranked list together with the weight of its source.
#[derive(Debug, Clone, Copy)]
pub struct WeightedList<'a, S> {
    pub weight: f64,
    /// Document ids, best first.
    pub doc_ids: &'a [S],
}

impl<'a, S> WeightedList<'a, S> {
    pub const fn new(weight: f64, doc_ids: &'a [S]) -> Self {
        Self { weight, doc_ids }
    }
}

/// Fuse ranked lists with weighted RRF.
///
/// Lists with a non-positive or non-finite weight are ignored. A document
/// repeated within one list only counts at its first (best) position.
///
/// # Example
///
/// ```
/// use quarry_search::fusion::{WeightedList, fuse};
///
/// let lexical = ["A", "B", "C"];
/// let vector = ["B", "C", "A"];
/// let fused = fuse(
///     &[WeightedList::new(1.0, &lexical), WeightedList::new(1.0, &vector)],
///     60,
/// );
/// assert_eq!(fused[0].0, "B");
/// ```
#[must_use]
pub fn fuse<S: AsRef<str>>(lists: &[WeightedList<'_, S>], k: u32) -> Vec<(String, f64)> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    let k = f64::from(k);

    for list in lists {
        if !list.weight.is_finite() || list.weight <= 0.0 {
            continue;
        }

        let mut seen = std::collections::HashSet::new();
        let mut rank = 0u32;
        for doc_id in list.doc_ids {
            let doc_id = doc_id.as_ref();
            if !seen.insert(doc_id) {
                continue;
            }
            rank += 1;
            let contribution = list.weight / (k + f64::from(rank));
            *scores.entry(doc_id.to_string()).or_default() += contribution;
        }
    }

    // Sort by score descending, then by doc_id for stability
    let mut result: Vec<_> = scores.into_iter().collect();
    result.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    result
}
