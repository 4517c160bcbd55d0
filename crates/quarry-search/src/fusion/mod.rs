//! Rank fusion of lexical and vector result lists.

mod rrf;

pub use rrf::{DEFAULT_RRF_K, WeightedList, fuse};
