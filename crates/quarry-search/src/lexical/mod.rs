//! Lexical retrieval: tokenizer and BM25 index.

mod bm25;
mod tokenize;

pub use bm25::{Bm25Params, LexicalIndex};
pub use tokenize::tokenize;
