//! Cache key derivation.
//!
//! Keys are blake3 digests over a JSON payload so that arbitrary corpus ids,
//! document ids and query text never collide through delimiter tricks.

use serde_json::json;

const QUERY_KEY_SCHEMA_VERSION: u32 = 1;

fn digest(payload: &serde_json::Value) -> String {
    // Serializing a `Value` built from strings and integers cannot fail.
    let raw = payload.to_string();
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

/// Key for the query-result pool.
#[must_use]
pub fn query_key(corpus_id: &str, query: &str, top_k: usize, use_rerank: bool) -> String {
    digest(&json!({
        "kind": "query",
        "schema_version": QUERY_KEY_SCHEMA_VERSION,
        "corpus_id": corpus_id,
        "query": query.trim(),
        "top_k": top_k,
        "use_rerank": use_rerank,
    }))
}

/// Key for the document-content and metadata pools.
#[must_use]
pub fn document_key(corpus_id: &str, doc_id: &str) -> String {
    digest(&json!({
        "kind": "document",
        "corpus_id": corpus_id,
        "doc_id": doc_id,
    }))
}

/// Key for the embedding pool. Embeddings depend only on the text.
#[must_use]
pub fn embedding_key(model: &str, text: &str) -> String {
    digest(&json!({
        "kind": "embedding",
        "model": model,
        "text": text,
    }))
}

/// First 12 characters of a key, for log lines.
#[must_use]
pub fn key_prefix(key: &str) -> &str {
    let len = key.len().min(12);
    &key[..len]
}
