pub mod config;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use clap::Args;
use quarry_core::Document;
use quarry_core::config::EngineConfig;
use quarry_search::{HashingEmbedder, HybridRetriever, IndexReport};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Corpus options shared by commands that index a JSONL file.
#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// JSONL file with one `{"id", "content", "metadata"?}` object per line.
    #[arg(short = 'd', long)]
    pub docs: PathBuf,

    /// Corpus id the documents are indexed under.
    #[arg(long, default_value = "default")]
    pub corpus: String,

    /// Dimensions of the built-in hashing embedder.
    #[arg(long, default_value_t = 256)]
    pub dimensions: usize,
}

/// Read documents from a JSONL file. Blank lines are skipped.
///
/// # Errors
///
/// Returns an error naming the file and line when a line is not a valid
/// document or the file cannot be read.
pub fn load_documents(path: &Path) -> Result<Vec<Document>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut documents = Vec::new();
    let mut seen = HashSet::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Document = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: invalid document", path.display(), i + 1))?;
        if !seen.insert(doc.id.clone()) {
            warn!(doc_id = %doc.id, line = i + 1, "duplicate document id, later line wins");
        }
        documents.push(doc);
    }

    debug!(path = %path.display(), documents = documents.len(), "loaded documents");
    Ok(documents)
}

/// Build a retriever for one-shot CLI use and index `args.docs` into it.
///
/// # Errors
///
/// Returns a [`quarry_core::RetrievalError`] for an invalid configuration, or
/// an I/O / parse error for the documents file.
pub fn open_corpus(config: EngineConfig, args: &CorpusArgs) -> Result<(HybridRetriever, IndexReport)> {
    let retriever = HybridRetriever::builder(config)
        .with_embedder(Arc::new(HashingEmbedder::new(args.dimensions)))
        .without_sweeper()
        .build()?;
    let documents = load_documents(&args.docs)?;
    let report = retriever.add_documents(&args.corpus, documents);
    Ok((retriever, report))
}
