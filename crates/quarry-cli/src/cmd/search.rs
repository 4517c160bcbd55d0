//! `quarry search`: hybrid retrieval over a JSONL corpus.

use crate::cmd::{CorpusArgs, open_corpus};
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};
use clap::Args;
use quarry_core::ScoredCandidate;
use quarry_core::config::EngineConfig;
use quarry_search::{RetrievalStatus, SearchRequest};
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

#[derive(Args, Debug)]
#[command(
    about = "Search a JSONL corpus",
    long_about = "Index the documents in --docs and run one hybrid query: BM25 and hashed \
                  vectors fused with weighted RRF, optionally reranked.",
    after_help = "EXAMPLES:\n    # Top 5 matches\n    quarry search 'rolling restart' --docs handbook.jsonl -n 5\n\n\
                  # With a caller deadline and JSON output\n    quarry search backup --docs handbook.jsonl --timeout-ms 50 --format json"
)]
pub struct SearchArgs {
    pub query: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    /// Maximum number of results to return.
    #[arg(short = 'n', long, default_value = "10")]
    pub limit: usize,

    /// Rerank fused candidates with the configured cross-encoder.
    #[arg(long)]
    pub rerank: bool,

    /// Overall deadline for the query, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

/// JSON envelope for search output.
#[derive(Debug, Serialize)]
pub struct SearchOutput {
    pub query: String,
    pub corpus: String,
    pub count: usize,
    pub status: RetrievalStatus,
    pub results: Vec<ScoredCandidate>,
}

/// Execute `quarry search`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the documents file
/// cannot be loaded, or output rendering fails. Backend trouble is reported
/// in the status, not as an error.
pub fn run_search(args: &SearchArgs, config: EngineConfig, output: OutputMode) -> anyhow::Result<()> {
    let (retriever, _report) = open_corpus(config, &args.corpus)?;

    let mut request = SearchRequest::new(args.corpus.corpus.as_str(), args.query.as_str(), args.limit)
        .with_rerank(args.rerank);
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(ms));
    }
    let outcome = retriever.search_detailed(&request);

    let result = SearchOutput {
        query: args.query.clone(),
        corpus: args.corpus.corpus.clone(),
        count: outcome.candidates.len(),
        status: outcome.status,
        results: outcome.candidates,
    };
    render_mode(output, &result, render_text, render_pretty)
}

fn snippet(content: &str, max_chars: usize) -> String {
    let flat: String = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{cut}…")
}

fn score(value: Option<f32>) -> String {
    value.map_or_else(|| "-".to_string(), |s| format!("{s:.4}"))
}

fn render_text(out: &SearchOutput, w: &mut dyn Write) -> io::Result<()> {
    for reason in out.status.reasons() {
        writeln!(w, "# degraded: {reason}")?;
    }
    for c in &out.results {
        writeln!(
            w,
            "{}\t{}\t{:.6}\t{}\t{}",
            c.rank,
            c.doc_id,
            c.fused_score,
            c.method,
            snippet(&c.content, 80)
        )?;
    }
    Ok(())
}

fn render_pretty(out: &SearchOutput, w: &mut dyn Write) -> io::Result<()> {
    pretty_section(w, &format!("Results for \"{}\" in {}", out.query, out.corpus))?;
    match &out.status {
        RetrievalStatus::Ok => {}
        RetrievalStatus::Unavailable => writeln!(w, "retrieval unavailable, no backend could answer")?,
        RetrievalStatus::Degraded(reasons) => {
            for reason in reasons {
                writeln!(w, "degraded: {reason}")?;
            }
        }
    }
    if out.results.is_empty() {
        writeln!(w, "no matches")?;
        return Ok(());
    }

    for c in &out.results {
        writeln!(w, "{:>3}. {}  [{}]", c.rank, c.doc_id, c.method)?;
        writeln!(w, "     {}", snippet(&c.content, 66))?;
        writeln!(
            w,
            "     fused {:.6}  bm25 {}  vector {}  rerank {}",
            c.fused_score,
            score(c.bm25_score),
            score(c.vector_score),
            score(c.rerank_score)
        )?;
    }
    pretty_rule(w)?;
    pretty_kv(w, "results", out.count.to_string())
}
