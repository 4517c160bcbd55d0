//! `quarry stats`: index a corpus and report backend availability.

use crate::cmd::{CorpusArgs, open_corpus};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};
use clap::Args;
use quarry_core::cache::ResultCacheStats;
use quarry_core::config::EngineConfig;
use quarry_search::{CorpusStats, IndexReport};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Args, Debug)]
#[command(
    about = "Index a corpus and show its statistics",
    after_help = "EXAMPLES:\n    quarry stats --docs handbook.jsonl\n    quarry stats --docs handbook.jsonl --format json"
)]
pub struct StatsArgs {
    #[command(flatten)]
    pub corpus: CorpusArgs,
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub index: IndexReport,
    pub corpus: CorpusStats,
    pub cache: ResultCacheStats,
}

/// Execute `quarry stats`.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the documents file
/// cannot be loaded.
pub fn run_stats(args: &StatsArgs, config: EngineConfig, output: OutputMode) -> anyhow::Result<()> {
    let (retriever, index) = open_corpus(config, &args.corpus)?;
    let corpus = retriever.get_stats(&args.corpus.corpus)?;
    let result = StatsOutput {
        index,
        corpus,
        cache: retriever.cache_stats(),
    };
    render_mode(output, &result, render_text, render_pretty)
}

const fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn render_text(out: &StatsOutput, w: &mut dyn Write) -> io::Result<()> {
    let c = &out.corpus;
    writeln!(w, "corpus\t{}", c.corpus_id)?;
    writeln!(w, "documents\t{}", c.document_count)?;
    writeln!(w, "generation\t{}", c.generation)?;
    writeln!(w, "lexical\t{}", yes_no(c.lexical_available))?;
    writeln!(w, "vector\t{}", yes_no(c.vector_available))?;
    writeln!(w, "reranker\t{}", yes_no(c.reranker_available))?;
    writeln!(
        w,
        "weights\tlexical={} vector={} k={}",
        c.weights.lexical, c.weights.vector, c.weights.k
    )
}

fn render_pretty(out: &StatsOutput, w: &mut dyn Write) -> io::Result<()> {
    let c = &out.corpus;
    pretty_section(w, &format!("Corpus {}", c.corpus_id))?;
    pretty_kv(w, "documents", c.document_count.to_string())?;
    pretty_kv(w, "generation", c.generation.to_string())?;
    pretty_kv(w, "lexical", yes_no(c.lexical_available))?;
    pretty_kv(w, "vector", yes_no(c.vector_available))?;
    pretty_kv(w, "reranker", yes_no(c.reranker_available))?;
    pretty_kv(
        w,
        "fusion",
        format!(
            "lexical {} / vector {} (k = {})",
            c.weights.lexical, c.weights.vector, c.weights.k
        ),
    )?;
    writeln!(w)?;

    pretty_section(w, "Cache")?;
    for pool in [
        &out.cache.query,
        &out.cache.document,
        &out.cache.embedding,
        &out.cache.metadata,
    ] {
        pretty_kv(
            w,
            pool.name,
            format!(
                "{}/{} entries, {}/{} bytes",
                pool.count, pool.max_count, pool.bytes, pool.max_bytes
            ),
        )?;
    }
    Ok(())
}
