#![allow(clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use quarry_core::Document;
use quarry_core::config::EngineConfig;
use quarry_search::fusion::{DEFAULT_RRF_K, WeightedList, fuse};
use quarry_search::{Bm25Params, HashingEmbedder, HybridRetriever, LexicalIndex, SearchRequest};
use std::sync::Arc;

const SIZES: [usize; 3] = [100, 1_000, 10_000];

const WORDS: [&str; 24] = [
    "cache", "index", "query", "token", "vector", "fusion", "rank", "score", "shard", "replica",
    "latency", "budget", "deploy", "restore", "backup", "schema", "stream", "batch", "commit",
    "merge", "rollback", "lease", "quorum", "snapshot",
];

/// Deterministic synthetic corpus; word choice comes from a small LCG.
fn corpus(size: usize) -> Vec<Document> {
    let mut state = 0x2545_F491_u64;
    (0..size)
        .map(|i| {
            let words: Vec<&str> = (0..12)
                .map(|_| {
                    state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
                    WORDS[(state >> 33) as usize % WORDS.len()]
                })
                .collect();
            Document::new(format!("doc-{i}"), words.join(" "))
        })
        .collect()
}

fn bench_bm25(c: &mut Criterion) {
    let mut group = c.benchmark_group("bm25");
    for size in SIZES {
        let docs = corpus(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("build", size), &docs, |b, docs| {
            b.iter(|| {
                LexicalIndex::build(
                    docs.iter().map(|d| (d.id.as_str(), d.content.as_str())),
                    Bm25Params::default(),
                )
            });
        });

        let Ok(index) = LexicalIndex::build(
            docs.iter().map(|d| (d.id.as_str(), d.content.as_str())),
            Bm25Params::default(),
        ) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::new("search", size), &index, |b, index| {
            b.iter(|| black_box(index.search(black_box("snapshot quorum lease"), 50)));
        });
    }
    group.finish();
}

fn bench_fusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("rrf");
    for size in [50, 500, 5_000] {
        let a: Vec<String> = (0..size).map(|i| format!("doc-{i}")).collect();
        let b: Vec<String> = (0..size).rev().map(|i| format!("doc-{}", i * 2)).collect();
        group.bench_with_input(BenchmarkId::new("fuse", size), &(a, b), |bench, (a, b)| {
            bench.iter(|| {
                black_box(fuse(
                    &[WeightedList::new(1.0, a), WeightedList::new(0.7, b)],
                    DEFAULT_RRF_K,
                ))
            });
        });
    }
    group.finish();
}

fn bench_hybrid(c: &mut Criterion) {
    let mut group = c.benchmark_group("hybrid");
    group.sample_size(20);
    for size in [100, 1_000] {
        let mut config = EngineConfig::default();
        // Measure the pipeline, not the result cache.
        config.cache.query.max_count = 1;
        let Ok(retriever) = HybridRetriever::builder(config)
            .with_embedder(Arc::new(HashingEmbedder::default()))
            .without_sweeper()
            .build()
        else {
            continue;
        };
        retriever.add_documents("bench", corpus(size));

        let mut n = 0_u64;
        group.bench_function(BenchmarkId::new("search", size), |b| {
            b.iter(|| {
                n += 1;
                let query = format!("{} rollback merge", WORDS[(n % 24) as usize]);
                black_box(retriever.search_detailed(&SearchRequest::new("bench", query, 10)))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_bm25, bench_fusion, bench_hybrid);
criterion_main!(benches);
