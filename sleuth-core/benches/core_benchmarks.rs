use criterion::{Criterion, black_box, criterion_group, criterion_main};
use indexmap::IndexMap;
use sleuth_core::cache::{ResultCache, cache_key};
use sleuth_core::ledger::{ReliabilityTable, SourceMetadata, canonical_url, quality_score};
use sleuth_core::mock::MockTool;
use sleuth_core::{
    CachedResult, ClarificationEngine, SleuthConfig, SourceLedger, ToolCall, ToolCoordinator,
    ToolPerformance, ToolRegistry, order_queries,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn bench_cache(c: &mut Criterion) {
    c.bench_function("cache_key_derivation", |b| {
        b.iter(|| cache_key(black_box("Web_Search"), black_box("  How does   Tokio schedule  ")))
    });

    let rt = runtime();
    let cache = ResultCache::new(8 * 1024 * 1024, 10_000);
    let value = CachedResult {
        payload: serde_json::json!({"hits": ["a", "b", "c"]}),
        source_urls: BTreeSet::from(["https://docs.rs/tokio".to_string()]),
    };
    rt.block_on(async {
        for i in 0..1_000 {
            cache
                .put(format!("web::q{i}"), value.clone(), Duration::from_secs(3600))
                .await;
        }
    });

    c.bench_function("cache_get_hit", |b| {
        b.iter(|| rt.block_on(cache.get(black_box("web::q500"))))
    });

    c.bench_function("cache_put_with_eviction", |b| {
        let small = ResultCache::new(64 * 1024, 100);
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            rt.block_on(small.put(format!("web::{i}"), value.clone(), Duration::from_secs(60)))
        })
    });
}

fn bench_ledger(c: &mut Criterion) {
    let table = ReliabilityTable::default();
    let tools = BTreeSet::from(["web_search".to_string()]);

    c.bench_function("quality_score", |b| {
        b.iter(|| quality_score(&table, black_box("https://cs.stanford.edu/paper"), &tools, 3))
    });

    c.bench_function("canonical_url", |b| {
        b.iter(|| canonical_url(black_box("HTTPS://Docs.RS/tokio/latest/#runtime")))
    });

    let rt = runtime();
    let ledger = SourceLedger::new();
    c.bench_function("ledger_record_repeat", |b| {
        b.iter(|| {
            rt.block_on(ledger.record(
                black_box("https://github.com/tokio-rs/tokio"),
                "web_search",
                SourceMetadata::default(),
            ))
        })
    });
}

fn bench_clarification(c: &mut Criterion) {
    let engine = ClarificationEngine::default();

    c.bench_function("clarification_validate", |b| {
        b.iter(|| engine.validate(black_box("What is the best latest framework?")))
    });

    let responses: IndexMap<String, String> = (0..5)
        .map(|i| (format!("Clarification {i}?"), format!("Answer {i}")))
        .collect();
    c.bench_function("clarification_refine", |b| {
        b.iter(|| engine.refine(black_box("Which runtime?"), &responses))
    });
}

fn bench_optimizer(c: &mut Criterion) {
    let history: HashMap<String, ToolPerformance> = (0..5)
        .map(|i| {
            (
                format!("tool{i}"),
                ToolPerformance {
                    samples: 20,
                    successes: 4 * i,
                    avg_latency_ms: 100.0 * i as f64,
                },
            )
        })
        .collect();
    let calls: Vec<ToolCall> = (0..10)
        .map(|i| ToolCall::new(format!("tool{}", i % 7), format!("query {i}")))
        .collect();

    c.bench_function("order_queries_10", |b| {
        b.iter(|| order_queries(black_box(calls.clone()), &history))
    });
}

fn bench_coordinator(c: &mut Criterion) {
    let rt = runtime();
    let config = SleuthConfig::default();
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(MockTool::new("web_search")))
        .unwrap();
    let coordinator = ToolCoordinator::new(
        Arc::new(registry),
        Arc::new(ResultCache::new(64 * 1024 * 1024, 100_000)),
        Arc::new(SourceLedger::new()),
        &config,
    );
    let calls: Vec<ToolCall> = (0..5)
        .map(|i| ToolCall::new("web_search", format!("warm {i}")))
        .collect();
    rt.block_on(coordinator.execute_round(&calls, 5, Duration::from_secs(1)));

    c.bench_function("coordinator_round_all_cached", |b| {
        b.iter(|| rt.block_on(coordinator.execute_round(black_box(&calls), 5, Duration::from_secs(1))))
    });
}

criterion_group!(
    benches,
    bench_cache,
    bench_ledger,
    bench_clarification,
    bench_optimizer,
    bench_coordinator,
);
criterion_main!(benches);
