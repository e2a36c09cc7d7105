//! Admission-control benchmarks: the editor's per-brief cost.
//!
//! - `max_similarity` against windows of 10 / 50 / 200 vectors (1536 dims)
//! - `HashEmbedder` encoding of a typical brief text
//! - A full `admit` pass: 5 briefs, 50-vector window, 3 writers

use chrono::{Duration, Utc};
use content_cycle_orchestrator::actor::{Actor, Role};
use content_cycle_orchestrator::config::AdmissionConfig;
use content_cycle_orchestrator::editor::{AdmissionEditor, AdmissionInput};
use content_cycle_orchestrator::model::{ContentBrief, TopicRecord, Tier};
use content_cycle_orchestrator::similarity::{max_similarity, HashEmbedder, SimilarityEngine};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;

const DIMS: usize = 1536;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn window(embedder: &HashEmbedder, n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| embedder.embed_sync(&format!("published article number {i} about coverage option {}", i % 7)))
        .collect()
}

fn brief(i: usize, topic: &str) -> ContentBrief {
    ContentBrief {
        id: format!("b-{i}"),
        primary_topic: topic.to_string(),
        tier: if i < 3 { Tier::Money } else if i == 3 { Tier::Authority } else { Tier::Trend },
        hook: "benefit".into(),
        format: "comparison".into(),
        target_length: 1500,
        target_carriers: vec![],
        rationale: String::new(),
    }
}

// ---------------------------------------------------------------------------
// Bench: raw similarity scan
// ---------------------------------------------------------------------------

fn bench_max_similarity(c: &mut Criterion) {
    let embedder = HashEmbedder::new(DIMS);
    let candidate = embedder.embed_sync("best term life insurance for seniors benefit");
    let mut group = c.benchmark_group("max_similarity");
    for size in [10usize, 50, 200] {
        let win = window(&embedder, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &win, |b, win| {
            b.iter(|| max_similarity(black_box(&candidate), black_box(win)));
        });
    }
    group.finish();
}

fn bench_hash_embed(c: &mut Criterion) {
    let embedder = HashEmbedder::new(DIMS);
    c.bench_function("hash_embedder_brief_text", |b| {
        b.iter(|| embedder.embed_sync(black_box("Cheapest renters insurance for students price")));
    });
}

// ---------------------------------------------------------------------------
// Bench: full admission pass
// ---------------------------------------------------------------------------

fn bench_admit_batch(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let embedder = Arc::new(HashEmbedder::new(DIMS));
    let win = window(&embedder, 50);
    let editor = AdmissionEditor::new(
        AdmissionConfig::default(),
        3,
        SimilarityEngine::new(embedder, DIMS, 8_000),
    );
    let briefs: Vec<ContentBrief> = [
        "Best term life insurance for seniors",
        "Cheapest renters insurance for students",
        "Pet insurance for older dogs",
        "How deductibles actually work",
        "Climate risk and home premiums this year",
    ]
    .iter()
    .enumerate()
    .map(|(i, t)| brief(i, t))
    .collect();
    let writers = vec![
        Actor::new("w1", Role::Writer).with_score(0.9),
        Actor::new("w2", Role::Writer).with_score(0.6),
        Actor::new("w3", Role::Writer).with_score(0.3),
    ];
    let now = Utc::now();
    let history: Vec<TopicRecord> = (0..200)
        .map(|i| TopicRecord {
            topic: format!("historic topic {i}"),
            tier: Tier::Authority,
            carriers: vec![],
            produced_at: now - Duration::days(i),
        })
        .collect();

    c.bench_function("admit_5_briefs_window_50", |b| {
        b.to_async(&rt).iter(|| async {
            let decision = editor
                .admit(AdmissionInput {
                    briefs: &briefs,
                    weekly_count: 2,
                    max_per_week: 10,
                    writers: &writers,
                    history: &history,
                    window: &win,
                    now,
                })
                .await
                .expect("admit");
            black_box(decision)
        });
    });
}

criterion_group!(benches, bench_max_similarity, bench_hash_embed, bench_admit_batch);
criterion_main!(benches);
