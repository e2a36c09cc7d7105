//! Demo binary for content-cycle-orchestrator
//!
//! Seeds an in-memory store with actors and topic history, runs one cycle,
//! and prints the resulting `CycleRun` as JSON.
//!
//! ## Environment Variables
//!
//! - `CYCLE_CONFIG=path/to/cycle.toml` — configuration file (defaults if unset)
//! - `CYCLE_LIVE=1` — use the OpenAI-compatible client instead of scripted providers
//! - `LOG_FORMAT=json` — structured JSON output, overriding `[observability] log_format`
//! - `RUST_LOG=info` — log level filter

use chrono::{Duration, Utc};
use content_cycle_orchestrator::config::loader::load_from_env;
use content_cycle_orchestrator::model::{PerformanceMetric, PerformanceSample, TopicRecord};
use content_cycle_orchestrator::providers::mock::{MockLlm, StaticSearch};
use content_cycle_orchestrator::providers::openai::{CredentialCache, OpenAiClient};
use content_cycle_orchestrator::similarity::HashEmbedder;
use content_cycle_orchestrator::{
    init_tracing_with, metrics, Actor, BehaviorConfig, CycleOrchestrator, EmbeddingProvider,
    LlmProvider, MemoryStore, Role, SystemSettings, Tier,
};
use std::sync::Arc;
use tracing::info;

fn seeded_store() -> MemoryStore {
    let now = Utc::now();
    let actors = vec![
        Actor::new("analyst-1", Role::Analyst),
        Actor::new("strategist-1", Role::Strategist).with_persona(BehaviorConfig {
            avoided_carriers: Some(vec!["Fabrikam Home".into()]),
            ..BehaviorConfig::default()
        }),
        Actor::new("editor-1", Role::Editor),
        Actor::new("writer-ava", Role::Writer)
            .with_score(0.72)
            .with_persona(BehaviorConfig {
                tone: Some("plain-spoken".into()),
                assertiveness: Some(0.6),
                ..BehaviorConfig::default()
            }),
        Actor::new("writer-ben", Role::Writer).with_score(0.55),
        Actor::new("writer-cy", Role::Writer).with_score(0.40).with_active(false),
        Actor::new("refiner-1", Role::Refiner),
        Actor::new("optimizer-1", Role::Optimizer),
        Actor::new("researcher-1", Role::Researcher),
    ];

    let topics = vec![
        TopicRecord {
            topic: "How deductibles actually work".into(),
            tier: Tier::Authority,
            carriers: vec!["Contoso Mutual".into()],
            produced_at: now - Duration::days(120),
        },
        TopicRecord {
            topic: "Is flood insurance worth it this season".into(),
            tier: Tier::Trend,
            carriers: vec!["Fabrikam Home".into()],
            produced_at: now - Duration::days(20),
        },
    ];

    let samples = vec![
        PerformanceSample {
            artifact_id: "seed-1".into(),
            actor_id: "writer-ava".into(),
            tier: Tier::Money,
            format: "comparison".into(),
            hook: "price".into(),
            carriers: vec!["Northwind Life".into()],
            published_at: now - Duration::days(5),
            metric: PerformanceMetric {
                views: 2_400,
                click_through_rate: 0.045,
                avg_engagement_time: 95.0,
                bounce_rate: 0.41,
                conversion_count: 38,
            },
        },
        PerformanceSample {
            artifact_id: "seed-2".into(),
            actor_id: "writer-ben".into(),
            tier: Tier::Authority,
            format: "guide".into(),
            hook: "curiosity".into(),
            carriers: vec!["Contoso Mutual".into()],
            published_at: now - Duration::days(9),
            metric: PerformanceMetric {
                views: 900,
                click_through_rate: 0.006,
                avg_engagement_time: 22.0,
                bounce_rate: 0.81,
                conversion_count: 3,
            },
        },
    ];

    MemoryStore::new()
        .with_settings(SystemSettings {
            paused: false,
            auto_evolution: true,
            max_per_week: 10,
        })
        .with_actors(actors)
        .with_topic_history(topics)
        .with_samples(samples)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_from_env("CYCLE_CONFIG")?;

    // Initialize structured tracing (config format, LOG_FORMAT env wins)
    let _ = init_tracing_with(config.observability.log_format);

    if config.observability.metrics_enabled {
        metrics::init_metrics()?;
    }

    info!(cycle = %config.cycle.name, "Starting content cycle demo");

    let live = std::env::var("CYCLE_LIVE").is_ok_and(|v| v == "1");
    let (llm, embedder): (Arc<dyn LlmProvider>, Arc<dyn EmbeddingProvider>) = if live {
        let mut client = OpenAiClient::new(
            config.providers.chat_model.clone(),
            config.providers.embedding_model.clone(),
        )
        .with_credentials(CredentialCache::from_env(
            config.providers.api_key_env.clone(),
            std::time::Duration::from_secs(300),
        ))
        .with_policy(config.providers.call_policy());
        if let Some(url) = &config.providers.base_url {
            client = client.with_base_url(url.clone());
        }
        let client = Arc::new(client);
        (
            Arc::clone(&client) as Arc<dyn LlmProvider>,
            client as Arc<dyn EmbeddingProvider>,
        )
    } else {
        (
            Arc::new(MockLlm::content_defaults()) as Arc<dyn LlmProvider>,
            Arc::new(HashEmbedder::new(config.embedding.dimensions)) as Arc<dyn EmbeddingProvider>,
        )
    };

    let search = StaticSearch::new()
        .with_results("insurance questions people ask", &["Pet insurance waiting periods", "Term life for smokers"])
        .with_results("insurance news this month", &["Flood premiums rising"]);

    let mut config = config;
    if config.strategist.research_queries.is_empty() {
        config.strategist.research_queries = vec![
            "insurance questions people ask".into(),
            "insurance news this month".into(),
        ];
    }

    let store = seeded_store();
    let orchestrator = CycleOrchestrator::new(config, Arc::new(store.clone()), llm, embedder)?
        .with_search(Arc::new(search));

    let run = orchestrator.run_cycle().await;
    println!("{}", serde_json::to_string_pretty(&run)?);

    for artifact in store.artifacts() {
        info!(
            slug = %artifact.slug,
            writer = %artifact.actor_id,
            words = artifact.word_count,
            ctas = artifact.cta_blocks.len(),
            "artifact in store"
        );
    }

    let summary = metrics::get_metrics_summary();
    info!(
        cycles = ?summary.cycles_total,
        rejected = ?summary.briefs_rejected,
        failures = ?summary.assignment_failures,
        "Demo complete"
    );

    Ok(())
}
