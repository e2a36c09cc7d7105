//! # Cycle Configuration
//!
//! ## Responsibility
//! Parse and validate the TOML document that tunes one content cycle:
//! batch sizing, tier quota, admission thresholds, analyst windows,
//! strategist inputs, embedding limits and provider call policy.
//!
//! ## Guarantees
//! - Deterministic: same TOML input always produces the same `CycleConfig`
//! - Every section and field has a documented default; an empty document is valid
//! - Validated: all semantic constraints are checked before a config is accepted
//! - Schema-exportable: JSON Schema output enables IDE autocomplete
//!
//! ## NOT Responsible For
//! - System-wide runtime flags (pause, auto-evolution, weekly quota) which
//!   live in the store's `SystemSettings` and are loaded per cycle
//! - Building providers from config (that belongs to the binary)

pub mod loader;
pub mod validation;

use crate::model::Tier;
use crate::resilience::{CallPolicy, RetryPolicy};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

fn default_name() -> String {
    "content-cycle".to_string()
}

fn default_batch_size() -> usize {
    5
}

fn default_per_cycle_cap() -> u32 {
    3
}

/// Default per-assignment budget: 300 seconds.
fn default_assignment_timeout_s() -> u64 {
    300
}

fn default_money() -> usize {
    3
}

fn default_one() -> usize {
    1
}

fn default_cooldown_days() -> u32 {
    60
}

fn default_similarity_threshold() -> f64 {
    0.30
}

fn default_embedding_window() -> usize {
    50
}

fn default_scoring_window_days() -> u32 {
    30
}

fn default_trend_recent_days() -> u32 {
    14
}

fn default_trend_older_days() -> u32 {
    60
}

fn default_trend_threshold() -> f64 {
    0.03
}

fn default_min_views() -> u64 {
    100
}

fn default_min_ctr() -> f64 {
    0.01
}

fn default_max_bounce_rate() -> f64 {
    0.75
}

fn default_min_engagement_s() -> f64 {
    30.0
}

fn default_carriers() -> Vec<String> {
    ["Northwind Life", "Contoso Mutual", "Fabrikam Home", "Tailspin Pet"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn default_seed_topics() -> Vec<String> {
    [
        "Best term life insurance for seniors",
        "Cheapest renters insurance for students",
        "How deductibles actually work",
        "Pet insurance for older dogs",
        "Home insurance and climate risk",
        "Bundling auto and home insurance",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_research_concurrency() -> usize {
    4
}

fn default_dimensions() -> usize {
    1536
}

fn default_max_input_chars() -> usize {
    8000
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// Default provider call timeout: 30 seconds.
fn default_timeout_s() -> u64 {
    30
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    8000
}

fn default_true() -> bool {
    true
}

// ── Top-level config ─────────────────────────────────────────────────────

/// Root configuration for the content cycle.
///
/// # Example
///
/// ```toml
/// [cycle]
/// batch_size = 5
/// per_cycle_cap = 3
///
/// [admission]
/// cooldown_days = 60
/// similarity_threshold = 0.30
/// ```
///
/// # Panics
///
/// This type never panics during construction or access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct CycleConfig {
    /// Batch sizing and per-assignment budget.
    pub cycle: CycleSection,
    /// Per-tier brief counts. Must sum to `cycle.batch_size`.
    pub quota: QuotaConfig,
    /// Cooldown and similarity gate.
    pub admission: AdmissionConfig,
    /// Scoring and trend windows plus underperformance thresholds.
    pub analyst: AnalystConfig,
    /// Carrier universe, seed topics and research queries.
    pub strategist: StrategistConfig,
    /// Embedding dimensionality and input bound.
    pub embedding: EmbeddingConfig,
    /// Provider models and call policy.
    pub providers: ProvidersConfig,
    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

// ── Cycle ────────────────────────────────────────────────────────────────

/// Batch sizing for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CycleSection {
    /// Human-readable name used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Briefs the strategist must produce per cycle.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Hard cap on assignments per cycle.
    #[serde(default = "default_per_cycle_cap")]
    pub per_cycle_cap: u32,
    /// Upper bound (seconds) on one assignment's write → persist pipeline.
    #[serde(default = "default_assignment_timeout_s")]
    pub assignment_timeout_s: u64,
}

impl Default for CycleSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            batch_size: default_batch_size(),
            per_cycle_cap: default_per_cycle_cap(),
            assignment_timeout_s: default_assignment_timeout_s(),
        }
    }
}

impl CycleSection {
    /// Per-assignment budget as a [`Duration`].
    pub fn assignment_timeout(&self) -> Duration {
        Duration::from_secs(self.assignment_timeout_s)
    }
}

// ── Quota ────────────────────────────────────────────────────────────────

/// Tier distribution every brief batch must match exactly.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct QuotaConfig {
    /// Conversion-focused briefs.
    #[serde(default = "default_money")]
    pub money: usize,
    /// Evergreen explainers.
    #[serde(default = "default_one")]
    pub authority: usize,
    /// Timely pieces.
    #[serde(default = "default_one")]
    pub trend: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            money: default_money(),
            authority: default_one(),
            trend: default_one(),
        }
    }
}

impl QuotaConfig {
    /// Required count for one tier.
    pub fn for_tier(&self, tier: Tier) -> usize {
        match tier {
            Tier::Money => self.money,
            Tier::Authority => self.authority,
            Tier::Trend => self.trend,
        }
    }

    /// Sum over all tiers.
    pub fn total(&self) -> usize {
        self.money + self.authority + self.trend
    }
}

// ── Admission ────────────────────────────────────────────────────────────

/// Admission-control gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AdmissionConfig {
    /// Days before a topic may be produced again.
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: u32,
    /// Minimum cosine distance to recent content. Distances strictly below
    /// are rejected; a distance equal to the threshold is admitted.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Number of recent embeddings compared against.
    #[serde(default = "default_embedding_window")]
    pub embedding_window: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            cooldown_days: default_cooldown_days(),
            similarity_threshold: default_similarity_threshold(),
            embedding_window: default_embedding_window(),
        }
    }
}

// ── Analyst ──────────────────────────────────────────────────────────────

/// Performance analyst windows and thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnalystConfig {
    /// Days of samples used for actor scoring.
    #[serde(default = "default_scoring_window_days")]
    pub scoring_window_days: u32,
    /// The "recent" trend window: the last N days.
    #[serde(default = "default_trend_recent_days")]
    pub trend_recent_days: u32,
    /// The "older" trend window ends this many days ago.
    #[serde(default = "default_trend_older_days")]
    pub trend_older_days: u32,
    /// Relative CTR change that counts as improving / declining.
    #[serde(default = "default_trend_threshold")]
    pub trend_threshold: f64,
    /// Views an actor needs before any suggestion is made.
    #[serde(default = "default_min_views")]
    pub min_views: u64,
    /// CTR below this triggers an assertiveness suggestion.
    #[serde(default = "default_min_ctr")]
    pub min_ctr: f64,
    /// Bounce rate above this triggers a shortening suggestion.
    #[serde(default = "default_max_bounce_rate")]
    pub max_bounce_rate: f64,
    /// Mean engagement (seconds) below this triggers a CTA density suggestion.
    #[serde(default = "default_min_engagement_s")]
    pub min_engagement_s: f64,
}

impl Default for AnalystConfig {
    fn default() -> Self {
        Self {
            scoring_window_days: default_scoring_window_days(),
            trend_recent_days: default_trend_recent_days(),
            trend_older_days: default_trend_older_days(),
            trend_threshold: default_trend_threshold(),
            min_views: default_min_views(),
            min_ctr: default_min_ctr(),
            max_bounce_rate: default_max_bounce_rate(),
            min_engagement_s: default_min_engagement_s(),
        }
    }
}

// ── Strategist ───────────────────────────────────────────────────────────

/// Strategist inputs.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct StrategistConfig {
    /// Every carrier (partner) the coverage map is built over.
    #[serde(default = "default_carriers")]
    pub carriers: Vec<String>,
    /// Topics used when there is no memory and research yields nothing.
    #[serde(default = "default_seed_topics")]
    pub seed_topics: Vec<String>,
    /// Queries sent to the search provider. Empty disables research.
    #[serde(default)]
    pub research_queries: Vec<String>,
    /// Concurrent research queries in flight.
    #[serde(default = "default_research_concurrency")]
    pub research_concurrency: usize,
}

impl Default for StrategistConfig {
    fn default() -> Self {
        Self {
            carriers: default_carriers(),
            seed_topics: default_seed_topics(),
            research_queries: Vec::new(),
            research_concurrency: default_research_concurrency(),
        }
    }
}

// ── Embedding ────────────────────────────────────────────────────────────

/// Embedding contract.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EmbeddingConfig {
    /// Vector length every provider response must have.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// Inputs are cut to this many characters before encoding.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_dimensions(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// Provider models and call policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ProvidersConfig {
    /// Chat model name.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Base URL of an OpenAI-compatible server. `None` uses the public API.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: u64,
    /// Attempts including the first. Only 429 / 5xx are retried.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Initial backoff (ms). Must be ≤ `retry_max_ms`.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Backoff cap (ms).
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_s: default_timeout_s(),
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl ProvidersConfig {
    /// Timeout + exponential backoff policy for provider calls.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy::new(
            Duration::from_secs(self.timeout_s),
            RetryPolicy::exponential(
                self.retry_attempts as usize,
                Duration::from_millis(self.retry_base_ms),
            )
            .with_max_delay(Duration::from_millis(self.retry_max_ms)),
        )
    }
}

// ── Observability ────────────────────────────────────────────────────────

/// Logging and metrics.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservabilityConfig {
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Register Prometheus collectors at start-up.
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            metrics_enabled: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, colorized log output.
    #[default]
    Pretty,
    /// Structured JSON log output for machine consumption.
    Json,
}

impl LogFormat {
    /// Apply a `LOG_FORMAT`-style override; unknown or absent values keep
    /// `self`.
    pub fn overridden_by(self, value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("json") => Self::Json,
            Some("pretty") => Self::Pretty,
            _ => self,
        }
    }
}

/// Export the JSON Schema for `CycleConfig`.
///
/// # Errors
///
/// Returns `serde_json::Error` if schema serialization fails.
///
/// # Panics
///
/// This function never panics.
pub fn export_schema() -> Result<String, serde_json::Error> {
    let schema = schemars::schema_for!(CycleConfig);
    serde_json::to_string_pretty(&schema)
}
