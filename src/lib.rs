//! # content-cycle-orchestrator
//!
//! A recurring, unattended content-production cycle over Tokio.
//!
//! ## Architecture
//!
//! One cycle runs its stages strictly in sequence:
//! ```text
//! GUARD → Analyst → Strategist → Editor → {Write → Refine → Optimize → Embed → Persist}* → Evolution → CycleRun
//! ```
//!
//! The editor is the admission-control gate: briefs whose topic is in
//! cooldown or whose embedding sits too close to recently published content
//! never become assignments. The analyst closes the loop by rescoring actors
//! and proposing behaviour overrides from observed performance.

// ── Lint policy ───────────────────────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![warn(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod actor;
pub mod analyst;
pub mod config;
pub mod editor;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod resilience;
pub mod similarity;
pub mod stages;
pub mod store;
pub mod strategist;

// Re-exports for convenience
pub use actor::{Actor, ActorRoster, BehaviorConfig, EffectiveConfig, Role};
pub use config::LogFormat;
pub use model::{
    Artifact, Assignment, ContentBrief, CycleRun, EvolutionSuggestion, PerformanceMetric,
    SystemSettings, Tier,
};
pub use orchestrator::{CycleOrchestrator, CycleOutcome, CycleState, GuardRejection};
pub use providers::{EmbeddingProvider, LlmProvider, ProviderError, SearchProvider};
pub use store::{ContentStore, MemoryStore, StoreError};

/// Initialise the global tracing subscriber from `LOG_FORMAT` alone.
///
/// Equivalent to [`init_tracing_with`] with a pretty fallback.
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), OrchestratorError> {
    init_tracing_with(LogFormat::Pretty)
}

/// Initialise the global tracing subscriber.
///
/// `configured` is the format from `[observability] log_format`; the
/// `LOG_FORMAT` environment variable overrides it when set to a known value:
/// - `"json"` — structured JSON output for log aggregators
/// - `"pretty"` — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set.
///
/// # Panics
///
/// This function never panics.
pub fn init_tracing_with(configured: LogFormat) -> Result<(), OrchestratorError> {
    let env = std::env::var("LOG_FORMAT").ok();
    let format = configured.overridden_by(env.as_deref());

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Every failure surface in a cycle is mapped to a variant here. Guard
/// rejections (paused, quota reached) are *not* errors and live in
/// [`orchestrator::GuardRejection`].
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// Missing credentials or invalid configuration. Fatal for the cycle.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An LLM, embedding, or search provider call failed after retries.
    #[error("provider error: {0}")]
    Provider(#[from] providers::ProviderError),

    /// Structured output or an artifact failed validation.
    #[error("validation error: {0}")]
    Validation(String),

    /// A store read or write failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] store::StoreError),

    /// Vector comparison failed (dimension mismatch).
    #[error("similarity error: {0}")]
    Similarity(#[from] similarity::SimilarityError),

    /// The admission-control gate could not run.
    #[error("admission error: {0}")]
    Admission(#[from] editor::AdmissionError),

    /// An operation exceeded its time budget.
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// Budget in seconds.
        secs: u64,
    },

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Short, stable label for the error kind, used as a metrics label.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Provider(_) => "provider",
            Self::Validation(_) => "validation",
            Self::Persistence(_) => "persistence",
            Self::Similarity(_) => "similarity",
            Self::Admission(_) => "admission",
            Self::Timeout { .. } => "timeout",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display_includes_message() {
        let err = OrchestratorError::Configuration("OPENAI_API_KEY not set".to_string());
        assert!(err.to_string().contains("OPENAI_API_KEY not set"));
    }

    #[test]
    fn test_timeout_display_names_operation() {
        let err = OrchestratorError::Timeout {
            operation: "assignment".into(),
            secs: 300,
        };
        assert_eq!(err.to_string(), "assignment timed out after 300s");
    }

    #[test]
    fn test_kind_labels_are_stable() {
        assert_eq!(OrchestratorError::Validation("x".into()).kind(), "validation");
        assert_eq!(OrchestratorError::Other("x".into()).kind(), "other");
        assert_eq!(
            OrchestratorError::Provider(providers::ProviderError::Unavailable("k".into())).kind(),
            "provider"
        );
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        let _ = init_tracing();
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
