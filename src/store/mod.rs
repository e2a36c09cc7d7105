//! # Content Store contract
//!
//! ## Responsibility
//! The persistence seam for actors, artifacts, metrics, topic memory,
//! evolution suggestions, system settings and cycle audit records.
//!
//! ## Guarantees (every implementation)
//! - `insert_artifact` never collides on slug: conflicts retry with `-2`, `-3`, …
//! - `update_actor_score` clamps to `[0, 1]`
//! - `recent_embeddings` returns newest first, at most `limit` vectors
//!
//! ## NOT Responsible For
//! - Cross-call transactions; the orchestrator compensates dual-write
//!   failures itself via `delete_artifact`

pub mod memory;

pub use memory::MemoryStore;

use crate::actor::{Actor, BehaviorConfig};
use crate::model::{
    Artifact, CycleRun, EvolutionSuggestion, PerformanceMetric, PerformanceSample, SystemSettings,
    TopicRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by a content store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Record kind ("actor", "artifact", …).
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// Slug suffixes ran out before a free slug was found.
    #[error("no free slug for '{0}'")]
    SlugExhausted(String),

    /// The backend rejected a write.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The backend could not be read.
    #[error("read failed: {0}")]
    ReadFailed(String),
}

/// Persistence operations the cycle needs.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// The system settings aggregate.
    async fn load_settings(&self) -> Result<SystemSettings, StoreError>;

    /// Every actor, active or not.
    async fn list_actors(&self) -> Result<Vec<Actor>, StoreError>;

    /// Persist a new score (clamped).
    async fn update_actor_score(&self, actor_id: &str, score: f64) -> Result<(), StoreError>;

    /// Replace an actor's overrides.
    async fn update_actor_overrides(
        &self,
        actor_id: &str,
        overrides: BehaviorConfig,
    ) -> Result<(), StoreError>;

    /// Metrics joined with artifact attributes, published at or after `since`.
    async fn performance_samples(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceSample>, StoreError>;

    /// Record / replace the metric of a published artifact (analytics sync).
    async fn record_metric(
        &self,
        artifact_id: &str,
        metric: PerformanceMetric,
    ) -> Result<(), StoreError>;

    /// Every topic ever produced.
    async fn topic_history(&self) -> Result<Vec<TopicRecord>, StoreError>;

    /// Artifacts produced at or after `since`.
    async fn count_produced_since(&self, since: DateTime<Utc>) -> Result<u32, StoreError>;

    /// Embeddings of the most recent artifacts, newest first.
    async fn recent_embeddings(&self, limit: usize) -> Result<Vec<Vec<f32>>, StoreError>;

    /// Insert an artifact, de-duplicating its slug. Returns the stored record.
    async fn insert_artifact(&self, artifact: Artifact) -> Result<Artifact, StoreError>;

    /// Attach an embedding to a stored artifact.
    async fn save_embedding(&self, artifact_id: &str, vector: Vec<f32>) -> Result<(), StoreError>;

    /// Remove an artifact (compensating rollback).
    async fn delete_artifact(&self, artifact_id: &str) -> Result<(), StoreError>;

    /// Queue suggestions as pending.
    async fn record_suggestions(
        &self,
        suggestions: &[EvolutionSuggestion],
    ) -> Result<(), StoreError>;

    /// Mark suggestions applied.
    async fn mark_suggestions_applied(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Suggestions still pending.
    async fn pending_suggestions(&self) -> Result<Vec<EvolutionSuggestion>, StoreError>;

    /// Append the audit record of a finished cycle.
    async fn record_cycle_run(&self, run: &CycleRun) -> Result<(), StoreError>;
}

/// Lowercase, ASCII, hyphen-separated slug.
///
/// Empty input yields `"article"`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.len() > 80 {
        slug.truncate(80);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        "article".to_string()
    } else {
        slug
    }
}

/// Candidate slug for the `n`th attempt: `base`, `base-2`, `base-3`, …
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{base}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Best Term Life: 2025 Guide!"), "best-term-life-2025-guide");
    }

    #[test]
    fn test_slugify_collapses_and_trims_separators() {
        assert_eq!(slugify("  --Hello   World--  "), "hello-world");
    }

    #[test]
    fn test_slugify_empty_falls_back() {
        assert_eq!(slugify("¿¡!"), "article");
    }

    #[test]
    fn test_slugify_caps_length_without_trailing_dash() {
        let slug = slugify(&"word ".repeat(40));
        assert!(slug.len() <= 80);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_slug_candidate_sequence() {
        let seq: Vec<String> = (1..=3).map(|n| slug_candidate("a", n)).collect();
        assert_eq!(seq, vec!["a", "a-2", "a-3"]);
    }
}
