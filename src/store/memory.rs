//! In-memory [`ContentStore`] used by tests and the demo binary.
//!
//! Clone is cheap (`Arc`-based) and all clones share state. Write failures
//! can be injected to exercise the orchestrator's rollback path.

use super::{slug_candidate, slugify, ContentStore, StoreError};
use crate::actor::{clamp_score, Actor, BehaviorConfig};
use crate::model::{
    Artifact, CycleRun, EvolutionSuggestion, LifecycleStatus, PerformanceMetric,
    PerformanceSample, SuggestionStatus, SystemSettings, TopicRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MAX_SLUG_ATTEMPTS: u32 = 1_000;

#[derive(Debug, Default)]
struct State {
    settings: SystemSettings,
    actors: Vec<Actor>,
    artifacts: Vec<Artifact>,
    metrics: HashMap<String, PerformanceMetric>,
    seeded_samples: Vec<PerformanceSample>,
    seeded_topics: Vec<TopicRecord>,
    suggestions: Vec<EvolutionSuggestion>,
    cycle_runs: Vec<CycleRun>,
}

#[derive(Debug, Default)]
struct Faults {
    embedding_writes: AtomicBool,
    artifact_inserts: AtomicBool,
    reads: AtomicBool,
    embedding_write_delay: Mutex<Option<Duration>>,
}

/// Shared-state in-memory store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    /// Empty store with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: replace settings.
    pub fn with_settings(self, settings: SystemSettings) -> Self {
        self.state.write().settings = settings;
        self
    }

    /// Builder: add actors.
    pub fn with_actors(self, actors: Vec<Actor>) -> Self {
        self.state.write().actors.extend(actors);
        self
    }

    /// Builder: add historical topic records.
    pub fn with_topic_history(self, topics: Vec<TopicRecord>) -> Self {
        self.state.write().seeded_topics.extend(topics);
        self
    }

    /// Builder: add performance samples not backed by stored artifacts.
    pub fn with_samples(self, samples: Vec<PerformanceSample>) -> Self {
        self.state.write().seeded_samples.extend(samples);
        self
    }

    /// Builder: add already-persisted artifacts verbatim (no slug checks).
    pub fn with_artifacts(self, artifacts: Vec<Artifact>) -> Self {
        self.state.write().artifacts.extend(artifacts);
        self
    }

    /// Make `save_embedding` fail.
    pub fn fail_embedding_writes(&self, fail: bool) {
        self.faults.embedding_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `save_embedding` wait `delay` (Tokio time) before writing.
    pub fn delay_embedding_writes(&self, delay: Option<Duration>) {
        *self.faults.embedding_write_delay.lock() = delay;
    }

    /// Make `insert_artifact` fail.
    pub fn fail_artifact_inserts(&self, fail: bool) {
        self.faults.artifact_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail.
    pub fn fail_reads(&self, fail: bool) {
        self.faults.reads.store(fail, Ordering::SeqCst);
    }

    /// Replace settings at runtime (admin action).
    pub fn set_settings(&self, settings: SystemSettings) {
        self.state.write().settings = settings;
    }

    /// Snapshot of stored artifacts in insertion order.
    pub fn artifacts(&self) -> Vec<Artifact> {
        self.state.read().artifacts.clone()
    }

    /// Snapshot of one actor.
    pub fn actor(&self, id: &str) -> Option<Actor> {
        self.state.read().actors.iter().find(|a| a.id == id).cloned()
    }

    /// Snapshot of every suggestion, pending or applied.
    pub fn suggestions(&self) -> Vec<EvolutionSuggestion> {
        self.state.read().suggestions.clone()
    }

    /// Snapshot of recorded cycle runs.
    pub fn cycle_runs(&self) -> Vec<CycleRun> {
        self.state.read().cycle_runs.clone()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.faults.reads.load(Ordering::SeqCst) {
            return Err(StoreError::ReadFailed("injected read failure".into()));
        }
        Ok(())
    }
}

fn topic_of(artifact: &Artifact) -> TopicRecord {
    TopicRecord {
        topic: artifact.topic.clone(),
        tier: artifact.tier,
        carriers: artifact.carriers.clone(),
        produced_at: artifact.created_at,
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn load_settings(&self) -> Result<SystemSettings, StoreError> {
        self.check_reads()?;
        Ok(self.state.read().settings.clone())
    }

    async fn list_actors(&self) -> Result<Vec<Actor>, StoreError> {
        self.check_reads()?;
        Ok(self.state.read().actors.clone())
    }

    async fn update_actor_score(&self, actor_id: &str, score: f64) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let actor = state
            .actors
            .iter_mut()
            .find(|a| a.id == actor_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "actor",
                id: actor_id.to_string(),
            })?;
        actor.performance_score = clamp_score(score);
        Ok(())
    }

    async fn update_actor_overrides(
        &self,
        actor_id: &str,
        overrides: BehaviorConfig,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let actor = state
            .actors
            .iter_mut()
            .find(|a| a.id == actor_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "actor",
                id: actor_id.to_string(),
            })?;
        actor.overrides = overrides;
        Ok(())
    }

    async fn performance_samples(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerformanceSample>, StoreError> {
        self.check_reads()?;
        let state = self.state.read();
        let mut samples: Vec<PerformanceSample> = state
            .seeded_samples
            .iter()
            .filter(|s| s.published_at >= since)
            .cloned()
            .collect();
        for artifact in &state.artifacts {
            if artifact.created_at < since {
                continue;
            }
            if let Some(metric) = state.metrics.get(&artifact.id) {
                samples.push(PerformanceSample {
                    artifact_id: artifact.id.clone(),
                    actor_id: artifact.actor_id.clone(),
                    tier: artifact.tier,
                    format: artifact.format.clone(),
                    hook: artifact.hook.clone(),
                    carriers: artifact.carriers.clone(),
                    published_at: artifact.created_at,
                    metric: *metric,
                });
            }
        }
        Ok(samples)
    }

    async fn record_metric(
        &self,
        artifact_id: &str,
        metric: PerformanceMetric,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let artifact = state
            .artifacts
            .iter_mut()
            .find(|a| a.id == artifact_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "artifact",
                id: artifact_id.to_string(),
            })?;
        artifact.lifecycle_status = LifecycleStatus::Published;
        state.metrics.insert(artifact_id.to_string(), metric);
        Ok(())
    }

    async fn topic_history(&self) -> Result<Vec<TopicRecord>, StoreError> {
        self.check_reads()?;
        let state = self.state.read();
        let mut topics = state.seeded_topics.clone();
        topics.extend(state.artifacts.iter().map(topic_of));
        Ok(topics)
    }

    async fn count_produced_since(&self, since: DateTime<Utc>) -> Result<u32, StoreError> {
        self.check_reads()?;
        let count = self
            .state
            .read()
            .artifacts
            .iter()
            .filter(|a| a.created_at >= since)
            .count();
        Ok(count as u32)
    }

    async fn recent_embeddings(&self, limit: usize) -> Result<Vec<Vec<f32>>, StoreError> {
        self.check_reads()?;
        let state = self.state.read();
        let mut with_vectors: Vec<&Artifact> = state
            .artifacts
            .iter()
            .filter(|a| a.embedding_vector.is_some())
            .collect();
        with_vectors.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(with_vectors
            .into_iter()
            .take(limit)
            .filter_map(|a| a.embedding_vector.clone())
            .collect())
    }

    async fn insert_artifact(&self, mut artifact: Artifact) -> Result<Artifact, StoreError> {
        if self.faults.artifact_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected insert failure".into()));
        }
        let mut state = self.state.write();
        let base = if artifact.slug.trim().is_empty() {
            slugify(&artifact.title)
        } else {
            artifact.slug.clone()
        };
        let slug = (1..=MAX_SLUG_ATTEMPTS)
            .map(|n| slug_candidate(&base, n))
            .find(|candidate| !state.artifacts.iter().any(|a| &a.slug == candidate))
            .ok_or_else(|| StoreError::SlugExhausted(base.clone()))?;
        if slug != base {
            debug!(base = %base, slug = %slug, "slug conflict resolved with suffix");
        }
        artifact.slug = slug;
        state.artifacts.push(artifact.clone());
        Ok(artifact)
    }

    async fn save_embedding(&self, artifact_id: &str, vector: Vec<f32>) -> Result<(), StoreError> {
        let delay = *self.faults.embedding_write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.faults.embedding_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected embedding write failure".into()));
        }
        let mut state = self.state.write();
        let artifact = state
            .artifacts
            .iter_mut()
            .find(|a| a.id == artifact_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "artifact",
                id: artifact_id.to_string(),
            })?;
        artifact.embedding_vector = Some(vector);
        Ok(())
    }

    async fn delete_artifact(&self, artifact_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let before = state.artifacts.len();
        state.artifacts.retain(|a| a.id != artifact_id);
        if state.artifacts.len() == before {
            return Err(StoreError::NotFound {
                kind: "artifact",
                id: artifact_id.to_string(),
            });
        }
        state.metrics.remove(artifact_id);
        Ok(())
    }

    async fn record_suggestions(
        &self,
        suggestions: &[EvolutionSuggestion],
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .suggestions
            .extend(suggestions.iter().cloned());
        Ok(())
    }

    async fn mark_suggestions_applied(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.write();
        for suggestion in state.suggestions.iter_mut() {
            if ids.contains(&suggestion.id) {
                suggestion.status = SuggestionStatus::Applied;
            }
        }
        Ok(())
    }

    async fn pending_suggestions(&self) -> Result<Vec<EvolutionSuggestion>, StoreError> {
        self.check_reads()?;
        Ok(self
            .state
            .read()
            .suggestions
            .iter()
            .filter(|s| s.status == SuggestionStatus::Pending)
            .cloned()
            .collect())
    }

    async fn record_cycle_run(&self, run: &CycleRun) -> Result<(), StoreError> {
        self.state.write().cycle_runs.push(run.clone());
        Ok(())
    }
}
