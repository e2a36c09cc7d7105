//! # Stage: Cycle Orchestrator
//!
//! ## Responsibility
//! Drive one content cycle through its states and turn whatever happened
//! into a well-formed [`CycleRun`] audit record.
//!
//! ```text
//! INIT → GUARD → ANALYST → STRATEGIST → EDITOR
//!      → [WRITE → REFINE → OPTIMIZE → EMBED → PERSIST]*
//!      → EVOLUTION_APPLY → DONE
//! ```
//! `ERROR` is reachable from any state before the assignment loop.
//!
//! ## Guarantees
//! - `run_cycle` never panics and always returns a `CycleRun`
//! - Guard exits (paused, weekly quota met) produce zero output and no errors
//! - Each assignment runs in its own failure boundary; generation and
//!   embedding are bounded by `cycle.assignment_timeout_s`, and one failure
//!   never stops the loop
//! - PERSIST writes the artifact row, then its embedding; a failed embedding
//!   write deletes the row again
//! - Every state runs inside a `cycle.state` span carrying `cycle_id`,
//!   `state`, `duration_ms` and `outcome`
//!
//! ## NOT Responsible For
//! - Serialising triggers: concurrent `run_cycle` calls are not guarded and
//!   the caller must not overlap them
//! - Scheduling (cron wiring lives outside this crate)

use crate::actor::{merge, ActorRoster, BehaviorConfig, Role};
use crate::analyst::PerformanceAnalyst;
use crate::config::{validation, CycleConfig};
use crate::editor::{AdmissionEditor, AdmissionInput, RejectionReason};
use crate::metrics;
use crate::model::{Artifact, Assignment, CycleRun, EvolutionSuggestion};
use crate::providers::{EmbeddingProvider, LlmProvider, SearchProvider};
use crate::similarity::SimilarityEngine;
use crate::stages::StagePipeline;
use crate::store::{ContentStore, StoreError};
use crate::strategist::BriefStrategist;
use crate::OrchestratorError;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

/// States of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleState {
    /// Not started.
    Init,
    /// Paused / quota check.
    Guard,
    /// Scoring and suggestions.
    Analyst,
    /// Brief generation.
    Strategist,
    /// Admission control.
    Editor,
    /// Drafting.
    Write,
    /// Rewriting.
    Refine,
    /// CTA and FAQ attachment.
    Optimize,
    /// Artifact embedding.
    Embed,
    /// Dual write to the store.
    Persist,
    /// Durable override persistence.
    EvolutionApply,
    /// Finished normally.
    Done,
    /// Aborted by a cycle-level error.
    Error,
}

impl CycleState {
    /// Lowercase label used in spans and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Guard => "guard",
            Self::Analyst => "analyst",
            Self::Strategist => "strategist",
            Self::Editor => "editor",
            Self::Write => "write",
            Self::Refine => "refine",
            Self::Optimize => "optimize",
            Self::Embed => "embed",
            Self::Persist => "persist",
            Self::EvolutionApply => "evolution_apply",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cycle stopped at the guard. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardRejection {
    /// The system is paused.
    Paused,
    /// The rolling 7-day quota is already met.
    QuotaReached,
}

impl GuardRejection {
    /// Label used in logs and as the cycle-outcome metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::QuotaReached => "quota_reached",
        }
    }
}

/// One assignment that did not produce an artifact.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("assignment {assignment_id} ('{topic}') failed at {stage}: {message}")]
pub struct AssignmentFailure {
    /// Failed assignment.
    pub assignment_id: String,
    /// Brief topic, for readable error lists.
    pub topic: String,
    /// Where it failed (`write`, `refine`, `optimize`, `embed`, `persist`,
    /// or `assignment` for a timeout).
    pub stage: &'static str,
    /// Error kind label (see [`OrchestratorError::kind`]).
    pub kind: &'static str,
    /// Rendered error.
    pub message: String,
}

impl AssignmentFailure {
    fn new(assignment: &Assignment, stage: &'static str, error: &OrchestratorError) -> Self {
        Self {
            assignment_id: assignment.id.clone(),
            topic: assignment.brief.primary_topic.clone(),
            stage,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Everything one execution produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    /// The audit record, as stored.
    pub run: CycleRun,
    /// `Done` or `Error`.
    pub final_state: CycleState,
    /// Set when the guard stopped the cycle.
    pub guard: Option<GuardRejection>,
    /// Suggestions the analyst produced this cycle.
    pub suggestions: Vec<EvolutionSuggestion>,
}

/// Mutable bookkeeping while a cycle runs.
struct Progress {
    run: CycleRun,
    state: CycleState,
    suggestions: Vec<EvolutionSuggestion>,
}

/// Run `fut` as one state inside a `cycle.state` span.
async fn step<T, F>(cycle_id: &str, state: CycleState, fut: F) -> Result<T, OrchestratorError>
where
    F: Future<Output = Result<T, OrchestratorError>>,
{
    let span = tracing::info_span!(
        "cycle.state",
        cycle_id = %cycle_id,
        state = state.as_str(),
        duration_ms = tracing::field::Empty,
        outcome = tracing::field::Empty,
        error_kind = tracing::field::Empty,
    );
    let start = Instant::now();
    let result = fut.instrument(span.clone()).await;
    let elapsed = start.elapsed();
    metrics::record_state_latency(state.as_str(), elapsed);

    span.record("duration_ms", elapsed.as_millis() as u64);
    match &result {
        Ok(_) => {
            span.record("outcome", "ok");
        }
        Err(e) => {
            span.record("outcome", "err");
            span.record("error_kind", e.kind());
        }
    }
    result
}

/// The cycle driver.
///
/// Construct once with the providers and store injected, then call
/// [`CycleOrchestrator::run_cycle`] per trigger.
pub struct CycleOrchestrator {
    config: CycleConfig,
    store: Arc<dyn ContentStore>,
    analyst: PerformanceAnalyst,
    strategist: BriefStrategist,
    editor: AdmissionEditor,
    pipeline: StagePipeline,
    similarity: SimilarityEngine,
}

impl CycleOrchestrator {
    /// Wire an orchestrator.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Configuration`] listing every rule `config`
    /// breaks.
    pub fn new(
        config: CycleConfig,
        store: Arc<dyn ContentStore>,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, OrchestratorError> {
        if let Err(errors) = validation::validate(&config) {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(OrchestratorError::Configuration(joined));
        }

        let similarity = SimilarityEngine::new(
            embedder,
            config.embedding.dimensions,
            config.embedding.max_input_chars,
        );
        Ok(Self {
            analyst: PerformanceAnalyst::new(config.analyst.clone()),
            strategist: BriefStrategist::new(&config, Arc::clone(&llm)),
            editor: AdmissionEditor::new(
                config.admission.clone(),
                config.cycle.per_cycle_cap,
                similarity.clone(),
            ),
            pipeline: StagePipeline::standard(llm),
            similarity,
            store,
            config,
        })
    }

    /// Builder: feed research results to the strategist.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.strategist = self.strategist.with_search(search);
        self
    }

    /// Builder: replace the transform stages.
    pub fn with_pipeline(mut self, pipeline: StagePipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Run one cycle now.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub async fn run_cycle(&self) -> CycleRun {
        self.execute_at(Utc::now()).await.run
    }

    /// Run one cycle as of `now`.
    ///
    /// `now` drives every window (weekly quota, cooldown, scoring) and the
    /// recorded timestamps, so tests can replay cycles at chosen times.
    pub async fn execute_at(&self, now: DateTime<Utc>) -> CycleOutcome {
        let cycle_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "cycle",
            cycle_id = %cycle_id,
            name = %self.config.cycle.name,
        );
        self.execute_inner(cycle_id, now).instrument(span).await
    }

    async fn execute_inner(&self, cycle_id: String, now: DateTime<Utc>) -> CycleOutcome {
        let started = Instant::now();
        let mut progress = Progress {
            run: CycleRun {
                id: cycle_id,
                started_at: now,
                completed_at: now,
                briefs_generated: 0,
                assignments_made: 0,
                artifacts_produced: 0,
                rejected_for_cooldown: 0,
                rejected_for_similarity: 0,
                errors: Vec::new(),
            },
            state: CycleState::Init,
            suggestions: Vec::new(),
        };

        let (final_state, guard) = match self.drive(&mut progress, now).await {
            Ok(guard) => (CycleState::Done, guard),
            Err(e) => {
                error!(state = %progress.state, error = %e, "cycle aborted");
                progress.run.errors.push(format!("{}: {e}", progress.state));
                (CycleState::Error, None)
            }
        };

        let elapsed = Duration::from_std(started.elapsed()).unwrap_or_else(|_| Duration::zero());
        progress.run.completed_at = now + elapsed;

        if let Err(e) = self.store.record_cycle_run(&progress.run).await {
            warn!(error = %e, "cycle run could not be recorded");
            progress.run.errors.push(format!("audit: {e}"));
        }

        let outcome_label = match (final_state, guard) {
            (CycleState::Error, _) => "failed",
            (_, Some(g)) => g.as_str(),
            _ => "completed",
        };
        metrics::inc_cycle(outcome_label);
        info!(
            outcome = outcome_label,
            briefs = progress.run.briefs_generated,
            assignments = progress.run.assignments_made,
            artifacts = progress.run.artifacts_produced,
            rejected_cooldown = progress.run.rejected_for_cooldown,
            rejected_similarity = progress.run.rejected_for_similarity,
            errors = progress.run.errors.len(),
            "cycle finished"
        );

        CycleOutcome {
            run: progress.run,
            final_state,
            guard,
            suggestions: progress.suggestions,
        }
    }

    /// The state sequence. `Ok(Some(_))` is a guard exit; `Err` aborts the
    /// cycle with `progress.state` naming where.
    async fn drive(
        &self,
        progress: &mut Progress,
        now: DateTime<Utc>,
    ) -> Result<Option<GuardRejection>, OrchestratorError> {
        let cycle_id = progress.run.id.clone();
        let store = &self.store;

        // ── GUARD ───────────────────────────────────────────────────────
        progress.state = CycleState::Guard;
        let (settings, weekly_count) = step(&cycle_id, CycleState::Guard, async {
            let settings = store.load_settings().await?;
            let weekly = store.count_produced_since(now - Duration::days(7)).await?;
            Ok::<_, OrchestratorError>((settings, weekly))
        })
        .await?;
        if settings.paused {
            info!("system paused; cycle skipped");
            return Ok(Some(GuardRejection::Paused));
        }
        if weekly_count >= settings.max_per_week {
            info!(weekly_count, max_per_week = settings.max_per_week, "weekly quota reached; cycle skipped");
            return Ok(Some(GuardRejection::QuotaReached));
        }

        // ── ANALYST ─────────────────────────────────────────────────────
        progress.state = CycleState::Analyst;
        let lookback = self
            .config
            .analyst
            .scoring_window_days
            .max(self.config.analyst.trend_older_days);
        let (mut actors, samples) = step(&cycle_id, CycleState::Analyst, async {
            let actors = store.list_actors().await?;
            let samples = store
                .performance_samples(now - Duration::days(i64::from(lookback)))
                .await?;
            Ok::<_, OrchestratorError>((actors, samples))
        })
        .await?;
        let report = self
            .analyst
            .analyze(&samples, &ActorRoster::from_actors(actors.clone()), now);

        for score in &report.scores {
            match store.update_actor_score(&score.actor_id, score.score).await {
                Ok(()) => {
                    if let Some(actor) = actors.iter_mut().find(|a| a.id == score.actor_id) {
                        actor.set_score(score.score);
                    }
                }
                Err(e) => {
                    warn!(actor_id = %score.actor_id, error = %e, "score not persisted");
                    progress.run.errors.push(format!("analyst: {e}"));
                }
            }
        }
        // An actor with a suggestion still pending gets no new one until it
        // has been reviewed or applied.
        let pending = match store.pending_suggestions().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "pending suggestions not read");
                progress.run.errors.push(format!("analyst: {e}"));
                Vec::new()
            }
        };
        progress.suggestions = report
            .suggestions
            .iter()
            .filter(|s| {
                let queued = pending.iter().any(|p| p.actor_id == s.actor_id);
                if queued {
                    debug!(actor_id = %s.actor_id, "suggestion already pending; skipped");
                }
                !queued
            })
            .cloned()
            .collect();
        if !progress.suggestions.is_empty() {
            if let Err(e) = store.record_suggestions(&progress.suggestions).await {
                warn!(error = %e, "suggestions not recorded");
                progress.run.errors.push(format!("analyst: {e}"));
            }
        }

        let mut roster = ActorRoster::from_actors(actors);
        if settings.auto_evolution {
            for suggestion in &progress.suggestions {
                if roster.apply_overrides(&suggestion.actor_id, &suggestion.proposed_overrides) {
                    debug!(actor_id = %suggestion.actor_id, "suggestion pre-applied for this cycle");
                }
            }
        }

        // ── STRATEGIST ──────────────────────────────────────────────────
        progress.state = CycleState::Strategist;
        let strategist_cfg = roster.effective_for_role(Role::Strategist);
        let (history, briefs) = step(&cycle_id, CycleState::Strategist, async {
            let history = store.topic_history().await?;
            let briefs = self
                .strategist
                .generate(&report, &history, &strategist_cfg)
                .await?;
            Ok::<_, OrchestratorError>((history, briefs))
        })
        .await?;
        progress.run.briefs_generated = briefs.len() as u32;

        // ── EDITOR ──────────────────────────────────────────────────────
        progress.state = CycleState::Editor;
        let decision = step(&cycle_id, CycleState::Editor, async {
            let window = store
                .recent_embeddings(self.config.admission.embedding_window)
                .await?;
            let decision = self
                .editor
                .admit(AdmissionInput {
                    briefs: &briefs,
                    weekly_count,
                    max_per_week: settings.max_per_week,
                    writers: roster.writers(),
                    history: &history,
                    window: &window,
                    now,
                })
                .await?;
            Ok::<_, OrchestratorError>(decision)
        })
        .await?;
        progress.run.assignments_made = decision.assignments.len() as u32;
        progress.run.rejected_for_cooldown = decision.rejected_for(RejectionReason::Cooldown);
        progress.run.rejected_for_similarity = decision.rejected_for(RejectionReason::Similarity);

        if decision.assignments.is_empty() {
            info!("no assignments made");
            progress.state = CycleState::Done;
            return Ok(None);
        }

        // ── ASSIGNMENTS ─────────────────────────────────────────────────
        for assignment in &decision.assignments {
            match self.produce_bounded(&cycle_id, assignment, &roster, now).await {
                Ok(artifact) => {
                    progress.run.artifacts_produced += 1;
                    metrics::inc_artifact_produced(artifact.tier.as_str());
                    info!(
                        assignment_id = %assignment.id,
                        artifact_id = %artifact.id,
                        slug = %artifact.slug,
                        words = artifact.word_count,
                        "artifact persisted"
                    );
                }
                Err(failure) => {
                    metrics::inc_assignment_failure(failure.kind);
                    warn!(
                        assignment_id = %failure.assignment_id,
                        stage = failure.stage,
                        kind = failure.kind,
                        "assignment failed"
                    );
                    progress.run.errors.push(failure.to_string());
                }
            }
        }

        // ── EVOLUTION_APPLY ─────────────────────────────────────────────
        if settings.auto_evolution && !progress.suggestions.is_empty() {
            progress.state = CycleState::EvolutionApply;
            let suggestions = &progress.suggestions;
            let used = roster.used_actor_ids();
            let failures = step(&cycle_id, CycleState::EvolutionApply, async {
                self.apply_evolution(suggestions, &used).await
            })
            .await?;
            progress.run.errors.extend(failures);
        }

        progress.state = CycleState::Done;
        Ok(None)
    }

    /// One assignment: generation and embedding under the configured
    /// timeout, then the dual write.
    ///
    /// PERSIST runs outside the timeout so an expiring deadline can never
    /// drop the write between the artifact row and its embedding.
    async fn produce_bounded(
        &self,
        cycle_id: &str,
        assignment: &Assignment,
        roster: &ActorRoster,
        now: DateTime<Utc>,
    ) -> Result<Artifact, AssignmentFailure> {
        let limit = self.config.cycle.assignment_timeout();
        let span = tracing::info_span!(
            "cycle.assignment",
            cycle_id = %cycle_id,
            assignment_id = %assignment.id,
            actor_id = %assignment.actor_id,
            tier = assignment.brief.tier.as_str(),
        );
        let (artifact, vector) =
            match tokio::time::timeout(limit, self.prepare(cycle_id, assignment, roster, now))
                .instrument(span.clone())
                .await
            {
                Ok(prepared) => prepared?,
                Err(_) => {
                    return Err(AssignmentFailure::new(
                        assignment,
                        "assignment",
                        &OrchestratorError::Timeout {
                            operation: "assignment".to_string(),
                            secs: limit.as_secs(),
                        },
                    ))
                }
            };

        step(cycle_id, CycleState::Persist, self.persist(artifact, vector))
            .instrument(span)
            .await
            .map_err(|e| AssignmentFailure::new(assignment, CycleState::Persist.as_str(), &e))
    }

    /// Stage pipeline, then the artifact embedding.
    async fn prepare(
        &self,
        cycle_id: &str,
        assignment: &Assignment,
        roster: &ActorRoster,
        now: DateTime<Utc>,
    ) -> Result<(Artifact, Vec<f32>), AssignmentFailure> {
        let artifact = self
            .pipeline
            .run(assignment, roster, now)
            .await
            .map_err(|f| AssignmentFailure::new(assignment, f.stage, &f.error))?;

        let text = format!("{} {}", artifact.title, artifact.summary);
        let vector = step(cycle_id, CycleState::Embed, self.similarity.embed(&text))
            .await
            .map_err(|e| AssignmentFailure::new(assignment, CycleState::Embed.as_str(), &e))?;
        Ok((artifact, vector))
    }

    /// Dual write with compensating delete.
    async fn persist(&self, mut artifact: Artifact, vector: Vec<f32>) -> Result<Artifact, OrchestratorError> {
        artifact.embedding_vector = None;
        let stored = self.store.insert_artifact(artifact).await?;

        if let Err(write_err) = self.store.save_embedding(&stored.id, vector.clone()).await {
            warn!(artifact_id = %stored.id, error = %write_err, "embedding write failed; rolling back artifact");
            if let Err(rollback_err) = self.store.delete_artifact(&stored.id).await {
                error!(artifact_id = %stored.id, error = %rollback_err, "rollback failed; orphan artifact row");
                return Err(OrchestratorError::Persistence(StoreError::WriteFailed(format!(
                    "{write_err}; rollback failed: {rollback_err}"
                ))));
            }
            return Err(write_err.into());
        }

        Ok(Artifact {
            embedding_vector: Some(vector),
            ..stored
        })
    }

    /// Merge suggestions into stored overrides and mark them applied.
    ///
    /// Only actors in `used` (the ones this cycle ran with) are touched; any
    /// other suggestion stays pending. Returns one message per actor whose
    /// overrides could not be written; their suggestions stay pending too.
    async fn apply_evolution(
        &self,
        suggestions: &[EvolutionSuggestion],
        used: &[String],
    ) -> Result<Vec<String>, OrchestratorError> {
        let stored = self.store.list_actors().await?;

        let mut by_actor: BTreeMap<&str, (BehaviorConfig, Vec<String>)> = BTreeMap::new();
        for suggestion in suggestions {
            if !used.iter().any(|id| id == &suggestion.actor_id) {
                debug!(actor_id = %suggestion.actor_id, "actor not used this cycle; suggestion left pending");
                continue;
            }
            let entry = by_actor
                .entry(suggestion.actor_id.as_str())
                .or_insert_with(|| {
                    let current = stored
                        .iter()
                        .find(|a| a.id == suggestion.actor_id)
                        .map(|a| a.overrides.clone())
                        .unwrap_or_default();
                    (current, Vec::new())
                });
            entry.0 = merge(&entry.0, &suggestion.proposed_overrides);
            entry.1.push(suggestion.id.clone());
        }

        let mut applied = Vec::new();
        let mut failures = Vec::new();
        for (actor_id, (overrides, ids)) in by_actor {
            match self.store.update_actor_overrides(actor_id, overrides).await {
                Ok(()) => {
                    info!(actor_id, suggestions = ids.len(), "overrides persisted");
                    applied.extend(ids);
                }
                Err(e) => {
                    warn!(actor_id, error = %e, "overrides not persisted");
                    failures.push(format!("evolution_apply: {e}"));
                }
            }
        }
        if !applied.is_empty() {
            self.store.mark_suggestions_applied(&applied).await?;
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::Actor;
    use crate::model::{SystemSettings, SuggestionStatus};
    use crate::providers::mock::MockLlm;
    use crate::similarity::HashEmbedder;
    use crate::store::MemoryStore;

    fn config() -> CycleConfig {
        let mut config = CycleConfig::default();
        config.embedding.dimensions = 64;
        config.providers.retry_attempts = 1;
        config
    }

    fn store() -> MemoryStore {
        MemoryStore::new().with_actors(vec![
            Actor::new("writer-a", Role::Writer).with_score(0.8),
            Actor::new("writer-b", Role::Writer).with_score(0.6),
            Actor::new("strategist", Role::Strategist),
            Actor::new("refiner", Role::Refiner),
            Actor::new("optimizer", Role::Optimizer),
        ])
    }

    fn orchestrator(store: &MemoryStore, llm: Arc<MockLlm>) -> CycleOrchestrator {
        CycleOrchestrator::new(
            config(),
            Arc::new(store.clone()),
            llm,
            Arc::new(HashEmbedder::new(64)),
        )
        .expect("test: valid config")
    }

    #[test]
    fn test_invalid_config_is_rejected_with_every_problem() {
        let mut bad = config();
        bad.cycle.batch_size = 0;
        bad.providers.chat_model.clear();
        let err = CycleOrchestrator::new(
            bad,
            Arc::new(MemoryStore::new()),
            Arc::new(MockLlm::new()),
            Arc::new(HashEmbedder::new(64)),
        )
        .err()
        .expect("test: invalid config must fail");
        let msg = err.to_string();
        assert!(msg.contains("batch_size"), "{msg}");
        assert!(msg.contains("chat_model"), "{msg}");
    }

    #[tokio::test]
    async fn test_paused_cycle_exits_at_guard() {
        let store = store().with_settings(SystemSettings {
            paused: true,
            ..SystemSettings::default()
        });
        let llm = Arc::new(MockLlm::content_defaults());
        let outcome = orchestrator(&store, llm.clone()).execute_at(Utc::now()).await;

        assert_eq!(outcome.guard, Some(GuardRejection::Paused));
        assert_eq!(outcome.final_state, CycleState::Done);
        assert!(outcome.run.errors.is_empty());
        assert_eq!(llm.total_calls(), 0);
        assert_eq!(store.cycle_runs().len(), 1);
    }

    #[tokio::test]
    async fn test_strategist_failure_aborts_with_error_state() {
        let store = store();
        let llm = Arc::new(MockLlm::new().on_structured("BriefBatch", serde_json::json!({"briefs": []})));
        let outcome = orchestrator(&store, llm).execute_at(Utc::now()).await;

        assert_eq!(outcome.final_state, CycleState::Error);
        assert_eq!(outcome.run.briefs_generated, 0);
        assert_eq!(outcome.run.errors.len(), 1);
        assert!(outcome.run.errors[0].starts_with("strategist:"), "{:?}", outcome.run.errors);
        assert_eq!(store.cycle_runs().len(), 1, "failed cycles are audited too");
    }

    #[tokio::test]
    async fn test_no_active_writer_is_cycle_error() {
        let store = MemoryStore::new().with_actors(vec![Actor::new("strategist", Role::Strategist)]);
        let outcome = orchestrator(&store, Arc::new(MockLlm::content_defaults()))
            .execute_at(Utc::now())
            .await;
        assert_eq!(outcome.final_state, CycleState::Error);
        assert!(outcome.run.errors[0].contains("no active writer"));
    }

    #[tokio::test]
    async fn test_store_read_failure_aborts_at_guard() {
        let store = store();
        store.fail_reads(true);
        let outcome = orchestrator(&store, Arc::new(MockLlm::content_defaults()))
            .execute_at(Utc::now())
            .await;
        assert_eq!(outcome.final_state, CycleState::Error);
        assert!(outcome.run.errors[0].starts_with("guard:"));
    }

    #[tokio::test]
    async fn test_pending_suggestions_stay_pending_without_auto_evolution() {
        use crate::model::{PerformanceMetric, PerformanceSample, Tier};
        let now = Utc::now();
        let sample = PerformanceSample {
            artifact_id: "old-1".into(),
            actor_id: "writer-a".into(),
            tier: Tier::Money,
            format: "comparison".into(),
            hook: "benefit".into(),
            carriers: vec![],
            published_at: now - Duration::days(3),
            metric: PerformanceMetric {
                views: 1_000,
                click_through_rate: 0.001,
                avg_engagement_time: 90.0,
                bounce_rate: 0.2,
                conversion_count: 0,
            },
        };
        let store = store().with_samples(vec![sample]);
        let outcome = orchestrator(&store, Arc::new(MockLlm::content_defaults()))
            .execute_at(now)
            .await;

        assert!(!outcome.suggestions.is_empty());
        assert!(store
            .suggestions()
            .iter()
            .all(|s| s.status == SuggestionStatus::Pending));
        assert!(store
            .actor("writer-a")
            .map(|a| a.overrides.is_empty())
            .unwrap_or(false));
    }

    #[tokio::test]
    async fn test_evolution_apply_leaves_actors_outside_the_cycle_pending() {
        let store = store();
        let suggestion = |id: &str, actor_id: &str| EvolutionSuggestion {
            id: id.into(),
            actor_id: actor_id.into(),
            proposed_overrides: BehaviorConfig {
                assertiveness: Some(0.7),
                ..BehaviorConfig::default()
            },
            reasoning: "CTR below target".into(),
            status: SuggestionStatus::Pending,
        };
        let suggestions = vec![suggestion("s1", "writer-a"), suggestion("s2", "writer-b")];
        store
            .record_suggestions(&suggestions)
            .await
            .expect("test: record");

        let failures = orchestrator(&store, Arc::new(MockLlm::content_defaults()))
            .apply_evolution(&suggestions, &["writer-a".to_string()])
            .await
            .expect("test: apply");

        assert!(failures.is_empty());
        assert_eq!(store.actor("writer-a").and_then(|a| a.overrides.assertiveness), Some(0.7));
        assert!(store.actor("writer-b").and_then(|a| a.overrides.assertiveness).is_none());
        let statuses: Vec<(String, SuggestionStatus)> =
            store.suggestions().into_iter().map(|s| (s.id, s.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("s1".to_string(), SuggestionStatus::Applied),
                ("s2".to_string(), SuggestionStatus::Pending),
            ]
        );
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(CycleState::EvolutionApply.to_string(), "evolution_apply");
        assert_eq!(GuardRejection::QuotaReached.as_str(), "quota_reached");
    }
}
