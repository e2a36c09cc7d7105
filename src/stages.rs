//! Content transform stages with structured tracing.
//!
//! Each stage takes a typed [`Artifact`] and returns a transformed one:
//! 1. Builds its prompt from the artifact and the acting actor's effective config
//! 2. Requests structured output decoded into a typed response
//! 3. Applies the response and re-derives slug and word count
//! 4. Rejects an artifact left with an empty title or body
//!
//! ## Span Fields (every stage)
//!
//! | Field | Description |
//! |-------|-------------|
//! | `assignment_id` | Assignment being produced |
//! | `actor_id` | Writer that owns the assignment |
//! | `stage` | Stage name string |
//! | `duration_ms` | Recorded after processing completes |
//! | `outcome` | `"ok"` or `"err"` |
//! | `error_kind` | Recorded only on error |
//!
//! ## Sensitive Fields — NEVER Logged
//!
//! - Article bodies and summaries
//! - Prompts

use crate::actor::{ActorRoster, EffectiveConfig, Role};
use crate::metrics;
use crate::model::{Artifact, Assignment, CtaBlock, FaqItem, LifecycleStatus};
use crate::providers::{generate_typed, GenerationConstraints, LlmProvider};
use crate::store::slugify;
use crate::OrchestratorError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument, Span};

const MAX_CTA_BLOCKS: usize = 10;

/// Structured output of the write stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DraftCopy {
    /// Headline.
    pub title: String,
    /// Article body; paragraphs separated by blank lines.
    pub body: String,
    /// One- or two-sentence summary.
    pub summary: String,
}

/// Structured output of the refine stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RefinedCopy {
    /// Rewritten headline.
    pub title: String,
    /// Rewritten body.
    pub body: String,
    /// Rewritten summary.
    pub summary: String,
}

/// Structured output of the optimize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OptimizationPlan {
    /// CTA labels, best first.
    pub cta_labels: Vec<String>,
    /// FAQ entries.
    pub faq_items: Vec<FaqItem>,
    /// Replacement summary, if the optimizer has a better one.
    #[serde(default)]
    pub summary: Option<String>,
}

/// What a stage sees besides the artifact.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// The assignment being produced.
    pub assignment: &'a Assignment,
    /// Actors and effective configs for this cycle.
    pub roster: &'a ActorRoster,
}

impl StageContext<'_> {
    /// Effective config of the writer that owns the assignment.
    pub fn writer(&self) -> EffectiveConfig {
        self.roster.effective_for(&self.assignment.actor_id)
    }
}

/// One typed transform step.
#[async_trait]
pub trait ContentStage: Send + Sync {
    /// Stage label for spans and metrics.
    fn name(&self) -> &'static str;

    /// Transform `artifact`.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::Provider`] on generation failure and
    /// [`OrchestratorError::Validation`] when the result is incomplete.
    async fn apply(&self, artifact: Artifact, ctx: &StageContext<'_>) -> Result<Artifact, OrchestratorError>;
}

/// Empty draft carrying the brief's attributes; the write stage fills it.
pub fn blank_artifact(assignment: &Assignment, writer: &EffectiveConfig, now: DateTime<Utc>) -> Artifact {
    let brief = &assignment.brief;
    Artifact {
        id: uuid::Uuid::new_v4().to_string(),
        title: String::new(),
        slug: String::new(),
        body: String::new(),
        summary: String::new(),
        word_count: 0,
        topic: brief.primary_topic.clone(),
        tier: brief.tier,
        format: brief.format.clone(),
        hook: brief.hook.clone(),
        carriers: brief
            .target_carriers
            .iter()
            .filter(|c| !writer.avoids(c))
            .cloned()
            .collect(),
        actor_id: assignment.actor_id.clone(),
        cta_blocks: Vec::new(),
        faq_items: Vec::new(),
        embedding_vector: None,
        lifecycle_status: LifecycleStatus::Draft,
        created_at: now,
    }
}

/// Words in `body`.
pub fn word_count(body: &str) -> u32 {
    body.split_whitespace().count() as u32
}

/// CTA blocks for a body: `ceil(words / 1000 × density)`, at most 10.
///
/// Zero density means no CTA blocks.
pub fn cta_target(word_count: u32, density: f64) -> usize {
    if density <= 0.0 || word_count == 0 {
        return 0;
    }
    let target = (f64::from(word_count) / 1000.0 * density).ceil() as usize;
    target.clamp(1, MAX_CTA_BLOCKS)
}

fn ensure_complete(artifact: &Artifact, stage: &str) -> Result<(), OrchestratorError> {
    if artifact.title.trim().is_empty() {
        return Err(OrchestratorError::Validation(format!("{stage}: empty title")));
    }
    if artifact.body.trim().is_empty() {
        return Err(OrchestratorError::Validation(format!("{stage}: empty body")));
    }
    Ok(())
}

fn apply_copy(mut artifact: Artifact, title: String, body: String, summary: String) -> Artifact {
    artifact.title = title.trim().to_string();
    artifact.body = body.trim().to_string();
    artifact.summary = summary.trim().to_string();
    artifact.slug = slugify(&artifact.title);
    artifact.word_count = word_count(&artifact.body);
    artifact
}

fn system_prompt<'a>(cfg: &'a EffectiveConfig, fallback: &'a str) -> &'a str {
    if cfg.system_prompt().is_empty() {
        fallback
    } else {
        cfg.system_prompt()
    }
}

// ── Write ────────────────────────────────────────────────────────────────

/// Drafts title, body and summary from the brief.
pub struct WriteStage {
    llm: Arc<dyn LlmProvider>,
}

impl WriteStage {
    /// Create a write stage.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ContentStage for WriteStage {
    fn name(&self) -> &'static str {
        "write"
    }

    async fn apply(&self, artifact: Artifact, ctx: &StageContext<'_>) -> Result<Artifact, OrchestratorError> {
        let writer = ctx.writer();
        let brief = &ctx.assignment.brief;
        let length = writer.adjusted_length(brief.target_length);

        let mut prompt = String::new();
        let _ = writeln!(prompt, "Topic: {}", brief.primary_topic);
        let _ = writeln!(prompt, "Tier: {}", brief.tier);
        let _ = writeln!(prompt, "Format: {}", brief.format);
        let _ = writeln!(prompt, "Hook: {}", brief.hook);
        let _ = writeln!(prompt, "Target length: {length} words");
        if !artifact.carriers.is_empty() {
            let _ = writeln!(prompt, "Carriers: {}", artifact.carriers.join(", "));
        }
        if let Some(tone) = &writer.settings().tone {
            let _ = writeln!(prompt, "Tone: {tone}");
        }

        let constraints = GenerationConstraints {
            max_tokens: Some(length.saturating_mul(2)),
            temperature: Some(writer.temperature()),
        };
        let copy: DraftCopy = generate_typed(
            self.llm.as_ref(),
            system_prompt(&writer, "You write clear, accurate insurance articles."),
            &prompt,
            constraints,
        )
        .await?;

        let artifact = apply_copy(artifact, copy.title, copy.body, copy.summary);
        ensure_complete(&artifact, self.name())?;
        debug!(words = artifact.word_count, target = length, "draft written");
        Ok(artifact)
    }
}

// ── Refine ───────────────────────────────────────────────────────────────

/// Rewrites the draft in place.
pub struct RefineStage {
    llm: Arc<dyn LlmProvider>,
}

impl RefineStage {
    /// Create a refine stage.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ContentStage for RefineStage {
    fn name(&self) -> &'static str {
        "refine"
    }

    async fn apply(&self, artifact: Artifact, ctx: &StageContext<'_>) -> Result<Artifact, OrchestratorError> {
        let refiner = ctx.roster.effective_for_role(Role::Refiner);

        let mut prompt = String::new();
        if let Some(tone) = &refiner.settings().tone {
            let _ = writeln!(prompt, "Tone: {tone}");
        }
        let _ = writeln!(prompt, "Title: {}", artifact.title);
        let _ = writeln!(prompt, "Summary: {}", artifact.summary);
        // Body goes last so it can run to the end of the prompt.
        let _ = write!(prompt, "Body:\n{}", artifact.body);

        let constraints = GenerationConstraints {
            max_tokens: Some(artifact.word_count.saturating_mul(2).max(500)),
            temperature: Some(refiner.temperature()),
        };
        let copy: RefinedCopy = generate_typed(
            self.llm.as_ref(),
            system_prompt(&refiner, "You edit drafts for clarity and accuracy."),
            &prompt,
            constraints,
        )
        .await?;

        let artifact = apply_copy(artifact, copy.title, copy.body, copy.summary);
        ensure_complete(&artifact, self.name())?;
        Ok(artifact)
    }
}

// ── Optimize ─────────────────────────────────────────────────────────────

/// Attaches CTA blocks and FAQ items.
pub struct OptimizeStage {
    llm: Arc<dyn LlmProvider>,
}

impl OptimizeStage {
    /// Create an optimize stage.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl ContentStage for OptimizeStage {
    fn name(&self) -> &'static str {
        "optimize"
    }

    async fn apply(&self, mut artifact: Artifact, ctx: &StageContext<'_>) -> Result<Artifact, OrchestratorError> {
        let optimizer = ctx.roster.effective_for_role(Role::Optimizer);
        // Density is tuned per writer by evolution; the optimizer's own
        // setting applies only when the writer has none.
        let writer = ctx.writer();
        let density = writer
            .settings()
            .density_target
            .map_or_else(|| optimizer.density_target(), |_| writer.density_target());
        let wanted = cta_target(artifact.word_count, density);

        let mut prompt = String::new();
        let _ = writeln!(prompt, "Title: {}", artifact.title);
        let _ = writeln!(prompt, "CTA blocks: {wanted}");
        if !artifact.carriers.is_empty() {
            let _ = writeln!(prompt, "Carriers: {}", artifact.carriers.join(", "));
        }
        let _ = write!(prompt, "Body:\n{}", artifact.body);

        let plan: OptimizationPlan = generate_typed(
            self.llm.as_ref(),
            system_prompt(&optimizer, "You add calls to action and FAQs to articles."),
            &prompt,
            GenerationConstraints {
                max_tokens: Some(1_000),
                temperature: Some(optimizer.temperature()),
            },
        )
        .await?;

        let paragraphs = artifact.body.split("\n\n").filter(|p| !p.trim().is_empty()).count().max(1);
        let labels: Vec<String> = plan
            .cta_labels
            .into_iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .take(wanted)
            .collect();
        let slots = labels.len();
        artifact.cta_blocks = labels
            .into_iter()
            .enumerate()
            .map(|(i, label)| CtaBlock {
                label,
                carrier: if artifact.carriers.is_empty() {
                    None
                } else {
                    Some(artifact.carriers[i % artifact.carriers.len()].clone())
                },
                position: ((i + 1) * paragraphs / (slots + 1)) as u32,
            })
            .collect();
        artifact.faq_items = plan
            .faq_items
            .into_iter()
            .filter(|f| !f.question.trim().is_empty() && !f.answer.trim().is_empty())
            .collect();
        if let Some(summary) = plan.summary.filter(|s| !s.trim().is_empty()) {
            artifact.summary = summary.trim().to_string();
        }

        ensure_complete(&artifact, self.name())?;
        debug!(
            cta_blocks = artifact.cta_blocks.len(),
            wanted,
            faq_items = artifact.faq_items.len(),
            "artifact optimized"
        );
        Ok(artifact)
    }
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// A stage error tagged with the stage that raised it.
#[derive(Debug, thiserror::Error)]
#[error("{stage}: {error}")]
pub struct StageFailure {
    /// Name of the failing stage.
    pub stage: &'static str,
    /// The stage's error.
    #[source]
    pub error: OrchestratorError,
}

/// The ordered stages one assignment passes through.
pub struct StagePipeline {
    stages: Vec<Arc<dyn ContentStage>>,
}

impl StagePipeline {
    /// Write → refine → optimize over one LLM provider.
    pub fn standard(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            stages: vec![
                Arc::new(WriteStage::new(Arc::clone(&llm))),
                Arc::new(RefineStage::new(Arc::clone(&llm))),
                Arc::new(OptimizeStage::new(llm)),
            ],
        }
    }

    /// Custom stage list.
    pub fn new(stages: Vec<Arc<dyn ContentStage>>) -> Self {
        Self { stages }
    }

    /// Run every stage in order, each inside its own span.
    ///
    /// # Errors
    ///
    /// The first stage error, tagged with the stage name.
    pub async fn run(&self, assignment: &Assignment, roster: &ActorRoster, now: DateTime<Utc>) -> Result<Artifact, StageFailure> {
        let ctx = StageContext { assignment, roster };
        let mut artifact = blank_artifact(assignment, &ctx.writer(), now);

        for stage in &self.stages {
            let span = tracing::info_span!(
                "cycle.stage",
                assignment_id = %assignment.id,
                actor_id = %assignment.actor_id,
                stage = stage.name(),
                duration_ms = tracing::field::Empty,
                outcome = tracing::field::Empty,
                error_kind = tracing::field::Empty,
            );
            let start = Instant::now();
            let result = stage.apply(artifact, &ctx).instrument(span.clone()).await;
            let elapsed = start.elapsed();
            metrics::record_state_latency(stage.name(), elapsed);

            let _enter = span.enter();
            Span::current().record("duration_ms", elapsed.as_millis() as u64);
            match result {
                Ok(next) => {
                    Span::current().record("outcome", "ok");
                    artifact = next;
                }
                Err(e) => {
                    Span::current().record("outcome", "err");
                    Span::current().record("error_kind", e.kind());
                    return Err(StageFailure {
                        stage: stage.name(),
                        error: e,
                    });
                }
            }
        }
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, BehaviorConfig};
    use crate::model::{ContentBrief, Tier};
    use crate::providers::mock::MockLlm;
    use crate::providers::ProviderError;
    use serde_json::json;

    fn assignment() -> Assignment {
        Assignment {
            id: "as-1".into(),
            brief: ContentBrief {
                id: "b-1".into(),
                primary_topic: "Pet insurance for older dogs".into(),
                tier: Tier::Money,
                hook: "benefit".into(),
                format: "review".into(),
                target_length: 1600,
                target_carriers: vec!["Tailspin Pet".into(), "Contoso Mutual".into()],
                rationale: String::new(),
            },
            actor_id: "w1".into(),
            assigned_at: Utc::now(),
            cooldown_passed: true,
            similarity_distance: 1.0,
            rationale: String::new(),
        }
    }

    fn roster(writer_persona: BehaviorConfig) -> ActorRoster {
        ActorRoster::from_actors(vec![
            Actor::new("w1", Role::Writer).with_persona(writer_persona),
            Actor::new("r1", Role::Refiner),
            Actor::new("o1", Role::Optimizer),
        ])
    }

    #[test]
    fn test_cta_target_scales_with_density() {
        assert_eq!(cta_target(0, 2.0), 0);
        assert_eq!(cta_target(25, 2.0), 1);
        assert_eq!(cta_target(1500, 2.0), 3);
        assert_eq!(cta_target(1500, 0.0), 0);
        assert_eq!(cta_target(100_000, 5.0), MAX_CTA_BLOCKS);
    }

    #[test]
    fn test_word_count_counts_whitespace_separated_words() {
        assert_eq!(word_count("one two\n\nthree  four"), 4);
        assert_eq!(word_count(""), 0);
    }

    #[test]
    fn test_blank_artifact_drops_writer_avoided_carriers() {
        let writer = EffectiveConfig::from_parts(
            &BehaviorConfig {
                avoided_carriers: Some(vec!["tailspin pet".into()]),
                ..BehaviorConfig::default()
            },
            &BehaviorConfig::default(),
        );
        let artifact = blank_artifact(&assignment(), &writer, Utc::now());
        assert_eq!(artifact.carriers, vec!["Contoso Mutual"]);
        assert_eq!(artifact.lifecycle_status, LifecycleStatus::Draft);
    }

    #[tokio::test]
    async fn test_standard_pipeline_produces_complete_artifact() {
        let llm = Arc::new(MockLlm::content_defaults());
        let pipeline = StagePipeline::standard(llm.clone());
        let artifact = pipeline
            .run(&assignment(), &roster(BehaviorConfig::default()), Utc::now())
            .await
            .expect("test: pipeline succeeds");

        assert_eq!(artifact.title, "Pet insurance for older dogs: what to know");
        assert_eq!(artifact.slug, "pet-insurance-for-older-dogs-what-to-know");
        assert!(artifact.body.contains("Bottom line"));
        assert_eq!(artifact.word_count, word_count(&artifact.body));
        assert_eq!(artifact.cta_blocks.len(), 1);
        assert_eq!(artifact.cta_blocks[0].carrier.as_deref(), Some("Tailspin Pet"));
        assert_eq!(artifact.faq_items.len(), 2);
        assert_eq!(llm.calls("DraftCopy"), 1);
        assert_eq!(llm.calls("RefinedCopy"), 1);
        assert_eq!(llm.calls("OptimizationPlan"), 1);
    }

    #[tokio::test]
    async fn test_empty_body_is_validation_error() {
        let llm = Arc::new(
            MockLlm::new().on_structured("DraftCopy", json!({"title": "T", "body": "  ", "summary": "s"})),
        );
        let err = StagePipeline::standard(llm)
            .run(&assignment(), &roster(BehaviorConfig::default()), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.stage, "write");
        assert!(matches!(err.error, OrchestratorError::Validation(ref m) if m.contains("write: empty body")));
    }

    #[tokio::test]
    async fn test_refine_failure_stops_pipeline() {
        let llm = Arc::new(
            MockLlm::content_defaults()
                .on_structured_err("RefinedCopy", ProviderError::Rejected { status: 400, body: "bad".into() }),
        );
        let err = StagePipeline::standard(llm.clone())
            .run(&assignment(), &roster(BehaviorConfig::default()), Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.stage, "refine");
        assert_eq!(err.error.kind(), "provider");
        assert_eq!(llm.calls("OptimizationPlan"), 0);
    }

    #[tokio::test]
    async fn test_writer_density_override_drives_cta_count() {
        let llm = Arc::new(MockLlm::content_defaults());
        let persona = BehaviorConfig {
            density_target: Some(0.0),
            ..BehaviorConfig::default()
        };
        let artifact = StagePipeline::standard(llm)
            .run(&assignment(), &roster(persona), Utc::now())
            .await
            .expect("test: pipeline succeeds");
        assert!(artifact.cta_blocks.is_empty());
    }
}
