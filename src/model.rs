//! Shared data model for one content cycle.
//!
//! ## Responsibility
//! Plain data types exchanged between the analyst, strategist, editor,
//! transform stages, store, and the orchestrator.
//!
//! ## NOT Responsible For
//! - Actor configuration (that belongs to `actor`)
//! - Any behaviour beyond small derived helpers

use crate::actor::BehaviorConfig;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Commercial intent tier of a brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Conversion-oriented content (comparisons, reviews, pricing).
    Money,
    /// Evergreen authority content (guides, explainers).
    Authority,
    /// Time-sensitive trend content.
    Trend,
}

impl Tier {
    /// All tiers in quota order.
    pub const ALL: [Tier; 3] = [Tier::Money, Tier::Authority, Tier::Trend];

    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Money => "money",
            Self::Authority => "authority",
            Self::Trend => "trend",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate content specification produced by the strategist.
///
/// Ephemeral: lives only within the cycle that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBrief {
    /// Locally assigned identifier.
    pub id: String,
    /// Primary topic; unique within a batch (case-insensitive).
    pub primary_topic: String,
    /// Intent tier.
    pub tier: Tier,
    /// Angle / hook, also used as the title hint for similarity checks.
    pub hook: String,
    /// Content format (e.g. "comparison", "guide").
    pub format: String,
    /// Target length in words.
    pub target_length: u32,
    /// External partners (carriers) the article should feature.
    pub target_carriers: Vec<String>,
    /// Why the strategist proposed this brief.
    pub rationale: String,
}

impl ContentBrief {
    /// Normalised topic key used for cooldown and uniqueness checks.
    pub fn topic_key(&self) -> String {
        normalize_topic(&self.primary_topic)
    }
}

/// Case-insensitive, whitespace-trimmed topic key.
pub fn normalize_topic(topic: &str) -> String {
    topic.trim().to_lowercase()
}

/// A brief admitted by the editor and bound to a writer actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Assignment identifier.
    pub id: String,
    /// The admitted brief.
    pub brief: ContentBrief,
    /// Writer actor that owns the assignment.
    pub actor_id: String,
    /// When the editor made the assignment.
    pub assigned_at: DateTime<Utc>,
    /// Always `true` for a created assignment; kept for the audit trail.
    pub cooldown_passed: bool,
    /// `1 - maxSimilarity` achieved against the recent window.
    pub similarity_distance: f64,
    /// Human-readable reason for the decision.
    pub rationale: String,
}

/// Lifecycle of a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    /// Produced but not reviewed.
    Draft,
    /// Reviewed, awaiting publication.
    Approved,
    /// Live.
    Published,
}

/// Call-to-action block attached by the optimize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CtaBlock {
    /// Button / link label.
    pub label: String,
    /// Partner the CTA points to, if any.
    pub carrier: Option<String>,
    /// Paragraph index the block is placed after.
    pub position: u32,
}

/// Question/answer pair attached by the optimize stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FaqItem {
    /// The question.
    pub question: String,
    /// The answer.
    pub answer: String,
}

/// The evolving content object produced by write → refine → optimize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact identifier.
    pub id: String,
    /// Headline.
    pub title: String,
    /// URL slug; unique within the store.
    pub slug: String,
    /// Article body.
    pub body: String,
    /// Short summary.
    pub summary: String,
    /// Words in `body`.
    pub word_count: u32,
    /// Primary topic carried over from the brief.
    pub topic: String,
    /// Tier carried over from the brief.
    pub tier: Tier,
    /// Format carried over from the brief.
    pub format: String,
    /// Hook carried over from the brief.
    pub hook: String,
    /// Partners featured.
    pub carriers: Vec<String>,
    /// Writer actor that produced the draft.
    pub actor_id: String,
    /// CTA blocks (optimize stage).
    pub cta_blocks: Vec<CtaBlock>,
    /// FAQ items (optimize stage).
    pub faq_items: Vec<FaqItem>,
    /// Embedding of title + summary, set by the embed step.
    pub embedding_vector: Option<Vec<f32>>,
    /// Lifecycle status.
    pub lifecycle_status: LifecycleStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Outcome metrics for one published artifact, written by the analytics sync.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetric {
    /// Page views.
    pub views: u64,
    /// Click-through rate as a fraction (0.0–1.0).
    pub click_through_rate: f64,
    /// Average engagement time in seconds.
    pub avg_engagement_time: f64,
    /// Bounce rate as a fraction (0.0–1.0).
    pub bounce_rate: f64,
    /// Conversions attributed to the artifact.
    pub conversion_count: u64,
}

/// One artifact's metrics joined with the attributes the analyst groups by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Artifact the metric belongs to.
    pub artifact_id: String,
    /// Writer actor that produced it.
    pub actor_id: String,
    /// Tier of the artifact.
    pub tier: Tier,
    /// Format of the artifact.
    pub format: String,
    /// Hook of the artifact.
    pub hook: String,
    /// Partners featured.
    pub carriers: Vec<String>,
    /// Publication time.
    pub published_at: DateTime<Utc>,
    /// Observed metrics.
    pub metric: PerformanceMetric,
}

/// One row of historical topic memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicRecord {
    /// Primary topic as produced.
    pub topic: String,
    /// Tier it was produced under.
    pub tier: Tier,
    /// Partners it featured.
    pub carriers: Vec<String>,
    /// When it was produced.
    pub produced_at: DateTime<Utc>,
}

/// Review state of an evolution suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    /// Waiting for auto-apply or manual approval.
    Pending,
    /// Overrides were persisted.
    Applied,
}

/// A proposed behaviour-override change derived from observed performance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionSuggestion {
    /// Suggestion identifier.
    pub id: String,
    /// Actor the change applies to.
    pub actor_id: String,
    /// Partial overrides; only set fields change.
    pub proposed_overrides: BehaviorConfig,
    /// Data-backed reason for the change.
    pub reasoning: String,
    /// Review state.
    pub status: SuggestionStatus,
}

/// System-wide switches, loaded once per cycle and passed by parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    /// When set, cycles exit at the guard.
    pub paused: bool,
    /// When set, evolution suggestions are applied automatically.
    pub auto_evolution: bool,
    /// Maximum artifacts produced per rolling 7-day window.
    pub max_per_week: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            paused: false,
            auto_evolution: false,
            max_per_week: 10,
        }
    }
}

/// Immutable audit record of one orchestrator execution.
///
/// This is the externally observable contract exchanged with the trigger
/// layer; its field set is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRun {
    /// Cycle identifier.
    pub id: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Completion time.
    pub completed_at: DateTime<Utc>,
    /// Briefs the strategist produced.
    pub briefs_generated: u32,
    /// Assignments the editor made.
    pub assignments_made: u32,
    /// Artifacts persisted.
    pub artifacts_produced: u32,
    /// Briefs rejected because their topic was in cooldown.
    pub rejected_for_cooldown: u32,
    /// Briefs rejected because they were too similar to recent content.
    pub rejected_for_similarity: u32,
    /// One message per failure; empty on a clean run.
    pub errors: Vec<String>,
}

impl CycleRun {
    /// Joined error message, if any assignment or stage failed.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_serializes_to_snake_case() {
        let json = serde_json::to_string(&Tier::Authority).expect("test: serialize");
        assert_eq!(json, "\"authority\"");
    }

    #[test]
    fn test_normalize_topic_ignores_case_and_padding() {
        assert_eq!(normalize_topic("  Term Life Insurance "), "term life insurance");
    }

    #[test]
    fn test_cycle_run_serializes_with_camel_case_fields() {
        let now = Utc::now();
        let run = CycleRun {
            id: "c1".into(),
            started_at: now,
            completed_at: now,
            briefs_generated: 5,
            assignments_made: 3,
            artifacts_produced: 3,
            rejected_for_cooldown: 0,
            rejected_for_similarity: 1,
            errors: vec![],
        };
        let value = serde_json::to_value(&run).expect("test: serialize");
        for key in [
            "id",
            "startedAt",
            "completedAt",
            "briefsGenerated",
            "assignmentsMade",
            "artifactsProduced",
            "rejectedForCooldown",
            "rejectedForSimilarity",
            "errors",
        ] {
            assert!(value.get(key).is_some(), "missing field {key}");
        }
        assert_eq!(value.as_object().map(|o| o.len()), Some(9));
    }

    #[test]
    fn test_error_message_joins_errors() {
        let now = Utc::now();
        let mut run = CycleRun {
            id: "c1".into(),
            started_at: now,
            completed_at: now,
            briefs_generated: 0,
            assignments_made: 0,
            artifacts_produced: 0,
            rejected_for_cooldown: 0,
            rejected_for_similarity: 0,
            errors: vec![],
        };
        assert!(run.error_message().is_none());
        run.errors = vec!["a".into(), "b".into()];
        assert_eq!(run.error_message().as_deref(), Some("a; b"));
    }
}
