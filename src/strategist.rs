//! # Stage: Brief Strategist
//!
//! ## Responsibility
//! Turn the analyst report, historical topic coverage and optional research
//! signals into exactly `batch_size` content briefs honouring the tier quota.
//!
//! ## Guarantees
//! - A returned batch always has exactly `batch_size` briefs whose per-tier
//!   counts equal the quota, with unique non-empty primary topics
//! - Research failures never fail the stage; seed topics fill in
//! - Carriers the strategist actor avoids never appear on a brief
//!
//! ## NOT Responsible For
//! - Cooldown or similarity filtering (that belongs to `editor`)
//! - Prompt wording quality

use crate::actor::EffectiveConfig;
use crate::analyst::AnalystReport;
use crate::config::{CycleConfig, QuotaConfig, StrategistConfig};
use crate::model::{normalize_topic, ContentBrief, Tier, TopicRecord};
use crate::providers::{generate_typed, GenerationConstraints, LlmProvider, SearchProvider};
use crate::resilience::{bounded_fan_out, CallPolicy};
use crate::OrchestratorError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

const MAX_RESEARCH_TOPICS: usize = 20;
const MAX_AVOID_TOPICS: usize = 30;

const DEFAULT_SYSTEM_PROMPT: &str =
    "You plan insurance content. Reply only with JSON matching the provided schema.";

/// One brief as returned by the model, before local ids are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BriefDraft {
    /// Primary topic.
    pub primary_topic: String,
    /// Intent tier.
    pub tier: Tier,
    /// Angle.
    pub hook: String,
    /// Format.
    pub format: String,
    /// Target length in words.
    pub target_length: u32,
    /// Partners to feature.
    #[serde(default)]
    pub target_carriers: Vec<String>,
    /// Why this brief.
    #[serde(default)]
    pub rationale: String,
}

/// Structured response requested from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BriefBatch {
    /// The proposed briefs.
    pub briefs: Vec<BriefDraft>,
}

/// A (carrier × tier) combination produced at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGap {
    /// Partner.
    pub carrier: String,
    /// Tier.
    pub tier: Tier,
    /// Times produced so far (0 or 1).
    pub count: usize,
}

/// Count produced articles per (carrier, tier), including zero-count
/// combinations for every configured carrier.
pub fn coverage_map(history: &[TopicRecord], carriers: &[String]) -> BTreeMap<(String, Tier), usize> {
    let mut map = BTreeMap::new();
    for carrier in carriers {
        for tier in Tier::ALL {
            map.insert((carrier.clone(), tier), 0);
        }
    }
    for record in history {
        for carrier in &record.carriers {
            *map.entry((carrier.clone(), record.tier)).or_insert(0) += 1;
        }
    }
    map
}

/// Combinations with count ≤ 1, ascending by count, then carrier, then tier.
pub fn coverage_gaps(map: &BTreeMap<(String, Tier), usize>) -> Vec<CoverageGap> {
    let mut gaps: Vec<CoverageGap> = map
        .iter()
        .filter(|(_, count)| **count <= 1)
        .map(|((carrier, tier), count)| CoverageGap {
            carrier: carrier.clone(),
            tier: *tier,
            count: *count,
        })
        .collect();
    gaps.sort_by(|a, b| {
        a.count
            .cmp(&b.count)
            .then_with(|| a.carrier.cmp(&b.carrier))
            .then_with(|| a.tier.cmp(&b.tier))
    });
    gaps
}

/// Check a batch against the hard contract.
///
/// # Errors
///
/// [`OrchestratorError::Validation`] listing every violation found.
pub fn validate_batch(drafts: &[BriefDraft], batch_size: usize, quota: &QuotaConfig) -> Result<(), OrchestratorError> {
    let mut problems = Vec::new();

    if drafts.len() != batch_size {
        problems.push(format!("expected {batch_size} briefs, got {}", drafts.len()));
    }
    for tier in Tier::ALL {
        let got = drafts.iter().filter(|d| d.tier == tier).count();
        let want = quota.for_tier(tier);
        if got != want {
            problems.push(format!("tier {tier}: expected {want}, got {got}"));
        }
    }
    let mut seen = HashSet::new();
    for draft in drafts {
        let key = normalize_topic(&draft.primary_topic);
        if key.is_empty() {
            problems.push("empty primary topic".to_string());
        } else if !seen.insert(key) {
            problems.push(format!("duplicate topic '{}'", draft.primary_topic.trim()));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(OrchestratorError::Validation(format!(
            "brief batch rejected: {}",
            problems.join("; ")
        )))
    }
}

/// Inputs the prompt is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategistContext {
    /// Under-covered combinations.
    pub gaps: Vec<CoverageGap>,
    /// Candidate topics from research or the seed list.
    pub candidate_topics: Vec<String>,
    /// Whether `candidate_topics` came from the seed list.
    pub from_seeds: bool,
    /// Recently produced topics the model should steer away from.
    pub recent_topics: Vec<String>,
}

/// The brief strategist.
pub struct BriefStrategist {
    config: StrategistConfig,
    quota: QuotaConfig,
    batch_size: usize,
    llm: Arc<dyn LlmProvider>,
    search: Option<Arc<dyn SearchProvider>>,
    search_policy: CallPolicy,
}

impl BriefStrategist {
    /// Create a strategist from the cycle config.
    pub fn new(config: &CycleConfig, llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            config: config.strategist.clone(),
            quota: config.quota.clone(),
            batch_size: config.cycle.batch_size,
            llm,
            search: None,
            search_policy: config.providers.call_policy(),
        }
    }

    /// Builder: enable research through `search`.
    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    /// Run every configured research query with bounded concurrency.
    ///
    /// Returns de-duplicated result titles. `None` when research is disabled
    /// or every query failed.
    pub async fn research(&self) -> Option<Vec<String>> {
        let search = self.search.as_ref()?;
        if self.config.research_queries.is_empty() {
            return None;
        }

        let policy = self.search_policy.clone();
        let outcome = bounded_fan_out(
            self.config.research_queries.clone(),
            self.config.research_concurrency,
            |query: String| {
                let search = Arc::clone(search);
                let policy = policy.clone();
                async move { policy.run("search", || search.search(&query)).await }
            },
        )
        .await;

        let batches = match outcome {
            Ok(batches) => batches,
            Err(e) => {
                warn!(error = %e, "all research queries failed; falling back to seed topics");
                return None;
            }
        };

        let mut seen = HashSet::new();
        let topics: Vec<String> = batches
            .into_iter()
            .flatten()
            .flatten()
            .map(|hit| hit.title.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(normalize_topic(t)))
            .take(MAX_RESEARCH_TOPICS)
            .collect();
        Some(topics)
    }

    /// Assemble coverage gaps, candidate topics and recent topics.
    pub fn build_context(&self, history: &[TopicRecord], research: Option<Vec<String>>) -> StrategistContext {
        let gaps = coverage_gaps(&coverage_map(history, &self.config.carriers));

        let (candidate_topics, from_seeds) = match research {
            Some(topics) if !topics.is_empty() => (topics, false),
            _ => (self.config.seed_topics.clone(), true),
        };

        let mut recent: Vec<&TopicRecord> = history.iter().collect();
        recent.sort_by(|a, b| b.produced_at.cmp(&a.produced_at));
        let recent_topics = recent
            .into_iter()
            .take(MAX_AVOID_TOPICS)
            .map(|r| r.topic.clone())
            .collect();

        StrategistContext {
            gaps,
            candidate_topics,
            from_seeds,
            recent_topics,
        }
    }

    fn user_prompt(&self, report: &AnalystReport, ctx: &StrategistContext) -> String {
        let mut prompt = String::new();
        let _ = writeln!(prompt, "Produce exactly {} briefs.", self.batch_size);
        let _ = writeln!(
            prompt,
            "Tier quota: money={}, authority={}, trend={}.",
            self.quota.money, self.quota.authority, self.quota.trend
        );
        let _ = writeln!(
            prompt,
            "Recommended: tier={}, format={}, hook={}. Trend: {:?}.",
            report.recommendation.tier,
            report.recommendation.format,
            report.recommendation.hook,
            report.trend
        );
        if let Some(best) = &report.best_partner {
            let _ = writeln!(prompt, "Best converting partner: {best}.");
        }
        if !ctx.gaps.is_empty() {
            let _ = writeln!(prompt, "Coverage gaps (carrier / tier / count):");
            for gap in ctx.gaps.iter().take(10) {
                let _ = writeln!(prompt, "- {} / {} / {}", gap.carrier, gap.tier, gap.count);
            }
        }
        let source = if ctx.from_seeds { "Seed topics" } else { "Research signals" };
        let _ = writeln!(prompt, "{source}:");
        for topic in &ctx.candidate_topics {
            let _ = writeln!(prompt, "- {topic}");
        }
        if !ctx.recent_topics.is_empty() {
            let _ = writeln!(prompt, "Avoid these recent topics:");
            for topic in &ctx.recent_topics {
                let _ = writeln!(prompt, "- {topic}");
            }
        }
        prompt
    }

    /// Generate and validate one batch.
    ///
    /// # Errors
    ///
    /// - [`OrchestratorError::Provider`] when generation fails after retries
    ///   or the output does not decode.
    /// - [`OrchestratorError::Validation`] when the batch breaks the contract.
    pub async fn generate(
        &self,
        report: &AnalystReport,
        history: &[TopicRecord],
        effective: &EffectiveConfig,
    ) -> Result<Vec<ContentBrief>, OrchestratorError> {
        let research = self.research().await;
        let ctx = self.build_context(history, research);

        let system = if effective.system_prompt().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            effective.system_prompt()
        };
        let constraints = GenerationConstraints {
            max_tokens: Some(2_000),
            temperature: Some(effective.temperature()),
        };
        let batch: BriefBatch =
            generate_typed(self.llm.as_ref(), system, &self.user_prompt(report, &ctx), constraints).await?;

        validate_batch(&batch.briefs, self.batch_size, &self.quota)?;

        let briefs: Vec<ContentBrief> = batch
            .briefs
            .into_iter()
            .map(|draft| ContentBrief {
                id: uuid::Uuid::new_v4().to_string(),
                primary_topic: draft.primary_topic.trim().to_string(),
                tier: draft.tier,
                hook: draft.hook,
                format: draft.format,
                target_length: draft.target_length,
                target_carriers: draft
                    .target_carriers
                    .into_iter()
                    .filter(|c| !effective.avoids(c))
                    .collect(),
                rationale: draft.rationale,
            })
            .collect();

        info!(
            briefs = briefs.len(),
            gaps = ctx.gaps.len(),
            from_seeds = ctx.from_seeds,
            "brief batch generated"
        );
        Ok(briefs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::BehaviorConfig;
    use crate::providers::mock::{MockLlm, StaticSearch};
    use chrono::Utc;
    use serde_json::json;

    fn draft(topic: &str, tier: Tier) -> BriefDraft {
        BriefDraft {
            primary_topic: topic.to_string(),
            tier,
            hook: "benefit".into(),
            format: "guide".into(),
            target_length: 1200,
            target_carriers: vec![],
            rationale: String::new(),
        }
    }

    fn valid_drafts() -> Vec<BriefDraft> {
        vec![
            draft("a", Tier::Money),
            draft("b", Tier::Money),
            draft("c", Tier::Money),
            draft("d", Tier::Authority),
            draft("e", Tier::Trend),
        ]
    }

    fn record(topic: &str, tier: Tier, carrier: &str) -> TopicRecord {
        TopicRecord {
            topic: topic.into(),
            tier,
            carriers: vec![carrier.into()],
            produced_at: Utc::now(),
        }
    }

    #[test]
    fn test_validate_batch_accepts_quota_match() {
        assert!(validate_batch(&valid_drafts(), 5, &QuotaConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_batch_rejects_tier_mismatch() {
        let mut drafts = valid_drafts();
        drafts[3].tier = Tier::Money;
        let err = validate_batch(&drafts, 5, &QuotaConfig::default()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Validation(ref m) if m.contains("tier money")));
    }

    #[test]
    fn test_validate_batch_rejects_wrong_count() {
        let drafts = valid_drafts()[..4].to_vec();
        assert!(validate_batch(&drafts, 5, &QuotaConfig::default()).is_err());
    }

    #[test]
    fn test_validate_batch_rejects_case_insensitive_duplicates_and_empty() {
        let mut drafts = valid_drafts();
        drafts[1].primary_topic = " A ".into();
        drafts[2].primary_topic = "   ".into();
        let err = validate_batch(&drafts, 5, &QuotaConfig::default()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("duplicate topic"));
        assert!(msg.contains("empty primary topic"));
    }

    #[test]
    fn test_coverage_gaps_rank_by_count_then_name() {
        let carriers = vec!["Alpha".to_string(), "Beta".to_string()];
        let history = vec![
            record("t1", Tier::Money, "Alpha"),
            record("t2", Tier::Money, "Alpha"),
            record("t3", Tier::Authority, "Beta"),
        ];
        let gaps = coverage_gaps(&coverage_map(&history, &carriers));
        assert!(!gaps.iter().any(|g| g.carrier == "Alpha" && g.tier == Tier::Money));
        assert_eq!(gaps.first().map(|g| (g.carrier.as_str(), g.tier)), Some(("Alpha", Tier::Authority)));
        assert_eq!(gaps.last().map(|g| (g.carrier.as_str(), g.count)), Some(("Beta", 1)));
    }

    #[test]
    fn test_no_memory_uses_seed_topics() {
        let config = CycleConfig::default();
        let strategist = BriefStrategist::new(&config, Arc::new(MockLlm::new()));
        let ctx = strategist.build_context(&[], None);
        assert!(ctx.from_seeds);
        assert_eq!(ctx.candidate_topics, config.strategist.seed_topics);
    }

    #[tokio::test]
    async fn test_research_results_become_candidates() {
        let mut config = CycleConfig::default();
        config.strategist.research_queries = vec!["q1".into(), "q2".into()];
        config.providers.retry_attempts = 1;
        let search = StaticSearch::new()
            .with_results("q1", &["Flood cover for renters", "Umbrella policies"])
            .failing("q2");
        let strategist =
            BriefStrategist::new(&config, Arc::new(MockLlm::new())).with_search(Arc::new(search));
        let research = strategist.research().await;
        let ctx = strategist.build_context(&[], research);
        assert!(!ctx.from_seeds);
        assert_eq!(ctx.candidate_topics.len(), 2);
    }

    #[tokio::test]
    async fn test_all_research_failing_falls_back_to_seeds() {
        let mut config = CycleConfig::default();
        config.strategist.research_queries = vec!["q1".into()];
        config.providers.retry_attempts = 1;
        let search = StaticSearch::new().failing("q1");
        let strategist =
            BriefStrategist::new(&config, Arc::new(MockLlm::new())).with_search(Arc::new(search));
        assert!(strategist.research().await.is_none());
    }

    #[tokio::test]
    async fn test_generate_assigns_ids_and_strips_avoided_carriers() {
        let config = CycleConfig::default();
        let llm = Arc::new(MockLlm::content_defaults());
        let strategist = BriefStrategist::new(&config, llm.clone());
        let effective = EffectiveConfig::from_parts(
            &BehaviorConfig {
                avoided_carriers: Some(vec!["fabrikam home".into()]),
                ..BehaviorConfig::default()
            },
            &BehaviorConfig::default(),
        );
        let briefs = strategist
            .generate(&AnalystReport::empty(), &[], &effective)
            .await
            .expect("test: batch valid");
        assert_eq!(briefs.len(), 5);
        assert!(briefs.iter().all(|b| !b.id.is_empty()));
        assert!(briefs
            .iter()
            .all(|b| !b.target_carriers.iter().any(|c| c == "Fabrikam Home")));
        assert_eq!(llm.calls("BriefBatch"), 1);
    }

    #[tokio::test]
    async fn test_generate_rejects_quota_violation() {
        let config = CycleConfig::default();
        let bad = json!({"briefs": [
            {"primary_topic": "a", "tier": "money", "hook": "h", "format": "f", "target_length": 1000},
            {"primary_topic": "b", "tier": "money", "hook": "h", "format": "f", "target_length": 1000},
            {"primary_topic": "c", "tier": "money", "hook": "h", "format": "f", "target_length": 1000},
            {"primary_topic": "d", "tier": "money", "hook": "h", "format": "f", "target_length": 1000},
            {"primary_topic": "e", "tier": "trend", "hook": "h", "format": "f", "target_length": 1000}
        ]});
        let strategist =
            BriefStrategist::new(&config, Arc::new(MockLlm::new().on_structured("BriefBatch", bad)));
        let err = strategist
            .generate(&AnalystReport::empty(), &[], &EffectiveConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn test_generate_surfaces_schema_violation_as_provider_error() {
        let config = CycleConfig::default();
        let strategist = BriefStrategist::new(
            &config,
            Arc::new(MockLlm::new().on_structured("BriefBatch", json!({"items": []}))),
        );
        let err = strategist
            .generate(&AnalystReport::empty(), &[], &EffectiveConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Provider(crate::providers::ProviderError::SchemaViolation(_))
        ));
    }
}
