//! # Stage: Performance Analyst
//!
//! ## Responsibility
//! Aggregate historical outcome metrics, rescore writer actors, classify the
//! CTR trend, and propose behaviour overrides for actors that measurably
//! underperform.
//!
//! ## Guarantees
//! - Scores are always in `[0, 1]`
//! - A suggestion is only produced with `min_views` of evidence and at least
//!   one crossed threshold; its reasoning cites the measured values
//! - Empty or thin data yields safe defaults, never an error
//!
//! ## NOT Responsible For
//! - Persisting scores or suggestions (that belongs to the orchestrator)
//! - Applying suggestions (that belongs to evolution-apply)

use crate::actor::{ActorRoster, BehaviorConfig};
use crate::config::AnalystConfig;
use crate::model::{EvolutionSuggestion, PerformanceSample, SuggestionStatus, Tier};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Direction of CTR between the older and the recent window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    /// Recent CTR rose by more than the threshold.
    Improving,
    /// Change within the threshold, or not enough data.
    Stable,
    /// Recent CTR fell by more than the threshold.
    Declining,
}

/// View-weighted totals over a set of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Aggregate {
    samples: usize,
    views: u64,
    clicks: f64,
    conversions: u64,
    engagement: f64,
    bounces: f64,
}

impl Aggregate {
    fn add(&mut self, sample: &PerformanceSample) {
        let m = &sample.metric;
        let views = m.views as f64;
        self.samples += 1;
        self.views += m.views;
        self.clicks += m.click_through_rate * views;
        self.conversions += m.conversion_count;
        self.engagement += m.avg_engagement_time * views;
        self.bounces += m.bounce_rate * views;
    }

    fn of<'a>(samples: impl IntoIterator<Item = &'a PerformanceSample>) -> Self {
        let mut agg = Self::default();
        for s in samples {
            agg.add(s);
        }
        agg
    }

    fn ratio(&self, numerator: f64) -> f64 {
        if self.views == 0 {
            0.0
        } else {
            numerator / self.views as f64
        }
    }

    fn ctr(&self) -> f64 {
        self.ratio(self.clicks)
    }

    fn conversion_rate(&self) -> f64 {
        self.ratio(self.conversions as f64)
    }

    fn avg_engagement(&self) -> f64 {
        self.ratio(self.engagement)
    }

    fn bounce_rate(&self) -> f64 {
        self.ratio(self.bounces)
    }
}

/// A writer's recomputed score and the figures behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorScore {
    /// Writer actor id.
    pub actor_id: String,
    /// `clamp(ctr*0.4 + conversionRate*0.6, 0, 1)`.
    pub score: f64,
    /// Total views in the scoring window.
    pub views: u64,
    /// View-weighted click-through rate.
    pub ctr: f64,
    /// Conversions per view.
    pub conversion_rate: f64,
    /// View-weighted engagement time (seconds).
    pub avg_engagement: f64,
    /// View-weighted bounce rate.
    pub bounce_rate: f64,
}

/// What the next batch should lean toward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Best-converting tier.
    pub tier: Tier,
    /// Best-converting format.
    pub format: String,
    /// Hook with the best CTR.
    pub hook: String,
}

impl Default for Recommendation {
    fn default() -> Self {
        Self {
            tier: Tier::Money,
            format: "comparison".to_string(),
            hook: "benefit".to_string(),
        }
    }
}

/// Output of one analyst pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalystReport {
    /// New scores, one per writer with samples in the scoring window.
    pub scores: Vec<ActorScore>,
    /// CTR trend across all content.
    pub trend: TrendDirection,
    /// Pending override proposals.
    pub suggestions: Vec<EvolutionSuggestion>,
    /// Recommended tier / format / hook.
    pub recommendation: Recommendation,
    /// Highest-scoring writer.
    pub best_actor: Option<String>,
    /// Lowest-scoring writer (only with two or more scored).
    pub worst_actor: Option<String>,
    /// Best-converting carrier.
    pub best_partner: Option<String>,
    /// Worst-converting carrier (only with two or more carriers).
    pub worst_partner: Option<String>,
    /// Free-text observations.
    pub insights: Vec<String>,
}

impl AnalystReport {
    /// The report used when no data is available.
    pub fn empty() -> Self {
        Self {
            scores: Vec::new(),
            trend: TrendDirection::Stable,
            suggestions: Vec::new(),
            recommendation: Recommendation::default(),
            best_actor: None,
            worst_actor: None,
            best_partner: None,
            worst_partner: None,
            insights: Vec::new(),
        }
    }
}

/// Score = 40% CTR + 60% conversion rate, clamped.
pub fn score(ctr: f64, conversion_rate: f64) -> f64 {
    crate::actor::clamp_score(ctr * 0.4 + conversion_rate * 0.6)
}

/// Classify the relative CTR change from `older` to `recent`.
///
/// A change strictly greater than `threshold` (in either direction) moves
/// the trend off `Stable`. A missing or zero baseline is `Stable`.
pub fn classify_trend(recent_ctr: Option<f64>, older_ctr: Option<f64>, threshold: f64) -> TrendDirection {
    match (recent_ctr, older_ctr) {
        (Some(recent), Some(older)) if older > 0.0 => {
            let change = (recent - older) / older;
            if change > threshold {
                TrendDirection::Improving
            } else if change < -threshold {
                TrendDirection::Declining
            } else {
                TrendDirection::Stable
            }
        }
        _ => TrendDirection::Stable,
    }
}

/// Rank groups by a metric, best first; ties broken by key ascending.
fn ranked<K: Ord + Clone>(groups: &BTreeMap<K, Aggregate>, metric: fn(&Aggregate) -> f64) -> Vec<K> {
    let mut keys: Vec<(&K, f64)> = groups
        .iter()
        .filter(|(_, agg)| agg.views > 0)
        .map(|(k, agg)| (k, metric(agg)))
        .collect();
    keys.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    keys.into_iter().map(|(k, _)| k.clone()).collect()
}

/// The performance analyst.
#[derive(Debug, Clone)]
pub struct PerformanceAnalyst {
    config: AnalystConfig,
}

impl PerformanceAnalyst {
    /// Create an analyst with the given windows and thresholds.
    pub fn new(config: AnalystConfig) -> Self {
        Self { config }
    }

    /// Analyse `samples` as of `now`.
    ///
    /// Only writers in `roster` are scored; their current effective configs
    /// are the baseline suggestions adjust from.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn analyze(
        &self,
        samples: &[PerformanceSample],
        roster: &ActorRoster,
        now: DateTime<Utc>,
    ) -> AnalystReport {
        let scoring_start = now - Duration::days(i64::from(self.config.scoring_window_days));
        let window: Vec<&PerformanceSample> = samples
            .iter()
            .filter(|s| s.published_at >= scoring_start && s.published_at <= now)
            .collect();

        if window.is_empty() && samples.is_empty() {
            let mut report = AnalystReport::empty();
            report
                .insights
                .push("no performance data yet; using default recommendation".to_string());
            return report;
        }

        let mut report = AnalystReport::empty();
        report.trend = self.trend(samples, now, &mut report.insights);

        // ── Scores ───────────────────────────────────────────────────
        for writer in roster.writers() {
            let agg = Aggregate::of(window.iter().copied().filter(|s| s.actor_id == writer.id));
            if agg.samples == 0 {
                continue;
            }
            let actor_score = ActorScore {
                actor_id: writer.id.clone(),
                score: score(agg.ctr(), agg.conversion_rate()),
                views: agg.views,
                ctr: agg.ctr(),
                conversion_rate: agg.conversion_rate(),
                avg_engagement: agg.avg_engagement(),
                bounce_rate: agg.bounce_rate(),
            };
            if let Some(suggestion) = self.suggest(&actor_score, roster) {
                report.suggestions.push(suggestion);
            }
            report.scores.push(actor_score);
        }

        let mut by_score: Vec<&ActorScore> = report.scores.iter().collect();
        by_score.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.actor_id.cmp(&b.actor_id))
        });
        report.best_actor = by_score.first().map(|s| s.actor_id.clone());
        if by_score.len() > 1 {
            report.worst_actor = by_score.last().map(|s| s.actor_id.clone());
        }

        // ── Recommendation ───────────────────────────────────────────
        let mut tiers: BTreeMap<Tier, Aggregate> = BTreeMap::new();
        let mut formats: BTreeMap<String, Aggregate> = BTreeMap::new();
        let mut hooks: BTreeMap<String, Aggregate> = BTreeMap::new();
        let mut partners: BTreeMap<String, Aggregate> = BTreeMap::new();
        for s in &window {
            tiers.entry(s.tier).or_default().add(s);
            formats.entry(s.format.clone()).or_default().add(s);
            hooks.entry(s.hook.clone()).or_default().add(s);
            for carrier in &s.carriers {
                partners.entry(carrier.clone()).or_default().add(s);
            }
        }

        let defaults = Recommendation::default();
        report.recommendation = Recommendation {
            tier: ranked(&tiers, Aggregate::conversion_rate)
                .first()
                .copied()
                .unwrap_or(defaults.tier),
            format: ranked(&formats, Aggregate::conversion_rate)
                .into_iter()
                .next()
                .unwrap_or(defaults.format),
            hook: ranked(&hooks, Aggregate::ctr)
                .into_iter()
                .next()
                .unwrap_or(defaults.hook),
        };

        let partner_rank = ranked(&partners, Aggregate::conversion_rate);
        report.best_partner = partner_rank.first().cloned();
        if partner_rank.len() > 1 {
            report.worst_partner = partner_rank.last().cloned();
        }
        if let Some(best) = &report.best_partner {
            if let Some(agg) = partners.get(best) {
                report.insights.push(format!(
                    "{best} converts best at {:.2}% over {} views",
                    agg.conversion_rate() * 100.0,
                    agg.views
                ));
            }
        }
        if window.is_empty() {
            report.insights.push(format!(
                "no samples in the last {} days; scores unchanged",
                self.config.scoring_window_days
            ));
        }

        info!(
            scored = report.scores.len(),
            suggestions = report.suggestions.len(),
            trend = ?report.trend,
            tier = %report.recommendation.tier,
            "analyst report ready"
        );
        report
    }

    fn trend(&self, samples: &[PerformanceSample], now: DateTime<Utc>, insights: &mut Vec<String>) -> TrendDirection {
        let recent_start = now - Duration::days(i64::from(self.config.trend_recent_days));
        let older_start = now - Duration::days(i64::from(self.config.trend_older_days));

        let recent = Aggregate::of(
            samples
                .iter()
                .filter(|s| s.published_at >= recent_start && s.published_at <= now),
        );
        let older = Aggregate::of(
            samples
                .iter()
                .filter(|s| s.published_at >= older_start && s.published_at < recent_start),
        );
        let recent_ctr = (recent.views > 0).then(|| recent.ctr());
        let older_ctr = (older.views > 0).then(|| older.ctr());
        let trend = classify_trend(recent_ctr, older_ctr, self.config.trend_threshold);

        if let (Some(r), Some(o)) = (recent_ctr, older_ctr) {
            insights.push(format!(
                "CTR {:.2}% (last {} days) vs {:.2}% before: {:?}",
                r * 100.0,
                self.config.trend_recent_days,
                o * 100.0,
                trend
            ));
        }
        trend
    }

    fn suggest(&self, measured: &ActorScore, roster: &ActorRoster) -> Option<EvolutionSuggestion> {
        if measured.views < self.config.min_views {
            debug!(
                actor_id = %measured.actor_id,
                views = measured.views,
                "not enough evidence for a suggestion"
            );
            return None;
        }

        let current = roster.effective_for(&measured.actor_id);
        let mut patch = BehaviorConfig::default();
        let mut reasons = Vec::new();

        if measured.ctr < self.config.min_ctr {
            let next = (current.assertiveness() + 0.1).min(1.0);
            patch.assertiveness = Some(next);
            reasons.push(format!(
                "CTR {:.2}% below {:.2}%: assertiveness {:.2} -> {:.2}",
                measured.ctr * 100.0,
                self.config.min_ctr * 100.0,
                current.assertiveness(),
                next
            ));
        }
        if measured.bounce_rate > self.config.max_bounce_rate {
            let next = (current.word_count_bias() - 0.1).max(-0.5);
            patch.word_count_bias = Some(next);
            reasons.push(format!(
                "bounce rate {:.0}% above {:.0}%: word count bias {:+.2} -> {:+.2}",
                measured.bounce_rate * 100.0,
                self.config.max_bounce_rate * 100.0,
                current.word_count_bias(),
                next
            ));
        }
        if measured.avg_engagement < self.config.min_engagement_s {
            let next = (current.density_target() - 0.5).max(0.5);
            patch.density_target = Some(next);
            reasons.push(format!(
                "engagement {:.0}s below {:.0}s: CTA density {:.1} -> {:.1}",
                measured.avg_engagement,
                self.config.min_engagement_s,
                current.density_target(),
                next
            ));
        }

        if patch.is_empty() {
            return None;
        }
        Some(EvolutionSuggestion {
            id: uuid::Uuid::new_v4().to_string(),
            actor_id: measured.actor_id.clone(),
            proposed_overrides: patch,
            reasoning: format!("{} views; {}", measured.views, reasons.join("; ")),
            status: SuggestionStatus::Pending,
        })
    }
}
