//! # Stage: Admission-Control Editor
//!
//! ## Responsibility
//! Gate candidate briefs before any content is written: reject topics still
//! in cooldown, reject briefs too similar to recent content, and assign the
//! survivors round-robin to writers under the weekly and per-cycle caps.
//!
//! ## Guarantees
//! - An assignment exists only for a brief that passed cooldown *and* similarity
//! - Cooldown is checked first; a cooldown rejection never consults embeddings
//! - Similarity rejects only when `distance < threshold`; equality is admitted
//! - An exhausted weekly quota short-circuits before any check runs
//! - Round-robin starts at the highest-scored writer every cycle, so with
//!   `k` writers and `m` assignments nobody gets more than `ceil(m/k)`
//!
//! ## NOT Responsible For
//! - Producing briefs (that belongs to `strategist`)
//! - Reading the store; the orchestrator passes history and the window in

use crate::actor::Actor;
use crate::config::AdmissionConfig;
use crate::metrics;
use crate::model::{normalize_topic, Assignment, ContentBrief, TopicRecord};
use crate::similarity::{max_similarity, SimilarityEngine};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

/// The gate cannot run at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// There is no active writer to assign briefs to.
    #[error("no active writer actors")]
    NoActiveWriters,
}

/// Why a brief was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Same topic produced within the cooldown window.
    Cooldown,
    /// Embedding too close to recent content.
    Similarity,
}

impl RejectionReason {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::Similarity => "similarity",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejected brief with its reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// The brief.
    pub brief: ContentBrief,
    /// Reason label.
    pub reason: RejectionReason,
    /// Human-readable detail.
    pub detail: String,
}

/// Everything the editor decided for one batch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EditorDecision {
    /// Admitted briefs bound to writers, in brief order.
    pub assignments: Vec<Assignment>,
    /// Briefs rejected for cooldown or similarity.
    pub rejections: Vec<Rejection>,
    /// Briefs never examined because capacity was already filled.
    pub deferred: Vec<ContentBrief>,
    /// The weekly quota was exhausted before processing began.
    pub quota_reached: bool,
    /// Slots available this cycle.
    pub capacity: u32,
}

impl EditorDecision {
    /// Number of rejections with `reason`.
    pub fn rejected_for(&self, reason: RejectionReason) -> u32 {
        self.rejections.iter().filter(|r| r.reason == reason).count() as u32
    }
}

/// Everything the gate needs for one batch.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionInput<'a> {
    /// Candidate briefs in strategist order.
    pub briefs: &'a [ContentBrief],
    /// Artifacts produced in the trailing 7 days.
    pub weekly_count: u32,
    /// Weekly ceiling from system settings.
    pub max_per_week: u32,
    /// Active writers sorted by score descending.
    pub writers: &'a [Actor],
    /// Topic memory.
    pub history: &'a [TopicRecord],
    /// Recent embeddings, read once at cycle start.
    pub window: &'a [Vec<f32>],
    /// Decision time.
    pub now: DateTime<Utc>,
}

/// Slots available: `min(max_per_week - weekly_count, per_cycle_cap)`.
pub fn capacity(weekly_count: u32, max_per_week: u32, per_cycle_cap: u32) -> u32 {
    max_per_week.saturating_sub(weekly_count).min(per_cycle_cap)
}

/// Whether `topic` was produced at or after `now - cooldown_days`.
pub fn in_cooldown(topic: &str, history: &[TopicRecord], now: DateTime<Utc>, cooldown_days: u32) -> bool {
    let key = normalize_topic(topic);
    let cutoff = now - Duration::days(i64::from(cooldown_days));
    history
        .iter()
        .any(|r| r.produced_at >= cutoff && normalize_topic(&r.topic) == key)
}

/// Exclusive boundary: only a distance strictly below the threshold rejects.
pub fn is_too_similar(distance: f64, threshold: f64) -> bool {
    distance < threshold
}

/// The admission-control gate.
#[derive(Clone)]
pub struct AdmissionEditor {
    config: AdmissionConfig,
    per_cycle_cap: u32,
    similarity: SimilarityEngine,
}

impl AdmissionEditor {
    /// Create a gate.
    pub fn new(config: AdmissionConfig, per_cycle_cap: u32, similarity: SimilarityEngine) -> Self {
        Self {
            config,
            per_cycle_cap,
            similarity,
        }
    }

    /// Distance of `brief` from the window; `None` when the embedding could
    /// not be computed or compared.
    async fn distance(&self, brief: &ContentBrief, window: &[Vec<f32>]) -> Option<f64> {
        let text = format!("{} {}", brief.primary_topic, brief.hook);
        let vector = match self.similarity.embed(&text).await {
            Ok(v) => v,
            Err(e) => {
                warn!(brief_id = %brief.id, error = %e, "embedding failed; similarity check skipped");
                return None;
            }
        };
        match max_similarity(&vector, window) {
            Ok(sim) => Some(1.0 - sim),
            Err(e) => {
                warn!(brief_id = %brief.id, error = %e, "similarity comparison failed; check skipped");
                None
            }
        }
    }

    /// Run the gate over one batch.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::NoActiveWriters`] when the quota leaves room but no
    /// writer is active.
    pub async fn admit(&self, input: AdmissionInput<'_>) -> Result<EditorDecision, AdmissionError> {
        let capacity = capacity(input.weekly_count, input.max_per_week, self.per_cycle_cap);
        let mut decision = EditorDecision {
            capacity,
            ..EditorDecision::default()
        };

        if input.weekly_count >= input.max_per_week {
            info!(
                weekly_count = input.weekly_count,
                max_per_week = input.max_per_week,
                "weekly quota reached; no briefs examined"
            );
            decision.quota_reached = true;
            decision.deferred = input.briefs.to_vec();
            return Ok(decision);
        }
        if input.writers.is_empty() {
            return Err(AdmissionError::NoActiveWriters);
        }

        let mut cursor = 0usize;
        for brief in input.briefs {
            if decision.assignments.len() as u32 >= capacity {
                decision.deferred.push(brief.clone());
                continue;
            }

            if in_cooldown(&brief.primary_topic, input.history, input.now, self.config.cooldown_days) {
                debug!(topic = %brief.primary_topic, "rejected: cooldown");
                metrics::inc_brief_rejected(RejectionReason::Cooldown.as_str());
                decision.rejections.push(Rejection {
                    brief: brief.clone(),
                    reason: RejectionReason::Cooldown,
                    detail: format!(
                        "topic '{}' produced within the last {} days",
                        brief.primary_topic, self.config.cooldown_days
                    ),
                });
                continue;
            }

            let threshold = self.config.similarity_threshold;
            let measured = self.distance(brief, input.window).await;
            if let Some(distance) = measured {
                if is_too_similar(distance, threshold) {
                    debug!(topic = %brief.primary_topic, distance, "rejected: similarity");
                    metrics::inc_brief_rejected(RejectionReason::Similarity.as_str());
                    decision.rejections.push(Rejection {
                        brief: brief.clone(),
                        reason: RejectionReason::Similarity,
                        detail: format!("distance {distance:.3} < threshold {threshold:.2}"),
                    });
                    continue;
                }
            }

            let writer = &input.writers[cursor % input.writers.len()];
            cursor += 1;
            let (distance, similarity_note) = match measured {
                Some(d) => (d, format!("distance {d:.3} >= threshold {threshold:.2}")),
                None => (1.0, "similarity unavailable, admitted unchecked".to_string()),
            };
            decision.assignments.push(Assignment {
                id: uuid::Uuid::new_v4().to_string(),
                brief: brief.clone(),
                actor_id: writer.id.clone(),
                assigned_at: input.now,
                cooldown_passed: true,
                similarity_distance: distance,
                rationale: format!(
                    "cooldown clear; {similarity_note}; assigned to {} (score {:.2})",
                    writer.id, writer.performance_score
                ),
            });
        }

        info!(
            capacity,
            assigned = decision.assignments.len(),
            cooldown = decision.rejected_for(RejectionReason::Cooldown),
            similarity = decision.rejected_for(RejectionReason::Similarity),
            deferred = decision.deferred.len(),
            "admission decisions made"
        );
        Ok(decision)
    }
}
