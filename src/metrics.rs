//! Prometheus metrics for the content cycle.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`record_state_latency`, `inc_cycle`, …) are no-ops if `init_metrics` was
//! never called, so a cycle is always safe to run without observability.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `content_cycle_runs_total` | Counter | `outcome` |
//! | `content_cycle_briefs_rejected_total` | Counter | `reason` |
//! | `content_cycle_artifacts_produced_total` | Counter | `tier` |
//! | `content_cycle_assignment_failures_total` | Counter | `kind` |
//! | `content_cycle_state_duration_seconds` | Histogram | `state` |

use crate::OrchestratorError;
use prometheus::{
    core::Collector, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

/// All Prometheus collectors for the cycle, stored in a single [`OnceLock`].
pub struct Metrics {
    /// Registry that owns all metric descriptors.
    pub registry: Registry,
    /// Finished cycles by outcome (`completed`, `paused`, `quota_reached`, `failed`).
    pub cycles_total: CounterVec,
    /// Briefs turned away by the editor, by reason.
    pub briefs_rejected: CounterVec,
    /// Artifacts persisted, by tier.
    pub artifacts_produced: CounterVec,
    /// Per-assignment failures by error kind.
    pub assignment_failures: CounterVec,
    /// Time spent per cycle state.
    pub state_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn counter(registry: &Registry, name: &str, help: &str, label: &str) -> Result<CounterVec, OrchestratorError> {
    let c = CounterVec::new(Opts::new(name, help), &[label])
        .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;
    Ok(c)
}

fn build(prefix: &str) -> Result<Metrics, OrchestratorError> {
    let registry = Registry::new();

    let cycles_total = counter(
        &registry,
        &format!("{prefix}_runs_total"),
        "Finished cycles by outcome",
        "outcome",
    )?;
    let briefs_rejected = counter(
        &registry,
        &format!("{prefix}_briefs_rejected_total"),
        "Briefs rejected by admission control",
        "reason",
    )?;
    let artifacts_produced = counter(
        &registry,
        &format!("{prefix}_artifacts_produced_total"),
        "Artifacts persisted",
        "tier",
    )?;
    let assignment_failures = counter(
        &registry,
        &format!("{prefix}_assignment_failures_total"),
        "Assignments that failed inside their boundary",
        "kind",
    )?;

    let state_duration = HistogramVec::new(
        HistogramOpts::new(
            format!("{prefix}_state_duration_seconds"),
            "Time spent per cycle state",
        ),
        &["state"],
    )
    .map_err(|e| OrchestratorError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(state_duration.clone()))
        .map_err(|e| OrchestratorError::Other(format!("metrics registration failed: {e}")))?;

    Ok(Metrics {
        registry,
        cycles_total,
        briefs_rejected,
        artifacts_produced,
        assignment_failures,
        state_duration,
    })
}

/// Initialise all collectors in a private registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails.
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = build("content_cycle")?;
    // First writer wins; a racing bundle has identical descriptors.
    let _ = METRICS.set(metrics);
    Ok(())
}

fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

fn inc(vec: impl Fn(&Metrics) -> &CounterVec, label: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = vec(m).get_metric_with_label_values(&[label]) {
            c.inc();
        }
    }
}

/// Record time spent in one cycle state.
///
/// # Panics
///
/// This function never panics.
pub fn record_state_latency(state: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.state_duration.get_metric_with_label_values(&[state]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Count a finished cycle.
pub fn inc_cycle(outcome: &str) {
    inc(|m| &m.cycles_total, outcome);
}

/// Count a brief rejected by the editor (`cooldown` / `similarity`).
pub fn inc_brief_rejected(reason: &str) {
    inc(|m| &m.briefs_rejected, reason);
}

/// Count a persisted artifact.
pub fn inc_artifact_produced(tier: &str) {
    inc(|m| &m.artifacts_produced, tier);
}

/// Count an isolated assignment failure.
pub fn inc_assignment_failure(kind: &str) {
    inc(|m| &m.assignment_failures, kind);
}

/// Gather all metric families from the registry.
///
/// Returns an empty `Vec` if metrics have not been initialised.
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    metrics().map_or_else(Vec::new, |m| m.registry.gather())
}

/// Encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string if metrics have not been initialised or if
/// encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let families = gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Structured snapshot of the counters.
#[derive(Debug, Default)]
pub struct MetricsSummary {
    /// Cycles keyed by outcome.
    pub cycles_total: HashMap<String, u64>,
    /// Rejections keyed by reason.
    pub briefs_rejected: HashMap<String, u64>,
    /// Assignment failures keyed by kind.
    pub assignment_failures: HashMap<String, u64>,
}

fn counter_values(vec: &CounterVec, label: &str) -> HashMap<String, u64> {
    let mut out = HashMap::new();
    for family in vec.collect() {
        for metric in family.get_metric() {
            let key = metric
                .get_label()
                .iter()
                .find(|l| l.get_name() == label)
                .map_or("unknown", |l| l.get_value());
            out.insert(key.to_string(), metric.get_counter().get_value() as u64);
        }
    }
    out
}

/// Current counter values; zeroed if metrics have not been initialised.
///
/// # Panics
///
/// This function never panics.
pub fn get_metrics_summary() -> MetricsSummary {
    let Some(m) = metrics() else {
        return MetricsSummary::default();
    };
    MetricsSummary {
        cycles_total: counter_values(&m.cycles_total, "outcome"),
        briefs_rejected: counter_values(&m.briefs_rejected, "reason"),
        assignment_failures: counter_values(&m.assignment_failures, "kind"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent_second_call_is_noop() {
        let _ = init_metrics();
        assert!(init_metrics().is_ok(), "second call must be a no-op returning Ok");
    }

    #[test]
    fn test_helpers_before_init_do_not_panic() {
        record_state_latency("pre-init", Duration::from_millis(5));
        inc_cycle("completed");
        let _ = gather_metrics();
    }

    #[test]
    fn test_isolated_bundle_counts_rejections_by_reason() {
        let m = build("t_reject").expect("test: bundle builds");
        for reason in ["cooldown", "cooldown", "similarity"] {
            m.briefs_rejected
                .get_metric_with_label_values(&[reason])
                .expect("test: label ok")
                .inc();
        }
        let values = counter_values(&m.briefs_rejected, "reason");
        assert_eq!(values.get("cooldown"), Some(&2));
        assert_eq!(values.get("similarity"), Some(&1));
    }

    #[test]
    fn test_isolated_bundle_records_state_latency() {
        let m = build("t_state").expect("test: bundle builds");
        m.state_duration
            .get_metric_with_label_values(&["editor"])
            .expect("test: label ok")
            .observe(0.005);
        let families = m.registry.gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "t_state_state_duration_seconds")
            .expect("test: histogram family present");
        assert_eq!(family.get_metric()[0].get_histogram().get_sample_count(), 1);
    }

    #[test]
    fn test_global_counters_appear_in_summary() {
        let _ = init_metrics();
        inc_assignment_failure("summary-test");
        let summary = get_metrics_summary();
        assert!(summary.assignment_failures.get("summary-test").copied().unwrap_or(0) >= 1);
        assert!(gather_metrics().contains("content_cycle_assignment_failures_total"));
    }
}
