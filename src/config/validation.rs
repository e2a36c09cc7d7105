//! Configuration validation engine.
//!
//! ## Responsibility
//! Validate semantic constraints on a parsed [`CycleConfig`] that cannot
//! be expressed through the type system alone (range checks, the quota sum,
//! window ordering).
//!
//! ## Guarantees
//! - Every validation rule has at least one test that triggers it
//! - Validation collects *all* errors before returning (no short-circuit)
//! - Error messages include the field path and the invalid value
//!
//! ## NOT Responsible For
//! - Parsing TOML (that belongs to `loader`)
//! - File I/O (that belongs to `loader`)

use super::CycleConfig;

/// Errors arising from configuration parsing, validation, or I/O.
///
/// # Panics
///
/// This type never panics.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing failed.
    #[error("Parse error in {file}: {source}")]
    Parse {
        /// Path of the file that failed to parse.
        file: String,
        /// Underlying TOML deserialization error.
        #[source]
        source: toml::de::Error,
    },

    /// One or more semantic validation rules failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A specific field has an out-of-range or contradictory value.
    #[error("Field '{field}' has invalid value {value}: {reason}")]
    InvalidField {
        /// Dot-separated field path (e.g., "admission.similarity_threshold").
        field: String,
        /// String representation of the invalid value.
        value: String,
        /// Human-readable explanation of the constraint.
        reason: String,
    },

    /// File I/O error.
    #[error("IO error reading {file}: {source}")]
    Io {
        /// Path of the file that could not be read.
        file: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl From<ConfigError> for crate::OrchestratorError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        field: field.into(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn check_unit_interval(errors: &mut Vec<ConfigError>, field: &str, value: f64) {
    if !(0.0..=1.0).contains(&value) {
        errors.push(invalid(field, value, "must be between 0.0 and 1.0"));
    }
}

/// Validate all semantic constraints on a [`CycleConfig`].
///
/// # Returns
///
/// - `Ok(())` if all constraints pass.
/// - `Err(Vec<ConfigError>)` with every violation found.
///
/// # Panics
///
/// This function never panics.
pub fn validate(config: &CycleConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    // ── Cycle ────────────────────────────────────────────────────────
    if config.cycle.batch_size == 0 {
        errors.push(invalid("cycle.batch_size", 0, "must be at least 1"));
    }
    if config.cycle.assignment_timeout_s == 0 {
        errors.push(invalid("cycle.assignment_timeout_s", 0, "must be at least 1"));
    }

    // ── Quota ────────────────────────────────────────────────────────
    if config.quota.total() != config.cycle.batch_size {
        errors.push(invalid(
            "quota",
            format!(
                "{}/{}/{}",
                config.quota.money, config.quota.authority, config.quota.trend
            ),
            &format!("tier counts must sum to cycle.batch_size ({})", config.cycle.batch_size),
        ));
    }

    // ── Admission ────────────────────────────────────────────────────
    if !(0.0..=2.0).contains(&config.admission.similarity_threshold) {
        errors.push(invalid(
            "admission.similarity_threshold",
            config.admission.similarity_threshold,
            "cosine distance must be between 0.0 and 2.0",
        ));
    }

    // ── Analyst ──────────────────────────────────────────────────────
    if config.analyst.scoring_window_days == 0 {
        errors.push(invalid("analyst.scoring_window_days", 0, "must be at least 1"));
    }
    if config.analyst.trend_recent_days == 0 {
        errors.push(invalid("analyst.trend_recent_days", 0, "must be at least 1"));
    }
    if config.analyst.trend_recent_days >= config.analyst.trend_older_days {
        errors.push(invalid(
            "analyst.trend_recent_days",
            config.analyst.trend_recent_days,
            "must be < trend_older_days",
        ));
    }
    if config.analyst.trend_threshold < 0.0 {
        errors.push(invalid(
            "analyst.trend_threshold",
            config.analyst.trend_threshold,
            "must not be negative",
        ));
    }
    check_unit_interval(&mut errors, "analyst.min_ctr", config.analyst.min_ctr);
    check_unit_interval(
        &mut errors,
        "analyst.max_bounce_rate",
        config.analyst.max_bounce_rate,
    );
    if config.analyst.min_engagement_s < 0.0 {
        errors.push(invalid(
            "analyst.min_engagement_s",
            config.analyst.min_engagement_s,
            "must not be negative",
        ));
    }

    // ── Strategist ───────────────────────────────────────────────────
    if config.strategist.seed_topics.len() < config.cycle.batch_size {
        errors.push(invalid(
            "strategist.seed_topics",
            config.strategist.seed_topics.len(),
            "must list at least cycle.batch_size topics",
        ));
    }
    if config.strategist.seed_topics.iter().any(|t| t.trim().is_empty()) {
        errors.push(invalid("strategist.seed_topics", "\"\"", "topics must not be empty"));
    }
    if config.strategist.research_concurrency == 0 {
        errors.push(invalid("strategist.research_concurrency", 0, "must be at least 1"));
    }

    // ── Embedding ────────────────────────────────────────────────────
    if config.embedding.dimensions == 0 {
        errors.push(invalid("embedding.dimensions", 0, "must be at least 1"));
    }
    if config.embedding.max_input_chars == 0 {
        errors.push(invalid("embedding.max_input_chars", 0, "must be at least 1"));
    }

    // ── Providers ────────────────────────────────────────────────────
    if config.providers.chat_model.trim().is_empty() {
        errors.push(invalid("providers.chat_model", "\"\"", "must not be empty"));
    }
    if config.providers.embedding_model.trim().is_empty() {
        errors.push(invalid("providers.embedding_model", "\"\"", "must not be empty"));
    }
    if config.providers.timeout_s == 0 {
        errors.push(invalid("providers.timeout_s", 0, "must be at least 1"));
    }
    if config.providers.retry_attempts == 0 {
        errors.push(invalid("providers.retry_attempts", 0, "must be at least 1"));
    }
    if config.providers.retry_base_ms > config.providers.retry_max_ms {
        errors.push(invalid(
            "providers.retry_base_ms",
            config.providers.retry_base_ms,
            "must be \u{2264} retry_max_ms",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_names(config: &CycleConfig) -> Vec<String> {
        match validate(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .into_iter()
                .filter_map(|e| match e {
                    ConfigError::InvalidField { field, .. } => Some(field),
                    _ => None,
                })
                .collect(),
        }
    }

    #[test]
    fn test_validate_default_config_passes() {
        assert!(validate(&CycleConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_quota_not_matching_batch_fails() {
        let mut config = CycleConfig::default();
        config.quota.money = 4;
        assert_eq!(field_names(&config), vec!["quota"]);
    }

    #[test]
    fn test_validate_batch_size_zero_fails() {
        let mut config = CycleConfig::default();
        config.cycle.batch_size = 0;
        config.quota.money = 0;
        config.quota.authority = 0;
        config.quota.trend = 0;
        assert!(field_names(&config).contains(&"cycle.batch_size".to_string()));
    }

    #[test]
    fn test_validate_similarity_threshold_out_of_range_fails() {
        let mut config = CycleConfig::default();
        config.admission.similarity_threshold = -0.1;
        assert_eq!(field_names(&config), vec!["admission.similarity_threshold"]);
    }

    #[test]
    fn test_validate_similarity_threshold_zero_passes() {
        let mut config = CycleConfig::default();
        config.admission.similarity_threshold = 0.0;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_trend_windows_must_be_ordered() {
        let mut config = CycleConfig::default();
        config.analyst.trend_recent_days = 60;
        assert_eq!(field_names(&config), vec!["analyst.trend_recent_days"]);
    }

    #[test]
    fn test_validate_bounce_rate_above_one_fails() {
        let mut config = CycleConfig::default();
        config.analyst.max_bounce_rate = 1.5;
        assert_eq!(field_names(&config), vec!["analyst.max_bounce_rate"]);
    }

    #[test]
    fn test_validate_too_few_seed_topics_fails() {
        let mut config = CycleConfig::default();
        config.strategist.seed_topics.truncate(2);
        assert_eq!(field_names(&config), vec!["strategist.seed_topics"]);
    }

    #[test]
    fn test_validate_retry_base_exceeds_max_fails() {
        let mut config = CycleConfig::default();
        config.providers.retry_base_ms = 10_000;
        assert_eq!(field_names(&config), vec!["providers.retry_base_ms"]);
    }

    #[test]
    fn test_validate_empty_chat_model_fails() {
        let mut config = CycleConfig::default();
        config.providers.chat_model = "  ".into();
        assert_eq!(field_names(&config), vec!["providers.chat_model"]);
    }

    #[test]
    fn test_validate_collects_multiple_errors() {
        let mut config = CycleConfig::default();
        config.embedding.dimensions = 0;
        config.providers.retry_attempts = 0;
        config.strategist.research_concurrency = 0;
        let errors = validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3, "all violations must be reported: {errors:?}");
    }

    #[test]
    fn test_config_error_invalid_field_display() {
        let err = invalid("embedding.dimensions", 0, "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Field 'embedding.dimensions' has invalid value 0: must be at least 1"
        );
    }

    #[test]
    fn test_config_error_converts_to_configuration() {
        let err: crate::OrchestratorError = ConfigError::Validation("bad".into()).into();
        assert_eq!(err.kind(), "configuration");
    }
}
