//! Loading a [`CycleConfig`] from TOML.
//!
//! Every entry point parses, then validates; a config handed back from here
//! has passed [`validation::validate`]. Validation problems are reported all
//! at once, joined with `"; "`, in the same shape
//! [`CycleOrchestrator::new`](crate::CycleOrchestrator::new) uses.

use std::path::Path;

use super::validation::{self, ConfigError};
use super::CycleConfig;

/// Origin label used when no file backs the document.
const DEFAULTS_ORIGIN: &str = "<defaults>";

/// Read and validate the cycle document at `path`.
///
/// # Errors
///
/// - [`ConfigError::Io`] when the file cannot be read
/// - [`ConfigError::Parse`] when it is not a valid cycle document
/// - [`ConfigError::Validation`] listing every violated rule
pub fn load_from_file(path: &Path) -> Result<CycleConfig, ConfigError> {
    let origin = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        file: origin.clone(),
        source,
    })?;
    load_from_str(&content, &origin)
}

/// Parse and validate an in-memory cycle document.
///
/// `origin` is the label parse errors carry (a path, `"<defaults>"`, …).
/// An empty document yields the validated defaults.
///
/// # Errors
///
/// [`ConfigError::Parse`] or [`ConfigError::Validation`].
pub fn load_from_str(content: &str, origin: &str) -> Result<CycleConfig, ConfigError> {
    let config: CycleConfig = toml::from_str(content).map_err(|source| ConfigError::Parse {
        file: origin.to_string(),
        source,
    })?;
    checked(config)
}

/// Load the file named by `var`, or the validated defaults when `var` is
/// unset or blank.
///
/// # Errors
///
/// Same as [`load_from_file`] when the variable names a file.
pub fn load_from_env(var: &str) -> Result<CycleConfig, ConfigError> {
    match std::env::var(var) {
        Ok(path) if !path.trim().is_empty() => load_from_file(Path::new(path.trim())),
        _ => load_from_str("", DEFAULTS_ORIGIN),
    }
}

fn checked(config: CycleConfig) -> Result<CycleConfig, ConfigError> {
    match validation::validate(&config) {
        Ok(()) => Ok(config),
        Err(problems) => Err(ConfigError::Validation(
            problems
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;

    const WEEKLY_CYCLE: &str = r#"
[cycle]
name = "weekly"
batch_size = 5
per_cycle_cap = 2

[quota]
money = 3
authority = 1
trend = 1

[admission]
cooldown_days = 45
similarity_threshold = 0.25

[strategist]
research_queries = ["insurance trends"]

[observability]
log_format = "json"
"#;

    #[test]
    fn test_cycle_document_overrides_only_what_it_names() {
        let config = load_from_str(WEEKLY_CYCLE, "weekly.toml").expect("test: valid document");
        assert_eq!(config.cycle.name, "weekly");
        assert_eq!(config.cycle.per_cycle_cap, 2);
        assert_eq!(config.admission.cooldown_days, 45);
        assert_eq!(config.admission.embedding_window, 50);
        assert_eq!(config.strategist.research_queries, vec!["insurance trends"]);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_document_is_the_default_cycle() {
        let config = load_from_str("", DEFAULTS_ORIGIN).expect("test: defaults");
        assert_eq!(config, CycleConfig::default());
    }

    #[test]
    fn test_malformed_document_names_its_origin() {
        let err = load_from_str("[admission\ncooldown_days = 3", "broken.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"), "{err}");
    }

    #[test]
    fn test_wrongly_typed_field_is_a_parse_error() {
        let err = load_from_str("[cycle]\nbatch_size = \"five\"\n", "typed.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_every_violated_rule_is_reported_together() {
        let document = r#"
[quota]
money = 5
authority = 1
trend = 1

[providers]
retry_attempts = 0
"#;
        let err = load_from_str(document, "quota.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)), "{err:?}");
        let message = err.to_string();
        assert!(message.contains("quota"), "{message}");
        assert!(message.contains("providers.retry_attempts"), "{message}");
        assert!(message.contains("; "), "{message}");
    }

    #[test]
    fn test_file_on_disk_is_loaded_and_validated() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let good = dir.path().join("weekly.toml");
        std::fs::write(&good, WEEKLY_CYCLE).expect("test: write");
        assert_eq!(load_from_file(&good).expect("test: loads").cycle.name, "weekly");

        let bad = dir.path().join("zero-timeout.toml");
        std::fs::write(&bad, "[cycle]\nassignment_timeout_s = 0\n").expect("test: write");
        assert!(matches!(load_from_file(&bad), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_missing_file_is_an_io_error() {
        let err = load_from_file(Path::new("/nonexistent/cycle.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_variable_selects_the_file() {
        let dir = tempfile::tempdir().expect("test: tempdir");
        let path = dir.path().join("from-env.toml");
        std::fs::write(&path, WEEKLY_CYCLE).expect("test: write");
        std::env::set_var("CONTENT_CYCLE_LOADER_TEST_PATH", &path);

        let config = load_from_env("CONTENT_CYCLE_LOADER_TEST_PATH").expect("test: loads");
        assert_eq!(config.cycle.name, "weekly");
    }

    #[test]
    fn test_unset_env_variable_yields_defaults() {
        let config = load_from_env("CONTENT_CYCLE_TEST_CONFIG_NEVER_SET").expect("test: defaults");
        assert_eq!(config, CycleConfig::default());
    }
}
