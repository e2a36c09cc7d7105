//! Provider contracts for the external AI, embedding and search services.
//!
//! Implementations must be thread-safe (Send + Sync) for use across tasks.
//! The traits are object-safe to allow dynamic dispatch via `Arc<dyn _>`.
//!
//! - [`openai::OpenAiClient`]: OpenAI-compatible HTTP backend (LLM + embeddings)
//! - [`mock::MockLlm`] / [`mock::StaticSearch`]: scripted, offline providers
//!
//! Only the input/output contract matters to the cycle; schema violations
//! are a distinct error kind from network and timeout failures.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by provider calls.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Credentials or endpoint configuration are missing.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The call exceeded its time budget.
    #[error("provider call timed out after {secs}s")]
    Timeout {
        /// Budget in seconds.
        secs: u64,
    },

    /// HTTP 429.
    #[error("rate limited ({status}): {body}")]
    RateLimited {
        /// HTTP status.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// HTTP 5xx.
    #[error("server error ({status}): {body}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Any other non-success status (client error). Never retried.
    #[error("request rejected ({status}): {body}")]
    Rejected {
        /// HTTP status.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Structured output did not match the requested schema.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// The response was not in the expected envelope.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Connection-level failure.
    #[error("network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Only rate limits and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Server { .. })
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let mut body: String = body.into();
        if body.len() > 512 {
            let cut = crate::similarity::truncate_input(&body, 512).len();
            body.truncate(cut);
        }
        match status {
            429 => Self::RateLimited { status, body },
            500..=599 => Self::Server { status, body },
            _ => Self::Rejected { status, body },
        }
    }
}

/// Generation knobs passed with every LLM call.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationConstraints {
    /// Upper bound on generated tokens.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

/// JSON Schema the structured output must satisfy.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredSchema {
    /// Schema name; also the key scripted providers respond by.
    pub name: String,
    /// JSON Schema document.
    pub schema: serde_json::Value,
    /// Generation knobs.
    pub constraints: GenerationConstraints,
}

impl StructuredSchema {
    /// Derive the schema for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Malformed`] if the schema cannot be rendered
    /// as JSON.
    pub fn for_type<T: JsonSchema>(constraints: GenerationConstraints) -> Result<Self, ProviderError> {
        let root = schemars::schema_for!(T);
        let schema = serde_json::to_value(&root)
            .map_err(|e| ProviderError::Malformed(format!("schema render failed: {e}")))?;
        Ok(Self {
            name: T::schema_name(),
            schema,
            constraints,
        })
    }
}

/// Large-language-model provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Free-text generation.
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, ProviderError>;

    /// Structured generation; the returned value is *claimed* to satisfy
    /// `schema` and is checked by [`generate_typed`].
    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &StructuredSchema,
    ) -> Result<serde_json::Value, ProviderError>;
}

/// Structured generation decoded into `T`.
///
/// # Errors
///
/// - Any [`ProviderError`] from the provider.
/// - [`ProviderError::SchemaViolation`] if the value does not decode as `T`.
pub async fn generate_typed<T>(
    llm: &dyn LlmProvider,
    system_prompt: &str,
    user_prompt: &str,
    constraints: GenerationConstraints,
) -> Result<T, ProviderError>
where
    T: DeserializeOwned + JsonSchema,
{
    let schema = StructuredSchema::for_type::<T>(constraints)?;
    let value = llm
        .generate_structured(system_prompt, user_prompt, &schema)
        .await?;
    serde_json::from_value(value)
        .map_err(|e| ProviderError::SchemaViolation(format!("{}: {e}", schema.name)))
}

/// Embedding provider with a stable dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Encode `text` as a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

/// One research hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Result title; treated as a candidate topic.
    pub title: String,
    /// Snippet text.
    pub snippet: String,
    /// Source URL.
    pub url: String,
}

/// Research / search provider. Failures are non-fatal to the cycle.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one query.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockLlm;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Headline {
        title: String,
    }

    #[test]
    fn test_from_status_classifies() {
        assert!(matches!(ProviderError::from_status(429, ""), ProviderError::RateLimited { .. }));
        assert!(matches!(ProviderError::from_status(502, ""), ProviderError::Server { .. }));
        assert!(matches!(ProviderError::from_status(401, ""), ProviderError::Rejected { .. }));
    }

    #[test]
    fn test_only_rate_limit_and_server_are_retryable() {
        assert!(ProviderError::from_status(429, "").is_retryable());
        assert!(ProviderError::from_status(500, "").is_retryable());
        assert!(!ProviderError::from_status(400, "").is_retryable());
        assert!(!ProviderError::SchemaViolation("x".into()).is_retryable());
        assert!(!ProviderError::Timeout { secs: 1 }.is_retryable());
        assert!(!ProviderError::Unavailable("k".into()).is_retryable());
    }

    #[test]
    fn test_from_status_truncates_long_bodies() {
        let err = ProviderError::from_status(500, "x".repeat(5000));
        match err {
            ProviderError::Server { body, .. } => assert_eq!(body.len(), 512),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_schema_for_type_uses_type_name() {
        let schema = StructuredSchema::for_type::<Headline>(GenerationConstraints::default())
            .expect("test: schema renders");
        assert_eq!(schema.name, "Headline");
        assert!(schema.schema.get("properties").is_some());
    }

    #[tokio::test]
    async fn test_generate_typed_decodes_matching_value() {
        let llm = MockLlm::new().on_structured("Headline", json!({"title": "Hello"}));
        let out: Headline = generate_typed(&llm, "sys", "user", GenerationConstraints::default())
            .await
            .expect("test: decodes");
        assert_eq!(out.title, "Hello");
    }

    #[tokio::test]
    async fn test_generate_typed_reports_schema_violation() {
        let llm = MockLlm::new().on_structured("Headline", json!({"heading": 3}));
        let err = generate_typed::<Headline>(&llm, "sys", "user", GenerationConstraints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::SchemaViolation(_)));
    }
}
