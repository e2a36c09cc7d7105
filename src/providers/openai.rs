//! OpenAI-compatible HTTP provider (chat completions + embeddings).
//!
//! ## Environment Variables
//!
//! - `OPENAI_API_KEY`: read lazily on first call and cached; a missing key
//!   surfaces as [`ProviderError::Unavailable`] at call time, never at
//!   construction.
//!
//! Every request runs under the client's [`CallPolicy`]: a per-attempt
//! timeout and exponential backoff on 429/5xx only.

use super::{
    EmbeddingProvider, GenerationConstraints, LlmProvider, ProviderError, StructuredSchema,
};
use crate::resilience::CallPolicy;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
struct CachedKey {
    key: String,
    fetched_at: Instant,
}

/// Lazily resolved API key with an expiry.
///
/// Owned by the client so nothing reads the environment ad hoc.
#[derive(Debug)]
pub struct CredentialCache {
    env_var: String,
    explicit: Option<String>,
    ttl: Duration,
    cached: Mutex<Option<CachedKey>>,
}

impl CredentialCache {
    /// Resolve from `env_var`, re-reading after `ttl`.
    pub fn from_env(env_var: impl Into<String>, ttl: Duration) -> Self {
        Self {
            env_var: env_var.into(),
            explicit: None,
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Use a fixed key; never touches the environment.
    pub fn fixed(key: impl Into<String>) -> Self {
        Self {
            env_var: String::new(),
            explicit: Some(key.into()),
            ttl: Duration::MAX,
            cached: Mutex::new(None),
        }
    }

    /// Current key.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Unavailable`] when no key is configured.
    pub fn resolve(&self) -> Result<String, ProviderError> {
        if let Some(key) = &self.explicit {
            return Ok(key.clone());
        }
        let mut cached = self.cached.lock();
        if let Some(entry) = cached.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.key.clone());
            }
        }
        let key = std::env::var(&self.env_var)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::Unavailable(format!("{} not set", self.env_var)))?;
        *cached = Some(CachedKey {
            key: key.clone(),
            fetched_at: Instant::now(),
        });
        Ok(key)
    }

    /// Drop the cached key (e.g. after a 401).
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible client implementing [`LlmProvider`] and [`EmbeddingProvider`].
///
/// ## Example
///
/// ```no_run
/// use content_cycle_orchestrator::providers::openai::OpenAiClient;
/// use std::sync::Arc;
///
/// let client = Arc::new(
///     OpenAiClient::new("gpt-4o-mini", "text-embedding-3-small")
///         .with_base_url("http://localhost:8000/v1")
/// );
/// ```
pub struct OpenAiClient {
    client: reqwest::Client,
    credentials: CredentialCache,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    policy: CallPolicy,
}

impl OpenAiClient {
    /// Create a client reading `OPENAI_API_KEY` lazily.
    pub fn new(chat_model: impl Into<String>, embedding_model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials: CredentialCache::from_env("OPENAI_API_KEY", Duration::from_secs(3600)),
            base_url: DEFAULT_BASE_URL.to_string(),
            chat_model: chat_model.into(),
            embedding_model: embedding_model.into(),
            policy: CallPolicy::default(),
        }
    }

    /// Point at another OpenAI-compatible server.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the credential source.
    pub fn with_credentials(mut self, credentials: CredentialCache) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the timeout / retry policy.
    pub fn with_policy(mut self, policy: CallPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let key = self.credentials.resolve()?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {key}"))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout {
                        secs: self.policy.timeout.as_secs(),
                    }
                } else {
                    ProviderError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status.as_u16() == 401 {
                self.credentials.invalidate();
            }
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), text));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("failed to parse response: {e}")))
    }

    async fn chat(&self, request: &ChatRequest<'_>) -> Result<String, ProviderError> {
        let response: ChatResponse = self
            .policy
            .run("llm.chat", || self.post_json("/chat/completions", request))
            .await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Malformed("no choices in response".into()))
    }
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        constraints: &GenerationConstraints,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: constraints.temperature,
            max_tokens: constraints.max_tokens,
            response_format: None,
        };
        self.chat(&request).await
    }

    async fn generate_structured(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &StructuredSchema,
    ) -> Result<serde_json::Value, ProviderError> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            temperature: schema.constraints.temperature,
            max_tokens: schema.constraints.max_tokens,
            response_format: Some(serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "schema": schema.schema,
                }
            })),
        };
        let content = self.chat(&request).await?;
        debug!(schema = %schema.name, bytes = content.len(), "structured response received");
        serde_json::from_str(&content)
            .map_err(|e| ProviderError::SchemaViolation(format!("{}: not JSON: {e}", schema.name)))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: text,
        };
        let response: EmbeddingResponse = self
            .policy
            .run("embedding", || self.post_json("/embeddings", &request))
            .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::Malformed("no embedding in response".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_credentials_resolve() {
        let creds = CredentialCache::fixed("sk-test");
        assert_eq!(creds.resolve().ok().as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_missing_env_credentials_are_unavailable() {
        let creds = CredentialCache::from_env(
            "CONTENT_CYCLE_TEST_KEY_THAT_IS_NEVER_SET",
            Duration::from_secs(60),
        );
        assert!(matches!(creds.resolve(), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = OpenAiClient::new("m", "e").with_base_url("http://localhost:9000/v1/");
        assert_eq!(client.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_chat_request_omits_unset_knobs() {
        let req = ChatRequest {
            model: "m",
            messages: vec![],
            temperature: None,
            max_tokens: None,
            response_format: None,
        };
        let json = serde_json::to_value(&req).expect("test: serialize");
        assert!(json.get("temperature").is_none());
        assert!(json.get("response_format").is_none());
    }
}
