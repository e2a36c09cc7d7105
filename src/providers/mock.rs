//! Scripted providers for tests and offline runs.
//!
//! [`MockLlm`] answers structured calls by schema name, either from a queue
//! of fixed responses (the last one repeats) or from a handler that sees the
//! user prompt. [`StaticSearch`] answers queries from a fixed table.

use super::{
    GenerationConstraints, LlmProvider, ProviderError, SearchProvider, SearchResult,
    StructuredSchema,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

type Handler = Arc<dyn Fn(&str) -> Result<Value, ProviderError> + Send + Sync>;

enum Script {
    Queue(VecDeque<Result<Value, ProviderError>>),
    Handler(Handler),
}

impl Script {
    fn next(&mut self, user_prompt: &str) -> Option<Result<Value, ProviderError>> {
        match self {
            Self::Queue(queue) => {
                if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
            }
            Self::Handler(handler) => Some(handler(user_prompt)),
        }
    }
}

/// Scripted LLM keyed by schema name.
#[derive(Default)]
pub struct MockLlm {
    scripts: Mutex<HashMap<String, Script>>,
    text: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockLlm {
    /// Empty script; every call fails until configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful structured response for `schema_name`.
    pub fn on_structured(self, schema_name: &str, value: Value) -> Self {
        self.push(schema_name, Ok(value));
        self
    }

    /// Queue a failing structured response for `schema_name`.
    pub fn on_structured_err(self, schema_name: &str, err: ProviderError) -> Self {
        self.push(schema_name, Err(err));
        self
    }

    /// Answer `schema_name` with a handler over the user prompt.
    pub fn on_structured_with<F>(self, schema_name: &str, handler: F) -> Self
    where
        F: Fn(&str) -> Result<Value, ProviderError> + Send + Sync + 'static,
    {
        self.scripts
            .lock()
            .insert(schema_name.to_string(), Script::Handler(Arc::new(handler)));
        self
    }

    /// Queue a free-text response.
    pub fn on_text(self, text: impl Into<String>) -> Self {
        self.text.lock().push_back(Ok(text.into()));
        self
    }

    /// Number of calls seen for `schema_name` (`"text"` for free text).
    pub fn calls(&self, schema_name: &str) -> usize {
        self.calls.lock().get(schema_name).copied().unwrap_or(0)
    }

    /// Total calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    fn push(&self, schema_name: &str, response: Result<Value, ProviderError>) {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(schema_name) {
            Some(Script::Queue(queue)) => queue.push_back(response),
            _ => {
                scripts.insert(
                    schema_name.to_string(),
                    Script::Queue(VecDeque::from([response])),
                );
            }
        }
    }

    fn record(&self, name: &str) {
        *self.calls.lock().entry(name.to_string()).or_insert(0) += 1;
    }

    /// Canned responses for every schema the cycle requests.
    ///
    /// The brief batch always satisfies the default 3/1/1 quota; drafts echo
    /// the `Topic:` line of the prompt into the title.
    pub fn content_defaults() -> Self {
        Self::new()
            .on_structured("BriefBatch", default_brief_batch())
            .on_structured_with("DraftCopy", |prompt| {
                let topic = prompt_field(prompt, "Topic").unwrap_or("Untitled topic");
                Ok(json!({
                    "title": format!("{topic}: what to know"),
                    "body": format!(
                        "{topic} explained.\n\nWe compare the options side by side.\n\nHere is how to choose."
                    ),
                    "summary": format!("A practical look at {topic}."),
                }))
            })
            .on_structured_with("RefinedCopy", |prompt| {
                let title = prompt_field(prompt, "Title").unwrap_or("Refined article");
                let body = prompt_section(prompt, "Body").unwrap_or("Refined body.");
                Ok(json!({
                    "title": title,
                    "body": format!("{body}\n\nBottom line: pick what fits your budget."),
                    "summary": format!("Refined: {title}"),
                }))
            })
            .on_structured("OptimizationPlan", json!({
                "cta_labels": ["Compare quotes", "See today's rates", "Get started"],
                "faq_items": [
                    {"question": "How long does it take?", "answer": "Usually a few minutes."},
                    {"question": "Is it free to compare?", "answer": "Yes."}
                ],
                "summary": null
            }))
    }
}

/// Value of a `Name: value` line in a prompt.
pub fn prompt_field<'a>(prompt: &'a str, name: &str) -> Option<&'a str> {
    let prefix = format!("{name}:");
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Text following a `Name:` header line up to the end of the prompt.
pub fn prompt_section<'a>(prompt: &'a str, name: &str) -> Option<&'a str> {
    let header = format!("{name}:\n");
    prompt
        .find(header.as_str())
        .map(|idx| prompt[idx + header.len()..].trim())
        .filter(|v| !v.is_empty())
}

fn default_brief_batch() -> Value {
    json!({
        "briefs": [
            {
                "primary_topic": "Best term life insurance for seniors",
                "tier": "money",
                "hook": "benefit",
                "format": "comparison",
                "target_length": 1800,
                "target_carriers": ["Northwind Life", "Contoso Mutual"],
                "rationale": "High-converting comparison gap"
            },
            {
                "primary_topic": "Cheapest renters insurance for students",
                "tier": "money",
                "hook": "price",
                "format": "comparison",
                "target_length": 1500,
                "target_carriers": ["Fabrikam Home"],
                "rationale": "Underserved carrier in money tier"
            },
            {
                "primary_topic": "Pet insurance for older dogs",
                "tier": "money",
                "hook": "benefit",
                "format": "review",
                "target_length": 1600,
                "target_carriers": ["Tailspin Pet"],
                "rationale": "Research signal: rising searches"
            },
            {
                "primary_topic": "How deductibles actually work",
                "tier": "authority",
                "hook": "curiosity",
                "format": "guide",
                "target_length": 2200,
                "target_carriers": [],
                "rationale": "Evergreen explainer gap"
            },
            {
                "primary_topic": "Climate risk and home premiums this year",
                "tier": "trend",
                "hook": "urgency",
                "format": "news",
                "target_length": 1000,
                "target_carriers": ["Fabrikam Home"],
                "rationale": "Trending topic"
            }
        ]
    })
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate_text(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _constraints: &GenerationConstraints,
    ) -> Result<String, ProviderError> {
        self.record("text");
        let mut text = self.text.lock();
        let next = if text.len() > 1 {
            text.pop_front()
        } else {
            text.front().cloned()
        };
        next.unwrap_or_else(|| Err(ProviderError::Unavailable("no scripted text".into())))
    }

    async fn generate_structured(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
        schema: &StructuredSchema,
    ) -> Result<Value, ProviderError> {
        self.record(&schema.name);
        let mut scripts = self.scripts.lock();
        scripts
            .get_mut(&schema.name)
            .and_then(|s| s.next(user_prompt))
            .unwrap_or_else(|| {
                Err(ProviderError::Unavailable(format!(
                    "no scripted response for {}",
                    schema.name
                )))
            })
    }
}

/// Search provider answering from a fixed table.
#[derive(Default)]
pub struct StaticSearch {
    results: HashMap<String, Vec<SearchResult>>,
    failing: HashSet<String>,
    calls: Mutex<usize>,
}

impl StaticSearch {
    /// Empty table: every query returns no results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `titles`.
    pub fn with_results(mut self, query: &str, titles: &[&str]) -> Self {
        let hits = titles
            .iter()
            .map(|t| SearchResult {
                title: (*t).to_string(),
                snippet: String::new(),
                url: format!("https://search.invalid/{}", t.replace(' ', "-")),
            })
            .collect();
        self.results.insert(query.to_string(), hits);
        self
    }

    /// Make `query` fail with a server error.
    pub fn failing(mut self, query: &str) -> Self {
        self.failing.insert(query.to_string());
        self
    }

    /// Queries served so far.
    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        *self.calls.lock() += 1;
        if self.failing.contains(query) {
            return Err(ProviderError::Server {
                status: 503,
                body: "search backend down".into(),
            });
        }
        Ok(self.results.get(query).cloned().unwrap_or_default())
    }
}
