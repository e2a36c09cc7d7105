//! Retry, timeout and bounded fan-out for provider calls.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use content_cycle_orchestrator::resilience::{CallPolicy, RetryPolicy};
//!
//! let policy = CallPolicy::new(Duration::from_secs(30), RetryPolicy::exponential(3, Duration::from_millis(500)));
//! let text = policy.run("llm.generate_text", || client.send_chat(&request)).await?;
//! ```
//!
//! Only rate-limit (429) and 5xx responses are retried; client and schema
//! errors surface on the first attempt.

use crate::providers::ProviderError;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    /// Backoff between attempts.
    pub strategy: RetryStrategy,
}

/// Retry backoff strategy
#[derive(Clone, Debug)]
pub enum RetryStrategy {
    /// Fixed delay between retries
    Fixed(Duration),
    /// Exponential backoff (delay doubles each time)
    Exponential {
        /// Delay before the second attempt.
        initial_delay: Duration,
        /// Upper bound for any single delay.
        max_delay: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
    },
    /// Linear backoff (delay increases linearly)
    Linear {
        /// Delay before the second attempt.
        initial_delay: Duration,
        /// Added per subsequent attempt.
        increment: Duration,
    },
}

impl RetryPolicy {
    /// Create policy with fixed delay
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Fixed(delay),
        }
    }

    /// Create policy with exponential backoff
    pub fn exponential(max_attempts: usize, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Exponential {
                initial_delay,
                max_delay: Duration::from_secs(60),
                multiplier: 2.0,
            },
        }
    }

    /// Cap the exponential delay. No-op for other strategies.
    pub fn with_max_delay(mut self, cap: Duration) -> Self {
        if let RetryStrategy::Exponential { max_delay, .. } = &mut self.strategy {
            *max_delay = cap;
        }
        self
    }

    /// Create policy with linear backoff
    pub fn linear(max_attempts: usize, initial_delay: Duration, increment: Duration) -> Self {
        Self {
            max_attempts,
            strategy: RetryStrategy::Linear {
                initial_delay,
                increment,
            },
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let attempt = attempt.max(1);
        match &self.strategy {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential {
                initial_delay,
                max_delay,
                multiplier,
            } => {
                let delay =
                    initial_delay.as_millis() as f64 * multiplier.powi((attempt - 1) as i32);
                Duration::from_millis(delay as u64).min(*max_delay)
            }
            RetryStrategy::Linear {
                initial_delay,
                increment,
            } => *initial_delay + *increment * (attempt as u32 - 1),
        }
    }
}

/// Conditional retry - only retry if predicate returns true
pub async fn retry_if<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut f: F,
    mut should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(attempt = attempt, "retry: operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(error = %e, "retry: error is not retryable");
                    return Err(e);
                }

                if attempt >= policy.max_attempts {
                    warn!(attempts = attempt, error = %e, "retry: all attempts exhausted");
                    return Err(e);
                }

                let delay = with_jitter(policy.calculate_delay(attempt));
                warn!(
                    attempt = attempt,
                    max = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retry: operation failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Retry with jitter to prevent thundering herd
pub fn with_jitter(duration: Duration) -> Duration {
    use rand::Rng;
    let quarter = duration.as_millis() / 4;
    if quarter == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0..quarter);
    duration + Duration::from_millis(jitter as u64)
}

/// Bound a provider future by `limit`.
///
/// # Errors
///
/// Returns [`ProviderError::Timeout`] when the budget elapses; otherwise the
/// future's own result.
pub async fn with_timeout<T, Fut>(limit: Duration, fut: Fut) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout {
            secs: limit.as_secs(),
        }),
    }
}

/// Timeout per attempt plus retry restricted to retryable provider errors.
#[derive(Clone, Debug)]
pub struct CallPolicy {
    /// Budget for a single attempt.
    pub timeout: Duration,
    /// Backoff between attempts.
    pub retry: RetryPolicy,
}

impl CallPolicy {
    /// Create a call policy.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        Self { timeout, retry }
    }

    /// Run `f` under the policy.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] once retries are exhausted, or the
    /// first non-retryable one.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let limit = self.timeout;
        let result = retry_if(
            &self.retry,
            || with_timeout(limit, f()),
            ProviderError::is_retryable,
        )
        .await;
        if let Err(e) = &result {
            debug!(operation = operation, error = %e, "provider call failed");
        }
        result
    }
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(30),
            RetryPolicy::exponential(3, Duration::from_millis(500)).with_max_delay(Duration::from_secs(8)),
        )
    }
}

/// Every sub-operation of a fan-out failed.
#[derive(Debug, Error, PartialEq)]
#[error("all {attempted} sub-operations failed")]
pub struct FanOutError {
    /// Number of sub-operations attempted.
    pub attempted: usize,
}

/// Run `f` over `inputs` with at most `concurrency` in flight.
///
/// A failing sub-operation contributes `None`; the batch succeeds as long as
/// at least one sub-operation succeeded. Output order matches input order.
///
/// # Errors
///
/// Returns [`FanOutError`] when every sub-operation failed. An empty input
/// yields `Ok(vec![])`.
pub async fn bounded_fan_out<I, F, Fut, T, E>(
    inputs: Vec<I>,
    concurrency: usize,
    f: F,
) -> Result<Vec<Option<T>>, FanOutError>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempted = inputs.len();
    if attempted == 0 {
        return Ok(Vec::new());
    }

    let mut indexed: Vec<(usize, Option<T>)> = stream::iter(inputs.into_iter().enumerate())
        .map(|(idx, input)| {
            let fut = f(input);
            async move {
                match fut.await {
                    Ok(v) => (idx, Some(v)),
                    Err(e) => {
                        warn!(index = idx, error = %e, "fan-out sub-operation failed");
                        (idx, None)
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    indexed.sort_by_key(|(idx, _)| *idx);
    let results: Vec<Option<T>> = indexed.into_iter().map(|(_, v)| v).collect();
    if results.iter().all(Option::is_none) {
        return Err(FanOutError { attempted });
    }
    Ok(results)
}
