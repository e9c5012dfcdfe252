use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::errors::ServiceError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial delay between retries
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Factor to multiply delay by after each attempt
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    /// Single attempt, no sleeping.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1_000
}
fn default_backoff_factor() -> f64 {
    2.0
}

/// Retry policy for determining if an error is retryable
pub trait RetryPolicy<E> {
    fn is_retryable(&self, error: &E) -> bool;
}

/// Retries only row contention; every other failure is definitive.
pub struct ContentionPolicy;

impl RetryPolicy<ServiceError> for ContentionPolicy {
    fn is_retryable(&self, error: &ServiceError) -> bool {
        error.is_transient()
    }
}

/// Execute an async function with retries
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    policy: impl RetryPolicy<E>,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(config.initial_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("Operation succeeded after {} attempts", attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !policy.is_retryable(&error) {
                    if attempts > 1 {
                        warn!("Operation failed after {} attempts: {}", attempts, error);
                    }
                    return Err(error);
                }

                warn!(
                    "Attempt {} failed: {}. Retrying in {:?}...",
                    attempts, error, delay
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor).min(max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Retries store calls that lost a row-level race.
pub async fn retry_contention<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    with_retry(config, ContentionPolicy, operation).await
}
