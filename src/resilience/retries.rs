//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a normalized error is worth another attempt
//! - Execute retries with exponential backoff
//!
//! # Design Decisions
//! - `max_attempts` bounds total attempts; the first call is attempt 1
//! - Retry eligibility comes from the normalizer's `retryable` flag unless a
//!   policy supplies its own predicate
//! - Waits are `tokio::time::sleep`, never blocking
//! - Which methods may be retried at all is decided by the caller

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::ApiError;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

type RetryPredicate = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

/// Retry policy for one logical request.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
    predicate: Option<RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay: Duration::MAX,
            jitter: false,
            predicate: None,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        if !config.enabled {
            return Self::none();
        }
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
            predicate: None,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the default retryability check.
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ApiError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn is_retryable(&self, error: &ApiError) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(error),
            None => error.retryable,
        }
    }

    /// Delay between attempt `attempt` and the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("custom_predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Run `attempt` until it succeeds, fails permanently, or attempts run out.
///
/// The closure receives the 1-based attempt number.
pub async fn execute_with_retry<T, E, F, Fut>(mut attempt: F, policy: &RetryPolicy) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<ApiError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        attempts += 1;

        let error: ApiError = match attempt(attempts).await {
            Ok(value) => return Ok(value),
            Err(e) => e.into(),
        };

        if attempts >= max_attempts || !policy.is_retryable(&error) {
            return Err(error);
        }

        let delay = policy.delay_after(attempts);
        tracing::info!(
            attempt = attempts,
            delay = ?delay,
            kind = %error.kind,
            status = ?error.status_code,
            "Retrying request"
        );
        metrics::record_retry(error.kind);
        tokio::time::sleep(delay).await;
    }
}
