//! Bounded retry with exponential backoff and jitter.
//!
//! Cluster lookups happen inside an admission request, so retries are always
//! bounded: callers pick an attempt count and wrap the whole loop in the
//! request deadline.
//!
//! # Example
//!
//! ```ignore
//! use mesh_injector::retry::{retry_with_backoff, RetryConfig};
//!
//! let labels = retry_with_backoff(
//!     &RetryConfig::with_max_attempts(3),
//!     "namespace_labels",
//!     || backend.namespace_labels("payments"),
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Backoff settings for a retried operation
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one (values below 1 behave as 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied after each failed attempt
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default backoff with the given attempt count
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }

    /// Un-jittered delay that follows failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `operation` until it succeeds or `config.max_attempts` is reached.
///
/// Each delay is jittered to 0.5x-1.5x of the backoff value. The last error
/// is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            debug!(
                operation = %operation_name,
                attempt,
                error = %err,
                "Giving up after final attempt"
            );
            return Err(err);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let delay = Duration::from_secs_f64(config.delay_after(attempt).as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt,
            error = %err,
            delay_ms = delay.as_millis(),
            "Lookup failed, retrying"
        );

        tokio::time::sleep(delay).await;
    }
}
