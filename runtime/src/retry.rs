//! Retry logic with exponential backoff for handling transient failures.
//!
//! Only errors that report themselves as transient through [`Retryable`] are
//! retried. Domain rejections and not-found results pass straight through.
//!
//! # Example
//!
//! ```rust
//! use rollcall_runtime::retry::{RetryPolicy, retry_transient};
//! use rollcall_core::document::DocumentError;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), DocumentError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! let value = retry_transient(&policy, "load_event", || async {
//!     Ok::<_, DocumentError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use rand::Rng;
use rollcall_core::blob::BlobError;
use rollcall_core::document::DocumentError;
use std::time::Duration;
use tokio::time::sleep;

/// Classifies errors as worth retrying or not.
pub trait Retryable {
    /// Whether the same call may succeed if repeated.
    fn is_transient(&self) -> bool;
}

impl Retryable for DocumentError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

impl Retryable for BlobError {
    fn is_transient(&self) -> bool {
        Self::is_transient(self)
    }
}

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: enabled
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.0]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Policy that never waits; useful in tests.
    #[must_use]
    pub const fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate delay for a given retry number (0 = first retry).
    ///
    /// `delay = min(initial_delay * multiplier^attempt, max_delay)`, then
    /// scaled by jitter when enabled. Concurrent check-ins that lost the same
    /// race spread out instead of colliding again.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let factor = if self.jitter {
            rand::thread_rng().gen_range(0.5..=1.0)
        } else {
            1.0
        };
        Duration::try_from_secs_f64((capped * factor).max(0.0)).unwrap_or(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Retry an async operation while it fails with transient errors.
///
/// Non-transient errors are returned immediately. After `max_retries`
/// retries the last transient error is returned.
///
/// # Errors
///
/// Returns the operation's error when it is not transient or retries are exhausted.
pub async fn retry_transient<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                if attempt >= policy.max_retries {
                    tracing::error!(
                        operation,
                        attempt,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Transient failure, retrying"
                );
                metrics::counter!("rollcall.retry.attempts", "operation" => operation).increment(1);

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
