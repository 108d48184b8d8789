//! Exponential backoff retry with jitter.
//!
//! [`RetryExecutor`] runs one logical operation up to
//! [`RetryPolicy::max_attempts`] times, waiting between attempts with
//! capped exponential backoff. Only errors that report themselves retryable
//! are retried; cancellation is checked before every attempt and during every
//! wait.

use std::{future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tryl_core::{Result, TrylError};

/// Longest backoff a policy may configure.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retry policy for API calls.
///
/// Zero-valued `max_attempts`, `base_delay`, `max_delay` and `multiplier`
/// are replaced with the defaults when an executor is built. A zero
/// `jitter_factor` is kept and disables jitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first. `1` disables retries.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on the backoff before jitter.
    pub max_delay: Duration,

    /// Factor applied to the delay after each attempt.
    pub multiplier: f64,

    /// Jitter fraction (0.0 to 1.0) applied symmetrically to each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self { max_attempts: 1, ..Default::default() }
    }

    /// Returns a copy with zero-valued fields replaced by defaults.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: if self.max_attempts == 0 {
                defaults.max_attempts
            } else {
                self.max_attempts
            },
            base_delay: if self.base_delay.is_zero() { defaults.base_delay } else { self.base_delay },
            max_delay: if self.max_delay.is_zero() { defaults.max_delay } else { self.max_delay },
            multiplier: if self.multiplier == 0.0 { defaults.multiplier } else { self.multiplier },
            jitter_factor: self.jitter_factor,
        }
    }

    /// Checks that the policy, once normalized, produces finite delays.
    ///
    /// # Errors
    ///
    /// Returns `TrylError::Configuration` naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let policy = self.normalized();

        if !policy.jitter_factor.is_finite() || !(0.0..=1.0).contains(&policy.jitter_factor) {
            return Err(TrylError::configuration(format!(
                "jitter_factor must be between 0.0 and 1.0 (got: {})",
                policy.jitter_factor
            )));
        }
        if !policy.multiplier.is_finite() || policy.multiplier < 1.0 {
            return Err(TrylError::configuration(format!(
                "multiplier must be at least 1.0 (got: {})",
                policy.multiplier
            )));
        }
        if policy.max_delay > MAX_RETRY_DELAY {
            return Err(TrylError::configuration(format!(
                "max_delay cannot exceed {}s",
                MAX_RETRY_DELAY.as_secs()
            )));
        }
        if policy.base_delay > policy.max_delay {
            return Err(TrylError::configuration("base_delay cannot exceed max_delay"));
        }
        Ok(())
    }

    /// Backoff before jitter for the retry following attempt `attempt_index`
    /// (zero-based): `min(max_delay, base_delay * multiplier^attempt_index)`.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let exponent = i32::try_from(attempt_index).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        if !scaled.is_finite() || scaled >= max {
            return self.max_delay;
        }

        Duration::try_from_secs_f64(scaled.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Backoff with jitter applied.
    ///
    /// The result is never negative and never exceeds
    /// `max_delay * (1 + jitter_factor)`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        apply_jitter(self.backoff(attempt_index), self.jitter_factor)
    }
}

/// Applies symmetric jitter to a duration.
///
/// Randomizes the delay by ±`jitter_factor` of its value. With
/// `jitter_factor = 0.2`, a 10s delay becomes 8s to 12s. A non-finite
/// factor disables jitter and the result saturates at `Duration::MAX`.
pub fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if !jitter_factor.is_finite() || jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::try_from_secs_f64(jittered_secs.max(0.0)).unwrap_or(Duration::MAX)
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    /// Creates an executor, normalizing zero-valued policy fields.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy: policy.normalized() }
    }

    /// The effective policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs `operation` until it succeeds, fails permanently, or attempts run
    /// out.
    ///
    /// Each call of `operation` is one attempt.
    ///
    /// # Errors
    ///
    /// - `TrylError::Cancelled` if `cancel` fires before an attempt or during
    ///   a wait.
    /// - The operation's own error, unchanged, when it is not retryable.
    /// - `TrylError::RetriesExhausted` wrapping the last error when every
    ///   attempt failed with a retryable error.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.policy.max_attempts;
        let mut attempt_index = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(TrylError::Cancelled);
            }

            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_retryable() {
                debug!(attempt = attempt_index + 1, error = %error, "non-retryable failure");
                return Err(error);
            }

            if attempt_index + 1 >= max_attempts {
                return Err(TrylError::retries_exhausted(max_attempts, error));
            }

            let delay = self.policy.delay_for(attempt_index);
            warn!(
                attempt = attempt_index + 1,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying after failure"
            );

            tokio::select! {
                () = cancel.cancelled() => return Err(TrylError::Cancelled),
                () = tokio::time::sleep(delay) => {},
            }

            attempt_index += 1;
        }
    }
}
