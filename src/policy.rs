//! Policy configuration types.
//!
//! A [`TargetPolicySet`] bundles up to four sections for one logical
//! target. Every section is optional; an omitted section removes that
//! layer from the pipeline entirely. Values are validated when the set is
//! registered, never silently clamped.

use std::time::Duration;

use crate::error::PolicyError;

/// Bounded retry with exponential backoff.
///
/// `max_attempts` counts the first attempt, so `max_attempts = 1` means no
/// retries. The delay before attempt `n + 1` is
/// `base_delay * backoff_factor^(n - 1)`, capped at `max_delay`, with
/// uniform jitter of `jitter_ratio` applied on top.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum operation invocations, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied per further retry. Must be at least 1.
    pub backoff_factor: f64,
    /// Jitter fraction in `[0, 1]`; each delay is scaled by a uniform
    /// factor in `[1 - jitter_ratio, 1 + jitter_ratio]`.
    pub jitter_ratio: f64,
    /// Pre-jitter ceiling on any single delay.
    pub max_delay: Duration,
    /// Retry failures classified transient.
    pub retry_on_transient: bool,
    /// Retry attempts that timed out.
    pub retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter_ratio: 0.0,
            max_delay: Duration::from_secs(30),
            retry_on_transient: true,
            retry_on_timeout: true,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with `max_attempts` attempts and default tuning.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the per-retry delay multiplier.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the jitter fraction applied to each delay.
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = ratio;
        self
    }

    /// Set the pre-jitter ceiling on any single delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Leave transient failures to the caller instead of retrying.
    pub fn no_retry_on_transient(mut self) -> Self {
        self.retry_on_transient = false;
        self
    }

    /// Surface timed-out attempts instead of retrying them.
    pub fn no_retry_on_timeout(mut self) -> Self {
        self.retry_on_timeout = false;
        self
    }

    /// Pre-jitter delay before the retry that follows failed attempt
    /// `attempt` (1-indexed).
    pub(crate) fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as f64;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powf(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    pub(crate) fn validate(&self, target: &str) -> Result<(), PolicyError> {
        if self.max_attempts == 0 {
            return Err(PolicyError::invalid(target, "retry.max_attempts must be at least 1"));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(PolicyError::invalid(
                target,
                "retry.backoff_factor must be a finite value of at least 1.0",
            ));
        }
        if !self.jitter_ratio.is_finite() || !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(PolicyError::invalid(
                target,
                "retry.jitter_ratio must be within [0.0, 1.0]",
            ));
        }
        if self.max_delay < self.base_delay {
            return Err(PolicyError::invalid(
                target,
                "retry.max_delay must not be below retry.base_delay",
            ));
        }
        Ok(())
    }
}

/// Per-attempt deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutPolicy {
    /// Wall-clock budget for a single attempt.
    pub duration: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(30),
        }
    }
}

impl TimeoutPolicy {
    /// Create a policy with the given per-attempt deadline.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub(crate) fn validate(&self, target: &str) -> Result<(), PolicyError> {
        if self.duration.is_zero() {
            return Err(PolicyError::invalid(target, "timeout.duration must be positive"));
        }
        Ok(())
    }
}

/// Concurrency cap for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkheadPolicy {
    /// Calls allowed in flight at once.
    pub max_concurrent: u32,
    /// How long a caller may queue for a slot. Zero means reject
    /// immediately when the bulkhead is full.
    pub max_queue_wait: Duration,
}

impl Default for BulkheadPolicy {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            max_queue_wait: Duration::from_secs(30),
        }
    }
}

impl BulkheadPolicy {
    /// Create a policy admitting `max_concurrent` calls at once.
    pub fn new(max_concurrent: u32) -> Self {
        Self {
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set how long a caller may queue for a slot.
    pub fn max_queue_wait(mut self, wait: Duration) -> Self {
        self.max_queue_wait = wait;
        self
    }

    /// Reject immediately instead of queueing.
    pub fn no_queueing(mut self) -> Self {
        self.max_queue_wait = Duration::ZERO;
        self
    }

    pub(crate) fn validate(&self, target: &str) -> Result<(), PolicyError> {
        if self.max_concurrent == 0 {
            return Err(PolicyError::invalid(
                target,
                "bulkhead.max_concurrent must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds.
///
/// The breaker trips when either `failure_threshold` consecutive retryable
/// failures accumulate, or (when `failure_rate_threshold` is set) the
/// failure rate over the last `min_samples` outcomes reaches the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerPolicy {
    /// Consecutive retryable failures that trip the breaker.
    pub failure_threshold: u32,
    /// Optional rate trip, as a fraction in `(0, 1]`.
    pub failure_rate_threshold: Option<f64>,
    /// Outcomes required in the window before the rate trip applies.
    pub min_samples: u32,
    /// How long the breaker stays open before admitting a trial call.
    pub reset_timeout: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: None,
            min_samples: 10,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl BreakerPolicy {
    /// Create a policy with a consecutive-failure trip and reset timeout.
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Default::default()
        }
    }

    /// Enable the rate trip over the last `min_samples` outcomes.
    pub fn failure_rate(mut self, threshold: f64, min_samples: u32) -> Self {
        self.failure_rate_threshold = Some(threshold);
        self.min_samples = min_samples;
        self
    }

    pub(crate) fn validate(&self, target: &str) -> Result<(), PolicyError> {
        if self.failure_threshold == 0 {
            return Err(PolicyError::invalid(
                target,
                "breaker.failure_threshold must be at least 1",
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(PolicyError::invalid(
                target,
                "breaker.reset_timeout must be positive",
            ));
        }
        if let Some(rate) = self.failure_rate_threshold {
            if !rate.is_finite() || !(rate > 0.0 && rate <= 1.0) {
                return Err(PolicyError::invalid(
                    target,
                    "breaker.failure_rate_threshold must be within (0.0, 1.0]",
                ));
            }
            if self.min_samples == 0 {
                return Err(PolicyError::invalid(
                    target,
                    "breaker.min_samples must be at least 1 when a failure rate is set",
                ));
            }
        }
        Ok(())
    }
}

/// The full policy selection for one logical target.
///
/// An all-`None` set is legal and turns the pipeline into a passthrough:
/// one attempt, no deadline, no admission control.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetPolicySet {
    pub breaker: Option<BreakerPolicy>,
    pub retry: Option<RetryPolicy>,
    pub timeout: Option<TimeoutPolicy>,
    pub bulkhead: Option<BulkheadPolicy>,
}

impl TargetPolicySet {
    /// Create an empty set with every layer disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every section enabled with default tuning.
    pub fn standard() -> Self {
        Self {
            breaker: Some(BreakerPolicy::default()),
            retry: Some(RetryPolicy::default()),
            timeout: Some(TimeoutPolicy::default()),
            bulkhead: Some(BulkheadPolicy::default()),
        }
    }

    /// Bulkhead only, for degrade-gracefully targets such as caches where
    /// tripping a breaker would hurt more than overload.
    pub fn bulkhead_only(policy: BulkheadPolicy) -> Self {
        Self {
            bulkhead: Some(policy),
            ..Default::default()
        }
    }

    /// Set the breaker section.
    pub fn with_breaker(mut self, policy: BreakerPolicy) -> Self {
        self.breaker = Some(policy);
        self
    }

    /// Set the retry section.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Set the timeout section.
    pub fn with_timeout(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    /// Set the bulkhead section.
    pub fn with_bulkhead(mut self, policy: BulkheadPolicy) -> Self {
        self.bulkhead = Some(policy);
        self
    }

    pub(crate) fn validate(&self, target: &str) -> Result<(), PolicyError> {
        if let Some(retry) = &self.retry {
            retry.validate(target)?;
        }
        if let Some(timeout) = &self.timeout {
            timeout.validate(target)?;
        }
        if let Some(bulkhead) = &self.bulkhead {
            bulkhead.validate(target)?;
        }
        if let Some(breaker) = &self.breaker {
            breaker.validate(target)?;
        }
        Ok(())
    }
}
