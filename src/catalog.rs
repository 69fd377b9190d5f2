//! Deserializable policy catalog.
//!
//! The engine consumes configuration as an already-parsed mapping from
//! target name to policy sections. Loading files, merging profiles, and
//! environment overrides belong to the application's configuration layer.
//! Durations are integer milliseconds (`*_ms` fields).
//!
//! ```rust,ignore
//! let catalog: PolicyCatalog = serde_json::from_str(
//!     r#"{
//!         "payments": {
//!             "breaker": { "failure_threshold": 5, "reset_timeout_ms": 30000 },
//!             "retry": { "max_attempts": 3, "base_delay_ms": 100 },
//!             "timeout": { "duration_ms": 2000 },
//!             "bulkhead": { "max_concurrent": 16, "max_queue_wait_ms": 50 }
//!         }
//!     }"#,
//! )?;
//! registry.register_catalog(catalog)?;
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::{BreakerPolicy, BulkheadPolicy, RetryPolicy, TargetPolicySet, TimeoutPolicy};

/// A full catalog: target name to policy sections.
pub type PolicyCatalog = HashMap<String, TargetPolicyConfig>;

/// One target's policy sections as they appear in configuration. Omitted
/// sections disable that layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetPolicyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bulkhead: Option<BulkheadSection>,
}

impl TargetPolicyConfig {
    /// Convert to the runtime policy types. Values are checked when the
    /// resulting set is registered, so a bad catalog entry fails with the
    /// target name attached.
    pub fn into_policy_set(self) -> TargetPolicySet {
        TargetPolicySet {
            breaker: self.breaker.map(BreakerSection::into_policy),
            retry: self.retry.map(RetrySection::into_policy),
            timeout: self.timeout.map(TimeoutSection::into_policy),
            bulkhead: self.bulkhead.map(BulkheadSection::into_policy),
        }
    }
}

impl From<TargetPolicyConfig> for TargetPolicySet {
    fn from(config: TargetPolicyConfig) -> Self {
        config.into_policy_set()
    }
}

/// Circuit breaker section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_rate_threshold: Option<f64>,
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    pub reset_timeout_ms: u64,
}

impl BreakerSection {
    fn into_policy(self) -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: self.failure_threshold,
            failure_rate_threshold: self.failure_rate_threshold,
            min_samples: self.min_samples,
            reset_timeout: Duration::from_millis(self.reset_timeout_ms),
        }
    }
}

/// Retry section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default)]
    pub jitter_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub retry_on_transient: bool,
    #[serde(default = "default_true")]
    pub retry_on_timeout: bool,
}

impl RetrySection {
    fn into_policy(self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let base_delay = Duration::from_millis(self.base_delay_ms);
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay,
            backoff_factor: self.backoff_factor,
            jitter_ratio: self.jitter_ratio,
            // An omitted cap defaults to at least the base delay.
            max_delay: self
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay.max(base_delay)),
            retry_on_transient: self.retry_on_transient,
            retry_on_timeout: self.retry_on_timeout,
        }
    }
}

/// Timeout section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutSection {
    pub duration_ms: u64,
}

impl TimeoutSection {
    fn into_policy(self) -> TimeoutPolicy {
        TimeoutPolicy::new(Duration::from_millis(self.duration_ms))
    }
}

/// Bulkhead section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadSection {
    pub max_concurrent: u32,
    #[serde(default)]
    pub max_queue_wait_ms: u64,
}

impl BulkheadSection {
    fn into_policy(self) -> BulkheadPolicy {
        BulkheadPolicy {
            max_concurrent: self.max_concurrent,
            max_queue_wait: Duration::from_millis(self.max_queue_wait_ms),
        }
    }
}

fn default_min_samples() -> u32 {
    10
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}
