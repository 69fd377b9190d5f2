//! Policy engine error types.
//!
//! These cover registration and lookup problems only. Failures of a
//! protected call (timeouts, rejections, exhausted retries) are not engine
//! errors; they are reported through [`Outcome`](crate::Outcome).

use thiserror::Error;

/// Result alias for registry operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors raised while registering or resolving policy sets.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// A policy value failed validation at registration time.
    #[error("invalid policy for target '{target}': {reason}")]
    InvalidPolicy {
        /// Target the rejected policy set was registered under.
        target: String,
        /// What was wrong, naming the offending field.
        reason: String,
    },

    /// No policy set is registered under the requested target name and the
    /// registry has no default policies.
    #[error("no policy set registered for target '{0}'")]
    UnknownTarget(String),
}

impl PolicyError {
    pub(crate) fn invalid(target: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            target: target.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_policy_names_target_and_field() {
        let err = PolicyError::invalid("payments", "retry.max_attempts must be at least 1");
        assert_eq!(
            err.to_string(),
            "invalid policy for target 'payments': retry.max_attempts must be at least 1"
        );
    }

    #[test]
    fn unknown_target_displays_name() {
        let err = PolicyError::UnknownTarget("search".to_string());
        assert!(err.to_string().contains("'search'"));
    }
}
