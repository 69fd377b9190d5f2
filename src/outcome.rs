//! Tagged call outcomes.
//!
//! Every protected call resolves to exactly one [`Outcome`] variant, so
//! callers can distinguish "the operation failed" from "the engine refused
//! to run it" without string matching. [`CallOutcome`] pairs the outcome
//! with the context needed to log or surface it.

use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Plausibly resolved by retrying: connection resets, overload
    /// shedding, lock timeouts.
    Transient,
    /// Retrying cannot help: validation failures, missing resources,
    /// rejected credentials.
    Permanent,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// The terminal result of one protected call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// The operation produced a value.
    Success(T),
    /// The operation failed with a transient cause and was not retried,
    /// either because the target has no retry policy or because transient
    /// retries are disabled.
    TransientFailure(E),
    /// The operation failed with a permanent cause. Never retried.
    PermanentFailure(E),
    /// The last attempt outlived its deadline and was cancelled.
    TimedOut,
    /// The circuit breaker was open. The operation was never invoked.
    CircuitOpenRejected,
    /// No bulkhead slot freed within the queue-wait budget. The operation
    /// was never invoked.
    BulkheadRejected,
    /// Every allowed attempt failed with a retryable cause; carries the
    /// last cause observed.
    RetriesExhausted(E),
}

impl<T, E> Outcome<T, E> {
    /// True for [`Outcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// True when the engine refused the call before running any attempt.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::CircuitOpenRejected | Self::BulkheadRejected)
    }

    /// The success value, if any.
    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure cause, for the variants that carry one.
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::TransientFailure(e) | Self::PermanentFailure(e) | Self::RetriesExhausted(e) => {
                Some(e)
            }
            _ => None,
        }
    }

    /// Map the success value, leaving every other variant untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Success(value) => Outcome::Success(f(value)),
            Self::TransientFailure(e) => Outcome::TransientFailure(e),
            Self::PermanentFailure(e) => Outcome::PermanentFailure(e),
            Self::TimedOut => Outcome::TimedOut,
            Self::CircuitOpenRejected => Outcome::CircuitOpenRejected,
            Self::BulkheadRejected => Outcome::BulkheadRejected,
            Self::RetriesExhausted(e) => Outcome::RetriesExhausted(e),
        }
    }

    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::TransientFailure(_) => "transient_failure",
            Self::PermanentFailure(_) => "permanent_failure",
            Self::TimedOut => "timed_out",
            Self::CircuitOpenRejected => "circuit_open_rejected",
            Self::BulkheadRejected => "bulkhead_rejected",
            Self::RetriesExhausted(_) => "retries_exhausted",
        }
    }
}

/// A resolved call: the outcome plus the target it ran against, how many
/// attempts were made, and the total elapsed time including queueing and
/// retry delays.
///
/// `attempts` counts operation invocations, so a call rejected before the
/// first attempt reports zero.
#[derive(Debug, Clone)]
pub struct CallOutcome<T, E> {
    target: String,
    attempts: u32,
    elapsed: Duration,
    outcome: Outcome<T, E>,
}

impl<T, E> CallOutcome<T, E> {
    pub(crate) fn new(target: &str, attempts: u32, elapsed: Duration, outcome: Outcome<T, E>) -> Self {
        Self {
            target: target.to_string(),
            attempts,
            elapsed,
            outcome,
        }
    }

    /// Target the call ran against.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Operation invocations made, including the final one.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wall-clock time from admission to resolution.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The tagged outcome.
    pub fn outcome(&self) -> &Outcome<T, E> {
        &self.outcome
    }

    /// Discard the context, keeping the outcome.
    pub fn into_outcome(self) -> Outcome<T, E> {
        self.outcome
    }

    /// True for a successful call.
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Convert into a `Result`, yielding the success value or the failed
    /// call with its context intact.
    pub fn into_result(self) -> Result<T, CallOutcome<T, E>> {
        let Self {
            target,
            attempts,
            elapsed,
            outcome,
        } = self;
        match outcome {
            Outcome::Success(value) => Ok(value),
            other => Err(Self {
                target,
                attempts,
                elapsed,
                outcome: other,
            }),
        }
    }
}

impl<T, E: fmt::Display> fmt::Display for CallOutcome<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "call to '{}' resolved to {} after {} attempt(s) in {:?}",
            self.target,
            self.outcome.label(),
            self.attempts,
            self.elapsed
        )?;
        if let Some(cause) = self.outcome.cause() {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl<T: fmt::Debug, E: fmt::Debug + fmt::Display> std::error::Error for CallOutcome<T, E> {}
