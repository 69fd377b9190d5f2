//! Retry executor.
//!
//! The executor owns the attempt loop: it asks the breaker for admission
//! before every attempt, runs the attempt under the timeout guard, feeds
//! the result back to the breaker, and schedules backoff between attempts.
//! Attempt numbering is 1-indexed; the delay before attempt `n + 1` is
//! `base_delay * backoff_factor^(n - 1)` with uniform jitter.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::circuit_breaker::{Admission, CircuitBreaker};
use crate::classifier::FailureClassifier;
use crate::events::{PolicyEvent, SinkHandle};
use crate::outcome::{FailureKind, Outcome};
use crate::policy::RetryPolicy;
use crate::timeout::TimeoutGuard;

/// One failed attempt, before the retry decision.
enum AttemptFailure<E> {
    Failed(E, FailureKind),
    TimedOut,
}

impl<E> AttemptFailure<E> {
    /// Terminal outcome when the failure was not eligible for retry.
    fn into_unretried_outcome<T>(self) -> Outcome<T, E> {
        match self {
            Self::Failed(error, FailureKind::Transient) => Outcome::TransientFailure(error),
            Self::Failed(error, FailureKind::Permanent) => Outcome::PermanentFailure(error),
            Self::TimedOut => Outcome::TimedOut,
        }
    }

    /// Terminal outcome when the attempt budget ran out. A final timeout
    /// stays `TimedOut` since a cancelled attempt leaves no cause to wrap.
    fn into_exhausted_outcome<T>(self) -> Outcome<T, E> {
        match self {
            Self::Failed(error, _) => Outcome::RetriesExhausted(error),
            Self::TimedOut => Outcome::TimedOut,
        }
    }
}

/// Drives attempts for one call. Holds borrowed pieces of the target
/// runtime, so it is built per call and discarded after.
pub(crate) struct RetryExecutor<'a> {
    target: &'a str,
    policy: Option<&'a RetryPolicy>,
    breaker: Option<&'a Arc<CircuitBreaker>>,
    timeout: Option<TimeoutGuard>,
    sink: &'a SinkHandle,
}

impl<'a> RetryExecutor<'a> {
    pub(crate) fn new(
        target: &'a str,
        policy: Option<&'a RetryPolicy>,
        breaker: Option<&'a Arc<CircuitBreaker>>,
        timeout: Option<TimeoutGuard>,
        sink: &'a SinkHandle,
    ) -> Self {
        Self {
            target,
            policy,
            breaker,
            timeout,
            sink,
        }
    }

    /// Run the attempt loop to a terminal outcome. Returns the outcome and
    /// how many attempts were made.
    pub(crate) async fn run<C, F, Fut, T, E>(
        &self,
        classifier: &C,
        mut operation: F,
    ) -> (Outcome<T, E>, u32)
    where
        C: FailureClassifier<E> + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.policy.map_or(1, |p| p.max_attempts);
        let mut attempts = 0u32;

        loop {
            let trial = match self.breaker.map(|b| b.try_acquire()) {
                Some(Admission::Rejected) => return (Outcome::CircuitOpenRejected, attempts),
                Some(Admission::Trial(token)) => Some(token),
                Some(Admission::Allowed) | None => None,
            };

            attempts += 1;
            let result = match self.timeout {
                Some(guard) => guard.run(operation()).await,
                None => Some(operation().await),
            };

            let failure = match result {
                Some(Ok(value)) => {
                    match trial {
                        Some(token) => token.succeed(),
                        None => {
                            if let Some(breaker) = self.breaker {
                                breaker.record_success();
                            }
                        }
                    }
                    return (Outcome::Success(value), attempts);
                }
                Some(Err(error)) => {
                    let kind = classifier.classify(&error);
                    AttemptFailure::Failed(error, kind)
                }
                None => AttemptFailure::TimedOut,
            };

            // Transient failures and timeouts count against the breaker;
            // permanent failures do not. A trial resolves either way: the
            // target answered, so a permanent failure still closes.
            let counts_against_breaker =
                !matches!(failure, AttemptFailure::Failed(_, FailureKind::Permanent));
            match trial {
                Some(token) if counts_against_breaker => token.fail(),
                Some(token) => token.succeed(),
                None => {
                    if counts_against_breaker && let Some(breaker) = self.breaker {
                        breaker.record_failure();
                    }
                }
            }

            let Some(policy) = self.policy else {
                return (failure.into_unretried_outcome(), attempts);
            };
            let retryable = match &failure {
                AttemptFailure::Failed(_, FailureKind::Permanent) => false,
                AttemptFailure::Failed(_, FailureKind::Transient) => policy.retry_on_transient,
                AttemptFailure::TimedOut => policy.retry_on_timeout,
            };
            if !retryable {
                return (failure.into_unretried_outcome(), attempts);
            }
            if attempts >= max_attempts {
                self.sink.emit(PolicyEvent::RetriesExhausted {
                    target: self.target.to_string(),
                    attempts,
                });
                return (failure.into_exhausted_outcome(), attempts);
            }

            let delay = jittered(policy.delay_for_attempt(attempts), policy.jitter_ratio);
            self.sink.emit(PolicyEvent::RetryAttempt {
                target: self.target.to_string(),
                attempt: attempts + 1,
                delay,
            });
            debug!(name = %self.target, attempt = attempts + 1, delay = ?delay, "retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Scale a delay by a uniform factor in `[1 - ratio, 1 + ratio]`.
fn jittered(delay: Duration, ratio: f64) -> Duration {
    if ratio == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = 1.0 - ratio + 2.0 * ratio * fastrand::f64();
    delay.mul_f64(factor)
}
