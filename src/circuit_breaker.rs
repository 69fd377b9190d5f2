//! Circuit breaker state machine.
//!
//! One breaker guards one target. All transitions happen under a single
//! mutex whose critical sections never run user code or emit events, so
//! concurrent attempts observe a total order of state changes. Recovery is
//! probed with exactly one trial call: when the reset timeout elapses, the
//! first admission moves the breaker to half-open and hands that caller a
//! [`TrialToken`]; everyone else stays rejected until the trial resolves.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::events::{PolicyEvent, SinkHandle};
use crate::policy::BreakerPolicy;
use crate::window::FailureWindow;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through; failures are counted.
    Closed,
    /// Calls are rejected without invoking the operation.
    Open,
    /// One trial call is probing recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// What the breaker decided for one attempt.
pub(crate) enum Admission {
    /// Closed; run the attempt and report the result back.
    Allowed,
    /// Half-open; run the attempt as the single recovery trial.
    Trial(TrialToken),
    /// Open; reject without invoking the operation.
    Rejected,
}

struct BreakerInner {
    state: CircuitState,
    opened_at: Option<Instant>,
    /// Bumped whenever an outstanding trial stops being current. Tokens
    /// carry the value they were minted with.
    trial_generation: u64,
    window: FailureWindow,
}

/// Per-target circuit breaker. See [`BreakerPolicy`] for tuning.
pub struct CircuitBreaker {
    target: Arc<str>,
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
    sink: SinkHandle,
    times_opened: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    pub(crate) fn new(target: Arc<str>, policy: BreakerPolicy, sink: SinkHandle) -> Arc<Self> {
        let window = FailureWindow::new(policy.min_samples as usize);
        Arc::new(Self {
            target,
            policy,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                opened_at: None,
                trial_generation: 0,
                window,
            }),
            sink,
            times_opened: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Current state. Open-to-half-open movement happens at admission, not
    /// at read time, so an expired reset timeout still reads `Open` here
    /// until the next call arrives.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Decide admission for one attempt.
    pub(crate) fn try_acquire(self: &Arc<Self>) -> Admission {
        let mut transition = None;
        let admission = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Admission::Allowed,
                CircuitState::Open => {
                    let expired = inner
                        .opened_at
                        .is_none_or(|at| at.elapsed() >= self.policy.reset_timeout);
                    if expired {
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        inner.state = CircuitState::HalfOpen;
                        inner.trial_generation += 1;
                        Admission::Trial(TrialToken::new(Arc::clone(self), inner.trial_generation))
                    } else {
                        Admission::Rejected
                    }
                }
                // The single trial is still out; reject everyone else.
                CircuitState::HalfOpen => Admission::Rejected,
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
        if matches!(admission, Admission::Rejected) {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.target, "circuit open, call rejected");
        }
        admission
    }

    /// Record a successful closed-state attempt.
    pub(crate) fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::Closed {
            inner.window.record_success();
        }
    }

    /// Record a failed closed-state attempt, tripping the breaker when a
    /// threshold is reached.
    pub(crate) fn record_failure(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != CircuitState::Closed {
                None
            } else {
                inner.window.record_failure();
                if self.should_trip(&inner.window) {
                    Some(self.open_locked(&mut inner, CircuitState::Closed))
                } else {
                    None
                }
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    fn should_trip(&self, window: &FailureWindow) -> bool {
        if window.consecutive_failures() >= self.policy.failure_threshold {
            return true;
        }
        if let Some(rate) = self.policy.failure_rate_threshold {
            return window.samples() >= self.policy.min_samples && window.failure_rate() >= rate;
        }
        false
    }

    fn open_locked(
        &self,
        inner: &mut BreakerInner,
        from: CircuitState,
    ) -> (CircuitState, CircuitState) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trial_generation += 1;
        self.times_opened.fetch_add(1, Ordering::Relaxed);
        (from, CircuitState::Open)
    }

    fn trial_succeeded(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            // A stale token, superseded by force_open or reset, resolves
            // nothing.
            if inner.state == CircuitState::HalfOpen && generation == inner.trial_generation {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.window.reset();
                Some((CircuitState::HalfOpen, CircuitState::Closed))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    fn trial_failed(&self, generation: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::HalfOpen && generation == inner.trial_generation {
                Some(self.open_locked(&mut inner, CircuitState::HalfOpen))
            } else {
                None
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    /// Trip the breaker manually, for maintenance windows or operator
    /// intervention. The reset timeout starts now; an in-flight trial
    /// resolves as a no-op afterwards.
    pub fn force_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Open {
                None
            } else {
                let from = inner.state;
                Some(self.open_locked(&mut inner, from))
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    /// Close the breaker and clear the failure window. An in-flight trial
    /// resolves as a no-op afterwards.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == CircuitState::Closed {
                inner.window.reset();
                None
            } else {
                let from = inner.state;
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                inner.trial_generation += 1;
                inner.window.reset();
                Some((from, CircuitState::Closed))
            }
        };
        if let Some((from, to)) = transition {
            self.emit_transition(from, to);
        }
    }

    /// Point-in-time view for dashboards and tests.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.window.consecutive_failures(),
            window_samples: inner.window.samples(),
            window_failure_rate: inner.window.failure_rate(),
            times_opened: self.times_opened.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        self.sink.emit(PolicyEvent::BreakerStateChanged {
            target: self.target.to_string(),
            from,
            to,
            at: Utc::now(),
        });
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}

/// Resolution handle for the single half-open trial.
///
/// Dropping the token without calling [`succeed`](Self::succeed) or
/// [`fail`](Self::fail) counts the trial as failed: an abandoned probe must
/// reopen the breaker rather than leave it stuck half-open. A token
/// superseded by [`CircuitBreaker::force_open`] or
/// [`CircuitBreaker::reset`] resolves as a no-op.
pub(crate) struct TrialToken {
    breaker: Arc<CircuitBreaker>,
    generation: u64,
    resolved: bool,
}

impl TrialToken {
    fn new(breaker: Arc<CircuitBreaker>, generation: u64) -> Self {
        Self {
            breaker,
            generation,
            resolved: false,
        }
    }

    /// The trial observed a healthy response; close the breaker.
    pub(crate) fn succeed(mut self) {
        self.resolved = true;
        self.breaker.trial_succeeded(self.generation);
    }

    /// The trial failed; reopen for a fresh reset timeout.
    pub(crate) fn fail(mut self) {
        self.resolved = true;
        self.breaker.trial_failed(self.generation);
    }
}

impl Drop for TrialToken {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.trial_failed(self.generation);
        }
    }
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub window_samples: u32,
    pub window_failure_rate: f64,
    pub times_opened: u64,
    pub total_rejections: u64,
}
