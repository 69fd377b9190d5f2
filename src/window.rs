//! Failure window bookkeeping for the circuit breaker.

use std::collections::VecDeque;

/// Rolling record of recent attempt outcomes for one breaker.
///
/// Tracks the consecutive-failure streak for threshold tripping plus a
/// bounded ring of recent outcomes for rate tripping, both updated in
/// constant time. Not synchronized; the owning breaker guards it with its
/// state mutex.
#[derive(Debug)]
pub(crate) struct FailureWindow {
    consecutive_failures: u32,
    /// Most recent outcomes, oldest first. `true` marks a failure.
    samples: VecDeque<bool>,
    failures_in_window: u32,
    capacity: usize,
}

impl FailureWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            consecutive_failures: 0,
            samples: VecDeque::with_capacity(capacity),
            failures_in_window: 0,
            capacity,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.push(false);
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.push(true);
    }

    fn push(&mut self, failed: bool) {
        if self.samples.len() == self.capacity && self.samples.pop_front() == Some(true) {
            self.failures_in_window -= 1;
        }
        self.samples.push_back(failed);
        if failed {
            self.failures_in_window += 1;
        }
    }

    pub(crate) fn reset(&mut self) {
        self.consecutive_failures = 0;
        self.samples.clear();
        self.failures_in_window = 0;
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub(crate) fn samples(&self) -> u32 {
        self.samples.len() as u32
    }

    pub(crate) fn failure_rate(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            f64::from(self.failures_in_window) / self.samples.len() as f64
        }
    }
}
