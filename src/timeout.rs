//! Per-attempt timeout guard.

use std::future::Future;
use std::time::Duration;

use crate::policy::TimeoutPolicy;

/// Bounds the wall-clock duration of one attempt.
///
/// When the deadline fires the attempt future is dropped, which is the
/// cancellation signal: the operation stops at its next await point and
/// its cleanup (guards, connection returns) runs via `Drop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutGuard {
    duration: Duration,
}

impl TimeoutGuard {
    pub(crate) fn new(policy: &TimeoutPolicy) -> Self {
        Self {
            duration: policy.duration,
        }
    }

    /// The configured per-attempt budget.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run one attempt under the deadline. `None` means the deadline fired
    /// and the attempt was cancelled.
    pub(crate) async fn run<F, T>(&self, attempt: F) -> Option<T>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.duration, attempt).await.ok()
    }
}
