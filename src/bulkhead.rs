//! Concurrency bulkhead.
//!
//! A bulkhead caps how many calls to one target run at once. Admission is a
//! semaphore acquire bounded by the queue-wait budget; the permit rides the
//! call as an RAII guard, so the slot frees on every exit path including
//! cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::events::{PolicyEvent, SinkHandle};
use crate::policy::BulkheadPolicy;

/// Holds one admitted slot. Dropping it releases the slot.
#[derive(Debug)]
pub(crate) struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

/// Per-target concurrency gate. See [`BulkheadPolicy`] for tuning.
pub struct Bulkhead {
    target: Arc<str>,
    policy: BulkheadPolicy,
    semaphore: Arc<Semaphore>,
    sink: SinkHandle,
    queued: AtomicU32,
    total_admitted: AtomicU64,
    total_rejections: AtomicU64,
}

impl Bulkhead {
    pub(crate) fn new(target: Arc<str>, policy: BulkheadPolicy, sink: SinkHandle) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(policy.max_concurrent as usize));
        Arc::new(Self {
            target,
            policy,
            semaphore,
            sink,
            queued: AtomicU32::new(0),
            total_admitted: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Wait up to `max_queue_wait` for a slot. `Err` carries how long the
    /// caller queued before rejection.
    pub(crate) async fn acquire(&self) -> Result<BulkheadPermit, Duration> {
        let started = Instant::now();
        let acquired = if self.policy.max_queue_wait.is_zero() {
            self.semaphore.clone().try_acquire_owned().ok()
        } else {
            let _queued = QueuedGuard::enter(&self.queued);
            tokio::time::timeout(
                self.policy.max_queue_wait,
                self.semaphore.clone().acquire_owned(),
            )
            .await
            .ok()
            .and_then(|acquire| acquire.ok())
        };

        match acquired {
            Some(permit) => {
                self.total_admitted.fetch_add(1, Ordering::Relaxed);
                Ok(BulkheadPermit { _permit: permit })
            }
            None => {
                let waited = started.elapsed();
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(name = %self.target, waited = ?waited, "bulkhead full, call rejected");
                self.sink.emit(PolicyEvent::BulkheadRejected {
                    target: self.target.to_string(),
                    waited,
                });
                Err(waited)
            }
        }
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> u32 {
        self.policy.max_concurrent - self.semaphore.available_permits() as u32
    }

    /// Slots currently free.
    pub fn available(&self) -> u32 {
        self.semaphore.available_permits() as u32
    }

    /// Callers currently queued for a slot.
    pub fn queued(&self) -> u32 {
        self.queued.load(Ordering::Relaxed)
    }

    /// Point-in-time view for dashboards and tests.
    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            max_concurrent: self.policy.max_concurrent,
            in_flight: self.in_flight(),
            queued: self.queued(),
            total_admitted: self.total_admitted.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("target", &self.target)
            .field("max_concurrent", &self.policy.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Point-in-time view of one bulkhead.
#[derive(Debug, Clone, Serialize)]
pub struct BulkheadSnapshot {
    pub max_concurrent: u32,
    pub in_flight: u32,
    pub queued: u32,
    pub total_admitted: u64,
    pub total_rejections: u64,
}

/// Keeps the queued counter balanced even when the waiting future is
/// dropped mid-acquire.
struct QueuedGuard<'a>(&'a AtomicU32);

impl<'a> QueuedGuard<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
