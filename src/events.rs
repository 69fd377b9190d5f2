//! Policy lifecycle events.
//!
//! The engine reports breaker transitions, rejections, and retry milestones
//! through an [`EventSink`]. Delivery is fire-and-forget: a sink that
//! panics is caught and the event dropped, and no sink can change the
//! outcome of the call that produced the event.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::circuit_breaker::CircuitState;

/// An event emitted by the policy engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PolicyEvent {
    /// A circuit breaker moved between states.
    BreakerStateChanged {
        target: String,
        from: CircuitState,
        to: CircuitState,
        at: DateTime<Utc>,
    },
    /// A call was refused because no bulkhead slot freed in time.
    BulkheadRejected {
        target: String,
        /// How long the caller queued before giving up.
        waited: Duration,
    },
    /// A failed attempt is about to be retried.
    RetryAttempt {
        target: String,
        /// 1-indexed number of the attempt about to run.
        attempt: u32,
        /// Backoff delay applied before this attempt, jitter included.
        delay: Duration,
    },
    /// Every allowed attempt failed with a retryable cause.
    RetriesExhausted { target: String, attempts: u32 },
}

impl PolicyEvent {
    /// Machine-readable event name, stable across releases.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BreakerStateChanged { .. } => "breaker_state_changed",
            Self::BulkheadRejected { .. } => "bulkhead_rejected",
            Self::RetryAttempt { .. } => "retry_attempt",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Target the event refers to.
    pub fn target(&self) -> &str {
        match self {
            Self::BreakerStateChanged { target, .. }
            | Self::BulkheadRejected { target, .. }
            | Self::RetryAttempt { target, .. }
            | Self::RetriesExhausted { target, .. } => target,
        }
    }
}

/// Receives engine events.
///
/// Implementations must not block; anything slow (exporters, I/O) should
/// hand off to a channel or task internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &PolicyEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: &PolicyEvent) {}
}

/// Logs events through `tracing`. This is the default sink.
///
/// Breaker opens, bulkhead rejections, and exhausted retries log at `warn`;
/// breaker closes at `info`; everything else at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &PolicyEvent) {
        match event {
            PolicyEvent::BreakerStateChanged {
                target, from, to, ..
            } => match to {
                CircuitState::Open => {
                    warn!(name = %target, from = %from, to = %to, "circuit breaker opened")
                }
                CircuitState::Closed => {
                    info!(name = %target, from = %from, to = %to, "circuit breaker closed")
                }
                CircuitState::HalfOpen => {
                    debug!(name = %target, from = %from, to = %to, "circuit breaker half-open")
                }
            },
            PolicyEvent::BulkheadRejected { target, waited } => {
                warn!(name = %target, waited = ?waited, "bulkhead rejected call")
            }
            PolicyEvent::RetryAttempt {
                target,
                attempt,
                delay,
            } => {
                debug!(name = %target, attempt, delay = ?delay, "retrying")
            }
            PolicyEvent::RetriesExhausted { target, attempts } => {
                warn!(name = %target, attempts, "retries exhausted")
            }
        }
    }
}

/// Buffers events in memory, in emission order. Intended for tests and
/// diagnostics.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<PolicyEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything captured so far.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().clone()
    }

    /// Names of captured events, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &PolicyEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Shared handle through which engine components deliver events.
///
/// Emission is panic-guarded: a sink that unwinds loses that one event and
/// the call proceeds untouched.
#[derive(Clone)]
pub(crate) struct SinkHandle {
    sink: Arc<dyn EventSink>,
}

impl SinkHandle {
    pub(crate) fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(&self, event: PolicyEvent) {
        let delivered = catch_unwind(AssertUnwindSafe(|| self.sink.emit(&event)));
        if delivered.is_err() {
            warn!(
                event = event.name(),
                name = event.target(),
                "event sink panicked; event dropped"
            );
        }
    }
}
