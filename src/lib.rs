//! # Armature Resilience
//!
//! A per-target resiliency policy engine. Service code names a logical
//! target ("payments", "search", "primary-db"), hands over an async
//! operation, and the engine runs it through the policies registered for
//! that target: concurrency bulkhead, circuit breaker, per-attempt
//! timeout, and bounded retry with exponential backoff.
//!
//! ## Features
//!
//! - **Circuit breaker**: consecutive-failure and failure-rate tripping,
//!   single-trial half-open recovery, manual `force_open` / `reset`
//! - **Bounded retry**: exponential backoff with uniform jitter, driven by
//!   pluggable transient/permanent failure classification
//! - **Timeout guard**: per-attempt deadlines with cooperative
//!   cancellation of the in-flight future
//! - **Bulkhead**: per-target concurrency caps with a bounded queue wait
//! - **Registry**: validated per-target policy sets, hot-swappable at
//!   runtime, loadable from a serde catalog
//! - **Events**: breaker transitions, rejections, and retry milestones
//!   delivered fire-and-forget to a pluggable sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use armature_resilience::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let registry = Arc::new(PolicyRegistry::new());
//! registry.register(
//!     "payments",
//!     TargetPolicySet::new()
//!         .with_breaker(BreakerPolicy::new(5, Duration::from_secs(30)))
//!         .with_retry(RetryPolicy::new(3).base_delay(Duration::from_millis(100)))
//!         .with_timeout(TimeoutPolicy::new(Duration::from_secs(2)))
//!         .with_bulkhead(BulkheadPolicy::new(16)),
//! )?;
//!
//! let composer = PolicyComposer::new(registry);
//! let resolved = composer
//!     .execute("payments", || client.charge(&order))
//!     .await?;
//!
//! match resolved.outcome() {
//!     Outcome::Success(receipt) => println!("charged: {receipt:?}"),
//!     Outcome::CircuitOpenRejected => queue_for_later(&order),
//!     other => tracing::warn!("charge failed: {}", other.label()),
//! }
//! ```
//!
//! ## Pipeline order
//!
//! Layers compose in a fixed order: bulkhead, then circuit breaker, then
//! timeout guard, then retry executor. Admission control sits outermost so
//! a queue-full rejection never counts against the breaker; the breaker is
//! consulted before every attempt so retries stop the moment it opens.
//! Targets configure any subset; omitted layers are skipped.
//!
//! ## Failure classification
//!
//! The engine never inspects operation errors itself. A
//! [`FailureClassifier`] tags each failure transient or permanent, and
//! that one tag decides both whether the retry executor tries again and
//! whether the circuit breaker counts the failure. Permanent failures
//! surface immediately and leave breaker state untouched.

pub mod bulkhead;
pub mod catalog;
pub mod circuit_breaker;
pub mod classifier;
pub mod error;
pub mod events;
pub mod outcome;
pub mod pipeline;
pub mod policy;
pub mod registry;

mod retry;
mod timeout;
mod window;

pub use bulkhead::{Bulkhead, BulkheadSnapshot};
pub use catalog::{
    BreakerSection, BulkheadSection, PolicyCatalog, RetrySection, TargetPolicyConfig,
    TimeoutSection,
};
pub use circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use classifier::{FailureClassifier, PermanentByDefault, TransientByDefault};
pub use error::{PolicyError, PolicyResult};
pub use events::{EventSink, MemoryEventSink, NoopEventSink, PolicyEvent, TracingEventSink};
pub use outcome::{CallOutcome, FailureKind, Outcome};
pub use pipeline::PolicyComposer;
pub use policy::{BreakerPolicy, BulkheadPolicy, RetryPolicy, TargetPolicySet, TimeoutPolicy};
pub use registry::{PolicyRegistry, RegistryBuilder, TargetSnapshot};

/// Convenience re-exports for the common path.
pub mod prelude {
    pub use crate::catalog::{PolicyCatalog, TargetPolicyConfig};
    pub use crate::circuit_breaker::CircuitState;
    pub use crate::classifier::{FailureClassifier, PermanentByDefault, TransientByDefault};
    pub use crate::error::{PolicyError, PolicyResult};
    pub use crate::events::{
        EventSink, MemoryEventSink, NoopEventSink, PolicyEvent, TracingEventSink,
    };
    pub use crate::outcome::{CallOutcome, FailureKind, Outcome};
    pub use crate::pipeline::PolicyComposer;
    pub use crate::policy::{
        BreakerPolicy, BulkheadPolicy, RetryPolicy, TargetPolicySet, TimeoutPolicy,
    };
    pub use crate::registry::{PolicyRegistry, RegistryBuilder};
}
