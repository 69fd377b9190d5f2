//! Policy composition.
//!
//! [`PolicyComposer`] runs operations through the fixed pipeline
//! bulkhead, then circuit breaker, then timeout guard, then retry
//! executor. The order is part of the engine's contract:
//!
//! - admission control sits outermost, so a queue-full rejection never
//!   counts against the breaker;
//! - the breaker is consulted before every attempt, so retries cannot pile
//!   onto a target that tripped mid-call;
//! - the timeout bounds each attempt individually.
//!
//! Layers a target never configured are skipped without ceremony.

use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use crate::classifier::{FailureClassifier, TransientByDefault};
use crate::error::PolicyResult;
use crate::events::SinkHandle;
use crate::outcome::{CallOutcome, Outcome};
use crate::registry::{PolicyRegistry, TargetRuntime};
use crate::retry::RetryExecutor;

/// Executes operations under the policies registered for a target.
///
/// Cheap to clone; all clones share the registry, so concurrent calls to
/// the same target share that target's breaker and bulkhead.
///
/// ```rust,ignore
/// let composer = PolicyComposer::new(registry);
/// let resolved = composer
///     .execute("payments", || client.charge(&order))
///     .await?;
/// match resolved.outcome() {
///     Outcome::Success(receipt) => println!("charged: {receipt:?}"),
///     Outcome::CircuitOpenRejected => queue_for_later(&order),
///     other => tracing::warn!("charge failed: {}", other.label()),
/// }
/// ```
#[derive(Clone)]
pub struct PolicyComposer {
    registry: Arc<PolicyRegistry>,
}

impl PolicyComposer {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }

    /// The registry behind this composer.
    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    /// Run `operation` under `target`'s policies, treating every failure
    /// as transient.
    pub async fn execute<F, Fut, T, E>(
        &self,
        target: &str,
        operation: F,
    ) -> PolicyResult<CallOutcome<T, E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(target, &TransientByDefault, operation).await
    }

    /// Run `operation` under `target`'s policies with an explicit failure
    /// classifier.
    ///
    /// `operation` is a factory invoked once per attempt. The returned
    /// [`CallOutcome`] is always `Ok` for a resolved call, whatever its
    /// outcome; `Err` means the target could not be resolved at all.
    pub async fn execute_with<C, F, Fut, T, E>(
        &self,
        target: &str,
        classifier: &C,
        operation: F,
    ) -> PolicyResult<CallOutcome<T, E>>
    where
        C: FailureClassifier<E> + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let runtime = self.registry.resolve(target)?;
        Ok(run_pipeline(&runtime, self.registry.sink(), classifier, operation).await)
    }

    /// `execute`, degrading to `fallback` when the call resolves to any
    /// failure. The fallback receives the failed call with its context.
    pub async fn execute_or<F, Fut, T, E, FB, FutB>(
        &self,
        target: &str,
        operation: F,
        fallback: FB,
    ) -> PolicyResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CallOutcome<T, E>) -> FutB,
        FutB: Future<Output = T>,
    {
        let resolved = self.execute(target, operation).await?;
        match resolved.into_result() {
            Ok(value) => Ok(value),
            Err(failed) => {
                debug!(name = %target, outcome = failed.outcome().label(), "degrading to fallback");
                Ok(fallback(failed).await)
            }
        }
    }
}

impl std::fmt::Debug for PolicyComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyComposer")
            .field("registry", &self.registry)
            .finish()
    }
}

async fn run_pipeline<C, F, Fut, T, E>(
    runtime: &TargetRuntime,
    sink: &SinkHandle,
    classifier: &C,
    operation: F,
) -> CallOutcome<T, E>
where
    C: FailureClassifier<E> + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started = Instant::now();

    // Admission first. The permit rides the whole call, retries included,
    // and frees on every exit path.
    let _permit = match &runtime.bulkhead {
        Some(bulkhead) => match bulkhead.acquire().await {
            Ok(permit) => Some(permit),
            Err(_) => {
                return CallOutcome::new(
                    &runtime.name,
                    0,
                    started.elapsed(),
                    Outcome::BulkheadRejected,
                );
            }
        },
        None => None,
    };

    let executor = RetryExecutor::new(
        &runtime.name,
        runtime.policies.retry.as_ref(),
        runtime.breaker.as_ref(),
        runtime.timeout_guard(),
        sink,
    );
    let (outcome, attempts) = executor.run(classifier, operation).await;
    CallOutcome::new(&runtime.name, attempts, started.elapsed(), outcome)
}
