//! Per-target policy registry.
//!
//! The registry maps logical target names to validated policy sets and the
//! stateful breaker and bulkhead instances those sets own. Lookups touch
//! only the requested target's entry; targets never contend on each other's
//! state.
//!
//! Re-registering a name replaces the runtime atomically. Calls already in
//! flight keep the runtime they resolved at admission, so a hot swap never
//! mixes old and new state within one call.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info};

use crate::bulkhead::{Bulkhead, BulkheadSnapshot};
use crate::catalog::PolicyCatalog;
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
use crate::error::{PolicyError, PolicyResult};
use crate::events::{EventSink, SinkHandle, TracingEventSink};
use crate::policy::TargetPolicySet;
use crate::timeout::TimeoutGuard;

/// Pseudo-target name used when validating the default policy template.
const DEFAULT_TEMPLATE: &str = "(default)";

/// Live runtime for one registered target.
#[derive(Debug)]
pub(crate) struct TargetRuntime {
    pub(crate) name: Arc<str>,
    pub(crate) policies: TargetPolicySet,
    pub(crate) breaker: Option<Arc<CircuitBreaker>>,
    pub(crate) bulkhead: Option<Arc<Bulkhead>>,
}

impl TargetRuntime {
    fn build(name: &str, policies: TargetPolicySet, sink: &SinkHandle) -> Self {
        let name: Arc<str> = Arc::from(name);
        let breaker = policies
            .breaker
            .clone()
            .map(|policy| CircuitBreaker::new(name.clone(), policy, sink.clone()));
        let bulkhead = policies
            .bulkhead
            .clone()
            .map(|policy| Bulkhead::new(name.clone(), policy, sink.clone()));
        Self {
            name,
            policies,
            breaker,
            bulkhead,
        }
    }

    pub(crate) fn timeout_guard(&self) -> Option<TimeoutGuard> {
        self.policies.timeout.as_ref().map(TimeoutGuard::new)
    }
}

/// Registry of target policy sets and their runtime state.
///
/// ```rust,ignore
/// let registry = PolicyRegistry::builder()
///     .default_policies(TargetPolicySet::standard())
///     .build()?;
/// registry.register(
///     "payments",
///     TargetPolicySet::new()
///         .with_breaker(BreakerPolicy::new(5, Duration::from_secs(30)))
///         .with_timeout(TimeoutPolicy::new(Duration::from_secs(2))),
/// )?;
/// ```
pub struct PolicyRegistry {
    targets: DashMap<String, Arc<TargetRuntime>>,
    default_policies: Option<TargetPolicySet>,
    sink: SinkHandle,
}

impl PolicyRegistry {
    /// A registry that logs events through `tracing` and rejects unknown
    /// targets.
    pub fn new() -> Self {
        Self {
            targets: DashMap::new(),
            default_policies: None,
            sink: SinkHandle::new(Arc::new(TracingEventSink)),
        }
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Validate and register a policy set, replacing any prior set under
    /// the same name.
    pub fn register(&self, target: impl Into<String>, policies: TargetPolicySet) -> PolicyResult<()> {
        let target = target.into();
        if target.is_empty() {
            return Err(PolicyError::invalid(&target, "target name must not be empty"));
        }
        policies.validate(&target)?;
        let runtime = Arc::new(TargetRuntime::build(&target, policies, &self.sink));
        let replaced = self.targets.insert(target.clone(), runtime).is_some();
        info!(name = %target, replaced, "registered policy set");
        Ok(())
    }

    /// Register every entry of a deserialized catalog. Stops at the first
    /// invalid entry, leaving earlier entries registered.
    pub fn register_catalog(&self, catalog: PolicyCatalog) -> PolicyResult<()> {
        for (target, config) in catalog {
            self.register(target, config.into_policy_set())?;
        }
        Ok(())
    }

    /// Drop a target. Calls already in flight finish against the removed
    /// runtime.
    pub fn deregister(&self, target: &str) -> bool {
        self.targets.remove(target).is_some()
    }

    pub fn contains(&self, target: &str) -> bool {
        self.targets.contains_key(target)
    }

    /// Registered target names, unordered.
    pub fn targets(&self) -> Vec<String> {
        self.targets.iter().map(|entry| entry.key().clone()).collect()
    }

    /// The breaker guarding `target`, for manual `force_open` / `reset`.
    pub fn breaker(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.targets.get(target).and_then(|entry| entry.breaker.clone())
    }

    /// Current breaker state for `target`, if it has a breaker.
    pub fn breaker_state(&self, target: &str) -> Option<CircuitState> {
        self.breaker(target).map(|breaker| breaker.state())
    }

    /// The bulkhead guarding `target`, for live concurrency introspection.
    pub fn bulkhead(&self, target: &str) -> Option<Arc<Bulkhead>> {
        self.targets.get(target).and_then(|entry| entry.bulkhead.clone())
    }

    /// Point-in-time view of every registered target.
    pub fn snapshot(&self) -> Vec<TargetSnapshot> {
        self.targets
            .iter()
            .map(|entry| TargetSnapshot {
                target: entry.key().clone(),
                breaker: entry.breaker.as_ref().map(|b| b.snapshot()),
                bulkhead: entry.bulkhead.as_ref().map(|b| b.snapshot()),
            })
            .collect()
    }

    pub(crate) fn sink(&self) -> &SinkHandle {
        &self.sink
    }

    /// Resolve the runtime for a call. Unknown names fall back to the
    /// default template when one was configured; the instantiated runtime
    /// is kept, so every distinct name gets its own breaker and bulkhead.
    pub(crate) fn resolve(&self, target: &str) -> PolicyResult<Arc<TargetRuntime>> {
        if let Some(entry) = self.targets.get(target) {
            return Ok(entry.clone());
        }
        match &self.default_policies {
            Some(template) => {
                let runtime = self
                    .targets
                    .entry(target.to_string())
                    .or_insert_with(|| {
                        debug!(name = %target, "instantiating default policies");
                        Arc::new(TargetRuntime::build(target, template.clone(), &self.sink))
                    })
                    .clone();
                Ok(runtime)
            }
            None => Err(PolicyError::UnknownTarget(target.to_string())),
        }
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("targets", &self.targets.len())
            .field("has_defaults", &self.default_policies.is_some())
            .finish()
    }
}

/// Builder fixing the registry-wide choices.
pub struct RegistryBuilder {
    sink: Arc<dyn EventSink>,
    default_policies: Option<TargetPolicySet>,
}

impl RegistryBuilder {
    fn new() -> Self {
        Self {
            sink: Arc::new(TracingEventSink),
            default_policies: None,
        }
    }

    /// Where engine events go. Defaults to [`TracingEventSink`].
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Template applied to targets that were never registered. Without it,
    /// unknown targets fail with [`PolicyError::UnknownTarget`].
    pub fn default_policies(mut self, policies: TargetPolicySet) -> Self {
        self.default_policies = Some(policies);
        self
    }

    pub fn build(self) -> PolicyResult<PolicyRegistry> {
        if let Some(template) = &self.default_policies {
            template.validate(DEFAULT_TEMPLATE)?;
        }
        Ok(PolicyRegistry {
            targets: DashMap::new(),
            default_policies: self.default_policies,
            sink: SinkHandle::new(self.sink),
        })
    }
}

/// Point-in-time view of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetSnapshot {
    pub target: String,
    pub breaker: Option<BreakerSnapshot>,
    pub bulkhead: Option<BulkheadSnapshot>,
}
