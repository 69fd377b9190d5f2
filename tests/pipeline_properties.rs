//! Integration tests for the policy pipeline.
//!
//! These drive the composer end to end on a paused clock, so every timing
//! assertion is deterministic virtual time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use armature_resilience::prelude::*;

fn counting_failure(
    invocations: Arc<AtomicU32>,
) -> impl FnMut() -> std::future::Ready<Result<u32, &'static str>> {
    move || {
        invocations.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err("reset"))
    }
}

fn counting_success(
    invocations: Arc<AtomicU32>,
) -> impl FnMut() -> std::future::Ready<Result<u32, &'static str>> {
    move || {
        invocations.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(1))
    }
}

// =============================================================================
// Circuit Breaker Properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_exact_consecutive_threshold() {
    let sink = MemoryEventSink::new();
    let registry = Arc::new(
        PolicyRegistry::builder()
            .event_sink(sink.clone())
            .build()
            .unwrap(),
    );
    registry
        .register(
            "payments",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(5, Duration::from_secs(30))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());

    let invocations = Arc::new(AtomicU32::new(0));

    for call in 1..=4u32 {
        let resolved = composer
            .execute("payments", counting_failure(invocations.clone()))
            .await
            .unwrap();
        assert_eq!(
            resolved.outcome(),
            &Outcome::TransientFailure("reset"),
            "call {call} should surface the failure"
        );
        assert_eq!(
            registry.breaker_state("payments"),
            Some(CircuitState::Closed),
            "breaker must stay closed through call {call}"
        );
    }

    // The fifth consecutive failure trips it.
    let resolved = composer
        .execute("payments", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::TransientFailure("reset"));
    assert_eq!(registry.breaker_state("payments"), Some(CircuitState::Open));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
    assert_eq!(
        sink.names()
            .iter()
            .filter(|name| **name == "breaker_state_changed")
            .count(),
        1
    );

    // While open, calls resolve without invoking the operation.
    let resolved = composer
        .execute("payments", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::CircuitOpenRejected);
    assert_eq!(resolved.attempts(), 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn test_interleaved_successes_hold_the_breaker_closed() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "search",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(3, Duration::from_secs(30))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());
    let invocations = Arc::new(AtomicU32::new(0));

    // Two failures, a success, two failures: the streak never reaches 3.
    for _ in 0..2 {
        composer
            .execute("search", counting_failure(invocations.clone()))
            .await
            .unwrap();
    }
    composer
        .execute("search", counting_success(invocations.clone()))
        .await
        .unwrap();
    for _ in 0..2 {
        composer
            .execute("search", counting_failure(invocations.clone()))
            .await
            .unwrap();
    }

    assert_eq!(registry.breaker_state("search"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_half_open_admits_exactly_one_concurrent_trial() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "inventory",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(1, Duration::from_secs(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());

    let invocations = Arc::new(AtomicU32::new(0));
    composer
        .execute("inventory", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(registry.breaker_state("inventory"), Some(CircuitState::Open));
    invocations.store(0, Ordering::SeqCst);

    tokio::time::advance(Duration::from_secs(11)).await;

    // The trial holds the half-open slot for 100ms.
    let trial = tokio::spawn({
        let composer = composer.clone();
        let counter = invocations.clone();
        async move {
            composer
                .execute("inventory", move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<u32, &'static str>(1)
                    }
                })
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.breaker_state("inventory"), Some(CircuitState::HalfOpen));

    // Arrivals during the trial never reach the operation.
    for _ in 0..3 {
        let resolved = composer
            .execute("inventory", counting_failure(invocations.clone()))
            .await
            .unwrap();
        assert_eq!(resolved.outcome(), &Outcome::CircuitOpenRejected);
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    let resolved = trial.await.unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("inventory"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_restarts_the_reset_timeout() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "ledger",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(1, Duration::from_secs(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());
    let invocations = Arc::new(AtomicU32::new(0));

    composer
        .execute("ledger", counting_failure(invocations.clone()))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;

    // The trial fails; the breaker reopens.
    let resolved = composer
        .execute("ledger", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::TransientFailure("reset"));
    assert_eq!(registry.breaker_state("ledger"), Some(CircuitState::Open));

    // Short of a fresh reset timeout: still rejected.
    tokio::time::advance(Duration::from_secs(9)).await;
    let resolved = composer
        .execute("ledger", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::CircuitOpenRejected);

    // A full timeout later the next trial closes it.
    tokio::time::advance(Duration::from_secs(2)).await;
    let resolved = composer
        .execute("ledger", counting_success(invocations.clone()))
        .await
        .unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("ledger"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_trial_call_reopens_the_breaker() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "billing",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(1, Duration::from_secs(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());
    let invocations = Arc::new(AtomicU32::new(0));

    composer
        .execute("billing", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(registry.breaker_state("billing"), Some(CircuitState::Open));

    tokio::time::advance(Duration::from_secs(11)).await;

    // The trial call hangs; the caller gives up and aborts it.
    let trial = tokio::spawn({
        let composer = composer.clone();
        let counter = invocations.clone();
        async move {
            composer
                .execute("billing", move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok::<u32, &'static str>(1)
                    }
                })
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.breaker_state("billing"), Some(CircuitState::HalfOpen));

    trial.abort();
    let join = trial.await;
    assert!(join.unwrap_err().is_cancelled());

    // The dropped trial counts as failed: reopened, with a fresh timeout.
    assert_eq!(registry.breaker_state("billing"), Some(CircuitState::Open));
    tokio::time::advance(Duration::from_secs(9)).await;
    let resolved = composer
        .execute("billing", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::CircuitOpenRejected);

    // The next trial after a full timeout closes it again.
    tokio::time::advance(Duration::from_secs(2)).await;
    let resolved = composer
        .execute("billing", counting_success(invocations.clone()))
        .await
        .unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("billing"), Some(CircuitState::Closed));
    // Trip, aborted trial, closing trial; the rejected call never ran.
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_force_open_mid_trial_ignores_the_stale_result() {
    let sink = MemoryEventSink::new();
    let registry = Arc::new(
        PolicyRegistry::builder()
            .event_sink(sink.clone())
            .build()
            .unwrap(),
    );
    registry
        .register(
            "ops",
            TargetPolicySet::new().with_breaker(BreakerPolicy::new(1, Duration::from_secs(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());
    let invocations = Arc::new(AtomicU32::new(0));

    composer
        .execute("ops", counting_failure(invocations.clone()))
        .await
        .unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;

    // First trial: slow but ultimately successful.
    let first = tokio::spawn({
        let composer = composer.clone();
        async move {
            composer
                .execute("ops", || async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok::<u32, &'static str>(1)
                })
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.breaker_state("ops"), Some(CircuitState::HalfOpen));

    // An operator trips the target while the trial is still out.
    let breaker = registry.breaker("ops").unwrap();
    breaker.force_open();
    assert_eq!(registry.breaker_state("ops"), Some(CircuitState::Open));

    // A fresh timeout admits a second trial, slower still.
    tokio::time::advance(Duration::from_secs(11)).await;
    let second = tokio::spawn({
        let composer = composer.clone();
        async move {
            composer
                .execute("ops", || async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err::<u32, &'static str>("reset")
                })
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(registry.breaker_state("ops"), Some(CircuitState::HalfOpen));

    // The first trial resolves while superseded: its caller still sees
    // the success, but the breaker stays on the second trial.
    let resolved = first.await.unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("ops"), Some(CircuitState::HalfOpen));

    // The second trial's failure is the one that counts.
    let resolved = second.await.unwrap();
    assert_eq!(resolved.outcome(), &Outcome::TransientFailure("reset"));
    assert_eq!(registry.breaker_state("ops"), Some(CircuitState::Open));

    let transitions: Vec<(CircuitState, CircuitState)> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            PolicyEvent::BreakerStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Open), // force_open
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Open), // trial failure
        ]
    );
}

// =============================================================================
// Retry Properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_follow_the_schedule_without_jitter() {
    let sink = MemoryEventSink::new();
    let registry = Arc::new(
        PolicyRegistry::builder()
            .event_sink(sink.clone())
            .build()
            .unwrap(),
    );
    registry
        .register(
            "api",
            TargetPolicySet::new().with_retry(
                RetryPolicy::new(4)
                    .base_delay(Duration::from_millis(100))
                    .backoff_factor(2.0),
            ),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let invocations = Arc::new(AtomicU32::new(0));
    let started = tokio::time::Instant::now();
    let resolved = composer
        .execute("api", counting_failure(invocations.clone()))
        .await
        .unwrap();

    assert_eq!(resolved.outcome(), &Outcome::RetriesExhausted("reset"));
    assert_eq!(resolved.attempts(), 4);
    assert_eq!(invocations.load(Ordering::SeqCst), 4);
    // 100ms + 200ms + 400ms of backoff between the four attempts.
    assert_eq!(started.elapsed(), Duration::from_millis(700));

    let delays: Vec<Duration> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            PolicyEvent::RetryAttempt { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
        ]
    );
    assert_eq!(sink.names().last(), Some(&"retries_exhausted"));
}

#[tokio::test(start_paused = true)]
async fn test_jittered_delays_stay_within_the_band() {
    let sink = MemoryEventSink::new();
    let registry = Arc::new(
        PolicyRegistry::builder()
            .event_sink(sink.clone())
            .build()
            .unwrap(),
    );
    registry
        .register(
            "flaky",
            TargetPolicySet::new().with_retry(
                RetryPolicy::new(5)
                    .base_delay(Duration::from_millis(100))
                    .backoff_factor(1.0)
                    .jitter_ratio(0.5),
            ),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let invocations = Arc::new(AtomicU32::new(0));
    composer
        .execute("flaky", counting_failure(invocations.clone()))
        .await
        .unwrap();

    let delays: Vec<Duration> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            PolicyEvent::RetryAttempt { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 4);
    for delay in delays {
        assert!(delay >= Duration::from_millis(50), "{delay:?} below band");
        assert!(delay <= Duration::from_millis(150), "{delay:?} above band");
    }
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failures_skip_retry_and_breaker() {
    fn classify(error: &&'static str) -> FailureKind {
        if *error == "fatal" {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        }
    }

    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "orders",
            TargetPolicySet::new()
                .with_breaker(BreakerPolicy::new(1, Duration::from_secs(30)))
                .with_retry(RetryPolicy::new(3).base_delay(Duration::from_millis(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());

    let invocations = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let counter = invocations.clone();
        let resolved = composer
            .execute_with("orders", &classify, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, &'static str>("fatal")
                }
            })
            .await
            .unwrap();
        assert_eq!(resolved.outcome(), &Outcome::PermanentFailure("fatal"));
        assert_eq!(resolved.attempts(), 1);
    }

    // Three permanent failures: one invocation each, breaker untouched
    // even at threshold 1.
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(registry.breaker_state("orders"), Some(CircuitState::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_transient_then_permanent_stops_mid_sequence() {
    fn classify(error: &&'static str) -> FailureKind {
        if *error == "fatal" {
            FailureKind::Permanent
        } else {
            FailureKind::Transient
        }
    }

    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "orders",
            TargetPolicySet::new().with_retry(RetryPolicy::new(5).base_delay(Duration::from_millis(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let resolved = composer
        .execute_with("orders", &classify, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 1 {
                    Err::<u32, &'static str>("reset")
                } else {
                    Err("fatal")
                }
            }
        })
        .await
        .unwrap();

    // Attempt 1 was retried as transient; attempt 2 hit the permanent
    // cause and stopped.
    assert_eq!(resolved.outcome(), &Outcome::PermanentFailure("fatal"));
    assert_eq!(resolved.attempts(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Timeout Properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_hanging_operation_resolves_at_the_deadline_and_is_cancelled() {
    struct DropProbe(Arc<AtomicBool>);
    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "slow",
            TargetPolicySet::new().with_timeout(TimeoutPolicy::new(Duration::from_millis(50))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let cancelled = Arc::new(AtomicBool::new(false));
    let probe_flag = cancelled.clone();
    let started = tokio::time::Instant::now();
    let resolved = composer
        .execute("slow", move || {
            let probe = DropProbe(probe_flag.clone());
            async move {
                let _probe = probe;
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok::<u32, &'static str>(1)
            }
        })
        .await
        .unwrap();

    assert_eq!(resolved.outcome(), &Outcome::TimedOut);
    assert_eq!(started.elapsed(), Duration::from_millis(50));
    assert!(cancelled.load(Ordering::SeqCst), "attempt future must be dropped");
}

#[tokio::test(start_paused = true)]
async fn test_each_attempt_gets_its_own_deadline() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "slow",
            TargetPolicySet::new()
                .with_timeout(TimeoutPolicy::new(Duration::from_millis(50)))
                .with_retry(RetryPolicy::new(3).base_delay(Duration::from_millis(10))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = invocations.clone();
    let started = tokio::time::Instant::now();
    let resolved = composer
        .execute("slow", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<u32, &'static str>(1)
            }
        })
        .await
        .unwrap();

    // Three attempts of 50ms each plus 10ms and 20ms of backoff. The
    // final timeout surfaces as TimedOut since the cancelled attempt
    // leaves no cause behind.
    assert_eq!(resolved.outcome(), &Outcome::TimedOut);
    assert_eq!(invocations.load(Ordering::SeqCst), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(180));
}

// =============================================================================
// Bulkhead Properties
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_eleventh_concurrent_call_is_rejected() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "db",
            TargetPolicySet::bulkhead_only(BulkheadPolicy::new(10).no_queueing()),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    let mut handles = Vec::new();
    for _ in 0..11 {
        handles.push(tokio::spawn({
            let composer = composer.clone();
            async move {
                composer
                    .execute("db", || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<u32, &'static str>(1)
                    })
                    .await
                    .unwrap()
            }
        }));
    }

    let mut admitted = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap().into_outcome() {
            Outcome::Success(_) => admitted += 1,
            Outcome::BulkheadRejected => rejected += 1,
            other => panic!("unexpected outcome: {}", other.label()),
        }
    }
    assert_eq!(admitted, 10);
    assert_eq!(rejected, 1);
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_slot_is_held_across_retries() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "db",
            TargetPolicySet::new()
                .with_bulkhead(BulkheadPolicy::new(1).no_queueing())
                .with_retry(RetryPolicy::new(3).base_delay(Duration::from_millis(50))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry);

    // Holds the only slot through two backoff delays (~150ms).
    let holder = tokio::spawn({
        let composer = composer.clone();
        async move {
            composer
                .execute("db", || async { Err::<u32, &'static str>("reset") })
                .await
                .unwrap()
        }
    });

    // Mid-backoff the slot is still taken.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let resolved = composer
        .execute("db", || async { Ok::<u32, &'static str>(2) })
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::BulkheadRejected);

    let held = holder.await.unwrap();
    assert_eq!(held.outcome(), &Outcome::RetriesExhausted("reset"));

    // Slot freed once the call resolved.
    let resolved = composer
        .execute("db", || async { Ok::<u32, &'static str>(2) })
        .await
        .unwrap();
    assert!(resolved.is_success());
}

// =============================================================================
// Hot Swap
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_hot_swap_leaves_in_flight_calls_on_old_policies() {
    let registry = Arc::new(PolicyRegistry::new());
    registry
        .register(
            "db",
            TargetPolicySet::new().with_timeout(TimeoutPolicy::new(Duration::from_secs(1))),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());

    let in_flight = tokio::spawn({
        let composer = composer.clone();
        async move {
            composer
                .execute("db", || async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<u32, &'static str>(1)
                })
                .await
                .unwrap()
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Swap in a far stricter deadline mid-call.
    registry
        .register(
            "db",
            TargetPolicySet::new().with_timeout(TimeoutPolicy::new(Duration::from_millis(50))),
        )
        .unwrap();

    // The in-flight call finishes under the policies it started with.
    let resolved = in_flight.await.unwrap();
    assert!(resolved.is_success());

    // New calls run under the replacement.
    let resolved = composer
        .execute("db", || async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<u32, &'static str>(2)
        })
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::TimedOut);
}

// =============================================================================
// End-to-End Scenario
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_payments_target_full_lifecycle() {
    let sink = MemoryEventSink::new();
    let registry = Arc::new(
        PolicyRegistry::builder()
            .event_sink(sink.clone())
            .build()
            .unwrap(),
    );
    registry
        .register(
            "payments",
            TargetPolicySet::new()
                .with_breaker(BreakerPolicy::new(5, Duration::from_secs(30)))
                .with_retry(RetryPolicy::new(1))
                .with_timeout(TimeoutPolicy::new(Duration::from_secs(1)))
                .with_bulkhead(BulkheadPolicy::new(1)),
        )
        .unwrap();
    let composer = PolicyComposer::new(registry.clone());
    let invocations = Arc::new(AtomicU32::new(0));

    // Five failing calls in a row trip the breaker.
    for _ in 0..5 {
        let resolved = composer
            .execute("payments", counting_failure(invocations.clone()))
            .await
            .unwrap();
        assert_eq!(resolved.outcome(), &Outcome::RetriesExhausted("reset"));
        assert_eq!(resolved.attempts(), 1);
    }
    assert_eq!(registry.breaker_state("payments"), Some(CircuitState::Open));
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    // One second later: rejected without an invocation.
    tokio::time::advance(Duration::from_secs(1)).await;
    let resolved = composer
        .execute("payments", counting_failure(invocations.clone()))
        .await
        .unwrap();
    assert_eq!(resolved.outcome(), &Outcome::CircuitOpenRejected);
    assert_eq!(resolved.attempts(), 0);
    assert_eq!(invocations.load(Ordering::SeqCst), 5);

    // Thirty seconds past the trip, the next call runs as the trial and
    // closes the breaker.
    tokio::time::advance(Duration::from_secs(30)).await;
    let resolved = composer
        .execute("payments", counting_success(invocations.clone()))
        .await
        .unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("payments"), Some(CircuitState::Closed));

    // Traffic flows normally again.
    let resolved = composer
        .execute("payments", counting_success(invocations.clone()))
        .await
        .unwrap();
    assert!(resolved.is_success());
    assert_eq!(registry.breaker_state("payments"), Some(CircuitState::Closed));

    // Event trail: one exhaustion per failing call, with the breaker
    // transitions interleaved where they happened.
    assert_eq!(
        sink.names(),
        vec![
            "retries_exhausted",
            "retries_exhausted",
            "retries_exhausted",
            "retries_exhausted",
            "breaker_state_changed", // closed -> open on the fifth failure
            "retries_exhausted",
            "breaker_state_changed", // open -> half-open at the trial
            "breaker_state_changed", // half-open -> closed on trial success
        ]
    );

    let transitions: Vec<(CircuitState, CircuitState)> = sink
        .events()
        .iter()
        .filter_map(|event| match event {
            PolicyEvent::BreakerStateChanged { from, to, .. } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}
